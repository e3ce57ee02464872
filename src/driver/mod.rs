//! Execution context and HTTP collaborators
//!
//! The engine never automates a page itself. It drives an [`ExecutionContext`]
//! produced by a [`ContextProvider`], and sends requests through an
//! [`HttpClient`]. Concrete adapters live in the submodules.

pub mod headless;
pub mod http;
pub mod webdriver;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::Result;

pub use headless::{HttpContext, HttpContextProvider, HTTP_FLAVOR};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use webdriver::WebDriverProvider;

/// When a navigation counts as complete
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    /// The load event fired
    Load,
    /// The DOM is parsed; subresources may still be loading
    #[serde(alias = "domcontentloaded")]
    DomContentLoaded,
    /// Loaded, and no new subresources for a short quiet period
    #[default]
    #[serde(alias = "networkidle")]
    NetworkIdle,
}

/// Browser window size
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Options applied when a context is created
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContextOptions {
    /// Window size for browser contexts
    #[serde(default)]
    pub viewport: Option<Viewport>,
    /// User agent override
    #[serde(default, alias = "userAgent")]
    pub user_agent: Option<String>,
    /// Prefix for relative navigate and request URLs
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
}

/// An isolated sandbox one test runs in
///
/// Every method is a suspension point. Implementations report a missing
/// element as [`crate::Error::ElementNotFound`].
#[async_trait]
pub trait ExecutionContext: Send {
    /// Flavor this context was created for (e.g. "chromium", "http")
    fn flavor(&self) -> &str;

    async fn navigate(&mut self, url: &str, wait_until: WaitUntil) -> Result<()>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Replace the element's value
    async fn fill(&mut self, selector: &str, value: &str) -> Result<()>;

    /// Send keystrokes without clearing first
    async fn type_text(&mut self, selector: &str, text: &str) -> Result<()>;

    async fn wait_for_selector(&mut self, selector: &str, timeout: std::time::Duration)
        -> Result<()>;

    /// Capture the current visual state as PNG bytes
    ///
    /// `full_page` asks for the whole scrollable page where the backend can
    /// capture it; otherwise the viewport is captured.
    async fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>>;

    /// Text of the first matching element, `None` if nothing matches
    async fn text_content(&mut self, selector: &str) -> Result<Option<String>>;

    async fn is_visible(&mut self, selector: &str) -> Result<bool>;

    async fn url(&mut self) -> Result<String>;

    async fn count(&mut self, selector: &str) -> Result<usize>;

    /// Release the context. Called exactly once, on every exit path.
    async fn destroy(&mut self) -> Result<()>;
}

/// Produces fresh execution contexts
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Create a context for `flavor`
    ///
    /// Failures are reported as [`crate::Error::ContextAcquisition`].
    async fn create_context(
        &self,
        flavor: &str,
        options: &ContextOptions,
    ) -> Result<Box<dyn ExecutionContext>>;

    /// Release provider-wide resources such as spawned drivers
    async fn shutdown(&self) {}
}

/// Routes the `http` flavor to bare contexts and everything else to WebDriver
pub struct DefaultProvider {
    http: HttpContextProvider,
    browsers: Arc<WebDriverProvider>,
}

impl DefaultProvider {
    pub fn new(browsers: Arc<WebDriverProvider>) -> Self {
        Self {
            http: HttpContextProvider,
            browsers,
        }
    }
}

#[async_trait]
impl ContextProvider for DefaultProvider {
    async fn create_context(
        &self,
        flavor: &str,
        options: &ContextOptions,
    ) -> Result<Box<dyn ExecutionContext>> {
        if flavor == HTTP_FLAVOR {
            self.http.create_context(flavor, options).await
        } else {
            self.browsers.create_context(flavor, options).await
        }
    }

    async fn shutdown(&self) {
        self.browsers.shutdown().await;
    }
}

/// Resolve a possibly relative URL against a base URL
pub fn resolve_url(base: Option<&str>, url: &str) -> String {
    if url.contains("://") {
        return url.to_string();
    }
    match base {
        Some(base) if !base.is_empty() => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
        _ => url.to_string(),
    }
}

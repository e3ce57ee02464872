//! Bare context for API-only tests
//!
//! Has no page. Page operations fail as unsupported; request and assertion
//! steps run against the variable store only.

use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Error, Result};

use super::{ContextOptions, ContextProvider, ExecutionContext, WaitUntil};

/// Flavor name for contexts without a browser
pub const HTTP_FLAVOR: &str = "http";

pub struct HttpContext {
    destroyed: bool,
}

impl HttpContext {
    pub fn new() -> Self {
        Self { destroyed: false }
    }

    fn unsupported<T>(&self, operation: &str) -> Result<T> {
        Err(Error::unsupported(operation, HTTP_FLAVOR))
    }
}

impl Default for HttpContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionContext for HttpContext {
    fn flavor(&self) -> &str {
        HTTP_FLAVOR
    }

    async fn navigate(&mut self, _url: &str, _wait_until: WaitUntil) -> Result<()> {
        self.unsupported("navigate")
    }

    async fn click(&mut self, _selector: &str) -> Result<()> {
        self.unsupported("click")
    }

    async fn fill(&mut self, _selector: &str, _value: &str) -> Result<()> {
        self.unsupported("fill")
    }

    async fn type_text(&mut self, _selector: &str, _text: &str) -> Result<()> {
        self.unsupported("type")
    }

    async fn wait_for_selector(&mut self, _selector: &str, _timeout: Duration) -> Result<()> {
        self.unsupported("wait for selector")
    }

    async fn screenshot(&mut self, _full_page: bool) -> Result<Vec<u8>> {
        self.unsupported("screenshot")
    }

    async fn text_content(&mut self, _selector: &str) -> Result<Option<String>> {
        self.unsupported("text content")
    }

    async fn is_visible(&mut self, _selector: &str) -> Result<bool> {
        self.unsupported("visibility check")
    }

    async fn url(&mut self) -> Result<String> {
        self.unsupported("url")
    }

    async fn count(&mut self, _selector: &str) -> Result<usize> {
        self.unsupported("count")
    }

    async fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(Error::Internal("context destroyed twice".to_string()));
        }
        self.destroyed = true;
        Ok(())
    }
}

/// Hands out a fresh [`HttpContext`] for every test
pub struct HttpContextProvider;

#[async_trait]
impl ContextProvider for HttpContextProvider {
    async fn create_context(
        &self,
        _flavor: &str,
        _options: &ContextOptions,
    ) -> Result<Box<dyn ExecutionContext>> {
        Ok(Box::new(HttpContext::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_page_operations_are_unsupported() {
        let mut ctx = HttpContext::new();
        let err = ctx.click("#go").await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert!(err.to_string().contains("http"));
    }

    #[tokio::test]
    async fn test_destroy_once() {
        let mut ctx = HttpContext::new();
        ctx.destroy().await.unwrap();
        assert!(ctx.destroy().await.is_err());
    }
}

//! W3C WebDriver adapter
//!
//! Each execution context is one WebDriver session. The driver server is
//! either already running (`webdriver_url`) or spawned once per flavor from
//! the configured `driver` binary and kept until [`ContextProvider::shutdown`].
//!
//! Wire format: JSON over HTTP, every response wrapped in `{"value": ...}`.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::common::config::{BrowserConfig, Config};
use crate::common::{Error, Result};

use super::{ContextOptions, ContextProvider, ExecutionContext, WaitUntil};

/// Key under which WebDriver returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a9b7d7b3e5f";

/// How long a spawned driver gets to report ready
const DRIVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resource count must stay unchanged this long for network idle
const NETWORK_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// A driver server serving one flavor
struct Driver {
    url: String,
    /// Present when we spawned the driver ourselves
    child: Option<Child>,
}

/// Creates WebDriver sessions, spawning driver servers on demand
pub struct WebDriverProvider {
    config: Config,
    http: reqwest::Client,
    drivers: Mutex<HashMap<String, Driver>>,
}

impl WebDriverProvider {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build WebDriver client: {}", e)))?;
        Ok(Self {
            config,
            http,
            drivers: Mutex::new(HashMap::new()),
        })
    }

    /// Base URL of the driver for `flavor`, spawning it if needed
    async fn endpoint(&self, flavor: &str, browser: &BrowserConfig) -> Result<String> {
        let mut drivers = self.drivers.lock().await;
        if let Some(driver) = drivers.get(flavor) {
            return Ok(driver.url.clone());
        }

        let driver = match (&browser.webdriver_url, &browser.driver) {
            (Some(url), _) => Driver {
                url: url.trim_end_matches('/').to_string(),
                child: None,
            },
            (None, Some(path)) => {
                self.spawn_driver(flavor, path, &browser.args, browser.port)
                    .await?
            }
            (None, None) => {
                return Err(Error::context_acquisition(
                    flavor,
                    "browser entry needs either 'webdriver_url' or 'driver'",
                ))
            }
        };

        let url = driver.url.clone();
        drivers.insert(flavor.to_string(), driver);
        Ok(url)
    }

    async fn spawn_driver(
        &self,
        flavor: &str,
        path: &Path,
        args: &[String],
        port: Option<u16>,
    ) -> Result<Driver> {
        let port = match port {
            Some(port) => port,
            None => free_port().map_err(|e| {
                Error::context_acquisition(flavor, format!("no free port for driver: {}", e))
            })?,
        };

        tracing::info!("Spawning {} on port {}", path.display(), port);
        let child = Command::new(path)
            .arg(format!("--port={}", port))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::context_acquisition(
                    flavor,
                    format!("failed to start {}: {}", path.display(), e),
                )
            })?;

        let url = format!("http://127.0.0.1:{}", port);
        self.wait_ready(flavor, &url).await?;

        Ok(Driver {
            url,
            child: Some(child),
        })
    }

    /// Poll `/status` until the driver accepts sessions
    async fn wait_ready(&self, flavor: &str, url: &str) -> Result<()> {
        let deadline = Instant::now() + DRIVER_STARTUP_TIMEOUT;
        loop {
            if let Ok(response) = self.http.get(format!("{}/status", url)).send().await {
                if let Ok(status) = response.json::<Value>().await {
                    if status["value"]["ready"].as_bool().unwrap_or(true) {
                        return Ok(());
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::context_acquisition(
                    flavor,
                    format!(
                        "driver at {} not ready after {} seconds",
                        url,
                        DRIVER_STARTUP_TIMEOUT.as_secs()
                    ),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ContextProvider for WebDriverProvider {
    async fn create_context(
        &self,
        flavor: &str,
        options: &ContextOptions,
    ) -> Result<Box<dyn ExecutionContext>> {
        let browser = self.config.get_browser(flavor).ok_or_else(|| {
            Error::context_acquisition(
                flavor,
                "not configured and no known driver found on PATH",
            )
        })?;
        let endpoint = self.endpoint(flavor, &browser).await?;

        let request = json!({
            "capabilities": { "alwaysMatch": capabilities(flavor, &browser, options) }
        });
        let response = self
            .http
            .post(format!("{}/session", endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::context_acquisition(flavor, e.to_string()))?;
        let payload = unwrap_payload("new session", response)
            .await
            .map_err(|e| Error::context_acquisition(flavor, e.to_string()))?;
        let session_id = payload["sessionId"]
            .as_str()
            .ok_or_else(|| Error::context_acquisition(flavor, "driver returned no sessionId"))?;

        tracing::debug!("Created {} session {}", flavor, session_id);
        let mut session = WebDriverSession {
            http: self.http.clone(),
            base: format!("{}/session/{}", endpoint, session_id),
            flavor: flavor.to_string(),
        };

        if let Some(viewport) = options.viewport {
            let resized = session
                .command(
                    Method::POST,
                    "window/rect",
                    json!({ "width": viewport.width, "height": viewport.height }),
                )
                .await;
            if let Err(e) = resized {
                let _ = session.destroy().await;
                return Err(Error::context_acquisition(flavor, e.to_string()));
            }
        }

        Ok(Box::new(session))
    }

    async fn shutdown(&self) {
        let mut drivers = self.drivers.lock().await;
        for (flavor, mut driver) in drivers.drain() {
            if let Some(child) = driver.child.as_mut() {
                tracing::debug!("Stopping {} driver", flavor);
                let _ = child.kill().await;
            }
        }
    }
}

/// One WebDriver session
pub struct WebDriverSession {
    http: reqwest::Client,
    /// `<driver>/session/<id>`
    base: String,
    flavor: String,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Value) -> Result<Value> {
        let url = if path.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{}", self.base, path)
        };

        let mut request = self.http.request(method.clone(), &url);
        if method == Method::POST {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::webdriver(path, e.to_string()))?;
        unwrap_payload(path, response).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.command(Method::GET, path, Value::Null).await
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<String>> {
        let value = self
            .command(
                Method::POST,
                "elements",
                json!({ "using": "css selector", "value": selector }),
            )
            .await?;

        Ok(value
            .as_array()
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|element| element.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_first(&self, selector: &str) -> Result<String> {
        self.find_all(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ElementNotFound(selector.to_string()))
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        self.command(
            Method::POST,
            "execute/sync",
            json!({ "script": script, "args": [] }),
        )
        .await
    }

    async fn resource_count(&self) -> Result<u64> {
        let count = self
            .execute_script("return performance.getEntriesByType('resource').length")
            .await?;
        Ok(count.as_u64().unwrap_or(0))
    }

    /// Block until the page reaches `wait_until`; the caller bounds the wait
    async fn wait_for_load(&self, wait_until: WaitUntil) -> Result<()> {
        loop {
            let state = self.execute_script("return document.readyState").await?;
            let state = state.as_str().unwrap_or_default();
            let reached = match wait_until {
                WaitUntil::DomContentLoaded => state == "interactive" || state == "complete",
                WaitUntil::Load | WaitUntil::NetworkIdle => state == "complete",
            };
            if reached {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if wait_until == WaitUntil::NetworkIdle {
            let mut last = self.resource_count().await?;
            loop {
                tokio::time::sleep(NETWORK_QUIET_PERIOD).await;
                let current = self.resource_count().await?;
                if current == last {
                    break;
                }
                last = current;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ExecutionContext for WebDriverSession {
    fn flavor(&self) -> &str {
        &self.flavor
    }

    async fn navigate(&mut self, url: &str, wait_until: WaitUntil) -> Result<()> {
        self.command(Method::POST, "url", json!({ "url": url }))
            .await?;
        self.wait_for_load(wait_until).await
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let element = self.find_first(selector).await?;
        self.command(
            Method::POST,
            &format!("element/{}/click", element),
            json!({}),
        )
        .await?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<()> {
        let element = self.find_first(selector).await?;
        self.command(
            Method::POST,
            &format!("element/{}/clear", element),
            json!({}),
        )
        .await?;
        self.command(
            Method::POST,
            &format!("element/{}/value", element),
            json!({ "text": value }),
        )
        .await?;
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let element = self.find_first(selector).await?;
        self.command(
            Method::POST,
            &format!("element/{}/value", element),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.find_all(selector).await?.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout(
                    format!("waiting for '{}'", selector),
                    timeout.as_millis() as u64,
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>> {
        // geckodriver is the only driver with a full-page endpoint
        let path = if full_page && browser_name(&self.flavor) == Some("firefox") {
            "moz/screenshot/full"
        } else {
            "screenshot"
        };
        let encoded = self.get(path).await?;
        let encoded = encoded
            .as_str()
            .ok_or_else(|| Error::webdriver("screenshot", "response is not a string"))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::webdriver("screenshot", format!("invalid base64: {}", e)))
    }

    async fn text_content(&mut self, selector: &str) -> Result<Option<String>> {
        let Some(element) = self.find_all(selector).await?.into_iter().next() else {
            return Ok(None);
        };
        let text = self.get(&format!("element/{}/text", element)).await?;
        Ok(Some(text.as_str().unwrap_or_default().to_string()))
    }

    async fn is_visible(&mut self, selector: &str) -> Result<bool> {
        let Some(element) = self.find_all(selector).await?.into_iter().next() else {
            return Ok(false);
        };
        let displayed = self.get(&format!("element/{}/displayed", element)).await?;
        Ok(displayed.as_bool().unwrap_or(false))
    }

    async fn url(&mut self) -> Result<String> {
        let url = self.get("url").await?;
        Ok(url.as_str().unwrap_or_default().to_string())
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        Ok(self.find_all(selector).await?.len())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.command(Method::DELETE, "", Value::Null).await?;
        Ok(())
    }
}

/// Extract `value` from a WebDriver response, mapping error payloads
async fn unwrap_payload(command: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let mut payload: Value = response
        .json()
        .await
        .map_err(|e| Error::webdriver(command, format!("invalid response: {}", e)))?;
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or_default();
    Err(Error::webdriver(command, format!("{}: {}", error, message)))
}

/// W3C `browserName` for a flavor, if it maps to a known browser
fn browser_name(flavor: &str) -> Option<&'static str> {
    match flavor {
        "chromium" | "chrome" => Some("chrome"),
        "firefox" => Some("firefox"),
        "edge" => Some("MicrosoftEdge"),
        "safari" | "webkit" => Some("safari"),
        _ => None,
    }
}

/// Build `alwaysMatch` capabilities; configured entries take precedence
fn capabilities(flavor: &str, browser: &BrowserConfig, options: &ContextOptions) -> Value {
    let mut caps = browser.capabilities.clone();

    if let Some(name) = browser_name(flavor) {
        caps.entry("browserName")
            .or_insert_with(|| Value::String(name.to_string()));
    }
    caps.entry("pageLoadStrategy")
        .or_insert_with(|| Value::String("normal".to_string()));

    if let Some(agent) = &options.user_agent {
        match browser_name(flavor) {
            Some("chrome") | Some("MicrosoftEdge") => {
                let key = if flavor == "edge" {
                    "ms:edgeOptions"
                } else {
                    "goog:chromeOptions"
                };
                caps.entry(key).or_insert_with(|| {
                    json!({ "args": [format!("--user-agent={}", agent)] })
                });
            }
            Some("firefox") => {
                caps.entry("moz:firefoxOptions").or_insert_with(|| {
                    json!({ "prefs": { "general.useragent.override": agent } })
                });
            }
            _ => tracing::warn!("User agent override is not supported for {}", flavor),
        }
    }

    Value::Object(caps)
}

fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

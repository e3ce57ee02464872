//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::WaitUntil;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Browser engine configurations, keyed by flavor name
    #[serde(default)]
    pub browsers: HashMap<String, BrowserConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Retry settings for request steps
    #[serde(default)]
    pub retry: RetryConfig,

    /// Load test settings
    #[serde(default)]
    pub load: LoadConfig,
}

/// Configuration for one browser flavor
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BrowserConfig {
    /// URL of an already running WebDriver server
    pub webdriver_url: Option<String>,

    /// Driver executable to spawn when no URL is given
    pub driver: Option<PathBuf>,

    /// Additional arguments to pass to the driver
    #[serde(default)]
    pub args: Vec<String>,

    /// Port the spawned driver listens on
    pub port: Option<u16>,

    /// Extra capabilities merged into `alwaysMatch`
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

/// Default settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Defaults {
    /// Browser flavors to run UI tests on
    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,

    /// Navigation wait condition when a step does not name one
    #[serde(default)]
    pub wait_until: WaitUntil,

    /// Upper bound on concurrently running pairings (unbounded if unset)
    pub max_parallel: Option<usize>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            browsers: default_browsers(),
            wait_until: WaitUntil::default(),
            max_parallel: None,
        }
    }
}

fn default_browsers() -> Vec<String> {
    vec!["chromium".to_string()]
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Timeouts {
    /// Timeout for page navigation
    #[serde(default = "default_navigation")]
    pub navigation_ms: u64,

    /// Timeout for waiting on a selector
    #[serde(default = "default_selector")]
    pub selector_ms: u64,

    /// Timeout for a single HTTP request attempt
    #[serde(default = "default_request")]
    pub request_ms: u64,

    /// Ceiling for one whole test execution
    #[serde(default = "default_test")]
    pub test_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: default_navigation(),
            selector_ms: default_selector(),
            request_ms: default_request(),
            test_ms: default_test(),
        }
    }
}

fn default_navigation() -> u64 {
    30_000
}
fn default_selector() -> u64 {
    10_000
}
fn default_request() -> u64 {
    30_000
}
fn default_test() -> u64 {
    300_000
}

/// Retry settings for request steps
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Base of the exponential delay schedule
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1_000
}

/// Load test settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoadConfig {
    /// Pause between two requests of the same worker
    #[serde(default = "default_inter_request_delay")]
    pub inter_request_delay_ms: u64,

    /// Default number of workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Default run window
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Default ramp-up window
    #[serde(default = "default_ramp_up")]
    pub ramp_up_secs: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            inter_request_delay_ms: default_inter_request_delay(),
            concurrency: default_concurrency(),
            duration_secs: default_duration(),
            ramp_up_secs: default_ramp_up(),
        }
    }
}

fn default_inter_request_delay() -> u64 {
    100
}
fn default_concurrency() -> usize {
    10
}
fn default_duration() -> u64 {
    60
}
fn default_ramp_up() -> u64 {
    10
}

/// Driver binaries that are looked up on PATH for well-known flavors
const KNOWN_DRIVERS: &[(&str, &str)] = &[
    ("chromium", "chromedriver"),
    ("chrome", "chromedriver"),
    ("firefox", "geckodriver"),
    ("edge", "msedgedriver"),
    ("safari", "safaridriver"),
];

impl Config {
    /// Load configuration from an explicit path, or the default config file
    ///
    /// Returns default configuration if no file exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => config_path().filter(|path| path.exists()),
        };

        match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| super::Error::Internal(format!("Failed to render configuration: {}", e)))
    }

    /// Get browser configuration by flavor name
    ///
    /// Falls back to searching PATH for a known driver if not explicitly configured
    pub fn get_browser(&self, flavor: &str) -> Option<BrowserConfig> {
        if let Some(config) = self.browsers.get(flavor) {
            return Some(config.clone());
        }

        let binary = KNOWN_DRIVERS
            .iter()
            .find(|(name, _)| *name == flavor)
            .map(|(_, binary)| *binary)?;

        which::which(binary).ok().map(|path| BrowserConfig {
            driver: Some(path),
            ..BrowserConfig::default()
        })
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.navigation_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.selector_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.test_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.timeouts.navigation_ms, 30_000);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.defaults.browsers, vec!["chromium".to_string()]);
        assert_eq!(config.defaults.wait_until, WaitUntil::NetworkIdle);
    }

    #[test]
    fn test_parse_browsers_and_overrides() {
        let config = Config::from_toml(
            r#"
[browsers.firefox]
webdriver_url = "http://localhost:4444"

[browsers.chromium]
driver = "/usr/bin/chromedriver"
args = ["--verbose"]
port = 9600

[timeouts]
selector_ms = 2500

[retry]
attempts = 5
base_delay_ms = 20

[defaults]
browsers = ["chromium", "firefox"]
wait_until = "load"
max_parallel = 4
"#,
        )
        .unwrap();

        let firefox = config.get_browser("firefox").unwrap();
        assert_eq!(firefox.webdriver_url.as_deref(), Some("http://localhost:4444"));
        let chromium = config.get_browser("chromium").unwrap();
        assert_eq!(chromium.port, Some(9600));
        assert_eq!(chromium.args, vec!["--verbose".to_string()]);
        assert_eq!(config.selector_timeout(), Duration::from_millis(2500));
        assert_eq!(config.timeouts.navigation_ms, 30_000);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.defaults.wait_until, WaitUntil::Load);
        assert_eq!(config.defaults.max_parallel, Some(4));
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let mut config = Config::default();
        config.retry.attempts = 7;
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("attempts = 7"));
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.retry.attempts, 7);
        assert_eq!(parsed.defaults.wait_until, WaitUntil::NetworkIdle);
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let err = Config::from_toml("[timeouts]\nnavigation_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[load]\nconcurrency = 3\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.load.concurrency, 3);
        assert_eq!(config.load.inter_request_delay_ms, 100);
    }
}

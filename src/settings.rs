//! Console settings.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `inventory-hub.toml` (or the file named by `INVENTORY_HUB_CONFIG`), then
//! `INVENTORY_HUB__SECTION__KEY` environment variables. `INVENTORY_HUB_API_BASE`
//! and the frontend-compatible `API_BASE` override the API base URL.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Default ring-buffer capacity for the request log.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    /// Request timeout in seconds. `0` means no timeout.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub capture_requests: bool,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    pub default_supplier: Option<String>,
    pub default_shop: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub diagnostics: DiagnosticsSettings,
    pub logging: LoggingSettings,
    pub console: ConsoleSettings,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            capture_requests: true,
            capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file_name =
            env::var("INVENTORY_HUB_CONFIG").unwrap_or_else(|_| "inventory-hub".to_string());
        let api_base_override = env::var("INVENTORY_HUB_API_BASE")
            .or_else(|_| env::var("API_BASE"))
            .ok()
            .filter(|v| !v.trim().is_empty());

        let config = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name(&file_name).required(false))
            .add_source(
                Environment::with_prefix("INVENTORY_HUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("api.base_url", api_base_override)?
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.api.base_url = normalize_api_base(&settings.api.base_url);
        if settings.diagnostics.capacity == 0 {
            settings.diagnostics.capacity = DEFAULT_DIAGNOSTICS_CAPACITY;
        }
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.api.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Normalise the API base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_api_base(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return DEFAULT_API_BASE.to_string();
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn normalize_adds_http_for_localhost() {
        assert_eq!(normalize_api_base("localhost:8000/"), "http://localhost:8000");
        assert_eq!(normalize_api_base("127.0.0.1:9000"), "http://127.0.0.1:9000");
    }

    #[test]
    fn normalize_adds_https_for_remote_hosts() {
        assert_eq!(
            normalize_api_base("hub.example.sk///"),
            "https://hub.example.sk"
        );
    }

    #[test]
    fn normalize_keeps_path_prefix() {
        assert_eq!(
            normalize_api_base(" https://hub.example.sk/api/ "),
            "https://hub.example.sk/api"
        );
    }

    #[test]
    fn normalize_empty_falls_back_to_default() {
        assert_eq!(normalize_api_base("   "), DEFAULT_API_BASE);
    }

    #[test]
    fn zero_timeout_disables_request_timeout() {
        let mut settings = Settings::default();
        assert_eq!(settings.request_timeout(), Some(Duration::from_secs(30)));
        settings.api.timeout_secs = 0;
        assert_eq!(settings.request_timeout(), None);
    }

    const LAYER_VARS: &[&str] = &[
        "INVENTORY_HUB_CONFIG",
        "INVENTORY_HUB_API_BASE",
        "API_BASE",
        "INVENTORY_HUB__API__TIMEOUT_SECS",
    ];

    fn clear_layer_vars() {
        for name in LAYER_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn load_layers_file_then_env_then_api_base() {
        clear_layer_vars();
        let dir = env::temp_dir().join(format!("hub_settings_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("inventory-hub.toml");
        std::fs::write(
            &file,
            "[api]\nbase_url = \"https://file.example.sk\"\ntimeout_secs = 5\n\n\
             [logging]\nlevel = \"warn\"\n\n[console]\ndefault_shop = \"shop-ba\"\n",
        )
        .unwrap();

        env::set_var("INVENTORY_HUB_CONFIG", &file);
        let from_file = Settings::load().unwrap();
        assert_eq!(from_file.api.base_url, "https://file.example.sk");
        assert_eq!(from_file.api.timeout_secs, 5);
        assert_eq!(from_file.logging.level, "warn");
        assert_eq!(from_file.console.default_shop.as_deref(), Some("shop-ba"));
        assert_eq!(from_file.diagnostics.capacity, DEFAULT_DIAGNOSTICS_CAPACITY);

        env::set_var("INVENTORY_HUB__API__TIMEOUT_SECS", "12");
        env::set_var("API_BASE", "localhost:9000/");
        let merged = Settings::load();
        clear_layer_vars();
        let _ = std::fs::remove_dir_all(&dir);

        let merged = merged.unwrap();
        assert_eq!(merged.api.timeout_secs, 12);
        assert_eq!(merged.api.base_url, "http://localhost:9000");
        assert_eq!(merged.logging.level, "warn");
        assert_eq!(merged.console.default_shop.as_deref(), Some("shop-ba"));
    }

    #[test]
    #[serial]
    fn load_without_file_or_env_uses_defaults() {
        clear_layer_vars();
        env::set_var("INVENTORY_HUB_CONFIG", "inventory-hub-missing-settings");
        let settings = Settings::load();
        clear_layer_vars();

        let settings = settings.unwrap();
        assert_eq!(settings.api.base_url, DEFAULT_API_BASE);
        assert_eq!(settings.request_timeout(), Some(Duration::from_secs(30)));
        assert!(settings.diagnostics.capture_requests);
        assert!(settings.logging.dir.is_none());
    }
}

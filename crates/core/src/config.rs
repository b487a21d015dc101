use serde::Deserialize;
use std::time::Duration;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_RELAY__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Timeouts and defaults for campaign runners.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Extra wait granted when login needs an out-of-band step such as
    /// scanning a login code.
    #[serde(default = "default_manual_auth_timeout_secs")]
    pub manual_auth_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_delay_secs")]
    pub default_delay_secs: u64,
    /// How long a restart waits for the previous runner to unwind.
    #[serde(default = "default_stop_join_timeout_ms")]
    pub stop_join_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_whatsapp_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_whatsapp_api_version")]
    pub api_version: String,
    /// Used when credentials carry only a bearer token.
    #[serde(default)]
    pub default_phone_number_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default functions
fn default_node_id() -> String {
    "relay-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_auth_timeout_secs() -> u64 {
    60
}
fn default_manual_auth_timeout_secs() -> u64 {
    120
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_delay_secs() -> u64 {
    5
}
fn default_stop_join_timeout_ms() -> u64 {
    2000
}
fn default_whatsapp_base_url() -> String {
    "https://graph.facebook.com".to_string()
}
fn default_whatsapp_api_version() -> String {
    "v19.0".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: default_auth_timeout_secs(),
            manual_auth_timeout_secs: default_manual_auth_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            default_delay_secs: default_delay_secs(),
            stop_join_timeout_ms: default_stop_join_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn manual_auth_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_auth_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_secs(self.default_delay_secs)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_whatsapp_base_url(),
            api_version: default_whatsapp_api_version(),
            default_phone_number_id: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            dispatch: DispatchConfig::default(),
            whatsapp: WhatsAppConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    /// Environment values override the file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.dispatch.auth_timeout(), Duration::from_secs(60));
        assert_eq!(config.dispatch.manual_auth_timeout(), Duration::from_secs(120));
        assert_eq!(config.dispatch.default_delay(), Duration::from_secs(5));
        assert_eq!(config.dispatch.stop_join_timeout(), Duration::from_millis(2000));
        assert!(config.whatsapp.default_phone_number_id.is_none());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = config::Config::builder()
            .set_override("dispatch.send_timeout_secs", 10)
            .unwrap()
            .set_override("api.http_port", 9000)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.dispatch.send_timeout(), Duration::from_secs(10));
        assert_eq!(config.dispatch.auth_timeout_secs, 60);
        assert_eq!(config.api.http_port, 9000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.node_id, "relay-01");
    }
}

//! Configuration file for the client harnesses
//!
//! A TOML file with `[broker]`, `[session]`, `[will]` and `[reconnect]`
//! sections. Credentials may be given inline or through `*_env` fields naming
//! environment variables, which are resolved when the file is loaded.

use crate::protocol::QoS;
use crate::transport::mqtt::connection::{
    parse_broker_url, resolve_client_id, ConnectOptions, ReconnectConfig,
};
use crate::transport::mqtt::HealthMonitor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Client configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    pub will: Option<WillSection>,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// `mqtt://host[:port]`; port defaults to 1883
    pub url: String,
    /// 1-23 characters; generated when absent
    pub client_id: Option<String>,
}

/// Session section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    pub user: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing the user name
    pub user_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    #[serde(default)]
    pub clean_session: bool,
    /// 0 disables keep-alive
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    /// Concurrent dispatch tasks; 0 dispatches in arrival order
    #[serde(default)]
    pub dispatch_workers: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            user_env: None,
            password_env: None,
            clean_session: false,
            keep_alive_secs: default_keep_alive_secs(),
            dispatch_workers: 0,
        }
    }
}

/// Last will and testament
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WillSection {
    pub topic: String,
    /// Defaults to `"<client id> is offline"`
    pub message: Option<String>,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

/// Reconnect backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_interval_inc_secs")]
    pub interval_inc_secs: u64,
    #[serde(default = "default_interval_max_secs")]
    pub interval_max_secs: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            interval_inc_secs: default_interval_inc_secs(),
            interval_max_secs: default_interval_max_secs(),
        }
    }
}

fn default_keep_alive_secs() -> u16 {
    60
}

fn default_interval_inc_secs() -> u64 {
    3
}

fn default_interval_max_secs() -> u64 {
    120
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from TOML file with environment variable resolution
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse, validate and resolve a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        config.resolve_env_vars()?;
        Ok(config)
    }

    /// Minimal configuration for `broker_url`
    pub fn for_broker(broker_url: &str) -> Self {
        Self {
            broker: BrokerSection {
                url: broker_url.to_string(),
                client_id: None,
            },
            session: SessionSection::default(),
            will: None,
            reconnect: ReconnectSection::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker.url)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if let Some(client_id) = &self.broker.client_id {
            resolve_client_id(Some(client_id))
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        }

        if let Some(will) = &self.will {
            QoS::try_from(will.qos).map_err(|_| {
                ConfigError::InvalidConfig(format!("will qos must be 0, 1 or 2, got {}", will.qos))
            })?;
            if will.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "will topic cannot be empty".to_string(),
                ));
            }
        }

        HealthMonitor::validate_reconnect_config(&self.reconnect_config())
            .map_err(ConfigError::InvalidConfig)
    }

    /// Replace `*_env` references with their values
    fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(name) = &self.session.user_env {
            self.session.user = Some(Self::get_env_var_required(name)?);
        }
        if let Some(name) = &self.session.password_env {
            self.session.password = Some(Self::get_env_var_required(name)?);
        }
        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from_secs(
            self.reconnect.interval_inc_secs,
            self.reconnect.interval_max_secs,
        )
    }

    /// Options for [`crate::transport::mqtt::MqttClient::connect`]
    pub fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions {
            user: self.session.user.clone(),
            password: self.session.password.clone(),
            clean_session: self.session.clean_session,
            keep_alive_secs: self.session.keep_alive_secs,
            reconnect: self.reconnect_config(),
            dispatch_workers: self.session.dispatch_workers,
            ..ConnectOptions::default()
        };

        if let Some(will) = &self.will {
            options.lwt_topic = Some(will.topic.clone());
            options.lwt_msg = will.message.clone();
            options.lwt_qos = QoS::try_from(will.qos).unwrap_or_default();
            options.lwt_retain = will.retain;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_full_config() {
        let config = ClientConfig::from_toml(
            r#"
[broker]
url = "mqtt://broker.local:1884"
client_id = "sensor-7"

[session]
user = "alice"
password = "secret"
clean_session = true
keep_alive_secs = 30

[will]
topic = "status/sensor-7"
qos = 1
retain = true

[reconnect]
interval_inc_secs = 2
interval_max_secs = 20
"#,
        )
        .unwrap();

        assert_eq!(config.broker.client_id.as_deref(), Some("sensor-7"));
        let options = config.connect_options();
        assert_eq!(options.user.as_deref(), Some("alice"));
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert!(options.clean_session);
        assert_eq!(options.keep_alive_secs, 30);
        assert_eq!(options.lwt_topic.as_deref(), Some("status/sensor-7"));
        assert_eq!(options.lwt_msg, None);
        assert_eq!(options.lwt_qos, QoS::AtLeastOnce);
        assert!(options.lwt_retain);
        assert_eq!(options.reconnect.interval_inc, Duration::from_secs(2));
        assert_eq!(options.reconnect.interval_max, Duration::from_secs(20));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ClientConfig::from_toml(
            r#"
[broker]
url = "mqtt://localhost"
"#,
        )
        .unwrap();

        assert_eq!(config, ClientConfig::for_broker("mqtt://localhost"));
        let options = config.connect_options();
        assert_eq!(options, ConnectOptions::default());
    }

    #[test]
    fn test_invalid_broker_url() {
        let result = ClientConfig::from_toml(
            r#"
[broker]
url = "http://localhost"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_client_id() {
        let result = ClientConfig::from_toml(
            r#"
[broker]
url = "mqtt://localhost"
client_id = "this-client-id-is-far-too-long"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_will_qos() {
        let result = ClientConfig::from_toml(
            r#"
[broker]
url = "mqtt://localhost"

[will]
topic = "status"
qos = 3
"#,
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("will qos"));
    }

    #[test]
    fn test_reconnect_max_below_increment() {
        let result = ClientConfig::from_toml(
            r#"
[broker]
url = "mqtt://localhost"

[reconnect]
interval_inc_secs = 10
interval_max_secs = 5
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_env_var() {
        let result = ClientConfig::from_toml(
            r#"
[broker]
url = "mqtt://localhost"

[session]
user_env = "MQTTV3_CONFIG_TEST_SURELY_UNSET"
"#,
        );
        match result {
            Err(ConfigError::EnvVarNotFound(name)) => {
                assert_eq!(name, "MQTTV3_CONFIG_TEST_SURELY_UNSET")
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            ClientConfig::from_toml("[broker\nurl = 1"),
            Err(ConfigError::TomlParse(_))
        ));
    }
}

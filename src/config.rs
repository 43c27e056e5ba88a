//! Client configuration
//!
//! Loaded from TOML. Every section is optional; omitted values fall back to
//! the defaults below. Credentials are never stored in the file, only the
//! names of the environment variables holding them.

use crate::broker::BrokerInfo;
use crate::client::backoff::ReconnectPolicy;
use crate::pool::AdmissionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Hard upper bound for both queue capacities
pub const MAX_MSG_QUEUE_SIZE: usize = 2048;

/// Shortest keep-alive accepted
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Main client configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub admission: AdmissionPolicy,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub last_will: Option<LastWillConfig>,
    #[serde(default)]
    pub brokers: Vec<BrokerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Unique client identifier; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Message pool capacity
    #[serde(default = "default_msg_queue_capacity")]
    pub msg_queue_capacity: usize,
    /// Maximum number of in-flight publishes
    #[serde(default = "default_parallel_msg_capacity")]
    pub parallel_msg_capacity: usize,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_session_expiry_secs")]
    pub session_expiry_secs: u32,
    #[serde(default)]
    pub max_packet_size: Option<u32>,
    /// Environment variable holding the MQTT username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable holding the MQTT password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_msg_queue_capacity() -> usize {
    256
}

fn default_parallel_msg_capacity() -> usize {
    20
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_session_expiry_secs() -> u32 {
    600
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            id: None,
            msg_queue_capacity: default_msg_queue_capacity(),
            parallel_msg_capacity: default_parallel_msg_capacity(),
            keep_alive_secs: default_keep_alive_secs(),
            session_expiry_secs: default_session_expiry_secs(),
            max_packet_size: None,
            username_env: None,
            password_env: None,
        }
    }
}

/// Last-will message published by the broker when the session ends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastWillConfig {
    pub topic: String,
    #[serde(default)]
    pub user_properties: BTreeMap<String, String>,
}

/// Statically configured broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerEntry {
    pub url: String,
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
    #[error("Invalid {name} {value}: must be between 1 and {max}", max = MAX_MSG_QUEUE_SIZE)]
    InvalidCapacity { name: &'static str, value: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_capacity("msg_queue_capacity", self.client.msg_queue_capacity)?;
        validate_capacity("parallel_msg_capacity", self.client.parallel_msg_capacity)?;

        if self.client.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }
        if let Some(id) = &self.client.id {
            if id.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "client id cannot be empty".to_string(),
                ));
            }
        }
        if let Some(will) = &self.last_will {
            crate::topic::validate_publish_topic(&will.topic).map_err(|e| {
                ConfigError::InvalidConfig(format!("last_will topic '{}': {e}", will.topic))
            })?;
        }

        self.admission.validate().map_err(ConfigError::InvalidConfig)?;
        self.reconnect.validate().map_err(ConfigError::InvalidConfig)?;
        self.static_brokers()?;
        Ok(())
    }

    /// Configured client id, or a freshly generated unique one
    pub fn resolve_client_id(&self) -> String {
        match &self.client.id {
            Some(id) => id.clone(),
            None => format!("earpm-{}", Uuid::new_v4()),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.client.keep_alive_secs)
    }

    /// Brokers listed in the `[[brokers]]` section
    pub fn static_brokers(&self) -> Result<Vec<BrokerInfo>, ConfigError> {
        self.brokers
            .iter()
            .map(|entry| BrokerInfo::from_url(&entry.url).map_err(ConfigError::InvalidConfig))
            .collect()
    }

    /// Username and password resolved from the configured environment variables.
    ///
    /// No credentials when no username variable is configured. A configured
    /// but unset variable is an error.
    pub fn credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let Some(username_env) = &self.client.username_env else {
            return Ok(None);
        };
        let username = get_env_var_required(username_env)?;
        let password = match &self.client.password_env {
            Some(password_env) => get_env_var_required(password_env)?,
            None => String::new(),
        };
        Ok(Some((username, password)))
    }
}

fn validate_capacity(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_MSG_QUEUE_SIZE {
        return Err(ConfigError::InvalidCapacity { name, value });
    }
    Ok(())
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

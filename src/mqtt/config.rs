//! Broker connection, subscription set and reconnect policy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Broker, subscription set and retry policy consumed by the dispatcher
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    /// Topic filters subscribed on every (re)connect, in this order
    pub subscriptions: Vec<String>,
    /// Fixed wait between a lost connection and the next attempt
    pub reconnect_interval_ms: u64,
    pub connection: BrokerSettings,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            subscriptions: vec!["tasmota/discovery/+/+".to_owned(), "tele/+/+".to_owned()],
            reconnect_interval_ms: 5000,
            connection: BrokerSettings::default(),
        }
    }
}

impl MqttConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Rejects configurations the dispatcher cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.subscriptions.is_empty() {
            return Err(ConfigError::NoSubscriptions);
        }
        if let Some(index) = self
            .subscriptions
            .iter()
            .position(|pattern| pattern.trim().is_empty())
        {
            return Err(ConfigError::EmptyPattern(index));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ConfigError::ZeroReconnectInterval);
        }
        Ok(())
    }
}

/// Where and how to reach the broker
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub credentials: Option<Credentials>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1883,
            client_id: "tasmota-dash".to_owned(),
            keep_alive_secs: 60,
            credentials: None,
        }
    }
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl fmt::Display for BrokerSettings {
    /// `user@host:port`; the password never appears in logs.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.credentials {
            Some(credentials) => write!(f, "{}@{}:{}", credentials.user, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

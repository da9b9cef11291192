use std::time::Duration;

use serde::Deserialize;

use crate::broker::BrokerOptions;
use crate::client::DEFAULT_QUEUE_CAPACITY;

/// Top-level configuration settings for the application.
///
/// Includes settings for the server, the broker and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the address the WebSocket listener binds to, how many clients it
/// accepts at once and how long shutdown waits for delivery tasks to drain.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub shutdown_grace_ms: u64,
}

/// Configuration settings for the broker.
///
/// `queue_capacity` is the depth of each client queue; `publish_timeout_ms`
/// bounds how long one subscriber may hold up a publish (unset = forever).
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub queue_capacity: usize,
    pub publish_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_connections: Option<usize>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub queue_capacity: Option<usize>,
    pub publish_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Settings {
    /// Delivery options for a broker built from these settings.
    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            publish_timeout: self.broker.publish_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_grace_ms)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3939,
                max_connections: 1000,
                shutdown_grace_ms: 5000,
            },
            broker: BrokerSettings {
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                publish_timeout_ms: None,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let broker = self.broker;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
                max_connections: server
                    .as_ref()
                    .and_then(|s| s.max_connections)
                    .unwrap_or(default.server.max_connections),
                shutdown_grace_ms: server
                    .as_ref()
                    .and_then(|s| s.shutdown_grace_ms)
                    .unwrap_or(default.server.shutdown_grace_ms),
            },
            broker: BrokerSettings {
                queue_capacity: broker
                    .as_ref()
                    .and_then(|b| b.queue_capacity)
                    .unwrap_or(default.broker.queue_capacity),
                publish_timeout_ms: broker
                    .as_ref()
                    .and_then(|b| b.publish_timeout_ms)
                    .or(default.broker.publish_timeout_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}

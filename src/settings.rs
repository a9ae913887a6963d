use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub upstream: Upstream,
    #[serde(default)]
    pub datastore: Datastore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateStrategy {
    #[default]
    Polling,
    Streaming,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Upstream {
    /// Sent as `Authorization: ApiKey <key>` on every upstream request
    #[serde(default)]
    pub api_key: String,
    pub api_endpoint: String,
    pub streaming_endpoint: String,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    /// Seconds between full snapshot polls (POLLING only)
    pub polling_frequency: u64,
    #[serde(default)]
    pub reconnect: Reconnect,
}

// api_key stays out of logs
impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("api_key", &"<redacted>")
            .field("api_endpoint", &self.api_endpoint)
            .field("streaming_endpoint", &self.streaming_endpoint)
            .field("update_strategy", &self.update_strategy)
            .field("polling_frequency", &self.polling_frequency)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Exponential backoff applied when the event stream drops (STREAMING only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Reconnect {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Datastore {
    #[serde(default)]
    pub kind: DatastoreKind,
    #[serde(default)]
    pub redis: Redis,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Redis {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: u8,
}

impl fmt::Debug for Redis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redis")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: "https://api.warrant.dev".to_string(),
            streaming_endpoint: "https://stream.warrant.dev/v1".to_string(),
            update_strategy: UpdateStrategy::Polling,
            polling_frequency: 10,
            reconnect: Reconnect::default(),
        }
    }
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            multiplier: 1.5,
            jitter: true,
        }
    }
}

impl Default for Redis {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 6379,
            username: "default".to_string(),
            password: None,
            database: 1,
        }
    }
}

impl Reconnect {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Redis {
    /// Connections with a password go over TLS.
    pub fn connection_url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "rediss://{}:{}@{}:{}/{}",
                self.username, password, self.hostname, self.port, self.database
            ),
            None => format!("redis://{}:{}/{}", self.hostname, self.port, self.database),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let upstream = Upstream::default();
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default("upstream.api_endpoint", upstream.api_endpoint)
            .into_diagnostic()?
            .set_default("upstream.streaming_endpoint", upstream.streaming_endpoint)
            .into_diagnostic()?
            .set_default("upstream.polling_frequency", upstream.polling_frequency)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: EDGE__UPSTREAM__API_KEY=..., EDGE__DATASTORE__KIND=redis, etc.
        builder = builder.add_source(config::Environment::with_prefix("EDGE").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let s: Settings = cfg.try_deserialize().into_diagnostic()?;
        Ok(s)
    }
}

//! Process configuration: defaults, an optional TOML file, then
//! `DISPATCH__`-prefixed environment overrides.
//!
//! `DISPATCH__SERVER__BIND_ADDR=0.0.0.0:9000` overrides `server.bind_addr`,
//! `DISPATCH__DISPATCH__SCHEDULER__TICK_SECS=30` overrides the scheduler tick.

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use dispatch_core::DispatchConfig;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "DISPATCH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub dispatch: DispatchConfig,
}

impl AppConfig {
    /// Layer the optional file and the environment over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

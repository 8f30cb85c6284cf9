// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server configuration module
//!
//! This module provides configuration structures and logic for the server,
//! supporting different environments and validation of configuration parameters.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::{Result, anyhow, ensure};
use config::{
    Config, ConfigBuilder, ConfigError, Environment as ConfigEnv, File, builder::DefaultState,
};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::error::{ServerError, ServerResult};

const DEFAULT_PORT: u16 = 9000;
const DEFAULT_READ_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_WRITE_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 15;
const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_FORCE_TIMEOUT_SECONDS: u64 = 5;
const MAX_TIMEOUT_SECONDS: u64 = 300;

/// A validated server port that ensures the value is appropriate for the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerPort {
    port: u16,
    environment: Environment,
}

impl ServerPort {
    /// Create a new `ServerPort`, ensuring it's valid for the given environment
    ///
    /// # Errors
    ///
    /// Returns an error if the port is 0 in non-testing environments
    pub fn new(port: u16, environment: Environment) -> Result<Self> {
        if port == 0 && environment != Environment::Testing {
            return Err(anyhow!("port cannot be 0 in non-testing environments"));
        }
        Ok(Self { port, environment })
    }

    /// The documented default listening port
    pub const fn default_development() -> Self {
        Self {
            port: DEFAULT_PORT,
            environment: Environment::Development,
        }
    }

    /// Create a safe testing port (port 0)
    pub const fn testing() -> Self {
        Self {
            port: 0,
            environment: Environment::Testing,
        }
    }

    /// Get the port value
    pub fn value(&self) -> u16 {
        self.port
    }
}

impl<'de> Deserialize<'de> for ServerPort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let port = u16::deserialize(deserializer)?;
        // validated against the real environment once loading completes
        Ok(Self {
            port,
            environment: Environment::Development,
        })
    }
}

/// A validated timeout duration in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutSeconds(Duration);

impl TimeoutSeconds {
    /// Create a new `TimeoutSeconds`, ensuring the value is within valid bounds
    ///
    /// # Errors
    ///
    /// Returns an error if timeout is 0 or greater than 300 seconds
    pub fn new(seconds: u64) -> Result<Self> {
        ensure!(seconds != 0, "timeout must be greater than 0");
        ensure!(
            seconds <= MAX_TIMEOUT_SECONDS,
            "timeout cannot exceed {MAX_TIMEOUT_SECONDS}"
        );
        Ok(Self(Duration::from_secs(seconds)))
    }

    /// Build a timeout from a constant that is known to be in range
    const fn from_secs(seconds: u64) -> Self {
        Self(Duration::from_secs(seconds))
    }

    /// Create a safe testing timeout (5 seconds)
    pub const fn testing() -> Self {
        Self::from_secs(5)
    }

    /// Get the timeout value
    pub fn value(&self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for TimeoutSeconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Self::new(seconds).map_err(|e| de::Error::custom(e.to_string()))
    }
}

/// Environment types for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production environment
    Production,
    /// Development environment
    Development,
    /// Testing environment
    Testing,
}

/// How the correlation stage mints identifiers for requests that arrive without one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestIdFormat {
    /// Random UUID v4
    #[default]
    Uuid,
    /// Nanoseconds since the Unix epoch, strictly increasing within the process
    Timestamp,
}

/// Server configuration for different environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    pub host: IpAddr,
    /// Server port (validated for environment compatibility)
    pub port: ServerPort,
    /// Maximum time to receive the headers of a request
    pub read_timeout_seconds: TimeoutSeconds,
    /// Maximum time to produce a response once the request has been read
    pub write_timeout_seconds: TimeoutSeconds,
    /// Maximum time a keep-alive connection may sit without a request in flight
    pub idle_timeout_seconds: TimeoutSeconds,
    /// Drain deadline once shutdown begins
    pub shutdown_timeout_seconds: TimeoutSeconds,
    /// Time allowed for force-closed connections to release their resources
    pub force_timeout_seconds: TimeoutSeconds,
    /// Correlation identifier generator
    #[serde(default)]
    pub request_id: RequestIdFormat,
    /// Environment type
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: ServerPort::default_development(),
            read_timeout_seconds: TimeoutSeconds::from_secs(DEFAULT_READ_TIMEOUT_SECONDS),
            write_timeout_seconds: TimeoutSeconds::from_secs(DEFAULT_WRITE_TIMEOUT_SECONDS),
            idle_timeout_seconds: TimeoutSeconds::from_secs(DEFAULT_IDLE_TIMEOUT_SECONDS),
            shutdown_timeout_seconds: TimeoutSeconds::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
            force_timeout_seconds: TimeoutSeconds::from_secs(DEFAULT_FORCE_TIMEOUT_SECONDS),
            request_id: RequestIdFormat::default(),
            environment: Environment::Development,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables and optional configuration files
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if configuration is invalid or cannot be loaded.
    pub fn from_env() -> ServerResult<Self> {
        Self::load().map_err(|e| ServerError::Config {
            message: format!("failed to load configuration: {e}"),
        })
    }

    /// Load configuration using the config crate with hierarchical sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. Configuration file (config.json)
    /// 3. Environment-specific files (config.{env}.json)
    /// 4. Environment variables with `SERVER_` prefix (`__` separates nested keys)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let env_var = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut config_builder = Self::defaults()?
            .add_source(File::with_name("config.json").required(false))
            .add_source(
                File::with_name(&format!("config.{}.json", env_var.to_lowercase())).required(false),
            )
            .add_source(
                ConfigEnv::with_prefix("SERVER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if std::env::var("ENVIRONMENT").is_ok() {
            config_builder = config_builder.set_override("environment", env_var.to_lowercase())?;
        }

        Self::finish(config_builder.build()?)
    }

    /// Load configuration from defaults overlaid with a single required file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or holds invalid values.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::defaults()?.add_source(File::from(path)).build()?;
        Self::finish(config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", i64::from(DEFAULT_PORT))?
            .set_default("read_timeout_seconds", DEFAULT_READ_TIMEOUT_SECONDS)?
            .set_default("write_timeout_seconds", DEFAULT_WRITE_TIMEOUT_SECONDS)?
            .set_default("idle_timeout_seconds", DEFAULT_IDLE_TIMEOUT_SECONDS)?
            .set_default("shutdown_timeout_seconds", DEFAULT_SHUTDOWN_TIMEOUT_SECONDS)?
            .set_default("force_timeout_seconds", DEFAULT_FORCE_TIMEOUT_SECONDS)?
            .set_default("request_id", "uuid")?
            .set_default("environment", "development")
    }

    fn finish(config: Config) -> Result<Self, ConfigError> {
        let mut server_config: Self = config.try_deserialize()?;

        // Fix the ServerPort to have the correct environment context
        server_config.port = ServerPort::new(server_config.port.value(), server_config.environment)
            .map_err(|e| ConfigError::Message(format!("invalid port configuration: {e}")))?;

        Ok(server_config)
    }

    /// Create configuration optimized for testing
    pub fn for_testing() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort::testing(), // let OS choose available port
            read_timeout_seconds: TimeoutSeconds::testing(),
            write_timeout_seconds: TimeoutSeconds::testing(),
            idle_timeout_seconds: TimeoutSeconds::testing(),
            shutdown_timeout_seconds: TimeoutSeconds::testing(),
            force_timeout_seconds: TimeoutSeconds::testing(),
            request_id: RequestIdFormat::Uuid,
            environment: Environment::Testing,
        }
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port.value())
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
        }
    }
}

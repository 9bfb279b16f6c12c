use error::ConfigError;
use hudp::EndpointConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod error;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub reliability: ReliabilityConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub local_address: String,
    pub peer_address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReliabilityConfig {
    pub skip_threshold_ms: u64,
    pub max_buffered: usize,
    pub handshake_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_address: "0.0.0.0:9000".to_string(),
            peer_address: None,
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        let defaults = EndpointConfig::default();
        Self {
            skip_threshold_ms: defaults.skip_threshold.as_millis() as u64,
            max_buffered: defaults.max_buffered,
            handshake_timeout_ms: defaults.handshake_timeout.as_millis() as u64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            reliability: ReliabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.network.local_address).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid local address '{}', expected 'IP:PORT'",
                self.network.local_address
            )));
        }

        if let Some(peer) = &self.network.peer_address {
            if SocketAddr::from_str(peer).is_err() {
                return Err(ConfigError::Validation(format!(
                    "invalid peer address '{peer}', expected 'IP:PORT'"
                )));
            }
        }

        if self.reliability.max_buffered == 0 {
            return Err(ConfigError::Validation(
                "reliability.max_buffered must be greater than 0".to_string(),
            ));
        }

        if self.reliability.skip_threshold_ms == 0 {
            return Err(ConfigError::Validation(
                "reliability.skip_threshold_ms must be greater than 0".to_string(),
            ));
        }

        if self.reliability.handshake_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "reliability.handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from_str(&self.network.local_address)
            .expect("validated during config load")
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.network
            .peer_address
            .as_ref()
            .map(|addr| SocketAddr::from_str(addr).expect("validated during config load"))
    }

    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            skip_threshold: Duration::from_millis(self.reliability.skip_threshold_ms),
            max_buffered: self.reliability.max_buffered,
            handshake_timeout: Duration::from_millis(self.reliability.handshake_timeout_ms),
        }
    }
}

pub fn handle() -> Result<Config, ConfigError> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    if config_path.exists() {
        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    } else {
        let config = Config::default();
        save(&config, &config_path)?;
        Ok(config)
    }
}

fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let config_content = toml::to_string_pretty(config)?;
    let mut file = fs::File::create(path)?;
    file.write_all(config_content.as_bytes())?;
    Ok(())
}

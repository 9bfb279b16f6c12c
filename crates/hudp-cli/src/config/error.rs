use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read or write configuration file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse TOML configuration: {0}")]
    TomlDeserialization(#[from] toml::de::Error),
    #[error("failed to serialize configuration to TOML: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

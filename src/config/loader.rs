use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::validate::{validate, ValidationError};
use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Re-reads the configuration on demand. The supervisor calls this on
/// SIGHUP; a failure keeps the currently loaded config in effect.
pub trait ConfigReloader: Send {
    fn reload(&self) -> Result<Config, ConfigError>;
}

/// YAML file loader. `load` and `reload` go through the same parse/validate
/// path so a reload can never produce a config that startup would reject.
pub struct FileLoader {
    path: PathBuf,
}

impl FileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        validate(&config)?;
        Ok(config)
    }
}

impl ConfigReloader for FileLoader {
    fn reload(&self) -> Result<Config, ConfigError> {
        self.load()
    }
}

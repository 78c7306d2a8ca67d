//! Pool configuration
//!
//! Loaded from a TOML file with `JSONSLAB_*` environment overrides:
//!
//! ```toml
//! initial_capacity = 4096
//! max_capacity = 65536
//! ```

use crate::error::{Error, Result};
use crate::memory::SLOT_SIZE;
use serde::Deserialize;
use std::path::Path;

/// Default arena size in bytes
pub const DEFAULT_CAPACITY: usize = 1024;

/// Sizing of a [`ResourceManager`](crate::memory::ResourceManager)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Arena size in bytes at construction
    pub initial_capacity: usize,
    /// Largest arena `realloc_pool` may create, in bytes
    pub max_capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            max_capacity: None,
        }
    }
}

impl PoolConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, letting `JSONSLAB_INITIAL_CAPACITY` and
    /// `JSONSLAB_MAX_CAPACITY` override it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("JSONSLAB").try_parsing(true))
            .build()
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_capacity {
            if self.initial_capacity > max {
                return Err(Error::Config(format!(
                    "initial_capacity {} exceeds max_capacity {}",
                    self.initial_capacity, max
                )));
            }
            if max < SLOT_SIZE {
                return Err(Error::Config(format!(
                    "max_capacity {} cannot hold a single slot of {} bytes",
                    max, SLOT_SIZE
                )));
            }
        }
        Ok(())
    }
}

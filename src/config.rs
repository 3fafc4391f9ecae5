//! Store configuration

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_PATH: &str = "./data/bitgate.mdb";
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;
pub const DEFAULT_MAX_READERS: u32 = 126;

/// Where and how the LMDB environment is opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub path: PathBuf,
    /// Upper bound on the memory map, in bytes.
    pub map_size: usize,
    pub max_readers: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            path: PathBuf::from(DEFAULT_PATH),
            map_size: DEFAULT_MAP_SIZE,
            max_readers: DEFAULT_MAX_READERS,
        }
    }
}

impl Config {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Config { path: path.into(), ..Config::default() }
    }

    /// Defaults overridden by `BITGATE_DB`, `BITGATE_MAP_SIZE` and `BITGATE_MAX_READERS`.
    pub fn from_env() -> Result<Self> {
        let mut c = Config::default();
        if let Ok(p) = std::env::var("BITGATE_DB") {
            c.path = PathBuf::from(p);
        }
        if let Ok(s) = std::env::var("BITGATE_MAP_SIZE") {
            c.map_size = s
                .parse()
                .map_err(|_| Error::Config(format!("BITGATE_MAP_SIZE '{}' is not a byte count", s)))?;
        }
        if let Ok(s) = std::env::var("BITGATE_MAX_READERS") {
            c.max_readers = s
                .parse()
                .map_err(|_| Error::Config(format!("BITGATE_MAX_READERS '{}' is not a number", s)))?;
        }
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config("empty path".into()));
        }
        if self.map_size == 0 || self.max_readers == 0 {
            return Err(Error::Config("map_size and max_readers must be non-zero".into()));
        }
        Ok(())
    }
}

//! Proxy configuration and data directory management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Paths under the proxy data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g. `.rankrelay/`).
    pub root: PathBuf,
    /// SQLite feedback store (`<root>/rankrelay.db`).
    pub db_file: PathBuf,
    /// Persisted unigram weights (`<root>/unigram.json`).
    pub model_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            db_file: root.join("rankrelay.db"),
            model_file: root.join("unigram.json"),
            root,
        })
    }
}

/// Which ranking model the proxy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Unigram,
    Passthrough,
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unigram" => Ok(ModelKind::Unigram),
            "passthrough" => Ok(ModelKind::Passthrough),
            other => Err(Error::Config(format!("unknown model kind: {other}"))),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Unigram => write!(f, "unigram"),
            ModelKind::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// Which feedback store the proxy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Memory,
}

impl FromStr for DbKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DbKind::Sqlite),
            "memory" => Ok(DbKind::Memory),
            other => Err(Error::Config(format!("unknown db kind: {other}"))),
        }
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbKind::Sqlite => write!(f, "sqlite"),
            DbKind::Memory => write!(f, "memory"),
        }
    }
}

/// Top-level proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the proxy listens on.
    pub host: String,
    pub port: u16,
    /// Upstream search API address.
    pub uhost: String,
    pub uport: u16,
    /// Learning rate for trainable models.
    pub lr: f32,
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Factor applied to the requested result count before asking upstream.
    pub multiplier: usize,
    /// Result field the model ranks by. Unset means every text field.
    pub field: Option<String>,
    pub model: ModelKind,
    pub db: DbKind,
}

impl ProxyConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.uhost, self.uport)
    }

    /// Reject values the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.multiplier == 0 {
            return Err(Error::Config("multiplier must be at least 1".to_string()));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(Error::Config(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        Ok(())
    }
}

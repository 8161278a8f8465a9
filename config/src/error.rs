use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid editor settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid regular expression for `{setting}`: {source}")]
    Pattern {
        setting: &'static str,
        #[source]
        source: regex::Error,
    },
}

impl ConfigError {
    /// File the error originated from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Json(_) | Self::Pattern { .. } => None,
        }
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Failure to read, parse or write one configuration layer.
///
/// During resolution these are recovered by skipping the layer; they only
/// surface to callers of the explicit load/write operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

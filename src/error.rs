// src/error.rs  —  Typed errors at library boundaries
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("writing config file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading call pool file {path:?}")]
    CallPool {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading parks file {path:?}")]
    Parks {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("unknown audio device index {0}")]
    UnknownDevice(usize),
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("reading pattern file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing pattern file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid regex for rule {key}: {source}")]
    Regex {
        key: String,
        #[source]
        source: regex::Error,
    },
}

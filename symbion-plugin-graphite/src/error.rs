//! Erreurs typées du plugin Graphite

use std::time::Duration;

/// Erreurs de transport vers l'instance Carbon
#[derive(Debug, thiserror::Error)]
pub enum CarbonError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed sending to Carbon: {0}")]
    Write(#[source] std::io::Error),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("not connected to Carbon")]
    NotConnected,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Erreurs d'encodage des lots
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload of {0} bytes does not fit a 4-byte length header")]
    PayloadTooLarge(usize),
    #[error("string of {0} bytes is too long to be pickled")]
    StringTooLong(usize),
}

/// Échec de construction du chemin d'une métrique
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("failed to find custom variables for host {0}")]
    UnknownHost(String),
    #[error("failed to find custom variables for service {host}:{service}")]
    UnknownService { host: String, service: String },
    #[error("host {host} has no {field}")]
    MissingHostField { host: String, field: &'static str },
}

/// Erreurs de chargement de la configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

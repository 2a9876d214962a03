//! Error types for the HTTP binding.

use std::net::SocketAddr;

use rpcweave_core::config::ConfigError;
use thiserror::Error;

/// Errors starting or running the HTTP binding.
#[derive(Error, Debug)]
pub enum HttpError {
    /// Listen address does not parse
    #[error("invalid listen address '{addr}': {reason}")]
    InvalidListenAddress { addr: String, reason: String },

    /// Could not bind the listener
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server loop failed
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: HttpError = ConfigError::EmptyConfigFile.into();
        assert!(matches!(err, HttpError::Config(ConfigError::EmptyConfigFile)));
        assert_eq!(err.to_string(), ConfigError::EmptyConfigFile.to_string());
    }
}

//! Streaming Plane Error Types

use thiserror::Error;

/// Errors that can occur in the streaming plane (server, client, discovery)
#[derive(Error, Debug)]
pub enum NetError {
    #[error("failed to bind listener on port {port}: {source}")]
    BindError {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    AcceptError(std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    ConnectError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket write failed: {0}")]
    WriteError(std::io::Error),

    #[error("malformed control message: {0}")]
    MalformedControlMessage(String),

    #[error("service discovery error: {0}")]
    DiscoveryError(String),

    #[error("client is not connected")]
    NotConnected,
}

/// Result type alias for streaming plane operations
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetError::NotConnected;
        assert!(err.to_string().contains("not connected"));

        let err = NetError::MalformedControlMessage("bad json".into());
        assert!(err.to_string().contains("bad json"));
    }
}

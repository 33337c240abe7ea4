//! Client error types.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by sessions, the retry layer and commands.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No correlated response arrived before the attempt's deadline.
    #[error("response timeout after {0:?}")]
    RspTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] nmx_protocol::ProtocolError),

    #[error("session not open")]
    NotOpen,

    #[error("session closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns whether this error is a response timeout, the only error the
    /// retry layer re-attempts.
    pub fn is_rsp_timeout(&self) -> bool {
        matches!(self, ClientError::RspTimeout(_))
    }

    /// Returns whether the underlying transport failed. A caller may reopen
    /// the session and try again at a higher level.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::NotOpen | ClientError::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmx_protocol::ProtocolError;

    #[test]
    fn test_error_classification() {
        assert!(ClientError::RspTimeout(Duration::from_secs(1)).is_rsp_timeout());
        assert!(!ClientError::Closed.is_rsp_timeout());
        assert!(ClientError::Closed.is_transport());
        assert!(ClientError::Io(std::io::Error::other("boom")).is_transport());

        let err = ClientError::from(ProtocolError::NotAMap);
        assert!(!err.is_rsp_timeout());
        assert!(!err.is_transport());
    }
}

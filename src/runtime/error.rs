// ABOUTME: Runtime connection error types with SNAFU pattern.
// ABOUTME: Unifies endpoint, TLS and connectivity failures for programmatic handling.

use snafu::Snafu;

use super::traits::RuntimeInfoError;

/// Failure to reach a provider's engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RuntimeError {
    #[snafu(display("unsupported engine endpoint: {endpoint}"))]
    InvalidEndpoint { endpoint: String },

    #[snafu(display("invalid API version {version}, expected MAJOR.MINOR"))]
    InvalidApiVersion { version: String },

    #[snafu(display("TLS setup failed: {reason}"))]
    Tls { reason: String },

    #[snafu(display("runtime connection failed: {source}"))]
    Connection { source: RuntimeInfoError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Provider configuration names something we cannot connect to.
    InvalidEndpoint,
    /// Certificate material missing or unusable.
    TlsMaterial,
    /// Engine did not answer.
    ConnectionFailed,
    /// Engine answered with an error.
    RuntimeOperation,
}

impl RuntimeError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> RuntimeErrorKind {
        match self {
            RuntimeError::InvalidEndpoint { .. } | RuntimeError::InvalidApiVersion { .. } => {
                RuntimeErrorKind::InvalidEndpoint
            }
            RuntimeError::Tls { .. } => RuntimeErrorKind::TlsMaterial,
            RuntimeError::Connection { source } => match source {
                RuntimeInfoError::ConnectionFailed(_) => RuntimeErrorKind::ConnectionFailed,
                RuntimeInfoError::Runtime(_) => RuntimeErrorKind::RuntimeOperation,
            },
        }
    }

    /// Returns connection error details if this is a connection failure.
    pub fn connection_details(&self) -> Option<&str> {
        match self {
            RuntimeError::Connection {
                source: RuntimeInfoError::ConnectionFailed(msg),
            } => Some(msg),
            _ => None,
        }
    }
}

impl From<RuntimeInfoError> for RuntimeError {
    fn from(source: RuntimeInfoError) -> Self {
        RuntimeError::Connection { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failure_exposes_details() {
        let err = RuntimeError::from(RuntimeInfoError::ConnectionFailed("refused".into()));
        assert_eq!(err.kind(), RuntimeErrorKind::ConnectionFailed);
        assert_eq!(err.connection_details(), Some("refused"));
    }

    #[test]
    fn tls_error_has_its_own_kind() {
        let err = RuntimeError::Tls {
            reason: "missing ca".into(),
        };
        assert_eq!(err.kind(), RuntimeErrorKind::TlsMaterial);
        assert!(err.connection_details().is_none());
    }
}

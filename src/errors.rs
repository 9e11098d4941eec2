use thiserror::Error;

/// Error kind without payload, for matching on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    Connection,
    Send,
    Setup,
    Protocol,
    Timeout,
    Cancelled,
    Teardown,
    Malformed,
    Config,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("Gateway connection error: {0}")]
    ConnectionError(String),
    #[error("Send error: {0}")]
    SendError(String),
    #[error("Setup error: {0}")]
    SetupError(String),
    #[error("Gateway protocol error {code}: {reason}")]
    ProtocolError { code: i64, reason: String },
    #[error("Request {transaction} timed out after {timeout_ms} ms")]
    TimeoutError { transaction: String, timeout_ms: u64 },
    #[error("Request cancelled: connection is shutting down")]
    CancelledError,
    #[error("Teardown error: {0}")]
    TeardownError(String),
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GatewayError {
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::ConnectionError(_) => GatewayErrorKind::Connection,
            GatewayError::SendError(_) => GatewayErrorKind::Send,
            GatewayError::SetupError(_) => GatewayErrorKind::Setup,
            GatewayError::ProtocolError { .. } => GatewayErrorKind::Protocol,
            GatewayError::TimeoutError { .. } => GatewayErrorKind::Timeout,
            GatewayError::CancelledError => GatewayErrorKind::Cancelled,
            GatewayError::TeardownError(_) => GatewayErrorKind::Teardown,
            GatewayError::MalformedMessage(_) => GatewayErrorKind::Malformed,
            GatewayError::ConfigError(_) => GatewayErrorKind::Config,
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Invalid connect string: {0}")]
    ParseError(String),

    #[error("Connection failed: {0}")]
    ConnectError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("NAT error: {0}")]
    NatError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("System error: {0}")]
    SystemError(String),
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::DecodeError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for P2PError {
    fn from(err: tokio::task::JoinError) -> Self {
        P2PError::SystemError(format!("JoinError: {}", err))
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("SAMP Hub connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Unauthorized access. Basic Authentication required or failed.")]
    Unauthorized,

    #[error("Secure transport error: {0}")]
    SecureTransport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Fault {code}: {message}")]
    Fault { code: i32, message: String },

    #[error("Hub not found: {0}")]
    HubNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Not connected to a SAMP Hub")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a fault error, the remote side of an XML-RPC call failing
    pub fn fault(code: i32, message: impl Into<String>) -> Self {
        CoreError::Fault {
            code,
            message: message.into(),
        }
    }
}

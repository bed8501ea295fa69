use thiserror::Error;

/// Errors that can occur in the shield node library
#[derive(Error, Debug)]
pub enum ShieldError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential staging or cloud auth error
    #[error("Credential error: {0}")]
    Credential(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interface counter sampling error
    #[error("Sample error: {0}")]
    Sample(String),

    /// Remote console (RCON) error
    #[error("RCON error: {0}")]
    Rcon(String),

    /// Firewall control plane error
    #[error("Firewall error: {0}")]
    Firewall(String),

    /// Cloud API transport error
    #[error("Cloud API error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid state error
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using ShieldError
pub type Result<T> = std::result::Result<T, ShieldError>;

impl From<String> for ShieldError {
    fn from(s: String) -> Self {
        ShieldError::Other(s)
    }
}

impl From<&str> for ShieldError {
    fn from(s: &str) -> Self {
        ShieldError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for ShieldError {
    fn from(err: serde_json::Error) -> Self {
        ShieldError::Other(format!("serialization error: {err}"))
    }
}

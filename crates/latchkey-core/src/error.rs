//! Error types for the Latchkey core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Decryption failed: wrong passphrase or corrupted data")]
    DecryptionFailed,

    #[error("Invalid sealed blob: {0}")]
    InvalidBlob(String),

    #[error("Invalid export envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

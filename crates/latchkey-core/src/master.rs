//! Master configuration and the export envelope
//!
//! The master configuration holds the OTP provider credentials and the
//! hashed master password. It is only ever persisted inside a sealed blob;
//! this module defines the plaintext document and the portable export
//! envelope wrapped around that blob.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, PasswordHash};
use crate::error::{CoreError, Result};

/// Export envelope format version
pub const EXPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Base URL of the OTP provider
    pub api_endpoint: String,
    /// Bearer token for the provider
    pub api_key: String,
    pub master_password: PasswordHash,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MasterConfig {
    pub fn new(api_endpoint: String, api_key: String, master_password: &str) -> Self {
        let now = Utc::now();
        Self {
            api_endpoint,
            api_key,
            master_password: crypto::hash_password(master_password),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn verify_master_password(&self, candidate: &str) -> bool {
        crypto::verify_password(candidate, &self.master_password)
    }

    /// Replace the provider credentials, keeping the password hash
    pub fn set_credentials(&mut self, api_endpoint: String, api_key: String) {
        self.api_endpoint = api_endpoint;
        self.api_key = api_key;
        self.updated_at = Utc::now();
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_endpoint.trim().is_empty() {
            return Err(CoreError::Validation(
                "API endpoint must not be empty".to_string(),
            ));
        }
        if !self.api_endpoint.starts_with("https://") && !self.api_endpoint.starts_with("http://") {
            return Err(CoreError::Validation(
                "API endpoint must be an http(s) URL".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(CoreError::Validation(
                "API key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Portable wrapper around a sealed master configuration blob
///
/// The `config` field carries the sealed blob verbatim, so an exported file
/// remains bound to the passphrase it was sealed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: String,
    #[serde(rename = "exportDate")]
    pub export_date: DateTime<Utc>,
    pub config: String,
}

impl ExportEnvelope {
    pub fn new(sealed_config: String) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            export_date: Utc::now(),
            config: sealed_config,
        }
    }

    /// Base64-of-JSON transport form
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(BASE64.encode(json))
    }

    /// Parse and shape-check an exported envelope
    pub fn decode(data: &str) -> Result<Self> {
        let json = BASE64
            .decode(data.trim())
            .map_err(|e| CoreError::InvalidEnvelope(format!("Base64 decode failed: {}", e)))?;
        let envelope: Self = serde_json::from_slice(&json)
            .map_err(|e| CoreError::InvalidEnvelope(format!("Envelope parse failed: {}", e)))?;
        if envelope.version.is_empty() {
            return Err(CoreError::InvalidEnvelope("missing version".to_string()));
        }
        if envelope.config.is_empty() {
            return Err(CoreError::InvalidEnvelope(
                "missing sealed configuration".to_string(),
            ));
        }
        Ok(envelope)
    }
}

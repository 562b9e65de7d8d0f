//! JSON/HTTPS client for the OTP delivery provider
//!
//! The provider is a bearer-authenticated REST service: `/send-otp` pushes a
//! code to the user's mobile numbers and returns an opaque reference,
//! `/verify-otp` checks a submitted code against that reference, `/health`
//! answers liveness probes. Credentials come from the master configuration
//! store on every call, so a saved configuration takes effect immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use latchkey_core::OtpRef;

use crate::config::DaemonConfig;
use crate::config_store::MasterConfigStore;
use crate::error::{DaemonError, Result};

/// Seam between the OTP lifecycle and the provider wire protocol
#[async_trait]
pub trait OtpTransport: Send + Sync {
    /// Ask the provider to deliver a code, returning its reference
    async fn send_otp(&self, delivery_id: &str, mobile_numbers: &[String]) -> Result<OtpRef>;

    /// Check a submitted code against an outstanding reference
    async fn verify_otp(&self, delivery_id: &str, otp_ref: &OtpRef, code: &str) -> Result<()>;

    /// Provider liveness probe
    async fn check_health(&self) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SendOtpRequest {
    uuid: String,
    mobile_numbers: Vec<String>,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct SendOtpResponse {
    success: bool,
    /// Some provider versions spell the field `reference`
    #[serde(default, alias = "reference")]
    otp_ref: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyOtpRequest {
    uuid: String,
    otp: String,
    otp_ref: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct VerifyOtpResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Production transport backed by reqwest
pub struct OtpProviderClient {
    http: reqwest::Client,
    master: Arc<MasterConfigStore>,
    provider_timeout: Duration,
    health_timeout: Duration,
}

impl OtpProviderClient {
    pub fn new(master: Arc<MasterConfigStore>, config: &DaemonConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            master,
            provider_timeout: Duration::from_secs(config.provider_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        }
    }

    /// Current endpoint and API key; fails while the master store is locked
    async fn credentials(&self) -> Result<(String, String)> {
        let config = self.master.get().await?;
        Ok((config.api_endpoint, config.api_key))
    }

    fn endpoint_url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    fn timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[async_trait]
impl OtpTransport for OtpProviderClient {
    async fn send_otp(&self, delivery_id: &str, mobile_numbers: &[String]) -> Result<OtpRef> {
        let (endpoint, api_key) = self.credentials().await?;
        let request = SendOtpRequest {
            uuid: delivery_id.to_string(),
            mobile_numbers: mobile_numbers.to_vec(),
            timestamp: Self::timestamp(),
        };

        debug!("Requesting OTP delivery for {}", delivery_id);
        let response = self
            .http
            .post(Self::endpoint_url(&endpoint, "send-otp"))
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(self.provider_timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &detail));
        }

        let reply: SendOtpResponse = response.json().await?;
        if !reply.success {
            return Err(DaemonError::Provider(
                reply
                    .message
                    .unwrap_or_else(|| "provider declined to send".to_string()),
            ));
        }
        let reference = reply.otp_ref.ok_or_else(|| {
            DaemonError::Provider("provider response missing otp_ref".to_string())
        })?;
        Ok(OtpRef::new(reference))
    }

    async fn verify_otp(&self, delivery_id: &str, otp_ref: &OtpRef, code: &str) -> Result<()> {
        let (endpoint, api_key) = self.credentials().await?;
        let request = VerifyOtpRequest {
            uuid: delivery_id.to_string(),
            otp: code.to_string(),
            otp_ref: otp_ref.as_str().to_string(),
            timestamp: Self::timestamp(),
        };

        debug!("Verifying OTP for {}", delivery_id);
        let response = self
            .http
            .post(Self::endpoint_url(&endpoint, "verify-otp"))
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(self.provider_timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &detail));
        }

        // Only an explicit success:false is a rejected code; transport and
        // HTTP failures stay provider errors and never count as an attempt.
        let reply: VerifyOtpResponse = response.json().await?;
        if !reply.success {
            return Err(DaemonError::VerificationFailed(
                reply.message.unwrap_or_else(|| "invalid code".to_string()),
            ));
        }
        Ok(())
    }

    async fn check_health(&self) -> Result<()> {
        let (endpoint, api_key) = self.credentials().await?;

        let response = self
            .http
            .get(Self::endpoint_url(&endpoint, "health"))
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(self.health_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &detail));
        }
        Ok(())
    }
}

fn provider_error(status: reqwest::StatusCode, detail: &str) -> DaemonError {
    let detail = detail.trim();
    if detail.is_empty() {
        DaemonError::Provider(format!("provider returned {}", status))
    } else {
        DaemonError::Provider(format!("provider returned {}: {}", status, detail))
    }
}

/// Scripted in-memory transport for tests
#[cfg(any(test, feature = "test-support"))]
pub struct FakeOtpTransport {
    state: std::sync::Mutex<FakeOtpState>,
}

#[cfg(any(test, feature = "test-support"))]
struct FakeOtpState {
    accept_code: String,
    sent: Vec<(String, Vec<String>)>,
    counter: u32,
    fail_send: bool,
    fail_transport: bool,
    unhealthy: bool,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeOtpTransport {
    pub fn new(accept_code: &str) -> Self {
        Self {
            state: std::sync::Mutex::new(FakeOtpState {
                accept_code: accept_code.to_string(),
                sent: Vec::new(),
                counter: 0,
                fail_send: false,
                fail_transport: false,
                unhealthy: false,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeOtpState) -> T) -> T {
        let mut state = self.state.lock().expect("fake transport lock poisoned");
        f(&mut state)
    }

    /// Every send fails with a provider error
    pub fn set_fail_send(&self, fail: bool) {
        self.with_state(|s| s.fail_send = fail);
    }

    /// Every verify fails with a timeout instead of reaching a verdict
    pub fn set_fail_transport(&self, fail: bool) {
        self.with_state(|s| s.fail_transport = fail);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.with_state(|s| s.unhealthy = unhealthy);
    }

    /// Deliveries requested so far, as (delivery_id, numbers) pairs
    pub fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.with_state(|s| s.sent.clone())
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl OtpTransport for FakeOtpTransport {
    async fn send_otp(&self, delivery_id: &str, mobile_numbers: &[String]) -> Result<OtpRef> {
        self.with_state(|s| {
            if s.fail_send {
                return Err(DaemonError::Provider("send rejected".to_string()));
            }
            s.sent
                .push((delivery_id.to_string(), mobile_numbers.to_vec()));
            s.counter += 1;
            Ok(OtpRef::new(format!("ref-{}", s.counter)))
        })
    }

    async fn verify_otp(&self, _delivery_id: &str, _otp_ref: &OtpRef, code: &str) -> Result<()> {
        self.with_state(|s| {
            if s.fail_transport {
                return Err(DaemonError::Timeout);
            }
            if code == s.accept_code {
                Ok(())
            } else {
                Err(DaemonError::VerificationFailed("invalid code".to_string()))
            }
        })
    }

    async fn check_health(&self) -> Result<()> {
        self.with_state(|s| {
            if s.unhealthy {
                return Err(DaemonError::Provider("health check failed".to_string()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_response_accepts_both_reference_spellings() {
        let primary: SendOtpResponse =
            serde_json::from_str(r#"{"success":true,"otp_ref":"ref-1"}"#).unwrap();
        assert_eq!(primary.otp_ref.as_deref(), Some("ref-1"));

        let alias: SendOtpResponse =
            serde_json::from_str(r#"{"success":true,"reference":"ref-2"}"#).unwrap();
        assert_eq!(alias.otp_ref.as_deref(), Some("ref-2"));

        let missing: SendOtpResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(missing.otp_ref.is_none());
    }

    #[test]
    fn verify_response_tolerates_missing_message() {
        let reply: VerifyOtpResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!reply.success);
        assert!(reply.message.is_none());
    }

    #[test]
    fn request_bodies_use_wire_field_names() {
        let request = SendOtpRequest {
            uuid: "user-uuid".to_string(),
            mobile_numbers: vec!["+15551234567".to_string()],
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["uuid"], "user-uuid");
        assert_eq!(json["mobile_numbers"][0], "+15551234567");

        let verify = VerifyOtpRequest {
            uuid: "user-uuid".to_string(),
            otp: "123456".to_string(),
            otp_ref: "ref-1".to_string(),
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        };
        let json = serde_json::to_value(&verify).unwrap();
        assert_eq!(json["otp_ref"], "ref-1");
    }

    #[test]
    fn endpoint_url_handles_trailing_slash() {
        assert_eq!(
            OtpProviderClient::endpoint_url("https://otp.example.com/", "send-otp"),
            "https://otp.example.com/send-otp"
        );
        assert_eq!(
            OtpProviderClient::endpoint_url("https://otp.example.com", "health"),
            "https://otp.example.com/health"
        );
    }
}

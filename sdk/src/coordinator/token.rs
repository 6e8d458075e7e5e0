//! Bootstrap token fetch and the attestation seam.
//!
//! The session starts with one plain HTTPS call: `GET` the token service
//! with the API key in `X-API-Key`, get back a short-lived `pt-token` and,
//! when the server wants proof the device is real, a challenge for the
//! platform attestation service. Both collaborators sit behind traits so
//! integrations can supply the platform-specific pieces and tests can
//! supply none at all.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config;
use crate::credentials::Credentials;
use crate::error::SdkError;

/// Attestation challenge options attached to a token grant.
#[derive(Clone, Debug, Deserialize)]
pub struct ChallengeOptions {
    pub challenge: String,
}

/// Response of the token service.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
    #[serde(rename = "pt-token")]
    pub pt_token: String,
    #[serde(rename = "challengeOptions", default)]
    pub challenge_options: Option<ChallengeOptions>,
}

/// Source of bootstrap tokens. Production uses [`HttpTokenSource`]; tests
/// and sandboxes substitute their own.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<TokenGrant, SdkError>;
}

/// The real token service client.
pub struct HttpTokenSource {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTokenSource {
    pub fn new(credentials: &Credentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config::TOKEN_FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: credentials.token_service_url(),
            api_key: credentials.api_key().to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> Result<TokenGrant, SdkError> {
        let response = self
            .http
            .get(&self.url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| SdkError::TokenService(format!("token fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SdkError::TokenService(format!(
                "token service returned {}",
                response.status()
            )));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| SdkError::TokenService(format!("malformed token response: {e}")))
    }
}

/// Device attestation: `attest(challenge) -> attestation blob`. The blob
/// is opaque to the SDK and rides along in the host-token handshake.
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    async fn attest(&self, challenge: &str) -> Result<String, SdkError>;
}

/// Default provider for platforms without an attestation service wired in.
/// Produces an empty blob; servers that require attestation will reject
/// the handshake, which is the correct failure mode.
pub struct NoAttestation;

#[async_trait]
impl AttestationProvider for NoAttestation {
    async fn attest(&self, _challenge: &str) -> Result<String, SdkError> {
        Ok(String::new())
    }
}

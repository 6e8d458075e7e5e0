//! # API Credentials
//!
//! An API key is the SDK's entire routing configuration packed into one
//! string: `{partner}-{stage}-{uuid}`. The partner and stage select the
//! token-service and socket hosts; the full key rides along as the
//! `X-API-Key` header on the bootstrap call.
//!
//! Parsing happens exactly once, at construction, and a malformed key is a
//! constructor error — not a mid-payment surprise four network hops later.

use crate::config;
use crate::error::SdkError;

/// Parsed API key with derived routing parts.
///
/// The raw key is kept verbatim for the `X-API-Key` header. `partner` and
/// `stage` are the first two hyphen-delimited segments; everything after
/// the second hyphen is the opaque key id (UUIDs carry their own hyphens,
/// so the id is "the rest", not "the third segment").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    raw: String,
    partner: String,
    stage: String,
    key_id: String,
}

impl Credentials {
    /// Parse and validate an API key.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Configuration`] when the key does not have three
    /// non-empty hyphen-delimited parts.
    pub fn parse(api_key: &str) -> Result<Self, SdkError> {
        let mut parts = api_key.splitn(3, '-');
        let partner = parts.next().unwrap_or_default();
        let stage = parts.next().unwrap_or_default();
        let key_id = parts.next().unwrap_or_default();

        if partner.is_empty() || stage.is_empty() || key_id.is_empty() {
            return Err(SdkError::Configuration(format!(
                "api key must look like partner-stage-uuid, got {} part(s)",
                [partner, stage, key_id].iter().filter(|p| !p.is_empty()).count()
            )));
        }

        Ok(Self {
            raw: api_key.to_string(),
            partner: partner.to_string(),
            stage: stage.to_string(),
            key_id: key_id.to_string(),
        })
    }

    /// The verbatim key, for the `X-API-Key` header.
    pub fn api_key(&self) -> &str {
        &self.raw
    }

    /// Partner segment — doubles as the environment in endpoint URLs.
    pub fn partner(&self) -> &str {
        &self.partner
    }

    /// Stage segment (e.g. "sandbox", "prod").
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Opaque key id. Never logged in full.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Token-service URL for these credentials.
    pub fn token_service_url(&self) -> String {
        config::token_service_url(&self.partner, &self.stage)
    }

    /// Secure socket URL for these credentials and a fresh token.
    pub fn socket_url(&self, pt_token: &str) -> String {
        config::socket_url(&self.partner, &self.stage, pt_token)
    }
}

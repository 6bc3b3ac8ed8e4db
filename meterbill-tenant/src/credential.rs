//! Service-credential issuance (C10): short-lived signed JWTs that let the
//! billing-period monitor and other autonomous callers satisfy the same
//! tenant-context propagation a human-initiated request would carry.
//!
//! Grounded on the teacher's `aerolithdb-saas::auth` module, which encodes
//! and decodes its own `SaaSClaims` the same way with `jsonwebtoken`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use meterbill_types::MeteringError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const SUBJECT: &str = "metering-service";
pub const TOKEN_TYPE: &str = "service";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub sub: String,
    pub tenant_id: Uuid,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// A minted credential: the signed token plus the claims it carries, so
/// callers can inspect `expires_at` without re-parsing the JWT.
#[derive(Debug, Clone)]
pub struct ServiceCredential {
    pub token: String,
    pub tenant_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct CredentialIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(secret: &str, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Default two-hour TTL, as specified for the service credential.
    pub fn with_default_ttl(secret: &str, issuer: impl Into<String>) -> Self {
        Self::new(secret, issuer, Duration::hours(2))
    }

    pub fn issue(&self, tenant_id: Uuid) -> Result<ServiceCredential, MeteringError> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;
        let claims = ServiceClaims {
            sub: SUBJECT.to_string(),
            tenant_id,
            token_type: TOKEN_TYPE.to_string(),
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| MeteringError::InvalidState(format!("credential signing failed: {e}")))?;
        debug!(%tenant_id, expires_at = %expires_at, "minted service credential");
        Ok(ServiceCredential {
            token,
            tenant_id,
            issued_at,
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> Result<ServiceClaims, MeteringError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<ServiceClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| MeteringError::Unauthenticated(format!("credential invalid: {e}")))?;
        Ok(data.claims)
    }
}

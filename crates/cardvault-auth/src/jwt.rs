//! Bearer token validation
//!
//! CardVault never mints tokens. The identity service signs them with the
//! shared HS256 secret; this side only checks signature, expiry and issuer.

use crate::claims::Claims;
use cardvault_core::error::AppError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
    issuer: Option<String>,
    leeway_secs: u64,
}

impl JwtService {
    /// ```
    /// use cardvault_auth::JwtService;
    ///
    /// let jwt = JwtService::new("shared-secret").with_issuer(Some("identity".into()));
    /// assert!(jwt.validate_token("not-a-token").is_err());
    /// ```
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: None,
            leeway_secs: 0,
        }
    }

    /// Require tokens to carry this issuer
    pub fn with_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }

    /// Clock skew tolerated on `exp`
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }

    /// Claims of a valid token
    ///
    /// Expired tokens give `TokenExpired`; any other defect gives
    /// `InvalidToken`.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::InvalidToken(e.to_string()),
            })
            .inspect_err(|e| warn!(error = %e, "Bearer token rejected"))?;

        debug!(sub = %claims.sub, role = %claims.role, "Bearer token accepted");
        Ok(claims)
    }
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("leeway_secs", &self.leeway_secs)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Token signing stands in for the identity service in tests
#[cfg(test)]
pub(crate) fn sign(secret: &str, claims: &Claims) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

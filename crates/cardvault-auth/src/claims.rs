//! JWT Claims structure
//!
//! Tokens are issued upstream; the subject is the card holder's user id.

use cardvault_core::error::AppError;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Caller role carried in the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Caller role
    #[serde(default)]
    pub role: Role,

    /// Issuer, checked when the service is configured with one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Claims for a user expiring `expires_in_secs` from now
    ///
    /// ```
    /// use cardvault_auth::claims::{Claims, Role};
    /// use uuid::Uuid;
    ///
    /// let id = Uuid::new_v4();
    /// let claims = Claims::with_expiration(id, Role::User, 900);
    /// assert_eq!(claims.user_id().unwrap(), id);
    /// ```
    pub fn with_expiration(user_id: Uuid, role: Role, expires_in_secs: i64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::seconds(expires_in_secs);

        Self {
            sub: user_id.to_string(),
            role,
            iss: None,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        }
    }

    pub fn issued_by(mut self, issuer: impl Into<String>) -> Self {
        self.iss = Some(issuer.into());
        self
    }

    /// Subject parsed as a user id
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::InvalidToken(format!("Subject is not a user id: {}", self.sub)))
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_with_expiration() {
        let id = Uuid::new_v4();
        let claims = Claims::with_expiration(id, Role::Admin, 3600);
        assert_eq!(claims.sub, id.to_string());
        assert!(claims.iss.is_none());
        assert!(claims.is_admin());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_user_id_parsing() {
        let mut claims = Claims::with_expiration(Uuid::new_v4(), Role::User, 60);
        assert!(claims.user_id().is_ok());

        claims.sub = "operator".to_string();
        assert!(matches!(claims.user_id(), Err(AppError::InvalidToken(_))));
    }

    #[test]
    fn test_role_serialization() {
        let claims = Claims::with_expiration(Uuid::nil(), Role::Admin, 60).issued_by("wallet-api");
        let json = serde_json::to_string(&claims).unwrap();
        assert!(json.contains("\"role\":\"admin\""));
        assert!(json.contains("\"iss\":\"wallet-api\""));

        let back: Claims = serde_json::from_str(&json).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn test_role_defaults_to_user() {
        let json = r#"{"sub":"00000000-0000-0000-0000-000000000000","iat":0,"exp":0}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.role, Role::User);
        assert_eq!(Role::from_str("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::from_str("root"), None);
    }
}

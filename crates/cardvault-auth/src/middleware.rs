//! Request extractors for card holders and operators
//!
//! Both read `Authorization: Bearer <jwt>` and validate it with the
//! `JwtService` registered as `web::Data<Arc<JwtService>>`. Rejections are
//! plain `AppError`s, so they render with the API's JSON error body.

use crate::claims::Role;
use crate::jwt::JwtService;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use cardvault_core::error::AppError;
use futures::future::{ready, Ready};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AppError> {
    let Some(jwt) = req.app_data::<web::Data<Arc<JwtService>>>() else {
        error!("JwtService missing from app data");
        return Err(AppError::Internal("Authentication not configured".into()));
    };
    let token = bearer_token(req)
        .ok_or_else(|| AppError::InvalidToken("Missing bearer token".into()))?;

    let claims = jwt.validate_token(token)?;
    let user_id = claims.user_id()?;
    debug!(user_id = %user_id, role = %claims.role, "Caller authenticated");

    Ok(AuthenticatedUser {
        user_id,
        role: claims.role,
    })
}

/// Card holder behind the request; handlers only act on this user's cards
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req).map_err(actix_web::Error::from))
    }
}

/// Operator calling settlement webhooks or card-level admin routes
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl std::ops::Deref for AdminUser {
    type Target = AuthenticatedUser;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequest for AdminUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = authenticate(req).and_then(|user| {
            if user.is_admin() {
                Ok(AdminUser(user))
            } else {
                warn!(user_id = %user.user_id, "Admin route refused");
                Err(AppError::Forbidden)
            }
        });
        ready(result.map_err(actix_web::Error::from))
    }
}

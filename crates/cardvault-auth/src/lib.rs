//! Authentication for the CardVault API
//!
//! Card holders authenticate with bearer JWTs issued by the identity
//! service. Handlers take [`AuthenticatedUser`] to act on the caller's own
//! cards, or [`AdminUser`] for settlement webhooks and operational routes.
//!
//! ```no_run
//! use actix_web::HttpResponse;
//! use cardvault_auth::{AdminUser, AuthenticatedUser};
//!
//! async fn my_cards(user: AuthenticatedUser) -> HttpResponse {
//!     HttpResponse::Ok().json(serde_json::json!({ "user_id": user.user_id }))
//! }
//!
//! async fn settle(_admin: AdminUser) -> HttpResponse {
//!     HttpResponse::NoContent().finish()
//! }
//! ```

pub mod claims;
pub mod jwt;
pub mod middleware;

pub use claims::{Claims, Role};
pub use jwt::JwtService;
pub use middleware::{AdminUser, AuthenticatedUser};

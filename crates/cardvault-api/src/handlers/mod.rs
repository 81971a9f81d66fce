//! HTTP request handlers

pub mod card;
pub mod funding;
pub mod health;
pub mod transaction;

use actix_web::web;

pub use card::configure as configure_cards;
pub use funding::configure as configure_funding;
pub use health::configure as configure_health;
pub use transaction::configure as configure_transactions;

/// Register every route under the caller's scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_health)
        .configure(configure_cards)
        .configure(configure_funding)
        .configure(configure_transactions);
}

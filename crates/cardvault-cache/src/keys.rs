//! Redis key builders for CardVault
//!
//! # Key Patterns
//!
//! - `lock:issuance-fee:{card_id}` - issuance-fee charge lock
//! - `lock:dispute:{card_id}` - dispute creation lock
//! - `lock:funding:{scope}` - funding initialize / execute / settlement lock
//! - `escrow:funding:{exchange_reference}` - cross-currency funding context
//!
//! # Example
//!
//! ```
//! use cardvault_cache::keys;
//! use uuid::Uuid;
//!
//! let id = Uuid::nil();
//! assert_eq!(
//!     keys::lock_key(&keys::dispute_lock(id)),
//!     format!("lock:dispute:{}", id)
//! );
//! ```

use uuid::Uuid;

/// Prefix for distributed locks
///
/// Format: `lock:{name}`
pub const LOCK_PREFIX: &str = "lock";

/// Prefix for funding escrow contexts
///
/// Format: `escrow:funding:{exchange_reference}`
pub const ESCROW_PREFIX: &str = "escrow:funding";

/// Lock name for charging a card's issuance fee
pub fn issuance_fee_lock(card_id: Uuid) -> String {
    format!("issuance-fee:{}", card_id)
}

/// Lock name for opening a dispute on a card
pub fn dispute_lock(card_id: Uuid) -> String {
    format!("dispute:{}", card_id)
}

/// Lock name for funding steps; `scope` is a card id or exchange reference
pub fn funding_lock(scope: &str) -> String {
    format!("funding:{}", scope)
}

/// Redis key holding a lock
pub fn lock_key(name: &str) -> String {
    format!("{}:{}", LOCK_PREFIX, name)
}

/// Redis key holding a funding context
pub fn escrow_key(exchange_reference: &str) -> String {
    format!("{}:{}", ESCROW_PREFIX, exchange_reference)
}

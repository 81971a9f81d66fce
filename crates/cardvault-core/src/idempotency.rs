//! Deterministic idempotency keys for rail transfers
//!
//! A queue retry must hand the wallet services the same key it used on the
//! first attempt, so keys are derived from the card transaction id only.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Longest key the wallet providers accept
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 40;

/// Build the funding idempotency key for a card transaction.
///
/// Format: `{prefix}-{sha256(card_transaction_id) hex}`, cut to
/// [`MAX_IDEMPOTENCY_KEY_LEN`] characters.
pub fn funding_key(prefix: &str, card_transaction_id: Uuid) -> String {
    let digest = Sha256::digest(card_transaction_id.as_bytes());
    let mut key = format!("{}-{}", prefix, hex::encode(digest));
    key.truncate(MAX_IDEMPOTENCY_KEY_LEN);
    key
}

/// Key for the non-production blockchain mirror of a fiat funding
pub fn mirror_key(prefix: &str, card_transaction_id: Uuid) -> String {
    funding_key(&format!("{}-m", prefix), card_transaction_id)
}

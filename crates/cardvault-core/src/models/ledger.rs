//! Ledger entry models and mutation planning
//!
//! Every balance change is planned here from freshly read rows and then
//! persisted by a `LedgerStore` inside one database transaction. Planning is
//! pure, so the Postgres store and the in-memory test store share the exact
//! same precondition checks and balance arithmetic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::card::{Card, CardAccount, FeeStatus};
use super::dispute::{Dispute, DisputeDraft, DisputeEvent};
use crate::{AppError, AppResult};

/// Side of a ledger leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryDirection {
    #[default]
    Credit,
    Debit,
}

impl fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryDirection::Credit => write!(f, "CREDIT"),
            EntryDirection::Debit => write!(f, "DEBIT"),
        }
    }
}

impl EntryDirection {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CREDIT" => Some(EntryDirection::Credit),
            "DEBIT" => Some(EntryDirection::Debit),
            _ => None,
        }
    }

    /// Balance after applying `amount` in this direction
    #[inline]
    pub fn apply(&self, balance: i64, amount: i64) -> AppResult<i64> {
        match self {
            EntryDirection::Credit => balance.checked_add(amount),
            EntryDirection::Debit => balance.checked_sub(amount),
        }
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Applying {} to balance {} overflows",
                amount, balance
            ))
        })
    }
}

/// What a ledger leg records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    #[default]
    Spend,
    Fee,
    Deposit,
    Transfer,
    Refund,
    Reversal,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::Spend => "SPEND",
            EntryKind::Fee => "FEE",
            EntryKind::Deposit => "DEPOSIT",
            EntryKind::Transfer => "TRANSFER",
            EntryKind::Refund => "REFUND",
            EntryKind::Reversal => "REVERSAL",
        };
        write!(f, "{}", s)
    }
}

impl EntryKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SPEND" => Some(EntryKind::Spend),
            "FEE" => Some(EntryKind::Fee),
            "DEPOSIT" => Some(EntryKind::Deposit),
            "TRANSFER" => Some(EntryKind::Transfer),
            "REFUND" => Some(EntryKind::Refund),
            "REVERSAL" => Some(EntryKind::Reversal),
            _ => None,
        }
    }
}

/// Ledger entry status: PENDING -> SUCCESSFUL | DECLINED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    #[default]
    Pending,
    Successful,
    Declined,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "PENDING"),
            EntryStatus::Successful => write!(f, "SUCCESSFUL"),
            EntryStatus::Declined => write!(f, "DECLINED"),
        }
    }
}

impl EntryStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(EntryStatus::Pending),
            "SUCCESSFUL" => Some(EntryStatus::Successful),
            "DECLINED" => Some(EntryStatus::Declined),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }
}

/// Card-level ledger leg ("card transaction")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardLedgerEntry {
    pub id: Uuid,
    pub card_id: Uuid,
    pub user_id: Uuid,

    /// Account-level mirror
    pub main_entry_id: Option<Uuid>,

    /// Other leg of a balance transfer
    pub linked_entry_id: Option<Uuid>,

    /// Always non-negative, in minor units
    pub amount: i64,
    pub direction: EntryDirection,
    pub kind: EntryKind,
    pub status: EntryStatus,

    pub balance_before: i64,
    pub balance_after: i64,

    pub description: Option<String>,

    /// Charge / dispute / settlement id at the card provider
    pub provider_reference: Option<String>,

    /// Transfer id on the fiat or blockchain rail
    pub rail_reference: Option<String>,

    pub merchant_name: Option<String>,
    pub merchant_category: Option<String>,
    pub merchant_category_code: Option<String>,

    pub failure_reason: Option<String>,

    /// Posting time
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardLedgerEntry {
    /// Double-entry check: `after == before ± amount`
    pub fn is_balanced(&self) -> bool {
        self.amount >= 0
            && self
                .direction
                .apply(self.balance_before, self.amount)
                .is_ok_and(|after| after == self.balance_after)
    }

    /// Signed effect on the card balance
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}

impl Default for CardLedgerEntry {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            card_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            main_entry_id: None,
            linked_entry_id: None,
            amount: 0,
            direction: EntryDirection::Credit,
            kind: EntryKind::Spend,
            status: EntryStatus::Pending,
            balance_before: 0,
            balance_after: 0,
            description: None,
            provider_reference: None,
            rail_reference: None,
            merchant_name: None,
            merchant_category: None,
            merchant_category_code: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Account-level ledger entry ("transaction"), mirrors one card leg
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub card_account_id: Uuid,
    pub card_entry_id: Uuid,
    pub amount: i64,
    pub direction: EntryDirection,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub currency: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger currency for card balances
pub const LEDGER_CURRENCY: &str = "USD";

impl MainLedgerEntry {
    /// Build the mirror of a card entry; links both ways
    pub fn mirror(entry: &mut CardLedgerEntry, card_account_id: Uuid) -> Self {
        let main = Self {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            card_account_id,
            card_entry_id: entry.id,
            amount: entry.amount,
            direction: entry.direction,
            kind: entry.kind,
            status: entry.status,
            currency: LEDGER_CURRENCY.to_string(),
            description: entry.description.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        };
        entry.main_entry_id = Some(main.id);
        main
    }
}

/// Checks re-evaluated against the freshly read rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    /// Card is neither blocked nor canceled
    CardUsable,
    /// Card balance covers a debit
    SufficientBalance,
    /// Issuance fee has not been settled or failed yet
    IssuanceFeePending,
}

/// A single immediate balance change on one card and its account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceMutation {
    pub card_id: Uuid,
    pub direction: EntryDirection,
    pub kind: EntryKind,
    pub amount: i64,
    pub description: Option<String>,
    pub provider_reference: Option<String>,
    pub preconditions: Vec<Precondition>,

    /// Issuance-fee status written with the balances
    pub fee_status_on_commit: Option<FeeStatus>,

    /// Dispute row written with the fee leg
    pub dispute: Option<DisputeDraft>,
}

impl BalanceMutation {
    /// Debit requiring a usable card and a covering balance
    pub fn debit(card_id: Uuid, amount: i64, kind: EntryKind) -> Self {
        Self {
            card_id,
            direction: EntryDirection::Debit,
            kind,
            amount,
            description: None,
            provider_reference: None,
            preconditions: vec![Precondition::CardUsable, Precondition::SufficientBalance],
            fee_status_on_commit: None,
            dispute: None,
        }
    }

    /// Credit requiring a usable card
    pub fn credit(card_id: Uuid, amount: i64, kind: EntryKind) -> Self {
        Self {
            card_id,
            direction: EntryDirection::Credit,
            kind,
            amount,
            description: None,
            provider_reference: None,
            preconditions: vec![Precondition::CardUsable],
            fee_status_on_commit: None,
            dispute: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_provider_reference(mut self, reference: impl Into<String>) -> Self {
        self.provider_reference = Some(reference.into());
        self
    }

    /// Only commit while the issuance fee is still PENDING; mark it COMPLETED
    pub fn completing_issuance_fee(mut self) -> Self {
        self.preconditions.push(Precondition::IssuanceFeePending);
        self.fee_status_on_commit = Some(FeeStatus::Completed);
        self
    }

    pub fn opening_dispute(mut self, draft: DisputeDraft) -> Self {
        self.dispute = Some(draft);
        self
    }

    fn check(&self, card: &Card) -> AppResult<()> {
        for precondition in &self.preconditions {
            match precondition {
                Precondition::CardUsable => card.ensure_usable()?,
                Precondition::SufficientBalance => {
                    if self.direction == EntryDirection::Debit {
                        card.ensure_covers(self.amount)?;
                    }
                }
                Precondition::IssuanceFeePending => {
                    if card.issuance_fee_status != FeeStatus::Pending {
                        return Err(AppError::AlreadyProcessed(format!(
                            "Issuance fee for card {} is {}",
                            card.id, card.issuance_fee_status
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Plan the rows to write from the current card and account rows.
    ///
    /// Fails without side effects if any precondition does not hold.
    pub fn plan(
        &self,
        card: &Card,
        account: &CardAccount,
        now: DateTime<Utc>,
    ) -> AppResult<MutationOutcome> {
        if self.amount <= 0 {
            return Err(AppError::InvalidInput(format!(
                "Mutation amount must be positive, got {}",
                self.amount
            )));
        }
        ensure_same_card(self.card_id, card)?;
        ensure_account_of(card, account)?;

        self.check(card)?;

        let card_balance = self.direction.apply(card.balance, self.amount)?;
        let account_balance = self.direction.apply(account.balance, self.amount)?;

        let mut card_entry = CardLedgerEntry {
            id: Uuid::new_v4(),
            card_id: card.id,
            user_id: card.user_id,
            amount: self.amount,
            direction: self.direction,
            kind: self.kind,
            status: EntryStatus::Successful,
            balance_before: card.balance,
            balance_after: card_balance,
            description: self.description.clone(),
            provider_reference: self.provider_reference.clone(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        };
        let main_entry = MainLedgerEntry::mirror(&mut card_entry, account.id);

        let (dispute, dispute_event) = match &self.dispute {
            Some(draft) => {
                let dispute = Dispute {
                    id: Uuid::new_v4(),
                    card_entry_id: draft.card_entry_id,
                    card_id: card.id,
                    user_id: card.user_id,
                    fee_entry_id: Some(card_entry.id),
                    provider_reference: draft.provider_reference.clone(),
                    status: draft.status,
                    evidence: draft.evidence.clone(),
                    created_at: now,
                    updated_at: now,
                };
                let event = DisputeEvent::created(&dispute);
                (Some(dispute), Some(event))
            }
            None => (None, None),
        };

        Ok(MutationOutcome {
            card_entry,
            main_entry,
            card_balance,
            account_balance,
            fee_status: self.fee_status_on_commit,
            dispute,
            dispute_event,
        })
    }
}

/// Rows produced by a committed (or planned) balance mutation
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub card_entry: CardLedgerEntry,
    pub main_entry: MainLedgerEntry,
    pub card_balance: i64,
    pub account_balance: i64,
    pub fee_status: Option<FeeStatus>,
    pub dispute: Option<Dispute>,
    pub dispute_event: Option<DisputeEvent>,
}

fn ensure_same_card(expected: Uuid, card: &Card) -> AppResult<()> {
    if card.id != expected {
        return Err(AppError::Internal(format!(
            "Loaded card {} while planning for {}",
            card.id, expected
        )));
    }
    Ok(())
}

fn ensure_account_of(card: &Card, account: &CardAccount) -> AppResult<()> {
    if card.card_account_id != account.id {
        return Err(AppError::Internal(format!(
            "Card {} does not belong to card account {}",
            card.id, account.id
        )));
    }
    Ok(())
}

/// Intended credit recorded before the money has arrived
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCredit {
    pub card_id: Uuid,
    pub amount: i64,
    pub kind: EntryKind,
    pub description: Option<String>,
    pub provider_reference: Option<String>,
}

impl PendingCredit {
    pub fn deposit(card_id: Uuid, amount: i64, description: impl Into<String>) -> Self {
        Self {
            card_id,
            amount,
            kind: EntryKind::Deposit,
            description: Some(description.into()),
            provider_reference: None,
        }
    }

    /// Plan the PENDING card leg and its mirror; balances are not touched
    pub fn plan(
        &self,
        card: &Card,
        account: &CardAccount,
        now: DateTime<Utc>,
    ) -> AppResult<(CardLedgerEntry, MainLedgerEntry)> {
        if self.amount <= 0 {
            return Err(AppError::InvalidInput(format!(
                "Credit amount must be positive, got {}",
                self.amount
            )));
        }
        ensure_same_card(self.card_id, card)?;
        ensure_account_of(card, account)?;
        card.ensure_usable()?;

        let mut entry = CardLedgerEntry {
            id: Uuid::new_v4(),
            card_id: card.id,
            user_id: card.user_id,
            amount: self.amount,
            direction: EntryDirection::Credit,
            kind: self.kind,
            status: EntryStatus::Pending,
            balance_before: card.balance,
            balance_after: EntryDirection::Credit.apply(card.balance, self.amount)?,
            description: self.description.clone(),
            provider_reference: self.provider_reference.clone(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        };
        let main = MainLedgerEntry::mirror(&mut entry, account.id);
        Ok((entry, main))
    }
}

/// Result of settling a pending credit
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Settled {
        entry: CardLedgerEntry,
        card_balance: i64,
        account_balance: i64,
    },
    AlreadySettled {
        entry: CardLedgerEntry,
    },
}

impl SettlementOutcome {
    pub fn entry(&self) -> &CardLedgerEntry {
        match self {
            SettlementOutcome::Settled { entry, .. } => entry,
            SettlementOutcome::AlreadySettled { entry } => entry,
        }
    }
}

/// Plan the settlement of a pending credit against the current balances.
///
/// A canceled card is still credited: the money has already left the rail.
pub fn plan_settlement(
    entry: &CardLedgerEntry,
    card: &Card,
    account: &CardAccount,
    now: DateTime<Utc>,
) -> AppResult<SettlementOutcome> {
    match entry.status {
        EntryStatus::Successful => {
            return Ok(SettlementOutcome::AlreadySettled {
                entry: entry.clone(),
            })
        }
        EntryStatus::Declined => {
            return Err(AppError::Conflict(format!(
                "Ledger entry {} was declined and cannot be settled",
                entry.id
            )))
        }
        EntryStatus::Pending => {}
    }

    if entry.direction != EntryDirection::Credit {
        return Err(AppError::InvalidInput(format!(
            "Ledger entry {} is not a credit",
            entry.id
        )));
    }
    ensure_same_card(entry.card_id, card)?;
    ensure_account_of(card, account)?;

    let card_balance = EntryDirection::Credit.apply(card.balance, entry.amount)?;
    let account_balance = EntryDirection::Credit.apply(account.balance, entry.amount)?;

    let mut settled = entry.clone();
    settled.status = EntryStatus::Successful;
    settled.balance_before = card.balance;
    settled.balance_after = card_balance;
    settled.updated_at = now;

    Ok(SettlementOutcome::Settled {
        card_balance,
        account_balance,
        entry: settled,
    })
}

/// Both legs of a cancel/re-issue balance hand-over
#[derive(Debug, Clone, Serialize)]
pub struct BalanceTransfer {
    pub source_entry: CardLedgerEntry,
    pub destination_entry: CardLedgerEntry,
    pub source_main: MainLedgerEntry,
    pub destination_main: MainLedgerEntry,
    pub source_balance: i64,
    pub destination_balance: i64,
}

/// Plan moving the whole balance of `source` onto `destination`.
///
/// Returns `None` for a zero balance. A negative balance is carried over as
/// a credit on the old card and a debit on the new one.
pub fn plan_transfer(
    source: &Card,
    destination: &Card,
    now: DateTime<Utc>,
) -> AppResult<Option<BalanceTransfer>> {
    if source.id == destination.id {
        return Err(AppError::InvalidInput(
            "Cannot transfer a balance onto the same card".to_string(),
        ));
    }
    if source.card_account_id != destination.card_account_id {
        return Err(AppError::InvalidInput(format!(
            "Cards {} and {} belong to different card accounts",
            source.id, destination.id
        )));
    }
    if destination.status.is_terminal() {
        return Err(AppError::CardCanceled(destination.id.to_string()));
    }
    if source.balance == 0 {
        return Ok(None);
    }

    let amount = source.balance.checked_abs().ok_or_else(|| {
        AppError::InvalidInput(format!("Balance of card {} cannot be moved", source.id))
    })?;
    let (source_direction, destination_direction) = if source.balance > 0 {
        (EntryDirection::Debit, EntryDirection::Credit)
    } else {
        (EntryDirection::Credit, EntryDirection::Debit)
    };

    let mut source_entry = CardLedgerEntry {
        id: Uuid::new_v4(),
        card_id: source.id,
        user_id: source.user_id,
        amount,
        direction: source_direction,
        kind: EntryKind::Transfer,
        status: EntryStatus::Successful,
        balance_before: source.balance,
        balance_after: source_direction.apply(source.balance, amount)?,
        description: Some(format!("Balance transfer to card {}", destination.id)),
        created_at: now,
        updated_at: now,
        ..Default::default()
    };
    let mut destination_entry = CardLedgerEntry {
        id: Uuid::new_v4(),
        card_id: destination.id,
        user_id: destination.user_id,
        amount,
        direction: destination_direction,
        kind: EntryKind::Deposit,
        status: EntryStatus::Successful,
        balance_before: destination.balance,
        balance_after: destination_direction.apply(destination.balance, amount)?,
        description: Some(format!("Balance transfer from card {}", source.id)),
        created_at: now,
        updated_at: now,
        ..Default::default()
    };
    source_entry.linked_entry_id = Some(destination_entry.id);
    destination_entry.linked_entry_id = Some(source_entry.id);

    let source_main = MainLedgerEntry::mirror(&mut source_entry, source.card_account_id);
    let destination_main =
        MainLedgerEntry::mirror(&mut destination_entry, destination.card_account_id);

    Ok(Some(BalanceTransfer {
        source_balance: source_entry.balance_after,
        destination_balance: destination_entry.balance_after,
        source_entry,
        destination_entry,
        source_main,
        destination_main,
    }))
}

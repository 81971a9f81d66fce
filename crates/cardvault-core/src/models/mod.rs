//! Domain models for CardVault
//!
//! Cards, ledger legs, disputes, funding escrow state and job payloads.

pub mod card;
pub mod dispute;
pub mod external;
pub mod funding;
pub mod job;
pub mod ledger;

pub use card::{Card, CardAccount, CardStatus, FeeStatus};
pub use dispute::{
    evaluate_eligibility, is_atm_transaction, Dispute, DisputeDraft, DisputeEligibility,
    DisputeEvent, DisputeEventType, DisputeStatus,
};
pub use external::{
    BlockchainTransferRequest, CardUpdate, ExchangeExecution, ExchangeQuote,
    ExchangeQuoteRequest, ExchangeStatus, FiatTransferRequest, Notification, ProviderCharge,
    ProviderDispute, RailTransfer,
};
pub use funding::{
    CrossCurrencyBreakdown, FundingBreakdown, FundingContext, FundingContextUpdate, FundingRail,
};
pub use job::{
    CrossCurrencyFundingJob, FundingJob, Job, JobContext, JobHandle, JobOptions, JobOutcome,
    StoredJob, FUNDING_QUEUE,
};
pub use ledger::{
    plan_settlement, plan_transfer, BalanceMutation, BalanceTransfer, CardLedgerEntry,
    EntryDirection, EntryKind, EntryStatus, MainLedgerEntry, MutationOutcome, PendingCredit,
    Precondition, SettlementOutcome, LEDGER_CURRENCY,
};

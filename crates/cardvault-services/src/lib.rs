//! Business logic services for CardVault
//!
//! This crate orchestrates every balance-changing operation of the card
//! ledger: fee charging, funding sagas, card lifecycle and disputes.
//!
//! # Architecture
//!
//! - Collaborators (repositories, ledger store, locks, provider adapters) are
//!   injected as `Arc<dyn Trait>` so the same services run against
//!   PostgreSQL/Redis in production and in-memory fakes in tests
//! - All balance writes go through the [`BalanceEngine`] or the ledger
//!   store's settlement and transfer operations, under a named lock
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `IssuanceFeeService` - one-off card issuance fee
//! - `FundingService` - single-currency funding request and settlement
//! - `CrossCurrencyFundingService` - quote / execute funding via an exchange
//! - `FundingSagaHandler` - asynchronous rail and exchange leg of funding
//! - `DurableQueue` - database-backed retrying job queue feeding the saga handler
//! - `CardLifecycleService` - freeze, cancel, re-issue and balance transfer
//! - `DisputeService` - eligibility and dispute creation

pub mod balance_engine;
pub mod card_lifecycle;
pub mod charge;
pub mod cross_currency;
pub mod dispute;
pub mod funding;
pub mod funding_saga;
pub mod issuance_fee;
pub mod locks;
pub mod queue;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use balance_engine::BalanceEngine;
pub use card_lifecycle::{CardLifecycleService, ReissueOutcome};
pub use charge::RetryingChargeExecutor;
pub use cross_currency::{
    CrossCurrencyDependencies, CrossCurrencyFundingService, ExchangeFundingReceipt, QuoteRequest,
};
pub use dispute::{DisputeCreated, DisputeDetails, DisputeService};
pub use funding::{FundingReceipt, FundingService};
pub use funding_saga::{FundingSagaHandler, SagaDependencies};
pub use issuance_fee::IssuanceFeeService;
pub use locks::LockManager;
pub use queue::DurableQueue;
pub use retry::{Backoff, RetryPolicy};

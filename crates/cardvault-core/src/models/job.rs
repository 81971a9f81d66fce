//! Job queue payloads

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::funding::FundingRail;
use crate::error::AppError;

/// Queue carrying funding work
pub const FUNDING_QUEUE: &str = "card-funding";

/// Move funds from a rail into a card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingJob {
    pub card_transaction_id: Uuid,
    pub user_id: Uuid,
    pub card_id: Uuid,
    /// Minor units credited to the card
    pub amount: i64,
    /// Minor units kept as fee
    pub fee: i64,
    pub rail: FundingRail,
}

impl FundingJob {
    /// Amount plus fee, moved on the rail
    pub fn total(&self) -> Result<i64, AppError> {
        self.amount
            .checked_add(self.fee)
            .ok_or_else(|| AppError::InvalidInput("Funding total overflows".to_string()))
    }
}

/// Run the exchange leg of a two-phase cross-currency funding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossCurrencyFundingJob {
    pub exchange_reference: String,
    pub card_transaction_id: Uuid,
    pub user_id: Uuid,
    pub card_id: Uuid,
}

/// Typed job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Job {
    Funding(FundingJob),
    CrossCurrencyFunding(CrossCurrencyFundingJob),
}

impl Job {
    pub fn card_transaction_id(&self) -> Uuid {
        match self {
            Job::Funding(job) => job.card_transaction_id,
            Job::CrossCurrencyFunding(job) => job.card_transaction_id,
        }
    }

    pub fn job_type(&self) -> &'static str {
        match self {
            Job::Funding(_) => "funding",
            Job::CrossCurrencyFunding(_) => "cross_currency_funding",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.job_type(), self.card_transaction_id())
    }
}

/// Retry policy attached to an enqueued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base: Duration::from_millis(2000),
        }
    }
}

/// Returned by the queue on enqueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub queue: String,
}

/// Job row claimed by a worker
///
/// `attempt` already counts the run the claim is for.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: Uuid,
    pub job: Job,
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl StoredJob {
    pub fn context(&self) -> JobContext {
        JobContext {
            job_id: self.id,
            attempt: self.attempt,
            max_attempts: self.max_attempts,
        }
    }
}

/// Per-attempt information given to a job handler
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    pub job_id: Uuid,
    /// 1-based
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext {
    /// No retry follows a failure of this attempt
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// What a successful handler run reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub card_transaction_id: Uuid,
    /// Transfer or exchange id on the rail
    pub rail_reference: Option<String>,
}

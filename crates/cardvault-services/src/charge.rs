//! Retrying Charge Executor
//!
//! Provider-side fee charges with a bounded in-process retry loop. The charge
//! is taken before the ledger is written; callers log a reconciliation gap if
//! the ledger write fails afterwards.

use cardvault_core::config::ChargeConfig;
use cardvault_core::models::ProviderCharge;
use cardvault_core::traits::CardProvider;
use cardvault_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct RetryingChargeExecutor {
    provider: Arc<dyn CardProvider>,
    policy: RetryPolicy,
}

impl RetryingChargeExecutor {
    pub fn new(provider: Arc<dyn CardProvider>, config: &ChargeConfig) -> Self {
        Self::with_policy(
            provider,
            RetryPolicy::fixed(
                config.max_attempts,
                Duration::from_millis(config.retry_delay_ms),
            ),
        )
    }

    pub fn with_policy(provider: Arc<dyn CardProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Charge `amount` minor units on the card, retrying transport failures.
    ///
    /// Every attempt sends the same amount and description. Exhaustion is
    /// reported as `ChargeFailed`.
    #[instrument(skip(self, description))]
    pub async fn charge_with_retry(
        &self,
        provider_reference: &str,
        amount: i64,
        description: &str,
    ) -> AppResult<ProviderCharge> {
        let result = self
            .policy
            .run(|attempt| async move {
                info!(attempt, amount, "Submitting provider charge");
                self.provider
                    .create_charge(provider_reference, amount, description)
                    .await
            })
            .await;

        match result {
            Ok(charge) => {
                info!(charge_reference = %charge.reference, "Provider charge succeeded");
                Ok(charge)
            }
            Err(failure) => {
                if failure.last_error.is_retryable() {
                    error!(
                        attempts = failure.attempts,
                        error = %failure.last_error,
                        "Provider charge failed on every attempt"
                    );
                } else {
                    warn!(error = %failure.last_error, "Provider charge rejected");
                }
                Err(AppError::ChargeFailed {
                    attempts: failure.attempts,
                    last_error: failure.last_error.to_string(),
                })
            }
        }
    }
}

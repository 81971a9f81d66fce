//! Card-issuing provider adapter

use async_trait::async_trait;
use cardvault_core::error::AppError;
use cardvault_core::models::{CardUpdate, ProviderCharge, ProviderDispute};
use cardvault_core::traits::CardProvider;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::client::{HttpClient, Upstream};

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    amount: i64,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct DisputeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    evidence: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DepositAddressReply {
    address: String,
}

pub struct HttpCardProvider {
    client: HttpClient,
}

impl HttpCardProvider {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, AppError> {
        Ok(Self {
            client: HttpClient::new(base_url, api_key, timeout_secs, Upstream::CardProvider)?,
        })
    }
}

#[async_trait]
impl CardProvider for HttpCardProvider {
    #[instrument(skip(self, description))]
    async fn create_charge(
        &self,
        card_reference: &str,
        amount: i64,
        description: &str,
    ) -> Result<ProviderCharge, AppError> {
        let charge: ProviderCharge = self
            .client
            .post(
                &format!("/cards/{}/charges", card_reference),
                &ChargeRequest {
                    amount,
                    description,
                },
            )
            .await?;

        info!(charge_reference = %charge.reference, amount, "Provider charge created");
        Ok(charge)
    }

    #[instrument(skip(self, evidence))]
    async fn create_dispute(
        &self,
        transaction_reference: &str,
        evidence: Option<&str>,
    ) -> Result<ProviderDispute, AppError> {
        let dispute: ProviderDispute = self
            .client
            .post(
                &format!("/transactions/{}/disputes", transaction_reference),
                &DisputeRequest { evidence },
            )
            .await?;

        info!(dispute_reference = %dispute.reference, status = %dispute.status, "Provider dispute opened");
        Ok(dispute)
    }

    #[instrument(skip(self))]
    async fn update_card(&self, card_reference: &str, update: &CardUpdate) -> Result<(), AppError> {
        self.client
            .patch(&format!("/cards/{}", card_reference), update)
            .await
    }

    #[instrument(skip(self))]
    async fn deposit_address(
        &self,
        account_reference: &str,
        network: &str,
    ) -> Result<String, AppError> {
        let reply: DepositAddressReply = self
            .client
            .get(&format!(
                "/accounts/{}/deposit-addresses/{}",
                account_reference, network
            ))
            .await?;

        if reply.address.is_empty() {
            return Err(AppError::Provider(format!(
                "No {} deposit address for account {}",
                network, account_reference
            )));
        }
        Ok(reply.address)
    }
}

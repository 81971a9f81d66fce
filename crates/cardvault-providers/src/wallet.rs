//! Fiat and blockchain wallet adapters

use async_trait::async_trait;
use cardvault_core::error::AppError;
use cardvault_core::models::{BlockchainTransferRequest, FiatTransferRequest, RailTransfer};
use cardvault_core::traits::{BlockchainWallet, FiatWallet};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::client::{HttpClient, Upstream};

#[derive(Debug, Deserialize)]
struct BalanceReply {
    /// Minor units
    available: i64,
}

pub struct HttpFiatWallet {
    client: HttpClient,
}

impl HttpFiatWallet {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, AppError> {
        Ok(Self {
            client: HttpClient::new(base_url, api_key, timeout_secs, Upstream::Wallet)?,
        })
    }
}

#[async_trait]
impl FiatWallet for HttpFiatWallet {
    #[instrument(skip(self))]
    async fn balance(&self, user_id: Uuid, asset: &str) -> Result<i64, AppError> {
        let reply: BalanceReply = self
            .client
            .get(&format!("/users/{}/balances/{}", user_id, asset))
            .await?;
        Ok(reply.available)
    }

    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    async fn transfer_to_address(
        &self,
        user_id: Uuid,
        request: &FiatTransferRequest,
    ) -> Result<RailTransfer, AppError> {
        let transfer: RailTransfer = self
            .client
            .post(&format!("/users/{}/transfers", user_id), request)
            .await?;

        info!(
            transfer_reference = %transfer.reference,
            amount = request.amount,
            "Fiat transfer submitted"
        );
        Ok(transfer)
    }
}

/// Wallet API body; the transaction type is fixed for outgoing sends
#[derive(Debug, Serialize)]
struct InitiateTransaction<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    request: &'a BlockchainTransferRequest,
}

#[derive(Debug, Deserialize)]
struct TransactionReply {
    #[serde(alias = "transaction_id")]
    id: String,
}

pub struct HttpBlockchainWallet {
    client: HttpClient,
}

impl HttpBlockchainWallet {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, AppError> {
        Ok(Self {
            client: HttpClient::new(base_url, api_key, timeout_secs, Upstream::Wallet)?,
        })
    }
}

#[async_trait]
impl BlockchainWallet for HttpBlockchainWallet {
    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    async fn initiate_transaction(
        &self,
        user_id: Uuid,
        request: &BlockchainTransferRequest,
    ) -> Result<RailTransfer, AppError> {
        let reply: TransactionReply = self
            .client
            .post(
                &format!("/users/{}/transactions", user_id),
                &InitiateTransaction {
                    kind: "send",
                    request,
                },
            )
            .await?;

        info!(transaction_id = %reply.id, amount = request.amount, "Blockchain send submitted");
        Ok(RailTransfer { reference: reply.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_transaction_body() {
        let request = BlockchainTransferRequest {
            asset_id: "USDC".to_string(),
            network: "SOLANA".to_string(),
            amount: 10500,
            peer_address: "So1anaAddr".to_string(),
            idempotency_key: "card-fund-abc".to_string(),
        };
        let body = serde_json::to_value(InitiateTransaction {
            kind: "send",
            request: &request,
        })
        .unwrap();

        assert_eq!(body["type"], "send");
        assert_eq!(body["amount"], 10500);
        assert_eq!(body["peer_address"], "So1anaAddr");
    }

    #[test]
    fn test_transaction_reply_alias() {
        let reply: TransactionReply =
            serde_json::from_str(r#"{"transaction_id":"tx_1"}"#).unwrap();
        assert_eq!(reply.id, "tx_1");
    }
}

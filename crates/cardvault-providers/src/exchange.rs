//! Currency exchange adapter

use async_trait::async_trait;
use cardvault_core::error::AppError;
use cardvault_core::models::{ExchangeExecution, ExchangeQuote, ExchangeQuoteRequest};
use cardvault_core::traits::ExchangeService;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::client::{HttpClient, Upstream};

pub struct HttpExchangeService {
    client: HttpClient,
}

impl HttpExchangeService {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, AppError> {
        Ok(Self {
            client: HttpClient::new(base_url, api_key, timeout_secs, Upstream::Exchange)?,
        })
    }
}

fn validate_quote(quote: &ExchangeQuote) -> Result<(), AppError> {
    if quote.reference.is_empty() {
        return Err(AppError::Exchange("Quote has no reference".to_string()));
    }
    if quote.usd_amount_after_exchange <= Decimal::ZERO {
        return Err(AppError::Exchange(format!(
            "Quote {} converts to a non-positive amount",
            quote.reference
        )));
    }
    Ok(())
}

#[async_trait]
impl ExchangeService for HttpExchangeService {
    #[instrument(skip(self, request), fields(from = %request.from_currency, to = %request.to_currency))]
    async fn initialize(&self, request: &ExchangeQuoteRequest) -> Result<ExchangeQuote, AppError> {
        let quote: ExchangeQuote = self.client.post("/exchanges", request).await?;
        validate_quote(&quote)?;

        info!(
            exchange_reference = %quote.reference,
            usd_amount = %quote.usd_amount_after_exchange,
            exchange_fee = %quote.exchange_fee,
            "Exchange quote issued"
        );
        Ok(quote)
    }

    #[instrument(skip(self))]
    async fn execute(&self, reference: &str) -> Result<ExchangeExecution, AppError> {
        let execution: ExchangeExecution = self
            .client
            .post(&format!("/exchanges/{}/execute", reference), &serde_json::json!({}))
            .await?;

        if execution.reference != reference {
            warn!(
                requested = %reference,
                returned = %execution.reference,
                "Exchange execution returned a different reference"
            );
        }
        Ok(execution)
    }
}

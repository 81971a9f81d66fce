//! HTTP adapters for CardVault's external collaborators
//!
//! Each adapter implements one of the collaborator traits from
//! `cardvault_core::traits` on top of a shared [`client::HttpClient`].

pub mod card_provider;
pub mod client;
pub mod exchange;
pub mod notifier;
pub mod wallet;

pub use card_provider::HttpCardProvider;
pub use client::{HttpClient, Upstream};
pub use exchange::HttpExchangeService;
pub use notifier::TracingNotifier;
pub use wallet::{HttpBlockchainWallet, HttpFiatWallet};

use cardvault_core::config::ProvidersConfig;
use cardvault_core::error::AppError;
use cardvault_core::traits::{BlockchainWallet, CardProvider, ExchangeService, FiatWallet, Notifier};
use std::sync::Arc;

/// All collaborators, ready to hand to the service layer
#[derive(Clone)]
pub struct Providers {
    pub card_provider: Arc<dyn CardProvider>,
    pub fiat_wallet: Arc<dyn FiatWallet>,
    pub blockchain_wallet: Arc<dyn BlockchainWallet>,
    pub exchange: Arc<dyn ExchangeService>,
    pub notifier: Arc<dyn Notifier>,
}

impl Providers {
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, AppError> {
        let key = config.api_key.as_str();
        let timeout = config.timeout_secs;

        Ok(Self {
            card_provider: Arc::new(HttpCardProvider::new(
                &config.card_provider_url,
                key,
                timeout,
            )?),
            fiat_wallet: Arc::new(HttpFiatWallet::new(&config.fiat_wallet_url, key, timeout)?),
            blockchain_wallet: Arc::new(HttpBlockchainWallet::new(
                &config.blockchain_wallet_url,
                key,
                timeout,
            )?),
            exchange: Arc::new(HttpExchangeService::new(&config.exchange_url, key, timeout)?),
            notifier: Arc::new(TracingNotifier),
        })
    }
}

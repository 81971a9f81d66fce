//! Shared handler state

use cardvault_services::{
    CardLifecycleService, CrossCurrencyFundingService, DisputeService, FundingService,
    IssuanceFeeService,
};
use std::sync::Arc;

/// Services reachable from the HTTP handlers, registered once as `web::Data`
#[derive(Clone)]
pub struct AppState {
    pub issuance_fees: Arc<IssuanceFeeService>,
    pub funding: Arc<FundingService>,
    pub cross_currency: Arc<CrossCurrencyFundingService>,
    pub lifecycle: Arc<CardLifecycleService>,
    pub disputes: Arc<DisputeService>,
}

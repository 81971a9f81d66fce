//! Funding handlers
//!
//! Synchronous halves of card funding. The rail or exchange leg runs later
//! on the job queue.

use crate::dto::{
    ApiResponse, ExchangeFundingResponse, ExchangeQuoteResponse, ExecuteExchangeRequest,
    FundCardRequest, FundingResponse, InitializeExchangeRequest, SettlementResponse,
};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use cardvault_auth::{AdminUser, AuthenticatedUser};
use cardvault_core::money::to_minor_units;
use cardvault_core::AppError;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Fund a card from the user's fiat wallet or blockchain wallet
///
/// POST /api/v1/cards/{id}/fund
#[instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn fund_card(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<FundCardRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Funding validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let rail = req.rail()?;
    let amount = to_minor_units(req.amount)?;
    debug!(amount, rail = %rail, "Funding card");

    let receipt = state
        .funding
        .request_funding(user.user_id, path.into_inner(), amount, rail)
        .await?;

    Ok(HttpResponse::Accepted().json(ApiResponse::with_message(
        FundingResponse::from(receipt),
        "Funding queued",
    )))
}

/// Quote a cross-currency funding
///
/// POST /api/v1/cards/{id}/fund/exchange/initialize
#[instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn initialize_exchange(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<InitializeExchangeRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Exchange quote validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let context = state
        .cross_currency
        .initialize(user.user_id, path.into_inner(), req.into_inner().into())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(ExchangeQuoteResponse::from(context))))
}

/// Execute a previously quoted cross-currency funding
///
/// POST /api/v1/cards/{id}/fund/exchange/execute
#[instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn execute_exchange(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<ExecuteExchangeRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Exchange execution validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let receipt = state
        .cross_currency
        .execute(user.user_id, path.into_inner(), &req.exchange_reference)
        .await?;

    Ok(HttpResponse::Accepted().json(ApiResponse::with_message(
        ExchangeFundingResponse::from(receipt),
        "Exchange queued",
    )))
}

/// Credit a pending funding once its deposit has arrived
///
/// POST /api/v1/funding/{card_transaction_id}/complete
#[instrument(skip(state, admin), fields(admin_id = %admin.user_id))]
pub async fn complete_funding(
    admin: AdminUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let outcome = state.funding.complete_funding(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(SettlementResponse::from(outcome))))
}

/// Configure funding routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/cards/{id}/fund", web::post().to(fund_card))
        .route(
            "/cards/{id}/fund/exchange/initialize",
            web::post().to(initialize_exchange),
        )
        .route(
            "/cards/{id}/fund/exchange/execute",
            web::post().to(execute_exchange),
        )
        .route(
            "/funding/{card_transaction_id}/complete",
            web::post().to(complete_funding),
        );
}

//! Card handlers
//!
//! Freeze, cancel, re-issue and issuance-fee endpoints.

use crate::dto::{ApiResponse, CardResponse, ReissueRequest, ReissueResponse, TransactionResponse};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use cardvault_auth::{AdminUser, AuthenticatedUser};
use cardvault_core::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

async fn set_frozen(
    state: &AppState,
    user: &AuthenticatedUser,
    card_id: Uuid,
    frozen: bool,
) -> Result<HttpResponse, AppError> {
    let card = state.lifecycle.set_frozen(user.user_id, card_id, frozen).await?;
    let message = if frozen { "Card frozen" } else { "Card unfrozen" };
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(CardResponse::from(card), message)))
}

/// Freeze a card
///
/// POST /api/v1/cards/{id}/freeze
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn freeze_card(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    set_frozen(&state, &user, path.into_inner(), true).await
}

/// Unfreeze a card
///
/// POST /api/v1/cards/{id}/unfreeze
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn unfreeze_card(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    set_frozen(&state, &user, path.into_inner(), false).await
}

/// Cancel a card
///
/// POST /api/v1/cards/{id}/cancel
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn cancel_card(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let card = state.lifecycle.cancel_card(user.user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        CardResponse::from(card),
        "Card canceled",
    )))
}

/// Cancel a card and move its balance to a replacement
///
/// POST /api/v1/cards/{id}/reissue
#[instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn reissue_card(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<ReissueRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Reissue validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let outcome = state
        .lifecycle
        .reissue(user.user_id, path.into_inner(), req.new_card_id)
        .await?;

    if outcome.transfer.is_none() && outcome.canceled_card.balance != 0 {
        warn!(
            card_id = %outcome.canceled_card.id,
            balance = outcome.canceled_card.balance,
            "Card re-issued without balance transfer"
        );
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(ReissueResponse::from(outcome))))
}

/// Charge the card issuance fee
///
/// POST /api/v1/cards/{id}/issuance-fee
#[instrument(skip(state, admin), fields(admin_id = %admin.user_id))]
pub async fn charge_issuance_fee(
    admin: AdminUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let card_id = path.into_inner();
    let outcome = state.issuance_fees.charge_issuance_fee(card_id).await?;

    match outcome {
        Some(outcome) => {
            info!(card_id = %card_id, entry_id = %outcome.card_entry.id, "Issuance fee charged by admin");
            Ok(HttpResponse::Ok().json(ApiResponse::with_message(
                TransactionResponse::from(outcome.card_entry),
                "Issuance fee charged",
            )))
        }
        None => Ok(HttpResponse::Ok().json(ApiResponse::with_message(
            serde_json::Value::Null,
            "Issuance fee waived",
        ))),
    }
}

/// Configure card routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/cards/{id}/freeze", web::post().to(freeze_card))
        .route("/cards/{id}/unfreeze", web::post().to(unfreeze_card))
        .route("/cards/{id}/cancel", web::post().to(cancel_card))
        .route("/cards/{id}/reissue", web::post().to(reissue_card))
        .route("/cards/{id}/issuance-fee", web::post().to(charge_issuance_fee));
}

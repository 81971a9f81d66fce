//! Transaction and dispute handlers

use crate::dto::{ApiResponse, CreateDisputeRequest, DisputeResponse, TransactionResponse};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use cardvault_auth::AuthenticatedUser;
use cardvault_core::AppError;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// GET /api/v1/transactions/{id}
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get_transaction(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let entry = state
        .disputes
        .find_transaction(user.user_id, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(TransactionResponse::from(entry))))
}

/// GET /api/v1/transactions/{id}/dispute-eligibility
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn dispute_eligibility(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let eligibility = state
        .disputes
        .eligibility(user.user_id, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(eligibility)))
}

/// POST /api/v1/transactions/{id}/disputes
#[instrument(skip(state, user, req), fields(user_id = %user.user_id))]
pub async fn create_dispute(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<CreateDisputeRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Dispute validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let created = state
        .disputes
        .create_dispute(user.user_id, path.into_inner(), req.into_inner().evidence)
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::with_message(
        DisputeResponse::from(created),
        "Dispute created",
    )))
}

/// GET /api/v1/disputes/{id}
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get_dispute(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let details = state
        .disputes
        .get_dispute(user.user_id, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(DisputeResponse::from(details))))
}

/// Configure transaction and dispute routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/transactions/{id}", web::get().to(get_transaction))
        .route(
            "/transactions/{id}/dispute-eligibility",
            web::get().to(dispute_eligibility),
        )
        .route("/transactions/{id}/disputes", web::post().to(create_dispute))
        .route("/disputes/{id}", web::get().to(get_dispute));
}

use axum::{extract::Query, http::StatusCode, Extension, Json};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::{NewWithdrawal, Store};
use crate::tx;

use super::models::{
    CreateWithdrawalRequest, CreateWithdrawalResponse, ListQuery, ListWithdrawalsResponse,
    WithdrawalView,
};

/// Intake: validates the request against custodied addresses and registered
/// tokens, then creates the PENDING row the submission worker picks up.
pub async fn create_withdrawal(
    Extension(store): Extension<Arc<dyn Store>>,
    Json(payload): Json<CreateWithdrawalRequest>,
) -> Result<Json<CreateWithdrawalResponse>, (StatusCode, String)> {
    let from_address = payload.from_address.trim().to_lowercase();
    let to_address = payload.to_address.trim().to_lowercase();

    tx::validate_destination(&from_address)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    tx::validate_destination(&to_address)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    if from_address == to_address {
        return Err((
            StatusCode::BAD_REQUEST,
            "The addresses cannot be the same".to_string(),
        ));
    }

    if payload.amount <= rust_decimal::Decimal::ZERO {
        return Err((
            StatusCode::BAD_REQUEST,
            "Amount must be positive".to_string(),
        ));
    }

    let address = store
        .find_active_address(&from_address)
        .await
        .map_err(|e| {
            error!("Database error resolving source address: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "From address is not custodied here".to_string(),
            )
        })?;

    let token = store
        .find_active_token_by_symbol(&payload.symbol)
        .await
        .map_err(|e| {
            error!("Database error resolving token: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
        })?
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "Invalid token symbol".to_string()))?;

    if payload.amount.normalize().scale() > token.decimals as u32 {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Amount precision exceeds {} decimals", token.decimals),
        ));
    }

    let withdrawal = store
        .create_withdrawal(NewWithdrawal {
            address_id: address.id,
            to_address,
            token_id: token.id,
            amount: payload.amount,
        })
        .await
        .map_err(|e| {
            error!("Failed to create withdrawal: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create withdrawal".to_string(),
            )
        })?;

    info!(withdrawal_id = withdrawal.id, "Withdrawal created");

    Ok(Json(CreateWithdrawalResponse {
        withdrawal: WithdrawalView::from(withdrawal),
    }))
}

/// Listing projection: newest first, page/page_size pagination with the page
/// clamped to the last non-empty one.
pub async fn list_withdrawals(
    Extension(store): Extension<Arc<dyn Store>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListWithdrawalsResponse>, (StatusCode, String)> {
    let page_size = query.page_size.clamp(1, 1000);
    let mut page = query.page.max(1);

    let total = store.count_withdrawals().await.map_err(|e| {
        error!("Database error counting withdrawals: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
    })?;

    if total == 0 {
        return Ok(Json(ListWithdrawalsResponse {
            withdrawals: vec![],
            total: 0,
            page,
            page_size,
        }));
    }

    let max_pages = (total + page_size - 1) / page_size;
    if page > max_pages {
        page = max_pages;
    }

    let withdrawals = store
        .list_withdrawals((page - 1) * page_size, page_size)
        .await
        .map_err(|e| {
            error!("Database error listing withdrawals: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
        })?;

    Ok(Json(ListWithdrawalsResponse {
        withdrawals: withdrawals.into_iter().map(WithdrawalView::from).collect(),
        total,
        page,
        page_size,
    }))
}

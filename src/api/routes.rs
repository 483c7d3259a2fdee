use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::Store;

use super::handlers::{create_withdrawal, list_withdrawals};

pub fn router(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/withdrawals", post(create_withdrawal))
        .route("/withdrawals", get(list_withdrawals))
        .layer(Extension(store))
        .layer(TraceLayer::new_for_http())
}

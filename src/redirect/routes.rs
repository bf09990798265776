use axum::{http::StatusCode, middleware, routing::get, Router};
use std::sync::Arc;

use crate::service::LinkService;

use super::handlers::{health_check, redirect_url, RedirectState};
use super::middleware::record_request_start;

pub fn create_redirect_router(service: Arc<LinkService>, redirect_status: StatusCode) -> Router {
    let state = Arc::new(RedirectState {
        service,
        redirect_status,
    });

    Router::new()
        .route("/", get(health_check))
        .route("/{code}", get(redirect_url))
        .layer(middleware::from_fn(record_request_start))
        .with_state(state)
}

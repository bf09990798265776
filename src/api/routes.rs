use axum::{
    http::{header, HeaderName, Method},
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::service::LinkService;

use super::handlers::{
    create_link, deactivate_link, delete_link, get_clicks, get_link, get_overview, get_stats,
    health_check, list_links, reactivate_link, AppState, OWNER_HEADER,
};

pub fn create_api_router(service: Arc<LinkService>) -> Router {
    let state = Arc::new(AppState { service });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(OWNER_HEADER)]);

    let links = Router::new()
        .route("/links", get(list_links).post(create_link))
        .route("/links/{slug}", get(get_link).delete(delete_link))
        .route("/stats", get(get_overview))
        .route("/links/{slug}/stats", get(get_stats))
        .route("/links/{slug}/clicks", get(get_clicks))
        .route("/links/{slug}/deactivate", put(deactivate_link))
        .route("/links/{slug}/reactivate", put(reactivate_link))
        .with_state(state);

    Router::new()
        .nest(
            "/api",
            Router::new().route("/health", get(health_check)).merge(links),
        )
        .layer(cors)
}

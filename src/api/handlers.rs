use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::{OwnerOverview, StatisticsReport, TimeRange, TimeSeriesPoint};
use crate::error::ServiceError;
use crate::models::{CreateLinkRequest, ShortLink};
use crate::service::LinkService;

/// Header carrying the authenticated owner id, set by the fronting proxy
pub const OWNER_HEADER: &str = "x-owner-id";

pub struct AppState {
    pub service: Arc<LinkService>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Generation(_)
            | ServiceError::Aggregation { .. }
            | ServiceError::SlugExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        error_response(status, self.to_string())
    }
}

/// Owner of the request, read from the `x-owner-id` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub i64);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(Owner)
            .ok_or_else(|| {
                error_response(
                    StatusCode::UNAUTHORIZED,
                    format!("missing or invalid {OWNER_HEADER} header"),
                )
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct ClicksQuery {
    #[serde(default)]
    pub range: TimeRange,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub search: Option<String>,
}

/// Create a new short link
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<ShortLink>), ServiceError> {
    let created = state
        .service
        .shorten(owner_id, &payload.url, payload.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List the caller's links, newest first, filtered by `?search=`
pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ShortLink>>, ServiceError> {
    let links = state
        .service
        .list(owner_id, query.search.as_deref())
        .await?;
    Ok(Json(links))
}

/// Visit totals across all of the caller's links
pub async fn get_overview(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
) -> Result<Json<OwnerOverview>, ServiceError> {
    let overview = state.service.owner_statistics(owner_id).await?;
    Ok(Json(overview))
}

/// Get a single link
pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Path(slug): Path<String>,
) -> Result<Json<ShortLink>, ServiceError> {
    let link = state.service.get_owned(owner_id, &slug).await?;
    Ok(Json(ShortLink {
        short_url: link.short_url(state.service.short_domain()),
        link,
    }))
}

/// Full statistics report for a link
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Path(slug): Path<String>,
) -> Result<Json<StatisticsReport>, ServiceError> {
    let report = state.service.statistics_detail(owner_id, &slug).await?;
    Ok(Json(report))
}

/// Gap-filled click chart for `?range=day|week|month`
pub async fn get_clicks(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Path(slug): Path<String>,
    Query(query): Query<ClicksQuery>,
) -> Result<Json<Vec<TimeSeriesPoint>>, ServiceError> {
    let points = state
        .service
        .click_over_time(owner_id, &slug, query.range)
        .await?;
    Ok(Json(points))
}

/// Delete a link and its visits
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Path(slug): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.service.delete(owner_id, &slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deactivate a link; its redirects answer 410 afterwards
pub async fn deactivate_link(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Path(slug): Path<String>,
) -> Result<Json<ShortLink>, ServiceError> {
    set_active(&state, owner_id, &slug, false).await
}

pub async fn reactivate_link(
    State(state): State<Arc<AppState>>,
    Owner(owner_id): Owner,
    Path(slug): Path<String>,
) -> Result<Json<ShortLink>, ServiceError> {
    set_active(&state, owner_id, &slug, true).await
}

async fn set_active(
    state: &AppState,
    owner_id: i64,
    slug: &str,
    active: bool,
) -> Result<Json<ShortLink>, ServiceError> {
    let link = state.service.set_active(owner_id, slug, active).await?;
    Ok(Json(ShortLink {
        short_url: link.short_url(state.service.short_domain()),
        link,
    }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

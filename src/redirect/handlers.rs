use axum::{
    extract::{ConnectInfo, Path, State},
    http::{
        header::{self, HeaderMap, HeaderValue},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::middleware::RequestStart;
use crate::error::ServiceError;
use crate::models::RequestInfo;
use crate::service::LinkService;

pub struct RedirectState {
    pub service: Arc<LinkService>,
    pub redirect_status: StatusCode,
}

/// Redirect to the destination of a short code
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    Extension(RequestStart(request_start)): Extension<RequestStart>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let handler_start = Instant::now();

    let link = match state.service.expand(&code).await {
        Ok(link) => link,
        Err(ServiceError::NotFound) => {
            return (StatusCode::NOT_FOUND, "Link not found").into_response()
        }
        Err(err) => {
            tracing::error!(short_code = %code, error = %err, "failed to resolve short code");
            let status = match err {
                ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, "Internal server error").into_response();
        }
    };

    if !link.is_active {
        return (StatusCode::GONE, "This link has been deactivated").into_response();
    }

    let location = match HeaderValue::from_str(&link.destination) {
        Ok(location) => location,
        Err(err) => {
            tracing::error!(short_code = %code, error = %err, "destination is not a valid header value");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    state
        .service
        .track_redirect(&link, request_info(&headers, addr));

    let handler_time = handler_start.elapsed();
    let total_time = request_start.elapsed();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::LOCATION, location);
    response_headers.insert("x-robots-tag", HeaderValue::from_static("noindex"));
    response_headers.insert(
        "x-linkstat-timing-total-ms",
        HeaderValue::from(total_time.as_millis() as u64),
    );
    response_headers.insert(
        "x-linkstat-timing-handler-ms",
        HeaderValue::from(handler_time.as_millis() as u64),
    );

    (state.redirect_status, response_headers).into_response()
}

/// Capture what the recorder needs before the response goes out.
///
/// The forwarded-for chain is kept as sent; the socket address is only used
/// when no proxy header is present.
fn request_info(headers: &HeaderMap, addr: SocketAddr) -> RequestInfo {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string());

    RequestInfo::new(
        ip_address,
        header_str(header::USER_AGENT).unwrap_or_default(),
        header_str(header::REFERER),
    )
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

#[cfg(test)]
mod tests {
    use super::*;

    fn socket() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 9], 40000))
    }

    #[test]
    fn test_request_info_prefers_forwarded_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        headers.insert(header::REFERER, HeaderValue::from_static("https://t.co/"));

        let info = request_info(&headers, socket());
        assert_eq!(info.ip_address, "1.2.3.4, 5.6.7.8");
        assert_eq!(info.client_ip(), "1.2.3.4");
        assert_eq!(info.user_agent, "curl/8.0");
        assert_eq!(info.referer.as_deref(), Some("https://t.co/"));
    }

    #[test]
    fn test_request_info_falls_back_to_socket() {
        let info = request_info(&HeaderMap::new(), socket());
        assert_eq!(info.ip_address, "10.0.0.9");
        assert_eq!(info.user_agent, "");
        assert_eq!(info.referer, None);
    }
}

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;

/// When the request entered the redirect router
#[derive(Copy, Clone)]
pub struct RequestStart(pub Instant);

pub async fn record_request_start(mut request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_owned();
    request.extensions_mut().insert(RequestStart(start));

    let response = next.run(request).await;
    tracing::debug!(
        path = %path,
        status = response.status().as_u16(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "redirect request served"
    );
    response
}

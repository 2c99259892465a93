// Response middleware

use axum::{
    http::{header, HeaderValue},
    response::Response,
};
use tower_http::cors::CorsLayer;

/// Stamp `Access-Control-Allow-Origin: *` on every response, errors included.
///
/// `CorsLayer` only answers requests that carry an `Origin` header; plain
/// clients (curl, the poller) still expect the header to be present.
pub async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .or_insert(HeaderValue::from_static("*"));
    response
}

/// Preflight handling for browser clients.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}

use crate::tracing::RequestId;
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Header name for the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware to add request ID to every request
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Reuse a caller-supplied id only when it is a valid header value
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(RequestId::new)
        .unwrap_or_default();

    let header_value = HeaderValue::from_str(request_id.as_str()).ok();
    if let Some(value) = header_value.clone() {
        request
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    request.extensions_mut().insert(request_id.clone());

    let mut response =
        crate::tracing::scope_request_id(request_id, async move { next.run(request).await })
            .await;

    if let Some(value) = header_value {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}

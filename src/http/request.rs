//! Request ID propagation.
//!
//! # Responsibilities
//! - Reuse a caller-supplied `x-request-id` or generate a UUID v4
//! - Make the ID visible to handlers and spans (request extension)
//! - Echo the ID on the response
//!
//! The layers come from tower-http; this module only fixes the header name
//! and gives handlers a typed accessor.

use axum::http::{HeaderName, Request};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Read the request ID back out of a request.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.extensions()
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
    }
}

/// Assigns an ID to requests that arrive without one. Must wrap [`propagate_layer`].
pub fn set_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Copies the request's ID onto its response.
pub fn propagate_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

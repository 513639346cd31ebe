//! Invocation results and error bodies.
//!
//! # Design Decisions
//! - The JSON `statusCode` and the HTTP status always agree
//! - `body` is a short human-readable line; counts live in `summary`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::reconcile::{BatchReport, BatchSummary, PayloadError};

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

impl InvocationResponse {
    pub fn from_report(report: &BatchReport) -> Self {
        let status = report.status();
        let s = &report.summary;
        Self {
            status_code: status.status_code(),
            body: format!(
                "{}: {} records, {} applied, {} malformed, {} unknown action, {} cache errors, {} skipped",
                status.as_str(),
                s.total,
                s.applied,
                s.malformed,
                s.unknown_action,
                s.cache_errors,
                s.skipped
            ),
            summary: Some(report.summary.clone()),
        }
    }

    pub fn from_payload_error(error: &PayloadError) -> Self {
        Self {
            status_code: 400,
            body: error.to_string(),
            summary: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for InvocationResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Error body for the query endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

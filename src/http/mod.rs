//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (request ID)
//!     → server.rs (limits, timeout, trace span, handler dispatch)
//!     → reconcile (decode payload, apply records)
//!     → response.rs (InvocationResponse, status code)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::InvocationResponse;
pub use server::HttpServer;

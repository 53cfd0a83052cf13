//! Middleware module
//!
//! Contains HTTP middleware for caller identity resolution and request
//! logging.

pub mod identity;
pub mod logging;

pub use identity::{resolve_identity, CallerIdentity, Tier};
pub use logging::{log_request, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};

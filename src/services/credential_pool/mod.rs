//! Credential Pool Module
//!
//! Manages the small fixed pool of upstream API keys: health tracking,
//! least-recently-used selection, and classification-driven demotion.
//! Health state is process-local and ephemeral; it resets on restart and is
//! not shared across concurrently running instances.
//!
//! The pool is an owned component constructed once at startup and handed to
//! the dispatcher, so tests can build pools with their own configurations.

mod credential;
mod pool;

pub use credential::{CredentialHealth, FailureKind, UpstreamCredential};
pub use pool::{CredentialPool, CredentialStatus, SelectedCredential};

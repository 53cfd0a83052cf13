//! Identity & session management
//!
//! Contains the GitHub OAuth client (web authorization-code and device
//! flows) and the store-backed session manager that turns OAuth completions
//! into bearer sessions.

pub mod github;
pub mod session;

pub use github::{DeviceCodeGrant, DevicePoll, GitHubOAuth, GitHubUser, OAuthError};
pub use session::{Session, SessionManager, SessionUser};

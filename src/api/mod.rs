//! API endpoint handlers module
//!
//! Contains all HTTP endpoint handler implementations.

pub mod auth;
pub mod generate;
pub mod health;
pub mod limits;

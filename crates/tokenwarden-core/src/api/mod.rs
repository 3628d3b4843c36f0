//! HTTP client module for calls made on behalf of the session.
//!
//! This module provides the `AuthClient`, which attaches the session's
//! bearer token to every call, renews it when it has expired, and replays
//! a call once after a 401.

pub mod client;
pub mod error;

pub use client::AuthClient;
pub use error::ApiError;

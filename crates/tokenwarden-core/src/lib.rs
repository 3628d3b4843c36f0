//! tokenwarden - client-side session management for role-gated backends.
//!
//! The crate keeps a short-lived access token and a longer-lived renewal
//! token, notices when the access token has expired, and renews it without
//! interrupting callers. Concurrent renewals collapse into one exchange.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenwarden_core::{AuthClient, ChannelNavigator, Config, SessionContext};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let session = Arc::new(SessionContext::new(config.open_store()?));
//! let (navigator, _redirects) = ChannelNavigator::new();
//! let client = AuthClient::new(config, session, Arc::new(navigator))?;
//!
//! client.login("alice", "secret").await?;
//! let branches: serde_json::Value = client.get_json("/branches").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod navigation;
pub mod utils;

#[cfg(test)]
mod testutil;

pub use api::{ApiError, AuthClient};
pub use auth::{
    landing_route, CredentialRecord, CredentialStore, GuardDecision, Renewer, RouteGuard,
    SessionContext, SessionState, TokenInfo,
};
pub use config::{Config, RouteAccess, StoreKind};
pub use navigation::{ChannelNavigator, Navigator};

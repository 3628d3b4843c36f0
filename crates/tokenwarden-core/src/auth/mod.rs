//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for the credential record (file, keyring or memory)
//! - `token`: claims decoding and expiry evaluation for bearer tokens
//! - `SessionContext`: the in-memory session and its only login/logout surface
//! - `Renewer`: single-flight renewal of expired access tokens
//! - `RouteGuard`: role-based render/redirect decisions

pub mod credentials;
pub mod guard;
pub mod renewal;
pub mod session;
pub mod token;

pub use credentials::{
    CredentialBackend, CredentialField, CredentialRecord, CredentialStore, FileBackend,
    KeyringBackend, MemoryBackend,
};
pub use guard::{landing_route, GuardDecision, RouteGuard};
pub use renewal::Renewer;
pub use session::{SessionContext, SessionState};
pub use token::{Claims, TokenInfo};

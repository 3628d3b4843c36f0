//! In-memory session state mirrored from the credential store.
//!
//! [`SessionContext`] is the only place credentials are written:
//! `login` persists and publishes a record, `logout` clears both copies.
//! Everything else reads through it.

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use super::credentials::{CredentialField, CredentialRecord, CredentialStore};
use super::token::TokenInfo;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub username: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub roles: Vec<String>,
}

impl SessionState {
    fn from_record(record: &CredentialRecord) -> Self {
        Self {
            username: Some(record.username.clone()),
            access_token: Some(record.access_token.clone()),
            refresh_token: Some(record.refresh_token.clone()),
            roles: record.roles.clone(),
        }
    }

    /// An access token is present (it may still be expired)
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// True if any of the session's roles appears in `allowed`
    pub fn has_any_role(&self, allowed: &[String]) -> bool {
        self.roles.iter().any(|role| allowed.contains(role))
    }
}

pub struct SessionContext {
    store: CredentialStore,
    state: watch::Sender<SessionState>,
    // Keeps store and memory updates from interleaving
    writer: Mutex<()>,
}

impl SessionContext {
    /// Initialize from whatever the store currently holds.
    pub fn new(store: CredentialStore) -> Self {
        let initial = match store.load() {
            Some(record) => {
                debug!(username = %record.username, "Restored session from credential store");
                SessionState::from_record(&record)
            }
            None => {
                debug!("No stored session");
                SessionState::default()
            }
        };
        let (state, _) = watch::channel(initial);
        Self {
            store,
            state,
            writer: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(CredentialStore::in_memory())
    }

    /// Persist the record and make it the current session.
    ///
    /// Memory is only updated once the store write succeeded.
    pub fn login(&self, record: CredentialRecord) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.store
            .save(&record)
            .context("Failed to persist session credentials")?;
        self.state.send_replace(SessionState::from_record(&record));
        info!(username = %record.username, roles = ?record.roles, "Session established");
        Ok(())
    }

    /// Drop the current session from memory and the store.
    pub fn logout(&self) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.state.send_replace(SessionState::default());
        if let Some(username) = previous.username {
            info!(username = %username, "Session cleared");
        }
        self.store
            .clear()
            .context("Failed to clear session credentials")
    }

    /// Like [`login`](Self::login), but only while the stored renewal token
    /// is still `expected`. Returns `false` and writes nothing otherwise.
    pub fn login_if_current(&self, expected: &str, record: CredentialRecord) -> Result<bool> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.holds_refresh_token(expected) {
            debug!("Session changed underneath, not storing credentials");
            return Ok(false);
        }
        self.store
            .save(&record)
            .context("Failed to persist session credentials")?;
        self.state.send_replace(SessionState::from_record(&record));
        info!(username = %record.username, roles = ?record.roles, "Session updated");
        Ok(true)
    }

    /// Like [`logout`](Self::logout), but only while the stored renewal token
    /// is still `expected`.
    pub fn logout_if_current(&self, expected: &str) -> Result<bool> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.holds_refresh_token(expected) {
            debug!("Session changed underneath, leaving it in place");
            return Ok(false);
        }
        let previous = self.state.send_replace(SessionState::default());
        if let Some(username) = previous.username {
            info!(username = %username, "Session cleared");
        }
        self.store
            .clear()
            .context("Failed to clear session credentials")?;
        Ok(true)
    }

    fn holds_refresh_token(&self, expected: &str) -> bool {
        self.store.get(CredentialField::RefreshToken).as_deref() == Some(expected)
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn username(&self) -> Option<String> {
        self.state.borrow().username.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.borrow().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.borrow().refresh_token.clone()
    }

    pub fn roles(&self) -> Vec<String> {
        self.state.borrow().roles.clone()
    }

    /// Watch for login/logout; the receiver starts at the current state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Read-only view of the backing store
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn token_info(&self) -> TokenInfo {
        self.token_info_at(Utc::now())
    }

    pub fn token_info_at(&self, now: DateTime<Utc>) -> TokenInfo {
        let state = self.state.borrow();
        TokenInfo::at(
            state.access_token.as_deref(),
            state.refresh_token.as_deref(),
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MemoryBackend;
    use crate::auth::CredentialBackend;

    fn guest() -> CredentialRecord {
        CredentialRecord::new("a", "t1", "r1", ["ROLE_GUEST"])
    }

    #[test]
    fn test_login_then_logout_leaves_everything_empty() {
        let session = SessionContext::in_memory();
        session.login(guest()).unwrap();

        assert_eq!(session.username().as_deref(), Some("a"));
        assert_eq!(session.access_token().as_deref(), Some("t1"));
        assert_eq!(session.store().load(), Some(guest()));

        session.logout().unwrap();

        assert_eq!(session.state(), SessionState::default());
        assert!(session.store().is_empty());
        for field in CredentialField::ALL {
            assert!(session.store().get(field).is_none());
        }
    }

    #[test]
    fn test_new_restores_complete_record() {
        let store = CredentialStore::in_memory();
        store.save(&guest()).unwrap();

        let session = SessionContext::new(store);
        assert!(session.state().is_authenticated());
        assert_eq!(session.roles(), vec!["ROLE_GUEST"]);
        assert_eq!(session.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_new_ignores_partial_record() {
        let backend = MemoryBackend::new();
        backend
            .set_many(&[("accessToken", "t1".into())])
            .unwrap();

        let session = SessionContext::new(CredentialStore::new(backend));
        assert!(!session.state().is_authenticated());
        assert!(session.roles().is_empty());
    }

    #[test]
    fn test_login_is_visible_to_subscribers() {
        let session = SessionContext::in_memory();
        let mut rx = session.subscribe();
        assert!(!rx.borrow_and_update().is_authenticated());

        session.login(guest()).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().username.as_deref(), Some("a"));

        session.logout().unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow().is_authenticated());
    }

    #[test]
    fn test_conditional_login_requires_matching_refresh_token() {
        let session = SessionContext::in_memory();
        let renewed = CredentialRecord::new("a", "t2", "r2", ["ROLE_GUEST"]);

        assert!(!session.login_if_current("r1", renewed.clone()).unwrap());
        assert!(session.store().is_empty());

        session.login(guest()).unwrap();
        assert!(!session.login_if_current("other", renewed.clone()).unwrap());
        assert_eq!(session.access_token().as_deref(), Some("t1"));

        assert!(session.login_if_current("r1", renewed.clone()).unwrap());
        assert_eq!(session.store().load(), Some(renewed));
        assert_eq!(session.access_token().as_deref(), Some("t2"));
    }

    #[test]
    fn test_conditional_logout_leaves_newer_session() {
        let session = SessionContext::in_memory();
        session
            .login(CredentialRecord::new("b", "tb", "rb", ["ROLE_ADMIN"]))
            .unwrap();

        assert!(!session.logout_if_current("r1").unwrap());
        assert_eq!(session.username().as_deref(), Some("b"));

        assert!(session.logout_if_current("rb").unwrap());
        assert_eq!(session.state(), SessionState::default());
        assert!(session.store().is_empty());
    }

    #[test]
    fn test_has_any_role() {
        let session = SessionContext::in_memory();
        session
            .login(CredentialRecord::new("a", "t", "r", ["ROLE_GUEST", "ROLE_ADMIN"]))
            .unwrap();
        let state = session.state();

        assert!(state.has_any_role(&["ROLE_ADMIN".to_string()]));
        assert!(!state.has_any_role(&["ROLE_SUPERADMIN".to_string()]));
        assert!(!state.has_any_role(&[]));
    }

    #[test]
    fn test_token_info_reads_current_tokens() {
        let session = SessionContext::in_memory();
        assert!(session.token_info().is_empty());

        let access = crate::testutil::token_expiring_in(120);
        session
            .login(CredentialRecord::new("a", access, "opaque", ["ROLE_GUEST"]))
            .unwrap();

        let info = session.token_info();
        assert!(info.access_expires_at.is_some());
        assert!(info.refresh_expires_at.is_none());
        assert!(info.access_remaining.num_seconds() > 100);
    }
}

//! Single-flight renewal of the access token.
//!
//! [`Renewer::renew`] trades the stored renewal token for a new access
//! token. Callers that arrive while an exchange is outstanding join it
//! instead of starting another, so a burst of expired requests produces
//! exactly one call to the backend. The exchange runs as its own task:
//! dropping a waiter never cancels it for the others.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::credentials::{CredentialField, CredentialRecord};
use super::session::SessionContext;
use crate::api::ApiError;
use crate::config::Config;

/// Renewal endpoint, relative to the base URL
pub const REFRESH_PATH: &str = "/api/auth/refresh-token";

type Exchange = Shared<BoxFuture<'static, bool>>;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
}

/// Coordinates token renewal. Clone is cheap and clones share the
/// in-flight exchange.
#[derive(Clone)]
pub struct Renewer {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    endpoint: String,
    default_role: String,
    session: Arc<SessionContext>,
    in_flight: Mutex<InFlight>,
}

#[derive(Default)]
struct InFlight {
    generation: u64,
    exchange: Option<Exchange>,
}

impl Renewer {
    pub fn new(http: Client, config: &Config, session: Arc<SessionContext>) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                endpoint: config.url(REFRESH_PATH),
                default_role: config.default_role.clone(),
                session,
                in_flight: Mutex::new(InFlight::default()),
            }),
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    /// Renew the session, joining an outstanding exchange if there is one.
    ///
    /// Returns `true` once the new credentials are stored. On `false` the
    /// session has either nothing to renew with, or has been cleared.
    pub async fn renew(&self) -> bool {
        self.join_or_start().await
    }

    /// True while an exchange is outstanding
    pub fn is_renewing(&self) -> bool {
        self.inner.lock_slot().exchange.is_some()
    }

    fn join_or_start(&self) -> Exchange {
        let mut slot = self.inner.lock_slot();
        if let Some(exchange) = &slot.exchange {
            debug!("Joining in-flight token renewal");
            return exchange.clone();
        }

        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;

        // The task frees the slot itself, so a settled outcome is never
        // handed out again even if every waiter was dropped
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let renewed = inner.exchange().await;
            inner.release(generation);
            renewed
        });
        let inner = Arc::clone(&self.inner);
        let exchange = async move {
            task.await.unwrap_or_else(|e| {
                error!(error = %e, "Token renewal task failed");
                inner.release(generation);
                false
            })
        }
        .boxed()
        .shared();

        slot.exchange = Some(exchange.clone());
        exchange
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, generation: u64) {
        let mut slot = self.lock_slot();
        if slot.generation == generation {
            slot.exchange = None;
        }
    }

    async fn exchange(&self) -> bool {
        let store = self.session.store();
        let (Some(refresh_token), Some(username)) = (
            store.get(CredentialField::RefreshToken),
            store.get(CredentialField::Username),
        ) else {
            debug!("No renewal credential stored, skipping renewal");
            return false;
        };

        let response = match self.request_renewal(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Token renewal rejected, clearing session");
                return self.discard_session(&refresh_token);
            }
        };

        let record = self.renewed_record(username, refresh_token.clone(), response);
        match self.session.login_if_current(&refresh_token, record) {
            Ok(true) => {
                info!("Access token renewed");
                true
            }
            Ok(false) => self.superseded(),
            Err(e) => {
                error!(error = %e, "Failed to store renewed credentials, clearing session");
                self.discard_session(&refresh_token)
            }
        }
    }

    async fn request_renewal(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Renewal response: {}", e)))
    }

    /// Username is kept; the renewal token only changes if a new one came
    /// back; roles fall back to the stored ones, then to the default role.
    fn renewed_record(
        &self,
        username: String,
        refresh_token: String,
        response: RefreshResponse,
    ) -> CredentialRecord {
        let roles = match response.roles.filter(|r| !r.is_empty()) {
            Some(roles) => roles,
            None => {
                let stored = self.session.store().roles();
                if stored.is_empty() {
                    vec![self.default_role.clone()]
                } else {
                    stored
                }
            }
        };
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or(refresh_token);

        CredentialRecord::new(username, response.token, refresh_token, roles)
    }

    /// Clear the session this exchange was started for, and nothing newer.
    /// Always `false` unless a newer session has taken its place.
    fn discard_session(&self, refresh_token: &str) -> bool {
        match self.session.logout_if_current(refresh_token) {
            Ok(true) => false,
            Ok(false) => self.superseded(),
            Err(e) => {
                warn!(error = %e, "Failed to clear credentials after renewal failure");
                false
            }
        }
    }

    /// A logout or a new login landed while the exchange was outstanding.
    /// The result is dropped; whatever session is current now stands.
    fn superseded(&self) -> bool {
        let current = self.session.state().is_authenticated();
        debug!(current, "Session changed during renewal, discarding renewed tokens");
        current
    }
}

//! Route-level access decisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::renewal::Renewer;
use super::session::SessionContext;
use super::token;
use crate::config::{Config, RouteAccess};

/// What a route should do for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    Redirect(String),
}

impl GuardDecision {
    pub fn is_render(&self) -> bool {
        matches!(self, GuardDecision::Render)
    }
}

/// Default page after login for a role set.
pub fn landing_route(roles: &[String]) -> &'static str {
    if roles.iter().any(|r| r == "ROLE_SUPERADMIN") {
        "/super-admin"
    } else if roles.iter().any(|r| r == "ROLE_ADMIN") {
        "/admin"
    } else {
        "/user"
    }
}

pub struct RouteGuard {
    renewer: Renewer,
    login_route: String,
    unauthorized_route: String,
    routes: BTreeMap<String, RouteAccess>,
}

impl RouteGuard {
    pub fn new(renewer: Renewer, config: &Config) -> Self {
        Self {
            renewer,
            login_route: config.login_route.clone(),
            unauthorized_route: config.unauthorized_route.clone(),
            routes: config.routes.clone(),
        }
    }

    fn session(&self) -> &Arc<SessionContext> {
        self.renewer.session()
    }

    /// Decide for a route with an optional role allowlist.
    ///
    /// An expired access token is renewed before deciding; a valid one
    /// never touches the renewal path.
    pub async fn check(&self, allowed_roles: Option<&[String]>) -> GuardDecision {
        let Some(access_token) = self.session().access_token() else {
            debug!("No session, redirecting to login");
            return GuardDecision::Redirect(self.login_route.clone());
        };

        if token::is_expired(Some(&access_token)) && !self.renewer.renew().await {
            if let Err(e) = self.session().logout() {
                warn!(error = %e, "Failed to clear session");
            }
            return GuardDecision::Redirect(self.login_route.clone());
        }

        match allowed_roles {
            Some(allowed) if !self.session().state().has_any_role(allowed) => {
                debug!(?allowed, "Session lacks the required role");
                GuardDecision::Redirect(self.unauthorized_route.clone())
            }
            _ => GuardDecision::Render,
        }
    }

    /// Decide for a path from the route table; unlisted paths are public.
    pub async fn check_path(&self, path: &str) -> GuardDecision {
        match self.routes.get(path) {
            Some(access) => self.check(access.allowed_roles.as_deref()).await,
            None => GuardDecision::Render,
        }
    }
}

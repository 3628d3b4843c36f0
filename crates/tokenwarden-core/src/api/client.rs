//! Authenticated HTTP client.
//!
//! Every call made through [`AuthClient`] passes two checkpoints:
//!
//! - before dispatch, [`AuthClient::authorize`] renews an expired access
//!   token and attaches `Authorization: Bearer <token>`;
//! - after the response, [`AuthClient::execute`] answers a 401 by renewing
//!   once and replaying the original request. A second 401 is final.
//!
//! When renewal fails the session is cleared and the navigator is sent to
//! the login route.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::credentials::CredentialRecord;
use crate::auth::guard::RouteGuard;
use crate::auth::renewal::Renewer;
use crate::auth::session::SessionContext;
use crate::auth::token;
use crate::config::Config;
use crate::navigation::Navigator;

use super::ApiError;

/// Login endpoint, relative to the base URL
pub const LOGIN_PATH: &str = "/api/auth/login";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    #[serde(rename = "passwordHash")]
    password_hash: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    username: Option<String>,
    token: Option<String>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
    roles: Option<Vec<String>>,
}

impl LoginResponse {
    /// All four fields present and non-empty, at least one role
    fn into_record(self) -> Option<CredentialRecord> {
        let username = self.username.filter(|s| !s.is_empty())?;
        let token = self.token.filter(|s| !s.is_empty())?;
        let refresh_token = self.refresh_token.filter(|s| !s.is_empty())?;
        let roles = self.roles.filter(|r| !r.is_empty())?;
        Some(CredentialRecord::new(username, token, refresh_token, roles))
    }
}

/// One outgoing call and whether it has used up its 401 replay.
#[derive(Debug)]
struct Dispatch {
    original: Request,
    already_retried: bool,
}

impl Dispatch {
    fn new(original: Request) -> Self {
        Self {
            original,
            already_retried: false,
        }
    }

    /// Fresh copy of the original; `None` when the body is a stream
    fn attempt(&self) -> Option<Request> {
        self.original.try_clone()
    }
}

/// HTTP client bound to a session.
/// Clone is cheap - the connection pool, session and renewer are shared.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    config: Arc<Config>,
    session: Arc<SessionContext>,
    renewer: Renewer,
    navigator: Arc<dyn Navigator>,
}

impl AuthClient {
    pub fn new(
        config: Config,
        session: Arc<SessionContext>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let renewer = Renewer::new(http.clone(), &config, Arc::clone(&session));

        Ok(Self {
            http,
            config: Arc::new(config),
            session,
            renewer,
            navigator,
        })
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn renewer(&self) -> &Renewer {
        &self.renewer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Route guard sharing this client's session and renewer
    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(self.renewer.clone(), &self.config)
    }

    /// Exchange username and password for a session and make it current.
    ///
    /// Sent without an `Authorization` header. A response missing any
    /// credential field, or with no roles, is [`ApiError::InvalidLogin`].
    pub async fn login(&self, username: &str, password_hash: &str) -> Result<CredentialRecord, ApiError> {
        let response = self
            .http
            .post(self.config.url(LOGIN_PATH))
            .json(&LoginRequest {
                username,
                password_hash,
            })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Login response: {}", e)))?;

        let record = body.into_record().ok_or(ApiError::InvalidLogin)?;
        self.session
            .login(record.clone())
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
        Ok(record)
    }

    /// End the session locally
    pub fn logout(&self) -> Result<(), ApiError> {
        self.session
            .logout()
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))
    }

    /// Attach the current access token, renewing it first if it has expired.
    ///
    /// Calls without any token go out unauthenticated.
    pub async fn authorize(&self, request: &mut Request) -> Result<(), ApiError> {
        let mut access_token = self.session.access_token();

        if access_token
            .as_deref()
            .is_some_and(|t| token::is_expired(Some(t)))
        {
            debug!(url = %request.url(), "Access token expired, renewing before dispatch");
            if !self.renewer.renew().await {
                self.end_session();
                return Err(ApiError::SessionExpired);
            }
            access_token = self.session.access_token();
        }

        if let Some(access_token) = access_token {
            let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {}", access_token)) else {
                warn!("Stored access token is not a valid header value");
                self.end_session();
                return Err(ApiError::SessionExpired);
            };
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(())
    }

    /// Send a request through both interceptors.
    ///
    /// Non-success statuses come back as the matching [`ApiError`].
    pub async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        let mut dispatch = Dispatch::new(request);

        loop {
            let Some(mut request) = dispatch.attempt() else {
                debug!("Request body cannot be replayed, sending once");
                return self.execute_once(dispatch.original).await;
            };

            self.authorize(&mut request).await?;
            let response = self.http.execute(request).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Self::check_response(response).await;
            }

            if dispatch.already_retried {
                warn!(url = %dispatch.original.url(), "Credential rejected again after renewal");
                self.end_session();
                return Err(ApiError::from_response(response).await);
            }

            dispatch.already_retried = true;
            debug!(url = %dispatch.original.url(), "Credential rejected, renewing and retrying");
            if !self.renewer.renew().await {
                self.end_session();
                return Err(ApiError::from_response(response).await);
            }
        }
    }

    async fn execute_once(&self, mut request: Request) -> Result<Response, ApiError> {
        self.authorize(&mut request).await?;
        let response = self.http.execute(request).await?;
        Self::check_response(response).await
    }

    /// Clear whatever is left of the session and send the user to log in.
    fn end_session(&self) {
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "Failed to clear session");
        }
        self.navigator.navigate(&self.config.login_route);
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_response(response).await)
        }
    }

    fn build(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http.request(method, self.config.url(path))
    }

    async fn parse<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.build(Method::GET, path).build()?;
        let response = self.execute(request).await?;
        Self::parse(response, path).await
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.build(Method::POST, path).json(body).build()?;
        let response = self.execute(request).await?;
        Self::parse(response, path).await
    }

    pub async fn put_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.build(Method::PUT, path).json(body).build()?;
        let response = self.execute(request).await?;
        Self::parse(response, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let request = self.build(Method::DELETE, path).build()?;
        self.execute(request).await?;
        Ok(())
    }
}

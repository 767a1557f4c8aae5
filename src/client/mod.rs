//! Authenticated request pipeline.
//!
//! Every request gets the current access token attached. A 401 sends the
//! request through the single-flight refresh in [`refresh`]: one request
//! refreshes, the rest queue behind it, and all of them replay once with
//! the new token. A failed refresh ends the session.

mod refresh;
mod request;

use std::sync::Arc;
use std::time::Instant;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::{decode_identity, Identity};
use crate::configuration::ApiSettings;
use crate::error::{ApiError, ErrorContext, SessionError};
use crate::events::EventBus;
use crate::session::SessionStore;

use refresh::{RefreshCoordinator, RefreshGuard, Ticket};
use request::endpoint;

pub use request::ApiRequest;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    remember_me: bool,
}

/// Token endpoint answer. `refresh` is present on login and when the server
/// rotates refresh tokens.
#[derive(Deserialize)]
struct TokenGrant {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    refresh_path: String,
    token_path: String,
    session: Arc<SessionStore>,
    events: EventBus,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        settings: &ApiSettings,
        session: Arc<SessionStore>,
        events: EventBus,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            refresh_path: settings.refresh_path.clone(),
            token_path: settings.token_path.clone(),
            session,
            events,
            refresh: RefreshCoordinator::default(),
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// True while a token refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    /// Number of requests parked behind the refresh in flight
    pub fn queued_requests(&self) -> usize {
        self.refresh.queued()
    }

    pub async fn get(&self, path: &str) -> Result<Response, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.send(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.send(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Send a request through the pipeline.
    ///
    /// # Errors
    /// - `NonAuthFailure` for any non-2xx answer other than 401
    /// - `Unauthorized` if the request still gets a 401 after a refresh
    /// - `Session` if the refresh failed; the session has been logged out
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let context = ErrorContext::new(format!("{} {}", request.method(), request.path()));
        let result = self.execute(request, &context).await;
        if let Err(e) = &result {
            context.log_error(e);
        }
        result
    }

    async fn execute(&self, mut request: ApiRequest, context: &ErrorContext) -> Result<Response, ApiError> {
        let mut refreshed: Option<String> = None;

        loop {
            let access = refreshed.take().or_else(|| self.session.access_token());
            let response = self.dispatch(&request, access.as_deref(), context).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return into_result(response).await;
            }

            if request.is_retry() {
                return Err(ApiError::Unauthorized {
                    body: read_body(response).await,
                });
            }

            if self.is_refresh_endpoint(request.path()) {
                let error = SessionError::RefreshRejected {
                    status: Some(StatusCode::UNAUTHORIZED.as_u16()),
                    reason: read_body(response).await,
                };
                return Err(self.fail_refresh_call(error, context).await.into());
            }

            request.mark_retry();
            let token = match self.refresh.join() {
                Ticket::Queued { position, receiver } => {
                    tracing::debug!(
                        request_id = %context.request_id,
                        position = position,
                        "Waiting for token refresh"
                    );
                    match receiver.await {
                        Ok(outcome) => outcome?,
                        Err(_) => return Err(SessionError::RefreshAbandoned.into()),
                    }
                }
                Ticket::Refresher(guard) => self.lead_refresh(guard, context).await?,
            };
            refreshed = Some(token);
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        access: Option<&str>,
        context: &ErrorContext,
    ) -> Result<Response, ApiError> {
        let started = Instant::now();
        let response = request
            .build(&self.http, &self.base_url, access)
            .send()
            .await?;

        tracing::debug!(
            request_id = %context.request_id,
            method = %request.method(),
            path = %request.path(),
            status = response.status().as_u16(),
            retry = request.is_retry(),
            authenticated = access.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        Ok(response)
    }

    async fn lead_refresh(
        &self,
        guard: RefreshGuard<'_>,
        context: &ErrorContext,
    ) -> Result<String, SessionError> {
        tracing::info!(request_id = %context.request_id, "Refreshing access token");

        let outcome = match self.session.refresh_token() {
            Some(refresh) => self.request_new_access_token(&refresh).await,
            None => Err(SessionError::NoRefreshCredential),
        };

        match outcome {
            Ok(grant) => {
                match grant.refresh.as_deref() {
                    Some(rotated) => self.session.set_tokens(&grant.access, rotated),
                    None => self.session.set_access_token(&grant.access),
                }
                let resumed = guard.resolve(&grant.access);
                tracing::info!(
                    request_id = %context.request_id,
                    resumed = resumed.len(),
                    "Access token refreshed"
                );
                Ok(grant.access)
            }
            Err(error) => {
                self.session.expire(&self.events);
                let rejected = guard.reject(error.clone());
                tracing::warn!(
                    request_id = %context.request_id,
                    rejected = rejected.len(),
                    error = %error,
                    "Token refresh failed"
                );
                Err(error)
            }
        }
    }

    /// A refresh endpoint call made through the pipeline was refused.
    ///
    /// With the register idle this is a refresh failure like any other and
    /// ends the session. If a refresh is already in flight, its outcome owns
    /// the session: the call waits for it and reports the earlier failure if
    /// there was one, its own rejection otherwise.
    async fn fail_refresh_call(&self, error: SessionError, context: &ErrorContext) -> SessionError {
        match self.refresh.join() {
            Ticket::Refresher(guard) => {
                self.session.expire(&self.events);
                let rejected = guard.reject(error.clone());
                tracing::warn!(
                    request_id = %context.request_id,
                    rejected = rejected.len(),
                    error = %error,
                    "Refresh endpoint refused the credential"
                );
                error
            }
            Ticket::Queued { receiver, .. } => match receiver.await {
                Ok(Err(in_flight)) => in_flight,
                Ok(Ok(_)) => error,
                Err(_) => SessionError::RefreshAbandoned,
            },
        }
    }

    /// Bare refresh call: no credential attached, never re-enters the pipeline.
    async fn request_new_access_token(&self, refresh: &str) -> Result<TokenGrant, SessionError> {
        let response = self
            .http
            .post(endpoint(&self.base_url, &self.refresh_path))
            .json(&RefreshRequest { refresh })
            .send()
            .await
            .map_err(|e| SessionError::RefreshRejected {
                status: None,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::RefreshRejected {
                status: Some(status.as_u16()),
                reason: read_body(response).await,
            });
        }

        let grant: TokenGrant = response.json().await.map_err(|e| SessionError::RefreshRejected {
            status: Some(status.as_u16()),
            reason: format!("malformed refresh response: {}", e),
        })?;

        // An access token that would immediately fail to decode is no better
        // than a refusal.
        decode_identity(&grant.access).map_err(|e| SessionError::RefreshRejected {
            status: Some(status.as_u16()),
            reason: e.to_string(),
        })?;

        Ok(grant)
    }

    /// Exchange a username and password for a credential pair and store it.
    ///
    /// # Errors
    /// Returns `NonAuthFailure` if the server refuses the credentials
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Identity, ApiError> {
        let context = ErrorContext::new("login");
        let result = self.exchange_credentials(username, password, remember_me).await;
        match &result {
            Ok(identity) => tracing::info!(
                request_id = %context.request_id,
                user_id = identity.user_id(),
                "Login succeeded"
            ),
            Err(e) => context.log_error(e),
        }
        result
    }

    async fn exchange_credentials(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Identity, ApiError> {
        let response = self
            .http
            .post(endpoint(&self.base_url, &self.token_path))
            .json(&LoginRequest {
                username,
                password,
                remember_me,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::NonAuthFailure {
                status: status.as_u16(),
                body: read_body(response).await,
            });
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let refresh = grant
            .refresh
            .ok_or_else(|| ApiError::InvalidResponse("login response has no refresh token".into()))?;
        let identity = decode_identity(&grant.access)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        self.session.set_tokens(&grant.access, &refresh);
        Ok(identity)
    }

    fn is_refresh_endpoint(&self, path: &str) -> bool {
        endpoint(&self.base_url, path) == endpoint(&self.base_url, &self.refresh_path)
    }
}

async fn into_result(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(ApiError::NonAuthFailure {
            status: status.as_u16(),
            body: read_body(response).await,
        });
    }
    Ok(response)
}

async fn read_body(response: Response) -> String {
    response.text().await.unwrap_or_default()
}

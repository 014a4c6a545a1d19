//! Authentication - OAuth2 authorization code flow with PKCE
//!
//! - `pkce`: verifier/challenge/state generation
//! - `oauth`: token endpoint client and the [`TokenRefresher`] seam
//! - `callback_server`: local listener for the redirect
//! - `pages`: HTML served by the listener
//!
//! [`AuthManager`] drives one attempt at a time: `start_auth_flow` opens the
//! listener and publishes `AuthStarted` with the URL to show the user,
//! `update` polls the listener and enforces the timeout, and the outcome is
//! published as `AuthCompleted` (payload [`AuthTokens`]) or `AuthFailed`
//! (payload [`Error`]).

mod callback_server;
mod oauth;
mod pages;
mod pkce;

pub use oauth::{TokenGrant, TokenRefresher, DEFAULT_TOKEN_LIFETIME};

use std::net::IpAddr;
use std::rc::Rc;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;

use callback_server::{CallbackRequest, CallbackServer, Route};
use oauth::OAuthClient;
use pkce::PkceContext;
use crate::config::SpotifyConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::http::HttpTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    None,
    WaitingForUser,
    Authenticated,
    Error,
}

/// Payload of `AuthCompleted`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Instant,
}

/// Query parameters of a redirect to `/callback`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub struct AuthManager {
    oauth: Rc<OAuthClient>,
    bus: Rc<EventBus>,
    state: AuthState,
    pkce: Option<PkceContext>,
    server: Option<CallbackServer>,
    callback_port: u16,
    timeout: Duration,
    started_at: Option<Instant>,
    redirect_uri: String,
    auth_url: Option<String>,
    last_error: Option<Error>,
}

impl AuthManager {
    pub fn new(
        config: &SpotifyConfig,
        transport: Rc<dyn HttpTransport>,
        bus: Rc<EventBus>,
    ) -> Result<Self> {
        let oauth = Rc::new(OAuthClient::new(config, transport)?);
        Ok(Self {
            oauth,
            bus,
            state: AuthState::None,
            pkce: None,
            server: None,
            callback_port: config.callback_port,
            timeout: config.auth_timeout(),
            started_at: None,
            redirect_uri: String::new(),
            auth_url: None,
            last_error: None,
        })
    }

    /// Handle the Session Client uses to refresh tokens.
    pub fn refresher(&self) -> Rc<dyn TokenRefresher> {
        self.oauth.clone()
    }

    /// Begin a fresh attempt and return the URL the user has to open.
    /// Any attempt still in flight is abandoned, its secrets discarded.
    pub fn start_auth_flow(&mut self, local_ip: IpAddr) -> Result<String> {
        self.pkce = None;
        self.started_at = None;
        if let Some(previous) = self.last_error.take() {
            tracing::debug!(error = %previous, "Starting over after a failed attempt");
        }

        // A live listener is kept: its port is released asynchronously, so
        // rebinding a fixed port right away would fail.
        let server = match self.server.take() {
            Some(mut server) => {
                server.reject_pending(StatusCode::GONE, &pages::failed("A new login was started"));
                server
            }
            None => match CallbackServer::bind(self.callback_port) {
                Ok(server) => server,
                Err(e) => {
                    self.fail(e.clone());
                    return Err(e);
                }
            },
        };
        let pkce = PkceContext::generate();
        let redirect_uri = format!("http://{}:{}/callback", local_ip, server.port());
        let auth_url = match self.oauth.authorization_url(&redirect_uri, &pkce) {
            Ok(url) => url,
            Err(e) => {
                self.fail(e.clone());
                return Err(e);
            }
        };

        tracing::info!(redirect_uri = %redirect_uri, "Authorization flow started");
        tracing::debug!(auth_url = %auth_url, "Authorization URL");

        self.server = Some(server);
        self.pkce = Some(pkce);
        self.redirect_uri = redirect_uri;
        self.auth_url = Some(auth_url.clone());
        self.started_at = Some(Instant::now());
        self.state = AuthState::WaitingForUser;

        self.bus
            .publish(Event::with_text(EventKind::AuthStarted, auth_url.clone()));
        Ok(auth_url)
    }

    /// Answer queued listener requests and enforce the timeout. Called once
    /// per tick; never waits on a client.
    pub async fn update(&mut self) {
        if self.state != AuthState::WaitingForUser {
            return;
        }

        if self
            .started_at
            .is_some_and(|at| at.elapsed() >= self.timeout)
        {
            tracing::warn!(timeout = ?self.timeout, "Authorization timed out");
            self.fail(Error::AuthTimeout);
            return;
        }

        while let Some(request) = self.server.as_mut().and_then(CallbackServer::next_request) {
            self.serve(request).await;
        }
    }

    async fn serve(&mut self, request: CallbackRequest) {
        let CallbackRequest { route, reply } = request;
        match route {
            Route::Status => {
                let url = self.auth_url.clone().unwrap_or_default();
                reply.send(StatusCode::OK, pages::waiting(&url));
            }
            Route::Callback(params) => {
                tracing::debug!(has_code = params.code.is_some(), "Callback received");
                match self.handle_callback(params).await {
                    Ok(()) => reply.send(StatusCode::OK, pages::connected()),
                    Err(e) => {
                        let status = match e {
                            Error::AuthTokenExchangeFailed { .. }
                            | Error::AuthMalformedResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
                            _ => StatusCode::BAD_REQUEST,
                        };
                        reply.send(status, pages::failed(&e.to_string()));
                    }
                }
                self.teardown();
            }
        }
    }

    /// Validate a redirect and, if it checks out, exchange the code.
    /// The attempt's PKCE context is consumed whatever the outcome.
    pub async fn handle_callback(&mut self, params: CallbackParams) -> Result<()> {
        let Some(pkce) = self.pkce.take() else {
            tracing::warn!("Callback without a pending authorization attempt");
            return Err(Error::AuthStateMismatch);
        };

        let state_ok = params
            .state
            .as_deref()
            .is_some_and(|s| pkce.matches_state(s));
        if !state_ok {
            return Err(self.fail(Error::AuthStateMismatch));
        }
        if let Some(error) = params.error {
            return Err(self.fail(Error::AuthProviderError(error)));
        }
        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            return Err(self.fail(Error::AuthMissingCode));
        };

        let exchanged = self
            .oauth
            .exchange_code(&code, &self.redirect_uri, &pkce.code_verifier)
            .await;
        match exchanged {
            Ok(grant) => {
                let tokens = AuthTokens {
                    access_token: grant.access_token,
                    refresh_token: grant.refresh_token.unwrap_or_default(),
                    expires_at: grant.expires_at,
                };
                tracing::info!(
                    access_token = %crate::logging::redact(&tokens.access_token),
                    "Authorization completed"
                );
                self.state = AuthState::Authenticated;
                self.started_at = None;
                self.bus
                    .publish(Event::with_data(EventKind::AuthCompleted, tokens));
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::warn!(error = %error, code = error.code(), "Authorization failed");
        self.state = AuthState::Error;
        self.pkce = None;
        self.started_at = None;
        self.teardown();
        self.last_error = Some(error.clone());
        self.bus.publish(
            Event::with_int(EventKind::AuthFailed, error.code())
                .and_text(error.to_string())
                .and_data(error.clone()),
        );
        error
    }

    /// Drop the attempt in flight without reporting a failure.
    pub fn cancel(&mut self) {
        self.pkce = None;
        self.started_at = None;
        self.teardown();
        if self.state == AuthState::WaitingForUser {
            self.state = AuthState::None;
        }
    }

    fn teardown(&mut self) {
        self.server = None;
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    #[cfg(test)]
    pub fn auth_url(&self) -> Option<&str> {
        self.auth_url.as_deref()
    }

    #[cfg(test)]
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        self.server.is_some()
    }

    pub fn listener_port(&self) -> Option<u16> {
        self.server.as_ref().map(CallbackServer::port)
    }
}

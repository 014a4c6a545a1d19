//! Token endpoint client: authorization URL, code exchange and refresh

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio::time::Instant;

use super::pkce::PkceContext;
use crate::config::SpotifyConfig;
use crate::error::{Error, Result};
use crate::http::{HttpRequest, HttpTransport, Method};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Tokens returned by the token endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present on code exchange; a refresh may or may not rotate it.
    pub refresh_token: Option<String>,
    pub expires_at: Instant,
}

/// Anything that can trade a refresh token for a fresh access token.
/// Failures are reported as `None`, never as a panic or error: the caller
/// decides what a failed refresh means.
#[async_trait(?Send)]
pub trait TokenRefresher {
    async fn refresh_access_token(&self, refresh_token: &str) -> Option<TokenGrant>;
}

pub struct OAuthClient {
    transport: Rc<dyn HttpTransport>,
    client_id: String,
    authorize_url: String,
    token_url: String,
    scopes: String,
}

impl OAuthClient {
    pub fn new(config: &SpotifyConfig, transport: Rc<dyn HttpTransport>) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(Error::Credentials("spotify.client_id is not set".into()));
        }
        Ok(Self {
            transport,
            client_id: config.client_id.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            scopes: config.scopes.clone(),
        })
    }

    pub fn authorization_url(&self, redirect_uri: &str, pkce: &PkceContext) -> Result<String> {
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("scope", self.scopes.as_str()),
                ("code_challenge_method", "S256"),
                ("code_challenge", pkce.code_challenge.as_str()),
                ("state", pkce.state.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("spotify.authorize_url: {}", e)))?;
        Ok(url.into())
    }

    /// Trade an authorization code for tokens. No client secret is sent;
    /// the verifier proves we started the flow.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant> {
        let request = HttpRequest::new(Method::Post, &self.token_url).form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ]);

        tracing::debug!("OAuth: Exchanging authorization code");
        let response = self.transport.send(request).await.map_err(|e| {
            Error::AuthTokenExchangeFailed {
                status: 0,
                body: e.to_string(),
            }
        })?;

        if !response.is_success() {
            tracing::warn!(status = response.status, "OAuth: Token exchange rejected");
            return Err(Error::AuthTokenExchangeFailed {
                status: response.status,
                body: response.body,
            });
        }

        let grant = parse_token_response(&response.body)?;
        if grant.refresh_token.is_none() {
            tracing::warn!("OAuth: Token exchange returned no refresh token");
        }
        Ok(grant)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let request = HttpRequest::new(Method::Post, &self.token_url).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ]);

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(Error::AuthTokenExchangeFailed {
                status: response.status,
                body: response.body,
            });
        }
        parse_token_response(&response.body)
    }
}

#[async_trait(?Send)]
impl TokenRefresher for OAuthClient {
    async fn refresh_access_token(&self, refresh_token: &str) -> Option<TokenGrant> {
        if refresh_token.is_empty() {
            tracing::warn!("OAuth: No refresh token available");
            return None;
        }
        match self.refresh(refresh_token).await {
            Ok(grant) => {
                tracing::info!(
                    rotated = grant.refresh_token.is_some(),
                    "OAuth: Access token refreshed"
                );
                Some(grant)
            }
            Err(e) => {
                tracing::warn!(error = %e, "OAuth: Token refresh failed");
                None
            }
        }
    }
}

fn parse_token_response(body: &str) -> Result<TokenGrant> {
    let parsed: TokenResponse =
        serde_json::from_str(body).map_err(|e| Error::AuthMalformedResponse(e.to_string()))?;

    let access_token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::AuthMalformedResponse("missing access_token".into()))?;
    let lifetime = parsed
        .expires_in
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME);

    Ok(TokenGrant {
        access_token,
        refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
        expires_at: Instant::now() + lifetime,
    })
}

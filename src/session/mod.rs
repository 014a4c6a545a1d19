//! Session client - Web API access with bearer-token lifecycle
//!
//! - `tokens`: the access/refresh pair and its expiry
//! - `model`: snapshots parsed from API responses
//! - `playback`: player control and the playback snapshot
//! - `library`: saved tracks, devices, playlists and search
//!
//! Every call goes through [`SessionClient::request`]: make sure the access
//! token is usable, attach it, send, interpret the status. A 401 triggers
//! exactly one refresh and the call is still reported as failed; the caller
//! decides whether to retry.

mod library;
mod model;
mod playback;
mod tokens;

pub use model::{
    DeviceSnapshot, PlaybackSnapshot, PlaylistDetail, PlaylistSummary, SearchResults,
    TrackSnapshot,
};
use tokens::TokenPair;

use std::rc::Rc;

use reqwest::Url;
use tokio::time::Instant;

use crate::auth::{AuthTokens, TokenRefresher};
use crate::config::SpotifyConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::logging::redact;
use crate::store::TokenStore;

pub struct SessionClient {
    transport: Rc<dyn HttpTransport>,
    refresher: Rc<dyn TokenRefresher>,
    bus: Rc<EventBus>,
    api_base: String,
    tokens: TokenPair,
    playback: PlaybackSnapshot,
}

impl SessionClient {
    pub fn new(
        config: &SpotifyConfig,
        transport: Rc<dyn HttpTransport>,
        refresher: Rc<dyn TokenRefresher>,
        bus: Rc<EventBus>,
    ) -> Self {
        Self {
            transport,
            refresher,
            bus,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tokens: TokenPair::empty(),
            playback: PlaybackSnapshot::default(),
        }
    }

    /// Pick up tokens persisted by an earlier run. Returns whether they are
    /// enough to skip the login.
    pub fn load_tokens(&mut self, store: &dyn TokenStore) -> bool {
        if !store.has_stored_tokens() {
            tracing::info!("No stored tokens, authorization required");
            return false;
        }
        self.tokens = TokenPair::restored(
            &store.access_token(),
            &store.refresh_token(),
            store.saved_at(),
        );
        tracing::info!(
            expired = self.tokens.is_expired(),
            has_access_token = self.tokens.has_access_token(),
            has_refresh_token = self.tokens.has_refresh_token(),
            "Loaded stored tokens"
        );
        self.has_tokens()
    }

    pub fn set_tokens(&mut self, access_token: &str, refresh_token: &str, expires_at: Instant) {
        tracing::debug!(access_token = %redact(access_token), "Session tokens updated");
        self.tokens = TokenPair::new(access_token, refresh_token, expires_at);
    }

    /// Forget the current pair; requests fail closed until new tokens
    /// arrive.
    pub fn clear_tokens(&mut self) {
        self.tokens = TokenPair::empty();
    }

    /// Whether there is an access token to work with. A refresh token
    /// alone is not enough to skip the login.
    pub fn has_tokens(&self) -> bool {
        self.tokens.has_access_token()
    }

    #[cfg(test)]
    pub fn tokens(&self) -> &TokenPair {
        &self.tokens
    }

    pub fn playback(&self) -> &PlaybackSnapshot {
        &self.playback
    }

    /// Make sure a usable access token is in hand, refreshing if it is
    /// known to be expired. Fails closed without an access token or when
    /// the refresh does not succeed.
    pub async fn ensure_valid_token(&mut self) -> Result<()> {
        if !self.tokens.has_access_token() {
            return Err(Error::NotAuthenticated);
        }
        if !self.tokens.is_expired() {
            return Ok(());
        }
        tracing::info!("Access token expired, refreshing");
        self.refresh_tokens().await
    }

    async fn refresh_tokens(&mut self) -> Result<()> {
        let refresh_token = self.tokens.refresh_token.clone();
        let refreshed = self.refresher.refresh_access_token(&refresh_token).await;
        match refreshed {
            Some(grant) => {
                self.tokens.apply(&grant);
                self.bus.publish(Event::with_data(
                    EventKind::TokenRefreshed,
                    AuthTokens {
                        access_token: self.tokens.access_token.clone(),
                        refresh_token: self.tokens.refresh_token.clone(),
                        expires_at: self.tokens.expires_at(),
                    },
                ));
                Ok(())
            }
            None => {
                let error = Error::TokenRefreshFailed;
                self.bus.publish(
                    Event::with_int(EventKind::TokenRefreshFailed, error.code())
                        .and_text(error.to_string()),
                );
                Err(error)
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// URL for `path` with properly encoded query parameters.
    fn url_with_params(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        Url::parse_with_params(&self.url(path), params)
            .map(String::from)
            .map_err(|e| Error::Config(format!("spotify.api_base: {}", e)))
    }

    /// URL with `segments` appended to the API base, each one escaped so an
    /// id can never change the path.
    fn url_with_segments(&self, segments: &[&str]) -> Result<String> {
        let invalid = |reason: String| Error::Config(format!("spotify.api_base: {}", reason));
        let mut url = Url::parse(&self.api_base).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    /// Issue one authenticated request against the API.
    pub async fn request(
        &mut self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse> {
        self.ensure_valid_token().await?;

        let mut request = HttpRequest::new(method, url)
            .bearer(&self.tokens.access_token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.transport.send(request).await?;

        if response.status == 401 {
            tracing::warn!("API: Access token rejected, refreshing");
            self.tokens.invalidate();
            self.refresh_tokens().await?;
            return Err(Error::ApiRequestFailed {
                status: response.status,
                body: response.body,
            });
        }
        if !response.is_success() {
            tracing::warn!(status = response.status, body = %response.body, "API: Request failed");
            return Err(Error::ApiRequestFailed {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }

    async fn get(&mut self, path: &str) -> Result<HttpResponse> {
        let url = self.url(path);
        self.request(Method::Get, url, None).await
    }

    async fn put(&mut self, path: &str, body: Option<serde_json::Value>) -> Result<()> {
        let url = self.url(path);
        self.request(Method::Put, url, body).await.map(|_| ())
    }

    async fn post(&mut self, path: &str) -> Result<()> {
        let url = self.url(path);
        self.request(Method::Post, url, None).await.map(|_| ())
    }
}

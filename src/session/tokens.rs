//! Access/refresh token pair and its expiry clock

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::auth::{TokenGrant, DEFAULT_TOKEN_LIFETIME};

/// Refresh this long before the provider would reject the token.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    expires_at: Instant,
}

impl TokenPair {
    pub fn new(access_token: &str, refresh_token: &str, expires_at: Instant) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at,
        }
    }

    pub fn empty() -> Self {
        Self::new("", "", Instant::now())
    }

    /// Rebuild a pair loaded from persistent storage. The access token is
    /// trusted for whatever is left of its lifetime since `saved_at`; with
    /// no timestamp it is treated as already expired.
    pub fn restored(access_token: &str, refresh_token: &str, saved_at: Option<DateTime<Utc>>) -> Self {
        let now = Instant::now();
        let remaining = saved_at
            .and_then(|at| {
                let age = Utc::now().signed_duration_since(at).to_std().ok()?;
                DEFAULT_TOKEN_LIFETIME.checked_sub(age)
            })
            .unwrap_or(Duration::ZERO);
        Self::new(access_token, refresh_token, now + remaining)
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN >= self.expires_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Mark the access token as known-expired without discarding it.
    pub fn invalidate(&mut self) {
        self.expires_at = Instant::now();
    }

    pub fn apply(&mut self, grant: &TokenGrant) {
        self.access_token = grant.access_token.clone();
        self.expires_at = grant.expires_at;
        if let Some(rotated) = &grant.refresh_token {
            self.refresh_token = rotated.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expiry_includes_margin() {
        let pair = TokenPair::new("at", "rt", Instant::now() + Duration::from_secs(120));
        assert!(!pair.is_expired());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(pair.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_expiry() {
        let mut pair = TokenPair::new("at", "rt", Instant::now() + DEFAULT_TOKEN_LIFETIME);
        pair.invalidate();
        assert!(pair.is_expired());
        assert_eq!(pair.access_token, "at");
    }

    #[tokio::test(start_paused = true)]
    async fn restored_tokens_keep_remaining_lifetime() {
        let fresh = TokenPair::restored("at", "rt", Some(Utc::now() - chrono::Duration::minutes(10)));
        assert!(!fresh.is_expired());

        let stale = TokenPair::restored("at", "rt", Some(Utc::now() - chrono::Duration::hours(2)));
        assert!(stale.is_expired());

        let unknown = TokenPair::restored("at", "rt", None);
        assert!(unknown.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn apply_keeps_refresh_token_unless_rotated() {
        let mut pair = TokenPair::new("old", "rt", Instant::now());
        pair.apply(&TokenGrant {
            access_token: "new".into(),
            refresh_token: None,
            expires_at: Instant::now() + DEFAULT_TOKEN_LIFETIME,
        });
        assert_eq!(pair.refresh_token, "rt");
        assert!(!pair.is_expired());

        pair.apply(&TokenGrant {
            access_token: "newer".into(),
            refresh_token: Some("rt2".into()),
            expires_at: Instant::now() + DEFAULT_TOKEN_LIFETIME,
        });
        assert_eq!(pair.refresh_token, "rt2");
    }
}

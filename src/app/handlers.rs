//! Reactions to events raised by the subsystems

use crate::auth::AuthTokens;
use crate::error::Error;
use crate::events::{Event, EventKind};

use super::{AppController, ApplicationState, Command};

impl AppController {
    pub(super) async fn handle_event(&mut self, event: Event) {
        tracing::trace!(kind = ?event.kind, "Handling event");
        match event.kind {
            EventKind::ConnectivityConnected => self.on_connected(&event),
            EventKind::ConnectivityDisconnected => {
                tracing::warn!(reason = ?event.text, state = %self.state, "Network lost");
            }
            EventKind::ConnectivityFailed => self.on_connectivity_failed(&event),
            EventKind::AuthCompleted => self.on_auth_completed(&event),
            EventKind::AuthFailed => self.on_auth_failed(&event),
            EventKind::TokenRefreshed => self.persist_tokens(&event),
            EventKind::TokenRefreshFailed => self.on_token_refresh_failed(),
            EventKind::UserCommand => {
                let Some(command) = event.data::<Command>().cloned() else {
                    tracing::warn!("UserCommand without a command payload");
                    return;
                };
                if let Err(e) = self.execute(command.clone()).await {
                    tracing::warn!(?command, error = %e, "Command failed");
                }
            }
            _ => {}
        }
    }

    fn on_connected(&mut self, event: &Event) {
        tracing::info!(
            ip = ?event.text,
            ssid = self.connectivity.ssid(),
            rssi = self.connectivity.signal_strength(),
            state = %self.state,
            "Network up"
        );
        match self.state {
            ApplicationState::ConnectingNetwork => self.enter_connected(),
            ApplicationState::Error if self.error_is_connectivity() => {
                self.set_state(ApplicationState::ConnectingNetwork);
                self.enter_connected();
            }
            _ => {}
        }
    }

    /// Network is up while `ConnectingNetwork`: decide between the session
    /// and the login flow.
    pub(super) fn enter_connected(&mut self) {
        if self.session.has_tokens() {
            self.error_cause = None;
            self.set_state(ApplicationState::Ready);
            return;
        }

        self.require_auth(Error::NotAuthenticated);
        if self.config.spotify.auto_start_auth && !self.auth_auto_started {
            self.auth_auto_started = true;
            self.start_authentication();
        }
    }

    fn on_connectivity_failed(&mut self, event: &Event) {
        let cause = event
            .data::<Error>()
            .cloned()
            .unwrap_or(Error::ConnectivityTimeout);

        let exhausted = matches!(cause, Error::ConnectivityExhausted { .. });
        match (self.state, exhausted) {
            (ApplicationState::ConnectingNetwork, _) | (_, true) => self.fail(cause),
            (ApplicationState::Error, false) => {
                tracing::debug!(error = %cause, "Still failing to connect");
            }
            _ => {
                // Auto-reconnect keeps going; the current screen stays
                tracing::warn!(
                    error = %cause,
                    state = %self.state,
                    attempts = self.connectivity.reconnect_attempts(),
                    last_drop = ?self.connectivity.last_disconnect_reason(),
                    "Reconnect attempt failed"
                );
            }
        }
    }

    fn on_auth_completed(&mut self, event: &Event) {
        let Some(tokens) = event.data::<AuthTokens>() else {
            tracing::warn!("AuthCompleted without tokens");
            return;
        };
        self.session
            .set_tokens(&tokens.access_token, &tokens.refresh_token, tokens.expires_at);
        self.persist_tokens(event);

        if self.state == ApplicationState::Authenticating {
            self.error_cause = None;
            self.set_state(ApplicationState::Ready);
        }
    }

    fn on_auth_failed(&mut self, event: &Event) {
        let cause = event
            .data::<Error>()
            .cloned()
            .unwrap_or_else(|| Error::AuthProviderError(event.text.clone().unwrap_or_default()));
        if self.state == ApplicationState::Authenticating {
            self.require_auth(cause);
        } else {
            tracing::debug!(error = %cause, state = %self.state, "Auth failure outside of a flow");
        }
    }

    fn persist_tokens(&self, event: &Event) {
        let Some(tokens) = event.data::<AuthTokens>() else {
            return;
        };
        match self
            .store
            .save_tokens(&tokens.access_token, &tokens.refresh_token)
        {
            Ok(()) => tracing::debug!("Tokens persisted"),
            // Losing persistence only costs a login after reboot
            Err(e) => tracing::error!(error = %e, "Failed to persist tokens"),
        }
    }

    fn on_token_refresh_failed(&mut self) {
        self.fail(Error::TokenRefreshFailed);
        if !self.retry_pending {
            self.retry_pending = true;
            let delay = self.config.app.error_retry_delay();
            tracing::info!(?delay, "Scheduling automatic retry");
            self.schedule_task(delay, |app| app.send_command(Command::Retry));
        }
    }

    fn error_is_connectivity(&self) -> bool {
        matches!(
            self.error_cause,
            Some(Error::ConnectivityTimeout)
                | Some(Error::ConnectivityExhausted { .. })
                | Some(Error::NetworkDriver(_))
        )
    }
}

//! App controller - global state machine and the tick loop
//!
//! The controller owns every subsystem and drives them from [`AppController::tick`].
//! It is organized into submodules by responsibility:
//!
//! - `state`: [`ApplicationState`] and its transition table
//! - `scheduler`: one-shot deferred tasks
//! - `commands`: [`Command`] execution
//! - `handlers`: reactions to subsystem events
//!
//! Subsystems talk back through the event bus only. The controller
//! subscribes an inbox for the kinds it reacts to and drains it once per
//! tick, so no handler runs re-entrantly inside another subsystem's call.

mod commands;
mod handlers;
mod scheduler;
mod state;

pub use commands::Command;
use scheduler::Scheduler;
pub use state::ApplicationState;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::http::HttpTransport;
use crate::network::{ConnectivityManager, NetworkDriver};
use crate::session::{PlaybackSnapshot, SessionClient};
use crate::store::TokenStore;

/// How often playback state is fetched while operational.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Every Nth poll also reads the full player state for the volume.
const VOLUME_POLL_EVERY: u64 = 5;

/// Upper bound on inbox events handled per tick; the rest wait.
const MAX_EVENTS_PER_TICK: usize = 64;

const INBOX_KINDS: [EventKind; 8] = [
    EventKind::ConnectivityConnected,
    EventKind::ConnectivityDisconnected,
    EventKind::ConnectivityFailed,
    EventKind::AuthCompleted,
    EventKind::AuthFailed,
    EventKind::TokenRefreshed,
    EventKind::TokenRefreshFailed,
    EventKind::UserCommand,
];

/// Platform services the core is built on.
pub struct Platform {
    pub driver: Box<dyn NetworkDriver>,
    pub transport: Rc<dyn HttpTransport>,
    pub store: Box<dyn TokenStore>,
}

pub struct AppController {
    config: Config,
    bus: Rc<EventBus>,
    state: ApplicationState,
    connectivity: ConnectivityManager,
    auth: AuthManager,
    session: SessionClient,
    store: Box<dyn TokenStore>,
    scheduler: Scheduler<AppController>,
    inbox: Rc<RefCell<VecDeque<Event>>>,
    subscriptions: Vec<SubscriptionId>,
    error_cause: Option<Error>,
    last_poll: Option<Instant>,
    poll_count: u64,
    auth_auto_started: bool,
    retry_pending: bool,
    last_playback: PlaybackSnapshot,
}

impl AppController {
    /// Bring up every subsystem and start joining the configured network.
    ///
    /// Fails if the network driver cannot be initialized or the OAuth client
    /// has no usable client id; the caller reports that and stops.
    pub fn initialize(config: Config, platform: Platform, bus: Rc<EventBus>) -> Result<Self> {
        tracing::info!("Initializing controller");

        let connectivity =
            ConnectivityManager::new(&config.network, platform.driver, bus.clone())?;
        let auth = AuthManager::new(&config.spotify, platform.transport.clone(), bus.clone())?;
        let mut session = SessionClient::new(
            &config.spotify,
            platform.transport,
            auth.refresher(),
            bus.clone(),
        );
        session.load_tokens(platform.store.as_ref());

        if bus.subscriber_count(EventKind::UserCommand) > 0 {
            tracing::warn!("Another controller already handles commands on this bus");
        }
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let subscriptions = INBOX_KINDS
            .iter()
            .map(|&kind| {
                let inbox = inbox.clone();
                bus.subscribe(kind, move |event| {
                    inbox.borrow_mut().push_back(event.clone());
                    Ok(())
                })
            })
            .collect();

        let mut app = Self {
            config,
            bus,
            state: ApplicationState::Init,
            connectivity,
            auth,
            session,
            store: platform.store,
            scheduler: Scheduler::new(),
            inbox,
            subscriptions,
            error_cause: None,
            last_poll: None,
            poll_count: 0,
            auth_auto_started: false,
            retry_pending: false,
            last_playback: PlaybackSnapshot::default(),
        };

        app.bus.publish(Event::new(EventKind::ConfigLoaded));
        app.set_state(ApplicationState::ConnectingNetwork);
        if let Err(e) = app.connect_network() {
            tracing::error!(error = %e, "Initial network connect failed");
        }
        Ok(app)
    }

    /// One pass of the main loop: due tasks, subsystem updates, queued
    /// events, then playback polling.
    pub async fn tick(&mut self) {
        for task in self.scheduler.take_due(Instant::now()) {
            task(self);
        }

        self.connectivity.update();
        self.auth.update().await;
        self.process_inbox().await;

        if self.should_poll() {
            self.poll_playback().await;
            self.process_inbox().await;
        }
    }

    async fn process_inbox(&mut self) {
        for _ in 0..MAX_EVENTS_PER_TICK {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(event) = next else {
                return;
            };
            self.handle_event(event).await;
        }
        tracing::debug!(
            pending = self.inbox.borrow().len(),
            "Event limit reached, continuing next tick"
        );
    }

    /// Move to `new` and announce it. Re-entering the current state does
    /// nothing; an edge outside the table is refused.
    pub fn set_state(&mut self, new: ApplicationState) {
        let old = self.state;
        if old == new {
            return;
        }
        if !old.can_transition_to(new) {
            tracing::error!(from = %old, to = %new, "Invalid state transition refused");
            debug_assert!(false, "invalid state transition {old} -> {new}");
            return;
        }
        self.state = new;
        tracing::info!(from = %old, to = %new, "State changed");
        self.bus.publish(
            Event::with_int(EventKind::StateChanged, new.ordinal()).and_text(new.name()),
        );
    }

    /// Enter `Error` with `cause` and raise it.
    fn fail(&mut self, cause: Error) {
        tracing::error!(error = %cause, code = cause.code(), "Entering error state");
        self.set_state(ApplicationState::Error);
        self.raise(&cause);
        self.error_cause = Some(cause);
    }

    /// Enter `AuthRequired` with `cause` and raise it.
    fn require_auth(&mut self, cause: Error) {
        tracing::info!(reason = %cause, "Authorization required");
        self.set_state(ApplicationState::AuthRequired);
        self.raise(&cause);
        self.error_cause = Some(cause);
    }

    fn raise(&self, cause: &Error) {
        self.bus.publish(
            Event::with_int(EventKind::ErrorRaised, cause.code())
                .and_text(cause.to_string())
                .and_data(cause.clone()),
        );
    }

    /// Join the configured network, or open the setup access point when
    /// none is configured. A failure puts the controller in `Error`.
    fn connect_network(&mut self) -> Result<()> {
        let result = if self.config.is_configured() {
            let network = &self.config.network;
            self.connectivity.connect(&network.ssid, &network.password)
        } else {
            tracing::warn!("No network configured, starting setup access point");
            self.connectivity.start_access_point()
        };
        if let Err(e) = &result {
            self.fail(e.clone());
        }
        result
    }

    /// Open a fresh login attempt. Only meaningful while waiting for
    /// authorization with a working network.
    fn start_authentication(&mut self) {
        if !matches!(
            self.state,
            ApplicationState::AuthRequired | ApplicationState::Authenticating
        ) {
            tracing::debug!(state = %self.state, "Authentication not needed in this state");
            return;
        }
        if !self.connectivity.is_connected() {
            tracing::warn!("Cannot start authentication without a network");
            return;
        }

        // Whatever is left of the old pair must not outlive a new login
        self.session.clear_tokens();
        self.set_state(ApplicationState::Authenticating);
        let local_ip = self.connectivity.ip_address();
        match self.auth.start_auth_flow(local_ip) {
            Ok(url) => tracing::info!(
                url = %url,
                port = ?self.auth.listener_port(),
                "Open this URL to authorize the device"
            ),
            // The failure also arrives as AuthFailed and is handled there
            Err(e) => tracing::warn!(error = %e, "Could not start authorization"),
        }
    }

    /// Abandon a pending login and leave the network before exit.
    pub fn shutdown(&mut self) {
        if self.auth.is_listening() {
            tracing::info!(auth = ?self.auth.state(), "Abandoning pending authorization");
            self.auth.cancel();
        }
        self.connectivity.disconnect();
        // Input arriving after this point is dropped
        self.bus.clear(EventKind::UserCommand);
        self.inbox.borrow_mut().clear();
    }

    /// Queue a command as if the input layer had sent it.
    pub fn send_command(&self, command: Command) {
        self.bus
            .publish(Event::with_data(EventKind::UserCommand, command));
    }

    /// Run `task` on the first tick at or after `delay` from now.
    pub fn schedule_task(&mut self, delay: Duration, task: impl FnOnce(&mut AppController) + 'static) {
        self.scheduler.schedule(delay, task);
    }

    fn should_poll(&self) -> bool {
        self.state.is_operational()
            && self.connectivity.is_connected()
            && self
                .last_poll
                .is_none_or(|at| at.elapsed() >= POLL_INTERVAL)
    }

    async fn poll_playback(&mut self) {
        self.last_poll = Some(Instant::now());
        self.poll_count += 1;

        if let Err(e) = self.session.refresh_playback().await {
            tracing::warn!(error = %e, "Playback poll failed");
            return;
        }
        if self.poll_count % VOLUME_POLL_EVERY == 0 {
            if let Err(e) = self.session.refresh_volume().await {
                tracing::debug!(error = %e, "Volume poll failed");
            }
        }

        let track_id = self.session.playback().track_id().map(str::to_string);
        if let Some(id) = track_id.filter(|id| Some(id.as_str()) != self.last_playback.track_id()) {
            if let Err(e) = self.session.is_track_saved(&id).await {
                tracing::debug!(error = %e, "Could not check library state");
            }
        }

        self.publish_playback_changes();
    }

    /// Announce whatever differs from the last published snapshot and keep
    /// `Ready`/`PlaybackActive` in line with it.
    fn publish_playback_changes(&mut self) {
        let current = self.session.playback().clone();
        let delta = current.diff(&self.last_playback);

        if delta.track_changed {
            let event = match &current.track {
                Some(track) => Event::with_text(EventKind::TrackChanged, track.id.clone())
                    .and_data(track.clone()),
                None => Event::new(EventKind::TrackChanged),
            };
            self.bus.publish(event);
        }
        if delta.playing_changed {
            self.bus.publish(
                Event::with_int(EventKind::PlaybackChanged, i64::from(current.is_playing))
                    .and_float(current.progress()),
            );
        }
        if delta.volume_changed {
            self.bus.publish(Event::with_int(
                EventKind::VolumeChanged,
                i64::from(current.volume()),
            ));
        }
        if current.saved != self.last_playback.saved && !delta.track_changed {
            self.bus
                .publish(Event::with_int(EventKind::UiRefresh, i64::from(current.saved)));
        }

        match self.state {
            ApplicationState::Ready if current.is_playing => {
                self.set_state(ApplicationState::PlaybackActive)
            }
            ApplicationState::PlaybackActive if !current.is_playing => {
                self.set_state(ApplicationState::Ready)
            }
            _ => {}
        }
        self.last_playback = current;
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    /// Why the controller is in `Error` or `AuthRequired`, if it is.
    pub fn error_cause(&self) -> Option<&Error> {
        self.error_cause.as_ref()
    }

    pub fn connectivity(&self) -> &ConnectivityManager {
        &self.connectivity
    }

    pub fn playback(&self) -> &PlaybackSnapshot {
        &self.last_playback
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.app.tick_interval()
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
        tracing::debug!("Controller shut down");
    }
}

//! User commands and playback control

use crate::error::Result;
use crate::events::{Event, EventKind};
use crate::session::{DeviceSnapshot, PlaylistDetail, PlaylistSummary, SearchResults};

use super::{AppController, ApplicationState};

/// Volume change per button press, in percent.
const VOLUME_STEP: i32 = 5;

/// Results per search request.
const SEARCH_LIMIT: u32 = 20;

/// Everything the input layer can ask the controller to do. Published as
/// the opaque payload of `UserCommand` events or passed to
/// [`AppController::execute`] directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    TogglePlayback,
    Play,
    Pause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    /// Jump to a position in the current track, in milliseconds.
    Seek(u64),
    ToggleSaved,
    PlayTrack(String),
    PlayPlaylist(String),
    /// Move playback to the device with this id.
    SelectDevice(String),
    ListDevices,
    ListPlaylists,
    OpenPlaylist(String),
    Search(String),
    StartAuthentication,
    Retry,
    OpenSettings,
    CloseSettings,
    StartAccessPoint,
    StopAccessPoint,
}

impl Command {
    fn needs_session(&self) -> bool {
        !matches!(
            self,
            Self::StartAuthentication
                | Self::Retry
                | Self::OpenSettings
                | Self::CloseSettings
                | Self::StartAccessPoint
                | Self::StopAccessPoint
        )
    }
}

impl AppController {
    pub async fn execute(&mut self, command: Command) -> Result<()> {
        tracing::debug!(?command, state = %self.state, "Executing command");

        if command.needs_session() && !self.state.is_operational() {
            tracing::debug!(?command, state = %self.state, "Command ignored in this state");
            return Ok(());
        }

        match command {
            Command::TogglePlayback => self.run_playback(Command::TogglePlayback).await,
            Command::Play => self.run_playback(Command::Play).await,
            Command::Pause => self.run_playback(Command::Pause).await,
            Command::Next => self.session.next().await,
            Command::Previous => self.session.previous().await,
            Command::VolumeUp => self.run_playback(Command::VolumeUp).await,
            Command::VolumeDown => self.run_playback(Command::VolumeDown).await,
            Command::Seek(position_ms) => self.session.seek(position_ms).await,
            Command::PlayTrack(uri) => {
                self.session.play_track(&uri, None).await?;
                self.poll_soon();
                Ok(())
            }
            Command::PlayPlaylist(uri) => {
                self.session.play_playlist(&uri, None).await?;
                self.poll_soon();
                Ok(())
            }
            Command::SelectDevice(device_id) => {
                self.session.transfer_playback(&device_id, true).await?;
                self.poll_soon();
                Ok(())
            }
            Command::ListDevices => {
                let devices: Vec<DeviceSnapshot> = self.session.devices().await?;
                tracing::debug!(count = devices.len(), "Devices listed");
                self.show("devices", devices);
                Ok(())
            }
            Command::ListPlaylists => {
                let playlists: Vec<PlaylistSummary> = self.session.playlists().await?;
                tracing::debug!(count = playlists.len(), "Playlists listed");
                self.show("playlists", playlists);
                Ok(())
            }
            Command::OpenPlaylist(playlist_id) => {
                let playlist: PlaylistDetail = self.session.playlist(&playlist_id).await?;
                self.show("playlist", playlist);
                Ok(())
            }
            Command::Search(query) => {
                let results: SearchResults = self.session.search(&query, SEARCH_LIMIT).await?;
                self.show("search", results);
                Ok(())
            }
            Command::ToggleSaved => {
                if let Some(saved) = self.session.toggle_saved().await? {
                    tracing::info!(saved, "Track library state toggled");
                    self.publish_playback_changes();
                }
                Ok(())
            }
            Command::StartAuthentication => {
                self.start_authentication();
                Ok(())
            }
            Command::Retry => self.retry(),
            Command::OpenSettings => {
                if self.state.is_operational() {
                    self.set_state(ApplicationState::Settings);
                }
                Ok(())
            }
            Command::CloseSettings => {
                if self.state == ApplicationState::Settings {
                    self.set_state(ApplicationState::Ready);
                    // Catch up on anything that changed while in settings
                    self.poll_soon();
                }
                Ok(())
            }
            Command::StartAccessPoint => self.connectivity.start_access_point(),
            Command::StopAccessPoint => {
                self.connectivity.stop_access_point();
                Ok(())
            }
        }
    }

    /// Commands that change what the device shows about playback; their
    /// effect is published right away instead of waiting for the next poll.
    async fn run_playback(&mut self, command: Command) -> Result<()> {
        match command {
            Command::TogglePlayback => self.session.toggle_play().await?,
            Command::Play => self.session.play(None).await?,
            Command::Pause => self.session.pause().await?,
            Command::VolumeUp => self.session.adjust_volume(VOLUME_STEP).await?,
            Command::VolumeDown => self.session.adjust_volume(-VOLUME_STEP).await?,
            _ => {}
        }
        self.publish_playback_changes();
        Ok(())
    }

    /// Hand a fetched list to the display layer. `screen` names what it is.
    fn show<T: 'static>(&self, screen: &str, content: T) {
        self.bus
            .publish(Event::with_text(EventKind::UiRefresh, screen).and_data(content));
    }

    /// Fetch the player state on the next tick instead of waiting out the
    /// poll interval.
    fn poll_soon(&mut self) {
        self.last_poll = None;
    }

    /// Leave `Error` (or a failed auth attempt) and try again.
    pub(super) fn retry(&mut self) -> Result<()> {
        self.retry_pending = false;
        match self.state {
            ApplicationState::Error => {
                tracing::info!(cause = ?self.error_cause, "Retrying after error");
                self.set_state(ApplicationState::ConnectingNetwork);
                if self.connectivity.is_connected() {
                    self.enter_connected();
                    Ok(())
                } else {
                    self.connect_network()
                }
            }
            ApplicationState::AuthRequired => {
                self.start_authentication();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

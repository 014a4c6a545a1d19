//! Playback control and the playback snapshot

use serde_json::json;

use super::model::{self, DeviceSnapshot, PlaybackSnapshot, RawCurrentlyPlaying, TrackSnapshot};
use super::SessionClient;
use crate::error::Result;
use crate::http::Method;
use crate::{log_api_request, log_api_result};

impl SessionClient {
    /// Fetch what is currently playing and replace the snapshot.
    /// A 204 means nothing is playing; the last known track is kept.
    pub async fn refresh_playback(&mut self) -> Result<PlaybackSnapshot> {
        log_api_request!("currently_playing");
        let response = self.get("/me/player/currently-playing").await?;

        if response.status == 204 || response.body.trim().is_empty() {
            tracing::debug!("API: Nothing playing");
            self.playback.is_playing = false;
            return Ok(self.playback.clone());
        }

        let raw: RawCurrentlyPlaying = model::parse(&response.body)?;
        let track = raw.item.map(TrackSnapshot::from);
        let saved = match (&track, self.playback.track_id()) {
            (Some(new), Some(old)) if new.id == old => self.playback.saved,
            _ => false,
        };
        self.playback = PlaybackSnapshot {
            track,
            is_playing: raw.is_playing.unwrap_or(false),
            progress_ms: raw.progress_ms.unwrap_or(0),
            device: raw
                .device
                .map(DeviceSnapshot::from)
                .or_else(|| self.playback.device.take()),
            saved,
        };
        Ok(self.playback.clone())
    }

    /// Read the active device (and its volume) from the player state.
    pub async fn refresh_volume(&mut self) -> Result<u8> {
        log_api_request!("player_state");
        let response = self.get("/me/player").await?;
        if response.status == 204 || response.body.trim().is_empty() {
            return Ok(self.playback.volume());
        }
        let raw: RawCurrentlyPlaying = model::parse(&response.body)?;
        if let Some(device) = raw.device {
            self.playback.device = Some(DeviceSnapshot::from(device));
        }
        Ok(self.playback.volume())
    }

    pub async fn play(&mut self, device_id: Option<&str>) -> Result<()> {
        log_api_request!("play", device_id = ?device_id);
        let result = self.start_playback(device_id, None).await;
        log_api_result!("play", result);
        if result.is_ok() {
            self.playback.is_playing = true;
        }
        result
    }

    pub async fn pause(&mut self) -> Result<()> {
        log_api_request!("pause");
        let result = self.put("/me/player/pause", None).await;
        log_api_result!("pause", result);
        if result.is_ok() {
            self.playback.is_playing = false;
        }
        result
    }

    pub async fn toggle_play(&mut self) -> Result<()> {
        if self.playback.is_playing {
            self.pause().await
        } else {
            self.play(None).await
        }
    }

    pub async fn next(&mut self) -> Result<()> {
        log_api_request!("next");
        let result = self.post("/me/player/next").await;
        log_api_result!("next", result);
        result
    }

    pub async fn previous(&mut self) -> Result<()> {
        log_api_request!("previous");
        let result = self.post("/me/player/previous").await;
        log_api_result!("previous", result);
        result
    }

    pub async fn seek(&mut self, position_ms: u64) -> Result<()> {
        log_api_request!("seek", position_ms);
        let url =
            self.url_with_params("/me/player/seek", &[("position_ms", position_ms.to_string().as_str())])?;
        let result = self.request(Method::Put, url, None).await.map(|_| ());
        log_api_result!("seek", result);
        if result.is_ok() {
            self.playback.progress_ms = position_ms;
        }
        result
    }

    /// Set the device volume, clamped to 0..=100.
    pub async fn set_volume(&mut self, percent: i32) -> Result<()> {
        let volume = percent.clamp(0, 100) as u8;
        log_api_request!("set_volume", requested = percent, volume);
        let url = self.url_with_params(
            "/me/player/volume",
            &[("volume_percent", volume.to_string().as_str())],
        )?;
        let result = self.request(Method::Put, url, None).await.map(|_| ());
        log_api_result!("set_volume", result);
        if result.is_ok() {
            self.playback
                .device
                .get_or_insert_with(DeviceSnapshot::default)
                .volume_percent = volume;
        }
        result
    }

    /// Nudge the volume relative to the last known level.
    pub async fn adjust_volume(&mut self, delta: i32) -> Result<()> {
        let current = i32::from(self.playback.volume());
        self.set_volume(current + delta).await
    }

    pub async fn play_track(&mut self, uri: &str, device_id: Option<&str>) -> Result<()> {
        log_api_request!("play_track", uri);
        let result = self
            .start_playback(device_id, Some(json!({ "uris": [uri] })))
            .await;
        log_api_result!("play_track", result);
        result
    }

    pub async fn play_playlist(&mut self, context_uri: &str, device_id: Option<&str>) -> Result<()> {
        log_api_request!("play_playlist", context_uri);
        let result = self
            .start_playback(device_id, Some(json!({ "context_uri": context_uri })))
            .await;
        log_api_result!("play_playlist", result);
        result
    }

    async fn start_playback(
        &mut self,
        device_id: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let url = match device_id {
            Some(id) => self.url_with_params("/me/player/play", &[("device_id", id)])?,
            None => self.url("/me/player/play"),
        };
        self.request(Method::Put, url, body).await.map(|_| ())
    }
}

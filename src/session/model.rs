//! Value objects parsed from Web API responses
//!
//! Responses are deserialized into private wire structs first, then turned
//! into snapshots. Optional fields fall back to these defaults:
//!
//! | field                          | default           |
//! |--------------------------------|-------------------|
//! | track title                    | `"Unknown"`       |
//! | track artist                   | `"Unknown Artist"`|
//! | album name, ids, uris, covers  | empty             |
//! | duration / progress            | `0`               |
//! | explicit / collaborative       | `false`           |
//! | device volume                  | `50`              |
//! | device name                    | `"Unknown Device"`|
//! | playlist owner                 | `"Unknown"`       |
//! | playlist track count           | `0`               |

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub const DEFAULT_VOLUME: u8 = 50;

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawImage {
    url: String,
    width: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawArtist {
    name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAlbum {
    id: Option<String>,
    name: Option<String>,
    images: Option<Vec<RawImage>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct RawTrack {
    id: Option<String>,
    uri: Option<String>,
    name: Option<String>,
    artists: Vec<RawArtist>,
    album: Option<RawAlbum>,
    duration_ms: Option<u64>,
    explicit: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct RawDevice {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    is_active: Option<bool>,
    volume_percent: Option<u8>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct RawCurrentlyPlaying {
    pub(super) is_playing: Option<bool>,
    pub(super) progress_ms: Option<u64>,
    pub(super) item: Option<RawTrack>,
    pub(super) device: Option<RawDevice>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct RawDevices {
    pub(super) devices: Vec<RawDevice>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawOwner {
    id: Option<String>,
    display_name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawPlaylistItem {
    track: Option<RawTrack>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawPlaylistTracks {
    total: Option<u32>,
    items: Vec<Option<RawPlaylistItem>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct RawPlaylist {
    id: Option<String>,
    uri: Option<String>,
    name: Option<String>,
    owner: Option<RawOwner>,
    images: Option<Vec<RawImage>>,
    tracks: Option<RawPlaylistTracks>,
    collaborative: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct RawPage<T> {
    pub(super) items: Vec<Option<T>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct RawSearch {
    pub(super) tracks: Option<RawPage<RawTrack>>,
    pub(super) playlists: Option<RawPage<RawPlaylist>>,
}

/// Strict on syntax, lenient on content: invalid JSON is a parse failure,
/// missing fields take their defaults.
pub(super) fn parse<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::ApiParseFailed(e.to_string()))
}

fn pick_covers(images: Option<Vec<RawImage>>) -> (String, String) {
    let mut images: Vec<RawImage> = images
        .unwrap_or_default()
        .into_iter()
        .filter(|i| !i.url.is_empty())
        .collect();
    // Unknown widths sort last so a sized image wins either end
    images.sort_by_key(|i| std::cmp::Reverse(i.width.unwrap_or(0)));
    let large = images.first().map(|i| i.url.clone()).unwrap_or_default();
    let small = images
        .iter()
        .rev()
        .find(|i| i.width.is_some())
        .or(images.last())
        .map(|i| i.url.clone())
        .unwrap_or_default();
    (large, small)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackSnapshot {
    pub id: String,
    pub uri: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: String,
    /// Largest cover, for the now-playing screen.
    pub cover_url_large: String,
    /// Smallest cover, for lists.
    pub cover_url_small: String,
    pub duration_ms: u64,
    pub explicit: bool,
}

impl From<RawTrack> for TrackSnapshot {
    fn from(raw: RawTrack) -> Self {
        let album = raw.album.unwrap_or_default();
        let (cover_url_large, cover_url_small) = pick_covers(album.images);
        Self {
            id: raw.id.unwrap_or_default(),
            uri: raw.uri.unwrap_or_default(),
            title: raw.name.unwrap_or_else(|| "Unknown".to_string()),
            artist: raw
                .artists
                .into_iter()
                .next()
                .and_then(|a| a.name)
                .unwrap_or_else(|| "Unknown Artist".to_string()),
            album: album.name.unwrap_or_default(),
            album_id: album.id.unwrap_or_default(),
            cover_url_large,
            cover_url_small,
            duration_ms: raw.duration_ms.unwrap_or(0),
            explicit: raw.explicit.unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub is_active: bool,
    pub volume_percent: u8,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: "Unknown Device".to_string(),
            kind: String::new(),
            is_active: false,
            volume_percent: DEFAULT_VOLUME,
        }
    }
}

impl From<RawDevice> for DeviceSnapshot {
    fn from(raw: RawDevice) -> Self {
        let defaults = Self::default();
        Self {
            id: raw.id.unwrap_or(defaults.id),
            name: raw.name.unwrap_or(defaults.name),
            kind: raw.kind.unwrap_or(defaults.kind),
            is_active: raw.is_active.unwrap_or(defaults.is_active),
            volume_percent: raw.volume_percent.unwrap_or(defaults.volume_percent).min(100),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub owner: String,
    pub cover_url: String,
    pub track_count: u32,
    pub collaborative: bool,
}

impl From<RawPlaylist> for PlaylistSummary {
    fn from(raw: RawPlaylist) -> Self {
        let (cover_url, _) = pick_covers(raw.images);
        let owner = raw.owner.unwrap_or_default();
        Self {
            id: raw.id.unwrap_or_default(),
            uri: raw.uri.unwrap_or_default(),
            name: raw.name.unwrap_or_default(),
            owner: owner
                .display_name
                .or(owner.id)
                .unwrap_or_else(|| "Unknown".to_string()),
            cover_url,
            track_count: raw.tracks.and_then(|t| t.total).unwrap_or(0),
            collaborative: raw.collaborative.unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaylistDetail {
    pub summary: PlaylistSummary,
    pub tracks: Vec<TrackSnapshot>,
}

impl From<RawPlaylist> for PlaylistDetail {
    fn from(mut raw: RawPlaylist) -> Self {
        let tracks = raw
            .tracks
            .as_mut()
            .map(|t| std::mem::take(&mut t.items))
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter_map(|item| item.track)
            .map(TrackSnapshot::from)
            .collect();
        Self {
            summary: PlaylistSummary::from(raw),
            tracks,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub tracks: Vec<TrackSnapshot>,
    pub playlists: Vec<PlaylistSummary>,
}

impl From<RawSearch> for SearchResults {
    fn from(raw: RawSearch) -> Self {
        Self {
            tracks: raw
                .tracks
                .map(|p| p.items.into_iter().flatten().map(TrackSnapshot::from).collect())
                .unwrap_or_default(),
            playlists: raw
                .playlists
                .map(|p| p.items.into_iter().flatten().map(PlaylistSummary::from).collect())
                .unwrap_or_default(),
        }
    }
}

/// What the device currently knows about playback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub track: Option<TrackSnapshot>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub device: Option<DeviceSnapshot>,
    /// Whether the current track is in the user's library.
    pub saved: bool,
}

impl PlaybackSnapshot {
    pub fn track_id(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.id.as_str())
    }

    pub fn volume(&self) -> u8 {
        self.device
            .as_ref()
            .map(|d| d.volume_percent)
            .unwrap_or(DEFAULT_VOLUME)
    }

    /// Position in the current track as a fraction, 0 without a known length.
    pub fn progress(&self) -> f32 {
        match &self.track {
            Some(track) if track.duration_ms > 0 => {
                (self.progress_ms.min(track.duration_ms) as f64 / track.duration_ms as f64) as f32
            }
            _ => 0.0,
        }
    }

    /// Compare against an earlier snapshot.
    pub fn diff(&self, previous: &PlaybackSnapshot) -> PlaybackDelta {
        PlaybackDelta {
            track_changed: self.track_id() != previous.track_id(),
            playing_changed: self.is_playing != previous.is_playing,
            volume_changed: self.device.is_some() && self.volume() != previous.volume(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackDelta {
    pub track_changed: bool,
    pub playing_changed: bool,
    pub volume_changed: bool,
}

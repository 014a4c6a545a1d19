//! Saved tracks, devices, playlists and search

use serde_json::json;

use super::model::{
    self, DeviceSnapshot, PlaylistDetail, PlaylistSummary, RawDevices, RawPage, RawPlaylist,
    RawSearch, SearchResults,
};
use super::SessionClient;
use crate::error::Result;
use crate::http::Method;
use crate::{log_api_request, log_api_result};

const PLAYLIST_PAGE_SIZE: &str = "50";

impl SessionClient {
    pub async fn save_track(&mut self, track_id: &str) -> Result<()> {
        log_api_request!("save_track", track_id);
        let url = self.url_with_params("/me/tracks", &[("ids", track_id)])?;
        let result = self.request(Method::Put, url, None).await.map(|_| ());
        log_api_result!("save_track", result);
        if result.is_ok() {
            self.mark_saved(track_id, true);
        }
        result
    }

    pub async fn remove_track(&mut self, track_id: &str) -> Result<()> {
        log_api_request!("remove_track", track_id);
        let url = self.url_with_params("/me/tracks", &[("ids", track_id)])?;
        let result = self.request(Method::Delete, url, None).await.map(|_| ());
        log_api_result!("remove_track", result);
        if result.is_ok() {
            self.mark_saved(track_id, false);
        }
        result
    }

    pub async fn is_track_saved(&mut self, track_id: &str) -> Result<bool> {
        log_api_request!("check_saved", track_id);
        let url = self.url_with_params("/me/tracks/contains", &[("ids", track_id)])?;
        let response = self.request(Method::Get, url, None).await?;
        let flags: Vec<bool> = model::parse(&response.body)?;
        let saved = flags.first().copied().unwrap_or(false);
        self.mark_saved(track_id, saved);
        Ok(saved)
    }

    /// Save or unsave the current track. Returns the new saved state, or
    /// `None` when nothing is playing.
    pub async fn toggle_saved(&mut self) -> Result<Option<bool>> {
        let Some(track_id) = self.playback.track_id().map(str::to_string) else {
            tracing::debug!("No current track to save");
            return Ok(None);
        };
        if self.playback.saved {
            self.remove_track(&track_id).await?;
            Ok(Some(false))
        } else {
            self.save_track(&track_id).await?;
            Ok(Some(true))
        }
    }

    fn mark_saved(&mut self, track_id: &str, saved: bool) {
        if self.playback.track_id() == Some(track_id) {
            self.playback.saved = saved;
        }
    }

    pub async fn devices(&mut self) -> Result<Vec<DeviceSnapshot>> {
        log_api_request!("devices");
        let response = self.get("/me/player/devices").await?;
        let raw: RawDevices = model::parse(&response.body)?;
        Ok(raw.devices.into_iter().map(DeviceSnapshot::from).collect())
    }

    /// Move playback to `device_id`.
    pub async fn transfer_playback(&mut self, device_id: &str, play: bool) -> Result<()> {
        log_api_request!("transfer_playback", device_id, play);
        let result = self
            .put("/me/player", Some(json!({ "device_ids": [device_id], "play": play })))
            .await;
        log_api_result!("transfer_playback", result);
        result
    }

    pub async fn playlists(&mut self) -> Result<Vec<PlaylistSummary>> {
        log_api_request!("playlists");
        let url = self.url_with_params("/me/playlists", &[("limit", PLAYLIST_PAGE_SIZE)])?;
        let response = self.request(Method::Get, url, None).await?;
        let raw: RawPage<RawPlaylist> = model::parse(&response.body)?;
        Ok(raw
            .items
            .into_iter()
            .flatten()
            .map(PlaylistSummary::from)
            .collect())
    }

    pub async fn playlist(&mut self, playlist_id: &str) -> Result<PlaylistDetail> {
        log_api_request!("playlist", playlist_id);
        let url = self.url_with_segments(&["playlists", playlist_id])?;
        let response = self.request(Method::Get, url, None).await?;
        let raw: RawPlaylist = model::parse(&response.body)?;
        Ok(PlaylistDetail::from(raw))
    }

    pub async fn search(&mut self, query: &str, limit: u32) -> Result<SearchResults> {
        log_api_request!("search", query, limit);
        let url = self.url_with_params(
            "/search",
            &[
                ("q", query),
                ("type", "track,playlist"),
                ("limit", limit.to_string().as_str()),
            ],
        )?;
        let response = self.request(Method::Get, url, None).await?;
        let raw: RawSearch = model::parse(&response.body)?;
        Ok(SearchResults::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::harness;
    use crate::http::{Body, Method};

    #[tokio::test(start_paused = true)]
    async fn saved_state_follows_current_track() {
        let mut h = harness();
        h.transport.push(200, r#"{"is_playing":true,"item":{"id":"t1","name":"Song"}}"#);
        h.transport.push(200, "[false]");
        h.transport.push(200, "");
        h.transport.push(200, "");

        h.session.refresh_playback().await.unwrap();
        assert!(!h.session.is_track_saved("t1").await.unwrap());

        assert_eq!(h.session.toggle_saved().await.unwrap(), Some(true));
        let save = h.transport.last_request().unwrap();
        assert_eq!(save.method, Method::Put);
        assert!(save.url.ends_with("/me/tracks?ids=t1"));
        assert!(h.session.playback().saved);

        assert_eq!(h.session.toggle_saved().await.unwrap(), Some(false));
        assert_eq!(h.transport.last_request().unwrap().method, Method::Delete);
        assert!(!h.session.playback().saved);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_saved_without_track_is_a_no_op() {
        let mut h = harness();
        assert_eq!(h.session.toggle_saved().await.unwrap(), None);
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn devices_and_transfer() {
        let mut h = harness();
        h.transport.push(
            200,
            r#"{"devices":[
                {"id":"d1","name":"Kitchen","type":"Speaker","is_active":false,"volume_percent":20},
                {"id":"d2","name":"Desk","type":"Computer","is_active":true}
            ]}"#,
        );
        h.transport.push(204, "");

        let devices = h.session.devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        let active = devices.into_iter().find(|d| d.is_active).unwrap();
        assert_eq!(active.id, "d2");
        assert_eq!(active.volume_percent, 50);

        h.session.transfer_playback("d1", true).await.unwrap();
        let request = h.transport.last_request().unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(
            request.body,
            Some(Body::Json(serde_json::json!({ "device_ids": ["d1"], "play": true })))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn playlists_and_detail() {
        let mut h = harness();
        h.transport.push(
            200,
            r#"{"items":[{"id":"p1","uri":"spotify:playlist:p1","name":"Mix","tracks":{"total":2}}]}"#,
        );
        h.transport.push(
            200,
            r#"{"id":"p1","name":"Mix","tracks":{"total":2,"items":[
                {"track":{"id":"t1","name":"One"}},
                {"track":null}
            ]}}"#,
        );

        let lists = h.session.playlists().await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].track_count, 2);
        assert!(h.transport.last_request().unwrap().url.ends_with("/me/playlists?limit=50"));

        let detail = h.session.playlist("p1").await.unwrap();
        assert_eq!(detail.summary.name, "Mix");
        assert_eq!(detail.tracks.len(), 1);
        assert!(h.transport.last_request().unwrap().url.ends_with("/playlists/p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_id_stays_one_path_segment() {
        let mut h = harness();
        h.transport.push(200, r#"{"id":"x","name":"Odd"}"#);

        h.session.playlist("a/b c?x").await.unwrap();

        let url = h.transport.last_request().unwrap().url;
        assert_eq!(url, "https://api.test/v1/playlists/a%2Fb%20c%3Fx");
    }

    #[tokio::test(start_paused = true)]
    async fn search_encodes_query() {
        let mut h = harness();
        h.transport.push(200, r#"{"tracks":{"items":[{"id":"t1","name":"Hit"}]}}"#);

        let results = h.session.search("daft punk & co", 5).await.unwrap();

        assert_eq!(results.tracks.len(), 1);
        assert!(results.playlists.is_empty());
        let url = h.transport.last_request().unwrap().url;
        assert!(url.contains("q=daft+punk+%26+co"));
        assert!(url.contains("type=track%2Cplaylist"));
        assert!(url.ends_with("limit=5"));
    }
}

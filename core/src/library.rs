/*
    spotify-export-rs | Rust CLI tool to export playlists and Liked Songs to CSV.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::fetcher::{FetchError, FetchRequest, PaginatedFetcher};
use crate::models::{FetchProgress, Page, Playlist, PlaylistItem, UserProfile};
use log::info;
use serde::de::IgnoredAny;
use std::fmt;

pub const PLAYLISTS_PAGE_SIZE: u32 = 50;
pub const PLAYLIST_TRACKS_PAGE_SIZE: u32 = 100;
pub const SAVED_TRACKS_PAGE_SIZE: u32 = 50;

/// A validated base62 playlist identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaylistId(String);

impl PlaylistId {
    /// Accepts `37i9dQZF1DXcBWIGoYBM5M`, `spotify:playlist:37i9...` or
    /// `https://open.spotify.com/playlist/37i9...?si=...`.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let trimmed = raw.trim();
        let candidate = if let Some(id) = trimmed.strip_prefix("spotify:playlist:") {
            id
        } else if let Some((_, rest)) = trimmed.split_once("open.spotify.com/playlist/") {
            rest.split(['?', '/', '#']).next().unwrap_or_default()
        } else {
            trimmed
        };

        if candidate.is_empty() || !candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FetchError::InvalidId(raw.to_string()));
        }
        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The read endpoints of the user's music library.
pub struct LibraryClient {
    fetcher: PaginatedFetcher,
}

impl LibraryClient {
    pub fn new(fetcher: PaginatedFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &PaginatedFetcher {
        &self.fetcher
    }

    pub async fn profile(&self) -> Result<UserProfile, FetchError> {
        self.fetcher.request_with_retry("/me").await
    }

    pub async fn playlists<P>(&self, on_progress: P) -> Result<Vec<Playlist>, FetchError>
    where
        P: FnMut(&FetchProgress),
    {
        let request = FetchRequest::paged(
            format!("/me/playlists?limit={}", PLAYLISTS_PAGE_SIZE),
            PLAYLISTS_PAGE_SIZE,
        );
        let playlists = self
            .fetcher
            .fetch_all_pages(&request, |_: &Playlist| true, on_progress)
            .await?;
        info!("Loaded {} playlists", playlists.len());
        Ok(playlists)
    }

    /// All entries of a playlist, without placeholders for unavailable tracks.
    pub async fn playlist_tracks<P>(
        &self,
        playlist: &PlaylistId,
        on_progress: P,
    ) -> Result<Vec<PlaylistItem>, FetchError>
    where
        P: FnMut(&FetchProgress),
    {
        let request = FetchRequest::paged(
            format!(
                "/playlists/{}/tracks?limit={}",
                playlist, PLAYLIST_TRACKS_PAGE_SIZE
            ),
            PLAYLIST_TRACKS_PAGE_SIZE,
        );
        self.fetcher
            .fetch_all_pages(&request, PlaylistItem::has_track, on_progress)
            .await
    }

    /// All saved tracks ("Liked Songs"), without placeholders.
    pub async fn liked_songs<P>(&self, on_progress: P) -> Result<Vec<PlaylistItem>, FetchError>
    where
        P: FnMut(&FetchProgress),
    {
        let request = FetchRequest::paged(
            format!("/me/tracks?limit={}", SAVED_TRACKS_PAGE_SIZE),
            SAVED_TRACKS_PAGE_SIZE,
        );
        self.fetcher
            .fetch_all_pages(&request, PlaylistItem::has_track, on_progress)
            .await
    }

    /// Declared size of Liked Songs, from a single one-item page.
    pub async fn liked_songs_count(&self) -> Result<u32, FetchError> {
        let page: Page<IgnoredAny> = self.fetcher.request_with_retry("/me/tracks?limit=1").await?;
        Ok(page.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::tests::{authenticated_session, page, test_config};
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::HttpResponse;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    fn library_with(responses: Vec<HttpResponse>) -> (Arc<ScriptedTransport>, LibraryClient) {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let fetcher = PaginatedFetcher::new(test_config(), transport.clone(), authenticated_session());
        (transport, LibraryClient::new(fetcher))
    }

    fn saved_tracks(count: usize, offset: usize) -> serde_json::Value {
        let items: Vec<_> = (0..count)
            .map(|i| {
                if (offset + i) % 10 == 9 {
                    json!({ "added_at": "2024-01-01T00:00:00Z", "track": null })
                } else {
                    json!({
                        "added_at": "2024-01-01T00:00:00Z",
                        "track": { "name": format!("Track {}", offset + i) }
                    })
                }
            })
            .collect();
        json!(items)
    }

    #[test]
    fn test_playlist_id_forms() {
        let id = "37i9dQZF1DXcBWIGoYBM5M";
        assert_eq!(PlaylistId::parse(id).unwrap().as_str(), id);
        assert_eq!(
            PlaylistId::parse("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M").unwrap().as_str(),
            id
        );
        assert_eq!(
            PlaylistId::parse("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc")
                .unwrap()
                .as_str(),
            id
        );
        assert!(matches!(PlaylistId::parse(""), Err(FetchError::InvalidId(_))));
        assert!(matches!(
            PlaylistId::parse("../me/tracks"),
            Err(FetchError::InvalidId(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liked_songs_120_tracks_in_three_pages() {
        let (transport, library) = library_with(vec![
            page(saved_tracks(50, 0), 120, Some("https://api.test/v1/me/tracks?offset=50&limit=50")),
            page(saved_tracks(50, 50), 120, Some("https://api.test/v1/me/tracks?offset=100&limit=50")),
            page(saved_tracks(20, 100), 120, None),
        ]);

        let mut reports = Vec::new();
        let items = library.liked_songs(|p| reports.push(*p)).await.unwrap();

        assert_eq!(transport.requests().len(), 3);
        assert_eq!(transport.requests()[0].url, "https://api.test/v1/me/tracks?limit=50");
        // every tenth entry is a placeholder
        assert_eq!(items.len(), 108);
        assert!(items.iter().all(PlaylistItem::has_track));
        assert_eq!(items[0].track.as_ref().unwrap().name, "Track 0");

        let last = reports.last().unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(last.page_index, 3);
        assert_eq!(last.page_count, Some(3));
        assert_eq!(last.items_total, 120);
        assert_eq!(last.items_loaded, 108);
    }

    #[tokio::test]
    async fn test_playlist_tracks_endpoint() {
        let (transport, library) = library_with(vec![page(saved_tracks(3, 0), 3, None)]);
        let id = PlaylistId::parse("abc123").unwrap();

        let items = library.playlist_tracks(&id, |_| {}).await.unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(
            transport.requests()[0].url,
            "https://api.test/v1/playlists/abc123/tracks?limit=100"
        );
    }

    #[tokio::test]
    async fn test_playlists_and_profile() {
        let (transport, library) = library_with(vec![
            HttpResponse::new(
                StatusCode::OK,
                r#"{"id":"u1","display_name":"Ana","images":[{"url":"http://img"}]}"#,
            ),
            page(
                json!([
                    {"id": "p1", "name": "Road", "owner": {"id": "u1", "display_name": "Ana"}, "tracks": {"total": 10}},
                    {"id": "p2", "name": "Gym", "owner": {"id": "u2"}, "tracks": {"total": 3}, "collaborative": true}
                ]),
                2,
                None,
            ),
        ]);

        let profile = library.profile().await.unwrap();
        assert_eq!(profile.name(), "Ana");

        let playlists = library.playlists(|_| {}).await.unwrap();
        assert_eq!(playlists.len(), 2);
        assert_eq!(playlists[1].owner_name(), "u2");
        assert!(playlists[1].collaborative);

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://api.test/v1/me".to_string(),
                "https://api.test/v1/me/playlists?limit=50".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_liked_songs_count_reads_total_only() {
        let (transport, library) = library_with(vec![page(
            json!([{"track": {"name": "x"}}]),
            1234,
            Some("https://api.test/v1/me/tracks?offset=1&limit=1"),
        )]);

        assert_eq!(library.liked_songs_count().await.unwrap(), 1234);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.requests()[0].url, "https://api.test/v1/me/tracks?limit=1");
    }
}

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

pub mod auth;
pub mod clock;
pub mod config;
pub mod csv;
pub mod export;
pub mod fetcher;
pub mod library;
pub mod models;
pub mod session;
pub mod transport;

// Re-export key items for convenience
pub use auth::{parse_callback, AuthError, CredentialManager};
pub use clock::SystemClock;
pub use config::{Config, ConfigError};
pub use export::{ExportError, ExportEvent, ExportTarget, ExportedFile, Exporter};
pub use fetcher::{FetchError, FetchRequest, PaginatedFetcher};
pub use library::{LibraryClient, PlaylistId};
pub use models::{FetchProgress, Playlist, PlaylistItem, UserProfile};
pub use session::Session;
pub use transport::{HttpTransport, ReqwestTransport};

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

use crate::csv::{export_filename, generate_csv, UTF8_BOM};
use crate::fetcher::FetchError;
use crate::library::{LibraryClient, PlaylistId};
use crate::models::{FetchProgress, PlaylistItem};
use chrono::{NaiveDate, Utc};
use log::info;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Failed to write '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Something the user picked for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    LikedSongs,
    Playlist { id: PlaylistId, name: String },
}

impl ExportTarget {
    pub fn name(&self) -> &str {
        match self {
            ExportTarget::LikedSongs => "Liked Songs",
            ExportTarget::Playlist { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    pub name: String,
    pub path: PathBuf,
    pub track_count: usize,
}

#[derive(Debug)]
pub enum ExportEvent<'a> {
    Started {
        name: &'a str,
        index: usize,
        total: usize,
    },
    Progress {
        name: &'a str,
        progress: FetchProgress,
    },
    Finished(&'a ExportedFile),
}

/// Runs a batch of exports one after the other.
///
/// Targets are fetched strictly in sequence so the whole batch shares one
/// rate-limit budget. The first error aborts the batch; files written before
/// it are kept.
pub struct Exporter<'a> {
    library: &'a LibraryClient,
    out_dir: PathBuf,
    export_delay: Duration,
    date: NaiveDate,
}

impl<'a> Exporter<'a> {
    pub fn new(library: &'a LibraryClient, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_delay: library.fetcher().config().export_delay,
            library,
            out_dir: out_dir.into(),
            date: Utc::now().date_naive(),
        }
    }

    /// Overrides the date stamped into file names.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub async fn export_all<E>(
        &self,
        targets: &[ExportTarget],
        mut on_event: E,
    ) -> Result<Vec<ExportedFile>, ExportError>
    where
        E: FnMut(ExportEvent<'_>),
    {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|source| ExportError::Io {
                path: self.out_dir.clone(),
                source,
            })?;

        let mut exported = Vec::with_capacity(targets.len());
        let mut used_names = HashSet::new();

        for (index, target) in targets.iter().enumerate() {
            let name = target.name();
            on_event(ExportEvent::Started {
                name,
                index,
                total: targets.len(),
            });

            let on_progress = |progress: &FetchProgress| {
                on_event(ExportEvent::Progress {
                    name,
                    progress: *progress,
                })
            };
            let items = match target {
                ExportTarget::LikedSongs => self.library.liked_songs(on_progress).await?,
                ExportTarget::Playlist { id, .. } => {
                    self.library.playlist_tracks(id, on_progress).await?
                }
            };

            let file_name = unique_name(&mut used_names, export_filename(name, self.date));
            let file = write_csv(&self.out_dir.join(file_name), name, &items).await?;
            info!("Exported {} ({} tracks) to {}", name, file.track_count, file.path.display());

            on_event(ExportEvent::Finished(&file));
            exported.push(file);

            if index + 1 < targets.len() && !self.export_delay.is_zero() {
                sleep(self.export_delay).await;
            }
        }

        Ok(exported)
    }
}

// Two playlists may share a name; keep both files.
fn unique_name(used: &mut HashSet<String>, candidate: String) -> String {
    if used.insert(candidate.clone()) {
        return candidate;
    }

    let stem = candidate.trim_end_matches(".csv").to_string();
    let mut n = 2;
    loop {
        let next = format!("{}_{}.csv", stem, n);
        if used.insert(next.clone()) {
            return next;
        }
        n += 1;
    }
}

async fn write_csv(
    path: &Path,
    name: &str,
    items: &[PlaylistItem],
) -> Result<ExportedFile, ExportError> {
    let content = format!("{}{}", UTF8_BOM, generate_csv(items));
    tokio::fs::write(path, content)
        .await
        .map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(ExportedFile {
        name: name.to_string(),
        path: path.to_path_buf(),
        track_count: items.iter().filter(|i| i.has_track()).count(),
    })
}

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

use crate::models::PlaylistItem;
use chrono::{DateTime, NaiveDate, Utc};

/// Written at the start of every file so spreadsheet apps detect UTF-8.
pub const UTF8_BOM: &str = "\u{FEFF}";

pub const HEADER: [&str; 9] = [
    "Track Name",
    "Artist(s)",
    "Album",
    "Release Date",
    "Duration",
    "Popularity",
    "Explicit",
    "Date Added",
    "Spotify URL",
];

const MAX_FILENAME_STEM: usize = 100;

pub fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// `m:ss`, or an empty string when the duration is unknown.
pub fn format_duration(ms: Option<u64>) -> String {
    match ms {
        Some(ms) if ms > 0 => format!("{}:{:02}", ms / 60_000, (ms % 60_000) / 1000),
        _ => String::new(),
    }
}

/// RFC 3339 timestamps become `YYYY-MM-DD` (UTC); anything else is kept as is.
pub fn format_added_at(added_at: Option<&str>) -> String {
    match added_at {
        None | Some("") => String::new(),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc).format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| raw.to_string()),
    }
}

/// The CSV row for one entry, `None` for placeholder entries.
pub fn track_row(item: &PlaylistItem) -> Option<[String; 9]> {
    let track = item.track.as_ref()?;
    let artists = track
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<&str>>()
        .join(", ");

    Some([
        track.name.clone(),
        artists,
        track.album.name.clone(),
        track.album.release_date.clone().unwrap_or_default(),
        format_duration(track.duration_ms),
        track.popularity.map(|p| p.to_string()).unwrap_or_default(),
        if track.explicit { "Yes" } else { "No" }.to_string(),
        format_added_at(item.added_at.as_deref()),
        track.external_urls.spotify.clone().unwrap_or_default(),
    ])
}

/// Renders the header plus one row per track, joined with `\n`.
pub fn generate_csv(items: &[PlaylistItem]) -> String {
    let mut rows = vec![HEADER.map(escape_field).join(",")];
    rows.extend(
        items
            .iter()
            .filter_map(track_row)
            .map(|row| row.map(|field| escape_field(&field)).join(",")),
    );
    rows.join("\n")
}

/// `<sanitized name>_<YYYY-MM-DD>.csv`
pub fn export_filename(name: &str, date: NaiveDate) -> String {
    let mut stem = String::new();
    let mut in_whitespace = false;

    for c in name
        .chars()
        .filter(|c| !matches!(*c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
    {
        if c.is_whitespace() {
            if !in_whitespace {
                stem.push('_');
            }
            in_whitespace = true;
        } else {
            stem.push(c);
            in_whitespace = false;
        }
    }

    let stem: String = stem.chars().take(MAX_FILENAME_STEM).collect();
    format!("{}_{}.csv", stem, date.format("%Y-%m-%d"))
}

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

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";
pub const DEFAULT_AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

const DEFAULT_REQUEST_DELAY_MS: u64 = 100;
const DEFAULT_EXPORT_DELAY_MS: u64 = 500;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime settings shared by the credential manager and the fetcher.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub api_base: String,
    /// Pause between consecutive page requests of one resource.
    pub request_delay: Duration,
    /// Pause between two completed exports of a batch.
    pub export_delay: Duration,
    /// How many times a throttled request is retried before giving up.
    pub max_retries: u32,
    /// Base of the exponential backoff used when no `Retry-After` is sent.
    pub initial_backoff: Duration,
}

impl Config {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            authorize_endpoint: DEFAULT_AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            export_delay: Duration::from_millis(DEFAULT_EXPORT_DELAY_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }

    /// Loads the configuration from the process environment.
    ///
    /// Only `SPOTIFY_CLIENT_ID` is mandatory. Call `dotenvy::dotenv()` beforehand
    /// if settings live in a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = get("SPOTIFY_CLIENT_ID").ok_or(ConfigError::Missing("SPOTIFY_CLIENT_ID"))?;
        let mut config = Self::new(client_id.trim());

        if let Some(uri) = get("SPOTIFY_REDIRECT_URI") {
            config.redirect_uri = uri;
        }
        if let Some(url) = get("SPOTIFY_AUTHORIZE_URL") {
            config.authorize_endpoint = url;
        }
        if let Some(url) = get("SPOTIFY_TOKEN_URL") {
            config.token_endpoint = url;
        }
        if let Some(url) = get("SPOTIFY_API_BASE") {
            config.api_base = url;
        }
        if let Some(ms) = get("SPOTIFY_REQUEST_DELAY_MS") {
            config.request_delay = parse_millis("SPOTIFY_REQUEST_DELAY_MS", &ms)?;
        }
        if let Some(ms) = get("SPOTIFY_EXPORT_DELAY_MS") {
            config.export_delay = parse_millis("SPOTIFY_EXPORT_DELAY_MS", &ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("SPOTIFY_CLIENT_ID"));
        }

        if !self.redirect_uri.starts_with("http://") && !self.redirect_uri.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                key: "SPOTIFY_REDIRECT_URI",
                reason: format!("'{}' is not an http(s) URL", self.redirect_uri),
            });
        }

        Ok(())
    }

    /// Resolves an API path (or an absolute continuation URL) against `api_base`.
    pub fn api_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
}

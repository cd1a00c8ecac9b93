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

use crate::config::Config;
use crate::session::{Credential, PendingAuthorization, Session};
use crate::transport::{HttpTransport, TransportError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use log::{debug, info};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Read-only access to private and collaborative playlists plus Liked Songs.
pub const SCOPES: [&str; 3] = [
    "playlist-read-private",
    "playlist-read-collaborative",
    "user-library-read",
];

pub const CODE_VERIFIER_LENGTH: usize = 128;

/// RFC 7636 unreserved characters.
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const GENERIC_EXCHANGE_ERROR: &str = "Failed to exchange code for token";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No login in progress. Please start the login again.")]
    MissingPendingLogin,
    #[error("Token exchange rejected: {0}")]
    Exchange(String),
    #[error("Authorization was denied by the user")]
    AccessDenied,
    #[error("Invalid authorization callback: {0}")]
    Callback(String),
    #[error("Invalid authorization endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("Malformed token response: {0}")]
    TokenResponse(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error_description: Option<String>,
}

/// Generates a fresh 128 character code verifier from a CSPRNG.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::rng();
    (0..CODE_VERIFIER_LENGTH)
        .map(|_| VERIFIER_ALPHABET[rng.random_range(0..VERIFIER_ALPHABET.len())] as char)
        .collect()
}

/// code_challenge = BASE64URL(SHA256(code_verifier)), unpadded.
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Extracts the authorization code from the URL the browser was redirected to.
///
/// A bare query string (`code=...`) is accepted as well as a full URL.
pub fn parse_callback(redirected: &str) -> Result<String, AuthError> {
    let redirected = redirected.trim();
    let query = match Url::parse(redirected) {
        Ok(url) => url.query().unwrap_or_default().to_string(),
        Err(_) => redirected.trim_start_matches('?').to_string(),
    };

    let mut code = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "error" if value == "access_denied" => return Err(AuthError::AccessDenied),
            "error" => return Err(AuthError::Callback(value.into_owned())),
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            _ => {}
        }
    }

    code.ok_or_else(|| AuthError::Callback("no authorization code in redirect".to_string()))
}

/// Obtains and holds the bearer credential using the authorization code flow
/// with PKCE. No client secret is involved.
pub struct CredentialManager {
    config: Config,
    transport: Arc<dyn HttpTransport>,
    session: Arc<Session>,
}

impl CredentialManager {
    pub fn new(config: Config, transport: Arc<dyn HttpTransport>, session: Arc<Session>) -> Self {
        Self {
            config,
            transport,
            session,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Starts a login attempt and returns the URL the user has to open.
    ///
    /// Any previous pending attempt is replaced, even when building the URL
    /// fails, so only the most recent authorization URL can be completed.
    pub fn begin_login(&self) -> Result<Url, AuthError> {
        let verifier = generate_code_verifier();
        let challenge = code_challenge(&verifier);

        self.session.set_pending(PendingAuthorization {
            code_verifier: verifier,
        });
        let url = self.authorize_url(&challenge)?;

        info!("Login started, waiting for authorization callback");
        Ok(url)
    }

    fn authorize_url(&self, challenge: &str) -> Result<Url, AuthError> {
        let scope = SCOPES.join(" ");
        let url = Url::parse_with_params(
            &self.config.authorize_endpoint,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("code_challenge_method", "S256"),
                ("code_challenge", challenge),
                ("show_dialog", "false"),
            ],
        )?;
        Ok(url)
    }

    /// Exchanges the authorization code for an access token.
    ///
    /// The pending verifier is consumed up front: whatever the outcome, a new
    /// `begin_login` is needed before the next attempt.
    pub async fn complete_login(&self, authorization_code: &str) -> Result<(), AuthError> {
        let pending = self
            .session
            .take_pending()
            .ok_or(AuthError::MissingPendingLogin)?;

        debug!("Exchanging authorization code at {}", self.config.token_endpoint);
        let response = self
            .transport
            .post_form(
                &self.config.token_endpoint,
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("grant_type", "authorization_code"),
                    ("code", authorization_code),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("code_verifier", pending.code_verifier.as_str()),
                ],
            )
            .await?;

        if !response.status.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&response.body)
                .ok()
                .and_then(|e| e.error_description)
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| GENERIC_EXCHANGE_ERROR.to_string());
            return Err(AuthError::Exchange(message));
        }

        let token: TokenResponse = serde_json::from_str(&response.body)?;
        let expires_at_ms = self
            .session
            .now_ms()
            .saturating_add(token.expires_in.saturating_mul(1000));

        self.session.store_credential(Credential {
            access_token: token.access_token,
            expires_at_ms,
        });

        info!("Login complete, token valid for {}s", token.expires_in);
        Ok(())
    }

    pub fn get_token(&self) -> Option<String> {
        self.session.bearer_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_token().is_some()
    }

    pub fn logout(&self) {
        self.session.clear();
        debug!("Session cleared");
    }
}

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

use crate::clock::Clock;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A bearer credential obtained from the token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at_ms: i64,
}

impl Credential {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// The secret verifier of the one login attempt currently in flight.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub code_verifier: String,
}

// Keep the verifier out of logs.
impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("code_verifier", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    credential: Option<Credential>,
    pending: Option<PendingAuthorization>,
}

/// Session-scoped credential store.
///
/// One `Session` is created when the application starts and handed (behind an
/// `Arc`) to both the `CredentialManager` and the `PaginatedFetcher`. Nothing
/// here is ever written to disk; dropping the session forgets the credential.
pub struct Session {
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::default(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Replaces any previous pending login.
    pub fn set_pending(&self, pending: PendingAuthorization) {
        self.state().pending = Some(pending);
    }

    /// Reads the pending login and forgets it.
    pub fn take_pending(&self) -> Option<PendingAuthorization> {
        self.state().pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.state().pending.is_some()
    }

    pub fn store_credential(&self, credential: Credential) {
        self.state().credential = Some(credential);
    }

    /// The stored access token, unless it is missing or expired.
    pub fn bearer_token(&self) -> Option<String> {
        let now = self.now_ms();
        self.state()
            .credential
            .as_ref()
            .filter(|c| c.is_valid_at(now))
            .map(|c| c.access_token.clone())
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.credential = None;
        state.pending = None;
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        // The state is two plain Options; a panic elsewhere cannot leave it half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Session")
            .field("authenticated", &state.credential.is_some())
            .field("pending_login", &state.pending.is_some())
            .finish()
    }
}

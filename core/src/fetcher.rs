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
use crate::models::{FetchProgress, Page};
use crate::session::Session;
use crate::transport::{HttpResponse, HttpTransport, TransportError};
use futures::stream::{self, Stream, TryStreamExt};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Not authenticated. Please log in again.")]
    Unauthenticated,
    #[error("Too many requests. Please try again in a few minutes.")]
    RateLimitExceeded { attempts: u32 },
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Invalid playlist ID: {0}")]
    InvalidId(String),
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

fn api_error(response: &HttpResponse) -> FetchError {
    let message = serde_json::from_str::<ApiErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("API error: {}", response.status.as_u16()));

    FetchError::Api {
        status: response.status.as_u16(),
        message,
    }
}

/// Where a paginated fetch starts and how big its pages are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// API path (`/me/tracks?limit=50`) or absolute URL.
    pub url: String,
    /// Fixed page size, if the resource has one. Used to derive the page count.
    pub page_size: Option<u32>,
}

impl FetchRequest {
    pub fn paged(url: impl Into<String>, page_size: u32) -> Self {
        Self {
            url: url.into(),
            page_size: Some(page_size),
        }
    }
}

/// How throttled (HTTP 429) requests are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Wait before retry number `attempt + 1`.
    ///
    /// The server's `Retry-After` (in seconds) wins; without it the wait is
    /// `initial_backoff * 2^attempt`.
    pub fn wait_for(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
            return Duration::from_secs(secs);
        }
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
        }
    }
}

/// Attempt counter of a single request; dropped once the request resolves.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
}

/// Drains server-paginated resources, one page at a time.
///
/// Pages are requested strictly in sequence, with `request_delay` between
/// consecutive requests, and each request is retried on HTTP 429 according
/// to the `RetryPolicy`.
pub struct PaginatedFetcher {
    config: Config,
    retry: RetryPolicy,
    transport: Arc<dyn HttpTransport>,
    session: Arc<Session>,
}

impl PaginatedFetcher {
    pub fn new(config: Config, transport: Arc<dyn HttpTransport>, session: Arc<Session>) -> Self {
        let retry = RetryPolicy::from(&config);
        Self {
            config,
            retry,
            transport,
            session,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Performs one authenticated GET and decodes the JSON body.
    pub async fn request_with_retry<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<T, FetchError> {
        let url = self.config.api_url(endpoint);
        let mut state = RetryState::default();

        loop {
            let token = self
                .session
                .bearer_token()
                .ok_or(FetchError::Unauthenticated)?;

            debug!("GET {} (attempt {})", url, state.attempt + 1);
            let response = self.transport.get(&url, &token).await?;

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                if state.attempt >= self.retry.max_retries {
                    warn!(
                        "Rate limited on {}, giving up after {} attempts",
                        url,
                        state.attempt + 1
                    );
                    return Err(FetchError::RateLimitExceeded {
                        attempts: state.attempt + 1,
                    });
                }

                let wait = self
                    .retry
                    .wait_for(state.attempt, response.retry_after.as_deref());
                warn!(
                    "Rate limited. Waiting {}ms before retry {}/{}",
                    wait.as_millis(),
                    state.attempt + 1,
                    self.retry.max_retries
                );
                sleep(wait).await;
                state.attempt += 1;
                continue;
            }

            if !response.status.is_success() {
                return Err(api_error(&response));
            }

            return serde_json::from_str(&response.body).map_err(FetchError::from);
        }
    }

    /// Lazily walks the pages of a resource by following `next`.
    ///
    /// The inter-request delay is applied before every page but the first.
    pub fn pages<'a, T>(
        &'a self,
        request: &FetchRequest,
    ) -> impl Stream<Item = Result<Page<T>, FetchError>> + 'a
    where
        T: DeserializeOwned + 'a,
    {
        let start = Some(request.url.clone());

        stream::try_unfold((start, 0u32), move |(next, fetched)| async move {
            let Some(url) = next else {
                return Ok::<_, FetchError>(None);
            };

            if fetched > 0 && !self.config.request_delay.is_zero() {
                sleep(self.config.request_delay).await;
            }

            let page: Page<T> = self.request_with_retry(&url).await?;
            let following = page.next.clone();
            Ok(Some((page, (following, fetched + 1))))
        })
    }

    /// Fetches every page and returns the kept items in server order.
    ///
    /// `keep` drops unwanted entries; `on_progress` is called once per page,
    /// after that page's items were merged.
    pub async fn fetch_all_pages<T, F, P>(
        &self,
        request: &FetchRequest,
        keep: F,
        mut on_progress: P,
    ) -> Result<Vec<T>, FetchError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
        P: FnMut(&FetchProgress),
    {
        let mut results = Vec::new();
        let mut page_index = 0u32;
        let mut pages = pin!(self.pages::<T>(request));

        while let Some(page) = pages.try_next().await? {
            page_index += 1;
            let total = page.total;
            results.extend(page.items.into_iter().filter(|item| keep(item)));

            on_progress(&FetchProgress {
                items_loaded: results.len(),
                items_total: total,
                page_index,
                page_count: request.page_size.map(|size| total.div_ceil(size.max(1))),
            });
        }

        debug!("Fetched {} items in {} pages from {}", results.len(), page_index, request.url);
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::Credential;
    use crate::transport::mock::ScriptedTransport;
    use serde_json::json;

    pub(crate) fn test_config() -> Config {
        let mut config = Config::new("client");
        config.api_base = "https://api.test/v1".to_string();
        config
    }

    pub(crate) fn authenticated_session() -> Arc<Session> {
        let session = Arc::new(Session::new(Arc::new(ManualClock::at(0))));
        session.store_credential(Credential {
            access_token: "tok".to_string(),
            expires_at_ms: i64::MAX,
        });
        session
    }

    pub(crate) fn page(items: serde_json::Value, total: u32, next: Option<&str>) -> HttpResponse {
        HttpResponse::new(
            StatusCode::OK,
            json!({ "items": items, "total": total, "next": next }).to_string(),
        )
    }

    fn throttled() -> HttpResponse {
        HttpResponse::new(StatusCode::TOO_MANY_REQUESTS, "")
    }

    fn fetcher_with(responses: Vec<HttpResponse>) -> (Arc<ScriptedTransport>, PaginatedFetcher) {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let fetcher = PaginatedFetcher::new(test_config(), transport.clone(), authenticated_session());
        (transport, fetcher)
    }

    #[test]
    fn test_retry_policy_waits() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
        };
        assert_eq!(policy.wait_for(0, None), Duration::from_millis(1000));
        assert_eq!(policy.wait_for(1, None), Duration::from_millis(2000));
        assert_eq!(policy.wait_for(2, None), Duration::from_millis(4000));
        assert_eq!(policy.wait_for(2, Some("7")), Duration::from_secs(7));
        assert_eq!(policy.wait_for(1, Some("soon")), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_pages_in_server_order() {
        let (transport, fetcher) = fetcher_with(vec![
            page(json!([1, 2]), 5, Some("https://api.test/v1/items?offset=2")),
            page(json!([3, 4]), 5, Some("https://api.test/v1/items?offset=4")),
            page(json!([5]), 5, None),
        ]);

        let mut progress = Vec::new();
        let items: Vec<u32> = fetcher
            .fetch_all_pages(&FetchRequest::paged("/items?limit=2", 2), |_| true, |p| {
                progress.push(*p)
            })
            .await
            .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5]);

        let indexes: Vec<u32> = progress.iter().map(|p| p.page_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        let loaded: Vec<usize> = progress.iter().map(|p| p.items_loaded).collect();
        assert_eq!(loaded, vec![2, 4, 5]);
        assert!(progress.iter().all(|p| p.page_count == Some(3)));

        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://api.test/v1/items?limit=2");
        assert_eq!(requests[1].url, "https://api.test/v1/items?offset=2");
        assert_eq!(requests[2].url, "https://api.test/v1/items?offset=4");
        assert!(requests.iter().all(|r| r.bearer.as_deref() == Some("tok")));

        // fixed courtesy delay between pages
        for pair in requests.windows(2) {
            let gap = pair[1].at - pair[0].at;
            assert!(gap >= Duration::from_millis(100), "gap was {:?}", gap);
            assert!(gap < Duration::from_millis(150), "gap was {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_keeps_declared_total() {
        let (_, fetcher) = fetcher_with(vec![page(
            json!([
                {"track": {"name": "kept"}},
                {"track": null},
                {"track": {"name": "also kept"}}
            ]),
            3,
            None,
        )]);

        let mut last = None;
        let items: Vec<crate::models::PlaylistItem> = fetcher
            .fetch_all_pages(
                &FetchRequest::paged("/me/tracks?limit=50", 50),
                |item: &crate::models::PlaylistItem| item.has_track(),
                |p| last = Some(*p),
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        let last = last.unwrap();
        assert_eq!(last.items_loaded, 2);
        assert_eq!(last.items_total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_then_success() {
        let (transport, fetcher) = fetcher_with(vec![
            throttled(),
            throttled(),
            page(json!([1]), 1, None),
        ]);

        let page: Page<u32> = fetcher.request_with_retry("/me/tracks").await.unwrap();
        assert_eq!(page.items, vec![1]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);

        let first_wait = requests[1].at - requests[0].at;
        let second_wait = requests[2].at - requests[1].at;
        assert!(first_wait >= Duration::from_millis(1000) && first_wait < Duration::from_millis(1050));
        assert!(second_wait >= Duration::from_millis(2000) && second_wait < Duration::from_millis(2050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_header_wins() {
        let (transport, fetcher) = fetcher_with(vec![
            throttled().with_retry_after("3"),
            page(json!([]), 0, None),
        ]);

        let _: Page<u32> = fetcher.request_with_retry("/me/tracks").await.unwrap();

        let requests = transport.requests();
        let wait = requests[1].at - requests[0].at;
        assert!(wait >= Duration::from_secs(3) && wait < Duration::from_millis(3050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausted_after_four_attempts() {
        let (transport, fetcher) =
            fetcher_with(vec![throttled(), throttled(), throttled(), throttled()]);

        let err = fetcher
            .request_with_retry::<Page<u32>>("/me/tracks")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RateLimitExceeded { attempts: 4 }));
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_unauthenticated_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let session = Arc::new(Session::new(Arc::new(ManualClock::at(0))));
        let fetcher = PaginatedFetcher::new(test_config(), transport.clone(), session);

        let err = fetcher
            .fetch_all_pages::<u32, _, _>(&FetchRequest::paged("/me/tracks", 50), |_| true, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Unauthenticated));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_api_errors_are_not_retried() {
        let (transport, fetcher) = fetcher_with(vec![HttpResponse::new(
            StatusCode::NOT_FOUND,
            r#"{"error":{"status":404,"message":"Resource not found"}}"#,
        )]);

        let err = fetcher
            .request_with_retry::<Page<u32>>("/playlists/nope/tracks")
            .await
            .unwrap_err();
        match err {
            FetchError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Resource not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);

        let (_, fetcher) = fetcher_with(vec![HttpResponse::new(StatusCode::FORBIDDEN, "nope")]);
        let err = fetcher
            .request_with_retry::<Page<u32>>("/me")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "API error: 403");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_mid_pagination_is_surfaced() {
        let (transport, fetcher) = fetcher_with(vec![
            page(json!([1]), 2, Some("https://api.test/v1/items?offset=1")),
            HttpResponse::new(StatusCode::UNAUTHORIZED, r#"{"error":{"status":401,"message":"The access token expired"}}"#),
        ]);

        let mut calls = 0;
        let err = fetcher
            .fetch_all_pages::<u32, _, _>(&FetchRequest::paged("/items", 1), |_| true, |_| calls += 1)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "The access token expired");
        assert_eq!(calls, 1);
        assert_eq!(transport.requests().len(), 2);
    }
}

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

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("HTTP request failed: {0}")]
pub struct TransportError(#[from] pub reqwest::Error);

/// The parts of an HTTP response the credential manager and fetcher look at.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Raw `Retry-After` header value, if the server sent one.
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }
}

/// Outbound HTTP used by the login exchange and the resource requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Authenticated GET with `Authorization: Bearer <token>`.
    async fn get(&self, url: &str, bearer_token: &str) -> Result<HttpResponse, TransportError>;

    /// POST with an `application/x-www-form-urlencoded` body.
    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError>;
}

const USER_AGENT: &str = concat!("spotify-export/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, bearer_token: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", bearer_token))
            .send()
            .await?;
        Self::read(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let response = self.client.post(url).form(fields).send().await?;
        Self::read(response).await
    }
}


#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone)]
    pub(crate) struct RecordedRequest {
        pub url: String,
        pub bearer: Option<String>,
        pub form: Vec<(String, String)>,
        pub at: Instant,
    }

    /// Replays canned responses in order and records every request made.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            }
        }

        pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn next(&self, request: RecordedRequest) -> HttpResponse {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted transport ran out of responses")
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str, bearer_token: &str) -> Result<HttpResponse, TransportError> {
            Ok(self.next(RecordedRequest {
                url: url.to_string(),
                bearer: Some(bearer_token.to_string()),
                form: Vec::new(),
                at: Instant::now(),
            }))
        }

        async fn post_form(
            &self,
            url: &str,
            fields: &[(&str, &str)],
        ) -> Result<HttpResponse, TransportError> {
            Ok(self.next(RecordedRequest {
                url: url.to_string(),
                bearer: None,
                form: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                at: Instant::now(),
            }))
        }
    }
}

//! Remote JWK set source over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

use super::{KeySet, KeySource};
use crate::error::KeyError;

/// Fetches a private JWK set from a secret-management endpoint.
pub struct HttpKeySource {
    client: ClientWithMiddleware,
    url: String,
    token: Option<String>,
}

impl HttpKeySource {
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).connect_timeout(timeout).build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(100), Duration::from_secs(1))
            .build_with_max_retries(2);

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client, url: url.to_string(), token })
    }
}

impl std::fmt::Debug for HttpKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKeySource").field("url", &self.url).finish()
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<KeySet, KeyError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| KeyError::Fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(KeyError::Fetch(format!("key source returned HTTP {status}")));
        }

        let body = response.text().await.map_err(|e| KeyError::Fetch(e.to_string()))?;
        KeySet::parse(&body)
    }
}

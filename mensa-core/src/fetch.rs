//! HTTP client wrapper with a small FIFO response cache.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::ports::PortError;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!(
    "mensa-feeds/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/cvzi/mensa)"
);

/// Build the shared HTTP client.
///
/// # Errors
///
/// Returns [`PortError::Network`] if the TLS backend cannot be initialised.
pub fn build_client(timeout: Option<Duration>) -> Result<Client, PortError> {
    let mut builder = Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

struct CacheEntry {
    url: String,
    body: String,
    fetched: Instant,
}

/// Response bodies keyed by URL; the oldest entry is evicted once `capacity` is reached.
pub struct CachedFetcher {
    client: Client,
    capacity: usize,
    max_age: Option<Duration>,
    timeout: Option<Duration>,
    cache: Mutex<VecDeque<CacheEntry>>,
}

impl CachedFetcher {
    /// Cache up to `capacity` responses for the lifetime of the fetcher.
    #[must_use]
    pub fn new(client: Client, capacity: usize) -> Self {
        Self {
            client,
            capacity,
            max_age: None,
            timeout: None,
            cache: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Treat cached responses older than `max_age` as missing.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Abort requests that take longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Underlying client, for requests that must not be cached.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET `url` as text, answering from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Network`] if the request fails or the status is not a success.
    pub async fn get_text(&self, url: &str) -> Result<String, PortError> {
        if let Some(body) = self.lookup(url)? {
            debug!(url, "retrieved from cache");
            return Ok(body);
        }

        let mut request = self.client.get(url);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let body = fetch_text(request).await?;
        self.store(url, &body)?;
        Ok(body)
    }

    /// GET `url` and decode the JSON body, answering from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Network`] on request failure or [`PortError::Json`] if decoding fails.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PortError> {
        let body = self.get_text(url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Number of cached responses.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Internal`] if the cache lock is poisoned.
    pub fn cached(&self) -> Result<usize, PortError> {
        Ok(self.lock()?.len())
    }

    fn lookup(&self, url: &str) -> Result<Option<String>, PortError> {
        let cache = self.lock()?;
        Ok(cache
            .iter()
            .find(|entry| entry.url == url)
            .filter(|entry| {
                self.max_age
                    .is_none_or(|max_age| entry.fetched.elapsed() < max_age)
            })
            .map(|entry| entry.body.clone()))
    }

    fn store(&self, url: &str, body: &str) -> Result<(), PortError> {
        self.insert(url, body, Instant::now())
    }

    fn insert(&self, url: &str, body: &str, fetched: Instant) -> Result<(), PortError> {
        let mut cache = self.lock()?;
        cache.retain(|entry| entry.url != url);
        cache.push_back(CacheEntry {
            url: url.to_owned(),
            body: body.to_owned(),
            fetched,
        });
        while cache.len() > self.capacity {
            cache.pop_front();
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<CacheEntry>>, PortError> {
        self.cache
            .lock()
            .map_err(|_err| PortError::Internal("response cache lock poisoned".to_owned()))
    }
}

/// Send a request and return the body text, failing on non-success status.
///
/// # Errors
///
/// Returns [`PortError::Network`] if the request fails or the status is not a success.
pub async fn fetch_text(req: RequestBuilder) -> Result<String, PortError> {
    req.send()
        .await
        .map_err(PortError::from)?
        .error_for_status()
        .map_err(PortError::from)?
        .text()
        .await
        .map_err(PortError::from)
}

/// Send a request and decode the JSON body, failing on non-success status.
///
/// # Errors
///
/// Returns [`PortError::Network`] if the request fails, the status is not a success,
/// or the body is not valid JSON for `T`.
pub async fn fetch_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, PortError> {
    req.send()
        .await
        .map_err(PortError::from)?
        .error_for_status()
        .map_err(PortError::from)?
        .json()
        .await
        .map_err(PortError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(capacity: usize) -> CachedFetcher {
        CachedFetcher::new(Client::new(), capacity)
    }

    #[test]
    fn evicts_oldest_entry_first() {
        let fetcher = fetcher(2);
        fetcher.store("a", "1").expect("store");
        fetcher.store("b", "2").expect("store");
        fetcher.store("c", "3").expect("store");

        assert_eq!(fetcher.cached().expect("lock"), 2);
        assert_eq!(fetcher.lookup("a").expect("lock"), None);
        assert_eq!(fetcher.lookup("c").expect("lock"), Some("3".to_owned()));
    }

    #[test]
    fn storing_same_url_replaces_entry() {
        let fetcher = fetcher(2);
        fetcher.store("a", "1").expect("store");
        fetcher.store("a", "2").expect("store");
        assert_eq!(fetcher.cached().expect("lock"), 1);
        assert_eq!(fetcher.lookup("a").expect("lock"), Some("2".to_owned()));
    }

    #[test]
    fn expired_entries_are_ignored() {
        let fetcher = fetcher(2).with_max_age(Duration::from_secs(60));
        let Some(old) = Instant::now().checked_sub(Duration::from_secs(120)) else {
            return;
        };
        fetcher.insert("a", "1", old).expect("store");
        assert_eq!(fetcher.lookup("a").expect("lock"), None);
    }

    #[tokio::test]
    async fn cached_responses_skip_the_network() {
        let fetcher = fetcher(4);
        fetcher
            .store("http://invalid.localhost/menu", "<html></html>")
            .expect("store");
        let body = fetcher
            .get_text("http://invalid.localhost/menu")
            .await
            .expect("served from cache");
        assert_eq!(body, "<html></html>");
    }
}

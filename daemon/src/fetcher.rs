use std::future::Future;
use std::time::Duration;

use common::UpdateError;
use serde::Deserialize;

/// Extra attempts after the first failure.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Fixed pause between attempts. Deliberately not exponential: the remote
/// generates wallpapers on demand and recovers on a human timescale, so
/// backoff buys nothing here.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Metadata for one remotely generated wallpaper.
///
/// `image_url` is a server-relative path; resolve it against the base URL
/// with [`RetryingFetcher::fetch_bytes`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteImage {
    pub id: String,
    pub format: String,
    pub status: String,
    pub width: u32,
    pub height: u32,
    pub generated_at: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub file_size: u64,
}

/// A completed HTTP exchange: status code plus raw body.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Minimal HTTP surface the fetcher needs, injectable for tests.
///
/// Implementations report transport-level failures (DNS, connect, timeout)
/// as [`UpdateError::NetworkUnavailable`]; status handling is the fetcher's
/// job.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpReply, UpdateError>> + Send;
}

/// [`HttpTransport`] backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpReply, UpdateError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            log::debug!("Transport error for {}: {}", url, e);
            UpdateError::NetworkUnavailable
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                log::debug!("Failed to read body from {}: {}", url, e);
                UpdateError::NetworkUnavailable
            })?
            .to_vec();

        Ok(HttpReply { status, body })
    }
}

/// Retry parameters, overridable in tests to avoid real sleeps.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}

/// HTTP retrieval of wallpaper metadata and image bytes with bounded retry.
///
/// Transport and status failures are transient and retried up to
/// `max_retry_attempts` extra times with a fixed delay; once exhausted the
/// operation fails with [`UpdateError::MaxRetryAttemptsReached`], discarding
/// the underlying cause. Decode failures are terminal immediately, since
/// retrying cannot fix a malformed body. Each attempt is independent;
/// nothing is cached between attempts.
pub struct RetryingFetcher<T: HttpTransport> {
    pub(crate) transport: T,
    base_url: String,
    policy: RetryPolicy,
}

impl<T: HttpTransport> RetryingFetcher<T> {
    pub fn new(transport: T, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch the metadata descriptor for the next wallpaper.
    pub async fn fetch_metadata(&self) -> Result<RemoteImage, UpdateError> {
        let url = format!("{}/wallpaper", self.base_url);
        self.get_with_retry(&url, UpdateError::NetworkUnavailable, |body| {
            let image: RemoteImage = serde_json::from_slice(body).map_err(|e| {
                log::warn!("Malformed wallpaper metadata: {}", e);
                UpdateError::InvalidImageData
            })?;
            log::debug!(
                "Fetched descriptor {}: {} {}x{}, {} bytes, status {}, generated {}",
                image.id,
                image.format,
                image.width,
                image.height,
                image.file_size,
                image.status,
                image.generated_at
            );
            Ok(image)
        })
        .await
    }

    /// Download raw image bytes for a server-relative path.
    pub async fn fetch_bytes(&self, image_url: &str) -> Result<Vec<u8>, UpdateError> {
        let url = format!("{}{}", self.base_url, image_url);
        self.get_with_retry(&url, UpdateError::ImageDownloadFailed, |body| {
            // Sniff the magic bytes so garbage never reaches the cache.
            image::guess_format(body).map_err(|_| {
                log::warn!("Downloaded body is not a recognizable image");
                UpdateError::InvalidImageData
            })?;
            Ok(body.to_vec())
        })
        .await
    }

    /// One GET with the shared retry loop.
    ///
    /// `status_error` classifies a non-2xx reply; both it and transport
    /// errors are retryable. A body that reaches `decode` ends the loop
    /// either way: decode errors are not retried.
    async fn get_with_retry<R>(
        &self,
        url: &str,
        status_error: UpdateError,
        decode: impl Fn(&[u8]) -> Result<R, UpdateError>,
    ) -> Result<R, UpdateError> {
        let total_attempts = self.policy.max_retry_attempts + 1;

        for attempt in 1..=total_attempts {
            log::debug!("GET {} (attempt {}/{})", url, attempt, total_attempts);

            let failure = match self.transport.get(url).await {
                Ok(reply) if (200..300).contains(&reply.status) => {
                    return decode(&reply.body);
                }
                Ok(reply) => {
                    log::warn!("GET {} returned status {}", url, reply.status);
                    status_error.clone()
                }
                Err(e) => e,
            };

            if attempt < total_attempts {
                log::debug!("Retrying in {:?} ({})", self.policy.delay, failure);
                tokio::time::sleep(self.policy.delay).await;
            } else {
                log::warn!(
                    "Giving up on {} after {} attempts ({})",
                    url,
                    total_attempts,
                    failure
                );
            }
        }

        Err(UpdateError::MaxRetryAttemptsReached)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted transport: pops one pre-recorded reply per request.
    ///
    /// Once the script runs dry every further request succeeds with an
    /// empty 200 reply.
    pub struct FakeTransport {
        script: Mutex<VecDeque<Result<HttpReply, UpdateError>>>,
        pub calls: AtomicUsize,
        pub urls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        pub fn new(script: Vec<Result<HttpReply, UpdateError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpTransport for FakeTransport {
        async fn get(&self, url: &str) -> Result<HttpReply, UpdateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());

            match self.script.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => Ok(HttpReply {
                    status: 200,
                    body: Vec::new(),
                }),
            }
        }
    }

    pub fn ok(body: &[u8]) -> Result<HttpReply, UpdateError> {
        Ok(HttpReply {
            status: 200,
            body: body.to_vec(),
        })
    }

    pub fn status(code: u16) -> Result<HttpReply, UpdateError> {
        Ok(HttpReply {
            status: code,
            body: Vec::new(),
        })
    }

    pub fn transport_error() -> Result<HttpReply, UpdateError> {
        Err(UpdateError::NetworkUnavailable)
    }

    pub fn metadata_json(id: &str) -> Vec<u8> {
        format!(
            r#"{{"id":"{}","format":"jpg","status":"ready","width":3840,"height":2160,
                "generatedAt":"2026-08-05T09:00:00Z","imageURL":"/images/{}.jpg","fileSize":1024}}"#,
            id, id
        )
        .into_bytes()
    }

    /// Just the PNG magic; enough for format sniffing.
    pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    pub fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn fetcher(transport: FakeTransport) -> RetryingFetcher<FakeTransport> {
        RetryingFetcher::new(transport, "http://wallpapers.test").with_policy(instant_policy())
    }

    #[tokio::test]
    async fn test_fetch_metadata_success_on_first_attempt() {
        let fetcher = fetcher(FakeTransport::new(vec![ok(&metadata_json("abc"))]));

        let image = fetcher.fetch_metadata().await.unwrap();
        assert_eq!(image.id, "abc");
        assert_eq!(image.image_url, "/images/abc.jpg");
        assert_eq!(fetcher.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_metadata_recovers_after_each_failure_count() {
        // For every N in 0..=max, N failures followed by a success uses
        // exactly N+1 attempts.
        for failures in 0..=MAX_RETRY_ATTEMPTS as usize {
            let mut script: Vec<_> = (0..failures).map(|_| transport_error()).collect();
            script.push(ok(&metadata_json("xyz")));

            let fetcher = fetcher(FakeTransport::new(script));
            let image = fetcher.fetch_metadata().await.unwrap();

            assert_eq!(image.id, "xyz");
            assert_eq!(fetcher.transport.call_count(), failures + 1);
        }
    }

    #[tokio::test]
    async fn test_fetch_metadata_exhausts_retries() {
        let script = (0..4).map(|_| transport_error()).collect();
        let fetcher = fetcher(FakeTransport::new(script));

        let err = fetcher.fetch_metadata().await.unwrap_err();
        assert!(matches!(err, UpdateError::MaxRetryAttemptsReached));
        assert_eq!(fetcher.transport.call_count(), MAX_RETRY_ATTEMPTS as usize + 1);
    }

    #[tokio::test]
    async fn test_non_success_status_is_retried_like_transport_error() {
        let script = vec![status(503), status(502), ok(&metadata_json("after-outage"))];
        let fetcher = fetcher(FakeTransport::new(script));

        let image = fetcher.fetch_metadata().await.unwrap();
        assert_eq!(image.id, "after-outage");
        assert_eq!(fetcher.transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_all_error_statuses_exhaust_into_terminal_error() {
        let script = (0..4).map(|_| status(500)).collect();
        let fetcher = fetcher(FakeTransport::new(script));

        let err = fetcher.fetch_metadata().await.unwrap_err();
        assert!(matches!(err, UpdateError::MaxRetryAttemptsReached));
        assert_eq!(fetcher.transport.call_count(), 4);
    }

    #[tokio::test]
    async fn test_malformed_metadata_fails_without_retry() {
        let fetcher = fetcher(FakeTransport::new(vec![ok(b"{not json")]));

        let err = fetcher.fetch_metadata().await.unwrap_err();
        assert!(matches!(err, UpdateError::InvalidImageData));
        // Decoding errors are terminal: exactly one attempt.
        assert_eq!(fetcher.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_bytes_returns_image_body() {
        let fetcher = fetcher(FakeTransport::new(vec![ok(PNG_MAGIC)]));

        let bytes = fetcher.fetch_bytes("/images/abc.jpg").await.unwrap();
        assert_eq!(bytes, PNG_MAGIC);
        assert_eq!(
            fetcher.transport.urls.lock().unwrap()[0],
            "http://wallpapers.test/images/abc.jpg"
        );
    }

    #[tokio::test]
    async fn test_fetch_bytes_rejects_non_image_body_without_retry() {
        let fetcher = fetcher(FakeTransport::new(vec![ok(b"<html>gateway error</html>")]));

        let err = fetcher.fetch_bytes("/images/abc.jpg").await.unwrap_err();
        assert!(matches!(err, UpdateError::InvalidImageData));
        assert_eq!(fetcher.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_bytes_retries_on_error_status() {
        let script = vec![status(404), ok(PNG_MAGIC)];
        let fetcher = fetcher(FakeTransport::new(script));

        let bytes = fetcher.fetch_bytes("/images/abc.jpg").await.unwrap();
        assert_eq!(bytes, PNG_MAGIC);
        assert_eq!(fetcher.transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_base_url_trailing_slash_is_normalized() {
        let fetcher = RetryingFetcher::new(
            FakeTransport::new(vec![ok(&metadata_json("n"))]),
            "http://wallpapers.test/",
        )
        .with_policy(instant_policy());

        fetcher.fetch_metadata().await.unwrap();
        assert_eq!(
            fetcher.transport.urls.lock().unwrap()[0],
            "http://wallpapers.test/wallpaper"
        );
    }
}

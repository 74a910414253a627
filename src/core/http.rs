use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, RANGE};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{ResolverError, ResolverResult};

pub const APP_USER_AGENT: &str = "VersionSource/0.1.0";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(user_agent)
        .default_headers(default_headers)
        .timeout(timeout)
        .build()
}

/// Network seam used by every provider.
///
/// All calls race against `cancel` and return [`ResolverError::Cancelled`]
/// as soon as it fires.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url` and return the body as text. `bearer` adds an
    /// `Authorization: Bearer` header.
    async fn get_text(
        &self,
        url: &str,
        bearer: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResolverResult<String>;

    /// Lightweight reachability check. Returns the HTTP status.
    async fn head(&self, url: &str, cancel: &CancellationToken) -> ResolverResult<u16>;

    /// Download at most `max_bytes` from `url` and return how many bytes were read.
    async fn sample(
        &self,
        url: &str,
        max_bytes: u64,
        cancel: &CancellationToken,
    ) -> ResolverResult<u64>;
}

/// Runs `fut` unless `cancel` fires first.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> ResolverResult<T>
where
    F: Future<Output = ResolverResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolverError::Cancelled),
        result = fut => result,
    }
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_defaults() -> ResolverResult<Self> {
        let client =
            build_http_client(APP_USER_AGENT, Duration::from_secs(DEFAULT_TIMEOUT_SECS))?;
        Ok(Self::new(client))
    }
}

fn ensure_success(url: &str, response: &reqwest::Response) -> ResolverResult<()> {
    let status = response.status();
    if !status.is_success() {
        return Err(ResolverError::BadStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_text(
        &self,
        url: &str,
        bearer: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResolverResult<String> {
        with_cancel(cancel, async {
            let mut request = self.client.get(url);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;
            ensure_success(url, &response)?;
            let body = response.text().await?;
            debug!("GET {} -> {} bytes", url, body.len());
            Ok(body)
        })
        .await
    }

    async fn head(&self, url: &str, cancel: &CancellationToken) -> ResolverResult<u16> {
        with_cancel(cancel, async {
            let response = self.client.head(url).send().await?;
            Ok(response.status().as_u16())
        })
        .await
    }

    async fn sample(
        &self,
        url: &str,
        max_bytes: u64,
        cancel: &CancellationToken,
    ) -> ResolverResult<u64> {
        with_cancel(cancel, async {
            let response = self
                .client
                .get(url)
                .header(RANGE, format!("bytes=0-{}", max_bytes.saturating_sub(1)))
                .send()
                .await?;
            ensure_success(url, &response)?;

            // Servers that ignore Range still get cut off at `max_bytes`.
            let mut stream = response.bytes_stream();
            let mut read = 0u64;
            while let Some(chunk) = stream.next().await {
                read += chunk?.len() as u64;
                if read >= max_bytes {
                    break;
                }
            }
            Ok(read)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory transport. Unknown URLs answer 404.
    #[derive(Default)]
    pub struct FakeTransport {
        bodies: Mutex<HashMap<String, String>>,
        bearers: Mutex<Vec<Option<String>>>,
        calls: AtomicUsize,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_body(self, url: &str, body: &str) -> Self {
            self.set_body(url, body);
            self
        }

        pub fn set_body(&self, url: &str, body: &str) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_string());
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn bearers(&self) -> Vec<Option<String>> {
            self.bearers.lock().unwrap().clone()
        }

        fn lookup(&self, url: &str) -> ResolverResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| ResolverError::BadStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn get_text(
            &self,
            url: &str,
            bearer: Option<&str>,
            cancel: &CancellationToken,
        ) -> ResolverResult<String> {
            if cancel.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            self.bearers
                .lock()
                .unwrap()
                .push(bearer.map(ToString::to_string));
            self.lookup(url)
        }

        async fn head(&self, url: &str, _cancel: &CancellationToken) -> ResolverResult<u16> {
            Ok(self.lookup(url).map(|_| 200).unwrap_or(404))
        }

        async fn sample(
            &self,
            url: &str,
            max_bytes: u64,
            _cancel: &CancellationToken,
        ) -> ResolverResult<u64> {
            let body = self.lookup(url)?;
            Ok((body.len() as u64).min(max_bytes))
        }
    }
}

//! Fetch layer: rate-limited HTTP with a blob-backed response cache
//!
//! Every response is stored as a [`Page`] under
//! `{host}/{blake3(url.method.headers.body)}.json`, so re-running an
//! extraction replays the cache instead of hitting the site again.
//! `replace` forces a live request and overwrites the cached page.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tcgharvest_store::{hash_fields, BlobError, BlobStore};

use crate::config::{FetchConfig, HarvestConfig};
use crate::http::{block_on, client_with_connect_timeout};
use crate::ratelimit::{Limiter, RateLimit};
use crate::retry::{retry_with_backoff, RetryPolicy, Retryable};
use crate::semaphore::Semaphore;

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Outbound request description; also the identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, with = "b64")]
    pub body: Vec<u8>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: "POST".to_string(),
            body: body.into(),
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Cache key for this request: `{host}/{hash}.json`.
    pub fn cache_key(&self) -> Result<String, FetchError> {
        let parsed = url::Url::parse(&self.url).map_err(|e| FetchError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().ok_or_else(|| FetchError::InvalidUrl {
            url: self.url.clone(),
            reason: "missing host".to_string(),
        })?;
        let headers: String = self
            .headers
            .iter()
            .map(|(k, v)| format!("{}:{v}\n", k.to_ascii_lowercase()))
            .collect();
        let hash = hash_fields(
            [
                self.url.as_bytes(),
                self.method.as_bytes(),
                headers.as_bytes(),
                self.body.as_slice(),
            ],
            b'.',
        );
        Ok(format!("{host}/{}.json", hash.to_hex()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(flatten)]
    pub request: FetchRequest,
    /// Final URL after redirects, when different from `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirected_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub status_code: u16,
    #[serde(default)]
    pub header: BTreeMap<String, Vec<String>>,
    #[serde(with = "b64")]
    pub body: Vec<u8>,
}

/// One fetched (or replayed) HTTP exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub scraped_at: DateTime<Utc>,
    pub request: PageRequest,
    pub response: PageResponse,
    /// Served from the cache rather than the network
    #[serde(skip)]
    pub from_cache: bool,
}

impl Page {
    pub fn body(&self) -> &[u8] {
        &self.response.body
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.response.body)
    }

    /// URL the content was actually served from.
    pub fn final_url(&self) -> &str {
        self.request
            .redirected_url
            .as_deref()
            .unwrap_or(&self.request.request.url)
    }

    fn into_ok(self) -> Result<Self, FetchError> {
        match self.response.status_code {
            200 => Ok(self),
            status => Err(FetchError::Status {
                url: self.request.request.url,
                status,
            }),
        }
    }
}

#[derive(Debug)]
pub enum FetchError {
    InvalidUrl { url: String, reason: String },
    /// Transport failure before a response arrived
    Request {
        url: String,
        message: String,
        retryable: bool,
    },
    Status { url: String, status: u16 },
    /// Body read failed mid-stream
    Body { url: String, message: String },
    TooLarge { url: String, limit: u64 },
    /// 200 response whose body matched the silent-throttle pattern
    Throttled { url: String },
    Cache(BlobError),
    Encode(serde_json::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl { url, reason } => write!(f, "invalid url {url:?}: {reason}"),
            Self::Request { url, message, .. } => write!(f, "request to {url} failed: {message}"),
            Self::Status { url, status: 429 } => {
                write!(f, "HTTP 429 too many requests (rate limit) for {url}")
            }
            Self::Status { url, status } => write!(f, "HTTP {status} for {url}"),
            Self::Body { url, message } => write!(f, "reading body of {url}: {message}"),
            Self::TooLarge { url, limit } => {
                write!(f, "response from {url} exceeds {limit} byte limit")
            }
            Self::Throttled { url } => write!(f, "silently throttled (rate limit page) at {url}"),
            Self::Cache(e) => write!(f, "fetch cache: {e}"),
            Self::Encode(e) => write!(f, "encoding cached page: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cache(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request { retryable, .. } => *retryable,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Body { .. } | Self::Throttled { .. } => true,
            _ => false,
        }
    }
}

impl FetchError {
    fn from_reqwest(url: &str, e: &reqwest::Error) -> Self {
        // reqwest's Display hides the cause ("connection refused", "timed out")
        let mut message = e.to_string();
        let mut source = std::error::Error::source(e);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Request {
            url: url.to_string(),
            message,
            retryable: e.is_timeout() || e.is_connect() || e.is_request(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Rate-limited, caching HTTP fetcher for one source.
pub struct Fetcher {
    cache: Arc<dyn BlobStore>,
    client: reqwest::Client,
    limiter: Limiter,
    throttle: Option<Regex>,
    retry: RetryPolicy,
    max_body_bytes: u64,
    timeout: Duration,
    user_agent: String,
    in_flight: Semaphore,
    api_key: Option<String>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("user_agent", &self.user_agent)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Fetcher using the global fetch settings.
    pub fn new(cache: Arc<dyn BlobStore>, config: &FetchConfig) -> anyhow::Result<Self> {
        let limit = RateLimit::resolve(&config.rate_limit)?;
        let client = client_with_connect_timeout(config.connect_timeout())?;
        Ok(Self {
            cache,
            client,
            limiter: Limiter::new(limit),
            throttle: None,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: config.base_delay(),
                ..RetryPolicy::default()
            },
            max_body_bytes: config.max_body_bytes,
            timeout: config.request_timeout(),
            user_agent: config.user_agent.clone(),
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            api_key: None,
        })
    }

    /// Fetcher with `[sources.<source>]` overrides applied.
    pub fn for_source(
        cache: Arc<dyn BlobStore>,
        config: &HarvestConfig,
        source: &str,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let overrides = config.source(source);
        let mut fetch = config.fetch.clone();
        if let Some(limit) = overrides.rate_limit {
            fetch.rate_limit = limit;
        }
        let mut fetcher = Self::new(cache, &fetch)
            .with_context(|| format!("rate limit for source {source}"))?;
        if let Some(pattern) = overrides.silent_throttle {
            let re = Regex::new(&pattern)
                .with_context(|| format!("silent_throttle pattern for source {source}"))?;
            fetcher = fetcher.with_silent_throttle(re);
        }
        fetcher.api_key = overrides.api_key;
        log::debug!("{source}: rate limit {}", fetcher.limiter.limit());
        Ok(fetcher)
    }

    pub fn with_silent_throttle(mut self, pattern: Regex) -> Self {
        self.throttle = Some(pattern);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// `[sources.<source>].api_key`, for sources whose API wants one.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn get(&self, url: &str, replace: bool) -> Result<Page, FetchError> {
        self.fetch(&FetchRequest::get(url), replace)
    }

    /// Return the cached page for `req`, or fetch, cache and return it.
    ///
    /// Non-200 responses are cached too, then reported as [`FetchError::Status`].
    pub fn fetch(&self, req: &FetchRequest, replace: bool) -> Result<Page, FetchError> {
        let key = req.cache_key()?;

        if !replace {
            if let Some(page) = self.read_cached(&key)? {
                return page.into_ok();
            }
        }

        let page = retry_with_backoff(&req.url, &self.retry, |_| self.attempt(req))?;
        let bytes = serde_json::to_vec(&page).map_err(FetchError::Encode)?;
        self.cache.write(&key, &bytes).map_err(FetchError::Cache)?;
        page.into_ok()
    }

    fn read_cached(&self, key: &str) -> Result<Option<Page>, FetchError> {
        let bytes = match self.cache.read(key) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(FetchError::Cache(e)),
        };
        match serde_json::from_slice::<Page>(&bytes) {
            Ok(mut page) => {
                page.from_cache = true;
                Ok(Some(page))
            }
            Err(e) => {
                log::warn!("corrupt cache entry {key}: {e}, refetching");
                Ok(None)
            }
        }
    }

    fn attempt(&self, req: &FetchRequest) -> Result<Page, FetchError> {
        let _permit = self.in_flight.acquire();
        block_on(async {
            self.limiter.until_ready().await;

            let method = reqwest::Method::from_bytes(req.method.as_bytes()).map_err(|e| {
                FetchError::InvalidUrl {
                    url: req.url.clone(),
                    reason: format!("bad method {}: {e}", req.method),
                }
            })?;
            let mut builder = self
                .client
                .request(method, &req.url)
                .timeout(self.timeout)
                .header(reqwest::header::USER_AGENT, &self.user_agent);
            for (k, v) in &req.headers {
                builder = builder.header(k, v);
            }
            if !req.body.is_empty() {
                builder = builder.body(req.body.clone());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&req.url, &e))?;

            let status = response.status().as_u16();
            if status == 429 || status >= 500 {
                return Err(FetchError::Status {
                    url: req.url.clone(),
                    status,
                });
            }

            let too_large = || FetchError::TooLarge {
                url: req.url.clone(),
                limit: self.max_body_bytes,
            };
            if response
                .content_length()
                .is_some_and(|len| len > self.max_body_bytes)
            {
                return Err(too_large());
            }

            let final_url = response.url().as_str().to_string();
            let mut header: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (name, value) in response.headers() {
                header
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
            }

            let mut response = response;
            let mut body = Vec::new();
            while let Some(chunk) = response.chunk().await.map_err(|e| FetchError::Body {
                url: req.url.clone(),
                message: e.to_string(),
            })? {
                if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                    return Err(too_large());
                }
                body.extend_from_slice(&chunk);
            }

            if status == 200 {
                if let Some(re) = &self.throttle {
                    if re.is_match(&String::from_utf8_lossy(&body)) {
                        log::debug!("{}: body matched silent throttle pattern", req.url);
                        return Err(FetchError::Throttled {
                            url: req.url.clone(),
                        });
                    }
                }
            }

            Ok(Page {
                scraped_at: Utc::now(),
                request: PageRequest {
                    request: req.clone(),
                    redirected_url: (final_url != req.url).then_some(final_url),
                },
                response: PageResponse {
                    status_code: status,
                    header,
                    body,
                },
                from_cache: false,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_uses_host_and_is_stable() {
        let a = FetchRequest::get("https://www.mtgtop8.com/event?e=1");
        let key = a.cache_key().unwrap();
        assert!(key.starts_with("www.mtgtop8.com/"));
        assert!(key.ends_with(".json"));
        assert_eq!(key, a.clone().cache_key().unwrap());
    }

    #[test]
    fn cache_key_varies_with_method_headers_body() {
        let base = FetchRequest::get("https://example.com/a");
        let keys = [
            base.cache_key().unwrap(),
            FetchRequest::post("https://example.com/a", "q=1").cache_key().unwrap(),
            base.clone().header("Accept", "text/html").cache_key().unwrap(),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        assert_ne!(keys[1], keys[2]);
    }

    #[test]
    fn cache_key_rejects_bad_urls() {
        assert!(matches!(
            FetchRequest::get("not a url").cache_key(),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn retryable_classification() {
        let status = |s| FetchError::Status {
            url: "u".into(),
            status: s,
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(FetchError::Throttled { url: "u".into() }.is_retryable());
        assert!(!FetchError::TooLarge {
            url: "u".into(),
            limit: 1
        }
        .is_retryable());
    }

    #[test]
    fn page_json_roundtrip_keeps_binary_body() {
        let page = Page {
            scraped_at: Utc::now(),
            request: PageRequest {
                request: FetchRequest::get("https://example.com/"),
                redirected_url: None,
            },
            response: PageResponse {
                status_code: 200,
                header: BTreeMap::new(),
                body: vec![0, 159, 146, 150],
            },
            from_cache: false,
        };
        let json = serde_json::to_string(&page).unwrap();
        assert!(json.contains("\"status_code\":200"));
        let back: Page = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body(), page.body());
        assert!(!back.from_cache);
    }
}

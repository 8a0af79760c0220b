//! Token-bucket rate limiting for outbound requests
//!
//! Limits are written as `"<requests>/<period>"` (`"100/1m"`, `"5/1s"`,
//! `"1/500ms"`). `none`, `unlimited`, `disabled` and `off` turn limiting
//! off. The `SCRAPER_RATE_LIMIT` environment variable overrides whatever
//! the configuration says.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

pub const RATE_LIMIT_ENV: &str = "SCRAPER_RATE_LIMIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    Unlimited,
    Limited { requests: NonZeroU32, per: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitError {
    pub input: String,
    pub reason: &'static str,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid rate limit {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for RateLimitError {}

fn parse_period(s: &str) -> Option<Duration> {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let n: u64 = if num.is_empty() { 1 } else { num.parse().ok()? };
    let period = match unit {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => return None,
    };
    (!period.is_zero()).then_some(period)
}

impl RateLimit {
    pub fn parse(input: &str) -> Result<Self, RateLimitError> {
        let s = input.trim();
        let err = |reason| RateLimitError {
            input: input.to_string(),
            reason,
        };
        if matches!(
            s.to_ascii_lowercase().as_str(),
            "" | "none" | "unlimited" | "disabled" | "off"
        ) {
            return Ok(Self::Unlimited);
        }
        let (n, period) = s.split_once('/').ok_or_else(|| err("expected <n>/<period>"))?;
        let requests = n
            .trim()
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| err("request count must be a positive integer"))?;
        let per = parse_period(period.trim()).ok_or_else(|| err("period must look like 500ms, 1s, 1m or 1h"))?;
        Ok(Self::Limited { requests, per })
    }

    /// `configured`, unless `SCRAPER_RATE_LIMIT` is set.
    pub fn resolve(configured: &str) -> Result<Self, RateLimitError> {
        match std::env::var(RATE_LIMIT_ENV) {
            Ok(env) => {
                let limit = Self::parse(&env)?;
                log::debug!("{RATE_LIMIT_ENV}={env} overrides configured rate limit {configured:?}");
                Ok(limit)
            }
            Err(_) => Self::parse(configured),
        }
    }

    /// Governor quota: requests spread evenly over the period, bursting up to `requests`.
    pub fn quota(&self) -> Option<Quota> {
        match *self {
            Self::Unlimited => None,
            Self::Limited { requests, per } => {
                let interval = per / requests.get();
                Quota::with_period(interval.max(Duration::from_nanos(1)))
                    .map(|q| q.allow_burst(requests))
            }
        }
    }
}

impl std::fmt::Display for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Limited { requests, per } => write!(f, "{requests}/{per:?}"),
        }
    }
}

/// Blocking-wait limiter shared by every worker of one fetcher.
pub struct Limiter {
    limit: RateLimit,
    inner: Option<DefaultDirectRateLimiter>,
}

impl Limiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            inner: limit.quota().map(RateLimiter::direct),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Wait for a token.
    pub async fn until_ready(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}

//! tcgharvest-core: Shared infrastructure for collection harvesting
//!
//! Cancellation, configuration, logging and progress, bounded concurrency
//! primitives, the caching fetch layer, and the concurrent record iterator
//! that every consumer of the stored corpus runs on.

pub mod cancel;
pub mod config;
pub mod fetch;
pub mod http;
pub mod iter;
pub mod logging;
pub mod progress;
pub mod ratelimit;
pub mod retry;
pub mod semaphore;
pub mod work_queue;

pub use cancel::{install_signal_handlers, CancelToken, Cancelled};
pub use config::{HarvestConfig, Stores};
pub use fetch::{FetchError, FetchRequest, Fetcher, Page};
pub use http::{client_with_connect_timeout, http_client, SHARED_RUNTIME};
pub use iter::{
    is_stop, iterate_prefix, panic_message, stop, IterError, StopIteration, DEFAULT_ITER_PARALLEL,
    MAX_ITER_PARALLEL,
};
pub use logging::{init_logging, IndicatifLogger};
pub use progress::{fmt_num, ProgressContext, SharedProgress};
pub use ratelimit::{RateLimit, RATE_LIMIT_ENV};
pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
pub use semaphore::Semaphore;
pub use work_queue::WorkQueue;

//! Shared HTTP client and runtime.
//!
//! Requests run on async reqwest, but callers are plain worker threads, so
//! everything is driven through `SHARED_RUNTIME.block_on`.

use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(16)
}

static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    builder(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
});

/// Connection-pooled client shared by all fetchers.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Client with the given connect timeout. The default timeout reuses the
/// shared pool.
pub fn client_with_connect_timeout(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    if connect_timeout == DEFAULT_CONNECT_TIMEOUT {
        return Ok(http_client().clone());
    }
    builder(connect_timeout).build()
}

/// Runtime driving every HTTP future.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Block the current (non-runtime) thread on `fut`.
pub fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    SHARED_RUNTIME.handle().block_on(fut)
}

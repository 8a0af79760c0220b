//! Concurrent iteration over stored records
//!
//! [`iterate_prefix`] lists every key under a prefix and runs
//! read → deserialize → handler for each one on a bounded worker pool.
//! The first failure wins and stops new work; items already being
//! processed always run to completion before the call returns. A handler
//! returning [`stop()`] ends the walk early and the call reports success.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use tcgharvest_store::{BlobError, BlobStore};

use crate::cancel::CancelToken;

pub const DEFAULT_ITER_PARALLEL: usize = 64;
pub const MAX_ITER_PARALLEL: usize = 1024;

/// Marker error a handler returns to end iteration without failing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopIteration;

impl std::fmt::Display for StopIteration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("iteration stopped by handler")
    }
}

impl std::error::Error for StopIteration {}

/// Error a handler returns to stop iteration early.
pub fn stop() -> anyhow::Error {
    anyhow::Error::new(StopIteration)
}

/// Whether `err` is (or wraps) the [`stop()`] marker.
pub fn is_stop(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StopIteration>().is_some()
}

#[derive(Debug)]
pub enum IterError {
    /// Worker count outside `1..=1024`
    Parallel(usize),
    Cancelled,
    List(BlobError),
    Read { key: String, source: BlobError },
    Deserialize { key: String, source: anyhow::Error },
    Handler { key: String, source: anyhow::Error },
    Panic { key: String, message: String },
}

impl std::fmt::Display for IterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel(n) => write!(f, "parallel must be 1-{MAX_ITER_PARALLEL}, got {n}"),
            Self::Cancelled => f.write_str("iteration cancelled"),
            Self::List(e) => write!(f, "failed to list keys: {e}"),
            Self::Read { key, source } => write!(f, "failed to read {key}: {source}"),
            Self::Deserialize { key, source } => {
                write!(f, "failed to deserialize {key}: {source:#}")
            }
            Self::Handler { key, source } => write!(f, "handler failed for {key}: {source:#}"),
            Self::Panic { key, message } => {
                write!(f, "panic in worker processing {key}: {message}")
            }
        }
    }
}

impl std::error::Error for IterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::List(e) | Self::Read { source: e, .. } => Some(e),
            Self::Deserialize { source, .. } | Self::Handler { source, .. } => {
                Some(&**source)
            }
            _ => None,
        }
    }
}

impl IterError {
    /// Key of the record that failed, if the failure belongs to one.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Read { key, .. }
            | Self::Deserialize { key, .. }
            | Self::Handler { key, .. }
            | Self::Panic { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

enum Outcome {
    Stopped,
    Failed(IterError),
}

/// First outcome recorded by any worker; later ones are dropped.
struct FirstOutcome {
    slot: Mutex<Option<Outcome>>,
    halted: AtomicBool,
}

impl FirstOutcome {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            halted: AtomicBool::new(false),
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut slot = self.slot.lock().expect("worker thread panicked");
        if slot.is_none() {
            *slot = Some(outcome);
        } else if let Outcome::Failed(e) = outcome {
            log::debug!("suppressed error after first: {e}");
        }
        self.halted.store(true, Ordering::Release);
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn into_inner(self) -> Option<Outcome> {
        self.slot.into_inner().expect("worker thread panicked")
    }
}

/// Stream every record under `prefix` through `handler` with `parallel` workers.
///
/// Returns `Ok(())` when every item was handled or the handler returned
/// [`stop()`]; [`IterError::Cancelled`] when `cancel` fired first; otherwise
/// the first error observed.
pub fn iterate_prefix<T, D, H>(
    cancel: &CancelToken,
    store: &dyn BlobStore,
    prefix: &str,
    parallel: usize,
    deserialize: D,
    handler: H,
) -> Result<(), IterError>
where
    D: Fn(&str, &[u8]) -> anyhow::Result<T> + Sync,
    H: Fn(T) -> anyhow::Result<()> + Sync,
{
    if !(1..=MAX_ITER_PARALLEL).contains(&parallel) {
        return Err(IterError::Parallel(parallel));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel)
        .thread_name(|i| format!("iter-{i}"))
        .build()
        .map_err(|e| IterError::List(BlobError::Io {
            key: prefix.to_string(),
            source: std::io::Error::other(e),
        }))?;

    let keys = Mutex::new(store.list(prefix));
    let first = FirstOutcome::new();
    let processed = AtomicUsize::new(0);

    let process = |key: &str| -> Result<(), Outcome> {
        let bytes = store.read(key).map_err(|source| {
            Outcome::Failed(IterError::Read {
                key: key.to_string(),
                source,
            })
        })?;
        let item = deserialize(key, &bytes).map_err(|source| {
            if is_stop(&source) {
                Outcome::Stopped
            } else {
                Outcome::Failed(IterError::Deserialize {
                    key: key.to_string(),
                    source,
                })
            }
        })?;
        handler(item).map_err(|source| {
            if is_stop(&source) {
                Outcome::Stopped
            } else {
                Outcome::Failed(IterError::Handler {
                    key: key.to_string(),
                    source,
                })
            }
        })
    };

    pool.scope(|s| {
        for _ in 0..parallel {
            s.spawn(|_| loop {
                if cancel.is_cancelled() || first.is_halted() {
                    break;
                }
                let next = keys.lock().expect("worker thread panicked").next();
                let key = match next {
                    None => break,
                    Some(Err(e)) => {
                        first.record(Outcome::Failed(IterError::List(e)));
                        break;
                    }
                    Some(Ok(key)) => key,
                };
                match catch_unwind(AssertUnwindSafe(|| process(&key))) {
                    Ok(Ok(())) => {
                        processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(outcome)) => first.record(outcome),
                    Err(payload) => first.record(Outcome::Failed(IterError::Panic {
                        message: panic_message(payload.as_ref()),
                        key,
                    })),
                }
            });
        }
    });

    log::debug!(
        "iterated {} items under {prefix:?}",
        processed.load(Ordering::Relaxed)
    );

    match first.into_inner() {
        Some(Outcome::Stopped) => Ok(()),
        Some(Outcome::Failed(e)) => Err(e),
        None if cancel.is_cancelled() => Err(IterError::Cancelled),
        None => Ok(()),
    }
}

//! In-flight call deduplication.
//!
//! [`CallDeduplicator`] lets concurrent calls with identical arguments share
//! a single underlying execution instead of issuing redundant work. The
//! argument list is serialized and digested into a [`FlightKey`]; the first
//! call per key invokes the wrapped operation, and every overlapping call
//! with the same key attaches to that pending outcome.
//!
//! Entries live only for the in-flight window: once the underlying call
//! settles (success, failure, or panic) its entry is removed, so a later
//! identical call starts a fresh invocation. There is no result caching.
//!
//! One deduplicator wraps one logical operation. Callers multiplexing
//! several operations through a single instance must include an operation
//! discriminant in the argument list.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Digest of a canonically-serialized argument list.
///
/// Equal argument lists always derive equal keys; argument lists that differ
/// in any value, order, or type derive different keys with overwhelming
/// probability.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlightKey([u8; 32]);

impl FlightKey {
    /// Derive a key from the full argument list of a call.
    ///
    /// Serialization is JSON, which preserves argument order and value
    /// types, so `("7",)` and `(7,)` never collide.
    pub fn derive<A>(args: &A) -> anyhow::Result<Self>
    where
        A: Serialize + ?Sized,
    {
        let canonical = serde_json::to_vec(args).context("serialize call arguments")?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(Self(hasher.finalize().into()))
    }

    fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlightKey({})", self.to_hex())
    }
}

/// Failure of a deduplicated call, delivered to every observer of its key.
///
/// Clones are cheap and all observers share the same originating error.
#[derive(Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl StdError for SharedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        // First chain entry is the error itself; the second is its cause.
        self.0.chain().nth(1)
    }
}

/// The pending outcome all observers of one key await.
type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, SharedError>>>;

/// Deduplicates concurrent calls by argument list.
///
/// At most one underlying execution is active per distinct [`FlightKey`] at
/// any instant. Success values are delivered as clones; wrap expensive
/// payloads in [`Arc`] if observers should share one allocation.
///
/// `Clone` hands out another handle to the same in-flight map.
pub struct CallDeduplicator<T> {
    in_flight: Arc<Mutex<HashMap<FlightKey, SharedOutcome<T>>>>,
}

impl<T> CallDeduplicator<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of distinct keys currently in flight.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().expect("in-flight map lock").len()
    }
}

impl<T> CallDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run `call` deduplicated under the key derived from `args`.
    ///
    /// If an identical call is already in flight, `call` is not invoked at
    /// all and this attaches to the pending outcome. Otherwise `call` is
    /// invoked immediately — at call time, not at first poll — and runs to
    /// settlement on a spawned task even if every observer is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn call<A, F, Fut>(&self, args: &A, call: F) -> Result<T, SharedError>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = match FlightKey::derive(args) {
            Ok(key) => key,
            Err(err) => return Err(SharedError::new(err)),
        };

        let outcome = {
            let mut in_flight = self.in_flight.lock().expect("in-flight map lock");
            if let Some(existing) = in_flight.get(&key) {
                debug!(key = ?key, "joining in-flight call");
                existing.clone()
            } else {
                // The spawned task re-locks the map to remove its entry, so
                // the insert must complete while this guard is still held.
                let entry = self.launch(key, call());
                in_flight.insert(key, entry.clone());
                entry
            }
        };

        outcome.await
    }

    /// Spawn the underlying call and return the outcome observers await.
    ///
    /// The spawned task settles the entry: it maps failure and panic into
    /// [`SharedError`] and removes the key from the map before any observer
    /// can see the result, so the in-flight window closes exactly at
    /// settlement.
    fn launch<Fut>(&self, key: FlightKey, call_future: Fut) -> SharedOutcome<T>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let handle = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(call_future).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(SharedError::new(err)),
                Err(payload) => Err(SharedError::new(anyhow!(
                    "deduplicated call panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            };
            in_flight.lock().expect("in-flight map lock").remove(&key);
            outcome
        });

        handle
            .map(|joined| {
                joined.unwrap_or_else(|join_err| {
                    Err(SharedError::new(anyhow!(
                        "deduplicated call aborted: {join_err}"
                    )))
                })
            })
            .boxed()
            .shared()
    }
}

impl<T> Clone for CallDeduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> Default for CallDeduplicator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CallDeduplicator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallDeduplicator")
            .field("in_flight", &self.in_flight_len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

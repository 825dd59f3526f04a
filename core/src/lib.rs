//! Async flow-control primitives.
//!
//! Small in-process concurrency utilities that application code composes
//! around its own IO:
//!
//! - **`queue`**: [`TaskQueue`], a FIFO task queue with a configurable
//!   concurrency bound
//! - **`dedupe`**: [`CallDeduplicator`], in-flight call deduplication keyed
//!   by a digest of the argument list
//! - **`debounce`**: [`Debouncer`], trailing-edge coalescing of bursts
//! - **`events`**: [`EventCenter`], a typed listener registry
//!
//! None of these persist state or coordinate across processes; they are
//! single-process scheduling helpers for tokio applications.

pub mod debounce;
pub mod dedupe;
pub mod events;
pub mod queue;

pub use debounce::Debouncer;
pub use dedupe::{CallDeduplicator, FlightKey, SharedError};
pub use events::{EventCenter, ListenerId};
pub use queue::{DEFAULT_CONCURRENCY, RunState, TaskQueue};

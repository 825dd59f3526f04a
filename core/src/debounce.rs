//! Trailing-edge debouncing.
//!
//! [`Debouncer`] coalesces a burst of repeated triggers into a single
//! action: every call supersedes the previous pending one, so only the
//! action from the last call in a burst runs, one quiet period after that
//! call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::sleep;

/// Runs only the most recent of a burst of scheduled actions.
///
/// Superseding is generation-based: each [`Debouncer::call`] bumps a shared
/// generation counter, and a timer only fires its action if its generation
/// is still current when the quiet period elapses.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet period.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `action` to run after the quiet period, superseding any
    /// pending action from an earlier call.
    ///
    /// Must be called from within a tokio runtime (the timer runs on a
    /// spawned task).
    pub fn call<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let scheduled = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let delay = self.delay;
        tokio::spawn(async move {
            sleep(delay).await;
            // Only the most recent call may fire.
            if generation.load(Ordering::SeqCst) == scheduled {
                action();
            }
        });
    }

    /// Drop any pending action without running it.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::sleep;

    use super::Debouncer;

    fn recorder() -> (
        Arc<Mutex<Vec<&'static str>>>,
        impl Fn(&'static str) + Clone + Send + 'static,
    ) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let push = {
            let fired = Arc::clone(&fired);
            move |name| fired.lock().expect("fired lock").push(name)
        };
        (fired, push)
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_last_call_in_a_burst_fires() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let (fired, push) = recorder();

        for name in ["a", "b", "c"] {
            let push = push.clone();
            debouncer.call(move || push(name));
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(60)).await;

        assert_eq!(*fired.lock().expect("fired lock"), vec!["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_calls_all_fire() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let (fired, push) = recorder();

        for name in ["a", "b"] {
            let push = push.clone();
            debouncer.call(move || push(name));
            sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(*fired.lock().expect("fired lock"), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_the_pending_action() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let (fired, push) = recorder();

        debouncer.call(move || push("a"));
        sleep(Duration::from_millis(10)).await;
        debouncer.cancel();
        sleep(Duration::from_millis(100)).await;

        assert!(fired.lock().expect("fired lock").is_empty());
    }
}

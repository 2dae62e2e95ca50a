use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use quiz_core::time::Clock;

use super::stopwatch::Stopwatch;

/// Once-a-second publisher of a running session's elapsed seconds.
///
/// The ticker only reads a copy of the stopwatch; it never mutates session
/// state. Dropping or stopping it cancels the task.
pub(crate) struct Ticker {
    cancel: CancellationToken,
}

impl Ticker {
    /// Spawn on the current tokio runtime; returns `None` outside of one.
    pub(crate) fn spawn(
        stopwatch: Stopwatch,
        clock: Clock,
        elapsed_tx: Arc<watch::Sender<u64>>,
    ) -> Option<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        runtime.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        elapsed_tx.send_replace(stopwatch.elapsed_secs(clock.now()));
                    }
                }
            }
        });

        Some(Self { cancel })
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

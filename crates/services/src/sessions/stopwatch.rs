use chrono::{DateTime, Duration, Utc};

/// Pausable elapsed-time accumulator driven by clock readings.
///
/// Elapsed time is `accumulated + (now - running_since)`; pausing folds the
/// running span into `accumulated`, so paused intervals are excluded exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stopwatch {
    accumulated: Duration,
    running_since: Option<DateTime<Utc>>,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self {
            accumulated: Duration::zero(),
            running_since: None,
        }
    }
}

impl Stopwatch {
    /// A stopped stopwatch that already shows `secs`.
    pub(crate) fn with_elapsed_secs(secs: u64) -> Self {
        Self {
            accumulated: Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)),
            running_since: None,
        }
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub(crate) fn pause(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.running_since.take() {
            let span = now.signed_duration_since(since);
            if span > Duration::zero() {
                self.accumulated += span;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub(crate) fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match self.running_since {
            Some(since) => {
                let span = now.signed_duration_since(since);
                self.accumulated + span.max(Duration::zero())
            }
            None => self.accumulated,
        }
    }

    pub(crate) fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from(self.elapsed(now).num_seconds()).unwrap_or(0)
    }
}

//! Last-activity tracking and the watchdog that enforces it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

/// Shared last-activity timestamp of a running listener.
///
/// Written only by the poll/process path; read by the watchdog and the
/// health endpoint.
#[derive(Debug)]
pub struct Liveness {
    last_activity: Mutex<Option<Instant>>,
    budget: Duration,
}

/// Snapshot of [`Liveness`] at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    /// Nothing recorded yet.
    Starting,
    Healthy { idle: Duration },
    Stale { idle: Duration },
}

impl Liveness {
    pub fn new(budget: Duration) -> Arc<Self> {
        Arc::new(Self {
            last_activity: Mutex::new(None),
            budget,
        })
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn record(&self) {
        *self.lock() = Some(Instant::now());
    }

    /// Time since the last recorded activity.
    pub fn idle(&self) -> Option<Duration> {
        self.lock().map(|at| at.elapsed())
    }

    pub fn status(&self) -> LivenessStatus {
        match self.idle() {
            None => LivenessStatus::Starting,
            Some(idle) if idle > self.budget => LivenessStatus::Stale { idle },
            Some(idle) => LivenessStatus::Healthy { idle },
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.status(), LivenessStatus::Stale { .. })
    }

    // The guarded value is a plain timestamp, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Check `liveness` every `period` and return the idle time once it exceeds
/// the budget. Never returns before the first activity is recorded.
pub async fn watchdog(liveness: Arc<Liveness>, period: Duration) -> Duration {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match liveness.status() {
            LivenessStatus::Stale { idle } => return idle,
            LivenessStatus::Starting => {
                tracing::debug!("watchdog: no activity yet");
            }
            LivenessStatus::Healthy { idle } => {
                tracing::trace!(idle_ms = idle.as_millis() as u64, "watchdog: healthy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn starting_until_first_record() {
        let liveness = Liveness::new(Duration::from_secs(90));
        assert_eq!(liveness.status(), LivenessStatus::Starting);
        assert_eq!(liveness.idle(), None);

        liveness.record();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            liveness.status(),
            LivenessStatus::Healthy {
                idle: Duration::from_secs(10)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_once_budget_exceeded() {
        let liveness = Liveness::new(Duration::from_secs(90));
        liveness.record();

        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(!liveness.is_stale());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(liveness.is_stale());

        liveness.record();
        assert!(!liveness.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_ignores_missing_activity() {
        let liveness = Liveness::new(Duration::from_secs(3));
        let result = tokio::time::timeout(
            Duration::from_secs(60),
            watchdog(liveness, Duration::from_secs(3)),
        )
        .await;
        assert!(result.is_err(), "watchdog fired before any activity");
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fires_after_activity_stops() {
        let liveness = Liveness::new(Duration::from_secs(3));
        liveness.record();

        let started = Instant::now();
        let idle = watchdog(liveness, Duration::from_secs(3)).await;
        assert!(idle > Duration::from_secs(3));
        // Caught by the second tick at the latest.
        assert!(started.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_quiet_while_activity_continues() {
        let liveness = Liveness::new(Duration::from_secs(3));
        liveness.record();

        let dog = tokio::spawn(watchdog(liveness.clone(), Duration::from_secs(3)));
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            liveness.record();
        }
        assert!(!dog.is_finished());
        dog.abort();
    }
}

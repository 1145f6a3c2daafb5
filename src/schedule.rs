//! Periodic task driver.
//!
//! Each loop in the agent is a [`PeriodicTask`]: one `tick` does a unit of
//! work and says how long to wait before the next one. Waiting goes
//! through a [`Clock`] so tests can drive ticks without real sleeps.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub trait Clock: Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall-clock sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub trait PeriodicTask: Send + 'static {
    fn name(&self) -> &'static str;

    /// Run one iteration and return the delay before the next.
    fn tick(&mut self) -> impl Future<Output = Duration> + Send;
}

/// Drive `task` forever. Only process shutdown stops it.
pub async fn run_periodic<T: PeriodicTask, C: Clock>(mut task: T, clock: C) {
    loop {
        let wait = task.tick().await;
        debug!("{}: next tick in {:?}", task.name(), wait);
        clock.sleep(wait).await;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingClock;
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        ticks: Arc<AtomicUsize>,
    }

    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&mut self) -> Duration {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            Duration::from_secs(n as u64)
        }
    }

    #[tokio::test]
    async fn test_run_periodic_sleeps_what_tick_returns() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let clock = RecordingClock::default();
        let handle = tokio::spawn(run_periodic(
            Counter {
                ticks: ticks.clone(),
            },
            clock.clone(),
        ));

        while ticks.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }
        handle.abort();

        let sleeps = clock.sleeps();
        assert!(sleeps.len() >= 2);
        assert_eq!(sleeps[0], Duration::from_secs(1));
        assert_eq!(sleeps[1], Duration::from_secs(2));
    }
}

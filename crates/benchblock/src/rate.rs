use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Semaphore,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::debug;

use crate::error::{BenchError, BenchResult};

/// Shared pacing source. A background task releases one permit per period and
/// workers compete for them, so aggregate throughput is capped at `tps` with no
/// per-worker fairness. At most one unclaimed permit is ever buffered.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    period: Duration,
    replenisher: JoinHandle<()>,
}

impl RateLimiter {
    /// Starts a limiter emitting `tps` permits per second. Must be called from
    /// within a tokio runtime.
    pub fn per_second(tps: u32) -> BenchResult<Self> {
        if tps == 0 {
            return Err(BenchError::config("tps must be positive"));
        }
        let period = (Duration::from_secs(1) / tps).max(Duration::from_micros(1));
        let permits = Arc::new(Semaphore::new(0));
        let replenisher = tokio::spawn(replenish(Arc::clone(&permits), period));
        debug!(tps, period_us = period.as_micros() as u64, "Rate limiter started");
        Ok(Self { permits, period, replenisher })
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next permit and consumes it.
    pub async fn acquire(&self) -> BenchResult<()> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BenchError::config("rate limiter closed"))?;
        permit.forget();
        Ok(())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.replenisher.abort();
        self.permits.close();
    }
}

async fn replenish(permits: Arc<Semaphore>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if permits.available_permits() == 0 {
            permits.add_permits(1);
        }
    }
}

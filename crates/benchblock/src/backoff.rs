use std::time::Duration;

use anyhow::{Result, anyhow};
use rand::Rng;
use tracing::debug;

use crate::rpc::{BlockRecord, ChainClient};

/// Delay in milliseconds before retry `n`. Non-decreasing; attempts past the
/// end reuse the last entry.
const BACKOFF_MS: [u64; 10] = [0, 500, 500, 1000, 1000, 2000, 2000, 4000, 4000, 10_000];

/// Retry delay schedule backed by a fixed table with jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    table: &'static [u64],
}

impl Default for Backoff {
    fn default() -> Self {
        Self { table: &BACKOFF_MS }
    }
}

impl Backoff {
    /// Table value for attempt `n`, saturating at the last entry.
    pub fn base(&self, attempt: usize) -> Duration {
        let idx = attempt.min(self.table.len() - 1);
        Duration::from_millis(self.table[idx])
    }

    /// Jittered delay for attempt `n`, in `[0.5, 1.5)` times the table value.
    pub fn delay(&self, attempt: usize) -> Duration {
        jitter(self.base(attempt), &mut rand::thread_rng())
    }

    pub async fn sleep(&self, attempt: usize) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn jitter(base: Duration, rng: &mut impl Rng) -> Duration {
    let ms = base.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(ms / 2 + rng.gen_range(0..ms))
}

/// Fetches a block, retrying errors and not-yet-available blocks up to
/// `retries` times.
pub async fn fetch_block_with_retry<C: ChainClient + ?Sized>(
    client: &C,
    number: u64,
    retries: u32,
    backoff: &Backoff,
) -> Result<BlockRecord> {
    let mut last_err = anyhow!("no attempts made");
    for attempt in 0..retries as usize {
        match client.block_by_number(number).await {
            Ok(Some(block)) => return Ok(block),
            Ok(None) => last_err = anyhow!("block {number} not found"),
            Err(e) => last_err = e,
        }
        debug!(block = number, attempt, error = %last_err, "Block fetch failed, backing off");
        if attempt + 1 < retries as usize {
            backoff.sleep(attempt).await;
        }
    }
    Err(last_err)
}

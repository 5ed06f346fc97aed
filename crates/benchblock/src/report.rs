use alloy_primitives::Address;
use tracing::{info, warn};

use crate::{
    collector::{CollectorReport, CollectorState},
    config::TargetAdjustment,
    worker::WorkerReport,
};

/// Totals for a finished load or collection run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub adjustment: Option<TargetAdjustment>,
    pub contract: Option<Address>,
    pub workers: Vec<WorkerReport>,
    pub collector: Option<CollectorReport>,
    /// Set when the run was stopped before the collector finished.
    pub interrupted: bool,
}

impl RunReport {
    pub fn issued(&self) -> u64 {
        self.workers.iter().map(|w| w.issued).sum()
    }

    pub fn receipt_failures(&self) -> u64 {
        self.workers.iter().map(|w| w.receipt_failures).sum()
    }

    pub fn stopped_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.stopped_early()).count()
    }

    /// Transactions counted in collected blocks, when a collector ran.
    pub fn mined(&self) -> Option<u64> {
        self.collector.as_ref().map(|c| c.mined)
    }

    pub fn log(&self) {
        if let Some(adj) = self.adjustment.filter(TargetAdjustment::is_adjusted) {
            info!(
                requested = adj.requested,
                normalized = adj.normalized,
                delta = adj.delta(),
                "Target transactions adjusted"
            );
        }

        for worker in self.workers.iter().filter(|w| w.stopped_early()) {
            if let Some(e) = &worker.error {
                warn!(
                    worker = worker.worker,
                    issued = worker.issued,
                    batches = worker.batches_issued,
                    error = %e,
                    "Worker stopped early"
                );
            }
        }

        if let Some(collector) = &self.collector {
            let state = match &collector.state {
                CollectorState::Complete { .. } => "complete".to_string(),
                CollectorState::Failed(e) => format!("failed: {e}"),
                other => format!("{other:?}"),
            };
            info!(
                blocks_stored = collector.blocks_stored,
                store_failures = collector.store_failures,
                last_block = ?collector.state.last_block(),
                state = %state,
                "Collector finished"
            );
        }
        if self.interrupted {
            warn!("Run interrupted before collection finished");
        }

        info!(
            contract = ?self.contract,
            issued = self.issued(),
            mined = ?self.mined(),
            receipt_failures = self.receipt_failures(),
            stopped_workers = self.stopped_workers(),
            "Run complete"
        );
    }
}

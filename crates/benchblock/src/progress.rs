use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::config::ProgressMode;

const BAR_TEMPLATE: &str = "{prefix:>7} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec})";
const SPINNER_TEMPLATE: &str = "{prefix:>7} [{elapsed_precise}] {spinner} {pos} ({per_sec})";

/// One monotonically increasing counter with an optional display.
#[derive(Debug)]
struct Meter {
    mode: ProgressMode,
    count: AtomicU64,
    bar: Option<ProgressBar>,
}

impl Meter {
    fn new(
        name: &'static str,
        mode: ProgressMode,
        target: Option<u64>,
        multi: &MultiProgress,
    ) -> Self {
        let bar = (mode == ProgressMode::Visual).then(|| {
            let (bar, template) = match target {
                Some(len) => (ProgressBar::new(len), BAR_TEMPLATE),
                None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
            };
            let style = ProgressStyle::with_template(template)
                .map(|s| s.progress_chars("##-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            let bar = multi.add(bar);
            bar.set_style(style);
            bar.set_prefix(name);
            bar
        });
        Self { mode, count: AtomicU64::new(0), bar }
    }

    /// Adds `n` and returns the previous total.
    fn add(&self, n: u64) -> u64 {
        let prev = self.count.fetch_add(n, Ordering::SeqCst);
        if let Some(bar) = &self.bar {
            bar.inc(n);
        }
        prev
    }

    fn current(&self) -> Option<u64> {
        (self.mode != ProgressMode::None).then(|| self.count.load(Ordering::SeqCst))
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish();
        }
    }
}

/// Issued and mined counters shared by all workers and the collector.
///
/// Counting always happens; the mode only decides whether a counter is
/// reported. Completion is decided by [`ProgressTracker::mined_complete`] no
/// matter how the counters are displayed.
#[derive(Debug)]
pub struct ProgressTracker {
    target: Option<u64>,
    issued: Meter,
    mined: Meter,
    _multi: MultiProgress,
}

impl ProgressTracker {
    /// `target` of `None` means the run never completes on mined count.
    pub fn new(target: Option<u64>, issued_mode: ProgressMode, mined_mode: ProgressMode) -> Self {
        let multi = MultiProgress::new();
        let issued = Meter::new("issued", issued_mode, target, &multi);
        let mined = Meter::new("mined", mined_mode, target, &multi);
        Self { target, issued, mined, _multi: multi }
    }

    /// Both counters kept but never reported.
    pub fn disabled(target: Option<u64>) -> Self {
        Self::new(target, ProgressMode::None, ProgressMode::None)
    }

    pub const fn target(&self) -> Option<u64> {
        self.target
    }

    pub fn issued_increment(&self) {
        self.issued.add(1);
    }

    /// Adds `n` mined transactions. Returns true for the single call that
    /// takes the cumulative count from below the target to at or above it.
    pub fn mined_complete(&self, n: u64) -> bool {
        let prev = self.mined.add(n);
        match self.target {
            Some(target) => prev < target && prev.saturating_add(n) >= target,
            None => false,
        }
    }

    /// Issued count, or `None` when the issued counter is disabled.
    pub fn current_issued(&self) -> Option<u64> {
        self.issued.current()
    }

    /// Mined count, or `None` when the mined counter is disabled.
    pub fn current_mined(&self) -> Option<u64> {
        self.mined.current()
    }

    pub fn is_enabled(&self) -> bool {
        self.issued.mode != ProgressMode::None || self.mined.mode != ProgressMode::None
    }

    pub fn finish(&self) {
        self.issued.finish();
        self.mined.finish();
    }
}

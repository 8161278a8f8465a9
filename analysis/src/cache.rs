//! Per-file analysis cache with in-flight accounting.

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::compdb::CompileEntry;
use crate::report::{AnalysisState, ParseOptions};

/// Whether a cached report may satisfy an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Reuse a report younger than the configured interval.
    Reuse,
    /// Always run the analyzer (unless a run is already in flight).
    Force,
}

/// Analysis state for one compile entry plus the count of analyzer runs in
/// flight for it.
#[derive(Debug)]
pub struct AnalysisSlot {
    entry: Arc<CompileEntry>,
    state: RwLock<AnalysisState>,
    in_flight: watch::Sender<usize>,
}

impl AnalysisSlot {
    #[must_use]
    pub fn new(entry: Arc<CompileEntry>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            entry,
            state: RwLock::new(AnalysisState::default()),
            in_flight,
        }
    }

    #[must_use]
    pub fn entry(&self) -> &Arc<CompileEntry> {
        &self.entry
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Mark a run in flight unless one already is.
    ///
    /// The returned guard releases the mark on drop, whatever the outcome.
    #[must_use]
    pub fn try_begin(&self) -> Option<InFlight<'_>> {
        let started = self.in_flight.send_if_modified(|count| {
            if *count == 0 {
                *count = 1;
                true
            } else {
                false
            }
        });
        started.then(|| InFlight { slot: self })
    }

    /// Wait until no analyzer run is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> AnalysisState {
        self.state.read().await.clone()
    }

    pub async fn has_report(&self) -> bool {
        !self.state.read().await.raw_output().is_empty()
    }

    pub async fn is_fresh(&self, interval: std::time::Duration) -> bool {
        self.state.read().await.is_fresh(interval)
    }

    /// Replace the state with the parse of `output`.
    pub async fn update(&self, output: &str, options: ParseOptions<'_>) {
        self.state.write().await.update(&self.entry, output, options);
    }

    /// Drop the cached report so the next request runs the analyzer.
    pub async fn invalidate(&self) {
        *self.state.write().await = AnalysisState::default();
    }
}

/// Marks one analyzer run in flight for a slot.
#[derive(Debug)]
pub struct InFlight<'a> {
    slot: &'a AnalysisSlot,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slot.in_flight.send_modify(|count| *count = count.saturating_sub(1));
    }
}

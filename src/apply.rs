//! Apply queue – turns inbound plans into main-thread block writes.
//!
//! [`PlanApplier`] is the transport's message handler. It parses on the
//! transport thread and never touches the world: every entry becomes one
//! [`ServerTask`](crate::host::ServerTask) on the host's FIFO executor, which
//! resolves the block and writes it once the main thread runs it.

use crate::host::{MainThreadExecutor, Server};
use crate::protocol::{parse_plan, BuildEntry, PlanError};
use crate::transport::{TransportError, TransportHandler};
use crate::types::BridgeStats;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Resolve `entry.block` and write its default state. Main thread only.
pub fn apply_entry(server: &mut dyn Server, entry: &BuildEntry) {
    let state = server.block_registry().get(&entry.block).default_state();
    server.overworld_mut().set_block_state(entry.pos(), state);
}

/// Queue one task per entry, preserving order. Returns the number submitted.
pub fn submit_entries(executor: &dyn MainThreadExecutor, entries: Vec<BuildEntry>) -> usize {
    let count = entries.len();
    for entry in entries {
        executor.execute(Box::new(move |server: &mut dyn Server| {
            apply_entry(server, &entry);
        }));
    }
    count
}

// ---------------------------------------------------------------------------
// PlanApplier
// ---------------------------------------------------------------------------

pub struct PlanApplier {
    executor: Arc<dyn MainThreadExecutor>,
    stats: Arc<BridgeStats>,
}

impl PlanApplier {
    pub fn new(executor: Arc<dyn MainThreadExecutor>, stats: Arc<BridgeStats>) -> Self {
        Self { executor, stats }
    }

    /// Parse `text` and queue its valid entries. Returns how many were
    /// queued; malformed messages yield zero.
    pub fn handle_plan(&self, text: &str) -> usize {
        let plan = match parse_plan(text) {
            Ok(plan) => plan,
            Err(PlanError::InvalidJson(e)) => {
                warn!("[aicraft] Invalid JSON from AI: {}", e);
                self.stats.record_protocol_error();
                return 0;
            }
            Err(e) => {
                warn!("[aicraft] Ignoring plan: {}", e);
                self.stats.record_protocol_error();
                return 0;
            }
        };

        let rejected = plan.rejected;
        let submitted = submit_entries(self.executor.as_ref(), plan.entries);
        self.stats.record_plan(submitted, rejected);
        debug!(
            "[aicraft] Plan queued: {} entries ({} dropped)",
            submitted, rejected
        );
        submitted
    }
}

impl TransportHandler for PlanApplier {
    fn on_open(&self) {
        debug!("[aicraft] AI channel open");
    }

    fn on_message(&self, text: String) {
        self.handle_plan(&text);
    }

    fn on_close(&self, code: u16, reason: &str, remote: bool) {
        info!(
            "[aicraft] AI channel closed (code={}, reason='{}', remote={})",
            code, reason, remote
        );
    }

    fn on_error(&self, error: &TransportError) {
        error!("[aicraft] AI channel error: {}", error);
    }
}

//! Snapshot building and the tick driver that paces it.

use crate::host::Server;
use crate::protocol::Snapshot;
use crate::transport::SnapshotSink;
use crate::types::BridgeStats;
use log::{debug, warn};
use std::sync::Arc;

/// Capture the world state the AI cares about.
///
/// Must run on the main thread; it reads the overworld clock and the player
/// list directly.
pub fn build_snapshot(server: &dyn Server) -> Snapshot {
    Snapshot {
        day_time: server.overworld().time_of_day(),
        players: server.player_manager().player_count(),
    }
}

// ---------------------------------------------------------------------------
// Tick driver
// ---------------------------------------------------------------------------

/// Emits one snapshot every `period` ticks while the channel is open.
///
/// Ticks that pass while the channel is down are not counted, so the first
/// snapshot after (re)opening arrives a full period later.
pub struct TickDriver<S: SnapshotSink> {
    sink: S,
    period: u64,
    tick_count: u64,
    stats: Arc<BridgeStats>,
}

impl<S: SnapshotSink> TickDriver<S> {
    /// `period` is clamped to at least one tick.
    pub fn new(sink: S, period: u32, stats: Arc<BridgeStats>) -> Self {
        Self {
            sink,
            period: u64::from(period.max(1)),
            tick_count: 0,
            stats,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Advance by one server tick. Returns `true` if a snapshot was handed to
    /// the sink.
    pub fn on_tick(&mut self, server: &dyn Server) -> bool {
        if !self.sink.is_open() {
            return false;
        }
        self.tick_count += 1;
        self.stats.record_tick();
        if self.tick_count % self.period != 0 {
            return false;
        }

        let snapshot = build_snapshot(server);
        let json = match snapshot.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("[aicraft] Failed to serialise snapshot: {}", e);
                return false;
            }
        };
        let sent = self.sink.send(json);
        self.stats.record_snapshot(sent);
        if sent {
            debug!(
                "[aicraft] Snapshot #{} sent (dayTime={}, players={})",
                self.tick_count / self.period,
                snapshot.day_time,
                snapshot.players
            );
        }
        sent
    }
}

//! AiCraft Bridge
//!
//! Runs inside a voxel-game server, streams periodic world snapshots to a
//! local AI service over a WebSocket and applies the build plans it answers
//! with.
//!
//! ## Architecture
//!
//! ```text
//! AiBridge  (bridge.rs)               ← lifecycle: attach on start, close on stop
//!   ├── TickDriver  (service.rs)      ← main thread: snapshot every N ticks
//!   ├── TransportClient (transport.rs)← own thread: WebSocket + Tokio runtime
//!   │     └── PlanApplier (apply.rs)  ← transport thread: parse, queue tasks
//!   └── host traits  (host.rs)        ← executor, overworld, registry, players
//! ```
//!
//! World state is only ever written by tasks that the host runs on its main
//! thread. `sim` provides an in-memory host for the demo binary and tests.

// Protocol, config and host types are always available (no server feature needed).
pub mod config;
pub mod host;
pub mod protocol;
pub mod types;

// Runtime modules require the `server` feature.
#[cfg(feature = "server")]
pub mod apply;
#[cfg(feature = "server")]
pub mod bridge;
#[cfg(feature = "server")]
pub mod service;
#[cfg(feature = "server")]
pub mod sim;
#[cfg(feature = "server")]
pub mod transport;

// Convenience re-exports (server only)
#[cfg(feature = "server")]
pub use apply::PlanApplier;
#[cfg(feature = "server")]
pub use bridge::{AiBridge, BridgeError};
#[cfg(feature = "server")]
pub use service::{build_snapshot, TickDriver};
#[cfg(feature = "server")]
pub use sim::SimServer;
#[cfg(feature = "server")]
pub use transport::{SnapshotSink, TransportClient, TransportHandle, TransportHandler};
pub use crate::config::{BridgeConfig, ReconnectPolicy};
pub use protocol::{parse_plan, BuildEntry, Plan, Snapshot};
pub use types::{BlockPos, BlockStateId, BridgeStatsSnapshot, ConnectionState, Identifier};

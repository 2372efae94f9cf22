//! Host abstractions – the slice of the game server the bridge touches.
//!
//! The bridge never owns world state. Everything it reads or writes goes
//! through these traits, and every write is wrapped in a [`ServerTask`] that
//! the host runs on its main thread.
//!
//! ```text
//! ServerLifecycle ──started──▶ AiBridge::on_server_started(&mut dyn Server)
//!                                 ├── Server::tick_dispatcher().register(TickDriver)
//!                                 └── Server::executor()  ──▶ PlanApplier
//! ```

use crate::types::{BlockPos, BlockStateId, Identifier};
use std::sync::Arc;

/// Work queued for the main thread. Receives the live server when it runs.
pub type ServerTask = Box<dyn FnOnce(&mut dyn Server) + Send + 'static>;

/// Called once per server tick, on the main thread.
pub type TickCallback = Box<dyn FnMut(&dyn Server) + 'static>;

/// Called on a lifecycle transition, on the main thread.
pub type LifecycleCallback = Box<dyn FnOnce(&mut dyn Server) + 'static>;

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Queues tasks for execution on the server's main thread.
///
/// Implementations must run tasks in submission order and must be callable
/// from any thread.
pub trait MainThreadExecutor: Send + Sync {
    fn execute(&self, task: ServerTask);
}

pub trait TickDispatcher {
    fn register(&mut self, callback: TickCallback);
}

pub trait ServerLifecycle {
    /// Register a callback fired once startup has completed.
    fn on_server_started(&mut self, callback: LifecycleCallback);
    /// Register a callback fired when the server begins shutting down.
    fn on_server_stopping(&mut self, callback: LifecycleCallback);
}

// ---------------------------------------------------------------------------
// World access
// ---------------------------------------------------------------------------

pub trait Overworld {
    fn time_of_day(&self) -> i64;
    fn set_block_state(&mut self, pos: BlockPos, state: BlockStateId);
}

pub trait PlayerManager {
    fn player_count(&self) -> usize;
}

pub trait Block {
    fn default_state(&self) -> BlockStateId;
}

pub trait BlockRegistry {
    /// Resolve `id`, falling back to the registry's default block when it is
    /// not registered.
    fn get(&self, id: &Identifier) -> &dyn Block;
}

/// A running server, as seen from its main thread.
pub trait Server {
    fn overworld(&self) -> &dyn Overworld;
    fn overworld_mut(&mut self) -> &mut dyn Overworld;
    fn player_manager(&self) -> &dyn PlayerManager;
    fn block_registry(&self) -> &dyn BlockRegistry;
    fn executor(&self) -> Arc<dyn MainThreadExecutor>;
    fn tick_dispatcher(&mut self) -> &mut dyn TickDispatcher;
}

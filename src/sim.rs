//! In-memory reference host.
//!
//! Implements every trait in [`crate::host`] so the bridge can run (and be
//! tested) without a game engine. The demo binary drives a [`SimServer`] from
//! a Tokio interval; tests step it by hand.
//!
//! Within one [`SimServer::tick`]:
//!
//! 1. tick callbacks fire (start-of-tick, before the world advances)
//! 2. the overworld clock advances if the daylight cycle is on
//! 3. every task queued on the executor so far runs, in FIFO order

use crate::host::{
    Block, BlockRegistry, LifecycleCallback, MainThreadExecutor, Overworld, PlayerManager,
    Server, ServerLifecycle, ServerTask, TickCallback, TickDispatcher,
};
use crate::types::{BlockPos, BlockStateId, Identifier};
use crossbeam_channel::{Receiver, Sender};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Length of one in-game day, in ticks.
pub const DAY_LENGTH: i64 = 24_000;

const VANILLA_BLOCKS: &[&str] = &[
    "air",
    "stone",
    "dirt",
    "grass_block",
    "cobblestone",
    "oak_log",
    "oak_planks",
    "glass",
    "sand",
    "torch",
];

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBlock {
    default_state: BlockStateId,
}

impl Block for SimBlock {
    fn default_state(&self) -> BlockStateId {
        self.default_state
    }
}

/// Identifier → block table with `minecraft:air` as the fallback.
pub struct SimBlockRegistry {
    blocks: HashMap<Identifier, SimBlock>,
    fallback: SimBlock,
}

impl SimBlockRegistry {
    /// An empty registry holding only `minecraft:air` (state 0).
    pub fn new() -> Self {
        let air = SimBlock {
            default_state: BlockStateId(0),
        };
        let mut blocks = HashMap::new();
        if let Ok(id) = Identifier::vanilla("air") {
            blocks.insert(id, air);
        }
        Self {
            blocks,
            fallback: air,
        }
    }

    /// Registry preloaded with a handful of vanilla blocks.
    pub fn vanilla() -> Self {
        let mut registry = Self::new();
        for path in VANILLA_BLOCKS {
            if let Ok(id) = Identifier::vanilla(path) {
                registry.register(id);
            }
        }
        registry
    }

    /// Register `id` (idempotent) and return its default state.
    pub fn register(&mut self, id: Identifier) -> BlockStateId {
        let next = BlockStateId(self.blocks.len() as u16);
        self.blocks
            .entry(id)
            .or_insert(SimBlock {
                default_state: next,
            })
            .default_state
    }

    pub fn state_of(&self, id: &Identifier) -> Option<BlockStateId> {
        self.blocks.get(id).map(|b| b.default_state)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for SimBlockRegistry {
    fn default() -> Self {
        Self::vanilla()
    }
}

impl BlockRegistry for SimBlockRegistry {
    fn get(&self, id: &Identifier) -> &dyn Block {
        self.blocks.get(id).unwrap_or(&self.fallback)
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Sparse block map plus the day clock. Unset positions read as air.
#[derive(Debug, Default)]
pub struct SimOverworld {
    blocks: HashMap<BlockPos, BlockStateId>,
    time_of_day: i64,
    writes: u64,
}

impl SimOverworld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_state(&self, pos: BlockPos) -> BlockStateId {
        self.blocks.get(&pos).copied().unwrap_or_default()
    }

    pub fn set_time_of_day(&mut self, time: i64) {
        self.time_of_day = time;
    }

    /// Total `set_block_state` calls, including ones that changed nothing.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn non_air_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn advance_clock(&mut self) {
        self.time_of_day = (self.time_of_day + 1) % DAY_LENGTH;
    }
}

impl Overworld for SimOverworld {
    fn time_of_day(&self) -> i64 {
        self.time_of_day
    }

    fn set_block_state(&mut self, pos: BlockPos, state: BlockStateId) {
        self.writes += 1;
        if state == BlockStateId::default() {
            self.blocks.remove(&pos);
        } else {
            self.blocks.insert(pos, state);
        }
    }
}

#[derive(Debug, Default)]
pub struct SimPlayerManager {
    players: Vec<String>,
}

impl SimPlayerManager {
    pub fn join(&mut self, name: impl Into<String>) {
        self.players.push(name.into());
    }

    pub fn leave(&mut self, name: &str) {
        self.players.retain(|p| p != name);
    }
}

impl PlayerManager for SimPlayerManager {
    fn player_count(&self) -> usize {
        self.players.len()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// FIFO task queue feeding the [`SimServer`] main loop. Cloneable and usable
/// from any thread.
#[derive(Clone)]
pub struct SimExecutor {
    tx: Sender<ServerTask>,
}

impl MainThreadExecutor for SimExecutor {
    fn execute(&self, task: ServerTask) {
        if self.tx.send(task).is_err() {
            debug!("[aicraft] Server gone – dropping queued task");
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct SimServer {
    overworld: SimOverworld,
    players: SimPlayerManager,
    registry: SimBlockRegistry,
    executor: Arc<SimExecutor>,
    tasks: Receiver<ServerTask>,
    tick_callbacks: Vec<TickCallback>,
    started_callbacks: Vec<LifecycleCallback>,
    stopping_callbacks: Vec<LifecycleCallback>,
    daylight_cycle: bool,
    ticks: u64,
    running: bool,
}

impl SimServer {
    pub fn new() -> Self {
        Self::with_registry(SimBlockRegistry::vanilla())
    }

    pub fn with_registry(registry: SimBlockRegistry) -> Self {
        let (tx, tasks) = crossbeam_channel::unbounded();
        Self {
            overworld: SimOverworld::new(),
            players: SimPlayerManager::default(),
            registry,
            executor: Arc::new(SimExecutor { tx }),
            tasks,
            tick_callbacks: Vec::new(),
            started_callbacks: Vec::new(),
            stopping_callbacks: Vec::new(),
            daylight_cycle: true,
            ticks: 0,
            running: false,
        }
    }

    pub fn set_daylight_cycle(&mut self, enabled: bool) {
        self.daylight_cycle = enabled;
    }

    pub fn world(&self) -> &SimOverworld {
        &self.overworld
    }

    pub fn world_mut(&mut self) -> &mut SimOverworld {
        &mut self.overworld
    }

    pub fn players_mut(&mut self) -> &mut SimPlayerManager {
        &mut self.players
    }

    pub fn registry(&self) -> &SimBlockRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SimBlockRegistry {
        &mut self.registry
    }

    pub fn sim_executor(&self) -> SimExecutor {
        self.executor.as_ref().clone()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of registered tick callbacks.
    pub fn tick_callbacks(&self) -> usize {
        self.tick_callbacks.len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Fire the started callbacks. Later calls are ignored.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        for callback in std::mem::take(&mut self.started_callbacks) {
            callback(self);
        }
    }

    /// Run one server tick.
    pub fn tick(&mut self) {
        self.ticks += 1;

        let mut callbacks = std::mem::take(&mut self.tick_callbacks);
        for callback in callbacks.iter_mut() {
            callback(&*self);
        }
        // Keep callbacks registered during this tick, after the existing ones.
        callbacks.append(&mut self.tick_callbacks);
        self.tick_callbacks = callbacks;

        if self.daylight_cycle {
            self.overworld.advance_clock();
        }
        self.run_pending_tasks();
    }

    /// Run every task queued so far. Returns how many ran.
    pub fn run_pending_tasks(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.tasks.try_recv() {
            task(self);
            ran += 1;
        }
        ran
    }

    /// Fire the stopping callbacks, then drain the task queue one last time.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        for callback in std::mem::take(&mut self.stopping_callbacks) {
            callback(self);
        }
        self.run_pending_tasks();
    }
}

impl Default for SimServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Server for SimServer {
    fn overworld(&self) -> &dyn Overworld {
        &self.overworld
    }

    fn overworld_mut(&mut self) -> &mut dyn Overworld {
        &mut self.overworld
    }

    fn player_manager(&self) -> &dyn PlayerManager {
        &self.players
    }

    fn block_registry(&self) -> &dyn BlockRegistry {
        &self.registry
    }

    fn executor(&self) -> Arc<dyn MainThreadExecutor> {
        self.executor.clone()
    }

    fn tick_dispatcher(&mut self) -> &mut dyn TickDispatcher {
        self
    }
}

impl TickDispatcher for SimServer {
    fn register(&mut self, callback: TickCallback) {
        self.tick_callbacks.push(callback);
    }
}

impl ServerLifecycle for SimServer {
    fn on_server_started(&mut self, callback: LifecycleCallback) {
        self.started_callbacks.push(callback);
    }

    fn on_server_stopping(&mut self, callback: LifecycleCallback) {
        self.stopping_callbacks.push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identifier {
        s.parse().unwrap()
    }

    #[test]
    fn unknown_blocks_resolve_to_air() {
        let registry = SimBlockRegistry::vanilla();
        let state = registry.get(&id("mymod:unobtainium")).default_state();
        assert_eq!(state, BlockStateId(0));
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = SimBlockRegistry::vanilla();
        let before = registry.len();
        let stone = registry.state_of(&id("minecraft:stone")).unwrap();
        assert_eq!(registry.register(id("minecraft:stone")), stone);
        assert_eq!(registry.len(), before);

        let lamp = registry.register(id("mymod:lamp"));
        assert_eq!(lamp, BlockStateId(before as u16));
    }

    #[test]
    fn clock_wraps_at_day_length() {
        let mut server = SimServer::new();
        server.world_mut().set_time_of_day(DAY_LENGTH - 1);
        server.tick();
        assert_eq!(server.overworld().time_of_day(), 0);

        server.set_daylight_cycle(false);
        server.tick();
        assert_eq!(server.overworld().time_of_day(), 0);
    }

    #[test]
    fn queued_tasks_run_in_order_on_tick() {
        let mut server = SimServer::new();
        let executor = server.executor();
        let stone = server.registry().state_of(&id("minecraft:stone")).unwrap();
        let dirt = server.registry().state_of(&id("minecraft:dirt")).unwrap();
        let pos = BlockPos::new(0, 64, 0);

        executor.execute(Box::new(move |s: &mut dyn Server| {
            s.overworld_mut().set_block_state(pos, stone)
        }));
        executor.execute(Box::new(move |s: &mut dyn Server| {
            s.overworld_mut().set_block_state(pos, dirt)
        }));
        assert_eq!(server.pending_tasks(), 2);

        server.tick();
        assert_eq!(server.world().block_state(pos), dirt);
        assert_eq!(server.world().writes(), 2);
        assert_eq!(server.pending_tasks(), 0);
    }

    #[test]
    fn lifecycle_callbacks_fire_once() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut server = SimServer::new();
        let started = Rc::new(Cell::new(0));
        let counter = started.clone();
        server.on_server_started(Box::new(move |_s: &mut dyn Server| {
            counter.set(counter.get() + 1)
        }));

        server.start();
        server.start();
        assert_eq!(started.get(), 1);
        assert!(server.is_running());

        server.stop();
        assert!(!server.is_running());
    }
}

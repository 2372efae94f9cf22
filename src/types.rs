//! Core bridge types shared across all modules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Block positions and states
// ---------------------------------------------------------------------------

/// Integer world coordinate of a single block.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Raw block state id as handed out by the host registry.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockStateId(pub u16);

// ---------------------------------------------------------------------------
// Namespaced identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("illegal character in namespace of '{0}'")]
    InvalidNamespace(String),
    #[error("illegal character in path of '{0}'")]
    InvalidPath(String),
}

/// A `namespace:path` block identifier.
///
/// A bare path (`"stone"`) is read as `minecraft:stone`, matching how the
/// host resolves unqualified ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    namespace: String,
    path: String,
}

impl Identifier {
    pub const DEFAULT_NAMESPACE: &'static str = "minecraft";

    pub fn new(namespace: &str, path: &str) -> Result<Self, IdentifierError> {
        if path.is_empty() || namespace.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if !namespace.chars().all(valid_namespace_char) {
            return Err(IdentifierError::InvalidNamespace(format!("{namespace}:{path}")));
        }
        if !path.chars().all(valid_path_char) {
            return Err(IdentifierError::InvalidPath(format!("{namespace}:{path}")));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    pub fn vanilla(path: &str) -> Result<Self, IdentifierError> {
        Self::new(Self::DEFAULT_NAMESPACE, path)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn valid_namespace_char(c: char) -> bool {
    c == '_' || c == '-' || c == '.' || c.is_ascii_lowercase() || c.is_ascii_digit()
}

fn valid_path_char(c: char) -> bool {
    valid_namespace_char(c) || c == '/'
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, path)) => Self::new(namespace, path),
            None => Self::vanilla(s),
        }
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.to_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle of the outbound AI channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters shared between the main thread and the transport thread.
#[derive(Debug, Default)]
pub struct BridgeStats {
    ticks_while_open: AtomicU64,
    snapshots_sent: AtomicU64,
    snapshots_dropped: AtomicU64,
    plans_received: AtomicU64,
    protocol_errors: AtomicU64,
    entries_submitted: AtomicU64,
    entries_rejected: AtomicU64,
    connection_attempts: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks_while_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self, sent: bool) {
        let counter = if sent {
            &self.snapshots_sent
        } else {
            &self.snapshots_dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plan(&self, submitted: usize, rejected: usize) {
        self.plans_received.fetch_add(1, Ordering::Relaxed);
        self.entries_submitted
            .fetch_add(submitted as u64, Ordering::Relaxed);
        self.entries_rejected
            .fetch_add(rejected as u64, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            ticks_while_open: self.ticks_while_open.load(Ordering::Relaxed),
            snapshots_sent: self.snapshots_sent.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
            plans_received: self.plans_received.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            entries_submitted: self.entries_submitted.load(Ordering::Relaxed),
            entries_rejected: self.entries_rejected.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatsSnapshot {
    pub ticks_while_open: u64,
    pub snapshots_sent: u64,
    pub snapshots_dropped: u64,
    pub plans_received: u64,
    pub protocol_errors: u64,
    pub entries_submitted: u64,
    pub entries_rejected: u64,
    pub connection_attempts: u64,
}

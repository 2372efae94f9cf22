//! Snapshot / plan wire protocol.
//!
//! This module owns **every message that crosses the socket** between the
//! bridge and the AI service.
//!
//! | Message    | Direction      | Shape                                          |
//! |------------|----------------|------------------------------------------------|
//! | `Snapshot` | bridge → AI    | `{"dayTime": i64, "players": u64}`             |
//! | `Plan`     | AI → bridge    | `{"build": [{"block", "x", "y", "z"}, ...]}`   |
//!
//! ## Design rules
//!
//! 1. One JSON object per text frame, both directions.
//! 2. Unknown keys are ignored, at the top level and inside build entries.
//! 3. A malformed build entry is dropped on its own; the rest of the plan
//!    still applies, in order.

use crate::types::{BlockPos, Identifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Snapshot  (bridge → AI)
// ---------------------------------------------------------------------------

/// Periodic summary of world state sent to the AI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Overworld time-of-day counter.
    pub day_time: i64,
    /// Number of connected players.
    pub players: usize,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Plan  (AI → bridge)
// ---------------------------------------------------------------------------

/// One block placement requested by the AI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEntry {
    pub block: Identifier,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BuildEntry {
    pub fn new(block: Identifier, x: i32, y: i32, z: i32) -> Self {
        Self { block, x, y, z }
    }

    pub fn pos(&self) -> BlockPos {
        BlockPos::new(self.x, self.y, self.z)
    }
}

/// Outbound form of a plan, as the AI service writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub build: Vec<BuildEntry>,
}

/// Result of validating one inbound plan message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPlan {
    /// Well-formed entries, in input order.
    pub entries: Vec<BuildEntry>,
    /// Number of `build` elements that were dropped.
    pub rejected: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("plan root is not a JSON object")]
    NotAnObject,
    #[error("plan has no 'build' array")]
    MissingBuild,
}

/// Decode and validate a raw plan message.
///
/// Message-level problems are reported as [`PlanError`]; entry-level
/// problems only bump [`ParsedPlan::rejected`].
pub fn parse_plan(text: &str) -> Result<ParsedPlan, PlanError> {
    let root: Value = serde_json::from_str(text)?;
    let Value::Object(mut root) = root else {
        return Err(PlanError::NotAnObject);
    };
    let Some(Value::Array(elements)) = root.remove("build") else {
        return Err(PlanError::MissingBuild);
    };

    let mut plan = ParsedPlan {
        entries: Vec::with_capacity(elements.len()),
        rejected: 0,
    };
    for (index, element) in elements.into_iter().enumerate() {
        match parse_entry(element) {
            Some(entry) => plan.entries.push(entry),
            None => {
                log::debug!("[aicraft] Dropping malformed build entry #{}", index);
                plan.rejected += 1;
            }
        }
    }
    Ok(plan)
}

fn parse_entry(element: Value) -> Option<BuildEntry> {
    if !element.is_object() {
        return None;
    }
    serde_json::from_value(element).ok()
}

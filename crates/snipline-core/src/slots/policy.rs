//! Eviction policies consulted when an engine has no free slot.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use super::Occupant;

/// Decides what happens when a label needs a slot on a full engine.
pub trait EvictionPolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Position `label` is statically bound to on `engine_code`, if any.
    /// A pinned position is claimed even when another label holds it.
    fn pinned_position(&self, _engine_code: &str, _label: &str) -> Option<u32> {
        None
    }

    /// Occupied position to retire so `label` can be placed, or `None` to
    /// reject the claim.
    fn select_victim(
        &self,
        engine_code: &str,
        label: &str,
        occupants: &BTreeMap<u32, Occupant>,
    ) -> Option<u32>;
}

/// Never evict; a full engine rejects new labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectOnFull;

impl EvictionPolicy for RejectOnFull {
    fn name(&self) -> &'static str {
        "reject_on_full"
    }

    fn select_victim(&self, _: &str, _: &str, _: &BTreeMap<u32, Occupant>) -> Option<u32> {
        None
    }
}

/// Retire the occupant whose promotion is oldest.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastRecentlyPromoted;

impl EvictionPolicy for LeastRecentlyPromoted {
    fn name(&self) -> &'static str {
        "least_recently_promoted"
    }

    fn select_victim(
        &self,
        _engine_code: &str,
        _label: &str,
        occupants: &BTreeMap<u32, Occupant>,
    ) -> Option<u32> {
        occupants
            .iter()
            .min_by(|(pa, a), (pb, b)| a.promoted_at.cmp(&b.promoted_at).then(pa.cmp(pb)))
            .map(|(pos, _)| *pos)
    }
}

/// Static `(engine, label) -> position` table. Pinned labels always get
/// their position; unpinned labels are rejected when the engine is full.
#[derive(Debug, Clone, Default)]
pub struct FixedAssignment {
    pins: HashMap<(String, String), u32>,
}

impl FixedAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(mut self, engine_code: impl Into<String>, label: impl Into<String>, position: u32) -> Self {
        self.pins.insert((engine_code.into(), label.into()), position);
        self
    }
}

impl EvictionPolicy for FixedAssignment {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn pinned_position(&self, engine_code: &str, label: &str) -> Option<u32> {
        self.pins
            .get(&(engine_code.to_string(), label.to_string()))
            .copied()
    }

    fn select_victim(&self, _: &str, _: &str, _: &BTreeMap<u32, Occupant>) -> Option<u32> {
        None
    }
}

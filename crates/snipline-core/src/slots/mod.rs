//! Slot allocation.
//!
//! Each engine owns `slot_capacity` positions (1-based). The allocator
//! keeps the current occupant of every position and a label -> position
//! affinity map, both behind one mutex per engine. A claim picks a
//! position and installs the new occupant inside the same critical
//! section, so concurrent claims on one engine can never share a position.

pub mod policy;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snipline_state::{ContentHash, PromotionRecord, StagingId};
use tracing::{debug, warn};

use crate::domain::{PipelineError, Result};
use crate::engine::EngineRegistry;

pub use policy::{EvictionPolicy, FixedAssignment, LeastRecentlyPromoted, RejectOnFull};

/// The snippet currently held by a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub staging_id: StagingId,
    pub label: String,
    pub content_hash: ContentHash,
    pub promoted_at: DateTime<Utc>,
}

/// Result of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    pub engine_code: String,
    pub position: u32,
    /// Whatever held the position before this claim.
    pub previous: Option<Occupant>,
}

impl SlotAssignment {
    pub fn address(&self) -> String {
        format!("{}{}", self.engine_code, self.position)
    }

    /// The previous occupant if it belonged to a different label.
    pub fn retired(&self, label: &str) -> Option<&Occupant> {
        self.previous.as_ref().filter(|o| o.label != label)
    }
}

#[derive(Debug, Default)]
struct SlotTable {
    occupants: BTreeMap<u32, Occupant>,
    affinity: HashMap<String, u32>,
}

impl SlotTable {
    /// Install `occupant` at `position`, returning the displaced one.
    fn install(&mut self, position: u32, occupant: Occupant) -> Option<Occupant> {
        let label = occupant.label.clone();
        let previous = self.occupants.insert(position, occupant);
        if let Some(prev) = &previous {
            if prev.label != label && self.affinity.get(&prev.label) == Some(&position) {
                self.affinity.remove(&prev.label);
            }
        }
        self.affinity.insert(label, position);
        previous
    }

    fn vacate(&mut self, position: u32) -> Option<Occupant> {
        let evicted = self.occupants.remove(&position)?;
        if self.affinity.get(&evicted.label) == Some(&position) {
            self.affinity.remove(&evicted.label);
        }
        Some(evicted)
    }
}

#[derive(Debug)]
struct EngineSlots {
    capacity: u32,
    table: Mutex<SlotTable>,
}

impl EngineSlots {
    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_range(&self, position: u32) -> bool {
        (1..=self.capacity).contains(&position)
    }
}

/// Per-engine slot tables plus the eviction policy.
#[derive(Debug)]
pub struct SlotAllocator {
    engines: HashMap<String, EngineSlots>,
    policy: Arc<dyn EvictionPolicy>,
}

impl SlotAllocator {
    /// One empty table per registry engine.
    pub fn new(registry: &EngineRegistry, policy: Arc<dyn EvictionPolicy>) -> Self {
        let engines = registry
            .engines()
            .map(|e| {
                (
                    e.code.clone(),
                    EngineSlots {
                        capacity: e.slot_capacity,
                        table: Mutex::new(SlotTable::default()),
                    },
                )
            })
            .collect();
        Self { engines, policy }
    }

    pub fn policy(&self) -> &dyn EvictionPolicy {
        self.policy.as_ref()
    }

    fn slots(&self, engine_code: &str) -> Result<&EngineSlots> {
        self.engines
            .get(engine_code)
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown engine: {engine_code}")))
    }

    /// Claim a position on `engine_code` for `occupant` and install it.
    ///
    /// Candidate order: `preferred`, then a policy pin, then the label's
    /// affinity. The candidate is taken when free or held by the same
    /// label (a pinned position is taken regardless of holder). Otherwise
    /// the lowest free position is used, then a policy victim; failing
    /// both the claim is rejected with `CapacityExceeded`.
    pub fn claim(
        &self,
        engine_code: &str,
        occupant: Occupant,
        preferred: Option<u32>,
    ) -> Result<SlotAssignment> {
        let slots = self.slots(engine_code)?;
        let mut table = slots.lock();
        let label = occupant.label.as_str();

        let pinned = self
            .policy
            .pinned_position(engine_code, label)
            .filter(|p| slots.in_range(*p));
        let candidate = preferred
            .filter(|p| slots.in_range(*p))
            .or(pinned)
            .or_else(|| {
                table
                    .affinity
                    .get(label)
                    .copied()
                    .filter(|p| slots.in_range(*p))
            });

        let reusable = candidate.filter(|pos| match table.occupants.get(pos) {
            None => true,
            Some(current) => current.label == label || pinned == Some(*pos),
        });

        let position = match reusable {
            Some(pos) => pos,
            None => match (1..=slots.capacity).find(|p| !table.occupants.contains_key(p)) {
                Some(free) => free,
                None => self
                    .policy
                    .select_victim(engine_code, label, &table.occupants)
                    .filter(|p| slots.in_range(*p))
                    .ok_or_else(|| PipelineError::CapacityExceeded {
                        engine: engine_code.to_string(),
                        capacity: slots.capacity,
                    })?,
            },
        };

        debug!(
            engine = engine_code,
            position,
            label,
            staging_id = %occupant.staging_id,
            "slot claimed"
        );
        let previous = table.install(position, occupant);
        Ok(SlotAssignment {
            engine_code: engine_code.to_string(),
            position,
            previous,
        })
    }

    /// Undo a claim whose promotion could not be recorded.
    ///
    /// No-op if the position has since been claimed by someone else.
    pub fn revert(&self, assignment: &SlotAssignment, staging_id: &StagingId) -> Result<()> {
        let slots = self.slots(&assignment.engine_code)?;
        let mut table = slots.lock();
        let ours = table
            .occupants
            .get(&assignment.position)
            .map_or(false, |o| &o.staging_id == staging_id);
        if !ours {
            return Ok(());
        }
        table.vacate(assignment.position);
        if let Some(previous) = assignment.previous.clone() {
            table.install(assignment.position, previous);
        }
        Ok(())
    }

    /// Clear a position. The evicted label loses its affinity.
    pub fn evict(&self, engine_code: &str, position: u32) -> Result<Option<Occupant>> {
        Ok(self.slots(engine_code)?.lock().vacate(position))
    }

    /// Clear a position only while `staging_id` still holds it.
    pub fn release(
        &self,
        engine_code: &str,
        position: u32,
        staging_id: &StagingId,
    ) -> Result<Option<Occupant>> {
        let slots = self.slots(engine_code)?;
        let mut table = slots.lock();
        let held = table
            .occupants
            .get(&position)
            .map_or(false, |o| &o.staging_id == staging_id);
        Ok(if held { table.vacate(position) } else { None })
    }

    /// Put an evicted occupant back if its position is still free.
    pub fn reinstate(&self, engine_code: &str, position: u32, occupant: Occupant) -> Result<bool> {
        let slots = self.slots(engine_code)?;
        let mut table = slots.lock();
        if table.occupants.contains_key(&position) {
            return Ok(false);
        }
        table.install(position, occupant);
        Ok(true)
    }

    pub fn occupant(&self, engine_code: &str, position: u32) -> Result<Option<Occupant>> {
        Ok(self
            .slots(engine_code)?
            .lock()
            .occupants
            .get(&position)
            .cloned())
    }

    /// Current occupants of an engine, ordered by position.
    pub fn occupants(&self, engine_code: &str) -> Result<Vec<(u32, Occupant)>> {
        Ok(self
            .slots(engine_code)?
            .lock()
            .occupants
            .iter()
            .map(|(p, o)| (*p, o.clone()))
            .collect())
    }

    /// Position the label was last placed at on this engine.
    pub fn affinity(&self, engine_code: &str, label: &str) -> Result<Option<u32>> {
        Ok(self.slots(engine_code)?.lock().affinity.get(label).copied())
    }

    /// Total occupied positions across engines.
    pub fn occupied(&self) -> usize {
        self.engines.values().map(|s| s.lock().occupants.len()).sum()
    }

    /// Replay one ledger record. Records must be applied in `seq` order.
    ///
    /// Returns `false` for records that no longer fit the catalog.
    pub fn restore(&self, record: &PromotionRecord) -> bool {
        let Some(slots) = self.engines.get(&record.engine_code) else {
            warn!(engine = %record.engine_code, seq = record.seq, "ledger record for unknown engine");
            return false;
        };
        if !slots.in_range(record.position) {
            warn!(
                address = %record.address(),
                seq = record.seq,
                "ledger record outside engine capacity"
            );
            return false;
        }
        slots.lock().install(
            record.position,
            Occupant {
                staging_id: record.staging_id.clone(),
                label: record.label.clone(),
                content_hash: record.content_hash.clone(),
                promoted_at: record.promoted_at,
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use snipline_state::Language;

    fn registry(capacity: u32) -> EngineRegistry {
        EngineRegistry::empty().with_engine(Engine::for_language("m", Language::C, capacity))
    }

    fn occupant(label: &str) -> Occupant {
        Occupant {
            staging_id: StagingId::generate(),
            label: label.into(),
            content_hash: ContentHash::from_bytes(label.as_bytes()),
            promoted_at: Utc::now(),
        }
    }

    #[test]
    fn first_claim_takes_lowest_free_position() {
        let alloc = SlotAllocator::new(&registry(4), Arc::new(RejectOnFull));
        let a = alloc.claim("m", occupant("A"), None).unwrap();
        let b = alloc.claim("m", occupant("B"), None).unwrap();
        assert_eq!((a.position, b.position), (1, 2));
        assert_eq!(b.address(), "m2");
    }

    #[test]
    fn same_label_reuses_its_position() {
        let alloc = SlotAllocator::new(&registry(4), Arc::new(RejectOnFull));
        let first = alloc.claim("m", occupant("Fact"), None).unwrap();
        alloc.claim("m", occupant("Other"), None).unwrap();
        let again = alloc.claim("m", occupant("Fact"), None).unwrap();
        assert_eq!(again.position, first.position);
        assert!(again.previous.is_some());
        assert!(again.retired("Fact").is_none());
    }

    #[test]
    fn preferred_position_held_by_other_label_falls_back() {
        let alloc = SlotAllocator::new(&registry(4), Arc::new(RejectOnFull));
        alloc.claim("m", occupant("A"), None).unwrap();
        let b = alloc.claim("m", occupant("B"), Some(1)).unwrap();
        assert_eq!(b.position, 2);
    }

    #[test]
    fn full_engine_rejects_by_default() {
        let alloc = SlotAllocator::new(&registry(1), Arc::new(RejectOnFull));
        alloc.claim("m", occupant("A"), None).unwrap();
        let err = alloc.claim("m", occupant("B"), None).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CapacityExceeded { capacity: 1, .. }
        ));
    }

    #[test]
    fn least_recently_promoted_retires_oldest() {
        let alloc = SlotAllocator::new(&registry(2), Arc::new(LeastRecentlyPromoted));
        let mut old = occupant("Old");
        old.promoted_at = Utc::now() - chrono::Duration::hours(1);
        alloc.claim("m", old.clone(), None).unwrap();
        alloc.claim("m", occupant("Fresh"), None).unwrap();

        let c = alloc.claim("m", occupant("New"), None).unwrap();
        assert_eq!(c.position, 1);
        assert_eq!(c.retired("New").unwrap().staging_id, old.staging_id);
        assert_eq!(alloc.affinity("m", "Old").unwrap(), None);
    }

    #[test]
    fn pinned_label_displaces_holder() {
        let policy = FixedAssignment::new().pin("m", "Pinned", 1);
        let alloc = SlotAllocator::new(&registry(2), Arc::new(policy));
        alloc.claim("m", occupant("Squatter"), None).unwrap();
        let p = alloc.claim("m", occupant("Pinned"), None).unwrap();
        assert_eq!(p.position, 1);
        assert_eq!(p.retired("Pinned").unwrap().label, "Squatter");
    }

    #[test]
    fn evict_frees_position_and_drops_affinity() {
        let alloc = SlotAllocator::new(&registry(2), Arc::new(RejectOnFull));
        alloc.claim("m", occupant("A"), None).unwrap();
        let evicted = alloc.evict("m", 1).unwrap().unwrap();
        assert_eq!(evicted.label, "A");
        assert!(alloc.occupant("m", 1).unwrap().is_none());
        assert_eq!(alloc.affinity("m", "A").unwrap(), None);
        assert!(alloc.evict("m", 1).unwrap().is_none());
    }

    #[test]
    fn release_only_clears_the_named_occupant() {
        let alloc = SlotAllocator::new(&registry(2), Arc::new(LeastRecentlyPromoted));
        let a = occupant("A");
        alloc.claim("m", a.clone(), None).unwrap();
        alloc.claim("m", occupant("A"), None).unwrap();

        // A newer promotion of the label took the position over.
        assert!(alloc.release("m", 1, &a.staging_id).unwrap().is_none());
        assert!(alloc.occupant("m", 1).unwrap().is_some());

        let current = alloc.occupant("m", 1).unwrap().unwrap();
        let released = alloc.release("m", 1, &current.staging_id).unwrap();
        assert_eq!(released, Some(current.clone()));
        assert_eq!(alloc.affinity("m", "A").unwrap(), None);

        assert!(alloc.reinstate("m", 1, current.clone()).unwrap());
        assert_eq!(alloc.affinity("m", "A").unwrap(), Some(1));
        assert!(!alloc.reinstate("m", 1, current).unwrap());
    }

    #[test]
    fn revert_restores_previous_occupant() {
        let alloc = SlotAllocator::new(&registry(1), Arc::new(LeastRecentlyPromoted));
        let a = occupant("A");
        alloc.claim("m", a.clone(), None).unwrap();
        let b = occupant("B");
        let assignment = alloc.claim("m", b.clone(), None).unwrap();
        alloc.revert(&assignment, &b.staging_id).unwrap();

        assert_eq!(alloc.occupant("m", 1).unwrap(), Some(a));
        assert_eq!(alloc.affinity("m", "A").unwrap(), Some(1));
        assert_eq!(alloc.affinity("m", "B").unwrap(), None);
    }

    #[test]
    fn unknown_engine_is_invalid_input() {
        let alloc = SlotAllocator::new(&registry(1), Arc::new(RejectOnFull));
        assert!(matches!(
            alloc.claim("zz", occupant("A"), None),
            Err(PipelineError::InvalidInput(_))
        ));
    }
}

//! Post-duplication repair of referential edges.
//!
//! Duplication copies constraints verbatim, so cloned constraints still target the
//! template's entities. [`Rebinder::rebind`] points each of them at the matching copy
//! inside the same clone, trying three tiers in order:
//!
//! 0. the original-to-copy map returned by [`Scene::duplicate`](crate::Scene::duplicate),
//! 1. ordinal suffix correlation (`IK_Target.005` follows `WalkPath.005`),
//! 2. the closest rotation about the vertical axis, within a tolerance.
//!
//! Targets outside the source closure are shared on purpose and are left alone. Edges no
//! tier resolves keep their original target and are reported.

use std::collections::HashSet;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::RebindConfig;
use crate::closure::Closure;
use crate::scene::{ConstraintSlot, DuplicateMap, EntityId, Scene, split_ordinal};
use crate::wrap_signed_angle;

/// Strategy that resolved an edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RebindTier {
    IdentityMap,
    Suffix,
    Geometric,
}

/// Constraint left pointing at its pre-duplication target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedEdge {
    pub slot: ConstraintSlot,
    pub original_target: EntityId,
}

/// Per-clone rebinding tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebindReport {
    pub identity: usize,
    pub suffix: usize,
    pub geometric: usize,
    /// Edges to intentionally shared entities.
    pub shared: usize,
    /// Edges that already targeted a clone member.
    pub already_bound: usize,
    pub unresolved: Vec<UnresolvedEdge>,
}

impl RebindReport {
    /// Edges retargeted by any tier.
    #[must_use]
    pub fn rebound(&self) -> usize {
        self.identity + self.suffix + self.geometric
    }

    fn record(&mut self, tier: RebindTier) {
        match tier {
            RebindTier::IdentityMap => self.identity += 1,
            RebindTier::Suffix => self.suffix += 1,
            RebindTier::Geometric => self.geometric += 1,
        }
    }
}

/// Entities produced by duplicating one closure.
#[derive(Debug, Clone, Default)]
pub struct ClonedClosure {
    members: Vec<EntityId>,
    index: HashSet<EntityId>,
    map: DuplicateMap,
}

impl ClonedClosure {
    /// Clone set described by a duplication map, ordered like `source`.
    #[must_use]
    pub fn new(source: &Closure, map: DuplicateMap) -> Self {
        let members: Vec<EntityId> = source
            .members()
            .iter()
            .filter_map(|original| map.get(*original).copied())
            .collect();
        Self {
            index: members.iter().copied().collect(),
            members,
            map,
        }
    }

    /// Clone set known only by membership; rebinding falls back to name and geometry.
    #[must_use]
    pub fn from_members(members: Vec<EntityId>) -> Self {
        Self {
            index: members.iter().copied().collect(),
            members,
            map: DuplicateMap::new(),
        }
    }

    #[must_use]
    pub fn members(&self) -> &[EntityId] {
        &self.members
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains(&id)
    }

    /// Copy of `original` inside this clone, if the duplication map knows it.
    #[must_use]
    pub fn copy_of(&self, original: EntityId) -> Option<EntityId> {
        self.map.get(original).copied().filter(|id| self.contains(*id))
    }

    /// Copy of the source root.
    #[must_use]
    pub fn root(&self) -> Option<EntityId> {
        self.members.first().copied()
    }
}

struct Candidate {
    id: EntityId,
    stem: String,
    ordinal: Option<u32>,
    heading: f32,
}

/// Retargets cloned constraints at their sibling duplicates.
#[derive(Debug, Clone, Copy)]
pub struct Rebinder<'a> {
    config: &'a RebindConfig,
    source: &'a Closure,
}

impl<'a> Rebinder<'a> {
    pub fn new(config: &'a RebindConfig, source: &'a Closure) -> Self {
        Self { config, source }
    }

    /// Rebind every constraint on every clone member. Safe to run repeatedly.
    pub fn rebind(&self, scene: &mut Scene, clone: &ClonedClosure) -> RebindReport {
        let candidates: Vec<Candidate> = clone
            .members()
            .iter()
            .filter_map(|id| {
                let entity = scene.get(*id)?;
                let (stem, ordinal) = split_ordinal(&entity.name);
                Some(Candidate {
                    id: *id,
                    stem: stem.to_owned(),
                    ordinal,
                    heading: entity.transform.rotation.z,
                })
            })
            .collect();

        let mut report = RebindReport::default();
        for owner in clone.members() {
            for slot in scene.constraint_slots(*owner) {
                let Some(target) = scene.constraint(slot).and_then(|c| c.target) else {
                    continue;
                };
                if clone.contains(target) {
                    report.already_bound += 1;
                    continue;
                }
                if !self.source.contains(target) {
                    report.shared += 1;
                    continue;
                }
                match self.resolve(scene, clone, &candidates, slot, target) {
                    Some((replacement, tier)) => {
                        debug!(
                            owner = scene.name(slot.owner),
                            from = scene.name(target),
                            to = scene.name(replacement),
                            ?tier,
                            "rebound constraint"
                        );
                        if let Some(constraint) = scene.constraint_mut(slot) {
                            constraint.target = Some(replacement);
                        }
                        report.record(tier);
                    }
                    None => {
                        warn!(
                            owner = scene.name(slot.owner),
                            original = scene.name(target),
                            joint = ?slot.joint,
                            "no duplicate matched constraint target; leaving original binding"
                        );
                        report.unresolved.push(UnresolvedEdge {
                            slot,
                            original_target: target,
                        });
                    }
                }
            }
        }
        report
    }

    fn resolve(
        &self,
        scene: &Scene,
        clone: &ClonedClosure,
        candidates: &[Candidate],
        slot: ConstraintSlot,
        target: EntityId,
    ) -> Option<(EntityId, RebindTier)> {
        if self.config.use_identity_map {
            if let Some(copy) = clone.copy_of(target) {
                return Some((copy, RebindTier::IdentityMap));
            }
        }

        let owner = scene.get(slot.owner)?;
        let (_, owner_ordinal) = split_ordinal(&owner.name);
        let (target_stem, _) = split_ordinal(scene.name(target));
        let family = || candidates.iter().filter(|c| c.stem == target_stem);

        if let Some(candidate) = family().find(|c| c.ordinal == owner_ordinal) {
            return Some((candidate.id, RebindTier::Suffix));
        }

        let owner_heading = owner.transform.rotation.z;
        family()
            .map(|c| (c.id, wrap_signed_angle(c.heading - owner_heading).abs()))
            .min_by_key(|(_, diff)| OrderedFloat(*diff))
            .filter(|(_, diff)| *diff < self.config.geometric_tolerance)
            .map(|(id, _)| (id, RebindTier::Geometric))
    }
}

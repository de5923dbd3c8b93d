//! Dependency closure of an agent: everything a duplication must copy together.

use std::collections::HashSet;

use tracing::debug;

use crate::scene::{EntityId, Scene};

/// Constraint target pulled into a closure that structural descent alone would miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredDependency {
    pub target: EntityId,
    pub owner: EntityId,
    /// Rig joint holding the constraint, when the edge is rig-internal.
    pub joint: Option<usize>,
}

/// Ordered entity set produced by [`collect_closure`]. The root comes first.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    root: Option<EntityId>,
    members: Vec<EntityId>,
    index: HashSet<EntityId>,
    recovered: Vec<RecoveredDependency>,
}

impl Closure {
    #[must_use]
    pub fn root(&self) -> Option<EntityId> {
        self.root
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains(&id)
    }

    /// Members in discovery order.
    #[must_use]
    pub fn members(&self) -> &[EntityId] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn recovered(&self) -> &[RecoveredDependency] {
        &self.recovered
    }

    /// Drop members failing `keep`. The root is always kept.
    pub fn retain(&mut self, mut keep: impl FnMut(EntityId) -> bool) {
        let root = self.root;
        self.members.retain(|id| Some(*id) == root || keep(*id));
        let members = &self.members;
        self.index.retain(|id| members.contains(id));
    }

    fn push(&mut self, id: EntityId) -> bool {
        if self.index.insert(id) {
            self.members.push(id);
            true
        } else {
            false
        }
    }

    /// Add `start` and its descendants in pre-order.
    fn add_subtree(&mut self, scene: &Scene, start: EntityId) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !self.push(id) {
                continue;
            }
            stack.extend(scene.children(id).iter().rev().copied());
        }
    }
}

/// Collect `root`, its descendants, and every constraint target reachable from them.
///
/// Entity and rig-joint constraints are both followed, and targets pull in their own
/// descendants, until nothing new is found. A missing root yields an empty closure.
#[must_use]
pub fn collect_closure(scene: &Scene, root: EntityId) -> Closure {
    let mut closure = Closure::default();
    if !scene.contains(root) {
        return closure;
    }
    closure.root = Some(root);
    closure.add_subtree(scene, root);

    let mut scanned = 0;
    while scanned < closure.members.len() {
        let owner = closure.members[scanned];
        scanned += 1;
        for slot in scene.constraint_slots(owner) {
            let Some(target) = scene.constraint(slot).and_then(|c| c.target) else {
                continue;
            };
            if closure.contains(target) {
                continue;
            }
            if !scene.contains(target) {
                debug!(owner = scene.name(owner), "constraint target no longer exists");
                continue;
            }
            debug!(
                dependency = scene.name(target),
                owner = scene.name(owner),
                joint = ?slot.joint,
                "recovered dependency"
            );
            closure.recovered.push(RecoveredDependency {
                target,
                owner,
                joint: slot.joint,
            });
            closure.add_subtree(scene, target);
        }
    }
    closure
}

//! Scene graph collaborator: entities, constraints, rigs, and duplication.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use swarmwalk_probe::ObstacleShape;
use tracing::debug;

use crate::{AnimationTrack, Point2, Vec3};

new_key_type! {
    /// Stable handle for scene entities backed by a generational slot map.
    pub struct EntityId;
}

/// Original-to-copy mapping returned by [`Scene::duplicate`].
pub type DuplicateMap = SecondaryMap<EntityId, EntityId>;

/// Location, Euler rotation (radians), and scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    pub location: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// Behaviour attached to an entity or joint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ConstraintKind {
    /// Position along the target curve, in percent of its length.
    FollowPath { offset: f32 },
    CopyRotation,
    /// IK chain ending at the owning joint and reaching toward the target.
    InverseKinematics { chain_count: u32 },
    DampedTrack,
    CopyTransforms,
}

/// Referential edge from its owner to an optional target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub target: Option<EntityId>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, kind: ConstraintKind, target: Option<EntityId>) -> Self {
        Self {
            name: name.into(),
            kind,
            target,
        }
    }
}

/// Joint inside an articulated rig.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Joint {
    pub name: String,
    /// Index of the parent joint within the same rig.
    pub parent: Option<usize>,
    pub constraints: Vec<Constraint>,
}

impl Joint {
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Skeleton consumed by the IK solver; only its joint constraints matter here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Rig {
    pub joints: Vec<Joint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EntityKind {
    Empty,
    Mesh,
    Curve,
    Armature(Rig),
}

/// Planar obstacle outline in the entity's local frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Footprint {
    Circle { radius: f32 },
    Rect { half_extents: [f32; 2] },
}

/// Node in the scene graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub transform: Transform,
    /// Animation-only offset layered on top of `transform`.
    pub delta: Transform,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
    pub constraints: Vec<Constraint>,
    pub track: Option<AnimationTrack>,
    /// Solid for avoidance probes.
    pub obstacle: bool,
    pub footprint: Option<Footprint>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transform: Transform::default(),
            delta: Transform::default(),
            parent: None,
            children: Vec::new(),
            constraints: Vec::new(),
            track: None,
            obstacle: false,
            footprint: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Vec3) -> Self {
        self.transform.location = location;
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.transform.rotation = rotation;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn with_track(mut self, track: AnimationTrack) -> Self {
        self.track = Some(track);
        self
    }

    /// Tag the entity as an obstacle with the given outline.
    #[must_use]
    pub fn as_obstacle(mut self, footprint: Footprint) -> Self {
        self.obstacle = true;
        self.footprint = Some(footprint);
        self
    }

    #[must_use]
    pub fn rig(&self) -> Option<&Rig> {
        match &self.kind {
            EntityKind::Armature(rig) => Some(rig),
            _ => None,
        }
    }
}

/// Address of one constraint: on the entity itself or on one of its rig joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintSlot {
    pub owner: EntityId,
    pub joint: Option<usize>,
    pub index: usize,
}

/// Split `"stem.007"` into `("stem", Some(7))`; names without a numeric suffix return `None`.
#[must_use]
pub fn split_ordinal(name: &str) -> (&str, Option<u32>) {
    match name.rsplit_once('.') {
        Some((stem, digits))
            if !stem.is_empty()
                && !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (stem, digits.parse().ok())
        }
        _ => (name, None),
    }
}

/// Entity storage with unique names and insertion-ordered iteration.
#[derive(Debug, Default)]
pub struct Scene {
    entities: SlotMap<EntityId, Entity>,
    order: Vec<EntityId>,
    names: HashMap<String, EntityId>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Insert an entity, renaming it to `stem.NNN` if its name is taken.
    ///
    /// `children` is rebuilt from parent links; a parent that is not live is dropped.
    pub fn insert(&mut self, mut entity: Entity) -> EntityId {
        entity.name = self.unique_name(&entity.name);
        entity.children.clear();
        let parent = entity.parent.filter(|p| self.entities.contains_key(*p));
        entity.parent = parent;
        let name = entity.name.clone();
        let id = self.entities.insert(entity);
        if let Some(parent) = parent {
            self.entities[parent].children.push(id);
        }
        self.order.push(id);
        self.names.insert(name, id);
        id
    }

    /// Look up an entity by its exact name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Name of `id`, or an empty string for stale handles.
    #[must_use]
    pub fn name(&self, id: EntityId) -> &str {
        self.entities.get(id).map_or("", |e| e.name.as_str())
    }

    /// Rename `id`, uniquifying against other entities. Returns the name actually set.
    pub fn rename(&mut self, id: EntityId, name: &str) -> Option<String> {
        let old = self.entities.get(id)?.name.clone();
        self.names.remove(&old);
        let unique = self.unique_name(name);
        self.names.insert(unique.clone(), id);
        self.entities[id].name.clone_from(&unique);
        Some(unique)
    }

    /// Iterate entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.entities.get(*id).map(|entity| (*id, entity)))
    }

    #[must_use]
    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.entities
            .get(id)
            .map_or(&[], |entity| entity.children.as_slice())
    }

    /// Entities without a parent, in insertion order.
    #[must_use]
    pub fn roots(&self) -> Vec<EntityId> {
        self.iter()
            .filter(|(_, entity)| entity.parent.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    fn is_ancestor(&self, candidate: EntityId, mut of: EntityId) -> bool {
        while let Some(parent) = self.entities.get(of).and_then(|e| e.parent) {
            if parent == candidate {
                return true;
            }
            of = parent;
        }
        false
    }

    /// Re-parent `child`. Returns false when either handle is stale or the link would
    /// create a cycle.
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> bool {
        if !self.contains(child) {
            return false;
        }
        if let Some(parent) = parent {
            if !self.contains(parent) || parent == child || self.is_ancestor(child, parent) {
                return false;
            }
        }
        if let Some(old) = self.entities[child].parent {
            if let Some(old_parent) = self.entities.get_mut(old) {
                old_parent.children.retain(|c| *c != child);
            }
        }
        self.entities[child].parent = parent;
        if let Some(parent) = parent {
            self.entities[parent].children.push(child);
        }
        true
    }

    /// Every constraint slot on `id`: entity-level first, then rig joints in order.
    #[must_use]
    pub fn constraint_slots(&self, id: EntityId) -> Vec<ConstraintSlot> {
        let Some(entity) = self.entities.get(id) else {
            return Vec::new();
        };
        let mut slots: Vec<ConstraintSlot> = (0..entity.constraints.len())
            .map(|index| ConstraintSlot {
                owner: id,
                joint: None,
                index,
            })
            .collect();
        if let Some(rig) = entity.rig() {
            for (joint, data) in rig.joints.iter().enumerate() {
                slots.extend((0..data.constraints.len()).map(|index| ConstraintSlot {
                    owner: id,
                    joint: Some(joint),
                    index,
                }));
            }
        }
        slots
    }

    #[must_use]
    pub fn constraint(&self, slot: ConstraintSlot) -> Option<&Constraint> {
        let entity = self.entities.get(slot.owner)?;
        match slot.joint {
            None => entity.constraints.get(slot.index),
            Some(joint) => entity.rig()?.joints.get(joint)?.constraints.get(slot.index),
        }
    }

    pub fn constraint_mut(&mut self, slot: ConstraintSlot) -> Option<&mut Constraint> {
        let entity = self.entities.get_mut(slot.owner)?;
        match slot.joint {
            None => entity.constraints.get_mut(slot.index),
            Some(joint) => match &mut entity.kind {
                EntityKind::Armature(rig) => {
                    rig.joints.get_mut(joint)?.constraints.get_mut(slot.index)
                }
                _ => None,
            },
        }
    }

    /// Smallest free `stem.NNN` name, or `name` itself when unused.
    #[must_use]
    pub fn unique_name(&self, name: &str) -> String {
        if !self.names.contains_key(name) {
            return name.to_owned();
        }
        let (stem, _) = split_ordinal(name);
        (1u32..)
            .map(|n| format!("{stem}.{n:03}"))
            .find(|candidate| !self.names.contains_key(candidate))
            .unwrap_or_else(|| format!("{stem}.dup"))
    }

    /// Copy `members` as one unit and return the original-to-copy map.
    ///
    /// Members are copied in name order so copies of sibling families receive matching
    /// ordinal suffixes. Parent links inside the set are remapped; links to parents outside
    /// it are kept. Constraint targets are copied verbatim and still point at the
    /// originals until rebound.
    pub fn duplicate(&mut self, members: &[EntityId]) -> DuplicateMap {
        let mut sorted: Vec<EntityId> = members
            .iter()
            .copied()
            .filter(|id| self.contains(*id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        sorted.sort_by(|a, b| self.name(*a).cmp(self.name(*b)));

        let mut map = DuplicateMap::new();
        for &original in &sorted {
            let mut copy = self.entities[original].clone();
            copy.parent = None;
            copy.children.clear();
            let id = self.insert(copy);
            map.insert(original, id);
        }

        for &original in &sorted {
            let copy = map[original];
            let parent = self.entities[original].parent;
            let remapped = parent.map(|p| map.get(p).copied().unwrap_or(p));
            if let Some(parent) = remapped {
                self.entities[copy].parent = Some(parent);
            }
        }
        // Rebuild children lists in the originals' child order.
        for &original in &sorted {
            let children: Vec<EntityId> = self.entities[original]
                .children
                .iter()
                .filter_map(|child| map.get(*child).copied())
                .collect();
            self.entities[map[original]].children = children;
        }
        for &original in &sorted {
            let copy = map[original];
            if let Some(parent) = self.entities[original].parent {
                if !map.contains_key(parent) {
                    self.entities[parent].children.push(copy);
                }
            }
        }
        debug!(copied = map.len(), "duplicated entity set");
        map
    }

    /// World-space location and rotation about the vertical axis.
    #[must_use]
    pub fn world_placement(&self, id: EntityId) -> Option<(Vec3, f32)> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let entity = self.entities.get(current)?;
            chain.push(entity);
            cursor = entity.parent;
        }
        let mut location = Vec3::ZERO;
        let mut heading = 0.0_f32;
        let mut scale = Vec3::ONE;
        for entity in chain.into_iter().rev() {
            let local = Vec3::new(
                (entity.transform.location.x + entity.delta.location.x) * scale.x,
                (entity.transform.location.y + entity.delta.location.y) * scale.y,
                (entity.transform.location.z + entity.delta.location.z) * scale.z,
            );
            let (sin_h, cos_h) = heading.sin_cos();
            location = Vec3::new(
                location.x + local.x * cos_h - local.y * sin_h,
                location.y + local.x * sin_h + local.y * cos_h,
                location.z + local.z,
            );
            heading += entity.transform.rotation.z + entity.delta.rotation.z;
            scale = Vec3::new(
                scale.x * entity.transform.scale.x,
                scale.y * entity.transform.scale.y,
                scale.z * entity.transform.scale.z,
            );
        }
        Some((location, heading))
    }

    #[must_use]
    pub fn world_location(&self, id: EntityId) -> Option<Vec3> {
        self.world_placement(id).map(|(location, _)| location)
    }

    /// World footprints of every tagged obstacle, in insertion order.
    #[must_use]
    pub fn obstacle_shapes(&self) -> Vec<ObstacleShape> {
        let mut shapes = Vec::new();
        for (id, entity) in self.iter().filter(|(_, e)| e.obstacle) {
            let (Some(footprint), Some((location, rotation))) =
                (entity.footprint, self.world_placement(id))
            else {
                debug!(entity = %entity.name, "obstacle without footprint ignored");
                continue;
            };
            let center = [location.x, location.y];
            let scale = entity.transform.scale;
            shapes.push(match footprint {
                Footprint::Circle { radius } => ObstacleShape::Circle {
                    center,
                    radius: radius * scale.x.abs().max(scale.y.abs()),
                },
                Footprint::Rect { half_extents } => ObstacleShape::Rect {
                    center,
                    half_extents: [half_extents[0] * scale.x.abs(), half_extents[1] * scale.y.abs()],
                    rotation,
                },
            });
        }
        shapes
    }

    /// Planar base position of `id` (its world location projected to the ground).
    #[must_use]
    pub fn ground_position(&self, id: EntityId) -> Option<Point2> {
        self.world_location(id).map(Vec3::xy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(name: &str) -> Entity {
        Entity::new(name, EntityKind::Empty)
    }

    #[test]
    fn split_ordinal_parses_numeric_suffixes() {
        assert_eq!(split_ordinal("IK_Target.003"), ("IK_Target", Some(3)));
        assert_eq!(split_ordinal("IK_Target"), ("IK_Target", None));
        assert_eq!(split_ordinal("v1.rig"), ("v1.rig", None));
        assert_eq!(split_ordinal(".001"), (".001", None));
    }

    #[test]
    fn insert_assigns_unique_names() {
        let mut scene = Scene::new();
        let a = scene.insert(empty("Leg"));
        let b = scene.insert(empty("Leg"));
        let c = scene.insert(empty("Leg.001"));
        assert_eq!(scene.name(a), "Leg");
        assert_eq!(scene.name(b), "Leg.001");
        assert_eq!(scene.name(c), "Leg.002");
        assert_eq!(scene.find("Leg.002"), Some(c));
    }

    #[test]
    fn parenting_tracks_children_and_rejects_cycles() {
        let mut scene = Scene::new();
        let root = scene.insert(empty("root"));
        let child = scene.insert(empty("child").with_parent(root));
        let grandchild = scene.insert(empty("grandchild").with_parent(child));
        assert_eq!(scene.children(root), &[child]);
        assert!(!scene.set_parent(root, Some(grandchild)));
        assert!(scene.set_parent(grandchild, Some(root)));
        assert_eq!(scene.children(root), &[child, grandchild]);
        assert!(scene.children(child).is_empty());
        assert_eq!(scene.roots(), vec![root]);
    }

    #[test]
    fn constraint_slots_include_rig_joints() {
        let mut scene = Scene::new();
        let target = scene.insert(empty("target"));
        let rig = Rig {
            joints: vec![
                Joint::new("hip", None),
                Joint::new("foot", Some(0)).with_constraint(Constraint::new(
                    "IK",
                    ConstraintKind::InverseKinematics { chain_count: 2 },
                    Some(target),
                )),
            ],
        };
        let owner = scene.insert(
            Entity::new("rig", EntityKind::Armature(rig)).with_constraint(Constraint::new(
                "Track",
                ConstraintKind::DampedTrack,
                None,
            )),
        );
        let slots = scene.constraint_slots(owner);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].joint, Some(1));
        assert_eq!(
            scene.constraint(slots[1]).and_then(|c| c.target),
            Some(target)
        );
        scene
            .constraint_mut(slots[1])
            .expect("joint constraint")
            .target = None;
        assert_eq!(scene.constraint(slots[1]).and_then(|c| c.target), None);
    }

    #[test]
    fn duplicate_remaps_internal_parents_and_keeps_targets() {
        let mut scene = Scene::new();
        let world = scene.insert(empty("world"));
        let root = scene.insert(empty("root").with_parent(world));
        let path = scene.insert(Entity::new("path", EntityKind::Curve).with_parent(root));
        let foot = scene.insert(
            empty("foot")
                .with_parent(root)
                .with_constraint(Constraint::new(
                    "Follow",
                    ConstraintKind::FollowPath { offset: 0.0 },
                    Some(path),
                )),
        );

        let map = scene.duplicate(&[root, path, foot]);
        assert_eq!(map.len(), 3);
        let root_copy = map[root];
        let foot_copy = map[foot];
        assert_eq!(scene.name(root_copy), "root.001");
        assert_eq!(scene.get(foot_copy).and_then(|e| e.parent), Some(root_copy));
        assert_eq!(scene.get(root_copy).and_then(|e| e.parent), Some(world));
        assert_eq!(scene.children(world), &[root, root_copy]);
        assert_eq!(scene.children(root_copy), &[map[path], foot_copy]);
        let target = scene.get(foot_copy).expect("copy").constraints[0].target;
        assert_eq!(target, Some(path));
    }

    #[test]
    fn world_placement_composes_parent_chain() {
        let mut scene = Scene::new();
        let root = scene.insert(
            empty("root")
                .with_location(Vec3::new(10.0, 0.0, 0.0))
                .with_rotation(Vec3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2)),
        );
        let child = scene.insert(
            empty("child")
                .with_parent(root)
                .with_location(Vec3::new(2.0, 0.0, 1.0)),
        );
        let (location, heading) = scene.world_placement(child).expect("placement");
        assert!((location.x - 10.0).abs() < 1e-5);
        assert!((location.y - 2.0).abs() < 1e-5);
        assert!((location.z - 1.0).abs() < 1e-5);
        assert!((heading - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn obstacle_shapes_only_cover_tagged_entities() {
        let mut scene = Scene::new();
        scene.insert(
            Entity::new("house", EntityKind::Mesh)
                .with_location(Vec3::new(5.0, 1.0, 0.0))
                .as_obstacle(Footprint::Rect {
                    half_extents: [1.0, 3.0],
                }),
        );
        scene.insert(Entity::new("tree", EntityKind::Mesh).with_location(Vec3::new(3.0, 0.0, 0.0)));
        let mut untagged = Entity::new("rock", EntityKind::Mesh);
        untagged.obstacle = true;
        scene.insert(untagged);

        let shapes = scene.obstacle_shapes();
        assert_eq!(
            shapes,
            vec![ObstacleShape::Rect {
                center: [5.0, 1.0],
                half_extents: [1.0, 3.0],
                rotation: 0.0,
            }]
        );
    }
}

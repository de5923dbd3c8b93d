//! Swarm orchestration: clone the template closure, place, rebind, and animate.
//!
//! Everything that mutates the scene (duplication, placement, rebinding, gait, body noise)
//! runs serially so each clone observes a fully built predecessor. Walk generation only
//! reads the obstacle field, so it runs across agents in parallel and the tracks are written
//! back afterwards in agent order.

use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::animation::{AnimationTrack, Axis, ChannelModifier, ChannelPath, TrackWriter};
use crate::closure::{Closure, collect_closure};
use crate::gait::apply_gait;
use crate::locomotion::{FIRST_FRAME, WalkRequest, generate_walk};
use crate::placement::{Placement, PlacementAccumulator};
use crate::rebind::{ClonedClosure, RebindReport, Rebinder};
use crate::scene::{ConstraintKind, EntityId, EntityKind, Scene};
use crate::{FULL_TURN, NoiseConfig, Point2, SwarmConfig, SwarmError, Vec3};
use swarmwalk_probe::ObstacleField;

/// Channel group receiving body wobble keys.
const NOISE_GROUP: &str = "Body Noise";

/// One placed and animated agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub root: EntityId,
    pub name: String,
    /// True for the template itself.
    pub template: bool,
    pub placement: Placement,
    /// World heading the walk starts from (radians).
    pub facing: f32,
    /// Seed of the agent's walk.
    pub seed: u64,
    /// Stepping-track owners in limb order.
    pub limbs: Vec<EntityId>,
    /// Rebinding tally; `None` for the template.
    pub rebind: Option<RebindReport>,
    /// Moved away from the origin after the batch.
    pub relocated: bool,
    /// Keys written into the walk track.
    pub keys: usize,
}

/// Result of [`spawn_swarm`].
#[derive(Debug, Clone)]
pub struct SwarmReport {
    pub template: EntityId,
    /// Template closure size after dropping shared scenery.
    pub closure_len: usize,
    /// Constraint targets the closure pulled in beyond the template hierarchy.
    pub recovered: usize,
    pub obstacles: usize,
    pub agents: Vec<AgentRecord>,
}

impl SwarmReport {
    /// Agents whose placement ignored the separation distance.
    #[must_use]
    pub fn forced_placements(&self) -> usize {
        self.agents.iter().filter(|a| !a.placement.satisfied).count()
    }

    /// Constraint edges left on their original targets.
    #[must_use]
    pub fn unresolved_edges(&self) -> usize {
        self.agents
            .iter()
            .filter_map(|a| a.rebind.as_ref())
            .map(|r| r.unresolved.len())
            .sum()
    }

    #[must_use]
    pub fn relocated(&self) -> usize {
        self.agents.iter().filter(|a| a.relocated).count()
    }

    /// Clone roots, excluding the template.
    pub fn clones(&self) -> impl Iterator<Item = &AgentRecord> + '_ {
        self.agents.iter().filter(|a| !a.template)
    }
}

/// Entities in the closure owning a stepping track, ordered by name.
fn stepping_limbs(scene: &Scene, closure: &Closure) -> Vec<EntityId> {
    let mut limbs: Vec<EntityId> = closure
        .members()
        .iter()
        .copied()
        .filter(|id| {
            scene
                .get(*id)
                .and_then(|e| e.track.as_ref())
                .is_some_and(AnimationTrack::is_stepping_track)
        })
        .collect();
    limbs.sort_by(|a, b| scene.name(*a).cmp(scene.name(*b)));
    limbs
}

/// Closure members targeted by an IK constraint on a rig joint.
fn end_effectors(scene: &Scene, closure: &Closure) -> Vec<EntityId> {
    let mut targets = Vec::new();
    for id in closure.members() {
        for slot in scene.constraint_slots(*id) {
            if slot.joint.is_none() {
                continue;
            }
            let Some(constraint) = scene.constraint(slot) else {
                continue;
            };
            if let (ConstraintKind::InverseKinematics { .. }, Some(target)) =
                (constraint.kind, constraint.target)
            {
                if closure.contains(target) && !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
    }
    targets
}

fn facing_for<R: Rng + ?Sized>(index: usize, config: &SwarmConfig, rng: &mut R) -> f32 {
    let groups = config.facing_groups.max(1) as usize;
    let base = FULL_TURN * (index % groups) as f32 / groups as f32;
    base + rng.random_range(-config.facing_jitter..=config.facing_jitter)
}

/// Move the agent root onto `point`, face it, and drop any earlier animation.
fn pose_agent(scene: &mut Scene, root: EntityId, point: Point2, facing: f32) {
    if let Some(entity) = scene.get_mut(root) {
        entity.transform.location.x = point.x;
        entity.transform.location.y = point.y;
        entity.transform.rotation.z = facing;
        entity.track = None;
    }
}

fn reset_end_effectors(scene: &mut Scene, targets: &[EntityId]) {
    for target in targets {
        if let Some(entity) = scene.get_mut(*target) {
            entity.transform.location = Vec3::ZERO;
        }
    }
}

/// Key each mesh child's rotation and layer a noise modifier over it.
fn add_body_noise<R: Rng + ?Sized>(
    scene: &mut Scene,
    root: EntityId,
    noise: &NoiseConfig,
    rng: &mut R,
) -> usize {
    let bodies: Vec<EntityId> = scene
        .children(root)
        .iter()
        .copied()
        .filter(|id| scene.get(*id).is_some_and(|e| e.kind == EntityKind::Mesh))
        .collect();
    for body in &bodies {
        let Some(entity) = scene.get_mut(*body) else {
            continue;
        };
        let rotation = entity.transform.rotation;
        let name = format!("{}Action", entity.name);
        let track = entity.track.get_or_insert_with(|| AnimationTrack::new(name));
        let mut writer = TrackWriter::new(track, NOISE_GROUP);
        for axis in Axis::ALL {
            let phase = if noise.phase_range > 0.0 {
                rng.random_range(0.0..noise.phase_range)
            } else {
                0.0
            };
            let channel = writer.channel_mut(ChannelPath::Rotation(axis));
            channel.insert(FIRST_FRAME as f32, rotation.component(axis));
            // Copied tracks carry the template's noise; roll a fresh phase.
            channel
                .modifiers
                .retain(|m| !matches!(m, ChannelModifier::Noise { .. }));
            channel.modifiers.push(ChannelModifier::Noise {
                scale: noise.scale,
                strength: noise.strength,
                phase,
            });
        }
    }
    bodies.len()
}

struct AgentSetup<'a> {
    index: usize,
    root: EntityId,
    placement: Placement,
    limbs: Vec<EntityId>,
    end_effectors: Vec<EntityId>,
    rebind: Option<(&'a Rebinder<'a>, &'a ClonedClosure)>,
}

fn prepare_agent<R: Rng + ?Sized>(
    scene: &mut Scene,
    config: &SwarmConfig,
    rng: &mut R,
    setup: AgentSetup<'_>,
) -> (AgentRecord, WalkRequest) {
    let AgentSetup {
        index,
        root,
        placement,
        limbs,
        end_effectors,
        rebind,
    } = setup;

    let facing = facing_for(index, config, rng);
    pose_agent(scene, root, placement.point, facing);
    reset_end_effectors(scene, &end_effectors);
    let rebind = rebind.map(|(rebinder, clone)| rebinder.rebind(scene, clone));
    let shifted = apply_gait(scene, &limbs, &config.gait);
    let bodies = match &config.body_noise {
        Some(noise) => add_body_noise(scene, root, noise, rng),
        None => 0,
    };
    let seed: u64 = rng.random();

    let name = scene.name(root).to_owned();
    debug!(
        agent = %name,
        x = placement.point.x,
        y = placement.point.y,
        facing,
        shifted,
        bodies,
        "prepared agent"
    );
    let request = WalkRequest {
        agent: name.clone(),
        base_location: scene.world_location(root).unwrap_or_default(),
        base_heading: facing,
        seed,
    };
    let record = AgentRecord {
        root,
        name,
        template: index == 0,
        placement,
        facing,
        seed,
        limbs,
        rebind,
        relocated: false,
        keys: 0,
    };
    (record, request)
}

/// Clone `template_root` `config.count` times, scatter the clones, repair their constraint
/// targets, and bake a walk onto every agent root.
///
/// Precondition failures (invalid configuration, missing template, unusable obstacle
/// footprints) return an error before the scene is touched. Per-agent problems such as
/// forced placements or unmatched constraints are logged and reported instead.
pub fn spawn_swarm(
    scene: &mut Scene,
    template_root: EntityId,
    config: &SwarmConfig,
) -> Result<SwarmReport, SwarmError> {
    config.validate()?;
    let mut closure = collect_closure(scene, template_root);
    if closure.is_empty() {
        return Err(SwarmError::TemplateMissing(format!("{template_root:?}")));
    }
    let field = ObstacleField::from_shapes(&scene.obstacle_shapes())?;
    let recovered = closure.recovered().len();
    // Obstacles are shared scenery, never part of an agent.
    closure.retain(|id| !scene.get(id).is_some_and(|e| e.obstacle));
    let limbs = stepping_limbs(scene, &closure);
    let effectors = end_effectors(scene, &closure);
    info!(
        template = scene.name(template_root),
        members = closure.len(),
        recovered,
        limbs = limbs.len(),
        obstacles = field.len(),
        "collected template closure"
    );

    let mut rng = config.seeded_rng();
    let mut accumulator =
        PlacementAccumulator::new(config.bounds, config.min_separation, config.retry_budget);
    let mut agents = Vec::with_capacity(config.count + 1);
    let mut requests = Vec::with_capacity(config.count + 1);

    if config.animate_template {
        let placement = accumulator.place(&mut rng);
        let (record, request) = prepare_agent(
            scene,
            config,
            &mut rng,
            AgentSetup {
                index: 0,
                root: template_root,
                placement,
                limbs: limbs.clone(),
                end_effectors: effectors.clone(),
                rebind: None,
            },
        );
        agents.push(record);
        requests.push(request);
    } else if let Some(point) = scene.ground_position(template_root) {
        accumulator.seed(point);
    }

    let rebinder = Rebinder::new(&config.rebind, &closure);
    for index in 1..=config.count {
        let map = scene.duplicate(closure.members());
        let clone = ClonedClosure::new(&closure, map);
        let Some(root) = clone.root() else {
            continue;
        };
        let placement = accumulator.place(&mut rng);
        let copy = |ids: &[EntityId]| -> Vec<EntityId> {
            ids.iter().filter_map(|id| clone.copy_of(*id)).collect()
        };
        let setup = AgentSetup {
            index,
            root,
            placement,
            limbs: copy(&limbs),
            end_effectors: copy(&effectors),
            rebind: Some((&rebinder, &clone)),
        };
        let (record, request) = prepare_agent(scene, config, &mut rng, setup);
        agents.push(record);
        requests.push(request);
    }

    // Strays move before their walks are baked so probes start from the final position.
    let roots: Vec<EntityId> = agents.iter().map(|a| a.root).collect();
    let moved = relocate_strays(scene, &roots, config, &mut accumulator, &mut rng);
    for (record, request) in agents.iter_mut().zip(&mut requests) {
        if let Some((_, point)) = moved.iter().find(|(id, _)| *id == record.root) {
            record.placement.point = *point;
            record.relocated = true;
            request.base_location = scene.world_location(record.root).unwrap_or_default();
        }
    }

    let tracks: Vec<AnimationTrack> = requests
        .par_iter()
        .map(|request| generate_walk(request, &config.walk, &field))
        .collect();
    for (record, track) in agents.iter_mut().zip(tracks) {
        record.keys = track.key_count();
        if let Some(entity) = scene.get_mut(record.root) {
            entity.track = Some(track);
        }
    }

    let report = SwarmReport {
        template: template_root,
        closure_len: closure.len(),
        recovered,
        obstacles: field.len(),
        agents,
    };
    info!(
        agents = report.agents.len(),
        forced = report.forced_placements(),
        unresolved = report.unresolved_edges(),
        relocated = report.relocated(),
        "swarm spawned"
    );
    Ok(report)
}

/// Move top-level agents sitting on the origin to a fresh point inside the bounds.
///
/// An agent at the origin means an earlier step never applied its placement. Returns the
/// relocated roots with their new positions.
pub fn relocate_strays<R: Rng + ?Sized>(
    scene: &mut Scene,
    roots: &[EntityId],
    config: &SwarmConfig,
    accumulator: &mut PlacementAccumulator,
    rng: &mut R,
) -> Vec<(EntityId, Point2)> {
    let radius = config.origin_sentinel_radius;
    let bounds = config.bounds;
    let mut moved = Vec::new();
    for &root in roots {
        let top_level = scene.get(root).is_some_and(|e| e.parent.is_none());
        let Some(position) = scene.ground_position(root) else {
            continue;
        };
        if !top_level || position.length() >= radius {
            continue;
        }
        let mut point = position;
        for _ in 0..config.retry_budget.max(1) {
            point = Point2::new(
                rng.random_range(bounds.min.x..=bounds.max.x),
                rng.random_range(bounds.min.y..=bounds.max.y),
            );
            if point.length() >= radius {
                break;
            }
        }
        warn!(
            agent = scene.name(root),
            x = point.x,
            y = point.y,
            "agent left at origin; relocating"
        );
        if let Some(entity) = scene.get_mut(root) {
            entity.transform.location.x = point.x;
            entity.transform.location.y = point.y;
        }
        accumulator.seed(point);
        moved.push((root, point));
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::Extrapolation;
    use crate::scene::{Constraint, Entity, Footprint, Joint, Rig};
    use crate::Rect;

    /// Root with a body mesh, one rig whose foot reaches an IK target following a path.
    fn template(scene: &mut Scene) -> EntityId {
        let root = scene.insert(Entity::new("walker", EntityKind::Empty));
        scene.insert(Entity::new("Body", EntityKind::Mesh).with_parent(root));
        let path = scene.insert(Entity::new("Path", EntityKind::Curve).with_parent(root));
        let mut step = AnimationTrack::new("step");
        TrackWriter::new(&mut step, "Walk").key(
            ChannelPath::ConstraintOffset("Follow".into()),
            10.0,
            0.0,
        );
        let target = scene.insert(
            Entity::new("Target", EntityKind::Empty)
                .with_location(Vec3::new(0.5, 0.5, 0.0))
                .with_constraint(Constraint::new(
                    "Follow",
                    ConstraintKind::FollowPath { offset: 0.0 },
                    Some(path),
                ))
                .with_track(step),
        );
        let rig = Rig {
            joints: vec![Joint::new("foot", None).with_constraint(Constraint::new(
                "IK",
                ConstraintKind::InverseKinematics { chain_count: 2 },
                Some(target),
            ))],
        };
        scene.insert(Entity::new("Rig", EntityKind::Armature(rig)).with_parent(root));
        root
    }

    fn config(count: usize) -> SwarmConfig {
        let mut config = SwarmConfig {
            count,
            rng_seed: Some(17),
            ..SwarmConfig::default()
        };
        config.walk.total_frames = 200;
        config
    }

    #[test]
    fn spawns_template_and_clones_with_walks() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        let report = spawn_swarm(&mut scene, root, &config(3)).expect("swarm");
        assert_eq!(report.agents.len(), 4);
        assert_eq!(report.closure_len, 5);
        assert_eq!(report.recovered, 1);
        assert!(report.agents[0].template);
        assert_eq!(report.clones().count(), 3);
        for agent in &report.agents {
            let entity = scene.get(agent.root).expect("agent root");
            let track = entity.track.as_ref().expect("walk track");
            assert_eq!(track.channel_count(), 6);
            assert!(track.channels().iter().all(|c| c.extrapolation == Extrapolation::Linear));
            assert_eq!(agent.keys, 60);
            assert_eq!(agent.limbs.len(), 1);
            let limb = scene.get(agent.limbs[0]).expect("limb");
            assert_eq!(limb.transform.location, Vec3::ZERO);
        }
        for clone in report.clones() {
            let rebind = clone.rebind.as_ref().expect("clone rebind");
            assert_eq!(rebind.rebound(), 2);
            assert!(rebind.unresolved.is_empty());
        }
        assert_eq!(report.unresolved_edges(), 0);
    }

    #[test]
    fn missing_template_leaves_scene_untouched() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        let mut other = Scene::new();
        template(&mut other);
        let before = other.len();
        let stale = scene.insert(Entity::new("stale", EntityKind::Empty));
        let err = spawn_swarm(&mut other, stale, &config(2)).expect_err("missing template");
        assert!(matches!(err, SwarmError::TemplateMissing(_)));
        assert_eq!(other.len(), before);
        assert!(scene.contains(root));
    }

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        let before = scene.len();
        let mut config = config(2);
        config.facing_groups = 0;
        let err = spawn_swarm(&mut scene, root, &config).expect_err("invalid config");
        assert!(matches!(err, SwarmError::InvalidConfig(_)));
        assert_eq!(scene.len(), before);
    }

    #[test]
    fn obstacles_are_probed_but_never_duplicated() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        let rock = scene.insert(
            Entity::new("Rock", EntityKind::Mesh)
                .with_parent(root)
                .with_location(Vec3::new(3.0, 0.0, 0.0))
                .as_obstacle(Footprint::Circle { radius: 1.0 }),
        );
        let report = spawn_swarm(&mut scene, root, &config(2)).expect("swarm");
        assert_eq!(report.obstacles, 1);
        assert!(scene.find("Rock.001").is_none());
        assert!(scene.contains(rock));
    }

    #[test]
    fn still_template_seeds_the_accumulator() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        scene.get_mut(root).expect("root").transform.location = Vec3::new(4.0, -2.0, 0.0);
        let mut config = config(2);
        config.animate_template = false;
        config.body_noise = None;
        let report = spawn_swarm(&mut scene, root, &config).expect("swarm");
        assert_eq!(report.agents.len(), 2);
        assert!(scene.get(root).expect("root").track.is_none());
        for clone in report.clones() {
            assert!(clone.placement.point.distance(Point2::new(4.0, -2.0)) >= 15.0);
        }
    }

    #[test]
    fn body_noise_keys_mesh_children() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        spawn_swarm(&mut scene, root, &config(1)).expect("swarm");
        let body = scene.find("Body.001").expect("cloned body");
        let track = scene.get(body).and_then(|e| e.track.as_ref()).expect("noise track");
        assert_eq!(track.channel_count(), 3);
        for channel in track.channels() {
            assert_eq!(channel.modifiers.len(), 1);
            assert!(channel.evaluate(50.0).abs() <= 0.05 + 1e-6);
        }
    }

    #[test]
    fn relocated_agents_walk_from_their_new_position() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        scene.insert(
            Entity::new("Wall", EntityKind::Mesh)
                .with_location(Vec3::new(3.0, 0.0, 0.0))
                .as_obstacle(Footprint::Rect {
                    half_extents: [0.5, 6.0],
                }),
        );
        // Every sample lands inside the sentinel radius.
        let config = SwarmConfig {
            bounds: Rect::centered(0.05, 0.05),
            body_noise: None,
            ..config(0)
        };
        let report = spawn_swarm(&mut scene, root, &config).expect("swarm");
        let agent = &report.agents[0];
        assert!(agent.relocated);

        let location = scene.world_location(root).expect("location");
        assert_eq!(agent.placement.point, location.xy());
        let field = ObstacleField::from_shapes(&scene.obstacle_shapes()).expect("field");
        let expected = generate_walk(
            &WalkRequest {
                agent: agent.name.clone(),
                base_location: location,
                base_heading: agent.facing,
                seed: agent.seed,
            },
            &config.walk,
            &field,
        );
        assert_eq!(scene.get(root).and_then(|e| e.track.as_ref()), Some(&expected));
    }

    #[test]
    fn strays_at_origin_are_relocated() {
        let mut scene = Scene::new();
        let root = template(&mut scene);
        let config = SwarmConfig {
            bounds: Rect::centered(50.0, 50.0),
            ..config(0)
        };
        let mut accumulator = PlacementAccumulator::new(config.bounds, 15.0, 100);
        let mut rng = config.seeded_rng();
        let moved = relocate_strays(&mut scene, &[root], &config, &mut accumulator, &mut rng);
        assert_eq!(moved.len(), 1);
        let position = scene.ground_position(root).expect("position");
        assert!(position.length() >= config.origin_sentinel_radius);
        assert_eq!(accumulator.len(), 1);

        let again = relocate_strays(&mut scene, &[root], &config, &mut accumulator, &mut rng);
        assert!(again.is_empty());
    }
}

//! Core types for cloning, placing, and animating swarms of walking agents.
//!
//! A template agent is an entity plus everything it structurally owns or references
//! through constraints. The [`swarm`] module clones that closure `count` times, scatters
//! the clones without overlap, repairs the cloned constraint targets, and bakes a
//! wander/homing/avoidance walk into each clone's delta-transform channels.

pub mod animation;
pub mod closure;
pub mod gait;
pub mod locomotion;
pub mod placement;
pub mod rebind;
pub mod scene;
pub mod swarm;

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use swarmwalk_probe::ProbeError;
use thiserror::Error;

pub use animation::{
    AnimationTrack, Axis, Channel, ChannelGroup, ChannelModifier, ChannelPath, Extrapolation,
    Interpolation, Keyframe, TrackNode, TrackWriter,
};
pub use closure::{Closure, RecoveredDependency, collect_closure};
pub use gait::{align_phase, shift_phase};
pub use locomotion::{LocomotionGenerator, StepOutcome, WalkRequest, WalkState, generate_walk};
pub use placement::{Placement, PlacementAccumulator};
pub use rebind::{ClonedClosure, RebindReport, RebindTier, Rebinder, UnresolvedEdge};
pub use scene::{
    Constraint, ConstraintKind, ConstraintSlot, DuplicateMap, Entity, EntityId, EntityKind,
    Footprint, Joint, Rig, Scene, Transform,
};
pub use swarm::{AgentRecord, SwarmReport, spawn_swarm};
pub use swarmwalk_probe::{ObstacleField, ObstacleProbe, ObstacleShape, OpenField, RayHit};

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

/// Wrap an angle into `(-π, π]`.
pub(crate) fn wrap_signed_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// Point on the ground plane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Distance from the origin.
    #[must_use]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }
}

/// Three-component vector used for locations, Euler rotations, and scales.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Projection onto the ground plane.
    #[must_use]
    pub const fn xy(self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    #[must_use]
    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    #[must_use]
    pub fn component(self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

/// Axis-aligned rectangle on the ground plane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rect {
    pub min: Point2,
    pub max: Point2,
}

impl Rect {
    #[must_use]
    pub const fn new(min: Point2, max: Point2) -> Self {
        Self { min, max }
    }

    /// Rectangle spanning `[-half_width, half_width] x [-half_height, half_height]`.
    #[must_use]
    pub const fn centered(half_width: f32, half_height: f32) -> Self {
        Self {
            min: Point2::new(-half_width, -half_height),
            max: Point2::new(half_width, half_height),
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    #[must_use]
    pub fn contains(&self, point: Point2) -> bool {
        (self.min.x..=self.max.x).contains(&point.x) && (self.min.y..=self.max.y).contains(&point.y)
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::centered(100.0, 100.0)
    }
}

/// Errors that abort a swarm run before the scene is mutated.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// The template root handle does not resolve to a live entity.
    #[error("template root {0} not found in scene")]
    TemplateMissing(String),
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A tagged obstacle produced a footprint the probe cannot use.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Obstacle avoidance tuning for the locomotion generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AvoidanceConfig {
    /// Disables all probing when false.
    pub enabled: bool,
    /// Forward probe range in world units.
    pub look_ahead: f32,
    /// Angle between the forward probe and each side probe (radians).
    pub side_angle: f32,
    /// Side probe range as a fraction of `look_ahead`.
    pub side_probe_scale: f32,
    /// Turn applied when the forward probe is blocked (radians).
    pub avoid_turn: f32,
    /// Smallest fraction of the step length kept when braking right at an obstacle.
    pub brake_floor: f32,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            look_ahead: 10.0,
            side_angle: 35.0_f32.to_radians(),
            side_probe_scale: 0.8,
            avoid_turn: 35.0_f32.to_radians(),
            brake_floor: 0.55,
        }
    }
}

/// Baked walk parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WalkConfig {
    /// Length of the baked horizon in frames.
    pub total_frames: u32,
    /// Frames between consecutive keys.
    pub key_interval: u32,
    /// Distance covered per frame on an unobstructed step.
    pub speed_per_frame: f32,
    /// Initial value of the heading delta; also the heading homing returns to.
    pub orientation_offset: f32,
    /// Half-width of the uniform wander turn per key (radians).
    pub wander_turn: f32,
    /// Period of the homing cycle in frames.
    pub cycle_period: u32,
    /// Frames at the start of every cycle during which the agent homes.
    pub homing_duration: u32,
    /// Homing is suppressed until the frame exceeds this guard.
    pub startup_guard: u32,
    /// Largest homing turn per key (radians).
    pub max_homing_turn: f32,
    pub avoidance: AvoidanceConfig,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            total_frames: 3_000,
            key_interval: 20,
            speed_per_frame: 0.2,
            orientation_offset: std::f32::consts::PI,
            wander_turn: 10.0_f32.to_radians(),
            cycle_period: 600,
            homing_duration: 120,
            startup_guard: 100,
            max_homing_turn: 20.0_f32.to_radians(),
            avoidance: AvoidanceConfig::default(),
        }
    }
}

/// Finite and `>= 0`. Rejects NaN and infinities, which `random_range` cannot sample.
fn non_negative(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

impl WalkConfig {
    /// Length of one unobstructed step.
    #[must_use]
    pub fn step_length(&self) -> f32 {
        self.speed_per_frame * self.key_interval as f32
    }

    fn validate(&self) -> Result<(), SwarmError> {
        if self.total_frames == 0 || self.key_interval == 0 {
            return Err(SwarmError::InvalidConfig(
                "total_frames and key_interval must be non-zero",
            ));
        }
        if self.cycle_period == 0 {
            return Err(SwarmError::InvalidConfig("cycle_period must be non-zero"));
        }
        if !non_negative(self.speed_per_frame)
            || !non_negative(self.wander_turn)
            || !self.orientation_offset.is_finite()
        {
            return Err(SwarmError::InvalidConfig(
                "speed_per_frame and wander_turn must be finite and non-negative, orientation_offset finite",
            ));
        }
        if !positive(self.max_homing_turn) {
            return Err(SwarmError::InvalidConfig(
                "max_homing_turn must be finite and positive",
            ));
        }
        let avoidance = &self.avoidance;
        if !positive(avoidance.look_ahead) || !positive(avoidance.side_probe_scale) {
            return Err(SwarmError::InvalidConfig(
                "look_ahead and side_probe_scale must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&avoidance.brake_floor) {
            return Err(SwarmError::InvalidConfig("brake_floor must be within [0, 1]"));
        }
        if !avoidance.side_angle.is_finite() || !avoidance.avoid_turn.is_finite() {
            return Err(SwarmError::InvalidConfig(
                "side_angle and avoid_turn must be finite",
            ));
        }
        Ok(())
    }
}

/// Matching policy for constraint rebinding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RebindConfig {
    /// Trust the original-to-copy map returned by duplication before name heuristics.
    pub use_identity_map: bool,
    /// Largest vertical-axis rotation difference accepted by the geometric fallback.
    pub geometric_tolerance: f32,
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            use_identity_map: true,
            geometric_tolerance: 0.2,
        }
    }
}

/// Limbs (by stepping-track order within an agent) sharing one phase offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimbGroup {
    /// Zero-based limb indices.
    pub limbs: Vec<usize>,
    /// Signed time offset applied to the group's stepping tracks.
    pub offset_frames: f32,
}

/// Gait desynchronisation applied to every agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GaitConfig {
    pub groups: Vec<LimbGroup>,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            // Second and fourth limbs trail the first and third by a quarter step cycle.
            groups: vec![LimbGroup {
                limbs: vec![1, 3],
                offset_frames: -10.0,
            }],
        }
    }
}

/// Procedural wobble layered on agent bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoiseConfig {
    /// Frames per noise lattice cell.
    pub scale: f32,
    /// Peak amplitude added to the channel value.
    pub strength: f32,
    /// Phases are drawn uniformly from `[0, phase_range)`.
    pub phase_range: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            scale: 20.0,
            strength: 0.05,
            phase_range: 100.0,
        }
    }
}

/// Static configuration for a swarm run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwarmConfig {
    /// Number of clones produced from the template.
    pub count: usize,
    /// Region clone positions are sampled from.
    pub bounds: Rect,
    /// Minimum planar distance between agent positions.
    pub min_separation: f32,
    /// Samples drawn per placement before accepting an overlapping position.
    pub retry_budget: u32,
    /// Optional RNG seed for reproducible swarms.
    pub rng_seed: Option<u64>,
    /// Number of evenly spaced facing directions clones cycle through.
    pub facing_groups: u32,
    /// Uniform jitter added to each facing direction (radians).
    pub facing_jitter: f32,
    /// Whether the template itself is placed and walked as an agent.
    pub animate_template: bool,
    /// Agents whose base location ends up this close to the origin are relocated.
    pub origin_sentinel_radius: f32,
    pub walk: WalkConfig,
    pub rebind: RebindConfig,
    pub gait: GaitConfig,
    /// Body wobble; `None` disables it.
    pub body_noise: Option<NoiseConfig>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            count: 49,
            bounds: Rect::default(),
            min_separation: 15.0,
            retry_budget: 100,
            rng_seed: None,
            facing_groups: 4,
            facing_jitter: 0.2,
            animate_template: true,
            origin_sentinel_radius: 0.1,
            walk: WalkConfig::default(),
            rebind: RebindConfig::default(),
            gait: GaitConfig::default(),
            body_noise: Some(NoiseConfig::default()),
        }
    }
}

impl SwarmConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SwarmError> {
        let bounds = &self.bounds;
        if !(bounds.width() > 0.0) || !(bounds.height() > 0.0) {
            return Err(SwarmError::InvalidConfig(
                "bounds must have positive width and height",
            ));
        }
        if !bounds.width().is_finite() || !bounds.height().is_finite() {
            return Err(SwarmError::InvalidConfig("bounds must be finite"));
        }
        if !(self.min_separation >= 0.0) || !self.min_separation.is_finite() {
            return Err(SwarmError::InvalidConfig(
                "min_separation must be finite and non-negative",
            ));
        }
        if self.facing_groups == 0 {
            return Err(SwarmError::InvalidConfig("facing_groups must be non-zero"));
        }
        if !non_negative(self.facing_jitter) || !non_negative(self.origin_sentinel_radius) {
            return Err(SwarmError::InvalidConfig(
                "facing_jitter and origin_sentinel_radius must be finite and non-negative",
            ));
        }
        if !non_negative(self.rebind.geometric_tolerance) {
            return Err(SwarmError::InvalidConfig(
                "geometric_tolerance must be non-negative",
            ));
        }
        if let Some(noise) = &self.body_noise {
            if !positive(noise.scale)
                || !non_negative(noise.phase_range)
                || !noise.strength.is_finite()
            {
                return Err(SwarmError::InvalidConfig(
                    "noise scale must be positive and phase_range finite and non-negative",
                ));
            }
        }
        self.walk.validate()
    }

    /// Returns the configured RNG, seeding from entropy if no seed is set.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

//! Baked wander/homing/avoidance walk for one agent.
//!
//! Steering runs once per key: a periodic homing window pulls the heading back to its
//! starting value, wander adds a small random turn outside it, and a forward probe that
//! finds an obstacle overrides both with a fixed turn toward the clear side while braking
//! the step. Only the key frames are simulated; the track interpolates linearly between
//! them.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use swarmwalk_probe::ObstacleProbe;

use crate::animation::{AnimationTrack, Axis, ChannelPath, TrackWriter};
use crate::{FULL_TURN, Point2, Vec3, WalkConfig, wrap_signed_angle};

/// Channel group holding the generated delta keys.
pub const WALK_GROUP: &str = "Object Transforms";
/// Frame of the first key.
pub const FIRST_FRAME: u32 = 1;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Per-agent inputs to [`generate_walk`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalkRequest {
    /// Agent name; breaks avoidance ties reproducibly.
    pub agent: String,
    /// World position the delta offsets are applied to.
    pub base_location: Vec3,
    /// World heading (radians) the heading delta is added to.
    pub base_heading: f32,
    pub seed: u64,
}

/// State carried from key to key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WalkState {
    pub frame: u32,
    /// Accumulated steering, starting at the orientation offset. Never wrapped so rotation
    /// keys stay continuous.
    pub heading_delta: f32,
    pub position_delta: Point2,
}

/// What one steering step decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub frame: u32,
    /// Heading change applied this step.
    pub turn: f32,
    /// True when the homing window steered this step.
    pub homing: bool,
    /// Forward probe hit distance, when the probe found an obstacle.
    pub forward_hit: Option<f32>,
    /// Fraction of the unobstructed step length actually walked.
    pub brake: f32,
    /// Planar distance covered.
    pub distance: f32,
}

/// Stepwise walk simulator. [`generate_walk`] drives it over a whole horizon.
pub struct LocomotionGenerator<'a> {
    config: &'a WalkConfig,
    probe: &'a dyn ObstacleProbe,
    base_location: Point2,
    base_heading: f32,
    tie_break: f32,
    rng: SmallRng,
    state: WalkState,
}

impl<'a> LocomotionGenerator<'a> {
    pub fn new(config: &'a WalkConfig, probe: &'a dyn ObstacleProbe, request: &WalkRequest) -> Self {
        let tie_break = if fnv1a(request.agent.as_bytes()) % 2 == 0 {
            1.0
        } else {
            -1.0
        };
        Self {
            config,
            probe,
            base_location: request.base_location.xy(),
            base_heading: request.base_heading,
            tie_break,
            rng: SmallRng::seed_from_u64(request.seed),
            state: WalkState {
                frame: FIRST_FRAME,
                heading_delta: config.orientation_offset,
                position_delta: Point2::default(),
            },
        }
    }

    /// Replace the carried state, e.g. to resume from a known heading.
    #[must_use]
    pub fn with_state(mut self, state: WalkState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn state(&self) -> &WalkState {
        &self.state
    }

    /// Sign of the avoidance turn used when both or neither side probe is blocked.
    #[must_use]
    pub fn tie_break(&self) -> f32 {
        self.tie_break
    }

    fn in_homing_window(&self, frame: u32) -> bool {
        frame > self.config.startup_guard
            && frame % self.config.cycle_period < self.config.homing_duration
    }

    fn probe_at(&self, origin: Point2, heading: f32, range: f32) -> Option<f32> {
        let (sin_h, cos_h) = heading.sin_cos();
        self.probe
            .cast([origin.x, origin.y], [cos_h, sin_h], range)
            .map(|hit| hit.distance)
    }

    /// Advance one key to `frame`.
    pub fn step(&mut self, frame: u32) -> StepOutcome {
        let config = self.config;
        let start = self.state.heading_delta;
        let homing = self.in_homing_window(frame);

        // Homing target reached within one step: land on it exactly.
        let mut snap_to = None;
        let mut turn = if homing {
            let diff = wrap_signed_angle(config.orientation_offset - start);
            if diff.abs() <= config.max_homing_turn {
                let turns = ((start + diff - config.orientation_offset) / FULL_TURN).round();
                snap_to = Some(config.orientation_offset + turns * FULL_TURN);
                diff
            } else {
                diff.signum() * config.max_homing_turn
            }
        } else if config.wander_turn > 0.0 {
            self.rng
                .random_range(-config.wander_turn..=config.wander_turn)
        } else {
            0.0
        };

        let mut brake = 1.0;
        let mut forward_hit = None;
        let avoidance = &config.avoidance;
        if avoidance.enabled {
            let origin = Point2::new(
                self.base_location.x + self.state.position_delta.x,
                self.base_location.y + self.state.position_delta.y,
            );
            let heading = self.base_heading + start;
            forward_hit = self.probe_at(origin, heading, avoidance.look_ahead);
            if let Some(distance) = forward_hit {
                let side_range = avoidance.look_ahead * avoidance.side_probe_scale;
                let left = self
                    .probe_at(origin, heading + avoidance.side_angle, side_range)
                    .is_some();
                let right = self
                    .probe_at(origin, heading - avoidance.side_angle, side_range)
                    .is_some();
                let side = match (left, right) {
                    (true, false) => -1.0,
                    (false, true) => 1.0,
                    _ => self.tie_break,
                };
                turn = side * avoidance.avoid_turn;
                snap_to = None;
                let closeness = (1.0 - distance / avoidance.look_ahead).clamp(0.0, 1.0);
                brake = 1.0 - closeness * (1.0 - avoidance.brake_floor);
            }
        }

        self.state.heading_delta = snap_to.unwrap_or(start + turn);
        let (sin_h, cos_h) = (self.base_heading + self.state.heading_delta).sin_cos();
        let distance = config.step_length() * brake;
        self.state.position_delta.x += cos_h * distance;
        self.state.position_delta.y += sin_h * distance;
        self.state.frame = frame;

        StepOutcome {
            frame,
            turn: self.state.heading_delta - start,
            homing,
            forward_hit,
            brake,
            distance,
        }
    }
}

fn write_state(writer: &mut TrackWriter<'_>, state: &WalkState) {
    let frame = state.frame as f32;
    let position = Vec3::new(state.position_delta.x, state.position_delta.y, 0.0);
    writer.key_vec3(ChannelPath::DeltaLocation, frame, position);
    writer.key_vec3(
        ChannelPath::DeltaRotation,
        frame,
        Vec3::new(0.0, 0.0, state.heading_delta),
    );
}

/// Frames that receive a key: the first frame, then every `key_interval` below the horizon.
pub fn key_frames(config: &WalkConfig) -> impl Iterator<Item = u32> {
    let interval = config.key_interval.max(1) as usize;
    std::iter::once(FIRST_FRAME).chain(
        (FIRST_FRAME.saturating_add(config.key_interval)..config.total_frames).step_by(interval),
    )
}

/// Bake a full walk into a fresh track of delta-location and delta-rotation channels.
///
/// Same request, config, and obstacle layout always produce identical keys.
#[must_use]
pub fn generate_walk(
    request: &WalkRequest,
    config: &WalkConfig,
    probe: &dyn ObstacleProbe,
) -> AnimationTrack {
    let mut track = AnimationTrack::new(format!("{}Action", request.agent));
    let mut generator = LocomotionGenerator::new(config, probe, request);
    let mut writer = TrackWriter::new(&mut track, WALK_GROUP);
    write_state(&mut writer, generator.state());
    for frame in key_frames(config).skip(1) {
        generator.step(frame);
        write_state(&mut writer, generator.state());
    }
    writer.finish_linear();
    track
}

/// Value of the heading-delta channel at `frame`, if the track carries one.
#[must_use]
pub fn heading_at(track: &AnimationTrack, frame: f32) -> Option<f32> {
    track.sample(&ChannelPath::DeltaRotation(Axis::Z), frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Extrapolation, Interpolation};
    use swarmwalk_probe::OpenField;

    fn request(agent: &str) -> WalkRequest {
        WalkRequest {
            agent: agent.to_owned(),
            base_location: Vec3::ZERO,
            base_heading: 0.0,
            seed: 42,
        }
    }

    #[test]
    fn key_frames_follow_interval_below_horizon() {
        let config = WalkConfig {
            total_frames: 100,
            key_interval: 20,
            ..WalkConfig::default()
        };
        let frames: Vec<u32> = key_frames(&config).collect();
        assert_eq!(frames, vec![1, 21, 41, 61, 81]);
    }

    #[test]
    fn wander_turn_stays_within_bound() {
        let config = WalkConfig {
            startup_guard: u32::MAX,
            ..WalkConfig::default()
        };
        let request = request("agent");
        let mut generator = LocomotionGenerator::new(&config, &OpenField, &request);
        for frame in key_frames(&config).skip(1) {
            let outcome = generator.step(frame);
            assert!(!outcome.homing);
            assert!(outcome.turn.abs() <= config.wander_turn + 1e-6);
            assert!((outcome.distance - config.step_length()).abs() < 1e-6);
        }
    }

    #[test]
    fn homing_snaps_onto_the_initial_heading() {
        let config = WalkConfig {
            wander_turn: 0.0,
            startup_guard: 0,
            homing_duration: 600,
            cycle_period: 600,
            ..WalkConfig::default()
        };
        let request = request("agent");
        let start = WalkState {
            frame: 1,
            heading_delta: config.orientation_offset + 0.15,
            position_delta: Point2::default(),
        };
        let mut generator = LocomotionGenerator::new(&config, &OpenField, &request).with_state(start);
        let outcome = generator.step(21);
        assert!(outcome.homing);
        assert!((outcome.turn + 0.15).abs() < 1e-5);
        assert_eq!(
            generator.state().heading_delta.to_bits(),
            config.orientation_offset.to_bits()
        );
    }

    #[test]
    fn tie_break_is_stable_per_name() {
        let config = WalkConfig::default();
        let a = LocomotionGenerator::new(&config, &OpenField, &request("character_controller.001"));
        let b = LocomotionGenerator::new(&config, &OpenField, &request("character_controller.001"));
        assert_eq!(a.tie_break(), b.tie_break());
        assert_eq!(a.tie_break().abs(), 1.0);
    }

    #[test]
    fn generated_track_is_linear_on_both_ends() {
        let config = WalkConfig {
            total_frames: 200,
            ..WalkConfig::default()
        };
        let track = generate_walk(&request("agent"), &config, &OpenField);
        assert_eq!(track.channel_count(), 6);
        for channel in track.channels() {
            assert!(channel.path.is_delta());
            assert_eq!(channel.keys.len(), 10);
            assert_eq!(channel.extrapolation, Extrapolation::Linear);
            assert!(
                channel
                    .keys
                    .iter()
                    .all(|key| key.interpolation == Interpolation::Linear)
            );
        }
        let first = heading_at(&track, 1.0).expect("heading channel");
        assert!((first - config.orientation_offset).abs() < 1e-6);
    }
}

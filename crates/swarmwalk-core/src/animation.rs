//! Keyframed animation tracks and the writer used to fill them.
//!
//! A track is a tree: groups nest other groups or leaf channels. Code that needs every
//! channel (interpolation fixes, phase shifts) walks the tree with
//! [`AnimationTrack::visit_channels_mut`] instead of poking at container internals.

use serde::{Deserialize, Serialize};

use crate::Vec3;

/// Keys closer together than this are treated as the same frame.
const FRAME_EPSILON: f32 = 1e-4;
const BEZIER_SOLVE_STEPS: usize = 32;

/// Component selector for vector properties.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];
}

/// Property a channel drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelPath {
    Location(Axis),
    Rotation(Axis),
    DeltaLocation(Axis),
    DeltaRotation(Axis),
    /// `offset` of the named follow-path constraint.
    ConstraintOffset(String),
}

impl ChannelPath {
    /// True for channels layered on top of the user-editable base transform.
    #[must_use]
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::DeltaLocation(_) | Self::DeltaRotation(_))
    }
}

/// Interpolation used from a key to the next one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Interpolation {
    Constant,
    Linear,
    #[default]
    Bezier,
}

/// Behaviour before the first and after the last key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Extrapolation {
    /// Hold the boundary value.
    #[default]
    Constant,
    /// Continue along the boundary segment's slope.
    Linear,
}

/// A single `(time, value)` sample with its outgoing interpolation and curve handles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
    pub interpolation: Interpolation,
    /// `(time, value)` of the incoming Bezier handle.
    pub handle_left: [f32; 2],
    /// `(time, value)` of the outgoing Bezier handle.
    pub handle_right: [f32; 2],
}

impl Keyframe {
    #[must_use]
    pub fn new(time: f32, value: f32) -> Self {
        Self {
            time,
            value,
            interpolation: Interpolation::default(),
            handle_left: [time, value],
            handle_right: [time, value],
        }
    }
}

/// Value-altering layer evaluated on top of the keyed curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ChannelModifier {
    /// Smooth value noise in `[-strength, strength]`.
    Noise {
        scale: f32,
        strength: f32,
        phase: f32,
    },
}

impl ChannelModifier {
    fn apply(&self, time: f32, value: f32) -> f32 {
        match *self {
            Self::Noise {
                scale,
                strength,
                phase,
            } => {
                if scale <= 0.0 {
                    return value;
                }
                value + strength * value_noise(time / scale + phase)
            }
        }
    }
}

fn lattice(cell: i64) -> f32 {
    // splitmix64 finaliser mapped to [-1, 1]
    let mut z = (cell as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
}

fn value_noise(x: f32) -> f32 {
    let cell = x.floor();
    let frac = x - cell;
    let smooth = frac * frac * (3.0 - 2.0 * frac);
    let a = lattice(cell as i64);
    let b = lattice(cell as i64 + 1);
    a + (b - a) * smooth
}

/// Sampled curve for one property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub path: ChannelPath,
    pub keys: Vec<Keyframe>,
    pub extrapolation: Extrapolation,
    #[serde(default)]
    pub modifiers: Vec<ChannelModifier>,
}

impl Channel {
    #[must_use]
    pub fn new(path: ChannelPath) -> Self {
        Self {
            path,
            keys: Vec::new(),
            extrapolation: Extrapolation::default(),
            modifiers: Vec::new(),
        }
    }

    /// Insert a key at `time`, replacing the value of an existing key on the same frame.
    ///
    /// Returns the index of the written key. Handles are recomputed flat so that freshly
    /// inserted Bezier keys ease in and out.
    pub fn insert(&mut self, time: f32, value: f32) -> usize {
        let index = match self
            .keys
            .iter()
            .position(|key| key.time >= time - FRAME_EPSILON)
        {
            Some(idx) if (self.keys[idx].time - time).abs() <= FRAME_EPSILON => {
                self.keys[idx].value = value;
                idx
            }
            Some(idx) => {
                self.keys.insert(idx, Keyframe::new(time, value));
                idx
            }
            None => {
                self.keys.push(Keyframe::new(time, value));
                self.keys.len() - 1
            }
        };
        self.recalculate_handles();
        index
    }

    fn recalculate_handles(&mut self) {
        let len = self.keys.len();
        for idx in 0..len {
            let time = self.keys[idx].time;
            let value = self.keys[idx].value;
            let left = if idx > 0 {
                (time - self.keys[idx - 1].time) / 3.0
            } else {
                0.0
            };
            let right = if idx + 1 < len {
                (self.keys[idx + 1].time - time) / 3.0
            } else {
                0.0
            };
            self.keys[idx].handle_left = [time - left, value];
            self.keys[idx].handle_right = [time + right, value];
        }
    }

    /// Apply `interpolation` to every key.
    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        for key in &mut self.keys {
            key.interpolation = interpolation;
        }
    }

    /// Frame of the first and last key, if any.
    #[must_use]
    pub fn time_range(&self) -> Option<(f32, f32)> {
        Some((self.keys.first()?.time, self.keys.last()?.time))
    }

    /// Evaluate the channel (keys, extrapolation, then modifiers) at `time`.
    #[must_use]
    pub fn evaluate(&self, time: f32) -> f32 {
        let base = self.evaluate_keys(time);
        self.modifiers
            .iter()
            .fold(base, |value, modifier| modifier.apply(time, value))
    }

    fn evaluate_keys(&self, time: f32) -> f32 {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };
        if time <= first.time {
            return match (self.extrapolation, self.keys.get(1)) {
                (Extrapolation::Linear, Some(next)) => {
                    first.value + segment_slope(first, next) * (time - first.time)
                }
                _ => first.value,
            };
        }
        if time >= last.time {
            let len = self.keys.len();
            return match (self.extrapolation, len >= 2) {
                (Extrapolation::Linear, true) => {
                    let prev = &self.keys[len - 2];
                    last.value + segment_slope(prev, last) * (time - last.time)
                }
                _ => last.value,
            };
        }

        let upper = self
            .keys
            .iter()
            .position(|key| key.time > time)
            .unwrap_or(self.keys.len() - 1);
        let k0 = &self.keys[upper - 1];
        let k1 = &self.keys[upper];
        match k0.interpolation {
            Interpolation::Constant => k0.value,
            Interpolation::Linear => {
                let span = k1.time - k0.time;
                if span <= FRAME_EPSILON {
                    return k1.value;
                }
                let t = (time - k0.time) / span;
                k0.value + (k1.value - k0.value) * t
            }
            Interpolation::Bezier => bezier_value(k0, k1, time),
        }
    }
}

fn segment_slope(a: &Keyframe, b: &Keyframe) -> f32 {
    let span = b.time - a.time;
    if span.abs() <= FRAME_EPSILON {
        0.0
    } else {
        (b.value - a.value) / span
    }
}

fn cubic(p0: f32, p1: f32, p2: f32, p3: f32, u: f32) -> f32 {
    let inv = 1.0 - u;
    inv * inv * inv * p0 + 3.0 * inv * inv * u * p1 + 3.0 * inv * u * u * p2 + u * u * u * p3
}

fn bezier_value(k0: &Keyframe, k1: &Keyframe, time: f32) -> f32 {
    // Clamp handle times into the segment so x(u) stays monotonic.
    let t1 = k0.handle_right[0].clamp(k0.time, k1.time);
    let t2 = k1.handle_left[0].clamp(k0.time, k1.time);
    let mut lo = 0.0_f32;
    let mut hi = 1.0_f32;
    for _ in 0..BEZIER_SOLVE_STEPS {
        let mid = 0.5 * (lo + hi);
        if cubic(k0.time, t1, t2, k1.time, mid) < time {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let u = 0.5 * (lo + hi);
    cubic(k0.value, k0.handle_right[1], k1.handle_left[1], k1.value, u)
}

/// Named container of nested nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelGroup {
    pub name: String,
    pub nodes: Vec<TrackNode>,
}

/// Closed set of track container kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TrackNode {
    Channel(Channel),
    Group(ChannelGroup),
}

impl TrackNode {
    fn visit<'a>(&'a self, visitor: &mut dyn FnMut(&'a Channel)) {
        match self {
            Self::Channel(channel) => visitor(channel),
            Self::Group(group) => {
                for node in &group.nodes {
                    node.visit(visitor);
                }
            }
        }
    }

    fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut Channel)) {
        match self {
            Self::Channel(channel) => visitor(channel),
            Self::Group(group) => {
                for node in &mut group.nodes {
                    node.visit_mut(visitor);
                }
            }
        }
    }
}

/// Named tree of animation channels owned by one entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnimationTrack {
    pub name: String,
    pub nodes: Vec<TrackNode>,
    /// Net time shift applied through [`crate::gait::align_phase`].
    #[serde(default)]
    pub phase_offset: f32,
}

impl AnimationTrack {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            phase_offset: 0.0,
        }
    }

    /// Visit every leaf channel in depth-first order.
    pub fn visit_channels<'a>(&'a self, visitor: &mut dyn FnMut(&'a Channel)) {
        for node in &self.nodes {
            node.visit(visitor);
        }
    }

    /// Visit every leaf channel mutably in depth-first order.
    pub fn visit_channels_mut(&mut self, visitor: &mut dyn FnMut(&mut Channel)) {
        for node in &mut self.nodes {
            node.visit_mut(visitor);
        }
    }

    /// All leaf channels in depth-first order.
    #[must_use]
    pub fn channels(&self) -> Vec<&Channel> {
        let mut out = Vec::new();
        self.visit_channels(&mut |channel| out.push(channel));
        out
    }

    /// First channel driving `path`.
    #[must_use]
    pub fn channel(&self, path: &ChannelPath) -> Option<&Channel> {
        self.channels()
            .into_iter()
            .find(|channel| &channel.path == path)
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        let mut count = 0;
        self.visit_channels(&mut |_| count += 1);
        count
    }

    /// Total number of keys across all channels.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let mut count = 0;
        self.visit_channels(&mut |channel| count += channel.keys.len());
        count
    }

    /// True when any channel drives a follow-path offset.
    #[must_use]
    pub fn is_stepping_track(&self) -> bool {
        self.channels()
            .iter()
            .any(|channel| matches!(channel.path, ChannelPath::ConstraintOffset(_)))
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.visit_channels_mut(&mut |channel| channel.set_interpolation(interpolation));
    }

    pub fn set_extrapolation(&mut self, extrapolation: Extrapolation) {
        self.visit_channels_mut(&mut |channel| channel.extrapolation = extrapolation);
    }

    /// Evaluate `path` at `time`, or `None` when no channel drives it.
    #[must_use]
    pub fn sample(&self, path: &ChannelPath, time: f32) -> Option<f32> {
        self.channel(path).map(|channel| channel.evaluate(time))
    }
}

/// Appends keys to one group of a track, creating the group and channels on demand.
#[derive(Debug)]
pub struct TrackWriter<'a> {
    track: &'a mut AnimationTrack,
    group: String,
}

impl<'a> TrackWriter<'a> {
    pub fn new(track: &'a mut AnimationTrack, group: impl Into<String>) -> Self {
        Self {
            track,
            group: group.into(),
        }
    }

    fn group_nodes(&mut self) -> &mut Vec<TrackNode> {
        let position = self.track.nodes.iter().position(
            |node| matches!(node, TrackNode::Group(group) if group.name == self.group),
        );
        let index = match position {
            Some(index) => index,
            None => {
                self.track.nodes.push(TrackNode::Group(ChannelGroup {
                    name: self.group.clone(),
                    nodes: Vec::new(),
                }));
                self.track.nodes.len() - 1
            }
        };
        match &mut self.track.nodes[index] {
            TrackNode::Group(group) => &mut group.nodes,
            TrackNode::Channel(_) => unreachable!("group index always points at a group"),
        }
    }

    /// Mutable access to the channel driving `path`, created if absent.
    pub fn channel_mut(&mut self, path: ChannelPath) -> &mut Channel {
        let nodes = self.group_nodes();
        let existing = nodes
            .iter()
            .position(|node| matches!(node, TrackNode::Channel(channel) if channel.path == path));
        let index = match existing {
            Some(index) => index,
            None => {
                nodes.push(TrackNode::Channel(Channel::new(path)));
                nodes.len() - 1
            }
        };
        match &mut nodes[index] {
            TrackNode::Channel(channel) => channel,
            TrackNode::Group(_) => unreachable!("channel index always points at a channel"),
        }
    }

    /// Write a single sample.
    pub fn key(&mut self, path: ChannelPath, frame: f32, value: f32) {
        self.channel_mut(path).insert(frame, value);
    }

    /// Write one sample per axis of `value`.
    pub fn key_vec3(&mut self, path: fn(Axis) -> ChannelPath, frame: f32, value: Vec3) {
        for axis in Axis::ALL {
            self.key(path(axis), frame, value.component(axis));
        }
    }

    /// Force linear interpolation and extrapolation on every channel of the track.
    pub fn finish_linear(self) {
        self.track.set_interpolation(Interpolation::Linear);
        self.track.set_extrapolation(Extrapolation::Linear);
    }
}

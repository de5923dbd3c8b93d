//! Ray probes against obstacle footprints used by steering code.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PARALLEL_EPSILON: f32 = 1e-6;

/// Errors emitted by probe implementations.
#[derive(Debug, Error, PartialEq)]
pub enum ProbeError {
    /// An obstacle footprint that cannot be intersected (e.g., non-positive radius).
    #[error("invalid obstacle {index}: {reason}")]
    InvalidShape { index: usize, reason: &'static str },
}

/// World-space planar footprint of a solid obstacle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ObstacleShape {
    Circle {
        center: [f32; 2],
        radius: f32,
    },
    /// Rectangle rotated by `rotation` radians about its center.
    Rect {
        center: [f32; 2],
        half_extents: [f32; 2],
        rotation: f32,
    },
}

impl ObstacleShape {
    fn validate(&self, index: usize) -> Result<(), ProbeError> {
        let finite = |values: &[f32]| values.iter().all(|v| v.is_finite());
        match *self {
            Self::Circle { center, radius } => {
                if !finite(&[center[0], center[1], radius]) {
                    return Err(ProbeError::InvalidShape {
                        index,
                        reason: "circle values must be finite",
                    });
                }
                if radius <= 0.0 {
                    return Err(ProbeError::InvalidShape {
                        index,
                        reason: "circle radius must be positive",
                    });
                }
            }
            Self::Rect {
                center,
                half_extents,
                rotation,
            } => {
                if !finite(&[center[0], center[1], half_extents[0], half_extents[1], rotation]) {
                    return Err(ProbeError::InvalidShape {
                        index,
                        reason: "rectangle values must be finite",
                    });
                }
                if half_extents[0] <= 0.0 || half_extents[1] <= 0.0 {
                    return Err(ProbeError::InvalidShape {
                        index,
                        reason: "rectangle half extents must be positive",
                    });
                }
            }
        }
        Ok(())
    }

    /// Center and radius of a circle enclosing the shape.
    fn bounding_circle(&self) -> ([f32; 2], f32) {
        match *self {
            Self::Circle { center, radius } => (center, radius),
            Self::Rect {
                center,
                half_extents,
                ..
            } => (center, half_extents[0].hypot(half_extents[1])),
        }
    }

    /// Distance along the unit ray `direction` to the first surface point, if any.
    ///
    /// Rays starting inside the shape report a hit at distance zero.
    fn intersect(&self, origin: [f32; 2], direction: [f32; 2]) -> Option<f32> {
        match *self {
            Self::Circle { center, radius } => {
                let ox = origin[0] - center[0];
                let oy = origin[1] - center[1];
                let c = ox * ox + oy * oy - radius * radius;
                if c <= 0.0 {
                    return Some(0.0);
                }
                let b = ox * direction[0] + oy * direction[1];
                let disc = b * b - c;
                if disc < 0.0 {
                    return None;
                }
                let t = -b - disc.sqrt();
                (t >= 0.0).then_some(t)
            }
            Self::Rect {
                center,
                half_extents,
                rotation,
            } => {
                let (sin_r, cos_r) = rotation.sin_cos();
                let px = origin[0] - center[0];
                let py = origin[1] - center[1];
                // Ray expressed in the rectangle's local frame.
                let local_origin = [px * cos_r + py * sin_r, -px * sin_r + py * cos_r];
                let local_dir = [
                    direction[0] * cos_r + direction[1] * sin_r,
                    -direction[0] * sin_r + direction[1] * cos_r,
                ];

                let mut t_near = f32::NEG_INFINITY;
                let mut t_far = f32::INFINITY;
                for axis in 0..2 {
                    let o = local_origin[axis];
                    let d = local_dir[axis];
                    let h = half_extents[axis];
                    if d.abs() < PARALLEL_EPSILON {
                        if o.abs() > h {
                            return None;
                        }
                        continue;
                    }
                    let mut t1 = (-h - o) / d;
                    let mut t2 = (h - o) / d;
                    if t1 > t2 {
                        std::mem::swap(&mut t1, &mut t2);
                    }
                    t_near = t_near.max(t1);
                    t_far = t_far.min(t2);
                    if t_near > t_far {
                        return None;
                    }
                }
                if t_far < 0.0 {
                    return None;
                }
                Some(t_near.max(0.0))
            }
        }
    }
}

/// Nearest obstacle intersection reported by a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin to the hit point.
    pub distance: f32,
    /// Index of the obstacle in the order passed to [`ObstacleProbe::rebuild`].
    pub obstacle: usize,
}

/// Common behaviour exposed by obstacle probes.
///
/// Probes are read-only once built and may be queried from many threads.
pub trait ObstacleProbe: Send + Sync {
    /// Rebuild internal structures from obstacle footprints.
    fn rebuild(&mut self, shapes: &[ObstacleShape]) -> Result<(), ProbeError>;

    /// Nearest obstacle hit along `direction` within `max_distance`, or `None`.
    fn cast(&self, origin: [f32; 2], direction: [f32; 2], max_distance: f32) -> Option<RayHit>;
}

/// Probe over an empty world; every ray misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenField;

impl ObstacleProbe for OpenField {
    fn rebuild(&mut self, _shapes: &[ObstacleShape]) -> Result<(), ProbeError> {
        Ok(())
    }

    fn cast(&self, _origin: [f32; 2], _direction: [f32; 2], _max_distance: f32) -> Option<RayHit> {
        None
    }
}

/// Flat list of obstacle footprints with bounding-circle rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObstacleField {
    shapes: Vec<ObstacleShape>,
    #[serde(skip)]
    bounds: Vec<([f32; 2], f32)>,
}

impl ObstacleField {
    /// Create an empty field.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a field from the provided footprints.
    pub fn from_shapes(shapes: &[ObstacleShape]) -> Result<Self, ProbeError> {
        let mut field = Self::new();
        field.rebuild(shapes)?;
        Ok(field)
    }

    /// Number of obstacles in the field.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Returns true when the field holds no obstacles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Borrow the stored footprints.
    #[must_use]
    pub fn shapes(&self) -> &[ObstacleShape] {
        &self.shapes
    }
}

impl ObstacleProbe for ObstacleField {
    fn rebuild(&mut self, shapes: &[ObstacleShape]) -> Result<(), ProbeError> {
        for (index, shape) in shapes.iter().enumerate() {
            shape.validate(index)?;
        }
        self.shapes.clear();
        self.shapes.extend_from_slice(shapes);
        self.bounds.clear();
        self.bounds
            .extend(self.shapes.iter().map(ObstacleShape::bounding_circle));
        Ok(())
    }

    fn cast(&self, origin: [f32; 2], direction: [f32; 2], max_distance: f32) -> Option<RayHit> {
        if !(max_distance > 0.0) {
            return None;
        }
        let length = direction[0].hypot(direction[1]);
        if !length.is_finite() || length <= PARALLEL_EPSILON {
            return None;
        }
        let dir = [direction[0] / length, direction[1] / length];

        self.shapes
            .iter()
            .zip(&self.bounds)
            .enumerate()
            .filter(|(_, (_, (center, radius)))| {
                // Cheap reject: bounding circle entirely out of reach.
                let dx = center[0] - origin[0];
                let dy = center[1] - origin[1];
                dx.hypot(dy) - radius <= max_distance
            })
            .filter_map(|(obstacle, (shape, _))| {
                shape
                    .intersect(origin, dir)
                    .filter(|distance| *distance <= max_distance)
                    .map(|distance| RayHit { distance, obstacle })
            })
            .min_by_key(|hit| OrderedFloat(hit.distance))
    }
}

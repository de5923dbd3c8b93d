//! Rejection-sampling placement with a batch-wide position accumulator.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Point2, Rect};

/// Outcome of one placement request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Placement {
    pub point: Point2,
    /// Samples drawn, including the accepted one.
    pub attempts: u32,
    /// False when the retry budget ran out and the last sample was kept anyway.
    pub satisfied: bool,
}

/// Positions placed so far in a batch.
///
/// Owned by the orchestrator and used serially; every returned point is appended so later
/// requests keep their distance from it.
#[derive(Debug, Clone)]
pub struct PlacementAccumulator {
    positions: Vec<Point2>,
    bounds: Rect,
    min_separation: f32,
    retry_budget: u32,
}

impl PlacementAccumulator {
    #[must_use]
    pub fn new(bounds: Rect, min_separation: f32, retry_budget: u32) -> Self {
        Self {
            positions: Vec::new(),
            bounds,
            min_separation,
            retry_budget,
        }
    }

    /// Register a position that already exists without sampling.
    pub fn seed(&mut self, point: Point2) {
        self.positions.push(point);
    }

    #[must_use]
    pub fn positions(&self) -> &[Point2] {
        &self.positions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn clear_of_others(&self, point: Point2) -> bool {
        self.positions
            .iter()
            .all(|existing| existing.distance(point) >= self.min_separation)
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Point2 {
        let Rect { min, max } = self.bounds;
        Point2::new(rng.random_range(min.x..=max.x), rng.random_range(min.y..=max.y))
    }

    /// Draw a point inside the bounds that keeps `min_separation` from every earlier one.
    ///
    /// Draws at most `retry_budget` samples (at least one). When none qualifies the last
    /// sample is returned anyway and logged.
    pub fn place<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Placement {
        let budget = self.retry_budget.max(1);
        let mut attempts = 0;
        let mut point = self.sample(rng);
        let satisfied = loop {
            attempts += 1;
            if self.clear_of_others(point) {
                break true;
            }
            if attempts >= budget {
                break false;
            }
            point = self.sample(rng);
        };
        if !satisfied {
            warn!(
                x = point.x,
                y = point.y,
                attempts,
                placed = self.positions.len(),
                "placement retry budget exhausted; accepting overlapping position"
            );
        }
        self.positions.push(point);
        Placement {
            point,
            attempts,
            satisfied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn placements_keep_their_distance() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut acc = PlacementAccumulator::new(Rect::centered(100.0, 100.0), 15.0, 100);
        for _ in 0..20 {
            let placement = acc.place(&mut rng);
            assert!(placement.satisfied);
            assert!(placement.attempts >= 1);
        }
        let points = acc.positions();
        for (i, a) in points.iter().enumerate() {
            assert!(Rect::centered(100.0, 100.0).contains(*a));
            for b in &points[i + 1..] {
                assert!(a.distance(*b) >= 15.0);
            }
        }
    }

    #[test]
    fn exhausted_budget_still_returns_a_point() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut acc = PlacementAccumulator::new(Rect::centered(1.0, 1.0), 15.0, 10);
        assert!(acc.place(&mut rng).satisfied);
        let forced = acc.place(&mut rng);
        assert!(!forced.satisfied);
        assert_eq!(forced.attempts, 10);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn zero_budget_draws_once() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut acc = PlacementAccumulator::new(Rect::centered(1.0, 1.0), 15.0, 0);
        acc.seed(Point2::new(0.0, 0.0));
        let placement = acc.place(&mut rng);
        assert_eq!(placement.attempts, 1);
        assert!(!placement.satisfied);
    }

    #[test]
    fn seeded_positions_are_respected() {
        let mut rng = SmallRng::seed_from_u64(9);
        let mut acc = PlacementAccumulator::new(Rect::centered(20.0, 20.0), 15.0, 500);
        acc.seed(Point2::new(0.0, 0.0));
        let placement = acc.place(&mut rng);
        assert!(placement.satisfied);
        assert!(placement.point.length() >= 15.0);
    }
}

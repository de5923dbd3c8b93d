//! Random obstacle course the swarm walks through.

use rand::Rng;
use swarmwalk_core::{Entity, EntityId, EntityKind, Footprint, Rect, Scene, Vec3};

/// Half extents of generated houses fall in this range (world units).
const HOUSE_HALF_EXTENT: (f32, f32) = (2.0, 6.0);
const ROCK_RADIUS: (f32, f32) = (1.0, 3.0);

/// Scatter `count` tagged obstacles inside `bounds`: every third one is a round rock, the
/// rest are rotated rectangular houses.
pub fn scatter_obstacles<R: Rng + ?Sized>(
    scene: &mut Scene,
    count: usize,
    bounds: Rect,
    rng: &mut R,
) -> Vec<EntityId> {
    (0..count)
        .map(|index| {
            let location = Vec3::new(
                rng.random_range(bounds.min.x..=bounds.max.x),
                rng.random_range(bounds.min.y..=bounds.max.y),
                0.0,
            );
            let entity = if index % 3 == 2 {
                Entity::new("Rock", EntityKind::Mesh).as_obstacle(Footprint::Circle {
                    radius: rng.random_range(ROCK_RADIUS.0..=ROCK_RADIUS.1),
                })
            } else {
                Entity::new("House", EntityKind::Mesh)
                    .with_rotation(Vec3::new(
                        0.0,
                        0.0,
                        rng.random_range(0.0..std::f32::consts::PI),
                    ))
                    .as_obstacle(Footprint::Rect {
                        half_extents: [
                            rng.random_range(HOUSE_HALF_EXTENT.0..=HOUSE_HALF_EXTENT.1),
                            rng.random_range(HOUSE_HALF_EXTENT.0..=HOUSE_HALF_EXTENT.1),
                        ],
                    })
            };
            scene.insert(entity.with_location(location))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn scattered_obstacles_are_tagged_and_in_bounds() {
        let mut scene = Scene::new();
        let mut rng = SmallRng::seed_from_u64(4);
        let bounds = Rect::centered(50.0, 30.0);
        let ids = scatter_obstacles(&mut scene, 6, bounds, &mut rng);
        assert_eq!(ids.len(), 6);
        assert_eq!(scene.obstacle_shapes().len(), 6);
        for id in ids {
            let entity = scene.get(id).expect("obstacle");
            assert!(entity.obstacle);
            assert!(bounds.contains(entity.transform.location.xy()));
        }
        assert_eq!(scene.name(scene.find("House.003").expect("houses")), "House.003");
    }
}

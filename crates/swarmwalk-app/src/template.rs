//! Demo four-legged walker used as the swarm template.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use swarmwalk_core::{
    AnimationTrack, ChannelPath, Constraint, ConstraintKind, Entity, EntityId, EntityKind,
    Joint, Rig, Scene, TrackWriter, Vec3,
};

pub const ROOT_NAME: &str = "character_controller";
pub const LEG_COUNT: usize = 4;
const FOLLOW_PATH: &str = "Follow Path";
/// Distance from the body center to each walk path.
const LEG_REACH: f32 = 1.6;

fn ordinal(index: usize) -> String {
    if index == 0 {
        String::new()
    } else {
        format!(".{index:03}")
    }
}

/// Follow-path offset sweeping 0 to 100 over frames 10..30 and continuing linearly after.
fn stepping_track(owner: &str) -> AnimationTrack {
    let mut track = AnimationTrack::new(format!("{owner}Action"));
    let mut writer = TrackWriter::new(&mut track, "Stepping");
    let path = ChannelPath::ConstraintOffset(FOLLOW_PATH.to_owned());
    writer.key(path.clone(), 10.0, 0.0);
    writer.key(path, 30.0, 100.0);
    writer.finish_linear();
    track
}

/// Insert the walker and return its root.
///
/// Each leg rig's foot joint reaches for an IK target that follows a walk path; the paths
/// copy the rotation of a direction controller so they swing with the body. The IK targets
/// live outside the root hierarchy and are only reachable through constraints.
pub fn build_spider(scene: &mut Scene) -> EntityId {
    let root = scene.insert(Entity::new(ROOT_NAME, EntityKind::Empty));
    scene.insert(
        Entity::new("Spider_Body", EntityKind::Mesh)
            .with_parent(root)
            .with_location(Vec3::new(0.0, 0.0, 0.8)),
    );
    let direction = scene.insert(Entity::new("Direction_Controller", EntityKind::Empty).with_parent(root));

    for leg in 0..LEG_COUNT {
        let suffix = ordinal(leg);
        let angle = FRAC_PI_4 + FRAC_PI_2 * leg as f32;
        let (sin_a, cos_a) = angle.sin_cos();
        let path = scene.insert(
            Entity::new(format!("WalkPath{suffix}"), EntityKind::Curve)
                .with_parent(root)
                .with_location(Vec3::new(cos_a * LEG_REACH, sin_a * LEG_REACH, 0.0))
                .with_constraint(Constraint::new(
                    "Copy Rotation",
                    ConstraintKind::CopyRotation,
                    Some(direction),
                )),
        );
        let target_name = format!("IK_Target{suffix}");
        let target = scene.insert(
            Entity::new(target_name.clone(), EntityKind::Empty)
                .with_location(Vec3::new(cos_a * LEG_REACH, sin_a * LEG_REACH, 0.0))
                .with_constraint(Constraint::new(
                    FOLLOW_PATH,
                    ConstraintKind::FollowPath { offset: 0.0 },
                    Some(path),
                ))
                .with_track(stepping_track(&target_name)),
        );
        let rig = Rig {
            joints: vec![
                Joint::new("Coxa", None),
                Joint::new("Femur", Some(0)),
                Joint::new("Tibia", Some(1)).with_constraint(Constraint::new(
                    "IK",
                    ConstraintKind::InverseKinematics { chain_count: 3 },
                    Some(target),
                )),
            ],
        };
        scene.insert(
            Entity::new(format!("Leg_Rig{suffix}"), EntityKind::Armature(rig))
                .with_parent(root)
                .with_rotation(Vec3::new(0.0, 0.0, angle)),
        );
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmwalk_core::collect_closure;

    #[test]
    fn spider_closure_pulls_in_every_ik_target() {
        let mut scene = Scene::new();
        let root = build_spider(&mut scene);
        let closure = collect_closure(&scene, root);
        assert_eq!(closure.len(), 3 + 3 * LEG_COUNT);
        assert_eq!(closure.recovered().len(), LEG_COUNT);
        assert!(scene.find("IK_Target.003").is_some());
        assert_eq!(scene.find(ROOT_NAME), Some(root));
    }
}

//! Time offsets that turn unison stepping into an alternating gait.

use tracing::debug;

use crate::GaitConfig;
use crate::animation::AnimationTrack;
use crate::scene::{EntityId, Scene};

/// Shift every key time and handle time in `track` by `offset_frames`. Values are kept.
pub fn shift_phase(track: &mut AnimationTrack, offset_frames: f32) {
    if offset_frames == 0.0 {
        return;
    }
    track.visit_channels_mut(&mut |channel| {
        for key in &mut channel.keys {
            key.time += offset_frames;
            key.handle_left[0] += offset_frames;
            key.handle_right[0] += offset_frames;
        }
    });
}

/// Bring `track` to a net phase of `offset_frames`, shifting only by what is missing.
///
/// Tracks copied from an already aligned template keep their recorded phase, so aligning
/// them again is a no-op. Returns the shift applied.
pub fn align_phase(track: &mut AnimationTrack, offset_frames: f32) -> f32 {
    let shift = offset_frames - track.phase_offset;
    shift_phase(track, shift);
    track.phase_offset = offset_frames;
    shift
}

/// Align the stepping tracks of `limbs` to every group in `config`.
///
/// Returns the number of tracks that moved.
pub fn apply_gait(scene: &mut Scene, limbs: &[EntityId], config: &GaitConfig) -> usize {
    let mut shifted = 0;
    for group in &config.groups {
        for &index in &group.limbs {
            let Some(&limb) = limbs.get(index) else {
                debug!(index, available = limbs.len(), "gait group names a missing limb");
                continue;
            };
            let Some(track) = scene.get_mut(limb).and_then(|e| e.track.as_mut()) else {
                continue;
            };
            if align_phase(track, group.offset_frames) != 0.0 {
                shifted += 1;
            }
        }
    }
    shifted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Axis, ChannelGroup, ChannelPath, TrackNode, TrackWriter};
    use crate::scene::{Entity, EntityKind};
    use crate::LimbGroup;

    fn stepping_track() -> AnimationTrack {
        let mut track = AnimationTrack::new("step");
        let mut writer = TrackWriter::new(&mut track, "Walk");
        writer.key(ChannelPath::ConstraintOffset("Follow".into()), 10.0, 0.0);
        writer.key(ChannelPath::ConstraintOffset("Follow".into()), 30.0, 100.0);
        track
    }

    fn times(track: &AnimationTrack) -> Vec<f32> {
        track
            .channels()
            .iter()
            .flat_map(|c| c.keys.iter().map(|k| k.time))
            .collect()
    }

    #[test]
    fn shift_moves_times_and_handles_only() {
        let mut track = stepping_track();
        let before = track.channels()[0].keys.clone();
        shift_phase(&mut track, -10.0);
        let after = &track.channels()[0].keys;
        assert_eq!(times(&track), vec![0.0, 20.0]);
        for (old, new) in before.iter().zip(after) {
            assert_eq!(old.value, new.value);
            assert_eq!(new.handle_left[0], old.handle_left[0] - 10.0);
            assert_eq!(new.handle_right[0], old.handle_right[0] - 10.0);
            assert_eq!(new.handle_right[1], old.handle_right[1]);
        }
    }

    #[test]
    fn shift_reaches_nested_groups() {
        let mut track = stepping_track();
        let mut nested = AnimationTrack::new("inner");
        TrackWriter::new(&mut nested, "Inner").key(ChannelPath::Location(Axis::X), 5.0, 1.0);
        track.nodes.push(TrackNode::Group(ChannelGroup {
            name: "Outer".into(),
            nodes: nested.nodes,
        }));
        shift_phase(&mut track, 2.5);
        assert_eq!(times(&track), vec![12.5, 32.5, 7.5]);
    }

    #[test]
    fn align_is_idempotent() {
        let mut track = stepping_track();
        assert_eq!(align_phase(&mut track, -10.0), -10.0);
        assert_eq!(align_phase(&mut track, -10.0), 0.0);
        assert_eq!(times(&track), vec![0.0, 20.0]);
        let mut copy = track.clone();
        align_phase(&mut copy, -10.0);
        assert_eq!(times(&copy), vec![0.0, 20.0]);
    }

    #[test]
    fn apply_gait_shifts_selected_limbs() {
        let mut scene = Scene::new();
        let limbs: Vec<EntityId> = (0..4)
            .map(|i| {
                scene.insert(
                    Entity::new(format!("IK_Target.{i:03}"), EntityKind::Empty)
                        .with_track(stepping_track()),
                )
            })
            .collect();
        let config = GaitConfig {
            groups: vec![LimbGroup {
                limbs: vec![1, 3, 7],
                offset_frames: -10.0,
            }],
        };
        assert_eq!(apply_gait(&mut scene, &limbs, &config), 2);
        assert_eq!(apply_gait(&mut scene, &limbs, &config), 0);
        let first = scene.get(limbs[0]).and_then(|e| e.track.as_ref()).expect("track");
        let second = scene.get(limbs[1]).and_then(|e| e.track.as_ref()).expect("track");
        assert_eq!(times(first), vec![10.0, 30.0]);
        assert_eq!(times(second), vec![0.0, 20.0]);
    }
}

//! JSON-friendly summary of a spawned swarm.

use serde::{Deserialize, Serialize};
use swarmwalk_core::{AnimationTrack, Placement, Scene, SwarmReport};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSummary {
    pub name: String,
    pub template: bool,
    /// Base location after placement and any sentinel relocation.
    pub location: [f32; 3],
    pub facing: f32,
    pub placement: Placement,
    pub relocated: bool,
    pub seed: u64,
    pub keys: usize,
    pub rebound_edges: usize,
    pub unresolved_edges: usize,
    pub track: Option<AnimationTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmSummary {
    pub template: String,
    pub closure_len: usize,
    pub recovered_dependencies: usize,
    pub obstacles: usize,
    pub forced_placements: usize,
    pub unresolved_edges: usize,
    pub relocated: usize,
    pub agents: Vec<AgentSummary>,
}

impl SwarmSummary {
    #[must_use]
    pub fn from_report(scene: &Scene, report: &SwarmReport) -> Self {
        let agents = report
            .agents
            .iter()
            .map(|agent| {
                let entity = scene.get(agent.root);
                let location = entity.map_or([0.0; 3], |e| {
                    let l = e.transform.location;
                    [l.x, l.y, l.z]
                });
                AgentSummary {
                    name: agent.name.clone(),
                    template: agent.template,
                    location,
                    facing: agent.facing,
                    placement: agent.placement,
                    relocated: agent.relocated,
                    seed: agent.seed,
                    keys: agent.keys,
                    rebound_edges: agent.rebind.as_ref().map_or(0, |r| r.rebound()),
                    unresolved_edges: agent.rebind.as_ref().map_or(0, |r| r.unresolved.len()),
                    track: entity.and_then(|e| e.track.clone()),
                }
            })
            .collect();
        Self {
            template: scene.name(report.template).to_owned(),
            closure_len: report.closure_len,
            recovered_dependencies: report.recovered,
            obstacles: report.obstacles,
            forced_placements: report.forced_placements(),
            unresolved_edges: report.unresolved_edges(),
            relocated: report.relocated(),
            agents,
        }
    }
}

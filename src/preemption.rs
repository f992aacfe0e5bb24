//! Priority-1 (emergency) preemption and priority-2 (transit) bias (§4.3).
//!
//! Priority-2 only biases `effective_priority` in `scheduler.rs`; this module
//! owns the priority-1 override state machine: selecting the FIFO head,
//! clearing conflicting greens through orange, granting the override green,
//! and releasing it (again through orange, honoring I3) once the lane
//! disappears from the inbound queue. The override green is additionally
//! held back until `ctx.bridge_fully_closed()`, so a prio-1 vehicle never
//! gets green while a bridge session it just cancelled is still closing
//! (§4.2's cancellation protocol).

use std::collections::HashSet;
use std::time::Instant;

use crate::context::ControllerContext;
use crate::direction::Phase;
use crate::sensors::PriorityEntry;

#[derive(Debug, Clone)]
pub enum PreemptionPhase {
    Inactive,
    /// Waiting for conflicting greens to clear to red before granting the
    /// override.
    Clearing {
        dir_id: u32,
        active_lane: String,
        clearing: HashSet<u32>,
    },
    /// The override direction is green.
    Active { dir_id: u32, active_lane: String },
    /// The override lane left the queue; waiting for the orange interval
    /// before the scheduler may resume.
    Releasing { dir_id: u32 },
}

pub struct PreemptionState {
    pub phase: PreemptionPhase,
}

impl PreemptionState {
    pub fn new() -> Self {
        Self {
            phase: PreemptionPhase::Inactive,
        }
    }
}

impl Default for PreemptionState {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO head among queued priority-1 entries whose direction is not part of
/// the protected bridge cluster (§4.3: such entries are ignored).
fn select_target<'a>(ctx: &'a ControllerContext) -> Option<(&'a PriorityEntry, u32)> {
    ctx.sensors
        .priority_queue
        .iter()
        .filter(|e| e.priority == 1)
        .filter_map(|e| e.direction_id().map(|d| (e, d)))
        .filter(|(_, d)| !ctx.is_protected(*d))
        .min_by_key(|(e, _)| e.sim_time_ms)
}

fn queue_still_has(ctx: &ControllerContext, lane: &str) -> bool {
    ctx.sensors
        .priority_queue
        .iter()
        .any(|e| e.priority == 1 && e.lane == lane)
}

pub fn tick(ctx: &mut ControllerContext, state: &mut PreemptionState, now: Instant) {
    match std::mem::replace(&mut state.phase, PreemptionPhase::Inactive) {
        PreemptionPhase::Inactive => {
            if let Some((entry, dir_id)) = select_target(ctx) {
                let active_lane = entry.lane.clone();

                // Directions that truly conflict with dir_id and are currently
                // non-red. Fall back to any other non-protected, currently
                // green direction if there are no true conflicts (§4.3).
                let true_conflicts: HashSet<u32> = ctx
                    .directions
                    .values()
                    .filter(|d| d.id != dir_id && !ctx.is_protected(d.id))
                    .filter(|d| d.phase != Phase::Red)
                    .filter(|d| {
                        d.conflicts_with(dir_id)
                            || ctx
                                .directions
                                .get(&dir_id)
                                .is_some_and(|target| target.conflicts_with(d.id))
                    })
                    .map(|d| d.id)
                    .collect();

                let clearing = if !true_conflicts.is_empty() {
                    true_conflicts
                } else {
                    ctx.directions
                        .values()
                        .filter(|d| d.id != dir_id && !ctx.is_protected(d.id))
                        .filter(|d| d.phase != Phase::Red)
                        .map(|d| d.id)
                        .collect()
                };

                // Everything else not in the clearing set and not the target
                // goes straight to red (it is already non-green by construction
                // of `clearing`, this just makes that explicit).
                for (&id, dir) in ctx.directions.iter_mut() {
                    if id == dir_id || ctx.protected_bridge_cluster.contains(&id) {
                        continue;
                    }
                    if clearing.contains(&id) {
                        if dir.phase == Phase::Green {
                            dir.enter_orange(now);
                        }
                    } else {
                        dir.enter_red();
                    }
                }

                log::info!(
                    "prio-1: activating direction {dir_id} (lane {active_lane}), clearing {clearing:?}"
                );
                ctx.active_prio1_direction = Some(dir_id);
                ctx.active_prio1_lane = Some(active_lane.clone());

                // A bridge session may still be closing; §4.2's cancellation
                // protocol forbids granting prio-1 green until the bridge is
                // observed dicht, not just commanded red.
                let conflicts_clear = clearing.iter().all(|id| {
                    ctx.directions
                        .get(id)
                        .map(|d| d.phase == Phase::Red)
                        .unwrap_or(true)
                });
                if conflicts_clear && ctx.bridge_fully_closed() {
                    if let Some(dir) = ctx.directions.get_mut(&dir_id) {
                        dir.enter_green(now);
                    }
                    state.phase = PreemptionPhase::Active { dir_id, active_lane };
                } else {
                    state.phase = PreemptionPhase::Clearing {
                        dir_id,
                        active_lane,
                        clearing,
                    };
                }
            } else {
                state.phase = PreemptionPhase::Inactive;
            }
        }

        PreemptionPhase::Clearing {
            dir_id,
            active_lane,
            clearing,
        } => {
            if !queue_still_has(ctx, &active_lane) {
                ctx.active_prio1_direction = None;
                ctx.active_prio1_lane = None;
                state.phase = PreemptionPhase::Inactive;
                return;
            }
            let all_red = clearing.iter().all(|id| {
                ctx.directions
                    .get(id)
                    .map(|d| d.phase == Phase::Red)
                    .unwrap_or(true)
            });
            if all_red && ctx.bridge_fully_closed() {
                if let Some(dir) = ctx.directions.get_mut(&dir_id) {
                    dir.enter_green(now);
                }
                log::info!("prio-1: direction {dir_id} granted override green");
                state.phase = PreemptionPhase::Active { dir_id, active_lane };
            } else {
                state.phase = PreemptionPhase::Clearing {
                    dir_id,
                    active_lane,
                    clearing,
                };
            }
        }

        PreemptionPhase::Active { dir_id, active_lane } => {
            if queue_still_has(ctx, &active_lane) {
                state.phase = PreemptionPhase::Active { dir_id, active_lane };
            } else {
                log::info!("prio-1: lane {active_lane} left the queue, releasing direction {dir_id}");
                if let Some(dir) = ctx.directions.get_mut(&dir_id) {
                    if dir.phase == Phase::Green {
                        dir.enter_orange(now);
                    }
                }
                state.phase = PreemptionPhase::Releasing { dir_id };
            }
        }

        PreemptionPhase::Releasing { dir_id } => {
            let cleared = ctx
                .directions
                .get(&dir_id)
                .map(|d| d.phase == Phase::Red)
                .unwrap_or(true);
            if cleared {
                ctx.active_prio1_direction = None;
                ctx.active_prio1_lane = None;
                log::info!("prio-1: override for direction {dir_id} fully released");
                state.phase = PreemptionPhase::Inactive;
            } else {
                state.phase = PreemptionPhase::Releasing { dir_id };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::direction::{Direction, Lane};
    use crate::scheduler::advance_oranges;
    use std::collections::HashMap;
    use std::time::Duration;

    fn ctx_with_conflict() -> ControllerContext {
        let now = Instant::now();
        let mut directions = HashMap::new();
        directions.insert(5u32, Direction::new(5, [7].into_iter().collect(), vec![Lane::new("5.1".into())], now));
        directions.insert(7u32, Direction::new(7, [5].into_iter().collect(), vec![Lane::new("7.1".into())], now));
        let mut cfg = Config::default();
        cfg.orange_duration = Duration::from_millis(50);
        let mut ctx = ControllerContext::new(cfg, directions);
        ctx.directions.get_mut(&5).unwrap().enter_green(now);
        ctx
    }

    #[test]
    fn scenario_prio1_preempts_conflicting_green() {
        let mut ctx = ctx_with_conflict();
        ctx.sensors.priority_queue.push(PriorityEntry {
            lane: "7.1".to_string(),
            priority: 1,
            sim_time_ms: 100,
        });
        let mut st = PreemptionState::new();
        let t0 = Instant::now();
        tick(&mut ctx, &mut st, t0);
        assert_eq!(ctx.directions[&5].phase, Phase::Orange);
        assert_eq!(ctx.active_prio1_direction, Some(7));
        assert!(matches!(st.phase, PreemptionPhase::Clearing { .. }));

        let t1 = t0 + Duration::from_millis(60);
        advance_oranges(&mut ctx, t1);
        tick(&mut ctx, &mut st, t1);
        assert_eq!(ctx.directions[&5].phase, Phase::Red);
        assert_eq!(ctx.directions[&7].phase, Phase::Green);
        assert!(matches!(st.phase, PreemptionPhase::Active { .. }));
    }

    /// §4.2 scenario 4: prio-1 arrives for a non-protected direction while a
    /// bridge session is still closing. Conflicting greens clear normally,
    /// but the override green is withheld until the bridge is observed
    /// dicht, not merely commanded red.
    #[test]
    fn prio1_green_withheld_until_bridge_fully_closed() {
        use crate::bridge::{CommandedBridgeState, PhysicalBridgeState};

        let mut ctx = ctx_with_conflict();
        ctx.bridge_session_active = true;
        ctx.protected_bridge_cluster = [71u32, 72u32].into_iter().collect();
        ctx.bridge.commanded_state = CommandedBridgeState::Red;
        ctx.bridge.physical_state = PhysicalBridgeState::Open;

        ctx.sensors.priority_queue.push(PriorityEntry {
            lane: "7.1".to_string(),
            priority: 1,
            sim_time_ms: 100,
        });
        let mut st = PreemptionState::new();
        let t0 = Instant::now();
        tick(&mut ctx, &mut st, t0);
        assert_eq!(ctx.directions[&5].phase, Phase::Orange);

        let t1 = t0 + Duration::from_millis(60);
        advance_oranges(&mut ctx, t1);
        tick(&mut ctx, &mut st, t1);
        assert_eq!(ctx.directions[&5].phase, Phase::Red);
        // Conflicts are clear, but the bridge is still physically open.
        assert_eq!(ctx.directions[&7].phase, Phase::Red);
        assert!(matches!(st.phase, PreemptionPhase::Clearing { .. }));

        ctx.bridge.physical_state = PhysicalBridgeState::Dicht;
        let t2 = t1 + Duration::from_millis(1);
        tick(&mut ctx, &mut st, t2);
        assert_eq!(ctx.directions[&7].phase, Phase::Green);
        assert!(matches!(st.phase, PreemptionPhase::Active { .. }));
    }

    #[test]
    fn deactivation_releases_through_orange() {
        let mut ctx = ctx_with_conflict();
        ctx.sensors.priority_queue.push(PriorityEntry {
            lane: "7.1".to_string(),
            priority: 1,
            sim_time_ms: 100,
        });
        let mut st = PreemptionState::new();
        let t0 = Instant::now();
        tick(&mut ctx, &mut st, t0);
        let t1 = t0 + Duration::from_millis(60);
        advance_oranges(&mut ctx, t1);
        tick(&mut ctx, &mut st, t1);
        assert_eq!(ctx.directions[&7].phase, Phase::Green);

        ctx.sensors.priority_queue.clear();
        let t2 = t1 + Duration::from_millis(10);
        tick(&mut ctx, &mut st, t2);
        assert_eq!(ctx.directions[&7].phase, Phase::Orange);
        assert!(ctx.active_prio1_direction.is_some());

        let t3 = t2 + Duration::from_millis(60);
        advance_oranges(&mut ctx, t3);
        tick(&mut ctx, &mut st, t3);
        assert_eq!(ctx.directions[&7].phase, Phase::Red);
        assert!(ctx.active_prio1_direction.is_none());
        assert!(matches!(st.phase, PreemptionPhase::Inactive));
    }
}

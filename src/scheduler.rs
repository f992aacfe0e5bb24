//! Phase Scheduler (§4.1): conflict-free green-set selection with aging,
//! driven through an orange intermediate phase, plus mid-green augmentation.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::context::ControllerContext;
use crate::direction::Phase;
use crate::jam::is_jam_blocked;

#[derive(Debug, Clone)]
pub enum SchedulerPhase {
    Idle,
    Green {
        set: HashSet<u32>,
        started_at: Instant,
        duration: Duration,
    },
    Transition {
        set: HashSet<u32>,
    },
}

pub struct SchedulerState {
    pub phase: SchedulerPhase,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            phase: SchedulerPhase::Idle,
        }
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// §4.1 "Effective priority": demand + aging bonus + prio-2 bonus. The
/// prio-2 bonus only applies while no prio-1 vehicle is active (§4.3).
pub fn effective_priority(ctx: &ControllerContext, id: u32, now: Instant) -> u64 {
    let dir = match ctx.directions.get(&id) {
        Some(d) => d,
        None => return 0,
    };
    let demand = dir.demand();
    let aging = now
        .duration_since(dir.last_green_at)
        .as_secs()
        / ctx.config.aging_bucket.as_secs().max(1);
    let prio2 = if ctx.active_prio1_direction.is_none() && has_prio2(ctx, id) {
        ctx.config.prio2_bonus
    } else {
        0
    };
    demand + aging + prio2
}

fn has_prio2(ctx: &ControllerContext, id: u32) -> bool {
    ctx.sensors
        .priority_queue
        .iter()
        .any(|e| e.priority == 2 && e.direction_id() == Some(id))
}

/// §4.1 step 1: all directions eligible for candidacy this tick.
fn candidate_pool(ctx: &ControllerContext, now: Instant, exclude: &HashSet<u32>) -> Vec<u32> {
    let bridge_cluster = ctx.bridge_conflict_cluster();
    let bridge_closed = ctx.bridge_fully_closed();

    let mut pool: Vec<u32> = ctx
        .directions
        .values()
        .filter(|d| d.demand() > 0)
        .filter(|d| !ctx.is_protected(d.id))
        .filter(|d| !is_jam_blocked(ctx, d.id))
        .filter(|d| bridge_closed || !bridge_cluster.contains(&d.id))
        .filter(|d| !exclude.contains(&d.id))
        .map(|d| d.id)
        .collect();

    pool.sort_by(|&a, &b| {
        let pa = effective_priority(ctx, a, now);
        let pb = effective_priority(ctx, b, now);
        pb.cmp(&pa).then(a.cmp(&b))
    });
    pool
}

/// §4.1 steps 2-3: sort by effective priority desc / id asc, greedily pick a
/// conflict-free subset.
fn greedy_select(ctx: &ControllerContext, candidates: &[u32], seed: &HashSet<u32>) -> HashSet<u32> {
    let mut chosen: HashSet<u32> = seed.clone();
    for &id in candidates {
        let dir = match ctx.directions.get(&id) {
            Some(d) => d,
            None => continue,
        };
        let conflicts_with_chosen = chosen.iter().any(|&c| {
            dir.conflicts_with(c) || ctx.directions.get(&c).is_some_and(|cd| cd.conflicts_with(id))
        });
        if !conflicts_with_chosen {
            chosen.insert(id);
        }
    }
    chosen
}

/// §4.1 "Dynamic green": base, +2s if the aggregate effective priority of
/// the (non-protected) green set is high, else base.
fn dynamic_duration(ctx: &ControllerContext, set: &HashSet<u32>, now: Instant) -> Duration {
    let sum: u64 = set.iter().map(|&id| effective_priority(ctx, id, now)).sum();
    if sum >= 6 {
        ctx.config.base_green_duration + ctx.config.dynamic_green_bonus
    } else {
        ctx.config.base_green_duration
    }
}

/// Advances every non-protected direction's orange->red clock. Runs
/// unconditionally each tick, independent of scheduler state, so that
/// jam-evicted directions (which may not belong to the scheduler's own
/// green set bookkeeping in the same tick) still clear correctly (§4.4).
pub fn advance_oranges(ctx: &mut ControllerContext, now: Instant) {
    let orange_duration = ctx.config.orange_duration;
    let protected = ctx.protected_bridge_cluster.clone();
    for (&id, dir) in ctx.directions.iter_mut() {
        if protected.contains(&id) {
            continue;
        }
        if dir.phase == Phase::Orange {
            if let Some(started) = dir.orange_started_at {
                if now.duration_since(started) >= orange_duration {
                    dir.enter_red();
                }
            }
        }
    }
}

/// One scheduler tick. No-op while a prio-1 override is active (§4.1 "Any
/// state may be preempted").
pub fn tick(ctx: &mut ControllerContext, state: &mut SchedulerState, now: Instant) {
    if ctx.active_prio1_direction.is_some() {
        return;
    }

    match std::mem::replace(&mut state.phase, SchedulerPhase::Idle) {
        SchedulerPhase::Idle => {
            let candidates = candidate_pool(ctx, now, &HashSet::new());
            let chosen = greedy_select(ctx, &candidates, &HashSet::new());
            if chosen.is_empty() {
                state.phase = SchedulerPhase::Idle;
            } else {
                for &id in &chosen {
                    if let Some(dir) = ctx.directions.get_mut(&id) {
                        dir.enter_green(now);
                    }
                }
                let duration = dynamic_duration(ctx, &chosen, now);
                log::info!("scheduler: entering green {chosen:?} for {duration:?}");
                state.phase = SchedulerPhase::Green {
                    set: chosen,
                    started_at: now,
                    duration,
                };
            }
        }

        SchedulerPhase::Green {
            mut set,
            mut started_at,
            mut duration,
        } => {
            // Mid-green augmentation (§4.1): add compatible demanding
            // directions, resetting the overall green timer.
            let extra_candidates = candidate_pool(ctx, now, &set);
            let augmented = greedy_select(ctx, &extra_candidates, &set);
            if augmented.len() > set.len() {
                let added: Vec<u32> = augmented.difference(&set).copied().collect();
                for &id in &added {
                    if let Some(dir) = ctx.directions.get_mut(&id) {
                        dir.enter_green(now);
                    }
                }
                log::info!("scheduler: mid-green augmentation added {added:?}");
                set = augmented;
                started_at = now;
                duration = dynamic_duration(ctx, &set, now);
            }

            if now.duration_since(started_at) >= duration {
                for &id in &set {
                    if let Some(dir) = ctx.directions.get_mut(&id) {
                        if dir.phase == Phase::Green {
                            dir.enter_orange(now);
                        }
                    }
                }
                log::info!("scheduler: green set {set:?} entering orange");
                state.phase = SchedulerPhase::Transition { set };
            } else {
                state.phase = SchedulerPhase::Green {
                    set,
                    started_at,
                    duration,
                };
            }
        }

        SchedulerPhase::Transition { set } => {
            let all_red = set
                .iter()
                .all(|id| ctx.directions.get(id).map(|d| d.phase == Phase::Red).unwrap_or(true));
            if all_red {
                let candidates = candidate_pool(ctx, now, &HashSet::new());
                let chosen = greedy_select(ctx, &candidates, &HashSet::new());
                if chosen.is_empty() {
                    state.phase = SchedulerPhase::Idle;
                } else {
                    for &id in &chosen {
                        if let Some(dir) = ctx.directions.get_mut(&id) {
                            dir.enter_green(now);
                        }
                    }
                    let duration = dynamic_duration(ctx, &chosen, now);
                    log::info!("scheduler: entering green {chosen:?} for {duration:?}");
                    state.phase = SchedulerPhase::Green {
                        set: chosen,
                        started_at: now,
                        duration,
                    };
                }
            } else {
                state.phase = SchedulerPhase::Transition { set };
            }
        }
    }
}

//! Bridge Session Controller (§4.2): stops road traffic across the bridge,
//! opens the bridge signal, sequences vessel passage on each armed approach,
//! then restores road traffic. Advanced once per tick, like the scheduler;
//! long waits are tracked as (started_at, cap) pairs rather than blocking
//! sleeps, so the same tick loop drives every suspension point in §5.

use std::collections::HashSet;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::bridge::{CommandedBridgeState, PhysicalBridgeState};
use crate::context::ControllerContext;
use crate::direction::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproachSide {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStep {
    Green,
    Orange,
    Grace,
    Recheck,
}

#[derive(Debug, Clone)]
pub enum BridgeSessionPhase {
    Idle,
    Arming {
        clearing: HashSet<u32>,
    },
    DeckClear {
        consecutive_clear: u32,
        polls: u32,
    },
    BarrierClosing {
        since: Instant,
    },
    Opening {
        polls: u32,
    },
    Pass {
        side: ApproachSide,
        step: PassStep,
        since: Instant,
    },
    Draining {
        consecutive_clear: u32,
        polls: u32,
    },
    Closing {
        polls: u32,
    },
    BarrierOpening {
        since: Instant,
    },
    Restore,
}

pub struct BridgeSessionState {
    pub phase: BridgeSessionPhase,
    /// Exposed so the priority-1 handler can cancel the running session
    /// (§5). Replaced with a fresh token each time a session starts, since a
    /// cancelled token stays cancelled.
    pub cancel: CancellationToken,
    pass_a_needed: bool,
    pass_b_needed: bool,
}

impl BridgeSessionState {
    pub fn new() -> Self {
        Self {
            phase: BridgeSessionPhase::Idle,
            cancel: CancellationToken::new(),
            pass_a_needed: false,
            pass_b_needed: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.phase, BridgeSessionPhase::Idle)
    }
}

impl Default for BridgeSessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// §4.2 eligibility gate.
fn eligible(ctx: &ControllerContext, now: Instant) -> bool {
    if ctx.active_prio1_direction.is_some() {
        return false;
    }
    if ctx.bridge_session_active {
        return false;
    }
    if ctx.cycle_used {
        return false;
    }
    if let Some(closed_at) = ctx.last_bridge_closed_at {
        if now.duration_since(closed_at) < ctx.config.bridge_cooldown {
            return false;
        }
    }
    let demand_a = ctx
        .directions
        .get(&ctx.bridge.approach_a)
        .map(|d| d.demand() > 0)
        .unwrap_or(false);
    let demand_b = ctx
        .directions
        .get(&ctx.bridge.approach_b)
        .map(|d| d.demand() > 0)
        .unwrap_or(false);
    demand_a || demand_b
}

/// Advances the post-bridge 30s window: once it elapses, `cycle_used` clears
/// so a new session may be armed. Runs every tick regardless of session state.
pub fn advance_post_bridge_window(ctx: &mut ControllerContext, now: Instant) {
    if let Some(until) = ctx.post_bridge_until {
        if now >= until {
            ctx.cycle_used = false;
            ctx.post_bridge_until = None;
        }
    }
}

fn enter_restore(ctx: &mut ControllerContext, state: &mut BridgeSessionState, now: Instant) {
    let crossing = ctx.crossing_set();
    for id in crossing {
        if let Some(dir) = ctx.directions.get_mut(&id) {
            dir.enter_green(now);
        }
    }
    ctx.last_bridge_closed_at = Some(now);
    ctx.cycle_used = true;
    ctx.post_bridge_until = Some(now + ctx.config.post_bridge_window);
    ctx.bridge_session_active = false;
    ctx.protected_bridge_cluster.clear();
    log::info!("bridge session: restored, cooldown and post-bridge window started");
    state.phase = BridgeSessionPhase::Idle;
}

/// Forces the bridge red and jumps the session into draining, per the §4.2
/// cancellation protocol. No-op once the session is already closing/restored.
fn force_cancel_to_draining(ctx: &mut ControllerContext, state: &mut BridgeSessionState) {
    if matches!(
        state.phase,
        BridgeSessionPhase::Closing { .. }
            | BridgeSessionPhase::BarrierOpening { .. }
            | BridgeSessionPhase::Restore
            | BridgeSessionPhase::Idle
    ) {
        return;
    }
    ctx.bridge.commanded_state = CommandedBridgeState::Red;
    if ctx.bridge.physical_state == PhysicalBridgeState::Dicht {
        log::info!("bridge session: cancelled, bridge already dicht, reverting to restore");
        state.phase = BridgeSessionPhase::Restore;
    } else {
        log::info!("bridge session: cancelled, draining before closing");
        state.phase = BridgeSessionPhase::Draining {
            consecutive_clear: 0,
            polls: 0,
        };
    }
}

/// One bridge-session tick. The session's own cancellation token (§5) is
/// checked once per tick, before the phase's own logic runs.
pub fn tick(ctx: &mut ControllerContext, state: &mut BridgeSessionState, now: Instant) {
    if state.cancel.is_cancelled() && state.is_active() {
        force_cancel_to_draining(ctx, state);
    }

    match std::mem::replace(&mut state.phase, BridgeSessionPhase::Idle) {
        BridgeSessionPhase::Idle => {
            if eligible(ctx, now) {
                state.cancel = CancellationToken::new();
                let cluster = ctx.bridge_conflict_cluster();
                ctx.protected_bridge_cluster = cluster.clone();
                ctx.bridge_session_active = true;
                ctx.bridge.commanded_state = CommandedBridgeState::Red;

                let clearing: HashSet<u32> = cluster
                    .iter()
                    .copied()
                    .filter(|id| {
                        ctx.directions
                            .get(id)
                            .map(|d| d.phase != Phase::Red)
                            .unwrap_or(false)
                    })
                    .collect();
                for &id in &clearing {
                    if let Some(dir) = ctx.directions.get_mut(&id) {
                        if dir.phase == Phase::Green {
                            dir.enter_orange(now);
                        }
                    }
                }

                state.pass_a_needed = ctx
                    .directions
                    .get(&ctx.bridge.approach_a)
                    .map(|d| d.demand() > 0)
                    .unwrap_or(false);
                state.pass_b_needed = ctx
                    .directions
                    .get(&ctx.bridge.approach_b)
                    .map(|d| d.demand() > 0)
                    .unwrap_or(false);

                log::info!("bridge session: arming, clearing {clearing:?}");
                state.phase = BridgeSessionPhase::Arming { clearing };
            } else {
                state.phase = BridgeSessionPhase::Idle;
            }
        }

        BridgeSessionPhase::Arming { clearing } => {
            // Cluster members never get a second orange from elsewhere (I3);
            // force any lingering orange straight through once its own timer
            // is done, same rule the scheduler applies outside the cluster.
            let orange_duration = ctx.config.orange_duration;
            for &id in &clearing {
                if let Some(dir) = ctx.directions.get_mut(&id) {
                    if dir.phase == Phase::Orange {
                        if let Some(started) = dir.orange_started_at {
                            if now.duration_since(started) >= orange_duration {
                                dir.enter_red();
                            }
                        }
                    }
                }
            }
            let all_red = clearing.iter().all(|id| {
                ctx.directions
                    .get(id)
                    .map(|d| d.phase == Phase::Red)
                    .unwrap_or(true)
            });
            if all_red {
                log::info!("bridge session: armed, waiting for deck clear");
                state.phase = BridgeSessionPhase::DeckClear {
                    consecutive_clear: 0,
                    polls: 0,
                };
            } else {
                state.phase = BridgeSessionPhase::Arming { clearing };
            }
        }

        BridgeSessionPhase::DeckClear {
            mut consecutive_clear,
            mut polls,
        } => {
            if ctx.sensors.vehicle_on_deck {
                consecutive_clear = 0;
            } else {
                consecutive_clear += 1;
            }
            polls += 1;
            if consecutive_clear >= 2 {
                log::info!("bridge session: deck clear, starting barrier close delay");
                state.phase = BridgeSessionPhase::BarrierClosing { since: now };
            } else if polls >= ctx.config.deck_clear_poll_cap {
                log::warn!("bridge session: deck-clear poll cap exceeded, proceeding");
                state.phase = BridgeSessionPhase::BarrierClosing { since: now };
            } else {
                state.phase = BridgeSessionPhase::DeckClear {
                    consecutive_clear,
                    polls,
                };
            }
        }

        BridgeSessionPhase::BarrierClosing { since } => {
            if now.duration_since(since) >= ctx.config.barrier_delay {
                ctx.bridge.commanded_state = CommandedBridgeState::Green;
                log::info!("bridge session: opening bridge signal");
                state.phase = BridgeSessionPhase::Opening { polls: 0 };
            } else {
                state.phase = BridgeSessionPhase::BarrierClosing { since };
            }
        }

        BridgeSessionPhase::Opening { mut polls } => {
            if ctx.bridge.physical_state == PhysicalBridgeState::Open {
                let side = if state.pass_a_needed {
                    ApproachSide::A
                } else {
                    ApproachSide::B
                };
                log::info!("bridge session: open, starting pass for {side:?}");
                state.phase = BridgeSessionPhase::Pass {
                    side,
                    step: PassStep::Green,
                    since: now,
                };
            } else {
                polls += 1;
                if polls >= ctx.config.opening_poll_cap {
                    log::warn!("bridge session: opening poll cap exceeded, proceeding as if open");
                    let side = if state.pass_a_needed {
                        ApproachSide::A
                    } else {
                        ApproachSide::B
                    };
                    state.phase = BridgeSessionPhase::Pass {
                        side,
                        step: PassStep::Green,
                        since: now,
                    };
                } else {
                    state.phase = BridgeSessionPhase::Opening { polls };
                }
            }
        }

        BridgeSessionPhase::Pass { side, step, since } => {
            // Demand appearing on B during A's pass also arms B (§4.2 step 5).
            if side == ApproachSide::A
                && ctx
                    .directions
                    .get(&ctx.bridge.approach_b)
                    .map(|d| d.demand() > 0)
                    .unwrap_or(false)
            {
                state.pass_b_needed = true;
            }

            let approach_id = match side {
                ApproachSide::A => ctx.bridge.approach_a,
                ApproachSide::B => ctx.bridge.approach_b,
            };

            match step {
                PassStep::Green => {
                    if let Some(dir) = ctx.directions.get_mut(&approach_id) {
                        if dir.phase != Phase::Green {
                            dir.enter_green(now);
                        }
                    }
                    if now.duration_since(since) >= ctx.config.bridge_pass_green {
                        if let Some(dir) = ctx.directions.get_mut(&approach_id) {
                            dir.enter_orange(now);
                        }
                        state.phase = BridgeSessionPhase::Pass {
                            side,
                            step: PassStep::Orange,
                            since: now,
                        };
                    } else {
                        state.phase = BridgeSessionPhase::Pass { side, step, since };
                    }
                }
                PassStep::Orange => {
                    if now.duration_since(since) >= ctx.config.bridge_pass_orange {
                        state.phase = BridgeSessionPhase::Pass {
                            side,
                            step: PassStep::Grace,
                            since: now,
                        };
                    } else {
                        state.phase = BridgeSessionPhase::Pass { side, step, since };
                    }
                }
                PassStep::Grace => {
                    if now.duration_since(since) >= ctx.config.bridge_pass_grace {
                        if let Some(dir) = ctx.directions.get_mut(&approach_id) {
                            dir.enter_red();
                        }
                        state.phase = BridgeSessionPhase::Pass {
                            side,
                            step: PassStep::Recheck,
                            since: now,
                        };
                    } else {
                        state.phase = BridgeSessionPhase::Pass { side, step, since };
                    }
                }
                PassStep::Recheck => {
                    if !ctx.sensors.vessel_under_bridge {
                        advance_past_pass(state, side, now);
                    } else if now.duration_since(since) >= ctx.config.bridge_vessel_recheck {
                        state.phase = BridgeSessionPhase::Pass {
                            side,
                            step: PassStep::Recheck,
                            since: now,
                        };
                    } else {
                        state.phase = BridgeSessionPhase::Pass { side, step, since };
                    }
                }
            }
        }

        BridgeSessionPhase::Draining {
            mut consecutive_clear,
            mut polls,
        } => {
            if ctx.sensors.vessel_under_bridge {
                consecutive_clear = 0;
            } else {
                consecutive_clear += 1;
            }
            polls += 1;
            if consecutive_clear >= 4 {
                ctx.bridge.commanded_state = CommandedBridgeState::Red;
                log::info!("bridge session: drained, closing bridge signal");
                state.phase = BridgeSessionPhase::Closing { polls: 0 };
            } else if polls >= ctx.config.draining_poll_cap {
                log::warn!("bridge session: draining poll cap exceeded, proceeding");
                ctx.bridge.commanded_state = CommandedBridgeState::Red;
                state.phase = BridgeSessionPhase::Closing { polls: 0 };
            } else {
                state.phase = BridgeSessionPhase::Draining {
                    consecutive_clear,
                    polls,
                };
            }
        }

        BridgeSessionPhase::Closing { mut polls } => {
            if ctx.bridge.physical_state == PhysicalBridgeState::Dicht {
                log::info!("bridge session: closed, starting barrier open delay");
                state.phase = BridgeSessionPhase::BarrierOpening { since: now };
            } else {
                polls += 1;
                if polls >= ctx.config.closing_poll_cap {
                    log::warn!("bridge session: closing poll cap exceeded, proceeding as if dicht");
                    state.phase = BridgeSessionPhase::BarrierOpening { since: now };
                } else {
                    state.phase = BridgeSessionPhase::Closing { polls };
                }
            }
        }

        BridgeSessionPhase::BarrierOpening { since } => {
            if now.duration_since(since) >= ctx.config.barrier_delay {
                enter_restore(ctx, state, now);
            } else {
                state.phase = BridgeSessionPhase::BarrierOpening { since };
            }
        }

        BridgeSessionPhase::Restore => {
            enter_restore(ctx, state, now);
        }
    }
}

fn advance_past_pass(state: &mut BridgeSessionState, side: ApproachSide, now: Instant) {
    let next_is_b = side == ApproachSide::A && state.pass_b_needed;
    if next_is_b {
        log::info!("bridge session: A's pass complete, starting B's pass");
        state.phase = BridgeSessionPhase::Pass {
            side: ApproachSide::B,
            step: PassStep::Green,
            since: now,
        };
    } else {
        log::info!("bridge session: passes complete, draining");
        state.phase = BridgeSessionPhase::Draining {
            consecutive_clear: 0,
            polls: 0,
        };
    }
}

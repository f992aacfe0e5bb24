//! End-to-end scenarios against compressed durations, one per concrete
//! example walked through in the design.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use stoplicht_controller::bridge_session::{self, BridgeSessionPhase, BridgeSessionState};
use stoplicht_controller::config::Config;
use stoplicht_controller::context::ControllerContext;
use stoplicht_controller::direction::{Direction, Lane, Phase};
use stoplicht_controller::jam;
use stoplicht_controller::preemption::{self, PreemptionState};
use stoplicht_controller::scheduler::{self, SchedulerPhase, SchedulerState};
use stoplicht_controller::sensors::PriorityEntry;

fn compressed_config() -> Config {
    let mut cfg = Config::default();
    cfg.orange_duration = Duration::from_millis(30);
    cfg.base_green_duration = Duration::from_millis(50);
    cfg.dynamic_green_bonus = Duration::from_millis(10);
    cfg.aging_bucket = Duration::from_secs(7);
    cfg.bridge_pass_green = Duration::from_millis(30);
    cfg.bridge_pass_orange = Duration::from_millis(20);
    cfg.bridge_pass_grace = Duration::from_millis(5);
    cfg.barrier_delay = Duration::from_millis(5);
    cfg.bridge_vessel_recheck = Duration::from_millis(15);
    cfg.jam_hysteresis = Duration::from_millis(20);
    cfg
}

fn direction(id: u32, conflicts: &[u32], demand: u64, now: Instant) -> Direction {
    let mut lane = Lane::new(format!("{id}.1"));
    if demand >= 5 {
        lane.front = true;
        lane.back = true;
    } else if demand >= 1 {
        lane.front = true;
    }
    Direction::new(id, conflicts.iter().copied().collect(), vec![lane], now)
}

/// Scenario 1: pure road cycle. G={1,3} -> orange -> red; next G={2,3}
/// once direction 1's demand clears.
#[test]
fn pure_road_cycle_rotates_sets() {
    let now = Instant::now();
    let mut directions = HashMap::new();
    directions.insert(1, direction(1, &[2], 5, now));
    directions.insert(2, direction(2, &[1], 1, now));
    directions.insert(3, direction(3, &[], 1, now));
    let mut ctx = ControllerContext::new(compressed_config(), directions);
    let mut sched = SchedulerState::new();

    let t0 = now;
    scheduler::tick(&mut ctx, &mut sched, t0);
    match &sched.phase {
        SchedulerPhase::Green { set, .. } => {
            let mut ids: Vec<u32> = set.iter().copied().collect();
            ids.sort();
            assert_eq!(ids, vec![1, 3]);
        }
        other => panic!("expected Green, got {other:?}"),
    }

    let t1 = t0 + Duration::from_millis(60);
    scheduler::tick(&mut ctx, &mut sched, t1);
    assert_eq!(ctx.directions[&1].phase, Phase::Orange);

    ctx.directions.get_mut(&1).unwrap().lanes[0].front = false;
    ctx.directions.get_mut(&1).unwrap().lanes[0].back = false;

    let t2 = t1 + Duration::from_millis(40);
    scheduler::advance_oranges(&mut ctx, t2);
    scheduler::tick(&mut ctx, &mut sched, t2);
    assert_eq!(ctx.directions[&1].phase, Phase::Red);
    match &sched.phase {
        SchedulerPhase::Green { set, .. } => {
            let mut ids: Vec<u32> = set.iter().copied().collect();
            ids.sort();
            assert_eq!(ids, vec![2, 3]);
        }
        other => panic!("expected Green, got {other:?}"),
    }
}

/// Scenario 2: bridge session with demand on both A and B runs the full
/// ARMING -> ... -> RESTORE sequence and starts the cooldown at exit.
#[test]
fn bridge_session_both_sides_runs_to_restore() {
    let now = Instant::now();
    let mut directions = HashMap::new();
    directions.insert(71, direction(71, &[72], 1, now));
    directions.insert(72, direction(72, &[71], 1, now));
    let mut cfg = compressed_config();
    cfg.bridge_approach_a = 71;
    cfg.bridge_approach_b = 72;
    let mut ctx = ControllerContext::new(cfg, directions);
    ctx.bridge.physical_state = stoplicht_controller::bridge::PhysicalBridgeState::Dicht;
    let mut session = BridgeSessionState::new();

    let mut t = now;
    let mut ticks = 0;
    while !matches!(session.phase, BridgeSessionPhase::Idle) || ticks == 0 {
        bridge_session::advance_post_bridge_window(&mut ctx, t);
        bridge_session::tick(&mut ctx, &mut session, t);

        // The physical bridge answers the last command on the next read.
        ctx.bridge.physical_state = match ctx.bridge.commanded_state {
            stoplicht_controller::bridge::CommandedBridgeState::Green => {
                stoplicht_controller::bridge::PhysicalBridgeState::Open
            }
            stoplicht_controller::bridge::CommandedBridgeState::Red => {
                stoplicht_controller::bridge::PhysicalBridgeState::Dicht
            }
        };

        t += Duration::from_millis(10);
        ticks += 1;
        assert!(ticks < 200, "session did not reach RESTORE within budget");
    }

    assert!(ctx.last_bridge_closed_at.is_some());
    assert!(ctx.cycle_used);
    assert_eq!(ctx.directions[&71].phase, Phase::Red);
    assert_eq!(ctx.directions[&72].phase, Phase::Red);
}

/// Scenario 3: priority-1 during a normal cycle preempts the conflicting
/// green, then releases it once the queue entry disappears.
#[test]
fn priority1_preempts_then_releases() {
    let now = Instant::now();
    let mut directions = HashMap::new();
    directions.insert(5, direction(5, &[7], 1, now));
    directions.insert(7, direction(7, &[5], 0, now));
    let mut ctx = ControllerContext::new(compressed_config(), directions);
    ctx.directions.get_mut(&5).unwrap().enter_green(now);
    ctx.sensors.priority_queue.push(PriorityEntry {
        lane: "7.1".to_string(),
        priority: 1,
        sim_time_ms: 0,
    });

    let mut preempt = PreemptionState::new();
    let t0 = now;
    preemption::tick(&mut ctx, &mut preempt, t0);
    assert_eq!(ctx.directions[&5].phase, Phase::Orange);

    let t1 = t0 + Duration::from_millis(40);
    scheduler::advance_oranges(&mut ctx, t1);
    preemption::tick(&mut ctx, &mut preempt, t1);
    assert_eq!(ctx.directions[&5].phase, Phase::Red);
    assert_eq!(ctx.directions[&7].phase, Phase::Green);

    ctx.sensors.priority_queue.clear();
    let t2 = t1 + Duration::from_millis(1);
    preemption::tick(&mut ctx, &mut preempt, t2);
    assert_eq!(ctx.directions[&7].phase, Phase::Orange);

    let t3 = t2 + Duration::from_millis(40);
    scheduler::advance_oranges(&mut ctx, t3);
    preemption::tick(&mut ctx, &mut preempt, t3);
    assert_eq!(ctx.directions[&7].phase, Phase::Red);
    assert!(ctx.active_prio1_direction.is_none());
}

/// Scenario 5: the jam flag engages after a sustained reading, evicts the
/// blocked directions, then disengages after a sustained clear reading.
#[test]
fn jam_engages_evicts_then_disengages() {
    let now = Instant::now();
    let mut directions = HashMap::new();
    directions.insert(8, direction(8, &[], 1, now));
    let mut ctx = ControllerContext::new(compressed_config(), directions);
    ctx.directions.get_mut(&8).unwrap().enter_green(now);

    ctx.sensors.approach_jam = true;
    jam::update_jam_state(&mut ctx, now);
    assert!(!ctx.jam_engaged);

    let t1 = now + Duration::from_millis(30);
    jam::update_jam_state(&mut ctx, t1);
    assert!(ctx.jam_engaged);
    assert_eq!(ctx.directions[&8].phase, Phase::Orange);

    ctx.sensors.approach_jam = false;
    jam::update_jam_state(&mut ctx, t1 + Duration::from_millis(1));
    let t2 = t1 + Duration::from_millis(35);
    jam::update_jam_state(&mut ctx, t2);
    assert!(!ctx.jam_engaged);
}

/// Scenario 6: with equal aging, a prio-2 bonus decides a conflicting pair.
#[test]
fn priority2_bias_decides_conflict() {
    let now = Instant::now();
    let mut directions = HashMap::new();
    directions.insert(3, direction(3, &[4], 1, now));
    directions.insert(4, direction(4, &[3], 1, now));
    let mut ctx = ControllerContext::new(compressed_config(), directions);
    ctx.sensors.priority_queue.push(PriorityEntry {
        lane: "4.1".to_string(),
        priority: 2,
        sim_time_ms: 0,
    });
    let mut sched = SchedulerState::new();
    scheduler::tick(&mut ctx, &mut sched, now);
    match &sched.phase {
        SchedulerPhase::Green { set, .. } => {
            assert!(set.contains(&4));
            assert!(!set.contains(&3));
        }
        other => panic!("expected Green, got {other:?}"),
    }
}

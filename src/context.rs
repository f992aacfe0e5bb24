//! The shared controller context (§9 design note): directions, the bridge,
//! sensor state and the cross-cutting flags that the scheduler, bridge
//! session and preemption logic all read and write. Resolves the "cyclic
//! references" and "global mutable state" notes by giving every component a
//! `&mut ControllerContext` instead of singletons or mutual setters.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Instant;

use crate::bridge::{Bridge, CommandedBridgeState, PhysicalBridgeState};
use crate::config::Config;
use crate::direction::{Direction, Phase};
use crate::sensors::SensorState;

pub struct ControllerContext {
    pub config: Config,
    pub directions: HashMap<u32, Direction>,
    pub bridge: Bridge,
    pub sensors: SensorState,

    /// Hysteretic jam flag (§4.4) and the instant the current raw reading
    /// started, used to measure the 10s sustain window.
    pub jam_engaged: bool,
    pub jam_edge_since: Option<Instant>,
    /// The `approach_jam` reading as of the last tick, used to detect edges.
    pub jam_last_raw: bool,

    /// Set while a bridge session is running; directions in the cluster are
    /// excluded from ordinary scheduling and held coherently (§4.2/§9).
    pub bridge_session_active: bool,
    pub protected_bridge_cluster: HashSet<u32>,

    /// Direction currently holding a prio-1 override, if any (§4.3).
    pub active_prio1_direction: Option<u32>,
    pub active_prio1_lane: Option<String>,

    pub last_bridge_closed_at: Option<Instant>,
    pub cycle_used: bool,
    pub post_bridge_until: Option<Instant>,
}

impl ControllerContext {
    pub fn new(config: Config, directions: HashMap<u32, Direction>) -> Self {
        let bridge = Bridge::new(
            config.bridge_approach_a,
            config.bridge_approach_b,
            config.bridge_signal_id.clone(),
        );
        Self {
            config,
            directions,
            bridge,
            sensors: SensorState::default(),
            jam_engaged: false,
            jam_edge_since: None,
            jam_last_raw: false,
            bridge_session_active: false,
            protected_bridge_cluster: HashSet::new(),
            active_prio1_direction: None,
            active_prio1_lane: None,
            last_bridge_closed_at: None,
            cycle_used: false,
            post_bridge_until: None,
        }
    }

    /// {A, B} ∪ conflicts(A) ∪ conflicts(B) — the "protected bridge cluster"
    /// (glossary) / "bridge conflict cluster" (§4.1).
    pub fn bridge_conflict_cluster(&self) -> HashSet<u32> {
        let a = self.bridge.approach_a;
        let b = self.bridge.approach_b;
        let mut cluster = HashSet::new();
        cluster.insert(a);
        cluster.insert(b);
        if let Some(da) = self.directions.get(&a) {
            cluster.extend(da.conflicts.iter().copied());
        }
        if let Some(db) = self.directions.get(&b) {
            cluster.extend(db.conflicts.iter().copied());
        }
        cluster
    }

    /// The "crossing set" used by RESTORE (§4.2 step 8): directions other
    /// than A/B that conflict with A, which are safely clear once the
    /// bridge closes.
    pub fn crossing_set(&self) -> Vec<u32> {
        let a = self.bridge.approach_a;
        let b = self.bridge.approach_b;
        self.directions
            .get(&a)
            .map(|da| {
                da.conflicts
                    .iter()
                    .copied()
                    .filter(|&id| id != a && id != b)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_protected(&self, id: u32) -> bool {
        self.protected_bridge_cluster.contains(&id)
    }

    /// §7's "defensive reset": all non-protected directions forced red
    /// through orange is the *session's* job when time allows; this method
    /// is the immediate, unconditional fallback used when recovering from an
    /// unexpected error — all non-protected red, bridge red, crossing green.
    pub fn reset_defensive(&mut self, now: Instant) {
        let crossing = self.crossing_set();
        let cluster = self.protected_bridge_cluster.clone();
        for (&id, dir) in self.directions.iter_mut() {
            if cluster.contains(&id) {
                continue;
            }
            if crossing.contains(&id) {
                dir.enter_green(now);
            } else {
                dir.enter_red();
            }
        }
        self.bridge.commanded_state = CommandedBridgeState::Red;
        log::warn!("defensive reset applied: non-protected red, bridge red, crossing green");
    }

    /// Copies decoded sensor readings onto the domain model (§5 ingest):
    /// each lane's front/back detectors and the bridge's observed physical
    /// state. Must run before jam/preemption/bridge-session/scheduler
    /// advance, since all of them read `Direction.lanes`/`Bridge.physical_state`
    /// rather than `sensors` directly.
    pub fn sync_sensor_state(&mut self) {
        for dir in self.directions.values_mut() {
            for lane in &mut dir.lanes {
                if let Some(&(front, back)) = self.sensors.lane_detectors.get(&lane.id) {
                    lane.front = front;
                    lane.back = back;
                }
            }
        }
        if let Some(physical) = self.sensors.bridge_physical {
            self.bridge.physical_state = physical;
        }
    }

    /// True once the bridge is both commanded closed and observed closed.
    pub fn bridge_fully_closed(&self) -> bool {
        self.bridge.commanded_state == CommandedBridgeState::Red
            && self.bridge.physical_state == PhysicalBridgeState::Dicht
    }

    /// All lanes across all directions plus the bridge signal, mapped to
    /// their current phase name, for the publisher (§4.5).
    pub fn snapshot(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for dir in self.directions.values() {
            let name = match dir.phase {
                Phase::Green => "groen",
                Phase::Orange => "oranje",
                Phase::Red => "rood",
            };
            for lane in &dir.lanes {
                map.insert(lane.id.clone(), name.to_string());
            }
        }
        map.insert(
            self.bridge.signal_id.clone(),
            self.bridge.commanded_state.dutch_name().to_string(),
        );
        map
    }
}

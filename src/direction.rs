//! The static and semi-static parts of the data model: `Phase`, `Lane` and
//! `Direction` (§3). Topology entities are created once at load and only
//! `phase`/`last_green_at` are ever mutated afterward (I3/I4).

use std::collections::HashSet;
use std::time::Instant;

/// One of the three signal phases a direction or the bridge signal can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Green,
    Orange,
    Red,
}

impl Phase {
    /// Dutch phase name used on the outbound `stoplichten` topic (§4.5).
    pub fn dutch_name(self) -> &'static str {
        match self {
            Phase::Green => "groen",
            Phase::Orange => "oranje",
            Phase::Red => "rood",
        }
    }
}

/// One traffic light within a direction, e.g. lane "5.1" of direction 5.
#[derive(Debug, Clone)]
pub struct Lane {
    /// "{dirId}.{laneId}", used verbatim as the outbound signal id.
    pub id: String,
    pub front: bool,
    pub back: bool,
}

impl Lane {
    pub fn new(id: String) -> Self {
        Self {
            id,
            front: false,
            back: false,
        }
    }

    /// §4.1: front ∧ back → 5; front ∨ back → 1; else 0.
    pub fn demand(&self) -> u64 {
        if self.front && self.back {
            5
        } else if self.front || self.back {
            1
        } else {
            0
        }
    }
}

/// One macro-direction at the intersection (§3).
#[derive(Debug, Clone)]
pub struct Direction {
    pub id: u32,
    pub phase: Phase,
    /// Union of both sides' declared conflicts (symmetry is enforced, not assumed).
    pub conflicts: HashSet<u32>,
    pub lanes: Vec<Lane>,
    pub last_green_at: Instant,
    /// Set when this direction's current orange phase began; `None` outside
    /// of an orange phase.
    pub orange_started_at: Option<Instant>,
}

impl Direction {
    pub fn new(id: u32, conflicts: HashSet<u32>, lanes: Vec<Lane>, now: Instant) -> Self {
        Self {
            id,
            phase: Phase::Red,
            conflicts,
            lanes,
            last_green_at: now,
            orange_started_at: None,
        }
    }

    /// Sum of per-lane demand (§4.1).
    pub fn demand(&self) -> u64 {
        self.lanes.iter().map(Lane::demand).sum()
    }

    pub fn conflicts_with(&self, other: u32) -> bool {
        self.conflicts.contains(&other)
    }

    /// Transition into green, resetting the aging clock (I4).
    pub fn enter_green(&mut self, now: Instant) {
        self.phase = Phase::Green;
        self.last_green_at = now;
        self.orange_started_at = None;
    }

    pub fn enter_orange(&mut self, now: Instant) {
        self.phase = Phase::Orange;
        self.orange_started_at = Some(now);
    }

    pub fn enter_red(&mut self) {
        self.phase = Phase::Red;
        self.orange_started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_demand_levels() {
        let mut lane = Lane::new("1.1".to_string());
        assert_eq!(lane.demand(), 0);
        lane.front = true;
        assert_eq!(lane.demand(), 1);
        lane.back = true;
        assert_eq!(lane.demand(), 5);
    }

    #[test]
    fn direction_demand_sums_lanes() {
        let now = Instant::now();
        let mut lanes = vec![Lane::new("1.1".to_string()), Lane::new("1.2".to_string())];
        lanes[0].front = true;
        lanes[1].front = true;
        lanes[1].back = true;
        let dir = Direction::new(1, HashSet::new(), lanes, now);
        assert_eq!(dir.demand(), 6);
    }

    #[test]
    fn enter_green_resets_aging_clock() {
        let t0 = Instant::now();
        let mut dir = Direction::new(1, HashSet::new(), vec![], t0);
        dir.enter_orange(t0);
        assert!(dir.orange_started_at.is_some());
        let t1 = Instant::now();
        dir.enter_green(t1);
        assert_eq!(dir.phase, Phase::Green);
        assert!(dir.orange_started_at.is_none());
        assert_eq!(dir.last_green_at, t1);
    }
}

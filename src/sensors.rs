//! Latest observed sensor values (§3 `SensorState`), mutated by the inbound
//! adapters in `transport::inbound` and read by the scheduler, bridge
//! session and preemption logic. Decode failures never touch the stored
//! state: a payload either parses wholesale and replaces the relevant slice,
//! or it is rejected and the previous value is retained (§7).

use std::collections::HashMap;

use serde::Deserialize;

use crate::bridge::PhysicalBridgeState;
use crate::error::ControlError;

/// `voorrangsvoertuig` queue entry (§3 `PriorityEntry`). Equality by tuple,
/// as specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriorityEntry {
    #[serde(rename = "baan")]
    pub lane: String,
    #[serde(rename = "prioriteit")]
    pub priority: u8,
    #[serde(rename = "simulatie_tijd_ms")]
    pub sim_time_ms: u64,
}

impl PriorityEntry {
    /// The macro-direction id this entry's lane belongs to, e.g. "7.1" -> 7.
    pub fn direction_id(&self) -> Option<u32> {
        self.lane.split('.').next()?.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
struct LaneDetectorPayload {
    voor: bool,
    achter: bool,
}

#[derive(Debug, Deserialize)]
struct SpecialSensorPayload {
    brug_file: bool,
    brug_wegdek: bool,
    brug_water: bool,
}

#[derive(Debug, Deserialize)]
struct BridgeSensorEntry {
    state: String,
}

#[derive(Debug, Deserialize)]
struct PriorityQueuePayload {
    queue: Vec<PriorityEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SensorState {
    /// Per-lane (voor, achter), keyed by the full "{dirId}.{laneId}" id.
    pub lane_detectors: HashMap<String, (bool, bool)>,
    pub approach_jam: bool,
    pub vehicle_on_deck: bool,
    pub vessel_under_bridge: bool,
    pub bridge_physical: Option<PhysicalBridgeState>,
    pub priority_queue: Vec<PriorityEntry>,
}

impl SensorState {
    /// `sensoren_rijbaan`: `{ "<laneId>": { "voor": bool, "achter": bool }, ... }`.
    pub fn apply_rijbaan(&mut self, raw: &str) -> Result<(), ControlError> {
        let payload: HashMap<String, LaneDetectorPayload> = serde_json::from_str(raw)
            .map_err(|e| ControlError::Decode {
                topic: "sensoren_rijbaan",
                reason: e.to_string(),
            })?;
        for (lane_id, v) in payload {
            self.lane_detectors.insert(lane_id, (v.voor, v.achter));
        }
        Ok(())
    }

    /// `sensoren_speciaal`: brug_file/brug_wegdek/brug_water -> approach_jam,
    /// vehicle_on_deck, vessel_under_bridge.
    pub fn apply_speciaal(&mut self, raw: &str) -> Result<(), ControlError> {
        let payload: SpecialSensorPayload =
            serde_json::from_str(raw).map_err(|e| ControlError::Decode {
                topic: "sensoren_speciaal",
                reason: e.to_string(),
            })?;
        self.approach_jam = payload.brug_file;
        self.vehicle_on_deck = payload.brug_wegdek;
        self.vessel_under_bridge = payload.brug_water;
        Ok(())
    }

    /// `sensoren_bruggen`: `{ "81.1": { "state": "open"|"dicht" } }`.
    pub fn apply_bruggen(&mut self, raw: &str, signal_id: &str) -> Result<(), ControlError> {
        let payload: HashMap<String, BridgeSensorEntry> =
            serde_json::from_str(raw).map_err(|e| ControlError::Decode {
                topic: "sensoren_bruggen",
                reason: e.to_string(),
            })?;
        if let Some(entry) = payload.get(signal_id) {
            match PhysicalBridgeState::from_str(&entry.state) {
                Some(state) => self.bridge_physical = Some(state),
                None => {
                    return Err(ControlError::Decode {
                        topic: "sensoren_bruggen",
                        reason: format!("unknown bridge state '{}'", entry.state),
                    })
                }
            }
        }
        Ok(())
    }

    /// `voorrangsvoertuig`: `{ "queue": [ {...}, ... ] }`. The whole queue is
    /// replaced wholesale on each update, as specified.
    pub fn apply_voorrangsvoertuig(&mut self, raw: &str) -> Result<(), ControlError> {
        let payload: PriorityQueuePayload =
            serde_json::from_str(raw).map_err(|e| ControlError::Decode {
                topic: "voorrangsvoertuig",
                reason: e.to_string(),
            })?;
        self.priority_queue = payload.queue;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rijbaan_updates_only_named_lanes() {
        let mut s = SensorState::default();
        s.lane_detectors
            .insert("1.1".to_string(), (true, true));
        s.apply_rijbaan(r#"{"2.1": {"voor": true, "achter": false}}"#)
            .unwrap();
        assert_eq!(s.lane_detectors["1.1"], (true, true));
        assert_eq!(s.lane_detectors["2.1"], (true, false));
    }

    #[test]
    fn malformed_rijbaan_retains_previous_value() {
        let mut s = SensorState::default();
        s.lane_detectors
            .insert("1.1".to_string(), (true, false));
        let err = s.apply_rijbaan("not json");
        assert!(err.is_err());
        assert_eq!(s.lane_detectors["1.1"], (true, false));
    }

    #[test]
    fn speciaal_maps_dutch_fields() {
        let mut s = SensorState::default();
        s.apply_speciaal(r#"{"brug_file": true, "brug_wegdek": false, "brug_water": true}"#)
            .unwrap();
        assert!(s.approach_jam);
        assert!(!s.vehicle_on_deck);
        assert!(s.vessel_under_bridge);
    }

    #[test]
    fn bruggen_ignores_entries_for_other_signals() {
        let mut s = SensorState::default();
        s.apply_bruggen(r#"{"81.1": {"state": "open"}}"#, "81.1")
            .unwrap();
        assert_eq!(s.bridge_physical, Some(PhysicalBridgeState::Open));
        s.apply_bruggen(r#"{"99.9": {"state": "dicht"}}"#, "81.1")
            .unwrap();
        assert_eq!(s.bridge_physical, Some(PhysicalBridgeState::Open));
    }

    #[test]
    fn priority_queue_replaced_wholesale() {
        let mut s = SensorState::default();
        s.apply_voorrangsvoertuig(
            r#"{"queue": [{"baan": "7.1", "prioriteit": 1, "simulatie_tijd_ms": 100}]}"#,
        )
        .unwrap();
        assert_eq!(s.priority_queue.len(), 1);
        s.apply_voorrangsvoertuig(r#"{"queue": []}"#).unwrap();
        assert!(s.priority_queue.is_empty());
    }

    #[test]
    fn direction_id_parses_prefix() {
        let entry = PriorityEntry {
            lane: "12.3".to_string(),
            priority: 1,
            sim_time_ms: 0,
        };
        assert_eq!(entry.direction_id(), Some(12));
    }
}

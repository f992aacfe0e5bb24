//! Loading the static intersection topology (§6). Parsing the JSON document
//! is in scope for this module, but it is a thin, one-shot adapter: the core
//! only needs `groups[*].intersects_with` and `groups[*].lanes`, as the spec
//! notes. Any other fields in the document are ignored.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::Deserialize;

use crate::direction::{Direction, Lane};
use crate::error::ControlError;

#[derive(Debug, Deserialize)]
struct TopologyDoc {
    groups: HashMap<String, GroupDoc>,
}

#[derive(Debug, Deserialize)]
struct GroupDoc {
    #[serde(default)]
    intersects_with: Vec<i64>,
    #[serde(default)]
    lanes: HashMap<String, serde_json::Value>,
}

/// Parses the topology JSON and builds the `Direction` table, resolving
/// conflicts as the union of both sides' declarations (§3).
pub fn load_directions(path: &Path) -> Result<HashMap<u32, Direction>, ControlError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| ControlError::Topology(format!("cannot read {}: {e}", path.display())))?;
    parse_directions(&raw)
}

pub fn parse_directions(raw: &str) -> Result<HashMap<u32, Direction>, ControlError> {
    let doc: TopologyDoc = serde_json::from_str(raw)
        .map_err(|e| ControlError::Topology(format!("invalid topology JSON: {e}")))?;

    let mut declared: HashMap<u32, HashSet<u32>> = HashMap::new();
    let mut group_ids: HashMap<u32, &GroupDoc> = HashMap::new();

    for (id_str, group) in &doc.groups {
        let id: u32 = id_str
            .parse()
            .map_err(|_| ControlError::Topology(format!("non-numeric group id '{id_str}'")))?;
        let conflicts: HashSet<u32> = group
            .intersects_with
            .iter()
            .map(|&v| v as u32)
            .collect();
        declared.insert(id, conflicts);
        group_ids.insert(id, group);
    }

    // Union both sides' declarations: if A declares B a conflict, B conflicts
    // with A even if B's own list omits it.
    let mut symmetric: HashMap<u32, HashSet<u32>> = declared.clone();
    for (&id, conflicts) in &declared {
        for &other in conflicts {
            symmetric.entry(other).or_default().insert(id);
        }
    }

    let now = Instant::now();
    let mut directions = HashMap::new();
    for (&id, group) in &group_ids {
        let conflicts = symmetric.get(&id).cloned().unwrap_or_default();
        let mut lane_ids: Vec<&String> = group.lanes.keys().collect();
        lane_ids.sort();
        let lanes = lane_ids
            .into_iter()
            .map(|lane_id| Lane::new(format!("{id}.{lane_id}")))
            .collect();
        directions.insert(id, Direction::new(id, conflicts, lanes, now));
    }

    if directions.is_empty() {
        return Err(ControlError::Topology(
            "topology document declared no groups".to_string(),
        ));
    }

    Ok(directions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_union_is_symmetric() {
        let raw = r#"{
            "groups": {
                "1": { "intersects_with": [2], "lanes": { "1": {} } },
                "2": { "intersects_with": [], "lanes": { "1": {} } },
                "3": { "intersects_with": [], "lanes": { "1": {} } }
            }
        }"#;
        let dirs = parse_directions(raw).unwrap();
        assert!(dirs[&1].conflicts_with(2));
        // 2 did not declare 1 as a conflict, but the union enforces symmetry.
        assert!(dirs[&2].conflicts_with(1));
        assert!(!dirs[&3].conflicts_with(1));
    }

    #[test]
    fn lane_ids_are_prefixed_with_direction() {
        let raw = r#"{
            "groups": { "5": { "intersects_with": [], "lanes": { "1": {}, "2": {} } } }
        }"#;
        let dirs = parse_directions(raw).unwrap();
        let mut ids: Vec<&str> = dirs[&5].lanes.iter().map(|l| l.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["5.1", "5.2"]);
    }

    #[test]
    fn empty_groups_is_a_topology_error() {
        let raw = r#"{ "groups": {} }"#;
        assert!(parse_directions(raw).is_err());
    }

    #[test]
    fn malformed_json_is_a_topology_error() {
        assert!(parse_directions("not json").is_err());
    }
}

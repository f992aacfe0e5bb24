//! The bridge's own sensor/command state (§3). The session state machine
//! that drives `commanded_state` lives in `bridge_session.rs`; this module
//! only holds the data.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalBridgeState {
    Open,
    Dicht,
}

impl PhysicalBridgeState {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PhysicalBridgeState::Open),
            "dicht" => Some(PhysicalBridgeState::Dicht),
            _ => None,
        }
    }
}

/// green = "ordered open for vessels", red = "ordered closed" (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandedBridgeState {
    Green,
    Red,
}

impl CommandedBridgeState {
    pub fn dutch_name(self) -> &'static str {
        match self {
            CommandedBridgeState::Green => "groen",
            CommandedBridgeState::Red => "rood",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bridge {
    pub approach_a: u32,
    pub approach_b: u32,
    pub signal_id: String,

    pub physical_state: PhysicalBridgeState,
    pub commanded_state: CommandedBridgeState,
}

impl Bridge {
    pub fn new(approach_a: u32, approach_b: u32, signal_id: String) -> Self {
        Self {
            approach_a,
            approach_b,
            signal_id,
            physical_state: PhysicalBridgeState::Dicht,
            commanded_state: CommandedBridgeState::Red,
        }
    }
}

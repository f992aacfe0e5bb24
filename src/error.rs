//! Error kinds named in the error-handling design: decode errors, topology
//! errors, sensor timeouts and unknown topics. Modeled by hand rather than
//! with a derive-macro crate, matching the `std::error::Error` impls already
//! present in the reference pack (e.g. `SignalTypeError`).

use std::fmt;

#[derive(Debug)]
pub enum ControlError {
    /// Malformed inbound JSON on a known topic. Non-fatal: the tick's
    /// affected input is ignored and the last-good value is retained.
    Decode { topic: &'static str, reason: String },
    /// Topology file missing or unparsable. Fatal at startup.
    Topology(String),
    /// A bounded sensor wait exceeded its retry cap.
    SensorTimeout { what: &'static str },
    /// A message arrived on a topic the core does not understand.
    UnknownTopic(String),
    /// The broker connection could not be established or was lost.
    Transport(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Decode { topic, reason } => {
                write!(f, "decode error on topic '{topic}': {reason}")
            }
            ControlError::Topology(reason) => write!(f, "topology error: {reason}"),
            ControlError::SensorTimeout { what } => {
                write!(f, "sensor wait for '{what}' exceeded its cap")
            }
            ControlError::UnknownTopic(topic) => write!(f, "unknown inbound topic '{topic}'"),
            ControlError::Transport(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

impl std::error::Error for ControlError {}

//! Outbound publisher for `stoplichten` (§4.5, §6). Runs its own background
//! thread owning the `amiquip` connection/exchange so the async control loop
//! never blocks on a publish; `publish` just hands the encoded snapshot off
//! over a channel. Treated as a stable, scoped resource rather than
//! recreated per message (§9 design note).

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};

use amiquip::{Connection, Exchange, Publish};

use crate::config::{Config, TOPIC_STOPLICHTEN};
use crate::error::ControlError;

pub struct Publisher {
    tx: Sender<String>,
}

impl Publisher {
    /// Test seam: build a `Publisher` around an already-running sink instead
    /// of spawning a broker connection.
    #[cfg(test)]
    pub fn new_for_test(tx: Sender<String>) -> Self {
        Self { tx }
    }

    pub fn new(cfg: &Config) -> Self {
        let (tx, rx) = mpsc::channel::<String>();
        let url = cfg.amqp_url.clone();
        std::thread::spawn(move || {
            if let Err(e) = run(&url, rx) {
                log::error!("outbound publisher thread exited: {e}");
            }
        });
        Self { tx }
    }

    /// Serializes the snapshot and hands it to the publisher thread.
    /// Non-blocking; the only failure mode is the background thread having
    /// already exited.
    pub fn publish(&self, snapshot: &HashMap<String, String>) -> Result<(), ControlError> {
        let body = serde_json::to_string(snapshot)
            .map_err(|e| ControlError::Transport(format!("failed to encode snapshot: {e}")))?;
        self.tx
            .send(body)
            .map_err(|_| ControlError::Transport("publisher thread is gone".to_string()))
    }
}

fn run(url: &str, rx: mpsc::Receiver<String>) -> amiquip::Result<()> {
    let mut connection = Connection::insecure_open(url)?;
    let channel = connection.open_channel(None)?;
    let exchange = Exchange::direct(&channel);

    for body in rx {
        if let Err(e) = exchange.publish(Publish::new(body.as_bytes(), TOPIC_STOPLICHTEN)) {
            log::error!("failed to publish snapshot: {e}");
        }
    }
    connection.close()
}

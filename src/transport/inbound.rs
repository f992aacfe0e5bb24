//! Inbound topic consumers (§6, §7): one blocking task per subscribed topic,
//! matching the `task::spawn_blocking` + `amiquip` consumer pattern already
//! used by this codebase's RabbitMQ adapter. Decode failures and unknown
//! payloads are logged and otherwise ignored; the previous `SensorState`
//! value is left untouched (§7).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use amiquip::{Connection, ConsumerMessage, ConsumerOptions, QueueDeclareOptions};
use tokio::task::JoinHandle;

use crate::config::{
    Config, TOPIC_SENSOREN_BRUGGEN, TOPIC_SENSOREN_RIJBAAN, TOPIC_SENSOREN_SPECIAAL, TOPIC_TIJD,
    TOPIC_VOORRANGSVOERTUIG,
};
use crate::sensors::SensorState;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Spawns one background task per inbound topic. Each task reconnects and
/// resumes consuming if the broker connection drops; a dropped connection
/// never affects the ticks already run (last-good `SensorState` stays put).
pub fn spawn_all(cfg: &Config, sensors: Arc<Mutex<SensorState>>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(spawn_consumer(cfg.amqp_url.clone(), TOPIC_SENSOREN_RIJBAAN, {
        let sensors = Arc::clone(&sensors);
        move |body: &str| {
            let mut s = sensors.lock().unwrap();
            if let Err(e) = s.apply_rijbaan(body) {
                log::warn!("{e}");
            }
        }
    }));

    handles.push(spawn_consumer(cfg.amqp_url.clone(), TOPIC_SENSOREN_SPECIAAL, {
        let sensors = Arc::clone(&sensors);
        move |body: &str| {
            let mut s = sensors.lock().unwrap();
            if let Err(e) = s.apply_speciaal(body) {
                log::warn!("{e}");
            }
        }
    }));

    handles.push(spawn_consumer(cfg.amqp_url.clone(), TOPIC_SENSOREN_BRUGGEN, {
        let sensors = Arc::clone(&sensors);
        let signal_id = cfg.bridge_signal_id.clone();
        move |body: &str| {
            let mut s = sensors.lock().unwrap();
            if let Err(e) = s.apply_bruggen(body, &signal_id) {
                log::warn!("{e}");
            }
        }
    }));

    handles.push(spawn_consumer(cfg.amqp_url.clone(), TOPIC_VOORRANGSVOERTUIG, {
        let sensors = Arc::clone(&sensors);
        move |body: &str| {
            let mut s = sensors.lock().unwrap();
            if let Err(e) = s.apply_voorrangsvoertuig(body) {
                log::warn!("{e}");
            }
        }
    }));

    handles.push(spawn_consumer(cfg.amqp_url.clone(), TOPIC_TIJD, |_body: &str| {
        // Ignored per §6.
    }));

    handles
}

fn spawn_consumer(
    url: String,
    topic: &'static str,
    mut handler: impl FnMut(&str) + Send + 'static,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || loop {
        match run_once(&url, topic, &mut handler) {
            Ok(()) => break,
            Err(e) => {
                log::error!("inbound consumer for '{topic}' lost its connection: {e}");
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    })
}

fn run_once(
    url: &str,
    topic: &'static str,
    handler: &mut impl FnMut(&str),
) -> amiquip::Result<()> {
    let mut connection = Connection::insecure_open(url)?;
    let channel = connection.open_channel(None)?;
    let queue = channel.queue_declare(topic, QueueDeclareOptions::default())?;
    let consumer = queue.consume(ConsumerOptions::default())?;
    log::info!("subscribed to '{topic}'");

    for message in consumer.receiver() {
        match message {
            ConsumerMessage::Delivery(delivery) => {
                match std::str::from_utf8(&delivery.body) {
                    Ok(body) => handler(body),
                    Err(e) => log::warn!("'{topic}' payload was not valid UTF-8: {e}"),
                }
                consumer.ack(delivery)?;
            }
            other => {
                log::warn!("consumer for '{topic}' ended: {other:?}");
                break;
            }
        }
    }
    connection.close()
}

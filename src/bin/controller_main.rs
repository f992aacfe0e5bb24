use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use stoplicht_controller::config::Config;
use stoplicht_controller::context::ControllerContext;
use stoplicht_controller::control_loop;
use stoplicht_controller::sensors::SensorState;
use stoplicht_controller::topology;
use stoplicht_controller::transport::{inbound, outbound::Publisher};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cfg = Config::from_env();
    let topology_path = std::env::var("STOPLICHT_TOPOLOGY_PATH")
        .unwrap_or_else(|_| "topology.json".to_string());

    let directions = topology::load_directions(&PathBuf::from(&topology_path))?;

    log::info!(
        "starting controller: {} directions loaded from {topology_path}, tick period {:?}",
        directions.len(),
        cfg.tick_period
    );

    let ctx = ControllerContext::new(cfg.clone(), directions);
    let sensors = Arc::new(Mutex::new(SensorState::default()));
    let _inbound_handles = inbound::spawn_all(&cfg, Arc::clone(&sensors));
    let publisher = Publisher::new(&cfg);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for shutdown signal: {e}");
        }
    };

    control_loop::run(ctx, sensors, publisher, shutdown).await;

    log::info!("controller shut down cleanly");
    Ok(())
}

//! The ~2 Hz primary control loop (§2, §5): ingest → jam → preemption →
//! bridge session → scheduler → publish-on-change. Each step operates on
//! the single `ControllerContext`; no component holds a reference to
//! another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::time::interval;

use crate::bridge_session::{self, BridgeSessionState};
use crate::context::ControllerContext;
use crate::jam;
use crate::preemption::{self, PreemptionState};
use crate::scheduler::{self, SchedulerState};
use crate::sensors::SensorState;
use crate::transport::outbound::Publisher;

/// Runs until the process is asked to shut down (`shutdown` resolves). Never
/// returns an error: component failures are logged and recovered locally or
/// force a defensive reset, per §7.
pub async fn run(
    mut ctx: ControllerContext,
    sensors: Arc<Mutex<SensorState>>,
    publisher: Publisher,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut sched_state = SchedulerState::new();
    let mut preempt_state = PreemptionState::new();
    let mut bridge_state = BridgeSessionState::new();
    let mut last_published: Option<HashMap<String, String>> = None;

    let tick_period = ctx.config.tick_period;
    let mut ticker = interval(tick_period);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                log::info!("control loop: shutdown requested");
                break;
            }
        }

        let now = Instant::now();

        // Ingest: copy-on-read the latest decoded sensor values (§5), then
        // push them onto the domain model every other component reads.
        {
            let latest = sensors.lock().unwrap().clone();
            ctx.sensors = latest;
        }
        ctx.sync_sensor_state();

        jam::update_jam_state(&mut ctx, now);
        preemption::tick(&mut ctx, &mut preempt_state, now);
        if ctx.active_prio1_direction.is_some() {
            bridge_state.cancel.cancel();
        }
        bridge_session::advance_post_bridge_window(&mut ctx, now);
        bridge_session::tick(&mut ctx, &mut bridge_state, now);
        scheduler::advance_oranges(&mut ctx, now);
        scheduler::tick(&mut ctx, &mut sched_state, now);

        let snapshot = ctx.snapshot();
        if last_published.as_ref() != Some(&snapshot) {
            if let Err(e) = publisher.publish(&snapshot) {
                log::error!("failed to publish snapshot: {e}");
            }
            last_published = Some(snapshot);
        }
    }
}

//! Jam handling (§4.4): an edge-triggered, hysteretic `jam_engaged` flag
//! derived from the `approach_jam` sensor, plus the exclusion/eviction of the
//! configured jam-blocked directions while it is set.

use std::time::Instant;

use crate::context::ControllerContext;
use crate::direction::Phase;

/// Updates `jam_engaged` from the latest `approach_jam` reading and, if it
/// just became engaged, starts driving any currently-green blocked direction
/// toward orange (the orange->red timing itself is the scheduler's uniform
/// per-direction orange clock; this only starts that clock).
pub fn update_jam_state(ctx: &mut ControllerContext, now: Instant) {
    let raw = ctx.sensors.approach_jam;

    if raw != ctx.jam_last_raw || ctx.jam_edge_since.is_none() {
        ctx.jam_edge_since = Some(now);
        ctx.jam_last_raw = raw;
    }

    let sustained = ctx
        .jam_edge_since
        .map(|since| now.duration_since(since) >= ctx.config.jam_hysteresis)
        .unwrap_or(false);

    if raw && sustained && !ctx.jam_engaged {
        ctx.jam_engaged = true;
        log::info!("jam engaged after sustained approach_jam reading");
        evict_blocked_directions(ctx, now);
    } else if !raw && sustained && ctx.jam_engaged {
        ctx.jam_engaged = false;
        log::info!("jam disengaged after sustained clear reading");
    }
}

fn evict_blocked_directions(ctx: &mut ControllerContext, now: Instant) {
    let blocked = ctx.config.jam_blocked_directions.clone();
    for id in blocked {
        if let Some(dir) = ctx.directions.get_mut(&id) {
            if dir.phase == Phase::Green {
                dir.enter_orange(now);
            }
        }
    }
}

pub fn is_jam_blocked(ctx: &ControllerContext, id: u32) -> bool {
    ctx.jam_engaged && ctx.config.jam_blocked_directions.contains(&id)
}

//! Fixed-order tick dispatch. One call to [`tick`] advances simulated
//! time by one step: clock and weather first, then structures, then the
//! staggered subsystem phases, then an invariant sweep that clamps and
//! logs anything numerically out of bounds. Subsystems never fail
//! outward.

use rand::Rng;
use tracing::debug;

use crate::atmosphere::atmosphere_tick;
use crate::biome::{moisture_update, recalculate_biomes};
use crate::config::SimConfig;
use crate::erosion::{accumulate_wind_exposure, overnight_erosion};
use crate::evaporation::evaporation_tick;
use crate::events::EventKind;
use crate::state::{DayPhase, WorldState};
use crate::structures::structures_tick;
use crate::subsurface::subsurface_tick;
use crate::surface::{seepage_tick, surface_flow_tick};

/// Heat for a position within the day: a triangular curve peaking at
/// mid-day, pinned to the minimum through the night.
pub fn heat_at(turn: u64, config: &SimConfig) -> i32 {
    let length = config.day.day_length_ticks;
    if day_phase_at(turn, length) == DayPhase::Night {
        return config.day.heat_min;
    }
    let f = turn as f64 / (length - 1) as f64;
    let day_factor = 1.0 - (2.0 * f - 1.0).abs();
    config.day.heat_min
        + ((config.day.heat_max - config.day.heat_min) as f64 * day_factor) as i32
}

/// Day phase for a position within the day.
pub fn day_phase_at(turn: u64, day_length: u64) -> DayPhase {
    let f = turn as f64 / day_length as f64;
    if f < 0.125 {
        DayPhase::Dawn
    } else if f < 0.625 {
        DayPhase::Day
    } else if f < 0.75 {
        DayPhase::Dusk
    } else {
        DayPhase::Night
    }
}

/// Advance the world by one tick.
pub fn tick(state: &mut WorldState, config: &SimConfig) {
    state.tick += 1;
    let turn = state.tick % config.day.day_length_ticks;

    state.day_phase = day_phase_at(turn, config.day.day_length_ticks);
    state.heat = heat_at(turn, config);
    update_rain(state, config);

    structures_tick(state, &config.structures);

    match state.tick % 4 {
        0 => {
            surface_flow_tick(state, &config.water);
            seepage_tick(state, &config.water);
            evaporation_tick(state, &config.evaporation);
            atmosphere_tick(state, &config.atmosphere);
        }
        1 => {
            evaporation_tick(state, &config.evaporation);
            subsurface_tick(state, config);
            moisture_update(state, &config.biome);
        }
        2 => {
            surface_flow_tick(state, &config.water);
            evaporation_tick(state, &config.evaporation);
            atmosphere_tick(state, &config.atmosphere);
        }
        _ => {
            evaporation_tick(state, &config.evaporation);
        }
    }

    if state.tick % 10 == 0 {
        accumulate_wind_exposure(state);
    }

    if turn == 0 {
        end_of_day(state, config);
    }

    invariant_sweep(state);
}

/// Rain events: a timer alternates dry spells and rain. While it rains,
/// the atmospheric reserve drains back into the free pool and the
/// wellsprings surge.
fn update_rain(state: &mut WorldState, config: &SimConfig) {
    if state.rain_timer > 0 {
        state.rain_timer -= 1;
    }
    if state.raining {
        state.pool.rain(config.day.rain_recharge_per_tick);
        if state.rain_timer == 0 {
            state.raining = false;
            state.rain_timer = state
                .rng
                .gen_range(config.day.rain_interval_min..=config.day.rain_interval_max);
            state.events.log(state.tick, EventKind::RainStopped, None, None, "rain fades");
        }
    } else if state.rain_timer == 0 {
        state.raining = true;
        state.rain_timer = state
            .rng
            .gen_range(config.day.rain_duration_min..=config.day.rain_duration_max);
        state.events.log(
            state.tick,
            EventKind::RainStarted,
            None,
            None,
            "rain arrives, wellsprings surge",
        );
    }
}

/// Once per day: reclassify biomes, cash in the erosion accumulators,
/// report the day's water fluxes, advance the calendar.
fn end_of_day(state: &mut WorldState, config: &SimConfig) {
    debug!(day = state.day, tick = state.tick, "end of day processing");
    let changes = recalculate_biomes(state, &config.biome);
    overnight_erosion(state, &config.erosion);

    let runoff = state.pool.edge_runoff_total - state.day_runoff_mark;
    if runoff > 0 {
        state.events.log(
            state.tick,
            EventKind::EdgeRunoff,
            None,
            Some(runoff),
            format!("{runoff} units ran off the map today"),
        );
    }
    state.day_runoff_mark = state.pool.edge_runoff_total;

    let drawn = state.wellspring_drawn_total - state.day_drawn_mark;
    if drawn > 0 {
        state.events.log(
            state.tick,
            EventKind::WaterDrawn,
            None,
            Some(drawn),
            format!("wellsprings drew {drawn} units today"),
        );
    }
    state.day_drawn_mark = state.wellspring_drawn_total;

    state.day += 1;
    debug!(day = state.day, biome_changes = changes, "day begins");
}

/// Clamp numerical drift on the spot and log it quietly. Anomalies here
/// are bugs elsewhere, but the simulation must keep running.
fn invariant_sweep(state: &mut WorldState) {
    let mut clamped: i64 = 0;

    for w in state.grid.water.iter_mut() {
        if *w < 0 {
            *w = 0;
            clamped += 1;
        }
    }
    for w in state.grid.subsurface_water.iter_mut() {
        if *w < 0 {
            *w = 0;
            clamped += 1;
        }
    }
    for d in state.grid.terrain_layers.iter_mut() {
        if *d < 0 {
            *d = 0;
            clamped += 1;
        }
    }
    for h in state.grid.humidity.iter_mut() {
        if !h.is_finite() {
            *h = 0.0;
            clamped += 1;
        }
    }
    for w in state.grid.wind_x.iter_mut().chain(state.grid.wind_y.iter_mut()) {
        if !w.is_finite() {
            *w = 0.0;
            clamped += 1;
        }
    }

    if clamped > 0 {
        state.events.log(
            state.tick,
            EventKind::InvariantClamp,
            None,
            Some(clamped),
            format!("clamped {clamped} out-of-range cells"),
        );
    }
}

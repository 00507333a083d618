//! Overnight erosion. During the day the surface kernel accumulates
//! `water_passage` and the atmosphere pass feeds `wind_exposure`; at the
//! end of the day the accumulators are cashed in as material transport and
//! zeroed.

use crate::config::ErosionParams;
use crate::events::EventKind;
use crate::grid::{Material, SoilLayer, D8_OFFSETS};
use crate::state::WorldState;

/// How readily a layer erodes once exposed. Bedrock never erodes.
fn layer_resistance(layer: SoilLayer) -> f32 {
    match layer {
        SoilLayer::Bedrock => 0.0,
        SoilLayer::Regolith => 0.5,
        SoilLayer::Subsoil => 0.4,
        SoilLayer::Eluviation => 0.8,
        SoilLayer::Topsoil => 0.7,
        SoilLayer::Organics => 1.0,
    }
}

/// Wind-specific erodibility: loose grains blow, cohesive and heavy
/// material stays.
fn wind_material_modifier(material: Material) -> f32 {
    match material {
        Material::Sand => 1.5,
        Material::Silt => 1.2,
        Material::Humus => 0.8,
        Material::Dirt => 0.6,
        Material::Gravel => 0.2,
        Material::Clay => 0.3,
        Material::Rock => 0.1,
        Material::Empty | Material::Bedrock => 0.0,
    }
}

/// Accumulate wind exposure for the overnight pass. Ponded or saturated
/// cells contribute nothing; dry exposed layers accumulate the full wind
/// magnitude. Runs every 10 ticks.
pub fn accumulate_wind_exposure(state: &mut WorldState) {
    let width = state.grid.width;
    let height = state.grid.height;

    for x in 0..width {
        for y in 0..height {
            let speed = crate::atmosphere::wind_speed(&state.grid, x, y);
            if speed < 0.2 {
                continue;
            }
            if state.grid.water[[x, y]] >= 10 {
                continue; // ponded
            }
            let dryness = match state.grid.exposed_layer(x, y) {
                Some(layer) => {
                    let l = layer.index();
                    let capacity = state.grid.capacity(l, x, y);
                    if capacity <= 0 {
                        1.0
                    } else {
                        let saturation =
                            state.grid.subsurface_water[[l, x, y]] as f32 / capacity as f32;
                        (1.0 - saturation).max(0.0)
                    }
                }
                None => 0.0, // bare bedrock sheds no material
            };
            if dryness > 0.0 {
                state.grid.wind_exposure[[x, y]] += speed * dryness;
            }
        }
    }
}

/// End-of-day erosion: hydraulic transport along the day's water paths,
/// optional wind transport off high dry ground, then accumulator reset.
pub fn overnight_erosion(state: &mut WorldState, params: &ErosionParams) {
    if state.grid.terrain_changed {
        state.grid.rebuild_elevation();
    }

    let mut moved_total: i64 = 0;
    moved_total += hydraulic_pass(state, params);
    if params.wind_enabled {
        moved_total += wind_pass(state, params);
    }

    state.grid.water_passage.fill(0.0);
    state.grid.wind_exposure.fill(0.0);

    if moved_total > 0 {
        state.grid.terrain_changed = true;
        state.invalidate_connectivity();
        state.events.log(
            state.tick,
            EventKind::ErosionEvent,
            None,
            Some(moved_total),
            "water shaped the land overnight",
        );
    }
}

/// Steepest-downhill 8-neighbour of a cell, ties broken by the smaller
/// (x, y) coordinate. `None` when the cell is a local pit or the steepest
/// descent leaves the grid.
fn steepest_downhill(state: &WorldState, x: usize, y: usize) -> Option<(usize, usize)> {
    let here = state.grid.elevation[[x, y]];
    let mut best: Option<(i32, usize, usize)> = None;
    for &(dx, dy) in D8_OFFSETS.iter() {
        let nx = x as i64 + dx as i64;
        let ny = y as i64 + dy as i64;
        if !state.grid.in_bounds(nx, ny) {
            continue;
        }
        let (nxu, nyu) = (nx as usize, ny as usize);
        let elev = state.grid.elevation[[nxu, nyu]];
        if elev >= here {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_elev, bx, by)) => {
                elev < best_elev || (elev == best_elev && (nxu, nyu) < (bx, by))
            }
        };
        if better {
            best = Some((elev, nxu, nyu));
        }
    }
    best.map(|(_, bx, by)| (bx, by))
}

fn hydraulic_pass(state: &mut WorldState, params: &ErosionParams) -> i64 {
    let width = state.grid.width;
    let height = state.grid.height;
    let mut moved: i64 = 0;

    for x in 0..width {
        for y in 0..height {
            let passage = state.grid.water_passage[[x, y]];
            if passage <= params.water_threshold {
                continue;
            }
            let Some(layer) = state.grid.exposed_layer(x, y) else {
                continue;
            };
            let depth = ((passage - params.water_threshold)
                * params.water_rate
                * layer_resistance(layer))
            .floor() as i32;
            let depth = depth
                .min(params.max_depth_per_night)
                .min(state.grid.terrain_layers[[layer.index(), x, y]]);
            if depth <= 0 {
                continue;
            }
            let Some((tx, ty)) = steepest_downhill(state, x, y) else {
                continue; // pits keep their material
            };

            let removed = state.grid.remove_material(layer, x, y, depth);
            let target_layer = state.grid.exposed_layer(tx, ty).unwrap_or(SoilLayer::Topsoil);
            state.grid.add_material(target_layer, tx, ty, removed);
            moved += removed as i64;
        }
    }
    moved
}

/// Neighbour offset closest to the wind vector.
fn downwind_offset(wx: f32, wy: f32) -> (i32, i32) {
    let dx = if wx > 0.25 {
        1
    } else if wx < -0.25 {
        -1
    } else {
        0
    };
    let dy = if wy > 0.25 {
        1
    } else if wy < -0.25 {
        -1
    } else {
        0
    };
    (dx, dy)
}

fn wind_pass(state: &mut WorldState, params: &ErosionParams) -> i64 {
    let width = state.grid.width;
    let height = state.grid.height;
    let mut moved: i64 = 0;

    // Elevation rank gate: only the high, exposed fraction of the grid
    // loses material to wind.
    let mut sorted: Vec<i32> = state.grid.elevation.iter().copied().collect();
    sorted.sort_unstable();
    let cut_index = ((sorted.len() - 1) as f32 * params.wind_elevation_percentile) as usize;
    let elevation_cut = sorted[cut_index];

    for x in 0..width {
        for y in 0..height {
            if state.grid.wind_exposure[[x, y]] <= params.wind_threshold {
                continue;
            }
            if state.grid.elevation[[x, y]] < elevation_cut {
                continue;
            }
            if state.grid.water[[x, y]] >= 10 {
                continue;
            }
            let Some(layer) = state.grid.exposed_layer(x, y) else {
                continue;
            };
            let material = state.grid.terrain_materials[[layer.index(), x, y]];
            let depth = (state.grid.wind_exposure[[x, y]]
                * params.wind_rate
                * wind_material_modifier(material)
                * layer_resistance(layer)
                * 0.01)
                .floor() as i32;
            let depth = depth
                .min(params.max_depth_per_night)
                .min(state.grid.terrain_layers[[layer.index(), x, y]]);
            if depth <= 0 {
                continue;
            }

            let (dx, dy) = downwind_offset(state.grid.wind_x[[x, y]], state.grid.wind_y[[x, y]]);
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = x as i64 + dx as i64;
            let ny = y as i64 + dy as i64;
            if !state.grid.in_bounds(nx, ny) {
                continue;
            }

            let removed = state.grid.remove_material(layer, x, y, depth);
            let (nxu, nyu) = (nx as usize, ny as usize);
            let target_layer = state
                .grid
                .exposed_layer(nxu, nyu)
                .unwrap_or(SoilLayer::Topsoil);
            state.grid.add_material(target_layer, nxu, nyu, removed);
            moved += removed as i64;
        }
    }
    moved
}

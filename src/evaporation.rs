//! Evaporation: the only process that moves water from the grid into the
//! atmospheric reserve. Driven by biome, the day-cycle heat scalar, and
//! the local atmosphere sample (dry air and wind evaporate more).

use rayon::prelude::*;

use crate::config::EvaporationParams;
use crate::state::WorldState;
use crate::structures::StructureKind;

/// Atmospheric modifier: dry air and wind raise evaporation, humid still
/// air suppresses it. Clamped to the configured band.
#[inline]
pub fn evap_modifier(humidity: f32, wind_speed: f32, params: &EvaporationParams) -> f32 {
    let raw = (1.0 - humidity) * (1.0 + params.wind_factor * wind_speed);
    raw.clamp(params.modifier_min, params.modifier_max)
}

/// Remove evaporated water from every cell and route it to the
/// atmospheric reserve. Returns the total amount removed.
///
/// Surface water evaporates first; once a cell's surface is dry the unmet
/// remainder is scaled down and taken from the topmost non-empty soil
/// layer's water.
pub fn evaporation_tick(state: &mut WorldState, params: &EvaporationParams) -> i64 {
    let width = state.grid.width;
    let height = state.grid.height;
    let heat = state.heat;

    // Pure per-cell rate pass; embarrassingly parallel.
    let grid = &state.grid;
    let structures = &state.structures;
    let rates: Vec<i32> = (0..width * height)
        .into_par_iter()
        .map(|i| {
            let (x, y) = (i / height, i % height);
            let base = grid.kind[[x, y]].base_evap();
            if base == 0 {
                return 0;
            }
            let wind_x = grid.wind_x[[x, y]];
            let wind_y = grid.wind_y[[x, y]];
            let wind_speed = (wind_x * wind_x + wind_y * wind_y).sqrt();
            let modifier = evap_modifier(grid.humidity[[x, y]], wind_speed, params);
            let material_factor = grid.exposed_material(x, y).props().evap_multiplier.max(0.1);
            let mut rate = base as f32 * heat as f32 / 100.0 * modifier * material_factor;
            if let Some(structure) = structures.get(&(x, y)) {
                if structure.kind() == StructureKind::Cistern {
                    rate *= params.cistern_factor;
                }
            }
            rate.floor() as i32
        })
        .collect();

    let mut removed_total: i64 = 0;
    for x in 0..width {
        for y in 0..height {
            let rate = rates[x * height + y];
            if rate <= 0 {
                continue;
            }

            let surface = state.grid.water[[x, y]];
            let from_surface = rate.min(surface);
            if from_surface > 0 {
                state.grid.water[[x, y]] -= from_surface;
                removed_total += from_surface as i64;
            }

            let remainder = rate - from_surface;
            if remainder > 0 {
                if let Some(layer) = state.grid.exposed_layer(x, y) {
                    let l = layer.index();
                    let soil_take = ((remainder as f32 * params.soil_evap_scale).floor() as i32)
                        .min(state.grid.subsurface_water[[l, x, y]]);
                    if soil_take > 0 {
                        state.grid.subsurface_water[[l, x, y]] -= soil_take;
                        removed_total += soil_take as i64;
                    }
                }
            }
        }
    }

    if removed_total > 0 {
        state.pool.deposit_atmospheric(removed_total);
    }
    removed_total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::grid::{Biome, Material, SoilLayer};

    fn dry_state(width: usize, height: usize) -> WorldState {
        let config = SimConfig::standard();
        let mut state = WorldState::empty(1, width, height, &config);
        for x in 0..width {
            for y in 0..height {
                state.grid.set_material(SoilLayer::Topsoil, x, y, Material::Dirt);
                state.grid.terrain_layers[[SoilLayer::Topsoil.index(), x, y]] = 10;
                state.grid.kind[[x, y]] = Biome::Salt; // fastest drying
                state.grid.humidity[[x, y]] = 0.2;
            }
        }
        state.grid.rebuild_elevation();
        state.heat = 140;
        state
    }

    #[test]
    fn modifier_clamps_to_band() {
        let params = EvaporationParams::default();
        assert_eq!(evap_modifier(1.0, 0.0, &params), params.modifier_min);
        assert_eq!(evap_modifier(0.0, 10.0, &params), params.modifier_max);
        let mid = evap_modifier(0.5, 0.4, &params);
        assert!(mid > params.modifier_min && mid < params.modifier_max);
    }

    #[test]
    fn humid_air_evaporates_less_than_dry_air() {
        let params = EvaporationParams::default();
        assert!(evap_modifier(0.9, 0.2, &params) < evap_modifier(0.1, 0.2, &params));
    }

    #[test]
    fn removed_water_lands_in_atmospheric_reserve() {
        let mut state = dry_state(2, 2);
        let params = EvaporationParams::default();
        state.grid.water[[0, 0]] = 50;
        let before = state.conserved_water_total();

        let removed = evaporation_tick(&mut state, &params);
        assert!(removed > 0);
        assert_eq!(state.pool.atmospheric, removed);
        assert_eq!(state.conserved_water_total(), before);
    }

    #[test]
    fn dry_surface_draws_from_topmost_soil_layer() {
        let mut state = dry_state(1, 1);
        let params = EvaporationParams::default();
        let l = SoilLayer::Topsoil.index();
        state.grid.water[[0, 0]] = 0;
        state.grid.subsurface_water[[l, 0, 0]] = 4;

        let mut drained = 0;
        for _ in 0..40 {
            drained += evaporation_tick(&mut state, &params);
        }
        assert!(drained > 0);
        assert!(state.grid.subsurface_water[[l, 0, 0]] < 4);
        assert!(state.grid.subsurface_water[[l, 0, 0]] >= 0);
    }

    #[test]
    fn wadi_does_not_evaporate() {
        let mut state = dry_state(1, 1);
        let params = EvaporationParams::default();
        state.grid.kind[[0, 0]] = Biome::Wadi;
        state.grid.water[[0, 0]] = 50;

        let removed = evaporation_tick(&mut state, &params);
        assert_eq!(removed, 0);
        assert_eq!(state.grid.water[[0, 0]], 50);
    }

    #[test]
    fn cistern_slows_local_evaporation() {
        use crate::structures::Structure;
        let mut state = dry_state(2, 1);
        let params = EvaporationParams::default();
        state.grid.water[[0, 0]] = 100;
        state.grid.water[[1, 0]] = 100;
        state
            .structures
            .insert((0, 0), Structure::new(1, StructureKind::Cistern));

        evaporation_tick(&mut state, &params);
        assert!(state.grid.water[[0, 0]] >= state.grid.water[[1, 0]]);
    }
}

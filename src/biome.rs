//! Biome bookkeeping: the slow moisture aggregate and the end-of-day
//! reclassification from elevation percentiles and moisture.

use ndarray::Array2;

use crate::config::BiomeParams;
use crate::events::EventKind;
use crate::grid::{Biome, Material, SoilLayer, D8_OFFSETS};
use crate::state::WorldState;

/// Fold the current water column into the moisture EMA. Runs on the slow
/// scheduler phase.
pub fn moisture_update(state: &mut WorldState, params: &BiomeParams) {
    let alpha = params.moisture_ema_alpha;
    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            let column = state.grid.total_water_at(x, y) as f32;
            let m = state.grid.moisture[[x, y]];
            state.grid.moisture[[x, y]] = (1.0 - alpha) * m + alpha * column;
        }
    }
}

/// Rank every cell's elevation over the whole grid: 0.0 for the lowest,
/// 1.0 for the highest.
pub fn elevation_percentiles(elevation: &Array2<i32>) -> Array2<f32> {
    let (width, height) = elevation.dim();
    let n = width * height;
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| elevation[[i / height, i % height]]);

    let mut percentiles = Array2::<f32>::zeros((width, height));
    let denom = (n - 1).max(1) as f32;
    for (rank, &i) in order.iter().enumerate() {
        percentiles[[i / height, i % height]] = rank as f32 / denom;
    }
    percentiles
}

/// Classify one cell. Conditions are checked rock, wadi, dune, then the
/// salt signature (standing moisture with no organic cover); the
/// elevation rules win where they overlap.
fn classify(
    state: &WorldState,
    x: usize,
    y: usize,
    percentile: f32,
    params: &BiomeParams,
    kinds_before: &Array2<Biome>,
) -> Biome {
    let moisture = state.grid.moisture[[x, y]];
    let topsoil = SoilLayer::Topsoil.index();
    let subsoil = SoilLayer::Subsoil.index();
    let organics = SoilLayer::Organics.index();
    let soil_depth =
        state.grid.terrain_layers[[topsoil, x, y]] + state.grid.terrain_layers[[subsoil, x, y]];

    if percentile > params.rock_percentile && soil_depth < params.rock_soil_depth {
        return Biome::Rock;
    }
    if percentile < params.wadi_percentile && moisture > params.wadi_min_moisture {
        return Biome::Wadi;
    }
    let sandy = state.grid.terrain_materials[[topsoil, x, y]] == Material::Sand;
    if moisture < params.dune_max_moisture && (sandy || percentile > params.dune_percentile) {
        return Biome::Dune;
    }
    if moisture > params.salt_min_moisture && state.grid.terrain_layers[[organics, x, y]] == 0 {
        return Biome::Salt;
    }

    // Strong neighbour consensus pulls undecided cells along.
    let mut votes = [0usize; 5];
    for &(dx, dy) in D8_OFFSETS.iter() {
        let nx = x as i64 + dx as i64;
        let ny = y as i64 + dy as i64;
        if state.grid.in_bounds(nx, ny) {
            votes[kinds_before[[nx as usize, ny as usize]] as usize] += 1;
        }
    }
    for candidate in [Biome::Dune, Biome::Flat, Biome::Wadi] {
        if votes[candidate as usize] >= params.consensus_votes {
            return candidate;
        }
    }

    Biome::Flat
}

/// Reclassify the whole grid. Changed cells invalidate the renderer's
/// static cache. Returns the number of cells that changed.
pub fn recalculate_biomes(state: &mut WorldState, params: &BiomeParams) -> usize {
    if state.grid.terrain_changed {
        state.grid.rebuild_elevation();
    }
    let percentiles = elevation_percentiles(&state.grid.elevation);
    let kinds_before = state.grid.kind.clone();

    let mut changes = 0;
    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            let new_kind = classify(state, x, y, percentiles[[x, y]], params, &kinds_before);
            if new_kind != kinds_before[[x, y]] {
                state.grid.kind[[x, y]] = new_kind;
                state.grid.mark_dirty(x, y);
                changes += 1;
            }
        }
    }

    if changes > 0 {
        state.events.log(
            state.tick,
            EventKind::BiomeChange,
            None,
            Some(changes as i64),
            format!("landscape shifted: {changes} cells changed biome"),
        );
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn base_state(width: usize, height: usize) -> WorldState {
        let config = SimConfig::standard();
        let mut state = WorldState::empty(1, width, height, &config);
        for x in 0..width {
            for y in 0..height {
                state.grid.set_material(SoilLayer::Topsoil, x, y, Material::Dirt);
                state.grid.terrain_layers[[SoilLayer::Topsoil.index(), x, y]] = 10;
                state.grid.set_material(SoilLayer::Subsoil, x, y, Material::Clay);
                state.grid.terrain_layers[[SoilLayer::Subsoil.index(), x, y]] = 10;
            }
        }
        state.grid.rebuild_elevation();
        state
    }

    #[test]
    fn percentiles_rank_lowest_to_highest() {
        let mut elevation = Array2::<i32>::zeros((3, 1));
        elevation[[0, 0]] = 5;
        elevation[[1, 0]] = 20;
        elevation[[2, 0]] = 10;
        let pct = elevation_percentiles(&elevation);
        assert_eq!(pct[[0, 0]], 0.0);
        assert_eq!(pct[[1, 0]], 1.0);
        assert_eq!(pct[[2, 0]], 0.5);
    }

    #[test]
    fn moisture_ema_tracks_the_water_column() {
        let mut state = base_state(1, 1);
        let params = BiomeParams::default();
        state.grid.water[[0, 0]] = 120;
        for _ in 0..200 {
            moisture_update(&mut state, &params);
        }
        assert!((state.grid.moisture[[0, 0]] - 120.0).abs() < 2.0);
    }

    #[test]
    fn low_wet_cells_become_wadi() {
        let mut state = base_state(4, 4);
        let params = BiomeParams::default();
        // Sink one corner and soak it.
        state.grid.bedrock_base[[0, 0]] = -50;
        state.grid.rebuild_elevation();
        state.grid.moisture[[0, 0]] = 80.0;

        recalculate_biomes(&mut state, &params);
        assert_eq!(state.grid.kind[[0, 0]], Biome::Wadi);
    }

    #[test]
    fn high_thin_cells_become_rock() {
        let mut state = base_state(4, 4);
        let params = BiomeParams::default();
        state.grid.bedrock_base[[3, 3]] = 100;
        state.grid.remove_material(SoilLayer::Topsoil, 3, 3, 10);
        state.grid.remove_material(SoilLayer::Subsoil, 3, 3, 8);
        state.grid.rebuild_elevation();

        recalculate_biomes(&mut state, &params);
        assert_eq!(state.grid.kind[[3, 3]], Biome::Rock);
    }

    #[test]
    fn rock_outranks_the_salt_signature() {
        let mut state = base_state(4, 4);
        let params = BiomeParams::default();
        // High, thin-soiled and soaked with no organic cover: both the
        // rock and salt conditions hold, and rock must win.
        state.grid.bedrock_base[[3, 3]] = 100;
        state.grid.remove_material(SoilLayer::Topsoil, 3, 3, 10);
        state.grid.remove_material(SoilLayer::Subsoil, 3, 3, 8);
        state.grid.rebuild_elevation();
        state.grid.moisture[[3, 3]] = 200.0;

        recalculate_biomes(&mut state, &params);
        assert_eq!(state.grid.kind[[3, 3]], Biome::Rock);
    }

    #[test]
    fn soaked_bare_cells_take_the_salt_signature() {
        let mut state = base_state(3, 3);
        let params = BiomeParams::default();
        state.grid.moisture[[1, 1]] = 200.0;

        recalculate_biomes(&mut state, &params);
        assert_eq!(state.grid.kind[[1, 1]], Biome::Salt);
    }

    #[test]
    fn reclassified_cells_are_marked_dirty() {
        let mut state = base_state(4, 4);
        let params = BiomeParams::default();
        state.grid.bedrock_base[[0, 0]] = -50;
        state.grid.rebuild_elevation();
        state.grid.moisture[[0, 0]] = 80.0;
        state.grid.dirty_cells.clear();

        let changes = recalculate_biomes(&mut state, &params);
        assert!(changes > 0);
        assert!(state.grid.dirty_cells.contains(&(0, 0)));
    }
}

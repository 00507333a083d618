//! Surface water kernels: gravity-driven 8-neighbour redistribution and
//! infiltration into the topmost soil layer.
//!
//! The flow stencil is a simultaneous update: all transfers are computed
//! against a start-of-tick snapshot and applied through a delta buffer, so
//! cell visit order never matters. Edge columns and rows are handled
//! explicitly: there is no wrapping, and mass leaving the grid is routed
//! to the water pool's runoff channel.

use ndarray::Array2;

use crate::config::{EdgePolicy, WaterParams};
use crate::grid::{is_diagonal, D8_OFFSETS};
use crate::state::WorldState;

/// Redistribute surface water along the total-head gradient. Returns the
/// amount lost past the grid boundary this tick.
///
/// Per direction the transfer is `min(water/8, floor(dh * rate * atten))`,
/// gated on `dh > threshold`. The per-direction cap of an eighth of the
/// cell's water makes the eight simultaneous outflows sum to at most the
/// available water.
pub fn surface_flow_tick(state: &mut WorldState, params: &WaterParams) -> i64 {
    if state.grid.terrain_changed {
        state.grid.rebuild_elevation();
    }

    let width = state.grid.width;
    let height = state.grid.height;

    // Start-of-tick snapshot of water and total head.
    let water_before = state.grid.water.clone();
    let mut head = Array2::<i32>::zeros((width, height));
    for x in 0..width {
        for y in 0..height {
            head[[x, y]] = state.grid.elevation[[x, y]] + water_before[[x, y]];
        }
    }

    let mut deltas = Array2::<i64>::zeros((width, height));
    let mut edge_loss: i64 = 0;

    for x in 0..width {
        for y in 0..height {
            let water = water_before[[x, y]];
            if water <= 0 {
                continue;
            }
            let per_direction_cap = (water / 8) as i64;
            if per_direction_cap == 0 {
                continue;
            }
            let head_here = head[[x, y]];

            for &(dx, dy) in D8_OFFSETS.iter() {
                let nx = x as i64 + dx as i64;
                let ny = y as i64 + dy as i64;
                let inside = state.grid.in_bounds(nx, ny);

                let neighbor_head = if inside {
                    head[[nx as usize, ny as usize]]
                } else {
                    match params.edge_policy {
                        EdgePolicy::Wall => continue,
                        // Off-map ground continues at this cell's own
                        // terrain elevation, dry.
                        EdgePolicy::Sink => state.grid.elevation[[x, y]],
                    }
                };

                let dh = head_here - neighbor_head;
                if dh <= params.surface_flow_threshold {
                    continue;
                }

                let atten = if is_diagonal(dx, dy) {
                    params.diagonal_attenuation
                } else {
                    1.0
                };
                let flow = ((dh as f32 * params.surface_flow_rate * atten).floor() as i64)
                    .min(per_direction_cap);
                if flow <= 0 {
                    continue;
                }

                deltas[[x, y]] -= flow;
                if inside {
                    deltas[[nx as usize, ny as usize]] += flow;
                } else {
                    edge_loss += flow;
                }
                state.grid.water_passage[[x, y]] += flow as f32;
            }
        }
    }

    for x in 0..width {
        for y in 0..height {
            let d = deltas[[x, y]];
            if d != 0 {
                state.grid.water[[x, y]] = (water_before[[x, y]] as i64 + d) as i32;
            }
        }
    }

    if edge_loss > 0 {
        state.pool.deposit_edge_runoff(edge_loss);
    }
    edge_loss
}

/// Infiltrate surface water into the topmost non-empty soil layer,
/// governed by the exposed material's vertical permeability and capped by
/// the layer's remaining storage capacity.
pub fn seepage_tick(state: &mut WorldState, params: &WaterParams) {
    let width = state.grid.width;
    let height = state.grid.height;

    for x in 0..width {
        for y in 0..height {
            let water = state.grid.water[[x, y]];
            if water <= 0 {
                continue;
            }
            let Some(layer) = state.grid.exposed_layer(x, y) else {
                continue; // bare bedrock takes nothing
            };
            let l = layer.index();
            let perm = state.grid.permeability_vert[[l, x, y]];
            if perm <= 0.0 {
                continue;
            }

            let remaining =
                state.grid.capacity(l, x, y) - state.grid.subsurface_water[[l, x, y]];
            if remaining <= 0 {
                continue;
            }

            let seep = (water as f32 * params.surface_seepage_rate * perm).floor() as i32;
            let amount = seep.min(remaining).min(water);
            if amount <= 0 {
                continue;
            }

            state.grid.water[[x, y]] -= amount;
            state.grid.subsurface_water[[l, x, y]] += amount;
            state.grid.mark_dirty(x, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::grid::{Material, SoilLayer};

    /// Flat world at the given bedrock elevation with one 10-deep dirt
    /// topsoil layer per cell.
    fn flat_state(width: usize, height: usize, base: i32) -> WorldState {
        let config = SimConfig::standard();
        let mut state = WorldState::empty(1, width, height, &config);
        for x in 0..width {
            for y in 0..height {
                state.grid.bedrock_base[[x, y]] = base;
                state.grid.set_material(SoilLayer::Topsoil, x, y, Material::Dirt);
                state.grid.terrain_layers[[SoilLayer::Topsoil.index(), x, y]] = 10;
            }
        }
        state.grid.rebuild_elevation();
        state
    }

    #[test]
    fn water_spreads_downhill_and_conserves() {
        let mut state = flat_state(3, 3, 10);
        let mut params = WaterParams::default();
        params.edge_policy = EdgePolicy::Wall;
        state.grid.water[[1, 1]] = 100;

        for _ in 0..20 {
            surface_flow_tick(&mut state, &params);
        }

        let total: i64 = state.grid.water.iter().map(|&w| w as i64).sum();
        assert_eq!(total, 100);
        // Centre has drained toward its neighbours.
        assert!(state.grid.water[[1, 1]] < 100);
        assert!(state.grid.water[[0, 0]] > 0);
    }

    #[test]
    fn small_gradients_are_damped() {
        let mut state = flat_state(2, 1, 10);
        let mut params = WaterParams::default();
        params.edge_policy = EdgePolicy::Wall;
        // Head difference of 4 is below the default threshold of 5.
        state.grid.water[[0, 0]] = 4;

        surface_flow_tick(&mut state, &params);
        assert_eq!(state.grid.water[[0, 0]], 4);
        assert_eq!(state.grid.water[[1, 0]], 0);
    }

    #[test]
    fn edge_outflow_lands_in_pool_with_sink_policy() {
        let mut state = flat_state(2, 1, 10);
        let params = WaterParams::default();
        state.grid.water[[0, 0]] = 80;

        let lost = surface_flow_tick(&mut state, &params);
        assert!(lost > 0);
        assert_eq!(state.pool.edge_runoff_total, lost);
        assert_eq!(state.pool.free, lost);

        let total: i64 = state.grid.water.iter().map(|&w| w as i64).sum();
        assert_eq!(total + lost, 80);
    }

    #[test]
    fn wall_policy_never_leaks() {
        let mut state = flat_state(2, 2, 10);
        let mut params = WaterParams::default();
        params.edge_policy = EdgePolicy::Wall;
        state.grid.water[[0, 0]] = 200;

        for _ in 0..50 {
            surface_flow_tick(&mut state, &params);
        }
        let total: i64 = state.grid.water.iter().map(|&w| w as i64).sum();
        assert_eq!(total, 200);
        assert_eq!(state.pool.edge_runoff_total, 0);
    }

    #[test]
    fn no_wrap_across_the_grid() {
        let mut state = flat_state(5, 1, 10);
        let params = WaterParams::default();
        state.grid.water[[0, 0]] = 64;

        surface_flow_tick(&mut state, &params);
        // Water may leave past the left edge but must never appear on the
        // opposite side.
        assert_eq!(state.grid.water[[4, 0]], 0);
        assert_eq!(state.grid.water[[3, 0]], 0);
    }

    #[test]
    fn transfers_accumulate_water_passage() {
        let mut state = flat_state(3, 1, 10);
        let mut params = WaterParams::default();
        params.edge_policy = EdgePolicy::Wall;
        state.grid.water[[1, 0]] = 80;

        surface_flow_tick(&mut state, &params);
        assert!(state.grid.water_passage[[1, 0]] > 0.0);
        assert_eq!(state.grid.water_passage[[0, 0]], 0.0);
    }

    #[test]
    fn seepage_respects_layer_capacity() {
        let mut state = flat_state(1, 1, 0);
        let params = WaterParams::default();
        // Topsoil depth 10, dirt porosity 0.40 -> capacity 4.
        state.grid.water[[0, 0]] = 100;

        for _ in 0..50 {
            seepage_tick(&mut state, &params);
        }
        let l = SoilLayer::Topsoil.index();
        assert!(state.grid.subsurface_water[[l, 0, 0]] <= 4);
        assert_eq!(
            state.grid.water[[0, 0]] as i64 + state.grid.subsurface_water[[l, 0, 0]] as i64,
            100
        );
    }

    #[test]
    fn seepage_skips_bare_bedrock() {
        let config = SimConfig::standard();
        let mut state = WorldState::empty(1, 1, 1, &config);
        state.grid.bedrock_base[[0, 0]] = 5;
        state.grid.rebuild_elevation();
        state.grid.water[[0, 0]] = 50;

        seepage_tick(&mut state, &WaterParams::default());
        assert_eq!(state.grid.water[[0, 0]], 50);
    }
}

//! Layered subsurface water transport: wellspring injection, vertical
//! gravitational and capillary transfer between adjacent layers,
//! hydraulic-head driven horizontal flow within each layer, and the
//! overflow cascade that restores the capacity invariant.
//!
//! Runs on the slow phase of the scheduler. The geometry checks of the
//! horizontal kernel (which layer edges are connected) depend only on
//! terrain, so they live in a cache that is rebuilt solely after terrain
//! mutations.

use ndarray::{Array2, Array3};

use crate::config::{EdgePolicy, SimConfig};
use crate::events::EventKind;
use crate::grid::{SoilLayer, D4_OFFSETS, LAYER_COUNT};
use crate::state::WorldState;

/// Per-layer, per-direction boolean edge masks: `true` where water in a
/// layer may move to the same layer of the neighbouring cell (both sides
/// have non-zero depth). Rebuilding is the expensive geometry pass the
/// inner loop must not repeat, so the cache lives until terrain changes.
#[derive(Debug)]
pub struct ConnectivityCache {
    /// Indexed `layer * 4 + direction` with directions in `D4_OFFSETS`
    /// order.
    masks: Vec<Array2<bool>>,
}

impl ConnectivityCache {
    pub fn build(grid: &crate::grid::WorldGrid) -> Self {
        let width = grid.width;
        let height = grid.height;
        let mut masks = Vec::with_capacity(LAYER_COUNT * 4);

        for l in 0..LAYER_COUNT {
            for &(dx, dy) in D4_OFFSETS.iter() {
                let mut mask = Array2::<bool>::default((width, height));
                for x in 0..width {
                    for y in 0..height {
                        if grid.terrain_layers[[l, x, y]] <= 0 {
                            continue;
                        }
                        let nx = x as i64 + dx as i64;
                        let ny = y as i64 + dy as i64;
                        if grid.in_bounds(nx, ny)
                            && grid.terrain_layers[[l, nx as usize, ny as usize]] > 0
                        {
                            mask[[x, y]] = true;
                        }
                    }
                }
                masks.push(mask);
            }
        }
        Self { masks }
    }

    #[inline]
    pub fn connected(&self, layer: usize, direction: usize, x: usize, y: usize) -> bool {
        self.masks[layer * 4 + direction][[x, y]]
    }
}

/// One full subsurface pass: injection, vertical, horizontal, overflow.
pub fn subsurface_tick(state: &mut WorldState, config: &SimConfig) {
    if state.grid.terrain_changed {
        state.grid.rebuild_elevation();
        state.connectivity = None;
    }
    if state.connectivity.is_none() {
        state.connectivity = Some(ConnectivityCache::build(&state.grid));
    }

    inject_wellsprings(state, config);
    vertical_transfer(state, config);
    horizontal_transfer(state, config);
    overflow_cascade(state);
}

/// Draw the requested wellspring output from the free pool and inject it
/// into the configured layer. A short pool scales every spring down
/// proportionally and logs `wellspring_dry`; wells dry up gracefully.
fn inject_wellsprings(state: &mut WorldState, config: &SimConfig) {
    let layer = config.wellspring_layer().index();
    let multiplier = if state.raining {
        config.day.rain_wellspring_multiplier
    } else {
        1.0
    };

    let mut desired_total: i64 = 0;
    let mut springs: Vec<(usize, usize, i64)> = Vec::new();
    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            let output = state.grid.wellspring[[x, y]];
            if output > 0 {
                let desired = (output as f32 * multiplier).floor() as i64;
                desired_total += desired;
                springs.push((x, y, desired));
            }
        }
    }
    if desired_total == 0 {
        return;
    }

    let drawn = state.pool.draw(desired_total);

    let mut injected_total: i64 = 0;
    for &(x, y, desired) in &springs {
        // Proportional share of whatever the pool could give.
        let actual = if drawn == desired_total {
            desired
        } else {
            desired * drawn / desired_total
        };
        if actual > 0 {
            state.grid.subsurface_water[[layer, x, y]] += actual as i32;
            injected_total += actual;
        }
        if actual < desired {
            state.events.log(
                state.tick,
                EventKind::WellspringDry,
                Some((x as u32, y as u32)),
                Some(desired - actual),
                "wellspring output fell short",
            );
        }
    }

    // Flooring the proportional shares can strand a remainder of the
    // draw; it goes back to the pool, not into thin air.
    if injected_total < drawn {
        state.pool.free += drawn - injected_total;
    }
    state.wellspring_drawn_total += injected_total;
}

/// Vertical transfer between adjacent layer pairs: gravitational flow
/// downward, a small capillary fraction upward. Both passes compute from
/// a snapshot into a delta buffer and apply atomically.
fn vertical_transfer(state: &mut WorldState, config: &SimConfig) {
    let width = state.grid.width;
    let height = state.grid.height;
    let rate_down = config.water.vertical_seepage_rate;
    let rate_up = config.water.capillary_rise_rate;

    let mut deltas = Array3::<i64>::zeros((LAYER_COUNT, width, height));

    // Gravitational down: upper -> lower, top to bottom so a slug of
    // water does not fall through several layers in a single pass.
    for pair in (1..LAYER_COUNT - 1).rev() {
        let upper = pair + 1;
        let lower = pair;
        for x in 0..width {
            for y in 0..height {
                let source = state.grid.subsurface_water[[upper, x, y]];
                if source <= 0 {
                    continue;
                }
                let remaining =
                    state.grid.capacity(lower, x, y) - state.grid.subsurface_water[[lower, x, y]];
                if remaining <= 0 {
                    continue;
                }
                let perm = state.grid.permeability_vert[[upper, x, y]];
                let seep = (source as f32 * perm * rate_down).floor() as i32;
                let amount = seep.min(remaining).min(source);
                if amount > 0 {
                    deltas[[upper, x, y]] -= amount as i64;
                    deltas[[lower, x, y]] += amount as i64;
                }
            }
        }
    }
    apply_deltas(state, &deltas);

    // Capillary up: lower -> upper, bounded by the receiver's remaining
    // capacity. Deeper unsaturated columns draw more, which is what
    // spreads rises toward locally low ground.
    let mut deltas = Array3::<i64>::zeros((LAYER_COUNT, width, height));
    for pair in 1..LAYER_COUNT - 1 {
        let lower = pair;
        let upper = pair + 1;
        for x in 0..width {
            for y in 0..height {
                let source = state.grid.subsurface_water[[lower, x, y]];
                if source <= 0 {
                    continue;
                }
                let remaining =
                    state.grid.capacity(upper, x, y) - state.grid.subsurface_water[[upper, x, y]];
                if remaining <= 0 {
                    continue;
                }
                let perm = state.grid.permeability_vert[[lower, x, y]];
                let rise = (source as f32 * perm * rate_up).floor() as i32;
                let amount = rise.min(remaining).min(source);
                if amount > 0 {
                    deltas[[lower, x, y]] -= amount as i64;
                    deltas[[upper, x, y]] += amount as i64;
                }
            }
        }
    }
    apply_deltas(state, &deltas);
}

/// Horizontal Darcy-style transfer within each layer, 4-cardinal, driven
/// by the hydraulic head `bedrock + column depth through the layer +
/// fill fraction`. Zero-depth cells are disconnected; the connectivity
/// cache answers that without touching terrain in the inner loop.
fn horizontal_transfer(state: &mut WorldState, config: &SimConfig) {
    let width = state.grid.width;
    let height = state.grid.height;
    let rate = config.water.horiz_rate;
    let cache = state
        .connectivity
        .as_ref()
        .expect("connectivity cache built at tick entry");

    // Column height through each layer: bedrock_base + sum of depths up
    // to and including the layer.
    let mut column_top = Array3::<i32>::zeros((LAYER_COUNT, width, height));
    for x in 0..width {
        for y in 0..height {
            let mut running = state.grid.bedrock_base[[x, y]];
            for l in 0..LAYER_COUNT {
                running += state.grid.terrain_layers[[l, x, y]];
                column_top[[l, x, y]] = running;
            }
        }
    }

    let water_before = state.grid.subsurface_water.clone();
    let mut deltas = Array3::<i64>::zeros((LAYER_COUNT, width, height));
    let mut edge_loss: i64 = 0;

    for &layer in SoilLayer::SOIL.iter() {
        let l = layer.index();
        for x in 0..width {
            for y in 0..height {
                let water = water_before[[l, x, y]];
                if water <= 0 {
                    continue;
                }
                let per_direction_cap = (water / 4) as i64;
                if per_direction_cap == 0 {
                    continue;
                }

                let capacity_here = state.grid.capacity(l, x, y).max(1);
                let head_here =
                    column_top[[l, x, y]] as f32 + water as f32 / capacity_here as f32;
                let perm = state.grid.permeability_horiz[[l, x, y]];
                if perm <= 0.0 {
                    continue;
                }

                for (dir, &(dx, dy)) in D4_OFFSETS.iter().enumerate() {
                    let nx = x as i64 + dx as i64;
                    let ny = y as i64 + dy as i64;
                    let inside = state.grid.in_bounds(nx, ny);

                    if inside {
                        if !cache.connected(l, dir, x, y) {
                            continue;
                        }
                        let (nxu, nyu) = (nx as usize, ny as usize);
                        let neighbor_capacity = state.grid.capacity(l, nxu, nyu).max(1);
                        let neighbor_head = column_top[[l, nxu, nyu]] as f32
                            + water_before[[l, nxu, nyu]] as f32 / neighbor_capacity as f32;
                        let dh = head_here - neighbor_head;
                        if dh <= 0.0 {
                            continue;
                        }
                        let remaining = (state.grid.capacity(l, nxu, nyu)
                            - water_before[[l, nxu, nyu]])
                            as i64;
                        if remaining <= 0 {
                            continue;
                        }
                        let flow = ((dh * perm * rate).floor() as i64)
                            .min(per_direction_cap)
                            .min(remaining);
                        if flow > 0 {
                            deltas[[l, x, y]] -= flow;
                            deltas[[l, nx as usize, ny as usize]] += flow;
                        }
                    } else {
                        // The aquifer pinches out at the rim: off-map the
                        // column drops to bare bedrock.
                        if config.water.edge_policy == EdgePolicy::Wall {
                            continue;
                        }
                        let dh = head_here - state.grid.bedrock_base[[x, y]] as f32;
                        if dh <= 0.0 {
                            continue;
                        }
                        let flow = ((dh * perm * rate).floor() as i64).min(per_direction_cap);
                        if flow > 0 {
                            deltas[[l, x, y]] -= flow;
                            edge_loss += flow;
                        }
                    }
                }
            }
        }
    }

    apply_deltas(state, &deltas);
    if edge_loss > 0 {
        state.pool.deposit_edge_runoff(edge_loss);
    }
}

/// Restore the capacity invariant in one bottom-to-top pass: any cell
/// above `porosity * depth` spills upward; excess leaving the topmost
/// layer becomes surface water. Empty layers (capacity zero) pass the
/// excess straight through.
fn overflow_cascade(state: &mut WorldState) {
    let width = state.grid.width;
    let height = state.grid.height;

    for x in 0..width {
        for y in 0..height {
            let mut rising: i64 = 0;
            for l in 0..LAYER_COUNT {
                let incoming = state.grid.subsurface_water[[l, x, y]] as i64 + rising;
                let capacity = state.grid.capacity(l, x, y) as i64;
                if incoming > capacity {
                    state.grid.subsurface_water[[l, x, y]] = capacity as i32;
                    rising = incoming - capacity;
                } else {
                    state.grid.subsurface_water[[l, x, y]] = incoming as i32;
                    rising = 0;
                }
            }
            if rising > 0 {
                state.grid.water[[x, y]] += rising as i32;
                state.grid.mark_dirty(x, y);
            }
        }
    }
}

fn apply_deltas(state: &mut WorldState, deltas: &Array3<i64>) {
    for l in 0..LAYER_COUNT {
        for x in 0..state.grid.width {
            for y in 0..state.grid.height {
                let d = deltas[[l, x, y]];
                if d != 0 {
                    state.grid.subsurface_water[[l, x, y]] =
                        (state.grid.subsurface_water[[l, x, y]] as i64 + d) as i32;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Material;

    /// Uniform soil column: gravel regolith (depth 20), clay subsoil (10),
    /// dirt topsoil (10).
    fn soil_state(width: usize, height: usize) -> WorldState {
        let config = SimConfig::standard();
        let mut state = WorldState::empty(1, width, height, &config);
        for x in 0..width {
            for y in 0..height {
                state.grid.bedrock_base[[x, y]] = 0;
                state.grid.set_material(SoilLayer::Regolith, x, y, Material::Gravel);
                state.grid.terrain_layers[[SoilLayer::Regolith.index(), x, y]] = 20;
                state.grid.set_material(SoilLayer::Subsoil, x, y, Material::Clay);
                state.grid.terrain_layers[[SoilLayer::Subsoil.index(), x, y]] = 10;
                state.grid.set_material(SoilLayer::Topsoil, x, y, Material::Dirt);
                state.grid.terrain_layers[[SoilLayer::Topsoil.index(), x, y]] = 10;
            }
        }
        state.grid.rebuild_elevation();
        state.grid.terrain_changed = false;
        state
    }

    fn subsurface_total(state: &WorldState) -> i64 {
        state.grid.subsurface_water.iter().map(|&w| w as i64).sum()
    }

    #[test]
    fn gravity_pulls_water_down_a_layer() {
        let mut state = soil_state(1, 1);
        let config = SimConfig::standard();
        let top = SoilLayer::Topsoil.index();
        let elu = SoilLayer::Eluviation.index();
        // Eluviation has zero depth in the fixture; give it depth so it
        // can receive directly instead of only via the cascade.
        state.grid.set_material(SoilLayer::Eluviation, 0, 0, Material::Silt);
        state.grid.terrain_layers[[elu, 0, 0]] = 10;
        state.grid.rebuild_elevation();
        // Transiently overfilled topsoil: dirt perm 0.3 at rate 0.3 moves
        // floor(20 * 0.09) = 1 unit down before the cascade clamps.
        state.grid.subsurface_water[[top, 0, 0]] = 20;
        let before = state.grid.total_grid_water();

        subsurface_tick(&mut state, &config);
        assert!(state.grid.subsurface_water[[elu, 0, 0]] > 0);
        assert!(
            state.grid.subsurface_water[[top, 0, 0]] <= state.grid.capacity(top, 0, 0)
        );
        assert_eq!(
            state.grid.total_grid_water() + state.pool.edge_runoff_total,
            before
        );
    }

    #[test]
    fn capacity_invariant_after_cascade() {
        let mut state = soil_state(2, 2);
        let config = SimConfig::standard();
        // Grossly overfill the regolith.
        state.grid.subsurface_water[[SoilLayer::Regolith.index(), 0, 0]] = 500;

        subsurface_tick(&mut state, &config);

        for l in 0..LAYER_COUNT {
            for x in 0..2 {
                for y in 0..2 {
                    assert!(
                        state.grid.subsurface_water[[l, x, y]]
                            <= state.grid.capacity(l, x, y),
                        "layer {l} cell ({x},{y}) over capacity"
                    );
                }
            }
        }
    }

    #[test]
    fn overflow_exits_topmost_layer_to_surface() {
        let mut state = soil_state(1, 1);
        // Fill far beyond the whole column's storage.
        state.grid.subsurface_water[[SoilLayer::Regolith.index(), 0, 0]] = 100;
        let before = state.grid.total_grid_water();

        overflow_cascade(&mut state);
        assert!(state.grid.water[[0, 0]] > 0);
        assert_eq!(state.grid.total_grid_water(), before);
    }

    #[test]
    fn horizontal_flow_follows_the_terrain_gradient() {
        let mut state = soil_state(2, 1);
        let mut config = SimConfig::standard();
        config.water.edge_policy = EdgePolicy::Wall;
        let l = SoilLayer::Regolith.index();
        // Thicken the left column so its regolith head sits well above
        // the right's: depth 40 vs 20 puts the head difference past the
        // integer flow floor.
        state.grid.terrain_layers[[l, 0, 0]] = 40;
        state.grid.rebuild_elevation();
        state.grid.terrain_changed = false;
        state.connectivity = Some(ConnectivityCache::build(&state.grid));
        state.grid.subsurface_water[[l, 0, 0]] = 10;

        let before = subsurface_total(&state);
        for _ in 0..10 {
            horizontal_transfer(&mut state, &config);
        }
        assert!(state.grid.subsurface_water[[l, 1, 0]] > 0);
        assert_eq!(subsurface_total(&state), before);
    }

    #[test]
    fn zero_depth_neighbour_is_disconnected() {
        let mut state = soil_state(2, 1);
        let mut config = SimConfig::standard();
        config.water.edge_policy = EdgePolicy::Wall;
        let l = SoilLayer::Topsoil.index();
        // Remove the right cell's topsoil entirely.
        state.grid.remove_material(SoilLayer::Topsoil, 1, 0, 10);
        state.grid.rebuild_elevation();
        state.grid.terrain_changed = false;
        state.grid.subsurface_water[[l, 0, 0]] = 4;

        subsurface_tick(&mut state, &config);
        assert_eq!(state.grid.subsurface_water[[l, 1, 0]], 0);
    }

    #[test]
    fn wellspring_draws_dry_pool_gracefully() {
        let mut state = soil_state(1, 1);
        let mut config = SimConfig::standard();
        // A wall rim, or edge leakage would recharge the pool.
        config.water.edge_policy = EdgePolicy::Wall;
        state.pool.free = 25;
        state.grid.wellspring[[0, 0]] = 10;

        for _ in 0..5 {
            subsurface_tick(&mut state, &config);
        }
        assert_eq!(state.pool.free, 0);
        // Pool gave out after 2.5 ticks of demand; later ticks log dry
        // events and inject nothing.
        assert!(state.events.count_kind(EventKind::WellspringDry) >= 2);
    }

    #[test]
    fn connectivity_cache_reflects_terrain() {
        let mut state = soil_state(2, 1);
        let cache = ConnectivityCache::build(&state.grid);
        let l = SoilLayer::Topsoil.index();
        // Direction 0 of D4_OFFSETS is (1, 0).
        assert!(cache.connected(l, 0, 0, 0));

        state.grid.remove_material(SoilLayer::Topsoil, 1, 0, 10);
        let cache = ConnectivityCache::build(&state.grid);
        assert!(!cache.connected(l, 0, 0, 0));
    }
}

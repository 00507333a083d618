//! Seeded world generation: a shaped fBm bedrock field, biome placement by
//! constraint-propagating collapse at coarse resolution, per-biome soil
//! columns, and sparse wellsprings wired to the closed water pool.
//!
//! Everything is deterministic from the seed. Generation reports progress
//! through a callback and can be abandoned at each phase boundary.

use ndarray::Array2;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rand::Rng;

use crate::config::SimConfig;
use crate::events::EventKind;
use crate::grid::{Biome, Material, SoilLayer, D4_OFFSETS};
use crate::state::WorldState;
use crate::structures::{Structure, StructureKind};

/// Coarse generation phases; the progress callback fires at each boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenPhase {
    Bedrock,
    Biomes,
    Terrain,
    Springs,
    Water,
    Done,
}

/// Generate a world, ignoring progress.
pub fn generate(seed: u64, width: usize, height: usize, config: &SimConfig) -> WorldState {
    generate_with_progress(seed, width, height, config, &mut |_| true)
        .expect("generation aborted by the always-continue callback")
}

/// Generate a world, invoking `progress` at each phase boundary. Returns
/// `None` if the callback asks to stop.
pub fn generate_with_progress(
    seed: u64,
    width: usize,
    height: usize,
    config: &SimConfig,
    progress: &mut dyn FnMut(GenPhase) -> bool,
) -> Option<WorldState> {
    let mut state = WorldState::empty(seed, width, height, config);

    if !progress(GenPhase::Bedrock) {
        return None;
    }
    shape_bedrock(&mut state, config);

    if !progress(GenPhase::Biomes) {
        return None;
    }
    place_biomes(&mut state, config);

    if !progress(GenPhase::Terrain) {
        return None;
    }
    populate_terrain(&mut state);

    if !progress(GenPhase::Springs) {
        return None;
    }
    place_springs(&mut state, config);

    if !progress(GenPhase::Water) {
        return None;
    }
    initialize_water(&mut state, config);

    state.grid.rebuild_elevation();
    state.grid.dirty_cells.clear();
    state.events.log(
        state.tick,
        EventKind::Generation,
        None,
        None,
        format!("world generated ({width}x{height}, seed {seed})"),
    );
    progress(GenPhase::Done);
    Some(state)
}

/// Low-frequency fBm shaped with a signed power transform so peaks and
/// basins stand out, floored at the configured minimum.
fn shape_bedrock(state: &mut WorldState, config: &SimConfig) {
    let gen = &config.generation;
    let fbm = Fbm::<Perlin>::new(state.seed as u32)
        .set_octaves(gen.noise_octaves)
        .set_frequency(gen.noise_frequency);

    let width = state.grid.width as f64;
    let height = state.grid.height as f64;
    // Baseline sits below sea level; relief rises from there.
    let baseline = -25i32;

    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            let v = fbm.get([x as f64 / width, y as f64 / height]).clamp(-1.0, 1.0);
            let shaped = v.signum() * v.abs().powf(gen.relief_exponent);
            let elevation = baseline + (shaped * gen.relief_amplitude as f64).round() as i32;
            state.grid.bedrock_base[[x, y]] = elevation.max(gen.min_bedrock_elevation);
        }
    }
}

// --- Biome placement ---------------------------------------------------

/// Which biomes may sit next to each other. Symmetric: wadis hide among
/// flats and rock, dunes never crowd a wadi, salt pans avoid rock and
/// wadi edges.
fn compatible(a: Biome, b: Biome) -> bool {
    use Biome::*;
    match (a, b) {
        (Dune, Wadi) | (Wadi, Dune) => false,
        (Rock, Salt) | (Salt, Rock) => false,
        (Wadi, Salt) | (Salt, Wadi) => false,
        _ => true,
    }
}

/// Collapse weight of a biome given the local bedrock elevation rank:
/// wadis and salt pans pool low, rock and dunes climb.
fn biome_weight(biome: Biome, elevation_percentile: f32) -> f32 {
    let base = match biome {
        Biome::Dune => 4.0,
        Biome::Flat => 5.0,
        Biome::Wadi => 2.0,
        Biome::Rock => 2.0,
        Biome::Salt => 2.0,
    };
    let modulation = match biome {
        Biome::Wadi => 2.0 * (1.0 - elevation_percentile),
        Biome::Salt => 1.5 * (1.0 - elevation_percentile),
        Biome::Rock => 2.0 * elevation_percentile,
        Biome::Dune => 0.5 + elevation_percentile,
        Biome::Flat => 1.0,
    };
    base * modulation
}

struct WfcGrid {
    width: usize,
    height: usize,
    /// Per-cell domain: a bit per biome tag.
    domains: Vec<u8>,
}

const FULL_DOMAIN: u8 = 0b11111;

impl WfcGrid {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            domains: vec![FULL_DOMAIN; width * height],
        }
    }

    #[inline]
    fn idx(&self, x: usize, y: usize) -> usize {
        x * self.height + y
    }

    fn allowed(&self, i: usize) -> impl Iterator<Item = Biome> + '_ {
        let bits = self.domains[i];
        Biome::ALL
            .iter()
            .copied()
            .filter(move |&b| bits & (1 << b as u8) != 0)
    }

    fn entropy(&self, i: usize) -> u32 {
        self.domains[i].count_ones()
    }
}

/// Wave-function-collapse style placement at coarse block resolution:
/// repeatedly collapse the lowest-entropy block to an elevation-weighted
/// tag and propagate the adjacency constraints. Contradictions restart
/// the local region; too many restarts relax the constraints so the map
/// always completes.
fn place_biomes(state: &mut WorldState, config: &SimConfig) {
    let gen = &config.generation;
    let block = gen.wfc_block_size.max(1);
    let cw = state.grid.width.div_ceil(block);
    let ch = state.grid.height.div_ceil(block);

    // Mean bedrock elevation per block, ranked into [0, 1].
    let mut block_elevation = Array2::<i32>::zeros((cw, ch));
    for bx in 0..cw {
        for by in 0..ch {
            let mut sum = 0i64;
            let mut count = 0i64;
            for x in (bx * block)..((bx + 1) * block).min(state.grid.width) {
                for y in (by * block)..((by + 1) * block).min(state.grid.height) {
                    sum += state.grid.bedrock_base[[x, y]] as i64;
                    count += 1;
                }
            }
            block_elevation[[bx, by]] = (sum / count.max(1)) as i32;
        }
    }
    let percentiles = crate::biome::elevation_percentiles(&block_elevation);

    let mut wfc = WfcGrid::new(cw, ch);
    let mut relaxed = false;
    let mut restarts = 0usize;

    loop {
        // Lowest-entropy uncollapsed cell; first in scan order on ties.
        let mut target: Option<(usize, u32)> = None;
        for i in 0..wfc.domains.len() {
            let e = wfc.entropy(i);
            if e > 1 {
                match target {
                    Some((_, best)) if best <= e => {}
                    _ => target = Some((i, e)),
                }
            }
        }
        let Some((cell, _)) = target else {
            break; // fully collapsed
        };

        // Elevation-weighted draw among the remaining tags.
        let (bx, by) = (cell / ch, cell % ch);
        let pct = percentiles[[bx, by]];
        let candidates: Vec<Biome> = wfc.allowed(cell).collect();
        let weights: Vec<f32> = candidates.iter().map(|&b| biome_weight(b, pct)).collect();
        let total: f32 = weights.iter().sum();
        let mut roll = state.rng.gen_range(0.0..total.max(f32::MIN_POSITIVE));
        let mut chosen = candidates[candidates.len() - 1];
        for (candidate, weight) in candidates.iter().zip(weights.iter()) {
            if roll < *weight {
                chosen = *candidate;
                break;
            }
            roll -= weight;
        }
        wfc.domains[cell] = 1 << chosen as u8;

        // Arc-consistency propagation from the collapsed cell.
        let mut queue = vec![cell];
        let mut contradiction = false;
        while let Some(current) = queue.pop() {
            let (cx, cy) = (current / ch, current % ch);
            for &(dx, dy) in D4_OFFSETS.iter() {
                let nx = cx as i64 + dx as i64;
                let ny = cy as i64 + dy as i64;
                if nx < 0 || ny < 0 || nx as usize >= cw || ny as usize >= ch {
                    continue;
                }
                let neighbor = wfc.idx(nx as usize, ny as usize);
                let before = wfc.domains[neighbor];
                let mut after = 0u8;
                for t in Biome::ALL {
                    if before & (1 << t as u8) == 0 {
                        continue;
                    }
                    let supported = relaxed
                        || wfc.allowed(current).any(|s| compatible(s, t));
                    if supported {
                        after |= 1 << t as u8;
                    }
                }
                if after == 0 {
                    contradiction = true;
                    break;
                }
                if after != before {
                    wfc.domains[neighbor] = after;
                    queue.push(neighbor);
                }
            }
            if contradiction {
                break;
            }
        }

        if contradiction {
            restarts += 1;
            if restarts > gen.wfc_max_restarts && !relaxed {
                relaxed = true;
                state.events.log(
                    state.tick,
                    EventKind::Generation,
                    None,
                    Some(restarts as i64),
                    "biome constraints relaxed after repeated contradictions",
                );
            }
            // Re-open the local region around the failure.
            let (cx, cy) = (cell / ch, cell % ch);
            for nx in cx.saturating_sub(2)..(cx + 3).min(cw) {
                for ny in cy.saturating_sub(2)..(cy + 3).min(ch) {
                    let i = wfc.idx(nx, ny);
                    wfc.domains[i] = FULL_DOMAIN;
                }
            }
        }
    }

    // Upsample the collapsed blocks to cell resolution.
    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            let i = wfc.idx(x / block, y / block);
            let biome = wfc.allowed(i).next().unwrap_or(Biome::Flat);
            state.grid.kind[[x, y]] = biome;
        }
    }
}

// --- Terrain columns ---------------------------------------------------

/// Total soil depth band per biome, in depth units.
fn depth_range(biome: Biome) -> (i32, i32) {
    match biome {
        Biome::Dune => (15, 25),
        Biome::Flat => (10, 20),
        Biome::Wadi => (5, 12),
        Biome::Rock => (2, 6),
        Biome::Salt => (8, 15),
    }
}

/// Material column per biome, bottom-up above bedrock:
/// (regolith, subsoil, eluviation, topsoil).
fn material_column(biome: Biome) -> (Material, Material, Material, Material) {
    match biome {
        Biome::Dune => (Material::Gravel, Material::Sand, Material::Silt, Material::Sand),
        Biome::Flat => (Material::Gravel, Material::Clay, Material::Silt, Material::Dirt),
        Biome::Wadi => (Material::Gravel, Material::Clay, Material::Silt, Material::Silt),
        Biome::Rock => (Material::Rock, Material::Rock, Material::Rock, Material::Rock),
        Biome::Salt => (Material::Gravel, Material::Silt, Material::Silt, Material::Sand),
    }
}

/// Split a biome-dependent total depth across the horizons: 30% regolith,
/// 30% subsoil, 15% eluviation, 20% topsoil, 5% organics.
fn populate_terrain(state: &mut WorldState) {
    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            let biome = state.grid.kind[[x, y]];
            let (min_depth, max_depth) = depth_range(biome);
            let total = state.rng.gen_range(min_depth..=max_depth);
            let (regolith, subsoil, eluviation, topsoil) = material_column(biome);

            let splits = [
                (SoilLayer::Regolith, total * 30 / 100, regolith),
                (SoilLayer::Subsoil, total * 30 / 100, subsoil),
                (SoilLayer::Eluviation, total * 15 / 100, eluviation),
                (SoilLayer::Topsoil, total * 20 / 100, topsoil),
                (SoilLayer::Organics, total * 5 / 100, Material::Humus),
            ];
            for (layer, depth, material) in splits {
                if depth > 0 {
                    state.grid.terrain_layers[[layer.index(), x, y]] = depth;
                    state.grid.set_material(layer, x, y, material);
                }
            }
        }
    }
    state.grid.terrain_changed = true;
}

// --- Springs and the depot ---------------------------------------------

fn place_springs(state: &mut WorldState, config: &SimConfig) {
    let gen = &config.generation;
    state.grid.rebuild_elevation();

    // Rank cells by elevation; the primary spring sits in the lowest
    // quartile so water finds somewhere to go.
    let mut ranked: Vec<(i32, usize, usize)> = Vec::with_capacity(state.grid.cell_count());
    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            ranked.push((state.grid.elevation[[x, y]], x, y));
        }
    }
    ranked.sort_unstable();
    let lowland = ranked.len().div_ceil(4);
    let pick = state.rng.gen_range(0..lowland);
    let (_, px, py) = ranked[pick];

    state.grid.wellspring[[px, py]] =
        state.rng.gen_range(gen.primary_spring_min..=gen.primary_spring_max);
    // A wadi halo marks the oasis.
    for dx in -1i64..=1 {
        for dy in -1i64..=1 {
            let nx = px as i64 + dx;
            let ny = py as i64 + dy;
            if state.grid.in_bounds(nx, ny) {
                state.grid.kind[[nx as usize, ny as usize]] = Biome::Wadi;
            }
        }
    }

    // Secondary springs away from the primary and the depot site.
    let (cx, cy) = (state.grid.width / 2, state.grid.height / 2);
    let mut placed = 0;
    let mut attempts = 0;
    while placed < gen.secondary_spring_count && attempts < 20 {
        attempts += 1;
        let sx = state.rng.gen_range(0..state.grid.width);
        let sy = state.rng.gen_range(0..state.grid.height);
        let near_center = sx.abs_diff(cx) < 6 && sy.abs_diff(cy) < 6;
        if state.grid.wellspring[[sx, sy]] > 0 || near_center {
            continue;
        }
        state.grid.wellspring[[sx, sy]] =
            state.rng.gen_range(gen.secondary_spring_min..=gen.secondary_spring_max);
        placed += 1;
    }

    // The starting depot anchors the centre of the map.
    let id = state.next_structure_id;
    state.next_structure_id += 1;
    state
        .structures
        .insert((cx, cy), Structure::new(id, StructureKind::Depot));
    state.grid.structure_id[[cx, cy]] = id;
}

/// Seed the water system so the closed-system invariant holds from tick
/// zero: saturated regolith under the springs, a calm atmosphere, and the
/// configured reserves.
fn initialize_water(state: &mut WorldState, config: &SimConfig) {
    let gen = &config.generation;
    let regolith = SoilLayer::Regolith.index();

    for x in 0..state.grid.width {
        for y in 0..state.grid.height {
            if state.grid.wellspring[[x, y]] > 0 {
                let capacity = state.grid.capacity(regolith, x, y);
                state.grid.subsurface_water[[regolith, x, y]] = capacity;
                state.grid.water[[x, y]] = 20;
            }
            let humidity = 0.35 + state.rng.gen_range(-0.05..0.05f32);
            state.grid.humidity[[x, y]] = humidity;
            let column = state.grid.total_water_at(x, y) as f32;
            state.grid.moisture[[x, y]] = column;
        }
    }

    state.pool.free = gen.initial_water_pool;
    state.pool.atmospheric = gen.initial_atmospheric;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::LAYER_COUNT;

    #[test]
    fn generation_is_deterministic_per_seed() {
        let config = SimConfig::standard();
        let a = generate(99, 24, 16, &config);
        let b = generate(99, 24, 16, &config);
        assert_eq!(a.grid.bedrock_base, b.grid.bedrock_base);
        assert_eq!(a.grid.kind, b.grid.kind);
        assert_eq!(a.grid.terrain_layers, b.grid.terrain_layers);
        assert_eq!(a.grid.wellspring, b.grid.wellspring);
    }

    #[test]
    fn different_seeds_differ() {
        let config = SimConfig::standard();
        let a = generate(1, 24, 16, &config);
        let b = generate(2, 24, 16, &config);
        assert_ne!(a.grid.bedrock_base, b.grid.bedrock_base);
    }

    #[test]
    fn bedrock_respects_the_floor() {
        let config = SimConfig::standard();
        let state = generate(5, 32, 32, &config);
        for &b in state.grid.bedrock_base.iter() {
            assert!(b >= config.generation.min_bedrock_elevation);
        }
    }

    #[test]
    fn material_depth_coupling_holds_after_generation() {
        let config = SimConfig::standard();
        let state = generate(17, 24, 24, &config);
        for l in 0..LAYER_COUNT {
            for x in 0..24 {
                for y in 0..24 {
                    let depth = state.grid.terrain_layers[[l, x, y]];
                    let material = state.grid.terrain_materials[[l, x, y]];
                    assert_eq!(
                        depth == 0,
                        material == Material::Empty,
                        "layer {l} at ({x},{y}): depth {depth}, material {material:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn at_least_one_spring_and_a_depot_exist() {
        let config = SimConfig::standard();
        let state = generate(3, 32, 24, &config);
        let springs = state.grid.wellspring.iter().filter(|&&w| w > 0).count();
        assert!(springs >= 1);
        let depot = state
            .structures
            .values()
            .any(|s| s.kind() == StructureKind::Depot);
        assert!(depot);
    }

    #[test]
    fn capacity_invariant_holds_at_start() {
        let config = SimConfig::standard();
        let state = generate(11, 24, 24, &config);
        for l in 0..LAYER_COUNT {
            for x in 0..24 {
                for y in 0..24 {
                    assert!(
                        state.grid.subsurface_water[[l, x, y]] <= state.grid.capacity(l, x, y)
                    );
                }
            }
        }
    }

    #[test]
    fn progress_callback_can_abort() {
        let config = SimConfig::standard();
        let mut calls = 0;
        let result = generate_with_progress(1, 16, 16, &config, &mut |_| {
            calls += 1;
            calls < 3
        });
        assert!(result.is_none());
        assert_eq!(calls, 3);
    }

    #[test]
    fn wadi_blocks_never_touch_dune_blocks() {
        let config = SimConfig::standard();
        let state = generate(23, 32, 32, &config);
        let relaxed = state
            .events
            .iter()
            .any(|e| e.message.contains("relaxed"));
        if relaxed {
            return; // constraints were dropped; nothing to assert
        }
        let block = config.generation.wfc_block_size;
        // Compare block-resolution tags across block boundaries, skipping
        // the hand-painted wadi halo around the primary spring.
        let spring_halo: Vec<(usize, usize)> = {
            let mut halo = Vec::new();
            for x in 0..32 {
                for y in 0..32 {
                    if state.grid.wellspring[[x, y]] > 0 {
                        for dx in -1i64..=1 {
                            for dy in -1i64..=1 {
                                let nx = x as i64 + dx;
                                let ny = y as i64 + dy;
                                if state.grid.in_bounds(nx, ny) {
                                    halo.push(((nx as usize) / block, (ny as usize) / block));
                                }
                            }
                        }
                    }
                }
            }
            halo
        };
        let blocks = 32 / block;
        for bx in 0..blocks {
            for by in 0..blocks {
                if spring_halo.contains(&(bx, by)) {
                    continue;
                }
                let here = state.grid.kind[[bx * block, by * block]];
                for (dx, dy) in [(1i64, 0i64), (0, 1)] {
                    let nx = bx as i64 + dx;
                    let ny = by as i64 + dy;
                    if nx as usize >= blocks || ny as usize >= blocks {
                        continue;
                    }
                    if spring_halo.contains(&(nx as usize, ny as usize)) {
                        continue;
                    }
                    let there = state.grid.kind[[nx as usize * block, ny as usize * block]];
                    assert!(
                        compatible(here, there),
                        "incompatible biomes {here:?}/{there:?} at blocks ({bx},{by})"
                    );
                }
            }
        }
    }
}

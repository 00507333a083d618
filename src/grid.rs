//! Struct-of-Arrays world grid: every spatial field is a contiguous dense
//! array so that each physics pass touches only the buffers it needs.
//!
//! One cell is one spatial unit; depths and water quantities are integer
//! units (1 unit = 100 mm). Soil is a fixed six-layer horizon stack per
//! cell, ordered bottom-up.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 8-neighbour offsets, clockwise from north-west. Diagonals are the odd
/// indices.
pub const D8_OFFSETS: [(i32, i32); 8] = [
    (-1, -1), (0, -1), (1, -1),
    (-1, 0),           (1, 0),
    (-1, 1),  (0, 1),  (1, 1),
];

/// 4-cardinal offsets used by the subsurface kernels.
pub const D4_OFFSETS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Returns true for the diagonal entries of [`D8_OFFSETS`].
#[inline]
pub fn is_diagonal(dx: i32, dy: i32) -> bool {
    dx != 0 && dy != 0
}

/// Soil horizons in strict bottom-up order. `Bedrock` is index 0 so that a
/// cumulative sum over layer depths walks upward from the bedrock base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SoilLayer {
    Bedrock = 0,
    Regolith = 1,
    Subsoil = 2,
    Eluviation = 3,
    Topsoil = 4,
    Organics = 5,
}

/// Number of soil layers, bedrock included.
pub const LAYER_COUNT: usize = 6;

impl SoilLayer {
    pub const ALL: [SoilLayer; LAYER_COUNT] = [
        SoilLayer::Bedrock,
        SoilLayer::Regolith,
        SoilLayer::Subsoil,
        SoilLayer::Eluviation,
        SoilLayer::Topsoil,
        SoilLayer::Organics,
    ];

    /// The five water-bearing layers, bottom-up (bedrock holds no water).
    pub const SOIL: [SoilLayer; 5] = [
        SoilLayer::Regolith,
        SoilLayer::Subsoil,
        SoilLayer::Eluviation,
        SoilLayer::Topsoil,
        SoilLayer::Organics,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<SoilLayer> {
        SoilLayer::ALL.get(idx).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SoilLayer::Bedrock => "bedrock",
            SoilLayer::Regolith => "regolith",
            SoilLayer::Subsoil => "subsoil",
            SoilLayer::Eluviation => "eluviation",
            SoilLayer::Topsoil => "topsoil",
            SoilLayer::Organics => "organics",
        }
    }

    /// Default material for a layer that becomes non-empty without an
    /// explicit material (e.g. deposition onto cleared ground).
    pub fn default_material(self) -> Material {
        match self {
            SoilLayer::Bedrock => Material::Bedrock,
            SoilLayer::Regolith => Material::Gravel,
            SoilLayer::Subsoil => Material::Clay,
            SoilLayer::Eluviation => Material::Silt,
            SoilLayer::Topsoil => Material::Dirt,
            SoilLayer::Organics => Material::Humus,
        }
    }
}

/// Earth material identity. `Empty` is the tag for a zero-depth layer; the
/// material/depth coupling invariant ties the two together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Material {
    #[default]
    Empty = 0,
    Bedrock = 1,
    Rock = 2,
    Gravel = 3,
    Sand = 4,
    Dirt = 5,
    Clay = 6,
    Silt = 7,
    Humus = 8,
}

/// Physical properties of a material. Permeabilities and porosity are
/// fractions in [0, 1]; `evap_multiplier` scales surface evaporation.
#[derive(Debug, Clone, Copy)]
pub struct MaterialProps {
    pub permeability_vertical: f32,
    pub permeability_horizontal: f32,
    pub porosity: f32,
    pub excavatable: bool,
    pub evap_multiplier: f32,
}

impl Material {
    pub const TAGS: [Material; 9] = [
        Material::Empty,
        Material::Bedrock,
        Material::Rock,
        Material::Gravel,
        Material::Sand,
        Material::Dirt,
        Material::Clay,
        Material::Silt,
        Material::Humus,
    ];

    pub fn from_tag(tag: u8) -> Option<Material> {
        Material::TAGS.get(tag as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Material::Empty => "empty",
            Material::Bedrock => "bedrock",
            Material::Rock => "rock",
            Material::Gravel => "gravel",
            Material::Sand => "sand",
            Material::Dirt => "dirt",
            Material::Clay => "clay",
            Material::Silt => "silt",
            Material::Humus => "humus",
        }
    }

    /// Material property table. Values mirror a typical desert soil
    /// profile: gravel drains fast and stores little, clay is tight but
    /// porous, humus holds the most water.
    pub fn props(self) -> MaterialProps {
        match self {
            Material::Empty | Material::Bedrock => MaterialProps {
                permeability_vertical: 0.0,
                permeability_horizontal: 0.0,
                porosity: 0.0,
                excavatable: false,
                evap_multiplier: 0.0,
            },
            Material::Rock => MaterialProps {
                permeability_vertical: 0.05,
                permeability_horizontal: 0.03,
                porosity: 0.10,
                excavatable: false,
                evap_multiplier: 0.9,
            },
            Material::Gravel => MaterialProps {
                permeability_vertical: 0.90,
                permeability_horizontal: 0.70,
                porosity: 0.25,
                excavatable: true,
                evap_multiplier: 1.3,
            },
            Material::Sand => MaterialProps {
                permeability_vertical: 0.60,
                permeability_horizontal: 0.40,
                porosity: 0.35,
                excavatable: true,
                evap_multiplier: 1.2,
            },
            Material::Dirt => MaterialProps {
                permeability_vertical: 0.30,
                permeability_horizontal: 0.20,
                porosity: 0.40,
                excavatable: true,
                evap_multiplier: 1.0,
            },
            Material::Clay => MaterialProps {
                permeability_vertical: 0.05,
                permeability_horizontal: 0.02,
                porosity: 0.45,
                excavatable: true,
                evap_multiplier: 0.7,
            },
            Material::Silt => MaterialProps {
                permeability_vertical: 0.20,
                permeability_horizontal: 0.15,
                porosity: 0.42,
                excavatable: true,
                evap_multiplier: 0.85,
            },
            Material::Humus => MaterialProps {
                permeability_vertical: 0.40,
                permeability_horizontal: 0.25,
                porosity: 0.60,
                excavatable: true,
                evap_multiplier: 0.6,
            },
        }
    }
}

/// Biome classification per cell. Drives evaporation and reclassification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Biome {
    Dune = 0,
    #[default]
    Flat = 1,
    Wadi = 2,
    Rock = 3,
    Salt = 4,
}

impl Biome {
    pub const ALL: [Biome; 5] = [Biome::Dune, Biome::Flat, Biome::Wadi, Biome::Rock, Biome::Salt];

    pub fn from_tag(tag: u8) -> Option<Biome> {
        Biome::ALL.get(tag as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Biome::Dune => "dune",
            Biome::Flat => "flat",
            Biome::Wadi => "wadi",
            Biome::Rock => "rock",
            Biome::Salt => "salt",
        }
    }

    /// Base surface evaporation in water units per tick at heat 100.
    pub fn base_evap(self) -> i32 {
        match self {
            Biome::Dune => 1,
            Biome::Flat => 1,
            Biome::Wadi => 0,
            Biome::Rock => 1,
            Biome::Salt => 2,
        }
    }
}

/// Dense per-cell state. Shapes are `(width, height)` for surface fields
/// and `(LAYER_COUNT, width, height)` for layered fields, indexed
/// `[[x, y]]` / `[[layer, x, y]]`.
#[derive(Debug)]
pub struct WorldGrid {
    pub width: usize,
    pub height: usize,

    // === Terrain ===
    /// Rigid floor elevation, never below the configured minimum.
    pub bedrock_base: Array2<i32>,
    /// Depth of material per layer (>= 0).
    pub terrain_layers: Array3<i32>,
    /// Material identity per layer; `Empty` exactly where depth is zero.
    pub terrain_materials: Array3<Material>,
    /// Derived: `bedrock_base + sum(terrain_layers)`. Rebuilt when
    /// `terrain_changed` is set.
    pub elevation: Array2<i32>,

    // === Water ===
    /// Ponded surface water per cell (>= 0).
    pub water: Array2<i32>,
    /// Underground water per layer (>= 0).
    pub subsurface_water: Array3<i32>,

    // === Material property grids, derived from terrain_materials ===
    pub porosity: Array3<f32>,
    pub permeability_vert: Array3<f32>,
    pub permeability_horiz: Array3<f32>,

    // === Classification and sources ===
    pub kind: Array2<Biome>,
    /// Per-tick water injection request; zero for most cells.
    pub wellspring: Array2<i32>,

    // === Atmosphere samples ===
    pub humidity: Array2<f32>,
    pub wind_x: Array2<f32>,
    pub wind_y: Array2<f32>,

    // === Slow-moving aggregates ===
    /// Exponential moving average of surface + subsurface water.
    pub moisture: Array2<f32>,
    /// Daily accumulator: surface water transferred out of each cell.
    pub water_passage: Array2<f32>,
    /// Daily accumulator: wind magnitude over dry, exposed cells.
    pub wind_exposure: Array2<f32>,

    /// Occupying structure id, 0 when the cell is free.
    pub structure_id: Array2<u32>,

    /// Cells whose static render needs invalidation. Drained by the host.
    pub dirty_cells: HashSet<(usize, usize)>,
    /// Set by any terrain mutation; cleared by `rebuild_elevation`.
    pub terrain_changed: bool,
}

impl WorldGrid {
    pub fn new(width: usize, height: usize) -> Self {
        let shape2 = (width, height);
        let shape3 = (LAYER_COUNT, width, height);
        Self {
            width,
            height,
            bedrock_base: Array2::zeros(shape2),
            terrain_layers: Array3::zeros(shape3),
            terrain_materials: Array3::default(shape3),
            elevation: Array2::zeros(shape2),
            water: Array2::zeros(shape2),
            subsurface_water: Array3::zeros(shape3),
            porosity: Array3::zeros(shape3),
            permeability_vert: Array3::zeros(shape3),
            permeability_horiz: Array3::zeros(shape3),
            kind: Array2::default(shape2),
            wellspring: Array2::zeros(shape2),
            humidity: Array2::zeros(shape2),
            wind_x: Array2::zeros(shape2),
            wind_y: Array2::zeros(shape2),
            moisture: Array2::zeros(shape2),
            water_passage: Array2::zeros(shape2),
            wind_exposure: Array2::zeros(shape2),
            structure_id: Array2::zeros(shape2),
            dirty_cells: HashSet::new(),
            terrain_changed: true,
        }
    }

    #[inline]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Rebuild the derived elevation grid and clear `terrain_changed`.
    pub fn rebuild_elevation(&mut self) {
        for x in 0..self.width {
            for y in 0..self.height {
                let mut total = self.bedrock_base[[x, y]];
                for l in 0..LAYER_COUNT {
                    total += self.terrain_layers[[l, x, y]];
                }
                self.elevation[[x, y]] = total;
            }
        }
        self.terrain_changed = false;
    }

    /// Topmost layer with non-zero depth, excluding bedrock. `None` means
    /// bare bedrock.
    pub fn exposed_layer(&self, x: usize, y: usize) -> Option<SoilLayer> {
        for &layer in SoilLayer::SOIL.iter().rev() {
            if self.terrain_layers[[layer.index(), x, y]] > 0 {
                return Some(layer);
            }
        }
        None
    }

    /// Material visible at the surface of a cell.
    pub fn exposed_material(&self, x: usize, y: usize) -> Material {
        match self.exposed_layer(x, y) {
            Some(layer) => self.terrain_materials[[layer.index(), x, y]],
            None => Material::Bedrock,
        }
    }

    /// Water storage capacity of a layer cell: `floor(porosity * depth)`.
    #[inline]
    pub fn capacity(&self, layer: usize, x: usize, y: usize) -> i32 {
        let depth = self.terrain_layers[[layer, x, y]];
        (self.porosity[[layer, x, y]] * depth as f32).floor() as i32
    }

    /// Surface plus all subsurface water at a cell.
    pub fn total_water_at(&self, x: usize, y: usize) -> i64 {
        let mut total = self.water[[x, y]] as i64;
        for l in 0..LAYER_COUNT {
            total += self.subsurface_water[[l, x, y]] as i64;
        }
        total
    }

    /// Sum of all water held in the grid (surface + subsurface).
    pub fn total_grid_water(&self) -> i64 {
        let surface: i64 = self.water.iter().map(|&w| w as i64).sum();
        let sub: i64 = self.subsurface_water.iter().map(|&w| w as i64).sum();
        surface + sub
    }

    #[inline]
    pub fn mark_dirty(&mut self, x: usize, y: usize) {
        self.dirty_cells.insert((x, y));
    }

    /// Add material depth to a layer, assigning the layer's default
    /// material if it was empty. Refreshes the derived property grids for
    /// the cell and flags the terrain as changed.
    pub fn add_material(&mut self, layer: SoilLayer, x: usize, y: usize, amount: i32) {
        debug_assert!(amount >= 0);
        if amount == 0 {
            return;
        }
        let l = layer.index();
        if self.terrain_layers[[l, x, y]] == 0 {
            self.set_material(layer, x, y, layer.default_material());
        }
        self.terrain_layers[[l, x, y]] += amount;
        self.terrain_changed = true;
        self.mark_dirty(x, y);
    }

    /// Remove up to `amount` depth from a layer, clearing the material tag
    /// when the layer empties. Returns the depth actually removed.
    pub fn remove_material(&mut self, layer: SoilLayer, x: usize, y: usize, amount: i32) -> i32 {
        debug_assert!(amount >= 0);
        let l = layer.index();
        let removed = amount.min(self.terrain_layers[[l, x, y]]);
        if removed == 0 {
            return 0;
        }
        self.terrain_layers[[l, x, y]] -= removed;
        if self.terrain_layers[[l, x, y]] == 0 {
            self.set_material(layer, x, y, Material::Empty);
        }
        self.terrain_changed = true;
        self.mark_dirty(x, y);
        removed
    }

    /// Set the material tag for a layer cell and refresh the derived
    /// property grids from the material library.
    pub fn set_material(&mut self, layer: SoilLayer, x: usize, y: usize, material: Material) {
        let l = layer.index();
        let props = material.props();
        self.terrain_materials[[l, x, y]] = material;
        self.porosity[[l, x, y]] = props.porosity;
        self.permeability_vert[[l, x, y]] = props.permeability_vertical;
        self.permeability_horiz[[l, x, y]] = props.permeability_horizontal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> WorldGrid {
        let mut grid = WorldGrid::new(4, 3);
        for x in 0..4 {
            for y in 0..3 {
                grid.bedrock_base[[x, y]] = 5;
                grid.set_material(SoilLayer::Regolith, x, y, Material::Gravel);
                grid.terrain_layers[[SoilLayer::Regolith.index(), x, y]] = 10;
                grid.set_material(SoilLayer::Topsoil, x, y, Material::Dirt);
                grid.terrain_layers[[SoilLayer::Topsoil.index(), x, y]] = 4;
            }
        }
        grid.rebuild_elevation();
        grid
    }

    #[test]
    fn elevation_is_bedrock_plus_layers() {
        let grid = small_grid();
        assert_eq!(grid.elevation[[1, 1]], 5 + 10 + 4);
    }

    #[test]
    fn exposed_layer_skips_empty_layers() {
        let mut grid = small_grid();
        assert_eq!(grid.exposed_layer(0, 0), Some(SoilLayer::Topsoil));
        grid.remove_material(SoilLayer::Topsoil, 0, 0, 4);
        assert_eq!(grid.exposed_layer(0, 0), Some(SoilLayer::Regolith));
        grid.remove_material(SoilLayer::Regolith, 0, 0, 10);
        assert_eq!(grid.exposed_layer(0, 0), None);
        assert_eq!(grid.exposed_material(0, 0), Material::Bedrock);
    }

    #[test]
    fn material_cleared_when_layer_empties() {
        let mut grid = small_grid();
        let removed = grid.remove_material(SoilLayer::Topsoil, 2, 1, 99);
        assert_eq!(removed, 4);
        assert_eq!(
            grid.terrain_materials[[SoilLayer::Topsoil.index(), 2, 1]],
            Material::Empty
        );
        assert!(grid.terrain_changed);
    }

    #[test]
    fn add_material_assigns_default_material() {
        let mut grid = small_grid();
        grid.add_material(SoilLayer::Organics, 3, 2, 2);
        assert_eq!(
            grid.terrain_materials[[SoilLayer::Organics.index(), 3, 2]],
            Material::Humus
        );
        assert_eq!(grid.terrain_layers[[SoilLayer::Organics.index(), 3, 2]], 2);
    }

    #[test]
    fn capacity_floors_porosity_times_depth() {
        let grid = small_grid();
        // Topsoil: dirt porosity 0.40, depth 4 -> capacity 1.
        assert_eq!(grid.capacity(SoilLayer::Topsoil.index(), 0, 0), 1);
        // Regolith: gravel porosity 0.25, depth 10 -> capacity 2.
        assert_eq!(grid.capacity(SoilLayer::Regolith.index(), 0, 0), 2);
    }

    #[test]
    fn material_depth_coupling_holds_in_fresh_grid() {
        let grid = small_grid();
        for l in 0..LAYER_COUNT {
            for x in 0..grid.width {
                for y in 0..grid.height {
                    let depth = grid.terrain_layers[[l, x, y]];
                    let material = grid.terrain_materials[[l, x, y]];
                    assert_eq!(depth == 0, material == Material::Empty);
                }
            }
        }
    }
}

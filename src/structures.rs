//! Placeable structures. Behaviour is a tagged variant dispatched through
//! a three-method surface (`tick`, `describe`, `demolish`), not a deep
//! hierarchy, just per-kind parameters on one struct.

use crate::config::StructureParams;
use crate::events::EventKind;
use crate::grid::SoilLayer;
use crate::state::WorldState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StructureKind {
    Cistern = 0,
    Condenser = 1,
    Planter = 2,
    Depot = 3,
}

impl StructureKind {
    pub const ALL: [StructureKind; 4] = [
        StructureKind::Cistern,
        StructureKind::Condenser,
        StructureKind::Planter,
        StructureKind::Depot,
    ];

    pub fn from_tag(tag: u8) -> Option<StructureKind> {
        StructureKind::ALL.get(tag as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            StructureKind::Cistern => "cistern",
            StructureKind::Condenser => "condenser",
            StructureKind::Planter => "planter",
            StructureKind::Depot => "depot",
        }
    }

    /// Build cost as (scrap, seeds).
    pub fn cost(self) -> (i64, i64) {
        match self {
            StructureKind::Cistern => (3, 0),
            StructureKind::Condenser => (2, 0),
            StructureKind::Planter => (1, 1),
            StructureKind::Depot => (0, 0),
        }
    }
}

/// One placed structure. `stored` is cistern water; `growth`/`wither`
/// belong to planters and stay zero elsewhere.
#[derive(Debug, Clone)]
pub struct Structure {
    pub id: u32,
    kind: StructureKind,
    pub stored: i32,
    pub growth: i32,
    pub wither: i32,
}

/// Ticks of starvation a planter survives at zero growth.
const PLANTER_WITHER_LIMIT: i32 = 200;

impl Structure {
    pub fn new(id: u32, kind: StructureKind) -> Self {
        Self {
            id,
            kind,
            stored: 0,
            growth: 0,
            wither: 0,
        }
    }

    pub fn kind(&self) -> StructureKind {
        self.kind
    }

    /// Water held by the structure, counted in the conservation total.
    pub fn stored_water(&self) -> i64 {
        self.stored as i64
    }

    /// Short status line for survey output and the HUD.
    pub fn describe(&self) -> String {
        match self.kind {
            StructureKind::Cistern => format!("cistern (stored {})", self.stored),
            StructureKind::Condenser => "condenser".to_string(),
            StructureKind::Planter => format!("planter (growth {}%)", self.growth),
            StructureKind::Depot => "depot".to_string(),
        }
    }

    /// Release held resources back to the cell. Returns surface water to
    /// add at the demolition site.
    pub fn demolish(self) -> i32 {
        self.stored
    }
}

/// Advance every structure one tick. Returns cells whose planter died so
/// the caller can clear their occupancy.
pub fn structures_tick(state: &mut WorldState, params: &StructureParams) {
    // Take the map to walk it while mutating the rest of the state.
    let mut structures = std::mem::take(&mut state.structures);
    let mut died: Vec<(usize, usize)> = Vec::new();

    for (&(x, y), structure) in structures.iter_mut() {
        match structure.kind {
            StructureKind::Cistern => tick_cistern(state, structure, x, y, params),
            StructureKind::Condenser => tick_condenser(state, x, y, params),
            StructureKind::Planter => {
                if tick_planter(state, structure, x, y, params) {
                    died.push((x, y));
                }
            }
            StructureKind::Depot => {}
        }
    }

    for cell in died {
        if let Some(structure) = structures.remove(&cell) {
            state.grid.structure_id[[cell.0, cell.1]] = 0;
            state.grid.mark_dirty(cell.0, cell.1);
            state.events.log(
                state.tick,
                EventKind::StructureRemoved,
                Some((cell.0 as u32, cell.1 as u32)),
                None,
                format!("{} withered away", structure.kind.name()),
            );
        }
    }

    state.structures = structures;
}

/// Cisterns pull ponded water into storage and lose a trickle with heat;
/// part of the loss recondenses on the cell, the rest joins the
/// atmospheric reserve.
fn tick_cistern(
    state: &mut WorldState,
    structure: &mut Structure,
    x: usize,
    y: usize,
    params: &StructureParams,
) {
    let surface = state.grid.water[[x, y]];
    if surface > params.cistern_transfer_rate && structure.stored < params.cistern_capacity {
        let transfer = params
            .cistern_transfer_rate
            .min(surface)
            .min(params.cistern_capacity - structure.stored);
        state.grid.water[[x, y]] -= transfer;
        structure.stored += transfer;
    }

    let loss = (params.cistern_loss_rate * state.heat) / 100;
    let drained = loss.min(structure.stored);
    if drained > 0 {
        structure.stored -= drained;
        let recovered = (drained as f32 * params.cistern_loss_recovery).floor() as i32;
        state.grid.water[[x, y]] += recovered;
        state.pool.deposit_atmospheric((drained - recovered) as i64);
    }
}

/// Condensers pull a small amount out of the sky each tick.
fn tick_condenser(state: &mut WorldState, x: usize, y: usize, params: &StructureParams) {
    let taken = state.pool.condense(params.condenser_output);
    if taken > 0 {
        state.grid.water[[x, y]] += taken as i32;
    }
}

/// Planters grow while the cell stays moist, transpiring a fixed budget
/// per growth tick; maturation thickens the organics layer. Returns true
/// when the plant has died.
fn tick_planter(
    state: &mut WorldState,
    structure: &mut Structure,
    x: usize,
    y: usize,
    params: &StructureParams,
) -> bool {
    let moist = state.grid.moisture[[x, y]] >= params.planter_moisture_threshold;
    let budget = params.planter_water_per_tick;

    let watered = moist && take_cell_water(state, x, y, budget);
    if watered {
        structure.wither = 0;
        structure.growth += params.planter_growth_per_tick;
        state.pool.deposit_atmospheric(budget as i64);

        if structure.growth >= params.planter_growth_target {
            structure.growth = 0;
            let organics = SoilLayer::Organics.index();
            if state.grid.terrain_layers[[organics, x, y]] < params.max_organics_depth {
                state
                    .grid
                    .add_material(SoilLayer::Organics, x, y, params.planter_organics_gain);
                state.invalidate_connectivity();
            }
            state.inventory.biomass += 1;
            state.inventory.seeds += 1;
        }
        return false;
    }

    // Starved: wind back, then wither out entirely.
    if structure.growth > 0 {
        structure.growth -= 1;
    } else {
        structure.wither += 1;
    }
    structure.wither > PLANTER_WITHER_LIMIT
}

/// Take `amount` from the cell, surface first then topmost soil water.
/// Returns false (taking nothing) when the cell cannot cover it.
fn take_cell_water(state: &mut WorldState, x: usize, y: usize, amount: i32) -> bool {
    let surface = state.grid.water[[x, y]];
    if surface >= amount {
        state.grid.water[[x, y]] -= amount;
        return true;
    }
    if let Some(layer) = state.grid.exposed_layer(x, y) {
        let l = layer.index();
        let need = amount - surface;
        if state.grid.subsurface_water[[l, x, y]] >= need {
            state.grid.water[[x, y]] = 0;
            state.grid.subsurface_water[[l, x, y]] -= need;
            return true;
        }
    }
    false
}

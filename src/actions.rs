//! Player action entry points. Every action validates first and mutates
//! only after validation passes, so a failed action leaves the state
//! untouched. Refusal messages are rendered to the player verbatim.

use thiserror::Error;

use crate::config::SimConfig;
use crate::events::EventKind;
use crate::grid::{Biome, Material, SoilLayer, LAYER_COUNT};
use crate::state::WorldState;
use crate::structures::{Structure, StructureKind};

/// Cardinal strip direction for trenching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    East,
    West,
    South,
    North,
}

impl Direction {
    pub fn offset(self) -> (i64, i64) {
        match self {
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
            Direction::South => (0, 1),
            Direction::North => (0, -1),
        }
    }

    /// Perpendicular side offsets, (minus, plus). The minus side takes
    /// the odd unit of any uneven split, which keeps trenching
    /// deterministic.
    pub fn sides(self) -> ((i64, i64), (i64, i64)) {
        match self {
            Direction::East | Direction::West => ((0, -1), (0, 1)),
            Direction::South | Direction::North => ((-1, 0), (1, 0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrenchMode {
    Flat,
    SlopeDown,
    SlopeUp,
}

/// Everything a player can do to the world.
#[derive(Debug, Clone)]
pub enum Action {
    DigTrench {
        origin: (usize, usize),
        direction: Direction,
        mode: TrenchMode,
    },
    LowerGround {
        cell: (usize, usize),
    },
    RaiseGround {
        cell: (usize, usize),
    },
    PourWater {
        cell: (usize, usize),
        amount: i64,
    },
    CollectWater {
        cell: (usize, usize),
        amount: i64,
    },
    Build {
        cell: (usize, usize),
        kind: StructureKind,
    },
    Demolish {
        cell: (usize, usize),
    },
    Survey {
        cell: (usize, usize),
    },
}

/// Successful action result.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Message(String),
    Survey(SurveyReport),
}

impl ActionOutcome {
    fn msg(text: impl Into<String>) -> Self {
        ActionOutcome::Message(text.into())
    }
}

/// Read-only snapshot of one cell, produced by `survey`.
#[derive(Debug, Clone)]
pub struct SurveyReport {
    pub cell: (usize, usize),
    pub biome: Biome,
    pub elevation: i32,
    pub surface_water: i32,
    pub moisture: f32,
    pub wellspring_output: i32,
    /// Bottom-up: (layer, material, depth, water).
    pub layers: Vec<(SoilLayer, Material, i32, i32)>,
    pub structure: Option<String>,
}

impl std::fmt::Display for SurveyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cell ({}, {}) | {} | elev {} | surface {} | moisture {:.0}",
            self.cell.0,
            self.cell.1,
            self.biome.name(),
            self.elevation,
            self.surface_water,
            self.moisture,
        )?;
        if self.wellspring_output > 0 {
            write!(f, " | spring {}/t", self.wellspring_output)?;
        }
        for (layer, material, depth, water) in self.layers.iter().rev() {
            if *depth > 0 {
                write!(f, "\n  {:<10} {:<7} depth {:>3} water {:>3}", layer.name(), material.name(), depth, water)?;
            }
        }
        if let Some(structure) = &self.structure {
            write!(f, "\n  {structure}")?;
        }
        Ok(())
    }
}

/// Structured refusals; the Display strings go straight to the player.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("cell ({0}, {1}) is outside the grid")]
    OutOfBounds(i64, i64),
    #[error("amount must be between 1 and {max}, got {got}")]
    InvalidAmount { got: i64, max: i64 },
    #[error("cannot dig deeper; the bedrock floor is reached")]
    BedrockFloor,
    #[error("a {0} already occupies that cell")]
    Occupied(&'static str),
    #[error("no structure stands on that cell")]
    NoStructure,
    #[error("not enough {resource}: need {need}, have {have}")]
    InsufficientResources {
        resource: &'static str,
        need: i64,
        have: i64,
    },
    #[error("nothing to collect there")]
    NothingToCollect,
    #[error("{0} is too hard to dig by hand")]
    TooHard(&'static str),
    #[error("the trench would run off the map")]
    TrenchAtRim,
    #[error("no soil to move; the strip is bare bedrock")]
    NothingToDig,
}

/// Validate and execute one action.
pub fn dispatch(
    state: &mut WorldState,
    config: &SimConfig,
    action: Action,
) -> Result<ActionOutcome, ActionError> {
    match action {
        Action::DigTrench {
            origin,
            direction,
            mode,
        } => dig_trench(state, config, origin, direction, mode),
        Action::LowerGround { cell } => lower_ground(state, config, cell),
        Action::RaiseGround { cell } => raise_ground(state, config, cell),
        Action::PourWater { cell, amount } => pour_water(state, config, cell, amount),
        Action::CollectWater { cell, amount } => collect_water(state, config, cell, amount),
        Action::Build { cell, kind } => build(state, cell, kind),
        Action::Demolish { cell } => demolish(state, cell),
        Action::Survey { cell } => survey(state, cell),
    }
}

fn check_bounds(state: &WorldState, cell: (usize, usize)) -> Result<(), ActionError> {
    if state.grid.in_bounds(cell.0 as i64, cell.1 as i64) {
        Ok(())
    } else {
        Err(ActionError::OutOfBounds(cell.0 as i64, cell.1 as i64))
    }
}

/// Terrain work under a structure would undermine it.
fn check_unoccupied(state: &WorldState, cell: (usize, usize)) -> Result<(), ActionError> {
    match state.structures.get(&cell) {
        Some(existing) => Err(ActionError::Occupied(existing.kind().name())),
        None => Ok(()),
    }
}

// --- Trenching ----------------------------------------------------------

/// One planned material move; planning happens entirely before mutation
/// so validation failures cannot leave a half-dug trench.
struct TrenchPlan {
    /// (cell, depth removed from the top of its soil column).
    removals: Vec<((usize, usize), i32)>,
    /// (cell, depth deposited on its surface).
    deposits: Vec<((usize, usize), i32)>,
}

/// Soil depth available above bedrock.
fn soil_depth(state: &WorldState, x: usize, y: usize) -> i32 {
    (1..LAYER_COUNT)
        .map(|l| state.grid.terrain_layers[[l, x, y]])
        .sum()
}

/// Remove `amount` from the top of the soil column, eating through layers.
fn remove_soil(state: &mut WorldState, x: usize, y: usize, amount: i32) -> i32 {
    let mut left = amount;
    while left > 0 {
        let Some(layer) = state.grid.exposed_layer(x, y) else {
            break;
        };
        left -= state.grid.remove_material(layer, x, y, left);
    }
    amount - left
}

/// Deposit onto the exposed layer (topsoil when the column is bare).
fn deposit_soil(state: &mut WorldState, x: usize, y: usize, amount: i32) {
    let layer = state.grid.exposed_layer(x, y).unwrap_or(SoilLayer::Topsoil);
    state.grid.add_material(layer, x, y, amount);
}

/// Split one cell's spoil between its two side cells: half each, the odd
/// unit to the minus side. A side off the map pushes its share to the
/// other side; planning already guaranteed at least one side exists.
fn split_spoil(
    deposits: &mut Vec<((usize, usize), i32)>,
    minus: Option<(usize, usize)>,
    plus: Option<(usize, usize)>,
    amount: i32,
) {
    match (minus, plus) {
        (Some(m), Some(p)) => {
            let to_minus = (amount + 1) / 2;
            if to_minus > 0 {
                deposits.push((m, to_minus));
            }
            if amount - to_minus > 0 {
                deposits.push((p, amount - to_minus));
            }
        }
        (Some(m), None) => deposits.push((m, amount)),
        (None, Some(p)) => deposits.push((p, amount)),
        (None, None) => unreachable!("validated: at least one side in bounds"),
    }
}

fn dig_trench(
    state: &mut WorldState,
    config: &SimConfig,
    origin: (usize, usize),
    direction: Direction,
    mode: TrenchMode,
) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, origin)?;
    if state.grid.terrain_changed {
        state.grid.rebuild_elevation();
    }

    let length = config.actions.trench_length;
    let (dx, dy) = direction.offset();
    let ((mx, my), (px, py)) = direction.sides();

    // The whole strip must be on the map.
    let mut strip = Vec::with_capacity(length);
    for i in 0..length {
        let x = origin.0 as i64 + dx * i as i64;
        let y = origin.1 as i64 + dy * i as i64;
        if !state.grid.in_bounds(x, y) {
            return Err(ActionError::TrenchAtRim);
        }
        let cell = (x as usize, y as usize);
        check_unoccupied(state, cell)?;
        strip.push(cell);
    }

    // Side cells per strip position; both sides missing would strand the
    // spoil.
    let side = |cell: (usize, usize), ox: i64, oy: i64| -> Option<(usize, usize)> {
        let x = cell.0 as i64 + ox;
        let y = cell.1 as i64 + oy;
        state.grid.in_bounds(x, y).then(|| (x as usize, y as usize))
    };
    if side(strip[0], mx, my).is_none() && side(strip[0], px, py).is_none() {
        return Err(ActionError::TrenchAtRim);
    }

    let origin_elevation = state.grid.elevation[[origin.0, origin.1]];
    let drop = config.actions.trench_slope_drop;

    // Target profile per strip cell; Flat carves to the strip's low
    // point, the slopes carve a constant gradient from the origin.
    let channel_floor = strip
        .iter()
        .map(|&(x, y)| state.grid.elevation[[x, y]])
        .min()
        .unwrap_or(origin_elevation);
    let profile = |i: usize| -> i32 {
        match mode {
            TrenchMode::Flat => channel_floor.min(origin_elevation),
            TrenchMode::SlopeDown => origin_elevation - drop * i as i32,
            TrenchMode::SlopeUp => origin_elevation + drop * i as i32,
        }
    };

    // Plan removals: pull only from cells above their profile target,
    // bounded by the soil actually present.
    let mut plan = TrenchPlan {
        removals: Vec::new(),
        deposits: Vec::new(),
    };
    let mut spoil_total = 0i32;
    let mut per_cell_spoil = Vec::with_capacity(length);
    for (i, &(x, y)) in strip.iter().enumerate() {
        let excess = state.grid.elevation[[x, y]] - profile(i);
        let removable = excess.max(0).min(soil_depth(state, x, y));
        if removable > 0 {
            plan.removals.push(((x, y), removable));
        }
        per_cell_spoil.push(removable.max(0));
        spoil_total += removable.max(0);
    }
    if spoil_total == 0 {
        return Err(ActionError::NothingToDig);
    }

    // Plan deposits. SlopeUp raises the exit cell first; everything else
    // goes to the perpendicular sides, split per strip cell.
    let mut remaining = spoil_total;
    if mode == TrenchMode::SlopeUp {
        let exit_x = origin.0 as i64 + dx * length as i64;
        let exit_y = origin.1 as i64 + dy * length as i64;
        if state.grid.in_bounds(exit_x, exit_y) {
            let exit = (exit_x as usize, exit_y as usize);
            let exit_target = origin_elevation + drop * length as i32;
            let deficit = exit_target - state.grid.elevation[[exit.0, exit.1]];
            let to_exit = deficit.clamp(0, remaining);
            if to_exit > 0 {
                plan.deposits.push((exit, to_exit));
                remaining -= to_exit;
            }
        }
    }
    if remaining > 0 {
        // Scale each cell's side share so the shares sum to `remaining`.
        let mut distributed = 0i32;
        let mut last_with_spoil = 0usize;
        for (i, &spoil) in per_cell_spoil.iter().enumerate() {
            if spoil > 0 {
                last_with_spoil = i;
            }
        }
        for (i, &(x, y)) in strip.iter().enumerate() {
            let mut share = (per_cell_spoil[i] as i64 * remaining as i64 / spoil_total as i64) as i32;
            if i == last_with_spoil {
                share = remaining - distributed; // absorb rounding
            }
            if share <= 0 {
                continue;
            }
            distributed += share;
            split_spoil(
                &mut plan.deposits,
                side((x, y), mx, my),
                side((x, y), px, py),
                share,
            );
        }
    }

    // Execute. Planning bounded removals by the available soil, so the
    // totals match exactly.
    let mut removed_total = 0i32;
    for &((x, y), amount) in &plan.removals {
        removed_total += remove_soil(state, x, y, amount);
    }
    debug_assert_eq!(removed_total, spoil_total);
    for &((x, y), amount) in &plan.deposits {
        deposit_soil(state, x, y, amount);
    }

    state.grid.rebuild_elevation();
    state.invalidate_connectivity();

    let mode_name = match mode {
        TrenchMode::Flat => "flat",
        TrenchMode::SlopeDown => "slope down",
        TrenchMode::SlopeUp => "slope up",
    };
    Ok(ActionOutcome::msg(format!(
        "trenched ({mode_name}): moved {spoil_total} units of material"
    )))
}

// --- Single-cell terrain ------------------------------------------------

fn lower_ground(
    state: &mut WorldState,
    config: &SimConfig,
    cell: (usize, usize),
) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, cell)?;
    check_unoccupied(state, cell)?;
    let (x, y) = cell;

    match state.grid.exposed_layer(x, y) {
        Some(layer) => {
            let material = state.grid.terrain_materials[[layer.index(), x, y]];
            if !material.props().excavatable {
                return Err(ActionError::TooHard(material.name()));
            }
            state.grid.remove_material(layer, x, y, 1);
            state.grid.rebuild_elevation();
            state.invalidate_connectivity();
            Ok(ActionOutcome::msg(format!(
                "removed one unit of {}",
                material.name()
            )))
        }
        None => {
            if state.grid.bedrock_base[[x, y]] <= config.generation.min_bedrock_elevation {
                return Err(ActionError::BedrockFloor);
            }
            state.grid.bedrock_base[[x, y]] -= 1;
            state.grid.terrain_changed = true;
            state.grid.mark_dirty(x, y);
            state.grid.rebuild_elevation();
            state.invalidate_connectivity();
            Ok(ActionOutcome::msg("chipped one unit of bedrock"))
        }
    }
}

fn raise_ground(
    state: &mut WorldState,
    config: &SimConfig,
    cell: (usize, usize),
) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, cell)?;
    check_unoccupied(state, cell)?;
    let cost = config.actions.raise_scrap_cost;
    if state.inventory.scrap < cost {
        return Err(ActionError::InsufficientResources {
            resource: "scrap",
            need: cost,
            have: state.inventory.scrap,
        });
    }
    state.inventory.scrap -= cost;

    let (x, y) = cell;
    let layer = state.grid.exposed_layer(x, y).unwrap_or(SoilLayer::Regolith);
    state.grid.add_material(layer, x, y, 1);
    state.grid.rebuild_elevation();
    state.invalidate_connectivity();
    let material = state.grid.terrain_materials[[layer.index(), x, y]];
    Ok(ActionOutcome::msg(format!(
        "raised the ground with one unit of {}",
        material.name()
    )))
}

// --- Water handling -----------------------------------------------------

fn pour_water(
    state: &mut WorldState,
    config: &SimConfig,
    cell: (usize, usize),
    amount: i64,
) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, cell)?;
    let max = config.actions.max_pour_amount;
    if amount <= 0 || amount > max {
        return Err(ActionError::InvalidAmount { got: amount, max });
    }
    if state.inventory.water < amount {
        return Err(ActionError::InsufficientResources {
            resource: "water",
            need: amount,
            have: state.inventory.water,
        });
    }

    state.inventory.water -= amount;
    state.grid.water[[cell.0, cell.1]] += amount as i32;
    state.grid.mark_dirty(cell.0, cell.1);
    Ok(ActionOutcome::msg(format!("poured {amount} units of water")))
}

fn collect_water(
    state: &mut WorldState,
    config: &SimConfig,
    cell: (usize, usize),
    amount: i64,
) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, cell)?;
    if amount <= 0 {
        return Err(ActionError::InvalidAmount {
            got: amount,
            max: config.actions.max_pour_amount,
        });
    }
    let (x, y) = cell;

    // A depot resupplies without draining anything: the documented
    // conservation exception for the test source.
    if let Some(structure) = state.structures.get(&(x, y)) {
        if structure.kind() == StructureKind::Depot {
            let s = &config.structures;
            state.inventory.water += s.depot_water;
            state.inventory.scrap += s.depot_scrap;
            state.inventory.seeds += s.depot_seeds;
            return Ok(ActionOutcome::msg("resupplied at the depot"));
        }
    }

    let available = state.grid.water[[x, y]] as i64;
    if available == 0 {
        return Err(ActionError::NothingToCollect);
    }
    let taken = amount.min(available);
    state.grid.water[[x, y]] -= taken as i32;
    state.inventory.water += taken;
    state.grid.mark_dirty(x, y);
    Ok(ActionOutcome::msg(format!("collected {taken} units of water")))
}

// --- Structures ---------------------------------------------------------

fn build(
    state: &mut WorldState,
    cell: (usize, usize),
    kind: StructureKind,
) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, cell)?;
    if let Some(existing) = state.structures.get(&cell) {
        return Err(ActionError::Occupied(existing.kind().name()));
    }

    let (scrap, seeds) = kind.cost();
    if state.inventory.scrap < scrap {
        return Err(ActionError::InsufficientResources {
            resource: "scrap",
            need: scrap,
            have: state.inventory.scrap,
        });
    }
    if state.inventory.seeds < seeds {
        return Err(ActionError::InsufficientResources {
            resource: "seeds",
            need: seeds,
            have: state.inventory.seeds,
        });
    }

    state.inventory.scrap -= scrap;
    state.inventory.seeds -= seeds;
    let id = state.next_structure_id;
    state.next_structure_id += 1;
    state.structures.insert(cell, Structure::new(id, kind));
    state.grid.structure_id[[cell.0, cell.1]] = id;
    state.grid.mark_dirty(cell.0, cell.1);
    state.events.log(
        state.tick,
        EventKind::StructureBuilt,
        Some((cell.0 as u32, cell.1 as u32)),
        None,
        format!("built a {}", kind.name()),
    );
    Ok(ActionOutcome::msg(format!("built a {}", kind.name())))
}

fn demolish(state: &mut WorldState, cell: (usize, usize)) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, cell)?;
    let Some(structure) = state.structures.remove(&cell) else {
        return Err(ActionError::NoStructure);
    };
    let name = structure.kind().name();
    let released = structure.demolish();
    if released > 0 {
        state.grid.water[[cell.0, cell.1]] += released;
    }
    state.grid.structure_id[[cell.0, cell.1]] = 0;
    state.grid.mark_dirty(cell.0, cell.1);
    state.events.log(
        state.tick,
        EventKind::StructureRemoved,
        Some((cell.0 as u32, cell.1 as u32)),
        None,
        format!("demolished the {name}"),
    );
    Ok(ActionOutcome::msg(format!("demolished the {name}")))
}

// --- Survey -------------------------------------------------------------

fn survey(state: &WorldState, cell: (usize, usize)) -> Result<ActionOutcome, ActionError> {
    check_bounds(state, cell)?;
    let (x, y) = cell;

    let mut layers = Vec::with_capacity(LAYER_COUNT);
    for layer in SoilLayer::ALL {
        let l = layer.index();
        layers.push((
            layer,
            state.grid.terrain_materials[[l, x, y]],
            state.grid.terrain_layers[[l, x, y]],
            state.grid.subsurface_water[[l, x, y]],
        ));
    }

    Ok(ActionOutcome::Survey(SurveyReport {
        cell,
        biome: state.grid.kind[[x, y]],
        elevation: state.grid.elevation[[x, y]],
        surface_water: state.grid.water[[x, y]],
        moisture: state.grid.moisture[[x, y]],
        wellspring_output: state.grid.wellspring[[x, y]],
        layers,
        structure: state.structures.get(&cell).map(|s| s.describe()),
    }))
}

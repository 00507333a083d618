//! sabkha: a layered desert hydrology and terraforming simulation engine.
//!
//! The engine is a single-writer, deterministic-per-seed fixed-step
//! simulator. All state lives in dense cellular grids; all updates are
//! whole-grid stencil passes on a staggered tick schedule, under strict
//! water-mass conservation. Rendering, input and UI live in the host: the
//! engine hands out read-only views and accepts a small set of validated
//! actions.

pub mod actions;
pub mod atmosphere;
pub mod biome;
pub mod config;
pub mod erosion;
pub mod evaporation;
pub mod events;
pub mod grid;
pub mod pool;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod structures;
pub mod subsurface;
pub mod surface;
pub mod worldgen;

pub use actions::{Action, ActionError, ActionOutcome, Direction, SurveyReport, TrenchMode};
pub use config::{EdgePolicy, SimConfig};
pub use events::{Event, EventKind};
pub use grid::{Biome, Material, SoilLayer, LAYER_COUNT};
pub use state::{DayPhase, StateView, WorldState};
pub use structures::StructureKind;
pub use worldgen::GenPhase;

/// Per-tick summary for the host's diagnostics line.
#[derive(Debug, Clone)]
pub struct TickDiagnostics {
    pub tick: u64,
    pub day: u32,
    pub day_phase: DayPhase,
    pub heat: i32,
    pub raining: bool,
    pub surface_water: i64,
    pub subsurface_water: i64,
    pub pool_free: i64,
    pub pool_atmospheric: i64,
    pub edge_runoff_total: i64,
    /// Cell counts indexed by biome tag.
    pub biome_counts: [usize; 5],
}

/// The host-facing engine: owned state plus configuration, advanced one
/// tick at a time by the rendering loop.
pub struct Simulation {
    config: SimConfig,
    state: WorldState,
}

impl Simulation {
    /// Generate a new world with the standard configuration.
    pub fn new(seed: u64, width: usize, height: usize) -> Self {
        let config = SimConfig::standard();
        let state = worldgen::generate(seed, width, height, &config);
        Self { config, state }
    }

    /// Generate with a custom configuration. Fails when the configuration
    /// does not validate.
    pub fn with_config(
        config: SimConfig,
        seed: u64,
        width: usize,
        height: usize,
    ) -> Result<Self, String> {
        config.validate()?;
        let state = worldgen::generate(seed, width, height, &config);
        Ok(Self { config, state })
    }

    /// Wrap an existing state (e.g. a restored snapshot).
    pub fn from_state(config: SimConfig, state: WorldState) -> Self {
        Self { config, state }
    }

    /// Advance one tick.
    pub fn tick(&mut self) {
        scheduler::tick(&mut self.state, &self.config);
    }

    /// Advance `n` ticks.
    pub fn run(&mut self, n: u64) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Validate and apply a player action.
    pub fn dispatch(&mut self, action: Action) -> Result<ActionOutcome, ActionError> {
        actions::dispatch(&mut self.state, &self.config, action)
    }

    /// Read-only view of the grids; valid until the next `tick`.
    pub fn view(&self) -> StateView<'_> {
        self.state.view()
    }

    /// The structured event log, oldest first.
    pub fn events(&self) -> impl DoubleEndedIterator<Item = &Event> {
        self.state.events.iter()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    /// Mutable access for embedding hosts (snapshot restore, tests).
    pub fn state_mut(&mut self) -> &mut WorldState {
        &mut self.state
    }

    /// Drain the cells whose static rendering is stale. The renderer
    /// calls this once per frame between ticks.
    pub fn take_dirty_cells(&mut self) -> Vec<(usize, usize)> {
        let mut cells: Vec<(usize, usize)> = self.state.grid.dirty_cells.drain().collect();
        cells.sort_unstable();
        cells
    }

    // --- Derived read accessors -----------------------------------------

    /// Terrain surface elevation, `None` outside the grid.
    pub fn total_elevation(&self, x: usize, y: usize) -> Option<i32> {
        self.state
            .grid
            .in_bounds(x as i64, y as i64)
            .then(|| self.state.grid.elevation[[x, y]])
    }

    /// Material visible at the surface of a cell.
    pub fn exposed_material(&self, x: usize, y: usize) -> Option<Material> {
        self.state
            .grid
            .in_bounds(x as i64, y as i64)
            .then(|| self.state.grid.exposed_material(x, y))
    }

    /// Surface plus subsurface water at a cell.
    pub fn cell_total_water(&self, x: usize, y: usize) -> Option<i64> {
        self.state
            .grid
            .in_bounds(x as i64, y as i64)
            .then(|| self.state.grid.total_water_at(x, y))
    }

    /// Mean moisture over an inclusive cell rectangle, clamped to the
    /// grid.
    pub fn average_moisture(&self, from: (usize, usize), to: (usize, usize)) -> f32 {
        let x0 = from.0.min(self.state.grid.width - 1);
        let y0 = from.1.min(self.state.grid.height - 1);
        let x1 = to.0.min(self.state.grid.width - 1);
        let y1 = to.1.min(self.state.grid.height - 1);
        let (x0, x1) = (x0.min(x1), x0.max(x1));
        let (y0, y1) = (y0.min(y1), y0.max(y1));

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for x in x0..=x1 {
            for y in y0..=y1 {
                sum += self.state.grid.moisture[[x, y]] as f64;
                count += 1;
            }
        }
        (sum / count.max(1) as f64) as f32
    }

    /// Summary counters for the host HUD.
    pub fn diagnostics(&self) -> TickDiagnostics {
        let surface: i64 = self.state.grid.water.iter().map(|&w| w as i64).sum();
        let subsurface: i64 = self
            .state
            .grid
            .subsurface_water
            .iter()
            .map(|&w| w as i64)
            .sum();
        let mut biome_counts = [0usize; 5];
        for &kind in self.state.grid.kind.iter() {
            biome_counts[kind as usize] += 1;
        }
        TickDiagnostics {
            tick: self.state.tick,
            day: self.state.day,
            day_phase: self.state.day_phase,
            heat: self.state.heat,
            raining: self.state.raining,
            surface_water: surface,
            subsurface_water: subsurface,
            pool_free: self.state.pool.free,
            pool_atmospheric: self.state.pool.atmospheric,
            edge_runoff_total: self.state.pool.edge_runoff_total,
            biome_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_builds_ticks_and_reports() {
        let mut sim = Simulation::new(12, 20, 16);
        sim.run(8);
        let diag = sim.diagnostics();
        assert_eq!(diag.tick, 8);
        assert_eq!(diag.biome_counts.iter().sum::<usize>(), 20 * 16);
    }

    #[test]
    fn accessors_bound_check() {
        let sim = Simulation::new(1, 8, 8);
        assert!(sim.total_elevation(7, 7).is_some());
        assert!(sim.total_elevation(8, 0).is_none());
        assert!(sim.exposed_material(0, 0).is_some());
        assert!(sim.cell_total_water(99, 99).is_none());
    }

    #[test]
    fn dispatch_routes_actions() {
        let mut sim = Simulation::new(2, 10, 10);
        let report = sim.dispatch(Action::Survey { cell: (5, 5) }).unwrap();
        assert!(matches!(report, ActionOutcome::Survey(_)));
        let err = sim.dispatch(Action::Survey { cell: (50, 5) }).unwrap_err();
        assert!(matches!(err, ActionError::OutOfBounds(..)));
    }

    #[test]
    fn average_moisture_clamps_the_region() {
        let sim = Simulation::new(3, 10, 10);
        // A region far outside the grid still yields a finite mean.
        let m = sim.average_moisture((0, 0), (500, 500));
        assert!(m.is_finite());
    }
}

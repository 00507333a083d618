//! Simulation tuning knobs, grouped per subsystem. Defaults reproduce the
//! reference desert: slow seepage, damped surface flow, a 1200-tick day.
//!
//! Configs load from TOML; validation reports every problem at once so a
//! bad file can be fixed in one pass.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::grid::SoilLayer;

/// How the grid boundary treats outgoing surface flow.
///
/// `Sink` continues the ground off-map at the cell's own terrain elevation,
/// so water ponded above local ground level drains off the map into the
/// runoff channel. `Wall` forbids boundary outflow entirely (closed
/// basins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    #[default]
    Sink,
    Wall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterParams {
    /// Fraction of the head difference moved per direction per tick.
    pub surface_flow_rate: f32,
    /// Minimum head difference before surface water moves. Damping small
    /// gradients prevents perpetual 1-unit oscillation between flats.
    pub surface_flow_threshold: i32,
    /// Attenuation applied to diagonal surface transfers.
    pub diagonal_attenuation: f32,
    pub edge_policy: EdgePolicy,
    /// Fraction of surface water offered to the topmost soil layer.
    pub surface_seepage_rate: f32,
    /// Gravitational transfer fraction between adjacent layers.
    pub vertical_seepage_rate: f32,
    /// Capillary rise fraction from a lower layer to the one above.
    pub capillary_rise_rate: f32,
    /// Horizontal subsurface transfer coefficient.
    pub horiz_rate: f32,
}

impl Default for WaterParams {
    fn default() -> Self {
        Self {
            surface_flow_rate: 0.30,
            surface_flow_threshold: 5,
            diagonal_attenuation: std::f32::consts::FRAC_1_SQRT_2,
            edge_policy: EdgePolicy::Sink,
            surface_seepage_rate: 0.15,
            vertical_seepage_rate: 0.30,
            capillary_rise_rate: 0.05,
            horiz_rate: 0.08,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaporationParams {
    /// Wind coupling `k` in `(1 - humidity) * (1 + k * |wind|)`.
    pub wind_factor: f32,
    /// Clamp bounds for the atmospheric evaporation modifier.
    pub modifier_min: f32,
    pub modifier_max: f32,
    /// Scale applied to the unmet surface remainder before it is taken
    /// from the topmost non-empty soil layer's water.
    pub soil_evap_scale: f32,
    /// Evaporation multiplier on a cell occupied by a cistern.
    pub cistern_factor: f32,
}

impl Default for EvaporationParams {
    fn default() -> Self {
        Self {
            wind_factor: 0.5,
            modifier_min: 0.2,
            modifier_max: 2.0,
            soil_evap_scale: 0.5,
            cistern_factor: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmosphereParams {
    /// Max random humidity drift per update, +/-.
    pub humidity_drift: f32,
    /// Heat coupling: humidity loses `(heat - 100) * heat_humidity_factor`
    /// per update.
    pub heat_humidity_factor: f32,
    /// Gaussian blur radius in cells.
    pub blur_radius: usize,
    /// Gaussian sigma; 1.5 smooths gently without flattening local
    /// variation.
    pub blur_sigma: f32,
    /// Max random wind drift per component per update, +/-.
    pub wind_drift: f32,
    /// Component clamp keeping wind magnitude near [0, 1].
    pub wind_component_max: f32,
}

impl Default for AtmosphereParams {
    fn default() -> Self {
        Self {
            humidity_drift: 0.01,
            heat_humidity_factor: 0.001,
            blur_radius: 3,
            blur_sigma: 1.5,
            wind_drift: 0.025,
            wind_component_max: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErosionParams {
    /// Minimum accumulated water passage before hydraulic erosion.
    pub water_threshold: f32,
    /// Depth removed per unit of passage above the threshold.
    pub water_rate: f32,
    /// Max depth a single cell loses in one overnight pass.
    pub max_depth_per_night: i32,
    /// Minimum accumulated wind exposure before wind erosion.
    pub wind_threshold: f32,
    pub wind_rate: f32,
    /// Wind erosion only strips cells above this elevation percentile.
    pub wind_elevation_percentile: f32,
    /// Wind erosion is costly and is disabled by default.
    pub wind_enabled: bool,
}

impl Default for ErosionParams {
    fn default() -> Self {
        Self {
            water_threshold: 100.0,
            water_rate: 0.001,
            max_depth_per_night: 3,
            wind_threshold: 30.0,
            wind_rate: 0.05,
            wind_elevation_percentile: 0.6,
            wind_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomeParams {
    /// EMA coefficient for the moisture aggregate.
    pub moisture_ema_alpha: f32,
    /// Elevation percentile above which thin-soiled cells become rock.
    pub rock_percentile: f32,
    /// Soil depth below which a high cell reads as rock rather than dune.
    pub rock_soil_depth: i32,
    /// Elevation percentile above which dry cells become dune.
    pub dune_percentile: f32,
    pub dune_max_moisture: f32,
    /// Elevation percentile below which moist cells become wadi.
    pub wadi_percentile: f32,
    pub wadi_min_moisture: f32,
    /// Moisture above which an uncovered cell takes the salt signature.
    pub salt_min_moisture: f32,
    /// Neighbour votes needed for consensus smoothing.
    pub consensus_votes: usize,
}

impl Default for BiomeParams {
    fn default() -> Self {
        Self {
            moisture_ema_alpha: 1.0 / 24.0,
            rock_percentile: 0.75,
            rock_soil_depth: 5,
            dune_percentile: 0.60,
            dune_max_moisture: 20.0,
            wadi_percentile: 0.25,
            wadi_min_moisture: 50.0,
            salt_min_moisture: 120.0,
            consensus_votes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DayCycleParams {
    pub day_length_ticks: u64,
    /// Heat band; the curve is triangular with its peak at mid-day.
    pub heat_min: i32,
    pub heat_max: i32,
    /// Ticks between rain events (randomized within the band).
    pub rain_interval_min: u64,
    pub rain_interval_max: u64,
    pub rain_duration_min: u64,
    pub rain_duration_max: u64,
    /// Wellspring output multiplier while raining (1.5 = +50%).
    pub rain_wellspring_multiplier: f32,
    /// Atmospheric reserve moved to the free pool per rain tick.
    pub rain_recharge_per_tick: i64,
}

impl Default for DayCycleParams {
    fn default() -> Self {
        Self {
            day_length_ticks: 1200,
            heat_min: 60,
            heat_max: 140,
            rain_interval_min: 1200,
            rain_interval_max: 2000,
            rain_duration_min: 300,
            rain_duration_max: 500,
            rain_wellspring_multiplier: 1.5,
            rain_recharge_per_tick: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Floor for `bedrock_base`, in depth units relative to sea level.
    pub min_bedrock_elevation: i32,
    /// fBm octaves for the bedrock field.
    pub noise_octaves: usize,
    pub noise_frequency: f64,
    /// Exponent of the signed power transform that sharpens peaks and
    /// deepens valleys.
    pub relief_exponent: f64,
    /// Bedrock relief amplitude in depth units.
    pub relief_amplitude: i32,
    /// WFC block size in cells; biomes are collapsed at this coarse
    /// resolution and upsampled.
    pub wfc_block_size: usize,
    /// Region restarts tolerated before constraints are relaxed.
    pub wfc_max_restarts: usize,
    /// Starting free reserve of the water pool.
    pub initial_water_pool: i64,
    pub initial_atmospheric: i64,
    /// Output band for the primary wellspring, units per tick.
    pub primary_spring_min: i32,
    pub primary_spring_max: i32,
    pub secondary_spring_min: i32,
    pub secondary_spring_max: i32,
    pub secondary_spring_count: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            min_bedrock_elevation: -60,
            noise_octaves: 5,
            noise_frequency: 2.2,
            relief_exponent: 1.6,
            relief_amplitude: 30,
            wfc_block_size: 4,
            wfc_max_restarts: 10,
            initial_water_pool: 20_000,
            initial_atmospheric: 4_000,
            primary_spring_min: 40,
            primary_spring_max: 60,
            secondary_spring_min: 15,
            secondary_spring_max: 30,
            secondary_spring_count: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureParams {
    pub cistern_capacity: i32,
    pub cistern_transfer_rate: i32,
    /// Units lost per tick at heat 100; half returns to the surface.
    pub cistern_loss_rate: i32,
    pub cistern_loss_recovery: f32,
    pub condenser_output: i64,
    /// Cell moisture required for a planter to grow.
    pub planter_moisture_threshold: f32,
    pub planter_growth_per_tick: i32,
    pub planter_growth_target: i32,
    /// Water consumed (transpired) per growth tick.
    pub planter_water_per_tick: i32,
    /// Organics depth added on each maturation.
    pub planter_organics_gain: i32,
    pub max_organics_depth: i32,
    /// Inventory granted by collecting at a depot.
    pub depot_water: i64,
    pub depot_scrap: i64,
    pub depot_seeds: i64,
}

impl Default for StructureParams {
    fn default() -> Self {
        Self {
            cistern_capacity: 500,
            cistern_transfer_rate: 40,
            cistern_loss_rate: 3,
            cistern_loss_recovery: 0.5,
            condenser_output: 2,
            planter_moisture_threshold: 80.0,
            planter_growth_per_tick: 1,
            planter_growth_target: 100,
            planter_water_per_tick: 1,
            planter_organics_gain: 1,
            max_organics_depth: 10,
            depot_water: 300,
            depot_scrap: 3,
            depot_seeds: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionParams {
    /// Strip length of a dig_trench action, origin included.
    pub trench_length: usize,
    /// Elevation drop per strip cell in the slope modes.
    pub trench_slope_drop: i32,
    /// Largest single pour, in water units.
    pub max_pour_amount: i64,
    pub raise_scrap_cost: i64,
}

impl Default for ActionParams {
    fn default() -> Self {
        Self {
            trench_length: 5,
            trench_slope_drop: 2,
            max_pour_amount: 1000,
            raise_scrap_cost: 1,
        }
    }
}

/// Aggregated configuration for one simulation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub water: WaterParams,
    pub evaporation: EvaporationParams,
    pub atmosphere: AtmosphereParams,
    pub erosion: ErosionParams,
    pub biome: BiomeParams,
    pub day: DayCycleParams,
    pub generation: GenerationParams,
    pub structures: StructureParams,
    pub actions: ActionParams,
    /// Event ring buffer capacity.
    pub event_log_capacity: usize,
}

impl SimConfig {
    /// Layer that receives wellspring injections.
    pub fn wellspring_layer(&self) -> SoilLayer {
        SoilLayer::Regolith
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let mut config: SimConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        if config.event_log_capacity == 0 {
            config.event_log_capacity = 256;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check every knob and report all problems at once.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        let fractions = [
            ("water.surface_flow_rate", self.water.surface_flow_rate),
            ("water.surface_seepage_rate", self.water.surface_seepage_rate),
            ("water.vertical_seepage_rate", self.water.vertical_seepage_rate),
            ("water.capillary_rise_rate", self.water.capillary_rise_rate),
            ("water.horiz_rate", self.water.horiz_rate),
            ("water.diagonal_attenuation", self.water.diagonal_attenuation),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{name} must be in [0, 1], got {value}"));
            }
        }

        if self.water.surface_flow_threshold < 0 {
            errors.push(format!(
                "water.surface_flow_threshold must be >= 0, got {}",
                self.water.surface_flow_threshold
            ));
        }
        if self.evaporation.modifier_min > self.evaporation.modifier_max {
            errors.push(format!(
                "evaporation.modifier_min {} exceeds modifier_max {}",
                self.evaporation.modifier_min, self.evaporation.modifier_max
            ));
        }
        if self.day.day_length_ticks < 4 {
            errors.push(format!(
                "day.day_length_ticks must be >= 4, got {}",
                self.day.day_length_ticks
            ));
        }
        if self.day.heat_min > self.day.heat_max {
            errors.push(format!(
                "day.heat_min {} exceeds heat_max {}",
                self.day.heat_min, self.day.heat_max
            ));
        }
        if !(0.0..=1.0).contains(&self.biome.moisture_ema_alpha) {
            errors.push(format!(
                "biome.moisture_ema_alpha must be in [0, 1], got {}",
                self.biome.moisture_ema_alpha
            ));
        }
        if self.generation.wfc_block_size == 0 {
            errors.push("generation.wfc_block_size must be >= 1".to_string());
        }
        if self.actions.trench_length == 0 {
            errors.push("actions.trench_length must be >= 1".to_string());
        }
        if self.atmosphere.blur_radius == 0 {
            errors.push("atmosphere.blur_radius must be >= 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}

impl SimConfig {
    /// Defaults with the event log capacity filled in.
    pub fn standard() -> Self {
        SimConfig {
            event_log_capacity: 256,
            ..Default::default()
        }
    }
}

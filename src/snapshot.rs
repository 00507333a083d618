//! Deterministic binary serialization of the whole simulation state.
//!
//! The byte layout is the contract: a fixed little-endian header
//! (magic, version, dimensions, seed, clock, water pool) followed by
//! every array in row-major order, layer-major for the 3-D fields, with
//! enums as stable integer tags. Writing the same state twice produces
//! identical bytes.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::config::SimConfig;
use crate::grid::{Biome, Material, SoilLayer, LAYER_COUNT};
use crate::state::{DayPhase, WorldState};
use crate::structures::{Structure, StructureKind};

pub const MAGIC: [u8; 4] = *b"SBKA";
pub const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("not a snapshot: bad magic")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

// --- Primitive helpers --------------------------------------------------

fn put_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn put_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn put_i32(w: &mut impl Write, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn put_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn put_f32(w: &mut impl Write, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn get_bytes<const N: usize>(r: &mut impl Read) -> Result<[u8; N], SnapshotError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
fn get_u8(r: &mut impl Read) -> Result<u8, SnapshotError> {
    Ok(get_bytes::<1>(r)?[0])
}
fn get_u32(r: &mut impl Read) -> Result<u32, SnapshotError> {
    Ok(u32::from_le_bytes(get_bytes(r)?))
}
fn get_u64(r: &mut impl Read) -> Result<u64, SnapshotError> {
    Ok(u64::from_le_bytes(get_bytes(r)?))
}
fn get_i32(r: &mut impl Read) -> Result<i32, SnapshotError> {
    Ok(i32::from_le_bytes(get_bytes(r)?))
}
fn get_i64(r: &mut impl Read) -> Result<i64, SnapshotError> {
    Ok(i64::from_le_bytes(get_bytes(r)?))
}
fn get_f32(r: &mut impl Read) -> Result<f32, SnapshotError> {
    Ok(f32::from_le_bytes(get_bytes(r)?))
}

// --- Writing ------------------------------------------------------------

/// Serialize the state. The RNG is not persisted; a reload re-seeds from
/// the stored world seed.
pub fn write_snapshot(state: &WorldState, w: &mut impl Write) -> Result<(), SnapshotError> {
    let grid = &state.grid;

    w.write_all(&MAGIC)?;
    put_u32(w, VERSION)?;
    put_u32(w, grid.width as u32)?;
    put_u32(w, grid.height as u32)?;
    put_u32(w, LAYER_COUNT as u32)?;
    put_u64(w, state.seed)?;
    put_u64(w, state.tick)?;
    put_u32(w, state.day)?;
    w.write_all(&[state.day_phase as u8])?;
    put_i32(w, state.heat)?;
    w.write_all(&[state.raining as u8])?;
    put_u64(w, state.rain_timer)?;
    put_i64(w, state.pool.free)?;
    put_i64(w, state.pool.atmospheric)?;
    put_i64(w, state.pool.edge_runoff_total)?;
    put_i64(w, state.inventory.water)?;
    put_i64(w, state.inventory.scrap)?;
    put_i64(w, state.inventory.seeds)?;
    put_i64(w, state.inventory.biomass)?;

    for x in 0..grid.width {
        for y in 0..grid.height {
            put_i32(w, grid.bedrock_base[[x, y]])?;
        }
    }
    for l in 0..LAYER_COUNT {
        for x in 0..grid.width {
            for y in 0..grid.height {
                put_i32(w, grid.terrain_layers[[l, x, y]])?;
            }
        }
    }
    for l in 0..LAYER_COUNT {
        for x in 0..grid.width {
            for y in 0..grid.height {
                w.write_all(&[grid.terrain_materials[[l, x, y]] as u8])?;
            }
        }
    }
    for x in 0..grid.width {
        for y in 0..grid.height {
            put_i32(w, grid.water[[x, y]])?;
        }
    }
    for l in 0..LAYER_COUNT {
        for x in 0..grid.width {
            for y in 0..grid.height {
                put_i32(w, grid.subsurface_water[[l, x, y]])?;
            }
        }
    }
    for x in 0..grid.width {
        for y in 0..grid.height {
            w.write_all(&[grid.kind[[x, y]] as u8])?;
            put_i32(w, grid.wellspring[[x, y]])?;
            put_f32(w, grid.humidity[[x, y]])?;
            put_f32(w, grid.wind_x[[x, y]])?;
            put_f32(w, grid.wind_y[[x, y]])?;
            put_f32(w, grid.moisture[[x, y]])?;
            put_f32(w, grid.water_passage[[x, y]])?;
            put_f32(w, grid.wind_exposure[[x, y]])?;
        }
    }

    // Structures, sorted by cell for byte-for-byte determinism.
    let mut cells: Vec<&(usize, usize)> = state.structures.keys().collect();
    cells.sort();
    put_u32(w, cells.len() as u32)?;
    for &&(x, y) in &cells {
        let s = &state.structures[&(x, y)];
        put_u32(w, x as u32)?;
        put_u32(w, y as u32)?;
        put_u32(w, s.id)?;
        w.write_all(&[s.kind() as u8])?;
        put_i32(w, s.stored)?;
        put_i32(w, s.growth)?;
        put_i32(w, s.wither)?;
    }
    put_u32(w, state.next_structure_id)?;

    Ok(())
}

// --- Reading ------------------------------------------------------------

/// Deserialize a snapshot. Material property grids and the elevation grid
/// are derived rather than stored, so they are rebuilt here.
pub fn read_snapshot(r: &mut impl Read, config: &SimConfig) -> Result<WorldState, SnapshotError> {
    let magic = get_bytes::<4>(r)?;
    if magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = get_u32(r)?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let width = get_u32(r)? as usize;
    let height = get_u32(r)? as usize;
    let layers = get_u32(r)? as usize;
    if layers != LAYER_COUNT {
        return Err(SnapshotError::Corrupt(format!(
            "expected {LAYER_COUNT} layers, found {layers}"
        )));
    }
    if width == 0 || height == 0 || width > 1 << 14 || height > 1 << 14 {
        return Err(SnapshotError::Corrupt(format!(
            "implausible dimensions {width}x{height}"
        )));
    }

    let seed = get_u64(r)?;
    let mut state = WorldState::empty(seed, width, height, config);
    state.tick = get_u64(r)?;
    state.day = get_u32(r)?;
    let phase_tag = get_u8(r)?;
    state.day_phase = DayPhase::from_tag(phase_tag)
        .ok_or_else(|| SnapshotError::Corrupt(format!("bad day phase tag {phase_tag}")))?;
    state.heat = get_i32(r)?;
    state.raining = get_u8(r)? != 0;
    state.rain_timer = get_u64(r)?;
    state.pool.free = get_i64(r)?;
    state.pool.atmospheric = get_i64(r)?;
    state.pool.edge_runoff_total = get_i64(r)?;
    state.inventory.water = get_i64(r)?;
    state.inventory.scrap = get_i64(r)?;
    state.inventory.seeds = get_i64(r)?;
    state.inventory.biomass = get_i64(r)?;

    for x in 0..width {
        for y in 0..height {
            state.grid.bedrock_base[[x, y]] = get_i32(r)?;
        }
    }
    for l in 0..LAYER_COUNT {
        for x in 0..width {
            for y in 0..height {
                state.grid.terrain_layers[[l, x, y]] = get_i32(r)?;
            }
        }
    }
    for l in 0..LAYER_COUNT {
        for x in 0..width {
            for y in 0..height {
                let tag = get_u8(r)?;
                let material = Material::from_tag(tag)
                    .ok_or_else(|| SnapshotError::Corrupt(format!("bad material tag {tag}")))?;
                // set_material also restores the derived property grids.
                if let Some(layer) = SoilLayer::from_index(l) {
                    state.grid.set_material(layer, x, y, material);
                }
            }
        }
    }
    for x in 0..width {
        for y in 0..height {
            state.grid.water[[x, y]] = get_i32(r)?;
        }
    }
    for l in 0..LAYER_COUNT {
        for x in 0..width {
            for y in 0..height {
                state.grid.subsurface_water[[l, x, y]] = get_i32(r)?;
            }
        }
    }
    for x in 0..width {
        for y in 0..height {
            let tag = get_u8(r)?;
            state.grid.kind[[x, y]] = Biome::from_tag(tag)
                .ok_or_else(|| SnapshotError::Corrupt(format!("bad biome tag {tag}")))?;
            state.grid.wellspring[[x, y]] = get_i32(r)?;
            state.grid.humidity[[x, y]] = get_f32(r)?;
            state.grid.wind_x[[x, y]] = get_f32(r)?;
            state.grid.wind_y[[x, y]] = get_f32(r)?;
            state.grid.moisture[[x, y]] = get_f32(r)?;
            state.grid.water_passage[[x, y]] = get_f32(r)?;
            state.grid.wind_exposure[[x, y]] = get_f32(r)?;
        }
    }

    let structure_count = get_u32(r)? as usize;
    if structure_count > width * height {
        return Err(SnapshotError::Corrupt(format!(
            "{structure_count} structures on a {width}x{height} grid"
        )));
    }
    for _ in 0..structure_count {
        let x = get_u32(r)? as usize;
        let y = get_u32(r)? as usize;
        if x >= width || y >= height {
            return Err(SnapshotError::Corrupt(format!(
                "structure cell ({x}, {y}) out of bounds"
            )));
        }
        let id = get_u32(r)?;
        let kind_tag = get_u8(r)?;
        let kind = StructureKind::from_tag(kind_tag)
            .ok_or_else(|| SnapshotError::Corrupt(format!("bad structure tag {kind_tag}")))?;
        let mut structure = Structure::new(id, kind);
        structure.stored = get_i32(r)?;
        structure.growth = get_i32(r)?;
        structure.wither = get_i32(r)?;
        state.grid.structure_id[[x, y]] = id;
        state.structures.insert((x, y), structure);
    }
    state.next_structure_id = get_u32(r)?;

    state.grid.rebuild_elevation();
    state.grid.dirty_cells.clear();
    Ok(state)
}

// --- File convenience ---------------------------------------------------

/// Atomic save: write to a temp file, then rename over the target so a
/// partial write never corrupts an existing snapshot.
pub fn save_to_path(state: &WorldState, path: &Path) -> Result<(), SnapshotError> {
    let mut bytes = Vec::new();
    write_snapshot(state, &mut bytes)?;

    let tmp = path.with_extension("tmp");
    if let Err(e) = fs::write(&tmp, &bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(SnapshotError::Io(e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(SnapshotError::Io(e));
    }
    Ok(())
}

pub fn load_from_path(path: &Path, config: &SimConfig) -> Result<WorldState, SnapshotError> {
    let bytes = fs::read(path)?;
    read_snapshot(&mut bytes.as_slice(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worldgen::generate;

    #[test]
    fn round_trip_preserves_every_field() {
        let config = SimConfig::standard();
        let mut state = generate(31, 16, 12, &config);
        state.tick = 123;
        state.day = 4;
        state.raining = true;
        state.pool.edge_runoff_total = 77;

        let mut bytes = Vec::new();
        write_snapshot(&state, &mut bytes).unwrap();
        let restored = read_snapshot(&mut bytes.as_slice(), &config).unwrap();

        assert_eq!(restored.tick, 123);
        assert_eq!(restored.day, 4);
        assert!(restored.raining);
        assert_eq!(restored.seed, state.seed);
        assert_eq!(restored.pool, state.pool);
        assert_eq!(restored.inventory, state.inventory);
        assert_eq!(restored.grid.bedrock_base, state.grid.bedrock_base);
        assert_eq!(restored.grid.terrain_layers, state.grid.terrain_layers);
        assert_eq!(restored.grid.terrain_materials, state.grid.terrain_materials);
        assert_eq!(restored.grid.water, state.grid.water);
        assert_eq!(restored.grid.subsurface_water, state.grid.subsurface_water);
        assert_eq!(restored.grid.kind, state.grid.kind);
        assert_eq!(restored.grid.wellspring, state.grid.wellspring);
        assert_eq!(restored.grid.humidity, state.grid.humidity);
        assert_eq!(restored.grid.elevation, state.grid.elevation);
        assert_eq!(restored.structures.len(), state.structures.len());
        // Derived property grids are rebuilt from the material tags.
        assert_eq!(restored.grid.porosity, state.grid.porosity);
    }

    #[test]
    fn serialization_is_byte_stable() {
        let config = SimConfig::standard();
        let state = generate(8, 12, 10, &config);
        let mut a = Vec::new();
        let mut b = Vec::new();
        write_snapshot(&state, &mut a).unwrap();
        write_snapshot(&state, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let config = SimConfig::standard();
        let bytes = b"NOPE00000000000000000000".to_vec();
        let err = read_snapshot(&mut bytes.as_slice(), &config).unwrap_err();
        assert!(matches!(err, SnapshotError::BadMagic));
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let config = SimConfig::standard();
        let state = generate(2, 8, 8, &config);
        let mut bytes = Vec::new();
        write_snapshot(&state, &mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(read_snapshot(&mut bytes.as_slice(), &config).is_err());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let config = SimConfig::standard();
        let state = generate(2, 8, 8, &config);
        let mut bytes = Vec::new();
        write_snapshot(&state, &mut bytes).unwrap();
        bytes[4] = 99; // version field
        let err = read_snapshot(&mut bytes.as_slice(), &config).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion(_)));
    }

    #[test]
    fn save_and_load_through_a_file() {
        let config = SimConfig::standard();
        let state = generate(55, 10, 10, &config);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.sbka");

        save_to_path(&state, &path).unwrap();
        let restored = load_from_path(&path, &config).unwrap();
        assert_eq!(restored.grid.water, state.grid.water);
        assert_eq!(restored.grid.kind, state.grid.kind);
    }
}

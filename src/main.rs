//! Headless CLI host: generate a world, run it for a while, report what
//! happened. The real game front-end drives the same `Simulation` API
//! from its render loop.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use sabkha::{snapshot, worldgen, SimConfig, Simulation};

#[derive(Parser, Debug)]
#[command(name = "sabkha", about = "desert terraforming simulation engine")]
struct Args {
    /// World seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Grid width in cells.
    #[arg(long, default_value_t = 180)]
    width: usize,

    /// Grid height in cells.
    #[arg(long, default_value_t = 135)]
    height: usize,

    /// Ticks to simulate.
    #[arg(long, default_value_t = 2400)]
    ticks: u64,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a snapshot here when the run completes.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Diagnostics print interval in ticks.
    #[arg(long, default_value_t = 300)]
    report_every: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match SimConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("configuration error:\n{e}");
                std::process::exit(1);
            }
        },
        None => SimConfig::standard(),
    };

    info!(seed = args.seed, width = args.width, height = args.height, "generating world");
    let state = worldgen::generate_with_progress(
        args.seed,
        args.width,
        args.height,
        &config,
        &mut |phase| {
            info!(?phase, "generation");
            true
        },
    )
    .expect("generation callback never aborts");
    let mut sim = Simulation::from_state(config, state);

    let start = std::time::Instant::now();
    for _ in 0..args.ticks {
        sim.tick();
        if sim.state().tick % args.report_every == 0 {
            print_diagnostics(&sim);
        }
    }
    let elapsed = start.elapsed();

    print_diagnostics(&sim);
    println!(
        "simulated {} ticks in {:.2}s ({:.0} ticks/s)",
        args.ticks,
        elapsed.as_secs_f64(),
        args.ticks as f64 / elapsed.as_secs_f64().max(1e-9)
    );

    println!("recent events:");
    for event in sim.events().rev().take(10).collect::<Vec<_>>().into_iter().rev() {
        println!("  [{:>6}] {}", event.tick, event.message);
    }

    if let Some(path) = &args.snapshot {
        match snapshot::save_to_path(sim.state(), path) {
            Ok(()) => println!("snapshot written to {}", path.display()),
            Err(e) => eprintln!("snapshot failed: {e}"),
        }
    }
}

fn print_diagnostics(sim: &Simulation) {
    let d = sim.diagnostics();
    println!(
        "tick {:>6} | day {:>3} {:>5} | heat {:>3}{} | surface {:>8} | subsurface {:>8} | pool {:>8} | sky {:>7} | runoff {:>7}",
        d.tick,
        d.day,
        d.day_phase.name(),
        d.heat,
        if d.raining { " rain" } else { "" },
        d.surface_water,
        d.subsurface_water,
        d.pool_free,
        d.pool_atmospheric,
        d.edge_runoff_total,
    );
    let biomes: Vec<String> = sabkha::Biome::ALL
        .iter()
        .map(|&b| format!("{}:{}", b.name(), d.biome_counts[b as usize]))
        .collect();
    println!("  biomes {}", biomes.join(" "));
}

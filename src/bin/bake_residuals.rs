//! Residual baker: writes per-tile elevation residuals to disk.
//!
//! Usage: cargo run --release --bin bake_residuals -- [OPTIONS]
//!
//! Options:
//!   --out <DIR>         Output directory (default: "residuals")
//!   --min-level <L>     First level to bake (default: 1)
//!   --max-level <L>     Last level to bake (default: 4)
//!   --tile-size <PX>    Tile size without border (default: 64)
//!   --border <PX>       Border pixels per edge (default: 2)
//!   --seed <SEED>       Noise seed (default: 7)
//!   --amplitude <M>     Residual amplitude at level 1 in meters (default: 4.0)
//!   --jobs <N>          Parallel tile writers (default: 4)
//!
//! Output structure:
//!   <DIR>/
//!     manifest.json      # Layout and per-level tile counts
//!     1/0_0.res          # LZ4 little-endian f32 residuals
//!     ...

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;
use serde_json::json;

use terramp::producer::TileLayout;
use terramp::quadtree::TileAddress;
use terramp::residual::{encode_residual, residual_path};

struct BakeOptions {
    out: PathBuf,
    min_level: u8,
    max_level: u8,
    layout: TileLayout,
    seed: u32,
    amplitude: f32,
    jobs: usize,
}

fn main() -> ExitCode {
    terramp::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let options = BakeOptions {
        out: PathBuf::from(parse_str_arg(&args, "--out").unwrap_or_else(|| "residuals".to_string())),
        min_level: parse_arg(&args, "--min-level").unwrap_or(1),
        max_level: parse_arg(&args, "--max-level").unwrap_or(4),
        layout: TileLayout::new(
            parse_arg(&args, "--tile-size").unwrap_or(64),
            parse_arg(&args, "--border").unwrap_or(2),
            1,
        ),
        seed: parse_arg(&args, "--seed").unwrap_or(7),
        amplitude: parse_arg(&args, "--amplitude").unwrap_or(4.0),
        jobs: parse_arg(&args, "--jobs").unwrap_or(4),
    };

    match bake(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Residual bake failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn bake(options: &BakeOptions) -> std::io::Result<()> {
    if options.min_level > options.max_level || options.max_level > 16 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("bad level range {}..={}", options.min_level, options.max_level),
        ));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()
        .map_err(std::io::Error::other)?;

    println!("=== terramp residual baker ===");
    println!("Levels: {}..={}", options.min_level, options.max_level);
    println!(
        "Tiles:  {}px + {}px border",
        options.layout.tile_size, options.layout.border
    );
    println!("Seed:   {}", options.seed);
    println!("Output: {}", options.out.display());
    println!();

    let noise = Fbm::<Perlin>::new(options.seed).set_octaves(3);
    let start = Instant::now();
    let written = AtomicUsize::new(0);
    let total_bytes = AtomicUsize::new(0);
    let mut levels = Vec::new();

    for level in options.min_level..=options.max_level {
        let side = 1u32 << level;
        let addresses: Vec<TileAddress> = (0..side)
            .flat_map(|ty| (0..side).map(move |tx| TileAddress::new(level, tx, ty)))
            .collect();

        pool.install(|| {
            addresses.par_iter().try_for_each(|&address| {
                let samples = residual_tile(&noise, options, address);
                let bytes = encode_residual(&samples);
                write_file(&residual_path(&options.out, address), &bytes)?;
                written.fetch_add(1, Ordering::Relaxed);
                total_bytes.fetch_add(bytes.len(), Ordering::Relaxed);
                Ok::<_, std::io::Error>(())
            })
        })?;

        log::info!("Level {}: {} tiles", level, addresses.len());
        levels.push(json!({ "level": level, "tiles": addresses.len() }));
    }

    let manifest = json!({
        "tile_size": options.layout.tile_size,
        "border": options.layout.border,
        "seed": options.seed,
        "amplitude": options.amplitude,
        "levels": levels,
    });
    let manifest = serde_json::to_string_pretty(&manifest).map_err(std::io::Error::other)?;
    write_file(&options.out.join("manifest.json"), manifest.as_bytes())?;

    println!(
        "Wrote {} tiles ({:.1} KiB) in {:.2}s",
        written.load(Ordering::Relaxed),
        total_bytes.load(Ordering::Relaxed) as f64 / 1024.0,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Residual samples of one tile; amplitude halves per level.
fn residual_tile(noise: &Fbm<Perlin>, options: &BakeOptions, address: TileAddress) -> Vec<f32> {
    let layout = options.layout;
    let frequency = 64.0 * (1u64 << address.level) as f64;
    let amplitude = options.amplitude / (1u32 << (address.level - options.min_level.min(address.level))) as f32;

    let side = layout.side();
    let mut samples = Vec::with_capacity(layout.pixel_count());
    for j in 0..side {
        for i in 0..side {
            let p = layout.pixel_unit(address, i, j);
            samples.push(noise.get([p[0] * frequency, p[1] * frequency]) as f32 * amplitude);
        }
    }
    samples
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
}

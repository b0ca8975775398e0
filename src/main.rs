//! Demo driver: builds a procedural octree world, runs a full geometry
//! rebuild and reports the resulting batch/buffer statistics.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use hashbrown::HashMap;

use karst_mesh_cpu::{BatchStore, MesherConfig, TJointArena, rebuild_all};
use karst_slots::SlotRegistry;
use karst_upload::{RecordingBackend, VboPools, VboRegistry};

mod demo;

#[derive(Parser, Debug)]
#[command(name = "karst", about = "Octree geometry compiler demo driver")]
struct Args {
    /// World size in units (power of two, >= 64).
    #[arg(long, default_value_t = 1024)]
    world_size: i32,

    /// Mesher configuration TOML.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Texture slot registry TOML (defaults to the built-in demo set).
    #[arg(long)]
    slots: Option<PathBuf>,

    /// Write the log to a file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log one line per uploaded buffer generation.
    #[arg(long)]
    debug_vbo: bool,
}

fn init_logging(log_file: Option<&PathBuf>) {
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path).expect("create log file");
            simplelog::WriteLogger::init(
                simplelog::LevelFilter::Debug,
                simplelog::Config::default(),
                file,
            )
            .expect("init file logger");
        }
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_file.as_ref());

    if args.world_size < 64 || args.world_size.count_ones() != 1 {
        log::error!("world size must be a power of two >= 64");
        return ExitCode::FAILURE;
    }

    let mut cfg = match &args.config {
        Some(path) => match MesherConfig::from_path(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("failed to load config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => MesherConfig::default(),
    };
    cfg.debug_vbo |= args.debug_vbo;

    let slots = match &args.slots {
        Some(path) => match SlotRegistry::from_path(path) {
            Ok(slots) => slots,
            Err(e) => {
                log::error!("failed to load slots {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => demo::demo_slots(),
    };

    log::info!("generating demo world ({} units)", args.world_size);
    let mut oct = demo::demo_world(args.world_size, &slots);
    log::info!("octree has {} nodes", oct.node_count());

    let mut store = BatchStore::new();
    let mut pools = VboPools::new(cfg.max_vbo_verts, cfg.debug_vbo);
    let mut registry = VboRegistry::new();
    let mut backend = RecordingBackend::new();
    let mut arena = TJointArena::new();

    let mut last_pct = u32::MAX;
    let mut progress = |f: f32, msg: &str| {
        let pct = (f * 10.0) as u32 * 10;
        if pct != last_pct {
            last_pct = pct;
            log::info!("{} {}%", msg, pct);
        }
    };
    let progress_sink: &mut dyn FnMut(f32, &str) = &mut progress;

    let stats = match rebuild_all(
        &mut oct,
        &slots,
        &cfg,
        &mut store,
        &mut pools,
        &mut registry,
        &mut backend,
        &mut arena,
        Some(progress_sink),
    ) {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("rebuild failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut per_tex: HashMap<u16, u32> = HashMap::new();
    let mut grass = 0usize;
    let mut mat_surfs = 0usize;
    for &id in &store.list {
        let b = store.get(id);
        for e in &b.elems {
            *per_tex.entry(e.texture).or_default() += e.length / 3;
        }
        grass += b.grass_tris.len();
        mat_surfs += b.mat_surfs.len();
    }
    let mut per_tex: Vec<(u16, u32)> = per_tex.into_iter().collect();
    per_tex.sort();

    log::info!(
        "world bounds {:?}..{:?}",
        store.world_min,
        store.world_max
    );
    log::info!(
        "{} batches, {} verts, {} tris, {} sky indices, {} t-joints",
        stats.batches,
        stats.verts,
        stats.tris,
        stats.explicit_sky,
        stats.tjoints
    );
    log::info!(
        "{} buffers uploaded ({} grass tris, {} material surfaces)",
        stats.buffers,
        grass,
        mat_surfs
    );
    for (tex, tris) in per_tex {
        log::info!("  tex {:>3}: {:>8} tris", tex, tris);
    }
    ExitCode::SUCCESS
}

//! CPU geometry compiler: turns an octree world into batched, GPU-ready
//! vertex/index buffers with T-junction repair, coplanar face merging and
//! draw-order bucketing.
#![forbid(unsafe_code)]

pub mod batch;
pub mod config;
mod emit;
pub mod matsurf;
pub mod session;
pub mod sortkey;
pub mod texgen;
pub mod tjoint;
pub mod vertex;
mod walker;

use karst_geom::IVec3;
use karst_octree::Octree;
use karst_slots::SlotRegistry;
use karst_upload::{UploadBackend, UploadError, VboPools, VboRegistry};
use thiserror::Error;

pub use batch::{Batch, BatchId, BatchStore, ElemSet, MERGE_ORIGIN, MERGE_PART, MERGE_USE};
pub use config::MesherConfig;
pub use matsurf::MatSurface;
pub use session::{BatchCollector, GrassTri};
pub use sortkey::{ALPHA_BACK, ALPHA_FRONT, ALPHA_NONE, ALPHA_REFRACT, ORIENT_MERGED, SortKey};
pub use tjoint::{TJoint, TJointArena, find_tjoints};
pub use vertex::{ByteDir, MAX_VERTS, Vertex, VertexTable, decode_normal, encode_normal};
pub use walker::MAX_MERGE_LEVEL;

/// A rebuild failed; dropped geometry is never an error, so the only cause is
/// the buffer service.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("rebuild failed: {0}")]
    Upload(#[from] UploadError),
}

/// Aggregate results of one full rebuild.
#[derive(Clone, Copy, Debug, Default)]
pub struct RebuildStats {
    pub batches: usize,
    pub verts: usize,
    pub tris: usize,
    pub explicit_sky: usize,
    pub tjoints: usize,
    pub buffers: usize,
}

/// Progress reporting at a bounded frequency (one callback per 4096 visited
/// nodes), so a UI sink is never flooded.
pub struct Progress<'a> {
    count: usize,
    total: usize,
    sink: Option<&'a mut dyn FnMut(f32, &str)>,
}

impl<'a> Progress<'a> {
    pub fn new(total: usize, sink: Option<&'a mut dyn FnMut(f32, &str)>) -> Self {
        Progress {
            count: 0,
            total,
            sink,
        }
    }

    pub(crate) fn tick(&mut self, msg: &str) {
        if self.count & 0xFFF == 0 {
            if let Some(sink) = self.sink.as_mut() {
                sink(self.count as f32 / self.total.max(1) as f32, msg);
            }
        }
        self.count += 1;
    }
}

/// Builds batches for every octree region that lacks one: resolves
/// T-junctions (when enabled), walks the octree emitting and batching all
/// visible geometry, uploads the final buffer generations and recomputes
/// bounding boxes. Regions whose batches survived earlier invalidations are
/// left untouched, so this serves both the full load path (empty store) and
/// partial rebuilds after [`BatchStore::clear_subtree`]. Runs to completion;
/// the only failure is a buffer allocation error, which aborts the build.
#[allow(clippy::too_many_arguments)]
pub fn rebuild_all(
    oct: &mut Octree,
    slots: &SlotRegistry,
    cfg: &MesherConfig,
    store: &mut BatchStore,
    pools: &mut VboPools,
    registry: &mut VboRegistry,
    backend: &mut dyn UploadBackend,
    arena: &mut TJointArena,
    progress: Option<&mut dyn FnMut(f32, &str)>,
) -> Result<RebuildStats, BuildError> {
    arena.clear();

    let mut progress = Progress::new(oct.node_count(), progress);
    if cfg.fill_tjoints {
        find_tjoints(oct, arena, &mut progress);
    }

    let world_size = oct.world_size();
    let mut csi = 0;
    while 1 << csi < world_size {
        csi += 1;
    }

    store.roots.clear();
    {
        let mut mesher = walker::Mesher::new(
            oct, slots, cfg, arena, store, pools, registry, backend, progress,
        );
        mesher.update_batches(0, IVec3::ZERO, world_size / 2, csi - 1)?;
    }

    let flushed = pools.flush(backend, registry)?;
    store.apply_flushed(&flushed);

    let explicit_sky: usize = store.list.iter().map(|&id| store.get(id).sky as usize).sum();
    store.explicit_sky = explicit_sky;

    store.update_bounds(world_size, true);

    let stats = RebuildStats {
        batches: store.len(),
        verts: store.world_verts,
        tris: store.world_tris,
        explicit_sky,
        tjoints: arena.len(),
        buffers: registry.len(),
    };
    log::info!(
        "rebuilt {} batches: {} verts, {} tris, {} sky indices, {} tjoints, {} buffers",
        stats.batches,
        stats.verts,
        stats.tris,
        stats.explicit_sky,
        stats.tjoints,
        stats.buffers
    );
    Ok(stats)
}

//! The batching session: per-unit staging state shared by emission and the walker.

use std::collections::HashMap;

use karst_geom::{IVec3, Plane, Vec3};
use karst_octree::MapModel;
use karst_slots::SlotRegistry;

use crate::matsurf::{self, MatSurface};
use crate::sortkey::SortKey;
use crate::vertex::{Vertex, VertexTable};

const BOUND_SENTINEL: f32 = 1e16;

/// One decorative grass overlay triangle/quad over a top-layer face.
#[derive(Clone, Copy, Debug)]
pub struct GrassTri {
    pub v: [Vec3; 4],
    pub numv: u8,
    pub surface: Plane,
    pub min_z: f32,
    pub max_z: f32,
    pub center: Vec3,
    pub radius: f32,
    pub texture: u16,
    /// Coarse 2D blend-grid coordinate for blend-layer grass, 0 otherwise.
    pub blend: i32,
}

/// Accumulates one batching unit's vertices, per-bucket indices and side
/// geometry. All storage is reset between units via [`clear`](Self::clear)
/// rather than reallocation; the walker threads one collector through the
/// whole build.
pub struct BatchCollector {
    pub origin: IVec3,
    pub size: i32,
    pub(crate) verts: VertexTable,
    pub indices: HashMap<SortKey, Vec<u16>>,
    pub sky_indices: Vec<u16>,
    /// Bucket keys in draw order; filled by [`optimize`](Self::optimize).
    pub texs: Vec<SortKey>,
    pub grass_tris: Vec<GrassTri>,
    pub mat_surfs: Vec<MatSurface>,
    pub map_models: Vec<MapModel>,
    /// Staged world index count (3 per triangle, sky excluded).
    pub world_tris: usize,
    /// Staged sky index count.
    pub sky_tris: usize,
    pub alpha_min: Vec3,
    pub alpha_max: Vec3,
    pub refract_min: Vec3,
    pub refract_max: Vec3,
}

impl Default for BatchCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchCollector {
    pub fn new() -> Self {
        let mut vc = BatchCollector {
            origin: IVec3::ZERO,
            size: 0,
            verts: VertexTable::new(),
            indices: HashMap::new(),
            sky_indices: Vec::new(),
            texs: Vec::new(),
            grass_tris: Vec::new(),
            mat_surfs: Vec::new(),
            map_models: Vec::new(),
            world_tris: 0,
            sky_tris: 0,
            alpha_min: Vec3::ZERO,
            alpha_max: Vec3::ZERO,
            refract_min: Vec3::ZERO,
            refract_max: Vec3::ZERO,
        };
        vc.clear();
        vc
    }

    /// Resets for the next unit, retaining allocations where possible.
    pub fn clear(&mut self) {
        self.verts.clear();
        self.world_tris = 0;
        self.sky_tris = 0;
        self.indices.clear();
        self.sky_indices.clear();
        self.texs.clear();
        self.grass_tris.clear();
        self.mat_surfs.clear();
        self.map_models.clear();
        self.alpha_min = Vec3::new(BOUND_SENTINEL, BOUND_SENTINEL, BOUND_SENTINEL);
        self.refract_min = self.alpha_min;
        self.alpha_max = Vec3::new(-BOUND_SENTINEL, -BOUND_SENTINEL, -BOUND_SENTINEL);
        self.refract_max = self.alpha_max;
    }

    #[inline]
    pub fn add_vert(&mut self, v: Vertex) -> Option<u16> {
        self.verts.add(v)
    }

    #[inline]
    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    #[inline]
    pub fn verts(&self) -> &[Vertex] {
        self.verts.verts()
    }

    /// Collects non-empty buckets into draw order and compacts material surfaces.
    pub fn optimize(&mut self, slots: &SlotRegistry) {
        self.texs.clear();
        for (key, tris) in &self.indices {
            if !tris.is_empty() {
                self.texs.push(*key);
            }
        }
        self.texs
            .sort_by(|a, b| SortKey::draw_order(a, b, slots));
        matsurf::optimize_mat_surfs(&mut self.mat_surfs);
    }

    /// Whether the unit holds nothing worth materializing.
    pub fn is_empty(&self) -> bool {
        self.verts.is_empty()
            && self.mat_surfs.is_empty()
            && self.sky_indices.is_empty()
            && self.grass_tris.is_empty()
            && self.map_models.is_empty()
    }
}

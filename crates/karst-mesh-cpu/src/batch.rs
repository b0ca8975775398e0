//! Batch records ("vertex array nodes"), their store/hierarchy, teardown and
//! bottom-up bounding-box aggregation.

use karst_geom::IVec3;
use karst_octree::{LAYER_BLEND, MapModel, Octree};
use karst_slots::{SHADER_ENVMAP, SlotRegistry, TEX_ENVMAP};
use karst_upload::{
    BufferId, Channel, FlushedVbo, PackedVertex, UploadBackend, VboPools, VboRegistry,
};

use crate::matsurf::{MatSurface, mat_mask};
use crate::session::{BatchCollector, GrassTri};
use crate::sortkey::{ALPHA_BACK, ALPHA_FRONT, ALPHA_REFRACT};

/// Merge-state bits: geometry in this subtree was promoted (ORIGIN), some faces
/// were consumed elsewhere (PART), promoted faces were emitted here (USE).
pub const MERGE_ORIGIN: u8 = 1 << 0;
pub const MERGE_PART: u8 = 1 << 1;
pub const MERGE_USE: u8 = 1 << 2;

pub type BatchId = u32;

const INVALID: IVec3 = IVec3::splat(-1);

/// One draw bucket's index range within a batch.
#[derive(Clone, Copy, Debug)]
pub struct ElemSet {
    pub texture: u16,
    pub envmap: u16,
    pub orient: u8,
    pub layer: u8,
    /// Index count (a multiple of 3).
    pub length: u32,
    pub min_vert: u32,
    pub max_vert: u32,
}

/// A materialized geometry unit covering one octree subtree: offsets into the
/// shared buffers, per-bucket element sets, side geometry and bounds.
#[derive(Clone, Debug)]
pub struct Batch {
    pub origin: IVec3,
    pub size: i32,
    pub parent: Option<BatchId>,
    pub children: Vec<BatchId>,

    pub verts: u32,
    /// Opaque triangle count; the remaining classes count separately below.
    pub tris: u32,
    pub texs: u32,
    pub blends: u32,
    pub blend_tris: u32,
    pub alpha_back: u32,
    pub alpha_back_tris: u32,
    pub alpha_front: u32,
    pub alpha_front_tris: u32,
    pub refract: u32,
    pub refract_tris: u32,
    pub sky: u32,

    pub vbuf: Option<BufferId>,
    pub voffset: u32,
    pub min_vert: u32,
    pub max_vert: u32,
    pub ebuf: Option<BufferId>,
    pub eoffset: u32,
    pub skybuf: Option<BufferId>,
    pub skyoffset: u32,

    pub elems: Vec<ElemSet>,
    pub mat_surfs: Vec<MatSurface>,
    pub mat_mask: u32,
    pub grass_tris: Vec<GrassTri>,
    pub map_models: Vec<MapModel>,
    pub tex_mask: u32,
    pub dyn_texs: u32,

    pub geom_min: IVec3,
    pub geom_max: IVec3,
    pub water_min: IVec3,
    pub water_max: IVec3,
    pub lava_min: IVec3,
    pub lava_max: IVec3,
    pub glass_min: IVec3,
    pub glass_max: IVec3,
    pub alpha_min: IVec3,
    pub alpha_max: IVec3,
    pub refract_min: IVec3,
    pub refract_max: IVec3,
    pub bb_min: IVec3,
    pub bb_max: IVec3,

    pub has_merges: u8,
    pub merge_level: i32,
}

impl Batch {
    pub fn new(origin: IVec3, size: i32) -> Self {
        // Material boxes default to the inverted-empty box so unioning them
        // into the aggregate bounds is a no-op when the class is absent.
        let inv_min = origin + IVec3::splat(size);
        Batch {
            origin,
            size,
            parent: None,
            children: Vec::new(),
            verts: 0,
            tris: 0,
            texs: 0,
            blends: 0,
            blend_tris: 0,
            alpha_back: 0,
            alpha_back_tris: 0,
            alpha_front: 0,
            alpha_front_tris: 0,
            refract: 0,
            refract_tris: 0,
            sky: 0,
            vbuf: None,
            voffset: 0,
            min_vert: 0,
            max_vert: 0,
            ebuf: None,
            eoffset: 0,
            skybuf: None,
            skyoffset: 0,
            elems: Vec::new(),
            mat_surfs: Vec::new(),
            mat_mask: 0,
            grass_tris: Vec::new(),
            map_models: Vec::new(),
            tex_mask: 0,
            dyn_texs: 0,
            geom_min: origin,
            geom_max: origin,
            water_min: inv_min,
            water_max: origin,
            lava_min: inv_min,
            lava_max: origin,
            glass_min: inv_min,
            glass_max: origin,
            alpha_min: INVALID,
            alpha_max: INVALID,
            refract_min: INVALID,
            refract_max: INVALID,
            bb_min: INVALID,
            bb_max: INVALID,
            has_merges: 0,
            merge_level: -1,
        }
    }

    /// Total triangles across every class.
    pub fn all_tris(&self) -> u32 {
        self.tris + self.blend_tris + self.alpha_back_tris + self.alpha_front_tris
            + self.refract_tris
    }
}

/// Arena of live batches plus the root list and world-wide aggregates.
#[derive(Default)]
pub struct BatchStore {
    slots: Vec<Option<Batch>>,
    free: Vec<u32>,
    /// Every live batch, in creation order.
    pub list: Vec<BatchId>,
    /// Batches with no parent batch above them.
    pub roots: Vec<BatchId>,
    pub world_verts: usize,
    pub world_tris: usize,
    pub explicit_sky: usize,
    pub world_min: IVec3,
    pub world_max: IVec3,
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, batch: Batch) -> BatchId {
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(batch);
                id
            }
            None => {
                self.slots.push(Some(batch));
                (self.slots.len() - 1) as u32
            }
        };
        self.list.push(id);
        id
    }

    #[inline]
    pub fn get(&self, id: BatchId) -> &Batch {
        self.slots[id as usize].as_ref().expect("dead batch id")
    }

    #[inline]
    pub fn get_mut(&mut self, id: BatchId) -> &mut Batch {
        self.slots[id as usize].as_mut().expect("dead batch id")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Assigns freshly uploaded buffer handles to the batches packed into them.
    pub fn apply_flushed(&mut self, flushed: &[FlushedVbo]) {
        for f in flushed {
            for &tag in &f.batches {
                if let Some(b) = self.slots.get_mut(tag as usize).and_then(|s| s.as_mut()) {
                    match f.channel {
                        Channel::Vertex => b.vbuf = Some(f.buffer),
                        Channel::Index => b.ebuf = Some(f.buffer),
                        Channel::SkyIndex => b.skybuf = Some(f.buffer),
                    }
                }
            }
        }
    }

    /// Adds a newly sealed batch's geometry to the world aggregates.
    pub fn account_new(&mut self, id: BatchId) {
        let b = self.get(id);
        let verts = b.verts as usize;
        let tris = b.all_tris() as usize;
        self.world_verts += verts;
        self.world_tris += tris;
    }

    /// Destroys one batch, releasing its buffer references. With `reparent`,
    /// its children are attached to its parent; otherwise links are dropped
    /// wholesale (bulk teardown).
    pub fn destroy(
        &mut self,
        id: BatchId,
        reparent: bool,
        registry: &mut VboRegistry,
        backend: &mut dyn UploadBackend,
    ) {
        let Some(batch) = self.slots[id as usize].take() else {
            return;
        };
        self.world_verts -= batch.verts as usize;
        self.world_tris -= batch.all_tris() as usize;
        if let Some(i) = self.list.iter().position(|&b| b == id) {
            self.list.swap_remove(i);
        }
        if batch.parent.is_none() {
            if let Some(i) = self.roots.iter().position(|&b| b == id) {
                self.roots.swap_remove(i);
            }
        }
        if reparent {
            if let Some(parent) = batch
                .parent
                .and_then(|p| self.slots.get_mut(p as usize))
                .and_then(|s| s.as_mut())
            {
                if let Some(i) = parent.children.iter().position(|&c| c == id) {
                    parent.children.swap_remove(i);
                }
            }
            for &child in &batch.children {
                if let Some(c) = self.slots.get_mut(child as usize).and_then(|s| s.as_mut()) {
                    c.parent = batch.parent;
                }
                if let Some(parent) = batch
                    .parent
                    .and_then(|p| self.slots.get_mut(p as usize))
                    .and_then(|s| s.as_mut())
                {
                    parent.children.push(child);
                }
            }
        }
        if let Some(vbuf) = batch.vbuf {
            registry.release(vbuf, backend);
        }
        if let Some(ebuf) = batch.ebuf {
            registry.release(ebuf, backend);
        }
        if let Some(skybuf) = batch.skybuf {
            registry.release(skybuf, backend);
        }
        self.free.push(id);
    }

    /// Tears down every batch under an octree subtree and resets that
    /// subtree's render bookkeeping (the invalidation entry point).
    pub fn clear_subtree(
        &mut self,
        oct: &mut Octree,
        idx: u32,
        registry: &mut VboRegistry,
        backend: &mut dyn UploadBackend,
    ) {
        if let Some(ext) = oct.cube_mut(idx).ext.as_deref_mut() {
            if let Some(batch) = ext.batch.take() {
                self.destroy(batch, false, registry, backend);
            }
            ext.tjoints = -1;
        }
        if let Some(base) = oct.cube(idx).children {
            for i in 0..8u32 {
                self.clear_subtree(oct, base + i, registry, backend);
            }
        }
    }

    /// Tears down every batch in the world.
    pub fn clear_world(
        &mut self,
        oct: &mut Octree,
        registry: &mut VboRegistry,
        backend: &mut dyn UploadBackend,
    ) {
        for i in 0..8u32 {
            self.clear_subtree(oct, i, registry, backend);
        }
        self.roots.clear();
    }

    /// Recomputes batch bounding boxes bottom-up. `force` recomputes the whole
    /// hierarchy and the world extents; otherwise only still-unset boxes are
    /// filled in. Idempotent and re-runnable after partial edits.
    pub fn update_bounds(&mut self, world_size: i32, force: bool) {
        if force {
            self.world_min = IVec3::splat(world_size);
            self.world_max = IVec3::ZERO;
        }
        let roots = self.roots.clone();
        for r in roots {
            self.update_batch_bounds(r, force);
        }
        if force && self.world_min.x >= self.world_max.x {
            self.world_min = IVec3::ZERO;
            self.world_max = IVec3::splat(world_size);
        }
    }

    fn update_batch_bounds(&mut self, id: BatchId, force: bool) {
        {
            let Some(b) = self.slots.get(id as usize).and_then(|s| s.as_ref()) else {
                return;
            };
            if !force && b.bb_min.x >= 0 {
                return;
            }
        }
        let mut children = self.get(id).children.clone();
        // Drop links to batches torn down by a partial invalidation.
        children.retain(|&c| {
            self.slots
                .get(c as usize)
                .map(|s| s.is_some())
                .unwrap_or(false)
        });
        for c in &children {
            self.update_batch_bounds(*c, force);
        }
        let mut bb_min;
        let mut bb_max;
        {
            let b = self.get(id);
            bb_min = b.geom_min;
            bb_max = b.geom_max;
            bb_min = bb_min.min(b.lava_min);
            bb_max = bb_max.max(b.lava_max);
            bb_min = bb_min.min(b.water_min);
            bb_max = bb_max.max(b.water_max);
            bb_min = bb_min.min(b.glass_min);
            bb_max = bb_max.max(b.glass_max);
            for m in &b.map_models {
                bb_min = bb_min.min(m.bb_min);
                bb_max = bb_max.max(m.bb_max);
            }
        }
        for c in &children {
            let child = self.get(*c);
            bb_min = bb_min.min(child.bb_min);
            bb_max = bb_max.max(child.bb_max);
        }
        let b = self.get_mut(id);
        b.bb_min = bb_min;
        b.bb_max = bb_max;
        self.world_min = self.world_min.min(bb_min);
        self.world_max = self.world_max.max(bb_max);
    }
}

/// Packs the collector's finished data into the staging pools and fills in the
/// batch record: vertex range, per-bucket element sets (indices rebased to the
/// shared vertex buffer), per-class counts and texture masks.
pub(crate) fn setup_batch_data(
    vc: &mut BatchCollector,
    tag: BatchId,
    batch: &mut Batch,
    pools: &mut VboPools,
    slots: &SlotRegistry,
) {
    batch.verts = vc.vert_count() as u32;
    batch.tris = (vc.world_tris / 3) as u32;
    batch.min_vert = 0;
    batch.max_vert = batch.verts.saturating_sub(1);
    if batch.verts > 0 {
        let packed: Vec<PackedVertex> = vc.verts().iter().map(|v| v.pack()).collect();
        batch.voffset = pools.add_verts(tag, &packed) as u32;
        batch.min_vert += batch.voffset;
        batch.max_vert += batch.voffset;
    }

    batch.mat_surfs = std::mem::take(&mut vc.mat_surfs);
    batch.mat_mask = mat_mask(&batch.mat_surfs);

    batch.sky = vc.sky_indices.len() as u32;
    if batch.sky > 0 {
        let voffset = batch.voffset as u16;
        let rebased: Vec<u16> = vc.sky_indices.iter().map(|&i| i + voffset).collect();
        batch.skyoffset = pools.add_sky(tag, &rebased) as u32;
    }

    batch.elems.clear();
    if !vc.texs.is_empty() {
        let mut edata: Vec<u16> = Vec::with_capacity(vc.world_tris);
        for key in &vc.texs {
            let tris = &vc.indices[key];
            let mut e = ElemSet {
                texture: key.tex,
                envmap: key.envmap,
                orient: key.orient,
                layer: key.layer,
                length: tris.len() as u32,
                min_vert: u32::MAX,
                max_vert: 0,
            };
            for &ix in tris {
                let g = ix as u32 + batch.voffset;
                edata.push(g as u16);
                e.min_vert = e.min_vert.min(g);
                e.max_vert = e.max_vert.max(g);
            }
            let set_tris = e.length / 3;
            if key.layer == LAYER_BLEND {
                batch.tris -= set_tris;
                batch.blends += 1;
                batch.blend_tris += set_tris;
            } else if key.alpha == ALPHA_BACK {
                batch.tris -= set_tris;
                batch.alpha_back += 1;
                batch.alpha_back_tris += set_tris;
            } else if key.alpha == ALPHA_FRONT {
                batch.tris -= set_tris;
                batch.alpha_front += 1;
                batch.alpha_front_tris += set_tris;
            } else if key.alpha == ALPHA_REFRACT {
                batch.tris -= set_tris;
                batch.refract += 1;
                batch.refract_tris += set_tris;
            } else {
                batch.texs += 1;
            }
            batch.elems.push(e);
        }
        batch.eoffset = pools.add_indices(tag, &edata) as u32;
    }

    batch.tex_mask = 0;
    batch.dyn_texs = 0;
    for e in &batch.elems {
        let vslot = slots.lookup(e.texture);
        let slot = slots.slot(vslot);
        if vslot.is_dynamic() {
            batch.dyn_texs += 1;
        }
        batch.tex_mask |= slot.texmask as u32;
        if slot.shader_flags & SHADER_ENVMAP != 0 {
            batch.tex_mask |= 1 << TEX_ENVMAP;
        }
    }

    batch.grass_tris = std::mem::take(&mut vc.grass_tris);
    batch.map_models = std::mem::take(&mut vc.map_models);
}

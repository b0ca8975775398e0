//! The octree batching walker: counts visible faces, decides where to
//! materialize batches, stages merged faces per level and seals batches
//! through the collector into the upload pools.

use karst_geom::{IVec3, Vec3};
use karst_octree::{
    LAYER_BLEND, LAYER_BOTTOM, LAYER_TOP, MAXFACEVERTS, O_BOTTOM, Octree, VertInfo,
    face_convexity, face_verts, mat,
};
use karst_slots::{DEFAULT_SKY, EMID_CUSTOM, EMID_NONE, SHADER_ENVMAP, SlotRegistry, TEX_ENVMAP};
use karst_upload::{UploadBackend, VboPools, VboRegistry};

use crate::batch::{Batch, BatchStore, MERGE_ORIGIN, MERGE_PART, MERGE_USE, setup_batch_data};
use crate::config::MesherConfig;
use crate::emit::add_cube_verts;
use crate::matsurf::gen_mat_surfs;
use crate::session::BatchCollector;
use crate::tjoint::{EDGES_PER_FACE, TJointArena};
use crate::{BuildError, Progress};

/// Deepest level a merged face may be promoted to (cells of 2^12 units).
pub const MAX_MERGE_LEVEL: usize = 12;

/// Batches never span regions larger than the explicit-vertex fixed-point range.
const MAX_BATCH_SIZE: i32 = 0x1000;

const MAX_FV: usize = MAXFACEVERTS as usize;

/// A face promoted to a coarser level, staged until recursion returns there.
#[derive(Clone)]
struct MergedFace {
    orient: u8,
    /// Vertex count with layer bits, as stored in the surface record.
    numverts: u8,
    material: u16,
    tex: u16,
    envmap: u16,
    verts: Vec<VertInfo>,
    tjoints: i32,
}

pub(crate) struct Mesher<'a, 'p> {
    oct: &'a mut Octree,
    slots: &'a SlotRegistry,
    cfg: &'a MesherConfig,
    arena: &'a TJointArena,
    store: &'a mut BatchStore,
    pools: &'a mut VboPools,
    registry: &'a mut VboRegistry,
    backend: &'a mut dyn UploadBackend,
    vc: BatchCollector,
    merges: Vec<Vec<MergedFace>>,
    merge_max: i32,
    has_merges: u8,
    progress: Progress<'p>,
}

impl<'a, 'p> Mesher<'a, 'p> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oct: &'a mut Octree,
        slots: &'a SlotRegistry,
        cfg: &'a MesherConfig,
        arena: &'a TJointArena,
        store: &'a mut BatchStore,
        pools: &'a mut VboPools,
        registry: &'a mut VboRegistry,
        backend: &'a mut dyn UploadBackend,
        progress: Progress<'p>,
    ) -> Self {
        Mesher {
            oct,
            slots,
            cfg,
            arena,
            store,
            pools,
            registry,
            backend,
            vc: BatchCollector::new(),
            merges: (0..=MAX_MERGE_LEVEL).map(|_| Vec::new()).collect(),
            merge_max: 0,
            has_merges: 0,
            progress,
        }
    }

    /// Classifies all six faces of a leaf and records the visibility byte on
    /// the cube; returns the number of semi-visible faces.
    fn set_cube_visibility(&mut self, idx: u32, o: IVec3, size: i32) -> usize {
        let mut numvis = 0usize;
        let mut vismask = 0u8;
        let mut collidemask = 0u8;
        let mut checkmask = 0u8;
        for i in 0..6usize {
            let facemask = self.oct.classify_face(idx, i, o, size);
            if facemask & 1 != 0 {
                vismask |= 1 << i;
                let c = self.oct.cube(idx);
                let explicit = c
                    .ext
                    .as_ref()
                    .map(|e| e.surfaces[i].vert_count() > 0)
                    .unwrap_or(false);
                if c.merged & (1 << i) != 0 {
                    if explicit {
                        numvis += 1;
                    }
                } else {
                    numvis += 1;
                    if c.textures[i] != DEFAULT_SKY && !explicit {
                        checkmask |= 1 << i;
                    }
                }
            }
            if facemask & 2 != 0 {
                collidemask |= 1 << i;
            }
        }
        self.oct.cube_mut(idx).visible = collidemask
            | if vismask != 0 {
                if vismask != collidemask {
                    if checkmask != 0 { 0xC0 } else { 0x80 }
                } else {
                    0x40
                }
            } else {
                0
            };
        numvis
    }

    /// Emits every visible, non-merged face of a leaf cube.
    fn gen_cube_verts(&mut self, idx: u32, o: IVec3, size: i32) {
        {
            let c = self.oct.cube(idx);
            if c.visible & 0xC0 == 0 {
                return;
            }
        }
        let (vismask, tj_head) = {
            let c = self.oct.cube(idx);
            let mut vismask = !c.merged & 0x3F;
            if c.visible & 0x80 == 0 {
                vismask &= c.visible;
            }
            let tj = if self.cfg.fill_tjoints {
                c.ext.as_ref().map(|e| e.tjoints).unwrap_or(-1)
            } else {
                -1
            };
            (vismask, tj)
        };
        if vismask == 0 {
            return;
        }
        let mut tj = tj_head;
        for i in 0..6usize {
            if vismask & (1 << i) == 0 {
                continue;
            }
            let vis = self.oct.visible_tris(idx, i, o, size);
            if vis == 0 {
                continue;
            }

            // Copy the face geometry out of the cube before emission.
            let mut pos = [Vec3::ZERO; MAX_FV];
            let mut vbuf = [VertInfo::default(); MAX_FV];
            let (numverts, explicit, surf_bits, texture, material) = {
                let c = self.oct.cube(idx);
                let explicit = c
                    .ext
                    .as_ref()
                    .map(|e| e.surfaces[i].vert_count())
                    .unwrap_or(0);
                let mut numverts = 0usize;
                if explicit > 0 {
                    let ext = c.ext.as_ref().unwrap();
                    let vo = Vec3::from(o.mask(!0xFFF));
                    for (j, v) in ext.face_verts(i).iter().enumerate() {
                        vbuf[j] = *v;
                        pos[j] = Vec3::from(v.xyz()) * (1.0 / 8.0) + vo;
                    }
                    numverts = explicit;
                } else {
                    let v = face_verts(i);
                    let order = if vis & 4 != 0 { 1 } else { 0 };
                    let vo = Vec3::from(o);
                    let scale = size as f32 / 8.0;
                    pos[numverts] = Vec3::from(v[order]) * scale + vo;
                    numverts += 1;
                    if vis & 1 != 0 {
                        pos[numverts] = Vec3::from(v[order + 1]) * scale + vo;
                        numverts += 1;
                    }
                    pos[numverts] = Vec3::from(v[order + 2]) * scale + vo;
                    numverts += 1;
                    if vis & 2 != 0 {
                        pos[numverts] = Vec3::from(v[(order + 3) & 3]) * scale + vo;
                        numverts += 1;
                    }
                }
                let surf_bits = c.ext.as_ref().map(|e| e.surfaces[i].numverts).unwrap_or(0);
                (numverts, explicit, surf_bits, c.textures[i], c.material)
            };

            let vslot = self.slots.lookup(texture);
            let slot = self.slots.slot(vslot);
            let alpha = material & mat::ALPHA != 0;
            let layer_slot = if vslot.layer != 0 && !alpha {
                Some(self.slots.lookup(vslot.layer))
            } else {
                None
            };
            let envmap = if slot.shader_flags & SHADER_ENVMAP != 0 {
                if slot.texmask & (1 << TEX_ENVMAP) != 0 {
                    EMID_CUSTOM
                } else {
                    self.oct.closest_envmap(i, o, size)
                }
            } else {
                EMID_NONE
            };
            let envmap2 = match layer_slot {
                Some(ls) => {
                    let lslot = self.slots.slot(ls);
                    if lslot.shader_flags & SHADER_ENVMAP != 0 {
                        if lslot.texmask & (1 << TEX_ENVMAP) != 0 {
                            EMID_CUSTOM
                        } else {
                            self.oct.closest_envmap(i, o, size)
                        }
                    } else {
                        EMID_NONE
                    }
                }
                None => EMID_NONE,
            };

            while tj >= 0 && (self.arena.get(tj).edge as usize) < i * EDGES_PER_FACE {
                tj = self.arena.get(tj).next;
            }
            let hastj = if tj >= 0 && (self.arena.get(tj).edge as usize) < (i + 1) * EDGES_PER_FACE
            {
                tj
            } else {
                -1
            };

            let convex = if explicit == 4 {
                face_convexity(&[vbuf[0].xyz(), vbuf[1].xyz(), vbuf[2].xyz(), vbuf[3].xyz()])
            } else {
                0
            };
            let grassy = if slot.autograss && i != O_BOTTOM {
                if vis != 3 || convex != 0 { 1 } else { 2 }
            } else {
                0
            };

            if surf_bits == 0 {
                add_cube_verts(
                    &mut self.vc,
                    self.arena,
                    self.slots,
                    vslot,
                    i,
                    &pos[..numverts],
                    texture,
                    None,
                    hastj,
                    envmap,
                    grassy,
                    alpha,
                    LAYER_TOP,
                );
            } else {
                let vinfo = if explicit > 0 {
                    Some(&vbuf[..numverts])
                } else {
                    None
                };
                if surf_bits & MAXFACEVERTS == 0 || surf_bits & LAYER_TOP != 0 {
                    add_cube_verts(
                        &mut self.vc,
                        self.arena,
                        self.slots,
                        vslot,
                        i,
                        &pos[..numverts],
                        texture,
                        vinfo,
                        hastj,
                        envmap,
                        grassy,
                        alpha,
                        surf_bits & LAYER_BLEND,
                    );
                }
                if surf_bits & LAYER_BOTTOM != 0 {
                    add_cube_verts(
                        &mut self.vc,
                        self.arena,
                        self.slots,
                        layer_slot.unwrap_or(vslot),
                        i,
                        &pos[..numverts],
                        vslot.layer,
                        vinfo,
                        hastj,
                        envmap2,
                        0,
                        false,
                        if surf_bits & LAYER_TOP != 0 {
                            LAYER_BOTTOM
                        } else {
                            LAYER_TOP
                        },
                    );
                }
            }
        }
    }

    /// Stages a leaf's merged faces at their coarsest applicable level;
    /// returns the deepest level staged.
    fn gen_merged_faces(&mut self, idx: u32, co: IVec3, size: i32, min_level: i32) -> i32 {
        let mut max_level = -1;
        let mut staged: Vec<(i32, MergedFace)> = Vec::new();
        let mut partial = false;
        {
            let c = self.oct.cube(idx);
            if c.is_empty() {
                return -1;
            }
            let Some(ext) = c.ext.as_ref() else {
                return -1;
            };
            let mut tj = ext.tjoints;
            for i in 0..6usize {
                if c.merged & (1 << i) == 0 {
                    continue;
                }
                let surf = ext.surfaces[i];
                let numverts = surf.vert_count();
                if numverts == 0 {
                    if min_level < 0 {
                        partial = true;
                    }
                    continue;
                }
                let verts: Vec<VertInfo> = ext.face_verts(i).to_vec();
                let level = calc_merged_size(co, size, &verts);
                if level > min_level {
                    max_level = max_level.max(level);

                    while tj >= 0 && (self.arena.get(tj).edge as usize) < i * EDGES_PER_FACE {
                        tj = self.arena.get(tj).next;
                    }
                    let mftj = if tj >= 0
                        && (self.arena.get(tj).edge as usize) < (i + 1) * EDGES_PER_FACE
                    {
                        tj
                    } else {
                        -1
                    };

                    let vslot = self.slots.lookup(c.textures[i]);
                    let slot = self.slots.slot(vslot);
                    let alpha = c.material & mat::ALPHA != 0;
                    let layer_slot = if vslot.layer != 0 && !alpha {
                        Some(self.slots.lookup(vslot.layer))
                    } else {
                        None
                    };
                    let envmap = if slot.shader_flags & SHADER_ENVMAP != 0 {
                        if slot.texmask & (1 << TEX_ENVMAP) != 0 {
                            EMID_CUSTOM
                        } else {
                            self.oct.closest_envmap(i, co, size)
                        }
                    } else {
                        EMID_NONE
                    };
                    let envmap2 = match layer_slot {
                        Some(ls) => {
                            let lslot = self.slots.slot(ls);
                            if lslot.shader_flags & SHADER_ENVMAP != 0 {
                                if lslot.texmask & (1 << TEX_ENVMAP) != 0 {
                                    EMID_CUSTOM
                                } else {
                                    self.oct.closest_envmap(i, co, size)
                                }
                            } else {
                                EMID_NONE
                            }
                        }
                        None => EMID_NONE,
                    };

                    let mf = MergedFace {
                        orient: i as u8,
                        numverts: surf.numverts,
                        material: c.material,
                        tex: c.textures[i],
                        envmap,
                        verts,
                        tjoints: mftj,
                    };
                    if surf.numverts & LAYER_TOP != 0 {
                        staged.push((level, mf.clone()));
                    }
                    if surf.numverts & LAYER_BOTTOM != 0 {
                        let mut bottom = mf;
                        bottom.tex = vslot.layer;
                        bottom.envmap = envmap2;
                        bottom.numverts &= !LAYER_BLEND;
                        bottom.numverts |= if surf.numverts & LAYER_TOP != 0 {
                            LAYER_BOTTOM
                        } else {
                            LAYER_TOP
                        };
                        staged.push((level, bottom));
                    }
                }
            }
        }
        if partial {
            self.has_merges |= MERGE_PART;
        }
        for (level, mf) in staged {
            self.merges[level as usize].push(mf);
        }
        if max_level >= 0 {
            self.merge_max = self.merge_max.max(max_level);
            self.has_merges |= MERGE_ORIGIN;
        }
        max_level
    }

    /// Re-collects merges under a subtree that already has batches, so a
    /// parent rebuild can absorb merged geometry escaping those batches.
    fn find_merged_faces(&mut self, idx: u32, co: IVec3, size: i32, csi: i32, min_level: i32) -> i32 {
        let c = self.oct.cube(idx);
        if let Some(b) = c.ext.as_ref().and_then(|e| e.batch) {
            let batch = self.store.get(b);
            if batch.has_merges & MERGE_ORIGIN == 0 {
                return batch.merge_level;
            }
        }
        if let Some(base) = c.children {
            let half = size / 2;
            let mut max_level = -1;
            for i in 0..8usize {
                let o = IVec3::child_origin(i, co, half);
                let level = self.find_merged_faces(base + i as u32, o, half, csi - 1, min_level);
                max_level = max_level.max(level);
            }
            max_level
        } else if self.oct.cube(idx).ext.is_some() && self.oct.cube(idx).merged != 0 {
            self.gen_merged_faces(idx, co, size, min_level)
        } else {
            -1
        }
    }

    /// Emits every merged face staged at `level` as an ordinary face of the
    /// enclosing region.
    fn add_merged_verts(&mut self, level: usize, o: IVec3) {
        let mfl = std::mem::take(&mut self.merges[level]);
        if mfl.is_empty() {
            return;
        }
        let vo = Vec3::from(o.mask(!0xFFF));
        let mut pos = [Vec3::ZERO; MAX_FV];
        for mf in &mfl {
            let numverts = (mf.numverts & MAXFACEVERTS) as usize;
            for (j, v) in mf.verts.iter().take(numverts).enumerate() {
                pos[j] = Vec3::from(v.xyz()) * (1.0 / 8.0) + vo;
            }
            let vslot = self.slots.lookup(mf.tex);
            let slot = self.slots.slot(vslot);
            let grassy = if slot.autograss
                && mf.orient as usize != O_BOTTOM
                && mf.numverts & LAYER_TOP != 0
            {
                2
            } else {
                0
            };
            add_cube_verts(
                &mut self.vc,
                self.arena,
                self.slots,
                vslot,
                mf.orient as usize,
                &pos[..numverts],
                mf.tex,
                Some(&mf.verts),
                mf.tjoints,
                mf.envmap,
                grassy,
                mf.material & mat::ALPHA != 0,
                mf.numverts & LAYER_BLEND,
            );
            self.has_merges |= MERGE_USE;
        }
    }

    /// Visits one subtree collecting geometry into the session; `max_level`
    /// reports the deepest merge level seen so parents can mark escapes.
    fn render_cube(&mut self, idx: u32, co: IVec3, size: i32, csi: i32, max_level: &mut i32) {
        if let Some(b) = self.oct.cube(idx).ext.as_ref().and_then(|e| e.batch) {
            // Already materialized: report its merge level, do not re-render.
            *max_level = (*max_level).max(self.store.get(b).merge_level);
            return;
        }

        if let Some(base) = self.oct.cube(idx).children {
            self.oct.cube_mut(idx).escaped = 0;
            let half = size / 2;
            let mut escaped = 0u8;
            for i in 0..8usize {
                let o = IVec3::child_origin(i, co, half);
                let mut level = -1;
                self.render_cube(base + i as u32, o, half, csi - 1, &mut level);
                if level >= csi {
                    escaped |= 1 << i;
                }
                *max_level = (*max_level).max(level);
            }
            self.oct.cube_mut(idx).escaped = escaped;

            if csi >= 0 && csi as usize <= MAX_MERGE_LEVEL && !self.merges[csi as usize].is_empty()
            {
                self.add_merged_verts(csi as usize, co);
            }
            self.collect_map_models(idx);
            return;
        }

        if !self.oct.cube(idx).is_empty() {
            self.gen_cube_verts(idx, co, size);
            if self.oct.cube(idx).merged != 0 {
                *max_level = (*max_level).max(self.gen_merged_faces(idx, co, size, -1));
            }
        }
        if mat::volume(self.oct.cube(idx).material) != mat::AIR {
            gen_mat_surfs(self.oct, idx, co, size, &mut self.vc.mat_surfs);
        }
        self.collect_map_models(idx);

        if csi >= 0 && csi as usize <= MAX_MERGE_LEVEL && !self.merges[csi as usize].is_empty() {
            self.add_merged_verts(csi as usize, co);
        }
    }

    fn collect_map_models(&mut self, idx: u32) {
        if let Some(ext) = self.oct.cube(idx).ext.as_ref() {
            if !ext.map_models.is_empty() {
                self.vc.map_models.extend_from_slice(&ext.map_models);
            }
        }
    }

    /// World-space bounds of the session's collected vertices, quantized to
    /// 1/8-unit fixed point (floor for min, ceil for max).
    fn calc_geom_bb(&self, o: IVec3, size: i32) -> (IVec3, IVec3) {
        let mut vmin = Vec3::from(o + IVec3::splat(size));
        let mut vmax = Vec3::from(o);
        for v in self.vc.verts() {
            vmin = vmin.min(v.pos);
            vmax = vmax.max(v.pos);
        }
        (
            IVec3::from(vmin * 8.0).shr(3),
            (IVec3::from(vmax * 8.0) + IVec3::splat(7)).shr(3),
        )
    }

    /// Renders one subtree into the session and materializes a batch for it
    /// when it produced anything (always at the top-level cap). On the empty
    /// path, merged faces staged during the visit are rolled back so a larger
    /// subtree can absorb them.
    fn seal_batch(&mut self, idx: u32, co: IVec3, size: i32, csi: i32) -> Result<(), BuildError> {
        debug_assert!(size <= MAX_BATCH_SIZE);
        let snapshot: Vec<usize> = self.merges.iter().map(|m| m.len()).collect();

        self.vc.origin = co;
        self.vc.size = size;
        let mut max_level = -1;
        self.render_cube(idx, co, size, csi, &mut max_level);

        let (bb_min, bb_max) = self.calc_geom_bb(co, size);
        let top = MAX_BATCH_SIZE.min(self.oct.world_size() / 2);
        if size == top || !self.vc.is_empty() {
            let id = self.new_batch(co, size)?;
            self.oct.ensure_ext(idx).batch = Some(id);
            let has_merges = self.has_merges;
            let merge_level = self.merge_max;
            let b = self.store.get_mut(id);
            b.geom_min = bb_min;
            b.geom_max = bb_max;
            b.has_merges = has_merges;
            b.merge_level = merge_level;
            accumulate_mat_bounds(b);
        } else {
            for (level, len) in snapshot.into_iter().enumerate() {
                self.merges[level].truncate(len);
            }
        }
        self.vc.clear();
        Ok(())
    }

    /// Creates the batch record and packs the session's data into the staging
    /// pools, flushing first if any channel cap would be exceeded.
    fn new_batch(&mut self, o: IVec3, size: i32) -> Result<crate::batch::BatchId, BuildError> {
        self.vc.optimize(self.slots);
        let id = self.store.alloc(Batch::new(o, size));
        if self.vc.vert_count() > 0
            && self
                .pools
                .would_overflow(self.vc.vert_count(), self.vc.world_tris, self.vc.sky_tris)
        {
            let flushed = self.pools.flush(self.backend, self.registry)?;
            self.store.apply_flushed(&flushed);
        }
        setup_batch_data(
            &mut self.vc,
            id,
            self.store.get_mut(id),
            self.pools,
            self.slots,
        );
        let alpha_min = IVec3::from(self.vc.alpha_min * 8.0).shr(3);
        let alpha_max = (IVec3::from(self.vc.alpha_max * 8.0) + IVec3::splat(7)).shr(3);
        let refract_min = IVec3::from(self.vc.refract_min * 8.0).shr(3);
        let refract_max = (IVec3::from(self.vc.refract_max * 8.0) + IVec3::splat(7)).shr(3);
        let b = self.store.get_mut(id);
        if b.alpha_front_tris + b.alpha_back_tris + b.refract_tris > 0 {
            b.alpha_min = alpha_min;
            b.alpha_max = alpha_max;
        }
        if b.refract_tris > 0 {
            b.refract_min = refract_min;
            b.refract_max = refract_max;
        }
        self.store.account_new(id);
        Ok(id)
    }

    /// Walks one group of 8 sibling cubes, counting semi-visible faces and
    /// materializing batches greedily bottom-up; returns the unabsorbed count.
    pub fn update_batches(
        &mut self,
        group_base: u32,
        co: IVec3,
        size: i32,
        csi: i32,
    ) -> Result<usize, BuildError> {
        self.progress.tick("recalculating geometry...");
        let mut ccount = 0usize;
        let mut cmerge_max = self.merge_max;
        let mut chas_merges = self.has_merges;
        let top = MAX_BATCH_SIZE.min(self.oct.world_size() / 2);
        for i in 0..8usize {
            let idx = group_base + i as u32;
            let o = IVec3::child_origin(i, co, size);
            let mut count = 0usize;
            let childpos = self.store.roots.len();
            self.merge_max = 0;
            self.has_merges = 0;
            let existing = self.oct.cube(idx).ext.as_ref().and_then(|e| e.batch);
            if let Some(b) = existing {
                self.store.roots.push(b);
                if self.store.get(b).has_merges & MERGE_ORIGIN != 0 {
                    self.find_merged_faces(idx, o, size, csi, csi);
                }
            } else {
                if let Some(base) = self.oct.cube(idx).children {
                    count += self.update_batches(base, o, size / 2, csi - 1)?;
                } else if !self.oct.cube(idx).is_empty() {
                    count += self.set_cube_visibility(idx, o, size);
                }
                let pending = if csi >= 0 && csi as usize <= MAX_MERGE_LEVEL {
                    self.merges[csi as usize].len()
                } else {
                    0
                };
                let tcount = count + pending;
                if tcount > self.cfg.face_max
                    || (tcount >= self.cfg.face_min && size >= self.cfg.min_batch_size)
                    || size == top
                {
                    self.seal_batch(idx, o, size, csi)?;
                    if let Some(vid) = self.oct.cube(idx).ext.as_ref().and_then(|e| e.batch) {
                        while self.store.roots.len() > childpos {
                            let child = self.store.roots.pop().unwrap();
                            self.store.get_mut(child).parent = Some(vid);
                            self.store.get_mut(vid).children.push(child);
                        }
                        self.store.roots.push(vid);
                        // Merges reaching past this subtree must stay visible
                        // to the parent so a later rebuild can recollect them.
                        if self.merge_max >= 0 && (1i64 << self.merge_max) > size as i64 {
                            cmerge_max = cmerge_max.max(self.merge_max);
                            chas_merges |= self.has_merges & !MERGE_USE;
                        }
                        continue;
                    } else {
                        count = 0;
                    }
                }
            }
            if csi >= 0 && (csi as usize) < MAX_MERGE_LEVEL && !self.merges[csi as usize].is_empty()
            {
                let bubbled = std::mem::take(&mut self.merges[csi as usize]);
                self.merges[csi as usize + 1].extend(bubbled);
            }
            cmerge_max = cmerge_max.max(self.merge_max);
            chas_merges |= self.has_merges;
            ccount += count;
        }
        self.merge_max = cmerge_max;
        self.has_merges = chas_merges;
        Ok(ccount)
    }
}

/// Coarsest power-of-two cell level (log2) whose aligned cell still contains
/// the merged polygon, starting from the face's own cube size.
fn calc_merged_size(co: IVec3, size: i32, verts: &[VertInfo]) -> i32 {
    let mut min = verts[0].xyz();
    let mut max = min;
    for v in &verts[1..] {
        let p = v.xyz();
        min = min.min(p);
        max = max.max(p);
    }
    let mut bits = 0;
    while 1 << bits < size {
        bits += 1;
    }
    bits += 3;
    let mut mo = co.mask(0xFFF).shl(3);
    while bits < 15 {
        mo = mo.mask(!((1 << bits) - 1));
        let span = 1 << bits;
        if mo.x <= min.x
            && mo.x + span >= max.x
            && mo.y <= min.y
            && mo.y + span >= max.y
            && mo.z <= min.z
            && mo.z + span >= max.z
        {
            break;
        }
        bits += 1;
    }
    bits - 3
}

/// Folds material-surface extents into the batch's per-class boxes.
fn accumulate_mat_bounds(b: &mut Batch) {
    for i in 0..b.mat_surfs.len() {
        let s = b.mat_surfs[i];
        let (min, max) = s.bounds();
        match s.material {
            mat::WATER => {
                b.water_min = b.water_min.min(min);
                b.water_max = b.water_max.max(max);
            }
            mat::LAVA => {
                b.lava_min = b.lava_min.min(min);
                b.lava_max = b.lava_max.max(max);
            }
            mat::GLASS => {
                b.glass_min = b.glass_min.min(min);
                b.glass_max = b.glass_max.max(max);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_size_levels() {
        // A 64-unit face fully inside its own 64-cell stays at level 6.
        let verts = [
            VertInfo { x: 0, y: 0, z: 512, norm: 0 },
            VertInfo { x: 512, y: 0, z: 512, norm: 0 },
            VertInfo { x: 512, y: 512, z: 512, norm: 0 },
            VertInfo { x: 0, y: 512, z: 512, norm: 0 },
        ];
        assert_eq!(calc_merged_size(IVec3::new(0, 0, 0), 64, &verts), 6);
        // A 128-unit-wide polygon on a 64 cube needs the 128 cell.
        let verts = [
            VertInfo { x: 0, y: 0, z: 512, norm: 0 },
            VertInfo { x: 1024, y: 0, z: 512, norm: 0 },
            VertInfo { x: 1024, y: 512, z: 512, norm: 0 },
            VertInfo { x: 0, y: 512, z: 512, norm: 0 },
        ];
        assert_eq!(calc_merged_size(IVec3::new(0, 0, 0), 64, &verts), 7);
    }
}

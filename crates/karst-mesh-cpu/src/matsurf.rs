//! Material surface records (water/lava/glass sheets) and their compaction.

use karst_geom::IVec3;
use karst_octree::{Octree, dim_coord, dimension, face_delta, mat, other_axes};

/// One axis-aligned material surface rectangle. `rsize`/`csize` span the two
/// axes perpendicular to `orient` (row axis first per [`other_axes`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatSurface {
    pub material: u16,
    pub orient: u8,
    pub o: IVec3,
    pub rsize: u16,
    pub csize: u16,
}

impl MatSurface {
    /// World-space extent of the rectangle (flat along its orientation axis).
    pub fn bounds(&self) -> (IVec3, IVec3) {
        let dim = dimension(self.orient as usize);
        let (r, c) = other_axes(dim);
        let mut max = self.o;
        max = max.with_axis(r, self.o[r] + self.rsize as i32);
        max = max.with_axis(c, self.o[c] + self.csize as i32);
        (self.o, max)
    }
}

/// Emits surface rectangles for a non-air leaf cube's material volume: one per
/// face bordering a cell of a different material that is not solid geometry.
pub fn gen_mat_surfs(oct: &Octree, idx: u32, o: IVec3, size: i32, out: &mut Vec<MatSurface>) {
    let c = oct.cube(idx);
    let volume = mat::volume(c.material);
    if volume == mat::AIR {
        return;
    }
    for orient in 0..6usize {
        let no = o + face_delta(orient).mul(size);
        let ws = oct.world_size();
        if no.x < 0 || no.y < 0 || no.z < 0 || no.x >= ws || no.y >= ws || no.z >= ws {
            continue;
        }
        let mut visible = true;
        if let Some((nidx, ..)) = oct.cube_at(no, size) {
            let nb = oct.cube(nidx);
            visible = !nb.solid && mat::volume(nb.material) != volume;
        }
        if !visible {
            continue;
        }
        let dim = dimension(orient);
        let plane = if dim_coord(orient) != 0 {
            o[dim] + size
        } else {
            o[dim]
        };
        out.push(MatSurface {
            material: volume,
            orient: orient as u8,
            o: o.with_axis(dim, plane),
            rsize: size as u16,
            csize: size as u16,
        });
    }
}

/// Merges adjacent coplanar rectangles of the same material, first along the
/// row axis, then along the column axis.
pub fn optimize_mat_surfs(surfs: &mut Vec<MatSurface>) {
    merge_axis(surfs, true);
    merge_axis(surfs, false);
}

fn merge_axis(surfs: &mut Vec<MatSurface>, along_r: bool) {
    if surfs.len() < 2 {
        return;
    }
    surfs.sort_by(|a, b| {
        let da = dimension(a.orient as usize);
        let (ra, ca) = other_axes(da);
        let db = dimension(b.orient as usize);
        let (rb, cb) = other_axes(db);
        (a.material, a.orient, a.o[da], if along_r { a.o[ca] } else { a.o[ra] }, if along_r { a.o[ra] } else { a.o[ca] })
            .cmp(&(b.material, b.orient, b.o[db], if along_r { b.o[cb] } else { b.o[rb] }, if along_r { b.o[rb] } else { b.o[cb] }))
    });
    let mut merged: Vec<MatSurface> = Vec::with_capacity(surfs.len());
    for s in surfs.drain(..) {
        if let Some(last) = merged.last_mut() {
            let dim = dimension(s.orient as usize);
            let (r, c) = other_axes(dim);
            let same_plane = last.material == s.material
                && last.orient == s.orient
                && last.o[dim] == s.o[dim];
            if same_plane {
                if along_r
                    && last.o[c] == s.o[c]
                    && last.csize == s.csize
                    && last.o[r] + last.rsize as i32 == s.o[r]
                {
                    last.rsize += s.rsize;
                    continue;
                }
                if !along_r
                    && last.o[r] == s.o[r]
                    && last.rsize == s.rsize
                    && last.o[c] + last.csize as i32 == s.o[c]
                {
                    last.csize += s.csize;
                    continue;
                }
            }
        }
        merged.push(s);
    }
    *surfs = merged;
}

/// Draw-state mask over the materials present in a surface list.
pub fn mat_mask(surfs: &[MatSurface]) -> u32 {
    let mut mask = 0u32;
    for s in surfs {
        match s.material {
            mat::WATER | mat::LAVA | mat::GLASS => mask |= 1 << s.material,
            _ => {}
        }
    }
    mask
}

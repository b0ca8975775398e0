//! Sparse octree world storage and the read-only face queries the mesher consumes.
#![forbid(unsafe_code)]

use karst_geom::IVec3;

pub mod mat;

mod orient;
pub use orient::{
    O_BACK, O_BOTTOM, O_FRONT, O_LEFT, O_RIGHT, O_TOP, dim_coord, dimension, face_delta,
    face_verts, opposite,
};

/// Maximum vertex count of one face polygon; also the mask extracting the count
/// from [`SurfaceInfo::numverts`].
pub const MAXFACEVERTS: u8 = 15;

/// Surface layer bits stored in the high bits of [`SurfaceInfo::numverts`].
pub const LAYER_TOP: u8 = 1 << 5;
pub const LAYER_BOTTOM: u8 = 1 << 6;
pub const LAYER_DUP: u8 = 1 << 7;
pub const LAYER_BLEND: u8 = LAYER_TOP | LAYER_BOTTOM;

/// One explicit face vertex in 1/8-unit fixed point, relative to the cube's
/// 4096-aligned region origin, plus an encoded normal (0 = unset).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertInfo {
    pub x: u16,
    pub y: u16,
    pub z: u16,
    pub norm: u16,
}

impl VertInfo {
    #[inline]
    pub fn xyz(self) -> IVec3 {
        IVec3::new(self.x as i32, self.y as i32, self.z as i32)
    }
}

/// Per-face explicit surface record: a span into [`CubeExt::verts`] and a
/// vertex count with layer bits or'ed into the high bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct SurfaceInfo {
    pub verts: u16,
    pub numverts: u8,
}

impl SurfaceInfo {
    #[inline]
    pub fn vert_count(self) -> usize {
        (self.numverts & MAXFACEVERTS) as usize
    }

    #[inline]
    pub fn layer_bits(self) -> u8 {
        self.numverts & LAYER_BLEND
    }
}

/// Reference to a model entity grouped under a cube, with precomputed bounds.
#[derive(Clone, Copy, Debug)]
pub struct MapModel {
    pub id: u16,
    pub bb_min: IVec3,
    pub bb_max: IVec3,
}

/// Extension record allocated only for cubes that need it. The `batch` and
/// `tjoints` slots are opaque bookkeeping owned by the mesher; the octree
/// stores them so the mesher need not keep a side table, but never reads them.
/// (Keeping them opaque avoids a dependency from this crate onto the mesher.)
#[derive(Clone, Debug)]
pub struct CubeExt {
    pub batch: Option<u32>,
    pub tjoints: i32,
    pub surfaces: [SurfaceInfo; 6],
    pub verts: Vec<VertInfo>,
    pub map_models: Vec<MapModel>,
}

impl Default for CubeExt {
    fn default() -> Self {
        CubeExt {
            batch: None,
            tjoints: -1,
            surfaces: [SurfaceInfo::default(); 6],
            verts: Vec::new(),
            map_models: Vec::new(),
        }
    }
}

impl CubeExt {
    /// The explicit vertices of one face, empty when the face has none.
    #[inline]
    pub fn face_verts(&self, orient: usize) -> &[VertInfo] {
        let surf = self.surfaces[orient];
        let start = surf.verts as usize;
        &self.verts[start..start + surf.vert_count()]
    }
}

/// One octree cell: a leaf (solid or empty) or an internal node with 8 children.
#[derive(Clone, Debug, Default)]
pub struct Cube {
    /// Base index of this cube's 8 contiguous children, if subdivided.
    pub children: Option<u32>,
    pub solid: bool,
    pub textures: [u16; 6],
    pub material: u16,
    /// Faces whose geometry was promoted into a coarser merged polygon.
    pub merged: u8,
    /// Children whose merged geometry escaped to a coarser level (set by the mesher).
    pub escaped: u8,
    /// Visibility classification byte (set by the mesher).
    pub visible: u8,
    pub ext: Option<Box<CubeExt>>,
}

impl Cube {
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.solid && self.children.is_none()
    }
}

/// The world octree. `nodes[0..8]` are the eight root octants.
#[derive(Clone, Debug)]
pub struct Octree {
    nodes: Vec<Cube>,
    world_size: i32,
    /// Environment map id reported for faces whose slot wants a world envmap.
    pub default_envmap: u16,
}

impl Octree {
    /// Creates an empty world of the given power-of-two size (>= 2).
    pub fn new(world_size: i32) -> Self {
        debug_assert!(world_size >= 2 && world_size.count_ones() == 1);
        Octree {
            nodes: (0..8).map(|_| Cube::default()).collect(),
            world_size,
            default_envmap: 0,
        }
    }

    #[inline]
    pub fn world_size(&self) -> i32 {
        self.world_size
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn cube(&self, idx: u32) -> &Cube {
        &self.nodes[idx as usize]
    }

    #[inline]
    pub fn cube_mut(&mut self, idx: u32) -> &mut Cube {
        &mut self.nodes[idx as usize]
    }

    /// Allocates 8 empty children for `idx` if it has none, returning their base index.
    /// A solid leaf subdivides into 8 solid children.
    pub fn subdivide(&mut self, idx: u32) -> u32 {
        if let Some(base) = self.nodes[idx as usize].children {
            return base;
        }
        let base = self.nodes.len() as u32;
        let (solid, textures, material) = {
            let p = &self.nodes[idx as usize];
            (p.solid, p.textures, p.material)
        };
        for _ in 0..8 {
            self.nodes.push(Cube {
                children: None,
                solid,
                textures,
                material,
                ..Cube::default()
            });
        }
        self.nodes[idx as usize].children = Some(base);
        base
    }

    /// Ensures `idx` has an extension record and returns it.
    pub fn ensure_ext(&mut self, idx: u32) -> &mut CubeExt {
        self.nodes[idx as usize]
            .ext
            .get_or_insert_with(Box::default)
    }

    /// Finds the cube containing point `p`, descending no deeper than `min_size`.
    /// Returns `(index, origin, size)`; `None` when `p` lies outside the world.
    pub fn cube_at(&self, p: IVec3, min_size: i32) -> Option<(u32, IVec3, i32)> {
        let ws = self.world_size;
        if p.x < 0 || p.y < 0 || p.z < 0 || p.x >= ws || p.y >= ws || p.z >= ws {
            return None;
        }
        let mut size = ws >> 1;
        let mut o = IVec3::ZERO;
        let mut i = octant_index(p, o, size);
        let mut idx = i as u32;
        o = IVec3::child_origin(i, o, size);
        loop {
            let c = &self.nodes[idx as usize];
            if size <= min_size {
                return Some((idx, o, size));
            }
            match c.children {
                None => return Some((idx, o, size)),
                Some(base) => {
                    size >>= 1;
                    i = octant_index(p, o, size);
                    idx = base + i as u32;
                    o = IVec3::child_origin(i, o, size);
                }
            }
        }
    }

    /// Stores an explicit surface polygon on one face. `layer_bits` is any
    /// combination of the `LAYER_*` constants; `merged` marks the face as
    /// promoted coarse geometry shared with siblings.
    pub fn set_face_surface(
        &mut self,
        idx: u32,
        orient: usize,
        verts: &[VertInfo],
        layer_bits: u8,
        merged: bool,
    ) {
        debug_assert!(verts.len() <= MAXFACEVERTS as usize);
        // Non-empty surfaces carry at least the top layer unless told otherwise.
        let layer_bits = if !verts.is_empty() && layer_bits & LAYER_BLEND == 0 {
            layer_bits | LAYER_TOP
        } else {
            layer_bits
        };
        let ext = self.ensure_ext(idx);
        let start = ext.verts.len() as u16;
        ext.verts.extend_from_slice(verts);
        ext.surfaces[orient] = SurfaceInfo {
            verts: start,
            numverts: verts.len() as u8 | layer_bits,
        };
        if merged {
            self.nodes[idx as usize].merged |= 1 << orient;
        }
    }

    // ---- face queries consumed by the mesher ----

    /// Classifies one face: bit 0 = render-visible, bit 1 = collidable.
    pub fn classify_face(&self, idx: u32, orient: usize, o: IVec3, size: i32) -> u8 {
        let c = &self.nodes[idx as usize];
        if !c.solid {
            return 0;
        }
        let here_alpha = c.material & mat::ALPHA != 0;
        let dim = dimension(orient);
        let mut no = o;
        no = no.with_axis(
            dim,
            if dim_coord(orient) != 0 {
                o[dim] + size
            } else {
                o[dim] - size
            },
        );
        if self.face_occluded(no, size, orient, here_alpha) {
            0
        } else {
            3
        }
    }

    /// Triangle visibility mask for one face: bits 0/1 select the two fan
    /// triangles, 0 when the whole face is hidden.
    pub fn visible_tris(&self, idx: u32, orient: usize, o: IVec3, size: i32) -> u8 {
        if self.classify_face(idx, orient, o, size) & 1 != 0 {
            3
        } else {
            0
        }
    }

    /// Whether the neighbor region `(no, size)` fully covers a face looking at it
    /// along `orient`. Checks the layer of neighbor cells touching the shared plane.
    fn face_occluded(&self, no: IVec3, size: i32, orient: usize, here_alpha: bool) -> bool {
        let ws = self.world_size;
        if no.x < 0 || no.y < 0 || no.z < 0 || no.x >= ws || no.y >= ws || no.z >= ws {
            // Nothing outside the world ever sees a face.
            return true;
        }
        let dim = dimension(orient);
        // Probe coordinate just inside the neighbor, adjacent to the shared plane.
        let probe = if dim_coord(orient) != 0 {
            no[dim]
        } else {
            no[dim] + size - 1
        };
        let (r, c) = other_axes(dim);
        self.layer_occluded(probe, dim, r, c, no[r], no[c], size, here_alpha)
    }

    #[allow(clippy::too_many_arguments)]
    fn layer_occluded(
        &self,
        probe: i32,
        dim: usize,
        r: usize,
        c: usize,
        at_r: i32,
        at_c: i32,
        size: i32,
        here_alpha: bool,
    ) -> bool {
        let p = IVec3::ZERO
            .with_axis(dim, probe)
            .with_axis(r, at_r)
            .with_axis(c, at_c);
        let Some((idx, _o, csize)) = self.cube_at(p, size) else {
            return false;
        };
        let cube = &self.nodes[idx as usize];
        if csize > size || cube.children.is_none() {
            return Self::occludes(cube, here_alpha);
        }
        // Subdivided at exactly this size: all four plane-touching quadrants must occlude.
        let half = size >> 1;
        for i in 0..4 {
            let qr = at_r + if i & 1 != 0 { half } else { 0 };
            let qc = at_c + if i & 2 != 0 { half } else { 0 };
            if !self.layer_occluded(probe, dim, r, c, qr, qc, half, here_alpha) {
                return false;
            }
        }
        true
    }

    #[inline]
    fn occludes(c: &Cube, here_alpha: bool) -> bool {
        if !c.solid || c.children.is_some() {
            return false;
        }
        // Translucent neighbors never hide opaque faces behind them.
        !(c.material & mat::ALPHA != 0 && !here_alpha)
    }

    /// Environment map assigned to geometry in this region. Assignment proper is
    /// an external post-step; the mesher only needs a stable id for its sort keys.
    #[inline]
    pub fn closest_envmap(&self, _orient: usize, _o: IVec3, _size: i32) -> u16 {
        self.default_envmap
    }

    // ---- world construction helpers (tests and the demo driver) ----

    /// Fills the axis-aligned box `[min, max)` with solid cubes of granularity
    /// `grid`, assigning `textures` and `material`. Cells already finer than
    /// `grid` are filled at their existing granularity.
    pub fn fill_box(
        &mut self,
        min: IVec3,
        max: IVec3,
        grid: i32,
        textures: [u16; 6],
        material: u16,
    ) {
        debug_assert!(grid >= 1 && grid.count_ones() == 1);
        let size = self.world_size >> 1;
        for i in 0..8u32 {
            let o = IVec3::child_origin(i as usize, IVec3::ZERO, size);
            self.fill_rec(i, o, size, min, max, grid, Some(textures), material);
        }
    }

    /// Fills the box `[min, max)` with a non-solid material volume (water,
    /// lava, ...) at granularity `grid`.
    pub fn fill_material(&mut self, min: IVec3, max: IVec3, grid: i32, material: u16) {
        debug_assert!(grid >= 1 && grid.count_ones() == 1);
        let size = self.world_size >> 1;
        for i in 0..8u32 {
            let o = IVec3::child_origin(i as usize, IVec3::ZERO, size);
            self.fill_rec(i, o, size, min, max, grid, None, material);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_rec(
        &mut self,
        idx: u32,
        o: IVec3,
        size: i32,
        min: IVec3,
        max: IVec3,
        grid: i32,
        textures: Option<[u16; 6]>,
        material: u16,
    ) {
        let cmax = o + IVec3::splat(size);
        if min.x >= cmax.x || min.y >= cmax.y || min.z >= cmax.z {
            return;
        }
        if max.x <= o.x || max.y <= o.y || max.z <= o.z {
            return;
        }
        let inside = min.x <= o.x
            && min.y <= o.y
            && min.z <= o.z
            && max.x >= cmax.x
            && max.y >= cmax.y
            && max.z >= cmax.z;
        if inside || size <= grid {
            let c = self.cube_mut(idx);
            c.children = None;
            match textures {
                Some(t) => {
                    c.solid = true;
                    c.textures = t;
                }
                None => c.solid = false,
            }
            c.material = material;
            return;
        }
        let base = self.subdivide(idx);
        let half = size >> 1;
        for i in 0..8usize {
            let co = IVec3::child_origin(i, o, half);
            self.fill_rec(base + i as u32, co, half, min, max, grid, textures, material);
        }
    }
}

#[inline]
fn octant_index(p: IVec3, o: IVec3, size: i32) -> usize {
    let mut i = 0;
    if p.x >= o.x + size {
        i |= 1;
    }
    if p.y >= o.y + size {
        i |= 2;
    }
    if p.z >= o.z + size {
        i |= 4;
    }
    i
}

/// The two axes perpendicular to `dim`.
#[inline]
pub fn other_axes(dim: usize) -> (usize, usize) {
    match dim {
        0 => (1, 2),
        1 => (2, 0),
        _ => (0, 1),
    }
}

/// Convexity sign of a quad given its corners; 0 for planar faces, negative
/// when the opposite diagonal must split the quad.
pub fn face_convexity(v: &[IVec3; 4]) -> i32 {
    let e1 = v[1] - v[0];
    let e2 = v[2] - v[0];
    let e3 = v[3] - v[0];
    let n = e1.cross(e2);
    n.dot(e3).signum()
}

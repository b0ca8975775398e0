//! T-junction resolution: collect collinear edges, sweep for partial overlaps,
//! record ordered split points per face edge.
//!
//! Joints and edges live in arena vectors linked by indices so the whole pass
//! allocates nothing per node and resets in O(1).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use karst_geom::IVec3;
use karst_octree::{MAXFACEVERTS, Octree, face_verts, other_axes};

use crate::Progress;

/// Edge ids are `orient * EDGES_PER_FACE + vertex_index`.
pub const EDGES_PER_FACE: usize = MAXFACEVERTS as usize + 1;

/// One split point on a face edge, linked in offset order into the owning
/// cube's joint list.
#[derive(Clone, Copy, Debug)]
pub struct TJoint {
    pub next: i32,
    /// Parametric offset along the edge's canonical slope.
    pub offset: u16,
    pub edge: u8,
}

/// Arena of joints for one build; cubes store list heads as indices into this.
#[derive(Default)]
pub struct TJointArena {
    joints: Vec<TJoint>,
}

impl TJointArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.joints.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: i32) -> TJoint {
        self.joints[idx as usize]
    }

    #[inline]
    fn get_mut(&mut self, idx: i32) -> &mut TJoint {
        &mut self.joints[idx as usize]
    }

    #[inline]
    fn push(&mut self, tj: TJoint) -> i32 {
        self.joints.push(tj);
        (self.joints.len() - 1) as i32
    }
}

const CE_START: u8 = 1 << 0;
const CE_END: u8 = 1 << 1;
const CE_FLIP: u8 = 1 << 2;
const CE_DUP: u8 = 1 << 3;

/// One polygon edge's occupied interval along a shared line.
#[derive(Clone, Copy, Debug)]
struct CubeEdge {
    cube: u32,
    next: i32,
    offset: i32,
    size: u16,
    index: u8,
    flags: u8,
}

/// Edges sharing (slope, origin) are collinear regardless of cube size; the
/// dominant axis is a function of the slope, so equality and hashing ignore it.
#[derive(Clone, Copy, Debug)]
struct EdgeGroup {
    slope: IVec3,
    origin: IVec3,
    axis: usize,
}

impl PartialEq for EdgeGroup {
    fn eq(&self, other: &Self) -> bool {
        self.slope == other.slope && self.origin == other.origin
    }
}

impl Eq for EdgeGroup {}

impl Hash for EdgeGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slope.hash(state);
        self.origin.hash(state);
    }
}

/// Reduces an integer direction to lowest terms: divides out the smallest
/// nonzero component when it divides the others, then strips powers of two.
pub fn reduce_slope(n: &mut IVec3) {
    debug_assert!(!n.is_zero());
    let mut mindim: i32 = -1;
    let mut minval = 64;
    for i in 0..3 {
        if n[i] != 0 {
            let val = n[i].abs();
            if mindim < 0 || val < minval {
                mindim = i as i32;
                minval = val;
            }
        }
    }
    let (r, c) = other_axes(mindim as usize);
    if n[r] % minval == 0 && n[c] % minval == 0 {
        *n = n.div(minval);
    }
    while (n.x | n.y | n.z) & 1 == 0 {
        *n = n.shr(1);
    }
}

/// The axis with the largest absolute component.
#[inline]
pub fn dominant_axis(d: IVec3) -> usize {
    if d.x.abs() > d.y.abs() {
        if d.x.abs() > d.z.abs() { 0 } else { 2 }
    } else if d.y.abs() > d.z.abs() {
        1
    } else {
        2
    }
}

#[derive(Default)]
struct EdgeCollector {
    edges: Vec<CubeEdge>,
    groups: HashMap<EdgeGroup, i32>,
}

/// Runs the full two-phase pass: resets per-cube joint lists, collects every
/// visible face edge into collinear groups, then sweeps each group recording
/// joints where one edge's endpoint falls strictly inside another's interval.
pub fn find_tjoints(oct: &mut Octree, arena: &mut TJointArena, progress: &mut Progress) {
    arena.clear();
    let mut col = EdgeCollector::default();
    let size = oct.world_size() >> 1;
    for i in 0..8u32 {
        let o = IVec3::child_origin(i as usize, IVec3::ZERO, size);
        collect_cube(oct, &mut col, i, o, size, progress);
    }
    let groups = std::mem::take(&mut col.groups);
    for (g, head) in groups {
        sweep_group(oct, arena, &mut col.edges, &g, head);
    }
}

fn collect_cube(
    oct: &mut Octree,
    col: &mut EdgeCollector,
    idx: u32,
    o: IVec3,
    size: i32,
    progress: &mut Progress,
) {
    progress.tick("fixing t-joints...");
    if let Some(ext) = oct.cube_mut(idx).ext.as_deref_mut() {
        ext.tjoints = -1;
    }
    if let Some(base) = oct.cube(idx).children {
        let half = size >> 1;
        for i in 0..8usize {
            let co = IVec3::child_origin(i, o, half);
            collect_cube(oct, col, base + i as u32, co, half, progress);
        }
    } else if !oct.cube(idx).is_empty() {
        collect_faces(oct, col, idx, o, size);
    }
}

fn collect_faces(oct: &Octree, col: &mut EdgeCollector, idx: u32, o: IVec3, size: i32) {
    let mut pos = [IVec3::ZERO; MAXFACEVERTS as usize];
    for orient in 0..6usize {
        let vis = oct.visible_tris(idx, orient, o, size);
        if vis == 0 {
            continue;
        }
        let c = oct.cube(idx);
        let mut numverts = c
            .ext
            .as_ref()
            .map(|e| e.surfaces[orient].vert_count())
            .unwrap_or(0);
        if numverts != 0 {
            let ext = c.ext.as_ref().unwrap();
            let vo = o.mask(!0xFFF).shl(3);
            for (j, v) in ext.face_verts(orient).iter().enumerate() {
                pos[j] = v.xyz() + vo;
            }
        } else if c.merged & (1 << orient) != 0 {
            continue;
        } else {
            let v = face_verts(orient);
            let order = if vis & 4 != 0 { 1 } else { 0 };
            let vo = o.shl(3);
            pos[numverts] = v[order].mul(size) + vo;
            numverts += 1;
            if vis & 1 != 0 {
                pos[numverts] = v[order + 1].mul(size) + vo;
                numverts += 1;
            }
            pos[numverts] = v[order + 2].mul(size) + vo;
            numverts += 1;
            if vis & 2 != 0 {
                pos[numverts] = v[(order + 3) & 3].mul(size) + vo;
                numverts += 1;
            }
        }
        for j in 0..numverts {
            let mut e1 = j;
            let mut e2 = if j + 1 < numverts { j + 1 } else { 0 };
            let mut d = pos[e2] - pos[e1];
            if d.is_zero() {
                continue;
            }
            let axis = dominant_axis(d);
            if d[axis] < 0 {
                d = d.neg();
                std::mem::swap(&mut e1, &mut e2);
            }
            reduce_slope(&mut d);
            let t1 = pos[e1][axis] / d[axis];
            let t2 = pos[e2][axis] / d[axis];
            let group = EdgeGroup {
                origin: pos[e1] - d.mul(t1),
                slope: d,
                axis,
            };
            let ce = CubeEdge {
                cube: idx,
                next: -1,
                offset: t1,
                size: (t2 - t1) as u16,
                index: (orient * EDGES_PER_FACE + j) as u8,
                flags: CE_START | CE_END | if e1 != j { CE_FLIP } else { 0 },
            };
            insert_edge(col, group, ce);
        }
    }
}

/// Inserts an edge into its group's offset-sorted list, detecting intervals
/// that exactly duplicate (or nest inside an already-duplicated) edge, e.g. a
/// seam visible from both sides.
fn insert_edge(col: &mut EdgeCollector, group: EdgeGroup, mut ce: CubeEdge) {
    use std::collections::hash_map::Entry;
    let new_idx = col.edges.len() as i32;
    match col.groups.entry(group) {
        Entry::Vacant(slot) => {
            slot.insert(new_idx);
            col.edges.push(ce);
        }
        Entry::Occupied(slot) => {
            let head = slot.into_mut();
            let mut insert = true;
            let mut prev = -1i32;
            let mut cur = *head;
            while cur >= 0 {
                let p = col.edges[cur as usize];
                let duplicates = if p.flags & CE_DUP != 0 {
                    ce.offset >= p.offset
                        && ce.offset + ce.size as i32 <= p.offset + p.size as i32
                } else {
                    ce.offset == p.offset && ce.size == p.size
                };
                if duplicates {
                    col.edges[cur as usize].flags |= CE_DUP;
                    insert = false;
                    break;
                } else if ce.offset >= p.offset {
                    if ce.offset == p.offset + p.size as i32 {
                        ce.flags &= !CE_START;
                    }
                    prev = cur;
                    cur = p.next;
                } else {
                    break;
                }
            }
            if insert {
                ce.next = cur;
                let mut scan = cur;
                while scan >= 0 {
                    let p = col.edges[scan as usize];
                    if ce.offset + ce.size as i32 == p.offset {
                        ce.flags &= !CE_END;
                        break;
                    }
                    scan = p.next;
                }
                if prev >= 0 {
                    col.edges[prev as usize].next = new_idx;
                } else {
                    *head = new_idx;
                }
                col.edges.push(ce);
            }
        }
    }
}

/// Interval sweep over one collinear group: maintains the set of edges still
/// overlapping the current offset and records a joint whenever a non-duplicate
/// pair has an endpoint strictly inside the other's interval.
fn sweep_group(
    oct: &mut Octree,
    arena: &mut TJointArena,
    edges: &mut [CubeEdge],
    g: &EdgeGroup,
    mut cur: i32,
) {
    let mut active: i32 = -1;
    while cur >= 0 {
        let e = edges[cur as usize];
        let mut prevactive = -1i32;
        let mut curactive = active;
        while curactive >= 0 {
            let a = edges[curactive as usize];
            if a.offset + a.size as i32 <= e.offset {
                // Expired: drop from the active list.
                if prevactive >= 0 {
                    edges[prevactive as usize].next = a.next;
                } else {
                    active = a.next;
                }
            } else {
                prevactive = curactive;
                if a.flags & CE_DUP == 0 {
                    if e.flags & CE_START != 0
                        && e.offset > a.offset
                        && e.offset < a.offset + a.size as i32
                    {
                        add_tjoint(oct, arena, g, &a, e.offset);
                    }
                    let e_end = e.offset + e.size as i32;
                    if e.flags & CE_END != 0 && e_end > a.offset && e_end < a.offset + a.size as i32
                    {
                        add_tjoint(oct, arena, g, &a, e_end);
                    }
                }
                if e.flags & CE_DUP == 0 {
                    if a.flags & CE_START != 0
                        && a.offset > e.offset
                        && a.offset < e.offset + e.size as i32
                    {
                        add_tjoint(oct, arena, g, &e, a.offset);
                    }
                    let a_end = a.offset + a.size as i32;
                    if a.flags & CE_END != 0 && a_end > e.offset && a_end < e.offset + e.size as i32
                    {
                        add_tjoint(oct, arena, g, &e, a_end);
                    }
                }
            }
            curactive = a.next;
        }
        let next = edges[cur as usize].next;
        edges[cur as usize].next = active;
        active = cur;
        cur = next;
    }
}

/// Records one joint on `e` at parametric `offset`, inserted into the owning
/// cube's list ordered by (edge, offset), offset descending for flipped edges
/// so consumption always walks in the face's own vertex order.
fn add_tjoint(oct: &mut Octree, arena: &mut TJointArena, g: &EdgeGroup, e: &CubeEdge, offset: i32) {
    let vcoord = (g.slope[g.axis] * offset + g.origin[g.axis]) & 0x7FFF;
    let mut tj = TJoint {
        next: -1,
        offset: (vcoord / g.slope[g.axis]) as u16,
        edge: e.index,
    };
    let flipped = e.flags & CE_FLIP != 0;
    let ext = oct.ensure_ext(e.cube);
    let mut prev = -1i32;
    let mut cur = ext.tjoints;
    while cur >= 0 {
        let o = arena.get(cur);
        if tj.edge < o.edge
            || (tj.edge == o.edge
                && if flipped {
                    tj.offset > o.offset
                } else {
                    tj.offset < o.offset
                })
        {
            break;
        }
        prev = cur;
        cur = o.next;
    }
    tj.next = cur;
    let idx = arena.push(tj);
    if prev < 0 {
        ext.tjoints = idx;
    } else {
        arena.get_mut(prev).next = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_slope_strips_common_factors() {
        let mut n = IVec3::new(6, 12, 18);
        reduce_slope(&mut n);
        assert_eq!(n, IVec3::new(1, 2, 3));

        let mut n = IVec3::new(8, 0, 0);
        reduce_slope(&mut n);
        assert_eq!(n, IVec3::new(1, 0, 0));

        // Smallest component does not divide the others: only powers of two strip.
        let mut n = IVec3::new(3, 4, 0);
        reduce_slope(&mut n);
        assert_eq!(n, IVec3::new(3, 4, 0));

        let mut n = IVec3::new(6, 8, 0);
        reduce_slope(&mut n);
        assert_eq!(n, IVec3::new(3, 4, 0));
    }

    #[test]
    fn dominant_axis_picks_largest_component() {
        assert_eq!(dominant_axis(IVec3::new(-9, 4, 4)), 0);
        assert_eq!(dominant_axis(IVec3::new(1, -5, 4)), 1);
        assert_eq!(dominant_axis(IVec3::new(1, 2, 2)), 2);
    }
}

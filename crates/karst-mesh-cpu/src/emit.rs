//! Face emission: texcoords, normals/tangents, triangulation with T-joint
//! vertex insertion, bucket classification and grass overlays.

use karst_geom::{Plane, Vec2, Vec3};
use karst_octree::{LAYER_BLEND, LAYER_BOTTOM, LAYER_TOP, MAXFACEVERTS, VertInfo};
use karst_slots::{DEFAULT_SKY, SlotRegistry, VSlot};

use crate::session::{BatchCollector, GrassTri};
use crate::sortkey::{ALPHA_BACK, ALPHA_FRONT, ALPHA_NONE, ALPHA_REFRACT, ORIENT_MERGED, SortKey};
use crate::texgen::{ORIENT_BITANGENT, ORIENT_TANGENT, TexGen};
use crate::tjoint::{EDGES_PER_FACE, TJointArena, dominant_axis, reduce_slope};
use crate::vertex::{ByteDir, Vertex, decode_normal};

const MAX_FV: usize = MAXFACEVERTS as usize;
const IDX_LIMIT: usize = u16::MAX as usize;

/// Per-vertex normals for a polygon without explicit normal data: cross-product
/// averaging over the quad's two triangles, with degenerate-triangle fallbacks.
pub(crate) fn guess_normals(pos: &[Vec3], normals: &mut [Vec3]) {
    let numverts = pos.len();
    let n1 = (pos[1] - pos[0]).cross(pos[2] - pos[0]);
    if numverts != 4 {
        let n1 = n1.normalized();
        for n in normals.iter_mut().take(numverts) {
            *n = n1;
        }
        return;
    }
    let n2 = (pos[2] - pos[0]).cross(pos[3] - pos[0]);
    if n1.is_zero() {
        let n2 = n2.normalized();
        for n in normals.iter_mut().take(4) {
            *n = n2;
        }
        return;
    }
    let n1 = n1.normalized();
    if n2.is_zero() {
        for n in normals.iter_mut().take(4) {
            *n = n1;
        }
        return;
    }
    let n2 = n2.normalized();
    let avg = (n1 + n2).normalized();
    normals[0] = avg;
    normals[1] = n1;
    normals[2] = avg;
    normals[3] = n2;
}

/// Emits one face polygon: deduplicates corner vertices, fan-triangulates with
/// T-joint vertices spliced into any split edge, classifies the triangles into
/// their sort bucket and optionally adds grass overlay geometry.
#[allow(clippy::too_many_arguments)]
pub(crate) fn add_cube_verts(
    vc: &mut BatchCollector,
    arena: &TJointArena,
    slots: &SlotRegistry,
    vslot: &VSlot,
    orient: usize,
    pos: &[Vec3],
    texture: u16,
    vinfo: Option<&[VertInfo]>,
    tj: i32,
    envmap: u16,
    grassy: i32,
    alpha: bool,
    layer: u8,
) {
    let numverts = pos.len();
    debug_assert!((3..=MAX_FV).contains(&numverts));
    let texgen = TexGen::new(slots, vslot, orient);
    let rot = vslot.rotation as usize;
    let dummy = Vertex {
        pos: Vec3::ZERO,
        tc: Vec2::ZERO,
        norm: ByteDir::UNSET,
        tangent: ByteDir::UNSET,
        bitangent: 128,
    };
    let mut verts = [dummy; MAX_FV];
    let mut index = [-1i32; MAX_FV];
    let mut normals = [Vec3::ZERO; MAX_FV];
    let mut guessed = false;
    for k in 0..numverts {
        let vpos = pos[k];
        let tc = texgen.apply(vpos);
        let explicit_norm = vinfo.map(|vi| vi[k].norm).unwrap_or(0);
        let v = if explicit_norm != 0 {
            let n = decode_normal(explicit_norm);
            let t = ORIENT_TANGENT[rot][orient].project_onto_plane(n).normalized();
            Vertex {
                pos: vpos,
                tc,
                norm: ByteDir::from_dir(n),
                tangent: ByteDir::from_dir(t),
                bitangent: bitangent_sign(rot, orient, n, t),
            }
        } else if texture != DEFAULT_SKY {
            if !guessed {
                guess_normals(pos, &mut normals);
                guessed = true;
            }
            let n = normals[k];
            let t = ORIENT_TANGENT[rot][orient].project_onto_plane(n).normalized();
            Vertex {
                pos: vpos,
                tc,
                norm: ByteDir::from_dir(n),
                tangent: ByteDir::from_dir(t),
                bitangent: bitangent_sign(rot, orient, n, t),
            }
        } else {
            Vertex {
                pos: vpos,
                tc,
                norm: ByteDir::UP,
                tangent: ByteDir::RIGHT,
                bitangent: 255,
            }
        };
        verts[k] = v;
        match vc.add_vert(v) {
            Some(i) => index[k] = i as i32,
            None => {
                log::debug!("batch unit vertex limit reached, dropping face geometry");
                return;
            }
        }
    }

    if alpha {
        for &p in &pos[..numverts] {
            vc.alpha_min = vc.alpha_min.min(p);
            vc.alpha_max = vc.alpha_max.max(p);
        }
        if vslot.refract_scale > 0.0 {
            for &p in &pos[..numverts] {
                vc.refract_min = vc.refract_min.min(p);
                vc.refract_max = vc.refract_max.max(p);
            }
        }
    }

    let alpha_class = if alpha {
        if vslot.refract_scale > 0.0 {
            ALPHA_REFRACT
        } else if vslot.alpha_back > 0.0 {
            ALPHA_BACK
        } else {
            ALPHA_FRONT
        }
    } else {
        ALPHA_NONE
    };
    let key = SortKey::new(
        texture,
        if vslot.scroll.is_zero() {
            ORIENT_MERGED
        } else {
            orient as u8
        },
        if layer & LAYER_BOTTOM != 0 { layer } else { LAYER_TOP },
        envmap,
        alpha_class,
    );
    add_tris(vc, arena, vslot, orient, key, &verts, &index, numverts, tj);

    if grassy > 0 {
        let mut i = 0;
        while i + 2 < numverts {
            let mut faces = 0;
            if index[0] != index[i + 1] && index[i + 1] != index[i + 2] && index[i + 2] != index[0]
            {
                faces |= 1;
            }
            if i + 3 < numverts
                && index[0] != index[i + 2]
                && index[i + 2] != index[i + 3]
                && index[i + 3] != index[0]
            {
                faces |= 2;
            }
            if grassy > 1 && faces == 3 {
                add_grass_tri(vc, i, &verts, 4, texture, layer);
            } else {
                if faces & 1 != 0 {
                    add_grass_tri(vc, i, &verts, 3, texture, layer);
                }
                if faces & 2 != 0 {
                    add_grass_tri(vc, i + 1, &verts, 3, texture, layer);
                }
            }
            i += 2;
        }
    }
}

#[inline]
fn bitangent_sign(rot: usize, orient: usize, n: Vec3, t: Vec3) -> u8 {
    if ORIENT_BITANGENT[rot][orient].scalar_triple(n, t) < 0.0 {
        0
    } else {
        255
    }
}

/// Fan-triangulates one polygon into its bucket, splicing interpolated T-joint
/// vertices into every logical edge that carries joints (including the closing
/// edge back to the fan pivot). Degenerate triangles are skipped; additions
/// stop silently once the unit's 16-bit index space is exhausted.
#[allow(clippy::too_many_arguments)]
fn add_tris(
    vc: &mut BatchCollector,
    arena: &TJointArena,
    vslot: &VSlot,
    orient: usize,
    key: SortKey,
    verts: &[Vertex; MAX_FV],
    index: &[i32; MAX_FV],
    numverts: usize,
    tj: i32,
) {
    let sky = key.tex == DEFAULT_SKY;
    let mut total = if sky { vc.sky_tris } else { vc.world_tris };
    let mut out: Vec<u16> = Vec::new();
    let edge_base = orient * EDGES_PER_FACE;

    'tris: for i in 0..numverts - 2 {
        if !(index[0] != index[i + 1] && index[i + 1] != index[i + 2] && index[i + 2] != index[0])
        {
            continue;
        }
        let left = index[0];
        let mid = index[i + 1];
        let right = index[i + 2];
        let mut start = left;
        let mut i0 = left;
        let mut i1: i32 = -1;
        for k in 0..4 {
            let mut i2: i32 = -1;
            let mut cedge: i32 = -1;
            match k {
                1 => {
                    i1 = mid;
                    i2 = mid;
                    cedge = (edge_base + i + 1) as i32;
                }
                2 => {
                    if i1 != mid || i0 == left {
                        i0 = i1;
                        i1 = right;
                    }
                    i2 = right;
                    if i + 1 == numverts - 2 {
                        cedge = (edge_base + i + 2) as i32;
                    }
                }
                _ => {
                    if k == 3 {
                        if i0 == start {
                            i0 = i1;
                            i1 = left;
                        }
                        i2 = left;
                    }
                    if i == 0 {
                        cedge = edge_base as i32;
                    }
                }
            }
            if i1 != i2 {
                if total + 3 > IDX_LIMIT {
                    break 'tris;
                }
                total += 3;
                out.push(i0 as u16);
                out.push(i1 as u16);
                out.push(i2 as u16);
                i1 = i2;
            }
            let mut ctj: i32 = -1;
            if cedge >= 0 {
                let mut c = tj;
                while c >= 0 {
                    let t = arena.get(c);
                    if (t.edge as i32) < cedge {
                        c = t.next;
                        continue;
                    }
                    if t.edge as i32 != cedge {
                        c = -1;
                    }
                    break;
                }
                ctj = c;
            }
            if ctj >= 0 {
                let e1 = (cedge as usize) % EDGES_PER_FACE;
                let e2 = (e1 + 1) % numverts;
                let v1 = verts[e1];
                let v2 = verts[e2];
                // Recover the edge's canonical integer line to place joints
                // bit-exactly where the adjoining faces put their corners.
                let mut d = karst_geom::IVec3::from((v2.pos - v1.pos) * 8.0);
                let axis = dominant_axis(d);
                if d[axis] < 0 {
                    d = d.neg();
                }
                reduce_slope(&mut d);
                let origin = ((v1.pos[axis].min(v2.pos[axis]) * 8.0) as i32) & !0x7FFF;
                let offset1 = ((v1.pos[axis] * 8.0) as i32 - origin) / d[axis];
                let offset2 = ((v2.pos[axis] * 8.0) as i32 - origin) / d[axis];
                let o = v1.pos - Vec3::from(d) * (offset1 as f32 / 8.0);
                let doffset = 1.0 / (offset2 - offset1) as f32;

                let mut c = ctj;
                if i1 < 0 {
                    // No triangle yet: pivot the fan at the joint nearest the
                    // edge's far end.
                    loop {
                        let t = arena.get(c);
                        if t.next < 0 || arena.get(t.next).edge as i32 != cedge {
                            break;
                        }
                        c = t.next;
                    }
                }
                while c >= 0 {
                    let t = arena.get(c);
                    if t.edge as i32 != cedge {
                        break;
                    }
                    let frac = (t.offset as f32 - offset1 as f32) * doffset;
                    let norm = ByteDir::lerp(v1.norm, v2.norm, frac);
                    let tangent = ByteDir::lerp(v1.tangent, v2.tangent, frac);
                    let bitangent = if v1.bitangent == v2.bitangent {
                        v1.bitangent
                    } else {
                        bitangent_sign(
                            vslot.rotation as usize,
                            orient,
                            norm.to_dir(),
                            tangent.to_dir(),
                        )
                    };
                    let vt = Vertex {
                        pos: Vec3::from(d) * (t.offset as f32 / 8.0) + o,
                        tc: Vec2::lerp(v1.tc, v2.tc, frac),
                        norm,
                        tangent,
                        bitangent,
                    };
                    let Some(iv) = vc.add_vert(vt) else {
                        log::debug!("batch unit vertex limit reached during edge split");
                        break 'tris;
                    };
                    let iv = iv as i32;
                    if i1 >= 0 {
                        if total + 3 > IDX_LIMIT {
                            break 'tris;
                        }
                        total += 3;
                        out.push(i0 as u16);
                        out.push(i1 as u16);
                        out.push(iv as u16);
                        i1 = iv;
                    } else {
                        start = iv;
                        i0 = iv;
                    }
                    c = t.next;
                }
            }
        }
    }

    if sky {
        vc.sky_tris = total;
        vc.sky_indices.extend_from_slice(&out);
    } else {
        vc.world_tris = total;
        if !out.is_empty() {
            vc.indices.entry(key).or_default().extend_from_slice(&out);
        }
    }
}

/// Builds one grass overlay record over a triangulated quad-half, rejecting
/// downward or degenerate surfaces.
fn add_grass_tri(
    vc: &mut BatchCollector,
    face: usize,
    verts: &[Vertex; MAX_FV],
    numv: usize,
    texture: u16,
    layer: u8,
) {
    let (i1, i2, i3, i4);
    if numv <= 3 && face % 2 == 1 {
        i1 = face + 1;
        i2 = face + 2;
        i3 = 0;
        i4 = 0;
    } else {
        i1 = 0;
        i2 = face + 1;
        i3 = face + 2;
        i4 = if numv > 3 { face + 3 } else { i3 };
    }
    let v = [
        verts[i1].pos,
        verts[i2].pos,
        verts[i3].pos,
        verts[i4].pos,
    ];
    let surface = Plane::from_points(v[0], v[1], v[2]);
    if surface.n.z <= 0.0 {
        return;
    }
    let min_z = v[0].z.min(v[1].z).min(v[2].z.min(v[3].z));
    let max_z = v[0].z.max(v[1].z).max(v[2].z.max(v[3].z));
    let mut center = Vec3::ZERO;
    for p in v.iter().take(numv) {
        center += *p;
    }
    center = center / numv as f32;
    let mut radius = 0.0f32;
    for p in v.iter().take(numv) {
        radius = radius.max(p.dist(center));
    }
    let blend = if layer == LAYER_BLEND {
        ((center.x as i32 >> 12) + 1) | (((center.y as i32 >> 12) + 1) << 8)
    } else {
        0
    };
    vc.grass_tris.push(GrassTri {
        v,
        numv: numv as u8,
        surface,
        min_z,
        max_z,
        center,
        radius,
        texture,
        blend,
    });
}

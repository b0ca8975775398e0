//! Face orientation indices and canonical corner tables (z-up).

use karst_geom::IVec3;

pub const O_LEFT: usize = 0;
pub const O_RIGHT: usize = 1;
pub const O_BACK: usize = 2;
pub const O_FRONT: usize = 3;
pub const O_BOTTOM: usize = 4;
pub const O_TOP: usize = 5;

/// Axis a face orientation varies along.
#[inline]
pub fn dimension(orient: usize) -> usize {
    orient >> 1
}

/// 1 for positive-side faces, 0 for negative-side faces.
#[inline]
pub fn dim_coord(orient: usize) -> i32 {
    (orient & 1) as i32
}

#[inline]
pub fn opposite(orient: usize) -> usize {
    orient ^ 1
}

/// Unit outward step for a face orientation.
#[inline]
pub fn face_delta(orient: usize) -> IVec3 {
    match orient {
        O_LEFT => IVec3::new(-1, 0, 0),
        O_RIGHT => IVec3::new(1, 0, 0),
        O_BACK => IVec3::new(0, -1, 0),
        O_FRONT => IVec3::new(0, 1, 0),
        O_BOTTOM => IVec3::new(0, 0, -1),
        _ => IVec3::new(0, 0, 1),
    }
}

// Cube corners in 1/8-of-cube units.
const CUBE_COORDS: [IVec3; 8] = [
    IVec3::new(8, 8, 0),
    IVec3::new(0, 8, 0),
    IVec3::new(0, 8, 8),
    IVec3::new(8, 8, 8),
    IVec3::new(8, 0, 8),
    IVec3::new(0, 0, 8),
    IVec3::new(0, 0, 0),
    IVec3::new(8, 0, 0),
];

// Corner selection per face, wound outward.
const FACE_VERTS: [[usize; 4]; 6] = [
    [2, 1, 6, 5], // left
    [3, 4, 7, 0], // right
    [4, 5, 6, 7], // back
    [1, 2, 3, 0], // front
    [6, 1, 0, 7], // bottom
    [5, 4, 3, 2], // top
];

/// The four corners of a face in canonical order, in 1/8-of-cube units (0 or 8).
#[inline]
pub fn face_verts(orient: usize) -> [IVec3; 4] {
    let f = &FACE_VERTS[orient];
    [
        CUBE_COORDS[f[0]],
        CUBE_COORDS[f[1]],
        CUBE_COORDS[f[2]],
        CUBE_COORDS[f[3]],
    ]
}

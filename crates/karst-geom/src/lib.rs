//! Minimal geometry types for engine crates (float and fixed-point integer vectors).
#![forbid(unsafe_code)]

use core::ops::{Add, AddAssign, Div, Index, Mul, Sub, SubAssign};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// Linear interpolation between `a` and `b` at parameter `t`.
    #[inline]
    pub fn lerp(a: Vec2, b: Vec2, t: f32) -> Vec2 {
        Vec2 {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    /// World up axis (z-up convention).
    pub const UP: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(self, rhs: Vec3) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    #[inline]
    pub fn cross(self, rhs: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    #[inline]
    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len > 0.0 { self / len } else { self }
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    #[inline]
    pub fn dist(self, rhs: Vec3) -> f32 {
        (self - rhs).length()
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(self, rhs: Vec3) -> Vec3 {
        Vec3 {
            x: self.x.min(rhs.x),
            y: self.y.min(rhs.y),
            z: self.z.min(rhs.z),
        }
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(self, rhs: Vec3) -> Vec3 {
        Vec3 {
            x: self.x.max(rhs.x),
            y: self.y.max(rhs.y),
            z: self.z.max(rhs.z),
        }
    }

    /// Linear interpolation between `a` and `b` at parameter `t`.
    #[inline]
    pub fn lerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
        Vec3 {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
            z: a.z + (b.z - a.z) * t,
        }
    }

    /// Removes the component of `self` along `n` (projects onto the plane with normal `n`).
    #[inline]
    pub fn project_onto_plane(self, n: Vec3) -> Vec3 {
        self - n * self.dot(n)
    }

    /// Scalar triple product `self . (a x b)`.
    #[inline]
    pub fn scalar_triple(self, a: Vec3, b: Vec3) -> f32 {
        self.dot(a.cross(b))
    }
}

impl Index<usize> for Vec3 {
    type Output = f32;
    #[inline]
    fn index(&self, axis: usize) -> &f32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    #[inline]
    fn add_assign(&mut self, rhs: Vec3) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    #[inline]
    fn sub_assign(&mut self, rhs: Vec3) {
        self.x -= rhs.x;
        self.y -= rhs.y;
        self.z -= rhs.z;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn div(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl From<IVec3> for Vec3 {
    #[inline]
    fn from(v: IVec3) -> Vec3 {
        Vec3::new(v.x as f32, v.y as f32, v.z as f32)
    }
}

/// Integer vector used for fixed-point world coordinates and edge slopes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct IVec3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl IVec3 {
    pub const ZERO: IVec3 = IVec3 { x: 0, y: 0, z: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub const fn splat(v: i32) -> Self {
        Self { x: v, y: v, z: v }
    }

    /// Origin of the `i`-th child octant of the cube at `o` with child size `size`.
    #[inline]
    pub fn child_origin(i: usize, o: IVec3, size: i32) -> IVec3 {
        IVec3 {
            x: o.x + if i & 1 != 0 { size } else { 0 },
            y: o.y + if i & 2 != 0 { size } else { 0 },
            z: o.z + if i & 4 != 0 { size } else { 0 },
        }
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0 && self.z == 0
    }

    #[inline]
    pub fn neg(self) -> IVec3 {
        IVec3::new(-self.x, -self.y, -self.z)
    }

    #[inline]
    pub fn abs(self) -> IVec3 {
        IVec3::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    #[inline]
    pub fn mul(self, s: i32) -> IVec3 {
        IVec3::new(self.x * s, self.y * s, self.z * s)
    }

    #[inline]
    pub fn div(self, s: i32) -> IVec3 {
        IVec3::new(self.x / s, self.y / s, self.z / s)
    }

    #[inline]
    pub fn shl(self, s: i32) -> IVec3 {
        IVec3::new(self.x << s, self.y << s, self.z << s)
    }

    #[inline]
    pub fn shr(self, s: i32) -> IVec3 {
        IVec3::new(self.x >> s, self.y >> s, self.z >> s)
    }

    #[inline]
    pub fn mask(self, m: i32) -> IVec3 {
        IVec3::new(self.x & m, self.y & m, self.z & m)
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(self, rhs: IVec3) -> IVec3 {
        IVec3::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(self, rhs: IVec3) -> IVec3 {
        IVec3::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }

    #[inline]
    pub fn cross(self, rhs: IVec3) -> IVec3 {
        IVec3 {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }

    #[inline]
    pub fn dot(self, rhs: IVec3) -> i32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    #[inline]
    pub fn with_axis(mut self, axis: usize, v: i32) -> IVec3 {
        match axis {
            0 => self.x = v,
            1 => self.y = v,
            _ => self.z = v,
        }
        self
    }
}

impl Index<usize> for IVec3 {
    type Output = i32;
    #[inline]
    fn index(&self, axis: usize) -> &i32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }
}

impl Add for IVec3 {
    type Output = IVec3;
    #[inline]
    fn add(self, rhs: IVec3) -> IVec3 {
        IVec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for IVec3 {
    type Output = IVec3;
    #[inline]
    fn sub(self, rhs: IVec3) -> IVec3 {
        IVec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl From<Vec3> for IVec3 {
    /// Truncating float-to-int conversion, component-wise (matches C casts).
    #[inline]
    fn from(v: Vec3) -> IVec3 {
        IVec3::new(v.x as i32, v.y as i32, v.z as i32)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }
}

/// Plane in normal/offset form: points p on the plane satisfy `n.p + offset == 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Plane {
    pub n: Vec3,
    pub offset: f32,
}

impl Plane {
    /// Plane through three points with normal `(b-a) x (c-a)`, normalized.
    #[inline]
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Plane {
        let n = (b - a).cross(c - a).normalized();
        Plane {
            n,
            offset: -n.dot(a),
        }
    }

    /// Signed distance of `p` from the plane.
    #[inline]
    pub fn dist(self, p: Vec3) -> f32 {
        self.n.dot(p) + self.offset
    }
}

//! Texture-space basis generation and per-orientation tangent frames.

use karst_geom::{Vec2, Vec3};
use karst_slots::{SlotRegistry, VSlot};

/// World units covered by one unscaled texture repeat.
const TEX_SCALE: f32 = 8.0;

/// Reference tangent per `[rotation][orient]`.
pub const ORIENT_TANGENT: [[Vec3; 6]; 6] = [
    [
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
    ],
    [
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ],
    [
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
    ],
    [
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
    ],
    [
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
    ],
    [
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
    ],
];

/// Reference bitangent per `[rotation][orient]`.
pub const ORIENT_BITANGENT: [[Vec3; 6]; 6] = [
    [
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ],
    [
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
    ],
    [
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
    ],
    [
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
    ],
    [
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ],
    [
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
    ],
];

/// Two texture-space basis vectors: texcoord = (s.pos + s_off, t.pos + t_off).
#[derive(Clone, Copy, Debug, Default)]
pub struct TexGen {
    pub s: Vec3,
    pub s_off: f32,
    pub t: Vec3,
    pub t_off: f32,
}

impl TexGen {
    /// Derives the basis from the slot's native scale/aspect and the vslot's
    /// rotation/offset; the 6 orients x 2 rotation families give the 12 fixed
    /// rotation cases.
    pub fn new(slots: &SlotRegistry, vslot: &VSlot, orient: usize) -> TexGen {
        let slot = slots.slot(vslot);
        let k = TEX_SCALE / vslot.scale;
        let rot = vslot.rotation;
        let xs = if (2..=4).contains(&rot) {
            -(slot.tex_w as f32)
        } else {
            slot.tex_w as f32
        };
        let ys = if (1..=2).contains(&rot) || rot == 5 {
            -(slot.tex_h as f32)
        } else {
            slot.tex_h as f32
        };
        let sk = k / xs;
        let tk = k / ys;
        let swapped = rot & 5 == 1;
        let (off_s, off_t) = if swapped {
            (vslot.offset.1, vslot.offset.0)
        } else {
            (vslot.offset.0, vslot.offset.1)
        };
        let mut g = TexGen {
            s: Vec3::ZERO,
            s_off: -(off_s as f32) / xs,
            t: Vec3::ZERO,
            t_off: -(off_t as f32) / ys,
        };
        if swapped {
            match orient {
                0 => {
                    g.s.z = -sk;
                    g.t.y = tk;
                }
                1 => {
                    g.s.z = -sk;
                    g.t.y = -tk;
                }
                2 => {
                    g.s.z = -sk;
                    g.t.x = -tk;
                }
                3 => {
                    g.s.z = -sk;
                    g.t.x = tk;
                }
                4 => {
                    g.s.y = -sk;
                    g.t.x = tk;
                }
                _ => {
                    g.s.y = sk;
                    g.t.x = tk;
                }
            }
        } else {
            match orient {
                0 => {
                    g.s.y = sk;
                    g.t.z = -tk;
                }
                1 => {
                    g.s.y = -sk;
                    g.t.z = -tk;
                }
                2 => {
                    g.s.x = -sk;
                    g.t.z = -tk;
                }
                3 => {
                    g.s.x = sk;
                    g.t.z = -tk;
                }
                4 => {
                    g.s.x = sk;
                    g.t.y = -tk;
                }
                _ => {
                    g.s.x = sk;
                    g.t.y = tk;
                }
            }
        }
        g
    }

    #[inline]
    pub fn apply(&self, pos: Vec3) -> Vec2 {
        Vec2::new(self.s.dot(pos) + self.s_off, self.t.dot(pos) + self.t_off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karst_slots::SlotRegistry;

    #[test]
    fn texcoords_scale_with_slot_scale() {
        let slots = SlotRegistry::with_defaults();
        let mut v = slots.lookup(1).clone();
        v.scale = 1.0;
        let g = TexGen::new(&slots, &v, 5);
        let a = g.apply(Vec3::new(0.0, 0.0, 0.0));
        let b = g.apply(Vec3::new(64.0, 0.0, 0.0));
        // One 512-texel repeat covers 64 world units at scale 1.
        assert!((b.x - a.x - 1.0).abs() < 1e-6);
        v.scale = 2.0;
        let g2 = TexGen::new(&slots, &v, 5);
        let c = g2.apply(Vec3::new(64.0, 0.0, 0.0));
        assert!((c.x - a.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rotation_swaps_axes() {
        let slots = SlotRegistry::with_defaults();
        let mut v = slots.lookup(1).clone();
        v.rotation = 1;
        let g = TexGen::new(&slots, &v, 5);
        // With a 90-degree rotation the s axis no longer follows x on top faces.
        assert_eq!(g.s.x, 0.0);
        assert_ne!(g.t.x, 0.0);
    }

    #[test]
    fn tangent_tables_are_orthogonal_frames() {
        for rot in 0..6 {
            for orient in 0..6 {
                let t = ORIENT_TANGENT[rot][orient];
                let b = ORIENT_BITANGENT[rot][orient];
                assert_eq!(t.dot(b), 0.0, "rot {} orient {}", rot, orient);
                assert_eq!(t.length(), 1.0);
                assert_eq!(b.length(), 1.0);
            }
        }
    }
}

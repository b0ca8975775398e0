//! Sort bucket keys and the total draw order minimizing render-state changes.

use std::cmp::Ordering;

use karst_octree::LAYER_TOP;
use karst_slots::SlotRegistry;

/// Alpha classes in back-to-front submission order.
pub const ALPHA_NONE: u8 = 0;
pub const ALPHA_BACK: u8 = 1;
pub const ALPHA_FRONT: u8 = 2;
pub const ALPHA_REFRACT: u8 = 3;

/// Orientation sentinel for faces whose slot does not scroll: their texgen is
/// orientation-independent, so they merge into one bucket across orientations.
pub const ORIENT_MERGED: u8 = 7;

/// Identifies one index bucket within a batching unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub tex: u16,
    pub envmap: u16,
    pub orient: u8,
    pub layer: u8,
    pub alpha: u8,
}

impl SortKey {
    #[inline]
    pub fn new(tex: u16, orient: u8, layer: u8, envmap: u16, alpha: u8) -> Self {
        SortKey {
            tex,
            envmap,
            orient,
            layer,
            alpha,
        }
    }

    /// Opaque top-layer key for a texture (the common case).
    #[inline]
    pub fn opaque(tex: u16, orient: u8, envmap: u16) -> Self {
        SortKey::new(tex, orient, LAYER_TOP, envmap, ALPHA_NONE)
    }

    /// Total draw order: alpha class, then layer, then within one texture by
    /// (envmap, orient); across textures by (shader, param count, texture id)
    /// so consecutive buckets share as much render state as possible.
    pub fn draw_order(a: &SortKey, b: &SortKey, slots: &SlotRegistry) -> Ordering {
        match a.alpha.cmp(&b.alpha) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match a.layer.cmp(&b.layer) {
            Ordering::Equal => {}
            ord => return ord,
        }
        if a.tex == b.tex {
            return match a.envmap.cmp(&b.envmap) {
                Ordering::Equal => a.orient.cmp(&b.orient),
                ord => ord,
            };
        }
        let xs = slots.slot(slots.lookup(a.tex));
        let ys = slots.slot(slots.lookup(b.tex));
        match xs.shader.cmp(&ys.shader) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match xs.params.cmp(&ys.params) {
            Ordering::Equal => {}
            ord => return ord,
        }
        a.tex.cmp(&b.tex)
    }
}

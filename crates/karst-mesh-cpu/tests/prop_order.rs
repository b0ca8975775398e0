use std::cmp::Ordering;

use karst_geom::IVec3;
use karst_mesh_cpu::SortKey;
use karst_mesh_cpu::tjoint::reduce_slope;
use karst_slots::SlotRegistry;
use proptest::prelude::*;

fn arb_key() -> impl Strategy<Value = SortKey> {
    (0u16..4, 0u16..3, 0u8..8, prop::sample::select(vec![0x20u8, 0x40, 0x60]), 0u8..4).prop_map(
        |(tex, envmap, orient, layer, alpha)| SortKey {
            tex,
            envmap,
            orient,
            layer,
            alpha,
        },
    )
}

proptest! {
    // The draw order is a strict total order: antisymmetric, and two keys
    // compare equal only when they are the same key.
    #[test]
    fn draw_order_is_total(a in arb_key(), b in arb_key()) {
        let slots = SlotRegistry::with_defaults();
        let ab = SortKey::draw_order(&a, &b, &slots);
        let ba = SortKey::draw_order(&b, &a, &slots);
        prop_assert_eq!(ab, ba.reverse());
        if ab == Ordering::Equal {
            prop_assert_eq!(a, b);
        }
    }

    // Sorting any permutation of keys yields the same sequence.
    #[test]
    fn draw_order_is_deterministic(mut keys in proptest::collection::vec(arb_key(), 0..24)) {
        let slots = SlotRegistry::with_defaults();
        let mut reversed = keys.clone();
        reversed.reverse();
        keys.sort_by(|x, y| SortKey::draw_order(x, y, &slots));
        reversed.sort_by(|x, y| SortKey::draw_order(x, y, &slots));
        prop_assert_eq!(keys, reversed);
    }

    // Slope reduction keeps the direction and leaves no power-of-two factor.
    #[test]
    fn reduce_slope_preserves_direction(
        x in -64i32..=64,
        y in -64i32..=64,
        z in -64i32..=64,
    ) {
        prop_assume!(x != 0 || y != 0 || z != 0);
        let v = IVec3::new(x, y, z);
        let mut r = v;
        reduce_slope(&mut r);
        prop_assert!(!r.is_zero());
        prop_assert_ne!((r.x | r.y | r.z) & 1, 0);
        // Collinear with the input: cross product vanishes.
        prop_assert_eq!(v.cross(r), IVec3::ZERO);
        // Same direction, not inverted.
        prop_assert!(v.dot(r) > 0);
    }
}

use karst_geom::IVec3;
use proptest::prelude::*;

#[test]
fn shifts_and_masks_are_componentwise() {
    let v = IVec3::new(0x1234, 0x0FF0, 8);
    assert_eq!(v.shl(3), IVec3::new(0x91A0, 0x7F80, 64));
    assert_eq!(v.shr(2), IVec3::new(0x48D, 0x3FC, 2));
    assert_eq!(v.mask(0xFF0), IVec3::new(0x230, 0xFF0, 0));
    assert_eq!(v.mask(!0xFFF), IVec3::new(0x1000, 0, 0));
}

#[test]
fn child_origin_selects_octants() {
    let o = IVec3::new(64, 64, 64);
    assert_eq!(IVec3::child_origin(0, o, 32), o);
    assert_eq!(IVec3::child_origin(1, o, 32), IVec3::new(96, 64, 64));
    assert_eq!(IVec3::child_origin(2, o, 32), IVec3::new(64, 96, 64));
    assert_eq!(IVec3::child_origin(4, o, 32), IVec3::new(64, 64, 96));
    assert_eq!(IVec3::child_origin(7, o, 32), IVec3::new(96, 96, 96));
}

#[test]
fn axis_indexing_matches_fields() {
    let v = IVec3::new(1, 2, 3);
    assert_eq!((v[0], v[1], v[2]), (1, 2, 3));
    assert_eq!(v.with_axis(1, 9), IVec3::new(1, 9, 3));
}

proptest! {
    #[test]
    fn min_max_bound_both_inputs(a in any::<(i16, i16, i16)>(), b in any::<(i16, i16, i16)>()) {
        let a = IVec3::new(a.0 as i32, a.1 as i32, a.2 as i32);
        let b = IVec3::new(b.0 as i32, b.1 as i32, b.2 as i32);
        let lo = a.min(b);
        let hi = a.max(b);
        for axis in 0..3 {
            prop_assert!(lo[axis] <= a[axis] && lo[axis] <= b[axis]);
            prop_assert!(hi[axis] >= a[axis] && hi[axis] >= b[axis]);
            prop_assert!(lo[axis] == a[axis] || lo[axis] == b[axis]);
        }
    }

    #[test]
    fn cross_is_orthogonal(a in any::<(i8, i8, i8)>(), b in any::<(i8, i8, i8)>()) {
        let a = IVec3::new(a.0 as i32, a.1 as i32, a.2 as i32);
        let b = IVec3::new(b.0 as i32, b.1 as i32, b.2 as i32);
        let c = a.cross(b);
        prop_assert_eq!(c.dot(a), 0);
        prop_assert_eq!(c.dot(b), 0);
    }
}

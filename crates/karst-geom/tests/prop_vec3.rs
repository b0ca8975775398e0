use karst_geom::{Plane, Vec3};
use proptest::num::f32::NORMAL;
use proptest::prelude::*;
use proptest::strategy::Strategy;

fn approx(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}

fn approx_abs_rel(a: f32, b: f32, atol: f32, rtol: f32) -> bool {
    let diff = (a - b).abs();
    let scale = a.abs().max(b.abs());
    diff <= atol + rtol * scale
}

fn vapprox_abs_rel(a: Vec3, b: Vec3, atol: f32, rtol: f32) -> bool {
    approx_abs_rel(a.x, b.x, atol, rtol)
        && approx_abs_rel(a.y, b.y, atol, rtol)
        && approx_abs_rel(a.z, b.z, atol, rtol)
}

fn bounded_f32() -> impl Strategy<Value = f32> {
    NORMAL.prop_filter("bounded", |v| v.is_finite() && v.abs() <= 1e6)
}

fn arb_vec3() -> impl Strategy<Value = Vec3> {
    (bounded_f32(), bounded_f32(), bounded_f32()).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

proptest! {
    #[test]
    fn add_commutative(a in arb_vec3(), b in arb_vec3()) {
        prop_assert_eq!(a + b, b + a);
    }

    #[test]
    fn dot_distributes_over_add(a in arb_vec3(), b in arb_vec3(), c in arb_vec3()) {
        let lhs = (a + b).dot(c);
        let rhs = a.dot(c) + b.dot(c);
        prop_assert!(approx_abs_rel(lhs, rhs, 1e-2, 1e-4), "{} vs {}", lhs, rhs);
    }

    #[test]
    fn cross_is_orthogonal(a in arb_vec3(), b in arb_vec3()) {
        let c = a.cross(b);
        let scale = a.length() * b.length() * c.length();
        prop_assert!(approx_abs_rel(c.dot(a), 0.0, scale * 1e-5 + 1e-3, 0.0));
        prop_assert!(approx_abs_rel(c.dot(b), 0.0, scale * 1e-5 + 1e-3, 0.0));
    }

    #[test]
    fn lerp_hits_endpoints(a in arb_vec3(), b in arb_vec3()) {
        prop_assert_eq!(Vec3::lerp(a, b, 0.0), a);
        prop_assert!(vapprox_abs_rel(Vec3::lerp(a, b, 1.0), b, 1e-3, 1e-5));
    }

    #[test]
    fn normalized_has_unit_length(a in arb_vec3()) {
        prop_assume!(a.length() > 1e-3);
        prop_assert!(approx(a.normalized().length(), 1.0, 1e-4));
    }

    #[test]
    fn projection_removes_normal_component(a in arb_vec3(), n in arb_vec3()) {
        prop_assume!(n.length() > 1e-3);
        let n = n.normalized();
        let p = a.project_onto_plane(n);
        prop_assert!(approx_abs_rel(p.dot(n), 0.0, a.length() * 1e-4 + 1e-3, 0.0));
    }

    #[test]
    fn scalar_triple_matches_determinant_cycle(a in arb_vec3(), b in arb_vec3(), c in arb_vec3()) {
        let lhs = a.scalar_triple(b, c);
        let rhs = b.scalar_triple(c, a);
        let scale = a.length() * b.length() * c.length();
        prop_assert!(approx_abs_rel(lhs, rhs, scale * 1e-4 + 1e-2, 1e-3));
    }
}

#[test]
fn plane_through_points_contains_them() {
    let a = Vec3::new(0.0, 0.0, 5.0);
    let b = Vec3::new(4.0, 0.0, 5.0);
    let c = Vec3::new(0.0, 4.0, 5.0);
    let p = Plane::from_points(a, b, c);
    assert_eq!(p.n, Vec3::new(0.0, 0.0, 1.0));
    assert!(approx(p.dist(a), 0.0, 1e-6));
    assert!(approx(p.dist(Vec3::new(1.0, 1.0, 7.0)), 2.0, 1e-6));
}

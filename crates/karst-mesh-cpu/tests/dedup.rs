use karst_geom::{Vec2, Vec3};
use karst_mesh_cpu::{ByteDir, MAX_VERTS, Vertex, VertexTable};

fn vert(pos: Vec3) -> Vertex {
    Vertex {
        pos,
        tc: Vec2::new(1.0, 2.0),
        norm: ByteDir([128, 128, 255]),
        tangent: ByteDir([255, 128, 128]),
        bitangent: 255,
    }
}

#[test]
fn identical_records_share_an_index() {
    let mut table = VertexTable::new();
    let v = vert(Vec3::new(1.0, 2.0, 3.0));
    let a = table.add(v).unwrap();
    let b = table.add(v).unwrap();
    assert_eq!(a, b);
    assert_eq!(table.len(), 1);
}

#[test]
fn any_field_difference_gets_a_new_index() {
    let base = vert(Vec3::new(1.0, 2.0, 3.0));
    let variants = [
        Vertex {
            pos: Vec3::new(1.0, 2.0, 3.5),
            ..base
        },
        Vertex {
            tc: Vec2::new(1.0, 2.5),
            ..base
        },
        Vertex {
            norm: ByteDir([128, 128, 0]),
            ..base
        },
        Vertex {
            tangent: ByteDir([0, 128, 128]),
            ..base
        },
        Vertex {
            bitangent: 0,
            ..base
        },
    ];
    for variant in variants {
        let mut table = VertexTable::new();
        let a = table.add(base).unwrap();
        let b = table.add(variant).unwrap();
        assert_ne!(a, b, "{:?}", variant);
        assert_eq!(table.len(), 2);
    }
}

#[test]
fn clear_resets_indices() {
    let mut table = VertexTable::new();
    table.add(vert(Vec3::new(1.0, 0.0, 0.0))).unwrap();
    table.add(vert(Vec3::new(2.0, 0.0, 0.0))).unwrap();
    table.clear();
    assert_eq!(table.len(), 0);
    let idx = table.add(vert(Vec3::new(9.0, 0.0, 0.0))).unwrap();
    assert_eq!(idx, 0);
}

#[test]
fn vertex_ceiling_is_16_bit() {
    let mut table = VertexTable::new();
    for i in 0..MAX_VERTS {
        let idx = table
            .add(vert(Vec3::new(i as f32, 0.0, 0.0)))
            .expect("below the ceiling");
        assert_eq!(idx as usize, i);
    }
    // The 65536th unique vertex is refused and the table stays unchanged.
    assert!(table.add(vert(Vec3::new(-1.0, 0.0, 0.0))).is_none());
    assert_eq!(table.len(), MAX_VERTS);
    // Existing vertices still dedup to their in-range indices.
    let again = table.add(vert(Vec3::new(17.0, 0.0, 0.0))).unwrap();
    assert_eq!(again, 17);
}

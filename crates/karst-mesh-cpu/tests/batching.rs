//! End-to-end batching: bucket keys, counts, merged faces, buffer packing,
//! refcounted teardown and bounding boxes.

use karst_geom::{IVec3, Vec2};
use karst_mesh_cpu::{
    BatchId, BatchStore, MERGE_ORIGIN, MERGE_USE, MesherConfig, ORIENT_MERGED, RebuildStats,
    TJointArena, rebuild_all,
};
use karst_octree::{LAYER_TOP, O_TOP, Octree, VertInfo, mat};
use karst_slots::{EMID_NONE, Slot, SlotRegistry, VSlot};
use karst_upload::{RecordingBackend, VboPools, VboRegistry};

struct Built {
    store: BatchStore,
    registry: VboRegistry,
    backend: RecordingBackend,
    pools: VboPools,
    stats: RebuildStats,
}

fn build(oct: &mut Octree, slots: &SlotRegistry, cfg: &MesherConfig) -> Built {
    let mut store = BatchStore::new();
    let mut pools = VboPools::new(cfg.max_vbo_verts, false);
    let mut registry = VboRegistry::new();
    let mut backend = RecordingBackend::new();
    let mut arena = TJointArena::new();
    let stats = rebuild_all(
        oct,
        slots,
        cfg,
        &mut store,
        &mut pools,
        &mut registry,
        &mut backend,
        &mut arena,
        None,
    )
    .unwrap();
    Built {
        store,
        registry,
        backend,
        pools,
        stats,
    }
}

/// World 256 with a full one-cube-thick floor of 128 leaves.
fn floor_world(tex: u16) -> Octree {
    let mut oct = Octree::new(256);
    oct.fill_box(
        IVec3::new(0, 0, 0),
        IVec3::new(256, 256, 128),
        128,
        [tex; 6],
        0,
    );
    oct
}

fn slots_with(entries: &[(&str, Slot, VSlot)]) -> SlotRegistry {
    let mut slots = SlotRegistry::with_defaults();
    for (key, slot, vslot) in entries {
        slots.register(key, slot.clone(), vslot.clone());
    }
    slots
}

fn nonempty_batches(store: &BatchStore) -> Vec<BatchId> {
    let mut ids: Vec<BatchId> = store
        .list
        .iter()
        .copied()
        .filter(|&id| store.get(id).verts > 0 || store.get(id).sky > 0)
        .collect();
    ids.sort();
    ids
}

#[test]
fn flat_floor_batches_one_face_per_leaf() {
    let mut oct = floor_world(2);
    let slots = slots_with(&[("stone", Slot::default(), VSlot::default())]);
    let built = build(&mut oct, &slots, &MesherConfig::default());

    // All 8 top-level octants materialize; only the 4 floor ones hold geometry.
    assert_eq!(built.stats.batches, 8);
    let floor = nonempty_batches(&built.store);
    assert_eq!(floor.len(), 4);
    for id in &floor {
        let b = built.store.get(*id);
        // One quad: only the top face survives occlusion.
        assert_eq!(b.verts, 4);
        assert_eq!(b.tris, 2);
        assert_eq!(b.elems.len(), 1);
        let e = &b.elems[0];
        assert_eq!(e.texture, 2);
        // A non-scrolling slot merges across orientations.
        assert_eq!(e.orient, ORIENT_MERGED);
        assert_eq!(e.layer, LAYER_TOP);
        assert_eq!(e.envmap, EMID_NONE);
        assert_eq!(e.length, 6);
        assert_eq!(b.blends + b.alpha_back + b.alpha_front + b.refract, 0);
        assert!(b.vbuf.is_some() && b.ebuf.is_some());
    }
    assert_eq!(built.stats.verts, 16);
    assert_eq!(built.stats.tris, 8);
    assert_eq!(built.stats.explicit_sky, 0);
    // One buffer generation per channel, shared by all four batches.
    let vbuf = built.store.get(floor[0]).vbuf.unwrap();
    assert!(floor.iter().all(|&id| built.store.get(id).vbuf == Some(vbuf)));
    assert_eq!(built.registry.uses(vbuf), 4);
}

#[test]
fn scrolling_slots_keep_their_orientation() {
    let mut oct = floor_world(2);
    let vslot = VSlot {
        scroll: Vec2::new(0.25, 0.0),
        ..VSlot::default()
    };
    let slots = slots_with(&[("conveyor", Slot::default(), vslot)]);
    let built = build(&mut oct, &slots, &MesherConfig::default());
    for id in nonempty_batches(&built.store) {
        assert_eq!(built.store.get(id).elems[0].orient, O_TOP as u8);
    }
}

#[test]
fn triangle_counts_are_consistent() {
    let mut oct = Octree::new(256);
    // An uneven staircase of cubes to get several faces per batch.
    oct.fill_box(IVec3::new(0, 0, 0), IVec3::new(256, 256, 64), 64, [2; 6], 0);
    oct.fill_box(
        IVec3::new(64, 64, 64),
        IVec3::new(192, 192, 128),
        64,
        [3; 6],
        0,
    );
    let slots = slots_with(&[
        ("stone", Slot::default(), VSlot::default()),
        ("dirt", Slot::default(), VSlot::default()),
    ]);
    let built = build(&mut oct, &slots, &MesherConfig::default());
    let mut total = 0usize;
    for &id in &built.store.list {
        let b = built.store.get(id);
        let mut from_sets = 0;
        for e in &b.elems {
            assert_eq!(e.length % 3, 0);
            assert!(e.min_vert <= e.max_vert || e.length == 0);
            assert!(e.max_vert < b.voffset + b.verts.max(1));
            from_sets += e.length / 3;
        }
        assert_eq!(from_sets, b.all_tris());
        total += b.all_tris() as usize;
    }
    assert_eq!(total, built.stats.tris);
}

#[test]
fn merged_faces_collapse_sibling_quads() {
    // World 512: a floor of 16 leaves, each 256-quadrant merged into one quad.
    let mut oct = Octree::new(512);
    oct.fill_box(
        IVec3::new(0, 0, 0),
        IVec3::new(512, 512, 128),
        128,
        [2; 6],
        0,
    );
    for qy in [0, 256] {
        for qx in [0, 256] {
            for cy in [0, 128] {
                for cx in [0, 128] {
                    let (idx, ..) = oct
                        .cube_at(IVec3::new(qx + cx, qy + cy, 0), 128)
                        .unwrap();
                    if cx == 0 && cy == 0 {
                        let v = |x: i32, y: i32| VertInfo {
                            x: (x * 8) as u16,
                            y: (y * 8) as u16,
                            z: 128 * 8,
                            norm: 0,
                        };
                        let quad = [
                            v(qx, qy),
                            v(qx + 256, qy),
                            v(qx + 256, qy + 256),
                            v(qx, qy + 256),
                        ];
                        oct.set_face_surface(idx, O_TOP, &quad, 0, true);
                    } else {
                        oct.set_face_surface(idx, O_TOP, &[], 0, true);
                    }
                }
            }
        }
    }
    let slots = slots_with(&[("stone", Slot::default(), VSlot::default())]);
    let built = build(&mut oct, &slots, &MesherConfig::default());

    let quads = nonempty_batches(&built.store);
    assert_eq!(quads.len(), 4);
    for id in quads {
        let b = built.store.get(id);
        // Four sibling faces became one coarse quad.
        assert_eq!(b.verts, 4);
        assert_eq!(b.tris, 2);
        assert_ne!(b.has_merges & MERGE_USE, 0);
        assert_ne!(b.has_merges & MERGE_ORIGIN, 0);
        assert_eq!(b.merge_level, 8);
    }
    assert_eq!(built.stats.verts, 16);
    assert_eq!(built.stats.tris, 8);
}

#[test]
fn flush_cap_starts_a_fresh_generation() {
    let mut oct = floor_world(2);
    let slots = slots_with(&[("stone", Slot::default(), VSlot::default())]);
    let cfg = MesherConfig {
        max_vbo_verts: 8,
        ..MesherConfig::default()
    };
    let built = build(&mut oct, &slots, &cfg);

    let floor = nonempty_batches(&built.store);
    // Two 4-vert batches fit per generation; the third add triggers exactly
    // one flush and lands at offset 0 of a new generation.
    let offsets: Vec<u32> = floor.iter().map(|&id| built.store.get(id).voffset).collect();
    assert_eq!(offsets, vec![0, 4, 0, 4]);
    let gens: Vec<_> = floor
        .iter()
        .map(|&id| built.store.get(id).vbuf.unwrap())
        .collect();
    assert_eq!(gens[0], gens[1]);
    assert_ne!(gens[1], gens[2]);
    assert_eq!(gens[2], gens[3]);
    assert_eq!(built.registry.uses(gens[0]), 2);
    // Index values are rebased per generation, never past the 16-bit range.
    for &id in &floor {
        let b = built.store.get(id);
        let shadow = built.registry.shadow(b.ebuf.unwrap()).unwrap();
        let idx: Vec<u16> = bytemuck::pod_collect_to_vec(shadow);
        let range = b.eoffset as usize..(b.eoffset + b.elems[0].length) as usize;
        for &i in &idx[range] {
            assert!((i as u32) >= b.voffset && (i as u32) < b.voffset + b.verts);
        }
    }
}

#[test]
fn destroy_releases_buffers_symmetrically() {
    let mut oct = floor_world(2);
    let slots = slots_with(&[("stone", Slot::default(), VSlot::default())]);
    let mut built = build(&mut oct, &slots, &MesherConfig::default());

    let floor = nonempty_batches(&built.store);
    let verts_before = built.store.world_verts;
    let first = built.store.get(floor[0]).clone();
    built
        .store
        .destroy(floor[0], true, &mut built.registry, &mut built.backend);
    assert_eq!(built.store.world_verts, verts_before - first.verts as usize);
    assert_eq!(built.registry.uses(first.vbuf.unwrap()), 3);
    assert_eq!(built.backend.destroyed, 0);
    for &id in &floor[1..] {
        built
            .store
            .destroy(id, true, &mut built.registry, &mut built.backend);
    }
    // Last reference freed both shared buffers.
    assert_eq!(built.backend.destroyed, 2);
    assert_eq!(built.store.world_verts, 0);
    assert_eq!(built.store.world_tris, 0);
}

#[test]
fn invalidation_tears_down_and_rebuilds_subtrees() {
    let mut oct = floor_world(2);
    let slots = slots_with(&[("stone", Slot::default(), VSlot::default())]);
    let mut built = build(&mut oct, &slots, &MesherConfig::default());
    assert!(!built.registry.is_empty());

    // Partial invalidation: tear down one octant, keep the rest.
    let survivor = {
        let (idx, ..) = oct.cube_at(IVec3::new(128, 0, 0), 128).unwrap();
        oct.cube(idx).ext.as_ref().unwrap().batch.unwrap()
    };
    built
        .store
        .clear_subtree(&mut oct, 0, &mut built.registry, &mut built.backend);
    assert_eq!(built.store.len(), 7);
    let mut arena = TJointArena::new();
    let cfg = MesherConfig::default();
    let stats = rebuild_all(
        &mut oct,
        &slots,
        &cfg,
        &mut built.store,
        &mut built.pools,
        &mut built.registry,
        &mut built.backend,
        &mut arena,
        None,
    )
    .unwrap();
    // Only the cleared octant was rebuilt; the survivor kept its batch.
    assert_eq!(stats.batches, 8);
    assert_eq!(stats.verts, 16);
    assert_eq!(stats.tris, 8);
    let (idx, ..) = oct.cube_at(IVec3::new(128, 0, 0), 128).unwrap();
    assert_eq!(oct.cube(idx).ext.as_ref().unwrap().batch, Some(survivor));

    // Full invalidation releases every buffer.
    built
        .store
        .clear_world(&mut oct, &mut built.registry, &mut built.backend);
    assert!(built.store.is_empty());
    assert!(built.registry.is_empty());
    assert!(built.backend.live.is_empty());
    let stats = rebuild_all(
        &mut oct,
        &slots,
        &cfg,
        &mut built.store,
        &mut built.pools,
        &mut built.registry,
        &mut built.backend,
        &mut arena,
        None,
    )
    .unwrap();
    assert_eq!(stats.verts, 16);
    assert_eq!(stats.tris, 8);
}

#[test]
fn bounds_aggregate_bottom_up() {
    let mut oct = floor_world(2);
    let slots = slots_with(&[("stone", Slot::default(), VSlot::default())]);
    let mut built = build(&mut oct, &slots, &MesherConfig::default());

    let floor = nonempty_batches(&built.store);
    for &id in &floor {
        let b = built.store.get(id);
        assert_eq!(b.bb_min.z, 128);
        assert_eq!(b.bb_max.z, 128);
        assert_eq!(b.bb_min, b.geom_min);
        // No alpha geometry: the alpha box stays the invalid sentinel.
        assert_eq!(b.alpha_min, IVec3::splat(-1));
        assert_eq!(b.refract_min, IVec3::splat(-1));
    }
    assert_eq!(built.store.world_min.z, 128);

    // Lazy mode recomputes only still-unset boxes.
    let id = floor[0];
    built.store.get_mut(id).bb_min = IVec3::splat(-1);
    built.store.get_mut(id).bb_max = IVec3::splat(-1);
    built.store.update_bounds(256, false);
    let b = built.store.get(id);
    assert_eq!(b.bb_min, b.geom_min);
}

#[test]
fn sky_faces_use_the_sky_index_channel() {
    let mut oct = floor_world(karst_slots::DEFAULT_SKY);
    let slots = SlotRegistry::with_defaults();
    let built = build(&mut oct, &slots, &MesherConfig::default());
    let sky = nonempty_batches(&built.store);
    assert_eq!(sky.len(), 4);
    for id in sky {
        let b = built.store.get(id);
        assert_eq!(b.sky, 6);
        assert_eq!(b.tris, 0);
        assert!(b.elems.is_empty());
        assert!(b.skybuf.is_some());
        assert!(b.ebuf.is_none());
    }
    assert_eq!(built.stats.explicit_sky, 24);
}

#[test]
fn alpha_faces_classify_and_bound() {
    let mut oct = floor_world(2);
    // A glass block sitting on the floor corner.
    oct.fill_box(
        IVec3::new(0, 0, 128),
        IVec3::new(64, 64, 192),
        64,
        [3; 6],
        mat::GLASS | mat::ALPHA,
    );
    let glass_vslot = VSlot {
        alpha_front: 0.5,
        ..VSlot::default()
    };
    let slots = slots_with(&[
        ("stone", Slot::default(), VSlot::default()),
        ("glass", Slot::default(), glass_vslot),
    ]);
    let built = build(&mut oct, &slots, &MesherConfig::default());

    let (idx, ..) = oct.cube_at(IVec3::new(0, 0, 128), 128).unwrap();
    let id = oct.cube(idx).ext.as_ref().unwrap().batch.unwrap();
    let b = built.store.get(id);
    // Top, +x and +y faces are exposed; the floor hides the bottom.
    assert_eq!(b.alpha_front, 1);
    assert_eq!(b.alpha_front_tris, 6);
    assert_eq!(b.tris, 0);
    assert_eq!(b.elems.len(), 1);
    assert_eq!(b.alpha_min, IVec3::new(0, 0, 128));
    assert_eq!(b.alpha_max, IVec3::new(64, 64, 192));
    assert_eq!(b.refract_min, IVec3::splat(-1));
    // The glass cube's triangles still count toward the world total.
    assert!(built.stats.tris >= 6);
}

#[test]
fn material_volumes_emit_merged_surfaces() {
    let mut oct = floor_world(2);
    oct.fill_material(
        IVec3::new(0, 0, 128),
        IVec3::new(128, 128, 192),
        64,
        mat::WATER,
    );
    let slots = slots_with(&[("stone", Slot::default(), VSlot::default())]);
    let built = build(&mut oct, &slots, &MesherConfig::default());

    let (idx, ..) = oct.cube_at(IVec3::new(0, 0, 128), 128).unwrap();
    let id = oct.cube(idx).ext.as_ref().unwrap().batch.unwrap();
    let b = built.store.get(id);
    // One merged top sheet plus one sheet per exposed side (+x, +y).
    assert_eq!(b.mat_surfs.len(), 3);
    assert_eq!(b.mat_mask, 1 << mat::WATER);
    let top = b
        .mat_surfs
        .iter()
        .find(|s| s.orient as usize == O_TOP)
        .unwrap();
    let (min, max) = top.bounds();
    assert_eq!(min, IVec3::new(0, 0, 192));
    assert_eq!(max, IVec3::new(128, 128, 192));
    // Water bounds participate in the aggregate box.
    assert_eq!(b.bb_max.z, 192);
}

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use karst_geom::IVec3;
use karst_mesh_cpu::{BatchStore, MesherConfig, TJointArena, rebuild_all};
use karst_octree::Octree;
use karst_slots::SlotRegistry;
use karst_upload::{RecordingBackend, VboPools, VboRegistry};

fn stepped_world(world_size: i32) -> Octree {
    let mut oct = Octree::new(world_size);
    // A floor plus a grid of mixed-size pillars so the build exercises
    // visibility, T-junctions and threshold batching.
    oct.fill_box(
        IVec3::new(0, 0, 0),
        IVec3::new(world_size, world_size, 64),
        64,
        [2; 6],
        0,
    );
    let mut step = 0;
    let mut x = 0;
    while x + 128 <= world_size {
        let mut y = 0;
        while y + 128 <= world_size {
            let grid = if (step & 1) == 0 { 64 } else { 32 };
            oct.fill_box(
                IVec3::new(x, y, 64),
                IVec3::new(x + 64, y + 64, 128),
                grid,
                [3; 6],
                0,
            );
            step += 1;
            y += 128;
        }
        x += 128;
    }
    oct
}

fn slots() -> SlotRegistry {
    let mut slots = SlotRegistry::with_defaults();
    slots.register("stone", Default::default(), Default::default());
    slots.register("dirt", Default::default(), Default::default());
    slots
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild_all");
    let slots = slots();
    let cfg = MesherConfig::default();
    for world_size in [256, 512] {
        group.bench_function(format!("world_{}", world_size), |b| {
            b.iter(|| {
                let mut oct = stepped_world(world_size);
                let mut store = BatchStore::new();
                let mut pools = VboPools::new(cfg.max_vbo_verts, false);
                let mut registry = VboRegistry::new();
                let mut backend = RecordingBackend::new();
                let mut arena = TJointArena::new();
                let stats = rebuild_all(
                    &mut oct,
                    &slots,
                    &cfg,
                    &mut store,
                    &mut pools,
                    &mut registry,
                    &mut backend,
                    &mut arena,
                    None,
                )
                .unwrap();
                black_box(stats);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rebuild);
criterion_main!(benches);

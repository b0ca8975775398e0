//! Procedural demo content: a slot set and a terraced terrain exercising
//! visibility culling, T-junction repair, merging, grass and materials.

use karst_geom::{IVec3, Vec2};
use karst_octree::{O_TOP, Octree, VertInfo, mat};
use karst_slots::{Slot, SlotRegistry, VSlot};

pub fn demo_slots() -> SlotRegistry {
    let mut slots = SlotRegistry::with_defaults();
    slots.register("stone", Slot::default(), VSlot::default());
    slots.register(
        "grass",
        Slot {
            autograss: true,
            ..Slot::default()
        },
        VSlot::default(),
    );
    slots.register(
        "sand",
        Slot::default(),
        VSlot {
            scale: 2.0,
            rotation: 1,
            ..VSlot::default()
        },
    );
    slots.register(
        "glass",
        Slot::default(),
        VSlot {
            alpha_front: 0.5,
            ..VSlot::default()
        },
    );
    slots.register(
        "lava_flow",
        Slot::default(),
        VSlot {
            scroll: Vec2::new(0.25, 0.0),
            ..VSlot::default()
        },
    );
    slots
}

/// Terraced terrain: a base slab, stepped plateaus of mixed cube sizes (the
/// size changes create T-junction seams), one merged plateau top, a glass
/// block and a water pool.
pub fn demo_world(world_size: i32, slots: &SlotRegistry) -> Octree {
    let stone = slots.get_id("stone").unwrap_or(1);
    let grass = slots.get_id("grass").unwrap_or(1);
    let sand = slots.get_id("sand").unwrap_or(1);
    let glass = slots.get_id("glass").unwrap_or(1);

    let mut oct = Octree::new(world_size);

    // Base slab with a grassy top.
    oct.fill_box(
        IVec3::new(0, 0, 0),
        IVec3::new(world_size, world_size, 64),
        64,
        [grass; 6],
        0,
    );

    // Stepped plateaus: alternate 64- and 32-unit cubes so plateau rims abut
    // finer neighbors along shared edges.
    let mut tile = 0;
    let mut x = 0;
    while x + 256 <= world_size {
        let mut y = 0;
        while y + 256 <= world_size {
            // Heights stay aligned to the tile's cube size.
            let (grid, height) = if tile % 2 == 0 {
                (64, 128)
            } else {
                (32, 96 + 32 * (tile % 3))
            };
            oct.fill_box(
                IVec3::new(x + 64, y + 64, 64),
                IVec3::new(x + 192, y + 192, height),
                grid,
                [stone; 6],
                0,
            );
            tile += 1;
            y += 256;
        }
        x += 256;
    }

    // One sandy 128-plateau whose four 64-cube tops merge into a single quad.
    if world_size >= 512 {
        let o = IVec3::new(256, 0, 64);
        oct.fill_box(o, o + IVec3::new(128, 128, 64), 64, [sand; 6], 0);
        let top = o.z + 64;
        let mut origin = true;
        for cy in [0, 64] {
            for cx in [0, 64] {
                let (idx, ..) = oct
                    .cube_at(IVec3::new(o.x + cx, o.y + cy, o.z), 64)
                    .unwrap();
                if origin {
                    let v = |x: i32, y: i32| VertInfo {
                        x: ((x & 0xFFF) * 8) as u16,
                        y: ((y & 0xFFF) * 8) as u16,
                        z: ((top & 0xFFF) * 8) as u16,
                        norm: 0,
                    };
                    let quad = [
                        v(o.x, o.y),
                        v(o.x + 128, o.y),
                        v(o.x + 128, o.y + 128),
                        v(o.x, o.y + 128),
                    ];
                    oct.set_face_surface(idx, O_TOP, &quad, 0, true);
                    origin = false;
                } else {
                    oct.set_face_surface(idx, O_TOP, &[], 0, true);
                }
            }
        }
    }

    // A translucent block and a pool of water on the base slab.
    oct.fill_box(
        IVec3::new(32, 32, 64),
        IVec3::new(64, 64, 96),
        32,
        [glass; 6],
        mat::GLASS | mat::ALPHA,
    );
    oct.fill_material(
        IVec3::new(0, world_size - 128, 64),
        IVec3::new(128, world_size, 96),
        32,
        mat::WATER,
    );

    oct
}

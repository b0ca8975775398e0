//! Texture slot registry: shader identity, scale/rotation/offset, layering and alpha rules.
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use karst_geom::Vec2;

/// Built-in slot id for sky faces.
pub const DEFAULT_SKY: u16 = 0;
/// Built-in slot id for untextured geometry.
pub const DEFAULT_GEOM: u16 = 1;

/// Environment map id meaning "no envmap".
pub const EMID_NONE: u16 = 0;
/// Environment map id meaning "the slot carries its own envmap texture".
pub const EMID_CUSTOM: u16 = 1;
/// First id usable for world-assigned environment maps.
pub const EMID_BASE: u16 = 2;

// Texture unit types contributing to a slot's texmask.
pub const TEX_DIFFUSE: u8 = 0;
pub const TEX_NORMAL: u8 = 1;
pub const TEX_GLOW: u8 = 2;
pub const TEX_SPEC: u8 = 3;
pub const TEX_DEPTH: u8 = 4;
pub const TEX_ENVMAP: u8 = 5;

/// Shader capability flags (closed set checked by the mesher).
pub const SHADER_ENVMAP: u8 = 1 << 0;
pub const SHADER_REFRACT: u8 = 1 << 1;

/// Shared texture definition: shader identity and per-texture metadata.
#[derive(Clone, Debug)]
pub struct Slot {
    /// Shader id; ordering between ids drives cross-texture draw-call grouping.
    pub shader: u16,
    pub shader_flags: u8,
    /// Number of shader params, a secondary draw-order key.
    pub params: u8,
    /// Diffuse texture dimensions used for texcoord scaling.
    pub tex_w: i32,
    pub tex_h: i32,
    /// Bitmask over `TEX_*` of the texture units this slot binds.
    pub texmask: u8,
    /// Whether faces using this slot sprout grass overlay geometry.
    pub autograss: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            shader: 0,
            shader_flags: 0,
            params: 0,
            tex_w: 512,
            tex_h: 512,
            texmask: 1 << TEX_DIFFUSE,
            autograss: false,
        }
    }
}

/// Slot variant: transform and layering state applied to one texture id.
#[derive(Clone, Debug)]
pub struct VSlot {
    /// Index into [`SlotRegistry::slots`].
    pub slot: u16,
    pub scale: f32,
    /// Rotation case 0..=5 (0/90/180/270 and mirrored variants).
    pub rotation: u8,
    pub offset: (i32, i32),
    pub scroll: Vec2,
    /// Secondary slot id blended under this one, or 0 for none.
    pub layer: u16,
    pub alpha_front: f32,
    pub alpha_back: f32,
    pub refract_scale: f32,
    pub dynamic: bool,
}

impl Default for VSlot {
    fn default() -> Self {
        VSlot {
            slot: 0,
            scale: 1.0,
            rotation: 0,
            offset: (0, 0),
            scroll: Vec2::ZERO,
            layer: 0,
            alpha_front: 0.0,
            alpha_back: 0.0,
            refract_scale: 0.0,
            dynamic: false,
        }
    }
}

impl VSlot {
    /// Whether the slot's texture animates and must not be merged across orientations.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic || !self.scroll.is_zero()
    }

    #[inline]
    pub fn is_alpha(&self) -> bool {
        self.alpha_front > 0.0 || self.alpha_back > 0.0 || self.refract_scale > 0.0
    }
}

#[derive(Clone, Debug)]
pub struct SlotRegistry {
    pub slots: Vec<Slot>,
    pub vslots: Vec<VSlot>,
    pub by_key: HashMap<String, u16>,
    shaders: Vec<String>,
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SlotRegistry {
    /// Registry pre-seeded with the sky and default-geometry slots.
    pub fn with_defaults() -> Self {
        let mut reg = SlotRegistry {
            slots: Vec::new(),
            vslots: Vec::new(),
            by_key: HashMap::new(),
            shaders: Vec::new(),
        };
        reg.register("sky", Slot::default(), VSlot::default());
        reg.register("default", Slot::default(), VSlot::default());
        reg
    }

    /// Adds a slot/variant pair under `key` and returns its texture id.
    pub fn register(&mut self, key: &str, slot: Slot, mut vslot: VSlot) -> u16 {
        let id = self.vslots.len() as u16;
        vslot.slot = self.slots.len() as u16;
        self.slots.push(slot);
        self.vslots.push(vslot);
        self.by_key.insert(key.to_string(), id);
        id
    }

    pub fn get_id(&self, key: &str) -> Option<u16> {
        self.by_key.get(key).copied()
    }

    /// Looks up a texture id, falling back to the default slot for unknown ids.
    #[inline]
    pub fn lookup(&self, tex: u16) -> &VSlot {
        self.vslots
            .get(tex as usize)
            .unwrap_or(&self.vslots[DEFAULT_GEOM as usize])
    }

    #[inline]
    pub fn slot(&self, vslot: &VSlot) -> &Slot {
        &self.slots[vslot.slot as usize]
    }

    fn shader_id(&mut self, name: &str) -> u16 {
        if let Some(i) = self.shaders.iter().position(|s| s == name) {
            return i as u16;
        }
        self.shaders.push(name.to_string());
        (self.shaders.len() - 1) as u16
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: SlotsConfig = toml::from_str(toml_str)?;
        let mut reg = SlotRegistry::with_defaults();
        let mut entries: Vec<(String, SlotEntry)> = cfg.slots.into_iter().collect();
        // HashMap iteration order is nondeterministic; sort keys so texture ids are stable.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut layers: Vec<(u16, String)> = Vec::new();
        for (key, entry) in entries {
            let shader = reg.shader_id(entry.shader.as_deref().unwrap_or("stdworld"));
            let mut shader_flags = 0u8;
            let mut texmask = 1u8 << TEX_DIFFUSE;
            if entry.envmap {
                shader_flags |= SHADER_ENVMAP;
                if entry.envmap_tex {
                    texmask |= 1 << TEX_ENVMAP;
                }
            }
            if entry.refract > 0.0 {
                shader_flags |= SHADER_REFRACT;
            }
            let slot = Slot {
                shader,
                shader_flags,
                params: entry.params,
                tex_w: entry.size[0],
                tex_h: entry.size[1],
                texmask,
                autograss: entry.grass,
            };
            let vslot = VSlot {
                slot: 0,
                scale: entry.scale,
                rotation: entry.rotation.min(5),
                offset: (entry.offset[0], entry.offset[1]),
                scroll: Vec2::new(entry.scroll[0], entry.scroll[1]),
                layer: 0,
                alpha_front: entry.alpha[0],
                alpha_back: entry.alpha[1],
                refract_scale: entry.refract,
                dynamic: entry.dynamic,
            };
            let id = reg.register(&key, slot, vslot);
            if let Some(layer_key) = entry.layer {
                layers.push((id, layer_key));
            }
        }
        // Layer references may point at slots registered later; resolve after the full pass.
        for (id, layer_key) in layers {
            match reg.get_id(&layer_key) {
                Some(layer_id) => reg.vslots[id as usize].layer = layer_id,
                None => log::warn!("slot {}: unknown layer slot '{}'", id, layer_key),
            }
        }
        Ok(reg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}

// --- Config ---

#[derive(Deserialize)]
pub struct SlotsConfig {
    pub slots: HashMap<String, SlotEntry>,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct SlotEntry {
    pub shader: Option<String>,
    pub params: u8,
    pub size: [i32; 2],
    pub scale: f32,
    pub rotation: u8,
    pub offset: [i32; 2],
    pub scroll: [f32; 2],
    pub layer: Option<String>,
    pub alpha: [f32; 2],
    pub refract: f32,
    pub grass: bool,
    pub envmap: bool,
    pub envmap_tex: bool,
    pub dynamic: bool,
}

impl Default for SlotEntry {
    fn default() -> Self {
        SlotEntry {
            shader: None,
            params: 0,
            size: [512, 512],
            scale: 1.0,
            rotation: 0,
            offset: [0, 0],
            scroll: [0.0, 0.0],
            layer: None,
            alpha: [0.0, 0.0],
            refract: 0.0,
            grass: false,
            envmap: false,
            envmap_tex: false,
            dynamic: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_defaults_cover_sky_and_geom() {
        let reg = SlotRegistry::with_defaults();
        assert_eq!(reg.get_id("sky"), Some(DEFAULT_SKY));
        assert_eq!(reg.get_id("default"), Some(DEFAULT_GEOM));
        // Out-of-range ids fall back to the default slot instead of panicking.
        let v = reg.lookup(999);
        assert_eq!(v.slot, DEFAULT_GEOM);
    }

    #[test]
    fn toml_ids_are_stable_and_layers_resolve() {
        let src = r#"
            [slots.rock]
            scale = 2.0
            rotation = 1

            [slots.dirt]
            grass = true
            layer = "rock"

            [slots.water]
            shader = "water"
            alpha = [0.5, 0.25]
            refract = 0.1
            envmap = true
        "#;
        let reg = SlotRegistry::from_toml_str(src).unwrap();
        // Alphabetical after the two built-ins: dirt=2, rock=3, water=4.
        assert_eq!(reg.get_id("dirt"), Some(2));
        assert_eq!(reg.get_id("rock"), Some(3));
        assert_eq!(reg.get_id("water"), Some(4));
        let dirt = reg.lookup(2);
        assert_eq!(dirt.layer, 3);
        assert!(reg.slot(dirt).autograss);
        let water = reg.lookup(4);
        assert!(water.is_alpha());
        assert_ne!(reg.slot(water).shader_flags & SHADER_ENVMAP, 0);
        assert_eq!(reg.lookup(3).rotation, 1);
        assert_eq!(reg.lookup(3).scale, 2.0);
    }
}

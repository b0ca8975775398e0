use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Tunables for batch materialization and buffer packing. These trade batch
/// count against culling granularity; none of them are correctness invariants.
/// They affect subsequent builds only.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MesherConfig {
    /// Vertex-channel staging cap before a flush (clamped to the u16 index range).
    pub max_vbo_verts: usize,
    /// Face count above which a subtree always materializes a batch.
    pub face_max: usize,
    /// Face count above which a large-enough subtree materializes a batch.
    pub face_min: usize,
    /// Minimum cube size (world units) for the `face_min` rule.
    pub min_batch_size: i32,
    /// Whether T-junction seams are repaired.
    pub fill_tjoints: bool,
    /// Log one debug line per uploaded buffer generation.
    pub debug_vbo: bool,
}

impl Default for MesherConfig {
    fn default() -> Self {
        MesherConfig {
            max_vbo_verts: 1 << 14,
            face_max: 384,
            face_min: 96,
            min_batch_size: 128,
            fill_tjoints: true,
            debug_vbo: false,
        }
    }
}

impl MesherConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let mut cfg: MesherConfig = toml::from_str(toml_str)?;
        cfg.clamp();
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    fn clamp(&mut self) {
        self.max_vbo_verts = self.max_vbo_verts.clamp(1, 1 << 16);
        self.min_batch_size = self.min_batch_size.max(1);
    }
}

//! GPU buffer packing: staged channels, refcounted buffer generations, backend seam.
#![forbid(unsafe_code)]

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// The render vertex as it lands in the vertex buffer. Direction vectors are
/// signed bytes; `bitangent` holds the sign rebased around zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PackedVertex {
    pub pos: [f32; 3],
    pub tc: [f32; 2],
    pub norm: [i8; 3],
    pub reserved: u8,
    pub tangent: [i8; 3],
    pub bitangent: u8,
}

/// Handle to one uploaded buffer, issued by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// The three independently staged buffer channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Vertex,
    Index,
    SkyIndex,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("buffer allocation failed ({channel:?}, {bytes} bytes): {reason}")]
    Allocation {
        channel: Channel,
        bytes: usize,
        reason: String,
    },
}

/// The opaque buffer allocation service: upload bytes, get a handle, free it later.
pub trait UploadBackend {
    fn create(&mut self, channel: Channel, data: &[u8]) -> Result<BufferId, UploadError>;
    fn destroy(&mut self, id: BufferId);
}

/// In-memory backend for tests and the demo driver; records every upload.
#[derive(Default)]
pub struct RecordingBackend {
    next: u32,
    pub live: HashMap<BufferId, (Channel, usize)>,
    pub created: usize,
    pub destroyed: usize,
    /// When set, the next `create` call fails (allocation-failure testing).
    pub fail_next: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UploadBackend for RecordingBackend {
    fn create(&mut self, channel: Channel, data: &[u8]) -> Result<BufferId, UploadError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(UploadError::Allocation {
                channel,
                bytes: data.len(),
                reason: "backend out of memory".into(),
            });
        }
        self.next += 1;
        let id = BufferId(self.next);
        self.live.insert(id, (channel, data.len()));
        self.created += 1;
        Ok(id)
    }

    fn destroy(&mut self, id: BufferId) {
        self.live.remove(&id);
        self.destroyed += 1;
    }
}

struct VboInfo {
    uses: u32,
    shadow: Vec<u8>,
}

/// Refcounted records for uploaded buffers, with CPU shadow copies. A buffer
/// serves every batch packed into its generation; it is freed when the last
/// of those batches is destroyed.
#[derive(Default)]
pub struct VboRegistry {
    map: HashMap<BufferId, VboInfo>,
}

impl VboRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, id: BufferId, uses: u32, shadow: Vec<u8>) {
        self.map.insert(id, VboInfo { uses, shadow });
    }

    /// Drops one use of `id`, destroying the backend buffer at zero.
    pub fn release(&mut self, id: BufferId, backend: &mut dyn UploadBackend) {
        let Some(info) = self.map.get_mut(&id) else {
            return;
        };
        if info.uses == 0 {
            return;
        }
        info.uses -= 1;
        if info.uses == 0 {
            backend.destroy(id);
            self.map.remove(&id);
        }
    }

    /// CPU-side copy of an uploaded buffer's contents.
    pub fn shadow(&self, id: BufferId) -> Option<&[u8]> {
        self.map.get(&id).map(|i| i.shadow.as_slice())
    }

    pub fn uses(&self, id: BufferId) -> u32 {
        self.map.get(&id).map(|i| i.uses).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One flushed generation: the uploaded buffer and the batch tags packed into it.
pub struct FlushedVbo {
    pub channel: Channel,
    pub buffer: BufferId,
    pub batches: Vec<u32>,
}

/// Three-channel staging area accumulating batch data until a flush cap.
pub struct VboPools {
    verts: Vec<PackedVertex>,
    indices: Vec<u16>,
    sky: Vec<u16>,
    vert_batches: Vec<u32>,
    index_batches: Vec<u32>,
    sky_batches: Vec<u32>,
    max_verts: usize,
    debug: bool,
    pub flushes: usize,
}

impl VboPools {
    pub fn new(max_verts: usize, debug: bool) -> Self {
        VboPools {
            verts: Vec::new(),
            indices: Vec::new(),
            sky: Vec::new(),
            vert_batches: Vec::new(),
            index_batches: Vec::new(),
            sky_batches: Vec::new(),
            max_verts,
            debug,
            flushes: 0,
        }
    }

    /// Element count currently staged in a channel.
    pub fn staged(&self, channel: Channel) -> usize {
        match channel {
            Channel::Vertex => self.verts.len(),
            Channel::Index => self.indices.len(),
            Channel::SkyIndex => self.sky.len(),
        }
    }

    /// Whether appending the given element counts would overflow a channel cap.
    /// Index channels are capped by 16-bit addressing.
    pub fn would_overflow(&self, verts: usize, indices: usize, sky: usize) -> bool {
        self.verts.len() + verts > self.max_verts
            || self.indices.len() + indices > u16::MAX as usize
            || self.sky.len() + sky > u16::MAX as usize
    }

    /// Appends one batch's vertices; returns the batch's offset into the
    /// pending vertex generation.
    pub fn add_verts(&mut self, batch: u32, verts: &[PackedVertex]) -> usize {
        let offset = self.verts.len();
        self.verts.extend_from_slice(verts);
        self.vert_batches.push(batch);
        offset
    }

    /// Appends one batch's opaque/alpha indices; returns its element offset.
    pub fn add_indices(&mut self, batch: u32, indices: &[u16]) -> usize {
        let offset = self.indices.len();
        self.indices.extend_from_slice(indices);
        self.index_batches.push(batch);
        offset
    }

    /// Appends one batch's sky indices; returns its element offset.
    pub fn add_sky(&mut self, batch: u32, indices: &[u16]) -> usize {
        let offset = self.sky.len();
        self.sky.extend_from_slice(indices);
        self.sky_batches.push(batch);
        offset
    }

    /// Uploads every non-empty channel as one buffer generation and resets the
    /// staging area. Returns the flushed generations so the caller can assign
    /// handles to its batch records.
    pub fn flush(
        &mut self,
        backend: &mut dyn UploadBackend,
        registry: &mut VboRegistry,
    ) -> Result<Vec<FlushedVbo>, UploadError> {
        let mut out = Vec::new();
        if !self.verts.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(&self.verts);
            out.push(Self::gen_vbo(
                backend,
                registry,
                Channel::Vertex,
                bytes,
                std::mem::take(&mut self.vert_batches),
                self.debug,
            )?);
            self.verts.clear();
        }
        if !self.indices.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(&self.indices);
            out.push(Self::gen_vbo(
                backend,
                registry,
                Channel::Index,
                bytes,
                std::mem::take(&mut self.index_batches),
                self.debug,
            )?);
            self.indices.clear();
        }
        if !self.sky.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(&self.sky);
            out.push(Self::gen_vbo(
                backend,
                registry,
                Channel::SkyIndex,
                bytes,
                std::mem::take(&mut self.sky_batches),
                self.debug,
            )?);
            self.sky.clear();
        }
        if !out.is_empty() {
            self.flushes += 1;
        }
        Ok(out)
    }

    fn gen_vbo(
        backend: &mut dyn UploadBackend,
        registry: &mut VboRegistry,
        channel: Channel,
        bytes: &[u8],
        batches: Vec<u32>,
        debug: bool,
    ) -> Result<FlushedVbo, UploadError> {
        let buffer = backend.create(channel, bytes)?;
        registry.register(buffer, batches.len() as u32, bytes.to_vec());
        if debug {
            log::debug!(
                "vbo {}: {:?}, {} bytes, {} uses",
                buffer.0,
                channel,
                bytes.len(),
                batches.len()
            );
        }
        Ok(FlushedVbo {
            channel,
            buffer,
            batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vert(x: f32) -> PackedVertex {
        PackedVertex {
            pos: [x, 0.0, 0.0],
            ..PackedVertex::default()
        }
    }

    #[test]
    fn packed_vertex_is_28_bytes() {
        assert_eq!(std::mem::size_of::<PackedVertex>(), 28);
    }

    #[test]
    fn flush_resets_offsets_and_counts_uses() {
        let mut pools = VboPools::new(4, false);
        let mut backend = RecordingBackend::new();
        let mut reg = VboRegistry::new();

        assert_eq!(pools.add_verts(1, &[vert(0.0), vert(1.0)]), 0);
        assert_eq!(pools.add_verts(2, &[vert(2.0)]), 2);
        assert!(pools.would_overflow(2, 0, 0));
        assert!(!pools.would_overflow(1, 0, 0));

        let flushed = pools.flush(&mut backend, &mut reg).unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].batches, vec![1, 2]);
        assert_eq!(reg.uses(flushed[0].buffer), 2);
        // Fresh generation starts at offset 0.
        assert_eq!(pools.staged(Channel::Vertex), 0);
        assert_eq!(pools.add_verts(3, &[vert(3.0)]), 0);
    }

    #[test]
    fn release_is_symmetric_and_frees_at_zero() {
        let mut pools = VboPools::new(16, false);
        let mut backend = RecordingBackend::new();
        let mut reg = VboRegistry::new();
        pools.add_indices(7, &[0, 1, 2]);
        pools.add_indices(9, &[0, 2, 3]);
        let flushed = pools.flush(&mut backend, &mut reg).unwrap();
        let id = flushed[0].buffer;
        assert!(reg.shadow(id).is_some());
        reg.release(id, &mut backend);
        assert_eq!(reg.uses(id), 1);
        assert_eq!(backend.destroyed, 0);
        reg.release(id, &mut backend);
        assert_eq!(backend.destroyed, 1);
        assert!(reg.shadow(id).is_none());
        // Releasing an already-freed buffer is a no-op.
        reg.release(id, &mut backend);
        assert_eq!(backend.destroyed, 1);
    }

    #[test]
    fn allocation_failure_surfaces() {
        let mut pools = VboPools::new(16, false);
        let mut backend = RecordingBackend::new();
        let mut reg = VboRegistry::new();
        pools.add_sky(1, &[0, 1, 2]);
        backend.fail_next = true;
        assert!(pools.flush(&mut backend, &mut reg).is_err());
    }
}

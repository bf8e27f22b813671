//! Storage slots - fixed-size units of a tile storage pool

/// Index of a slot inside its owning [`TileStorage`](super::TileStorage).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload of one slot: one word buffer per channel plus a write version.
///
/// Channels are stored as `u32` words so they can be viewed as bytes or as
/// `f32` samples without alignment checks failing.
#[derive(Debug)]
pub struct SlotBuffer {
    channels: Vec<Vec<u32>>,
    version: u64,
}

impl SlotBuffer {
    pub(crate) fn new(channels: usize, tile_bytes: usize) -> Self {
        Self {
            channels: (0..channels).map(|_| vec![0u32; tile_bytes / 4]).collect(),
            version: 0,
        }
    }

    /// Number of channels in this slot.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Raw bytes of a channel.
    pub fn bytes(&self, channel: usize) -> &[u8] {
        bytemuck::cast_slice(&self.channels[channel])
    }

    /// Mutable raw bytes of a channel.
    pub fn bytes_mut(&mut self, channel: usize) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.channels[channel])
    }

    /// Channel viewed as `f32` samples.
    pub fn samples(&self, channel: usize) -> &[f32] {
        bytemuck::cast_slice(&self.channels[channel])
    }

    /// Mutable channel viewed as `f32` samples.
    pub fn samples_mut(&mut self, channel: usize) -> &mut [f32] {
        bytemuck::cast_slice_mut(&mut self.channels[channel])
    }

    /// Stamp of the last successful write. Zero means never written.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Zero every channel and forget the version, for a slot changing owner.
    pub(crate) fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0);
        }
        self.version = 0;
    }

    pub(crate) fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

//! Shared memory for zero-copy audio buffer passing.
//!
//! Audio samples never travel over the message channel. Both sides map the
//! same region and the codec layer only exchanges offsets into it. One slot
//! exists per (port, channel) pair, sized and aligned for the widest sample
//! type so the same region serves both single and double precision
//! processing without renegotiation.

use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::PathBuf;

use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BridgeError, Result};

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Sample types that may live in the shared audio region.
pub trait Sample: Copy + Default + sealed::Sealed {}
impl Sample for f32 {}
impl Sample for f64 {}

/// Byte layout of a shared audio region. Negotiated once at setup time and
/// sent over the wire; both processes then map the region independently.
///
/// Offsets are in bytes, one per (port, channel), and are 8-byte aligned so
/// every slot can hold either `f32` or `f64` samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmConfig {
    pub name: String,
    /// Total region size in bytes.
    pub size: u32,
    pub input_offsets: Vec<Vec<u32>>,
    pub output_offsets: Vec<Vec<u32>>,
}

impl ShmConfig {
    /// Computes a worst-case layout for the given port/channel counts:
    /// every slot is sized for `f64` samples at `max_samples` frames.
    /// Offsets are `u32` on the wire, so a layout whose total size does not
    /// fit is rejected rather than silently wrapped.
    pub fn for_layout(
        name: String,
        input_channels: &[usize],
        output_channels: &[usize],
        max_samples: usize,
    ) -> Result<Self> {
        let stride = (max_samples as u64)
            .saturating_mul(std::mem::size_of::<f64>() as u64)
            .saturating_add(7)
            & !7;
        let slots: u64 = input_channels
            .iter()
            .chain(output_channels.iter())
            .map(|&channels| channels as u64)
            .sum();
        match stride.checked_mul(slots) {
            Some(total) if total <= u32::MAX as u64 => {}
            _ => {
                return Err(BridgeError::SharedMemory(format!(
                    "Audio region layout too large: {} slots of {} bytes",
                    slots, stride
                )))
            }
        }

        let mut next_offset = 0u32;
        let mut layout = |ports: &[usize]| -> Vec<Vec<u32>> {
            ports
                .iter()
                .map(|&channels| {
                    (0..channels)
                        .map(|_| {
                            let offset = next_offset;
                            next_offset += stride as u32;
                            offset
                        })
                        .collect()
                })
                .collect()
        };

        let input_offsets = layout(input_channels);
        let output_offsets = layout(output_channels);

        Ok(Self {
            name,
            size: next_offset,
            input_offsets,
            output_offsets,
        })
    }
}

/// A memory-mapped audio region shared between the two bridge processes.
///
/// Uses `UnsafeCell` for interior mutability since the underlying
/// memory-mapped region is shared between processes and needs to be written
/// to from an immutable reference. This is safe because:
/// 1. Only one process writes to each channel slot at a time (the process
///    cycle alternates ownership)
/// 2. The memory is synchronized at the OS level via shared memory
pub struct AudioShmBuffer {
    mmap: UnsafeCell<MmapMut>,
    config: ShmConfig,
    /// Creator owns the backing file and unlinks it on drop.
    owns_memory: bool,
}

impl AudioShmBuffer {
    /// Creates the backing file and maps it. The returned instance owns the
    /// file and removes it when dropped.
    pub fn create(config: ShmConfig) -> Result<Self> {
        let path = Self::shm_path(&config.name);
        let mmap = Self::map_file(&path, Some(config.size as u64))?;

        debug!(name = %config.name, size = config.size, "created shared audio region");

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            config,
            owns_memory: true,
        })
    }

    /// Maps an existing region created by the other process.
    pub fn open(config: ShmConfig) -> Result<Self> {
        let path = Self::shm_path(&config.name);
        let mmap = Self::map_file(&path, None)?;

        debug!(name = %config.name, size = config.size, "opened shared audio region");

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            config,
            owns_memory: false,
        })
    }

    fn map_file(path: &PathBuf, create_size: Option<u64>) -> Result<MmapMut> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if create_size.is_some() {
            options.create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
        }

        let file = options.open(path).map_err(|e| {
            BridgeError::SharedMemory(format!("Failed to open shared memory file: {}", e))
        })?;

        if let Some(size) = create_size {
            file.set_len(size).map_err(|e| {
                BridgeError::SharedMemory(format!("Failed to set file size: {}", e))
            })?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            BridgeError::SharedMemory(format!("Failed to create memory map: {}", e))
        })?;

        Ok(mmap)
    }

    fn shm_path(name: &str) -> PathBuf {
        #[cfg(target_os = "linux")]
        let base = PathBuf::from("/dev/shm");

        #[cfg(not(target_os = "linux"))]
        let base = std::env::temp_dir();

        base.join(format!("plugbridge_{}", name))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ShmConfig {
        &self.config
    }

    pub fn num_input_ports(&self) -> usize {
        self.config.input_offsets.len()
    }

    pub fn num_output_ports(&self) -> usize {
        self.config.output_offsets.len()
    }

    /// Number of channel slots for an input port, zero for unknown ports.
    pub fn num_input_channels(&self, port: usize) -> usize {
        self.config.input_offsets.get(port).map_or(0, Vec::len)
    }

    pub fn num_output_channels(&self, port: usize) -> usize {
        self.config.output_offsets.get(port).map_or(0, Vec::len)
    }

    /// Raw pointer to an input channel slot. The caller picks the sample
    /// type; the slot is wide enough for either. Panics when the (port,
    /// channel) pair is not part of the negotiated layout, that is a
    /// contract violation rather than a runtime condition.
    pub fn input_channel_ptr<S: Sample>(&self, port: usize, channel: usize) -> *mut S {
        self.channel_ptr(self.config.input_offsets[port][channel])
    }

    pub fn output_channel_ptr<S: Sample>(&self, port: usize, channel: usize) -> *mut S {
        self.channel_ptr(self.config.output_offsets[port][channel])
    }

    fn channel_ptr<S: Sample>(&self, offset: u32) -> *mut S {
        // SAFETY: offsets were validated against the region size when the
        // layout was negotiated, and slots are 8-byte aligned.
        unsafe { (*self.mmap.get()).as_mut_ptr().add(offset as usize) as *mut S }
    }

    /// Copies `data` into an input channel slot. Caller must ensure
    /// single-writer-per-slot.
    pub fn write_input_channel<S: Sample>(
        &self,
        port: usize,
        channel: usize,
        data: &[S],
    ) -> Result<()> {
        let offset = Self::offset_of(&self.config.input_offsets, port, channel)?;
        self.write_at(offset, data)
    }

    pub fn write_output_channel<S: Sample>(
        &self,
        port: usize,
        channel: usize,
        data: &[S],
    ) -> Result<()> {
        let offset = Self::offset_of(&self.config.output_offsets, port, channel)?;
        self.write_at(offset, data)
    }

    /// Copies samples out of an input channel slot into `output`.
    pub fn read_input_channel_into<S: Sample>(
        &self,
        port: usize,
        channel: usize,
        output: &mut [S],
    ) -> Result<()> {
        let offset = Self::offset_of(&self.config.input_offsets, port, channel)?;
        self.read_at(offset, output)
    }

    pub fn read_output_channel_into<S: Sample>(
        &self,
        port: usize,
        channel: usize,
        output: &mut [S],
    ) -> Result<()> {
        let offset = Self::offset_of(&self.config.output_offsets, port, channel)?;
        self.read_at(offset, output)
    }

    fn offset_of(offsets: &[Vec<u32>], port: usize, channel: usize) -> Result<usize> {
        offsets
            .get(port)
            .and_then(|channels| channels.get(channel))
            .map(|&offset| offset as usize)
            .ok_or_else(|| {
                BridgeError::SharedMemory(format!(
                    "Channel index out of bounds: port {}, channel {}",
                    port, channel
                ))
            })
    }

    fn write_at<S: Sample>(&self, offset: usize, data: &[S]) -> Result<()> {
        let byte_len = std::mem::size_of_val(data);

        // SAFETY: We ensure single-writer-per-slot at the API level
        let mmap = unsafe { &mut *self.mmap.get() };
        if offset + byte_len > mmap.len() {
            return Err(BridgeError::SharedMemory(
                "Data length exceeds buffer capacity".to_string(),
            ));
        }

        let bytes =
            unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, byte_len) };
        mmap[offset..offset + byte_len].copy_from_slice(bytes);

        Ok(())
    }

    fn read_at<S: Sample>(&self, offset: usize, output: &mut [S]) -> Result<()> {
        let byte_len = std::mem::size_of_val(output);

        // SAFETY: Reading is always safe, even with concurrent writers
        let mmap = unsafe { &*self.mmap.get() };
        if offset + byte_len > mmap.len() {
            return Err(BridgeError::SharedMemory(
                "Read length exceeds buffer capacity".to_string(),
            ));
        }

        let bytes = unsafe {
            std::slice::from_raw_parts_mut(output.as_mut_ptr() as *mut u8, byte_len)
        };
        bytes.copy_from_slice(&mmap[offset..offset + byte_len]);

        Ok(())
    }
}

impl Clone for AudioShmBuffer {
    fn clone(&self) -> Self {
        // Reopen the region (doesn't duplicate memory, just creates a new
        // mapping). Clones never own the backing file.
        Self::open(self.config.clone())
            .expect("Failed to clone AudioShmBuffer - shared memory no longer accessible")
    }
}

// SAFETY: AudioShmBuffer is Sync because:
// 1. The UnsafeCell<MmapMut> is only used for interior mutability
// 2. Writes are documented to require external synchronization (single
//    writer per channel slot, which the process cycle guarantees)
// 3. Reads are safe to call concurrently with writes (a data race on sample
//    data is acceptable for audio)
unsafe impl Sync for AudioShmBuffer {}
unsafe impl Send for AudioShmBuffer {}

impl Drop for AudioShmBuffer {
    fn drop(&mut self) {
        // Only clean up the backing file if this instance created it
        if self.owns_memory {
            let path = Self::shm_path(&self.config.name);
            debug!(name = %self.config.name, "removing shared audio region");
            let _ = std::fs::remove_file(path);
        }
    }
}

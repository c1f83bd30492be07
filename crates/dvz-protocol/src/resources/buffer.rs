// The Dat object: a typed region of device-visible memory.
//
// A dat is a buffer-backed data object: a buffer type tag, a size in
// bytes, a mappable flag, and, if `dup`, one physical copy per swapchain
// image. Built on `Device::create_buffer_with_size`/`update_memory`
// (device.rs) for the actual Vulkan buffer+memory pair, generalized from a
// single hardcoded vertex-buffer usage to the six `BufferType` variants
// the data model names.
//
// Suballocation is the default path: a dat's bytes live in a region of a
// shared `SharedBufferPool` (alloc.rs) rather than a dedicated buffer, so
// many small dats share one vkBuffer. Storage buffers requesting
// `RequestFlags::PERSISTENT_STAGING` get a dedicated allocation instead,
// since their lifetime and size profile (bulk data, long-lived) doesn't
// fit a shared pool well.

use ash::vk;

use crate::alloc::{SharedBufferPool, SubAllocation};
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::request::BufferType;
use crate::resources::lifecycle::Lifecycle;

/// Where a single physical copy's bytes live.
enum Backing {
    /// Carved out of a `SharedBufferPool` owned by the resource manager.
    Shared(SubAllocation),
    /// A dedicated buffer+memory pair, for dats that opt out of sharing.
    Standalone { buffer: vk::Buffer, memory: vk::DeviceMemory },
}

fn standalone_usage_flags(ty: BufferType) -> vk::BufferUsageFlags {
    let base = match ty {
        BufferType::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        BufferType::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferType::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferType::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferType::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferType::Indirect => vk::BufferUsageFlags::INDIRECT_BUFFER,
    };
    base | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC
}

/// One physical copy of a dat's bytes. A `dup` dat owns one per swapchain
/// image ; a non-dup dat owns exactly one.
struct Copy {
    backing: Backing,
    offset: u64,
    size: u64,
}

pub struct Dat {
    pub buffer_type: BufferType,
    pub size: u64,
    pub mappable: bool,
    pub dup: bool,
    pub standalone: bool,
    copies: Vec<Copy>,
    pub lifecycle: Lifecycle,
}

impl Dat {
    pub fn new(buffer_type: BufferType, size: u64, mappable: bool, dup: bool, standalone: bool) -> Self {
        Self {
            buffer_type,
            size,
            mappable,
            dup,
            standalone,
            copies: Vec::new(),
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Allocates the backing bytes. `image_count` is only consulted when
    /// `dup` is set. `pool` is the shared buffer for this dat's
    /// `(buffer_type, mappable)` key, absent for a standalone dat.
    pub fn create(&mut self, dev: &Device, pool: Option<&mut SharedBufferPool>, image_count: u32) -> Result<()> {
        if self.size == 0 {
            return Err(Error::new(ErrorKind::ValidationFailed, "a dat's size must be non-zero"));
        }
        let count = if self.dup { image_count.max(1) } else { 1 };

        if self.standalone {
            let flags = if self.mappable {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            } else {
                vk::MemoryPropertyFlags::DEVICE_LOCAL
            };
            for _ in 0..count {
                let (buffer, memory) =
                    dev.create_buffer_with_size(standalone_usage_flags(self.buffer_type), vk::SharingMode::EXCLUSIVE, flags, self.size);
                unsafe {
                    dev.bind_buffer_memory(buffer, memory)?;
                }
                self.copies.push(Copy {
                    backing: Backing::Standalone { buffer, memory },
                    offset: 0,
                    size: self.size,
                });
            }
        } else {
            let pool = pool.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "a shared dat requires a buffer pool"))?;
            for _ in 0..count {
                let sub = pool.alloc(dev, self.size, buffer_alignment(self.buffer_type))?;
                self.copies.push(Copy {
                    backing: Backing::Shared(sub),
                    offset: sub.offset,
                    size: sub.size,
                });
            }
        }
        self.lifecycle = self.lifecycle.advance(Lifecycle::Created)?;
        Ok(())
    }

    /// How many physical copies this dat owns: `image_count` for a `dup`
    /// dat, 1 otherwise. Lets a caller that wants to write every copy of a
    /// `dup` dat (an `UploadDat` naming no `image_index`) know how many
    /// times to call `buffer_and_offset`/`memory_and_offset`.
    pub fn copy_count(&self) -> u32 {
        self.copies.len().max(1) as u32
    }

    /// Resolves which physical copy a given swapchain image index should
    /// see.
    fn copy_for_image(&self, image_index: Option<u32>) -> &Copy {
        if self.dup {
            let idx = image_index.unwrap_or(0) as usize % self.copies.len().max(1);
            &self.copies[idx]
        } else {
            &self.copies[0]
        }
    }

    /// The vkBuffer and byte offset a caller should bind/write at for the
    /// given image index, whichever kind of backing this dat uses.
    pub fn buffer_and_offset(&self, pool: Option<&SharedBufferPool>, image_index: Option<u32>) -> (vk::Buffer, u64) {
        let copy = self.copy_for_image(image_index);
        match copy.backing {
            Backing::Standalone { buffer, .. } => (buffer, 0),
            Backing::Shared(sub) => (pool.expect("shared dat requires a pool").buffer_of(sub.generation), copy.offset),
        }
    }

    pub fn memory_and_offset(&self, pool: Option<&SharedBufferPool>, image_index: Option<u32>) -> (vk::DeviceMemory, u64) {
        let copy = self.copy_for_image(image_index);
        match copy.backing {
            Backing::Standalone { memory, .. } => (memory, 0),
            Backing::Shared(sub) => (pool.expect("shared dat requires a pool").memory_of(sub.generation), copy.offset),
        }
    }

    pub fn destroy(&mut self, dev: &Device, pool: Option<&mut SharedBufferPool>) -> Result<()> {
        self.lifecycle.require_not_destroyed()?;
        let mut pool = pool;
        for copy in self.copies.drain(..) {
            match copy.backing {
                Backing::Standalone { buffer, memory } => unsafe {
                    dev.destroy_buffer_and_memory(buffer, memory);
                },
                Backing::Shared(sub) => {
                    if let Some(p) = pool.as_deref_mut() {
                        p.free(dev, sub);
                    }
                }
            }
        }
        self.lifecycle = Lifecycle::Destroyed;
        Ok(())
    }
}

/// Standalone allocation mode: when a dat requests a non-shared buffer
/// (e.g. a large storage buffer), it receives a dedicated Vulkan buffer. A
/// dat also goes standalone when it asked to keep a persistent staging
/// allocation (`RequestFlags::PERSISTENT_STAGING`) rather than share the
/// pool, since that dat's whole point is outliving the pool's
/// generation-reaping.
const LARGE_STORAGE_THRESHOLD: u64 = 4 * 1024 * 1024;

pub fn should_be_standalone(buffer_type: BufferType, size: u64, persistent_staging: bool) -> bool {
    persistent_staging || (buffer_type == BufferType::Storage && size >= LARGE_STORAGE_THRESHOLD)
}

/// Minimum alignment a suballocation of this buffer type should respect.
/// Uniform buffers in particular are commonly bound with a dynamic offset
/// that Vulkan requires to be a multiple of `minUniformBufferOffsetAlignment`
/// on real hardware; 256 is the portable worst case used here rather than
/// querying `VkPhysicalDeviceLimits` for a single extra device call.
fn buffer_alignment(ty: BufferType) -> u64 {
    match ty {
        BufferType::Uniform => 256,
        _ => 16,
    }
}

// The suballocator backing a shared GPU buffer.
//
// One shared GPU buffer per (buffer type, mappable?) pair, grown by
// doubling when exhausted. Allocation requests are serviced from a free
// list of (offset, size) intervals, coalesced on free. When the shared
// buffer is resized, existing dat offsets remain valid: the old buffer is
// retained until no dat references it, then freed; new allocations go into
// the new larger buffer, which requires each dat to store its
// parent-buffer generation.
//
// New code: nothing upstream suballocates shared buffers (each resource
// gets its own dedicated Vulkan buffer there), so this is a hand-rolled
// free list matching the shape above rather than a pulled-in allocator
// crate, consistent with this codebase's preference for explicit,
// un-generic state over premature abstraction.

use ash::vk;

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::request::BufferType;

const INITIAL_CAPACITY: u64 = 64 * 1024;

fn usage_flags(ty: BufferType) -> vk::BufferUsageFlags {
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

/// A free interval `[offset, offset + size)` inside one generation's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    offset: u64,
    size: u64,
}

/// One physical buffer generation and the free list describing its unused
/// byte ranges. `refcount` is the number of live suballocations pointing
/// into this generation; a generation is only actually freed once its
/// refcount drops to zero and it is no longer the pool's current
/// generation, matching "old buffer is retained until no dat
/// references it".
struct Generation {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    capacity: u64,
    free: Vec<Interval>,
    refcount: u64,
}

impl Generation {
    fn new(dev: &Device, usage: vk::BufferUsageFlags, flags: vk::MemoryPropertyFlags, capacity: u64) -> Self {
        let (buffer, memory) = dev.create_buffer_with_size(usage, vk::SharingMode::EXCLUSIVE, flags, capacity);
        unsafe {
            dev.bind_buffer_memory(buffer, memory).expect("vkBindBufferMemory failed for a shared buffer generation");
        }
        Self {
            buffer,
            memory,
            capacity,
            free: vec![Interval { offset: 0, size: capacity }],
            refcount: 0,
        }
    }

    /// First-fit allocation respecting `align`. Splits the interval it is
    /// carved from; does not coalesce (that only happens on free).
    fn try_alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        for i in 0..self.free.len() {
            let interval = self.free[i];
            let aligned_offset = align_up(interval.offset, align);
            let padding = aligned_offset - interval.offset;
            if interval.size < size + padding {
                continue;
            }
            self.free.remove(i);
            let leading_waste = padding;
            if leading_waste > 0 {
                self.free.push(Interval {
                    offset: interval.offset,
                    size: leading_waste,
                });
            }
            let consumed_end = aligned_offset + size;
            let trailing = interval.offset + interval.size - consumed_end;
            if trailing > 0 {
                self.free.push(Interval {
                    offset: consumed_end,
                    size: trailing,
                });
            }
            self.refcount += 1;
            return Some(aligned_offset);
        }
        None
    }

    /// Releases `[offset, offset+size)` back to the free list, coalescing
    /// with any adjacent interval ("coalesced on free").
    fn free_range(&mut self, offset: u64, size: u64) {
        self.refcount = self.refcount.saturating_sub(1);
        self.free.push(Interval { offset, size });
        self.free.sort_by_key(|i| i.offset);
        let mut merged: Vec<Interval> = Vec::with_capacity(self.free.len());
        for iv in self.free.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.offset + last.size == iv.offset {
                    last.size += iv.size;
                    continue;
                }
            }
            merged.push(iv);
        }
        self.free = merged;
    }

    fn used_bytes(&self) -> u64 {
        self.capacity - self.free.iter().map(|i| i.size).sum::<u64>()
    }

    unsafe fn destroy(&self, dev: &Device) {
        dev.destroy_buffer_and_memory(self.buffer, self.memory);
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

/// A shared suballocated buffer for one `(BufferType, mappable)` key.
/// Generations are keyed by a monotonic id rather than a vector index, so a
/// `SubAllocation`'s `generation` stays valid even after an older,
/// now-unreferenced generation is reaped (an index would shift; an id
/// doesn't) — this is what lets a dat "store its parent-buffer generation"
/// per without the allocator invalidating that stored value
/// out from under it.
pub struct SharedBufferPool {
    usage: vk::BufferUsageFlags,
    mem_flags: vk::MemoryPropertyFlags,
    current: u64,
    generations: std::collections::HashMap<u64, Generation>,
}

/// A handle to one suballocated region, returned to the resource manager
/// and stored on the owning `Dat` so it can free the right generation.
#[derive(Debug, Clone, Copy)]
pub struct SubAllocation {
    pub generation: u64,
    pub offset: u64,
    pub size: u64,
}

impl SharedBufferPool {
    pub fn new(dev: &Device, buffer_type: BufferType, mappable: bool) -> Self {
        let mem_flags = if mappable {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let usage = usage_flags(buffer_type);
        let mut generations = std::collections::HashMap::new();
        generations.insert(0, Generation::new(dev, usage, mem_flags, INITIAL_CAPACITY));
        Self {
            usage,
            mem_flags,
            current: 0,
            generations,
        }
    }

    /// The live buffer handle for a suballocation's generation (this protocol
    /// S4.3: "new allocations go into the new larger buffer... each dat
    /// [stores] its parent-buffer generation").
    pub fn buffer_of(&self, generation: u64) -> vk::Buffer {
        self.generations[&generation].buffer
    }

    pub fn memory_of(&self, generation: u64) -> vk::DeviceMemory {
        self.generations[&generation].memory
    }

    pub fn capacity_of(&self, generation: u64) -> u64 {
        self.generations[&generation].capacity
    }

    /// The current generation's capacity, for callers (growth tests among
    /// them) that want the pool's present size without already knowing a
    /// generation id.
    pub fn current_capacity(&self) -> u64 {
        self.generations[&self.current].capacity
    }

    /// Allocates `size` bytes aligned to `align`, growing by doubling (one
    /// doubling at a time, repeated until the request fits) if the current
    /// generation cannot service it.
    pub fn alloc(&mut self, dev: &Device, size: u64, align: u64) -> Result<SubAllocation> {
        if size == 0 {
            return Err(Error::new(ErrorKind::ValidationFailed, "a dat's size must be non-zero"));
        }
        if let Some(offset) = self.generations.get_mut(&self.current).unwrap().try_alloc(size, align) {
            return Ok(SubAllocation {
                generation: self.current,
                offset,
                size,
            });
        }

        // Grow: double the capacity until the request would fit in a fresh
        // buffer, then retire the old generation (kept alive by refcount).
        let mut new_capacity = self.generations[&self.current].capacity * 2;
        while new_capacity < size {
            new_capacity *= 2;
        }
        let new_id = self.current + 1;
        let mut next = Generation::new(dev, self.usage, self.mem_flags, new_capacity);
        let offset = next
            .try_alloc(size, align)
            .ok_or_else(|| Error::new(ErrorKind::OutOfMemory, "allocation did not fit even after growth"))?;
        self.generations.insert(new_id, next);
        self.current = new_id;
        Ok(SubAllocation {
            generation: new_id,
            offset,
            size,
        })
    }

    /// Frees a region and reaps any retired (non-current) generation that
    /// has dropped to zero outstanding references.
    pub fn free(&mut self, dev: &Device, alloc: SubAllocation) {
        if let Some(gen) = self.generations.get_mut(&alloc.generation) {
            gen.free_range(alloc.offset, alloc.size);
        }
        let current = self.current;
        let reapable: Vec<u64> = self
            .generations
            .iter()
            .filter(|(id, g)| **id != current && g.refcount == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in reapable {
            if let Some(g) = self.generations.remove(&id) {
                unsafe {
                    g.destroy(dev);
                }
            }
        }
    }

    /// Total bytes reported in use across every live generation, for the
    /// property test in ("the suballocator's reported used bytes
    /// equals the sum of live dat sizes, rounded up to alignment"). A
    /// retired (non-current) generation is kept alive by `free`'s refcount
    /// check exactly because it can still have live dats in it, so summing
    /// only `self.current` would lose track of those after a growth event.
    pub fn used_bytes(&self) -> u64 {
        self.generations.values().map(|g| g.used_bytes()).sum()
    }

    pub unsafe fn destroy_all(&mut self, dev: &Device) {
        for (_, g) in self.generations.drain() {
            g.destroy(dev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_list_coalesces_adjacent_intervals() {
        let mut g = Generation {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            capacity: 100,
            free: Vec::new(),
            refcount: 0,
        };
        g.free.push(Interval { offset: 0, size: 100 });
        let a = g.try_alloc(10, 1).unwrap();
        let b = g.try_alloc(10, 1).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 10);
        g.free_range(a, 10);
        g.free_range(b, 10);
        assert_eq!(g.free.len(), 1);
        assert_eq!(g.free[0], Interval { offset: 0, size: 100 });
    }

    #[test]
    fn alignment_is_respected() {
        let mut g = Generation {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            capacity: 256,
            free: Vec::new(),
            refcount: 0,
        };
        g.free.push(Interval { offset: 0, size: 256 });
        let _ = g.try_alloc(3, 1).unwrap();
        let offset = g.try_alloc(16, 16).unwrap();
        assert_eq!(offset % 16, 0);
    }

    /// After a growth event retires the current generation (kept alive by
    /// its refcount because it still has live allocations in it),
    /// `used_bytes` must still count those, not just the new current
    /// generation's usage.
    #[test]
    fn used_bytes_sums_across_retired_and_current_generations() {
        let mut retired = Generation {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            capacity: 64,
            free: Vec::new(),
            refcount: 0,
        };
        retired.free.push(Interval { offset: 0, size: 64 });
        let _ = retired.try_alloc(32, 1).unwrap();

        let mut current = Generation {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            capacity: 128,
            free: Vec::new(),
            refcount: 0,
        };
        current.free.push(Interval { offset: 0, size: 128 });
        let _ = current.try_alloc(16, 1).unwrap();

        let mut generations = std::collections::HashMap::new();
        generations.insert(0u64, retired);
        generations.insert(1u64, current);

        let pool = SharedBufferPool {
            usage: vk::BufferUsageFlags::empty(),
            mem_flags: vk::MemoryPropertyFlags::empty(),
            current: 1,
            generations,
        };

        assert_eq!(pool.used_bytes(), 32 + 16, "used_bytes must include the retired generation's live allocation, not just the current one");
    }
}

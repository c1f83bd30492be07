// The transfer engine: host <-> device copy orchestration.
//
// Three paths: (1) a direct mapped write for a mappable dat, (2) a staged
// upload through an intermediate host-visible buffer for a device-local
// dat, optionally keeping that staging buffer alive across calls, (3) a
// per-image-deferred upload that applies once a swapchain image is about
// to be reused. Built on the existing copy-queue machinery in `device.rs`
// (`DeviceInternal::transfer_queue`, `copy_cmd_pool`, `copy_cbuf`,
// `copy_timeline_sema`) — the same queue and command buffer already
// exposed for `update_image_from_data`, reused here for buffer-to-buffer
// copies instead of only image uploads.

use ash::vk;

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::id::Id;
use crate::manager::ResourceManager;
use crate::resources::ResourceObject;

struct StagingBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    capacity: u64,
}

/// Orchestrates host<->device copies for `Dat`s and `Tex`es. Owns the
/// optional persistent staging buffer (`RequestFlags::PERSISTENT_STAGING`)
/// and the per-image deferred queue.
pub struct TransferEngine {
    persistent_staging: Option<StagingBuffer>,
    deferred: Vec<DeferredUpload>,
}

struct DeferredUpload {
    dat: Id,
    image_index: u32,
    offset: u64,
    bytes: Vec<u8>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self {
            persistent_staging: None,
            deferred: Vec::new(),
        }
    }

    fn ensure_staging(&mut self, dev: &Device, size: u64, keep: bool) -> (vk::Buffer, vk::DeviceMemory, bool) {
        if let Some(staging) = &self.persistent_staging {
            if staging.capacity >= size {
                return (staging.buffer, staging.memory, false);
            }
            let old = self.persistent_staging.take().unwrap();
            unsafe {
                dev.destroy_buffer_and_memory(old.buffer, old.memory);
            }
        }
        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let (buffer, memory) = dev.create_buffer_with_size(
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            vk::SharingMode::EXCLUSIVE,
            flags,
            size,
        );
        unsafe {
            let _ = dev.bind_buffer_memory(buffer, memory);
        }
        if keep {
            self.persistent_staging = Some(StagingBuffer { buffer, memory, capacity: size });
            (buffer, memory, false)
        } else {
            (buffer, memory, true)
        }
    }

    fn copy_buffer_to_buffer(&self, dev: &Device, src: vk::Buffer, src_offset: u64, dst: vk::Buffer, dst_offset: u64, size: u64, wait: bool) {
        let internal = dev.d_internal.clone();
        let guard = internal.write().unwrap();
        dev.cbuf_begin_recording(guard.copy_cbuf, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            dev.dev.cmd_copy_buffer(guard.copy_cbuf, src, dst, &[region]);
        }
        dev.cbuf_end_recording(guard.copy_cbuf);
        drop(guard);
        dev.copy_cbuf_submit_async();
        if wait {
            dev.wait_for_copy();
        }
    }

    /// Uploads `bytes` at `offset` into `dat` (`UploadDat`). `image_index`
    /// only matters for a `dup` dat: `None` writes the bytes to every
    /// physical copy (so a plain upload against a `dup` dat behaves like
    /// an upload to a regular one), `Some(i)` targets just copy `i` and,
    /// unless `wait` forces it through now, defers the write to just
    /// before image `i` is next reused.
    pub fn upload(
        &mut self,
        dev: &Device,
        manager: &ResourceManager,
        dat: Id,
        offset: u64,
        bytes: &[u8],
        image_index: Option<u32>,
        wait: bool,
        persistent_staging: bool,
    ) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if !wait {
            if let Some(idx) = image_index {
                self.deferred.push(DeferredUpload {
                    dat,
                    image_index: idx,
                    offset,
                    bytes: bytes.to_vec(),
                });
                return Ok(());
            }
        }
        self.upload_now(dev, manager, dat, offset, bytes, image_index, wait, persistent_staging)
    }

    /// Writes `bytes` into `dat`, broadcasting to every physical copy when
    /// `dat` is `dup` and `image_index` is `None`.
    fn upload_now(
        &mut self,
        dev: &Device,
        manager: &ResourceManager,
        dat: Id,
        offset: u64,
        bytes: &[u8],
        image_index: Option<u32>,
        wait: bool,
        persistent_staging: bool,
    ) -> Result<()> {
        let (dup, copy_count) = {
            let object = manager.get(dat)?;
            match &*object {
                ResourceObject::Dat(d) => (d.dup, d.copy_count()),
                _ => return Err(Error::new(ErrorKind::ValidationFailed, "UploadDat target is not a dat")),
            }
        };

        if dup && image_index.is_none() {
            for idx in 0..copy_count {
                self.write_one_copy(dev, manager, dat, offset, bytes, Some(idx), wait, persistent_staging)?;
            }
            return Ok(());
        }

        self.write_one_copy(dev, manager, dat, offset, bytes, image_index, wait, persistent_staging)
    }

    fn write_one_copy(
        &mut self,
        dev: &Device,
        manager: &ResourceManager,
        dat: Id,
        offset: u64,
        bytes: &[u8],
        image_index: Option<u32>,
        wait: bool,
        persistent_staging: bool,
    ) -> Result<()> {
        let object = manager.get(dat)?;
        let dat_ref = match &*object {
            ResourceObject::Dat(d) => d,
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "UploadDat target is not a dat")),
        };
        let pool = manager.pool_for_ref(dat_ref.buffer_type, dat_ref.mappable);
        let (dst_buffer, dst_base) = dat_ref.buffer_and_offset(pool, image_index);

        if dat_ref.mappable {
            let (memory, mem_base) = dat_ref.memory_and_offset(pool, image_index);
            let _ = dst_buffer;
            dev.update_memory(memory, (mem_base + offset) as isize, bytes);
            return Ok(());
        }

        let (staging, staging_mem, transient) = self.ensure_staging(dev, bytes.len() as u64, persistent_staging);
        dev.update_memory(staging_mem, 0, bytes);
        self.copy_buffer_to_buffer(dev, staging, 0, dst_buffer, dst_base + offset, bytes.len() as u64, wait);
        if transient {
            unsafe {
                dev.destroy_buffer_and_memory(staging, staging_mem);
            }
        }
        Ok(())
    }

    /// Reads `size` bytes back from `dat` starting at `offset`
    /// (`DownloadDat`). `image_index` selects which physical copy of a
    /// `dup` dat to read (`None` means copy 0); ignored for a non-`dup`
    /// dat. Always waits for the copy to land, since the bytes are handed
    /// straight back to the caller.
    pub fn download(&mut self, dev: &Device, manager: &ResourceManager, dat: Id, offset: u64, size: u64, image_index: Option<u32>) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let object = manager.get(dat)?;
        let dat_ref = match &*object {
            ResourceObject::Dat(d) => d,
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "DownloadDat target is not a dat")),
        };
        let pool = manager.pool_for_ref(dat_ref.buffer_type, dat_ref.mappable);
        let (src_buffer, src_base) = dat_ref.buffer_and_offset(pool, image_index);

        if dat_ref.mappable {
            let (memory, mem_base) = dat_ref.memory_and_offset(pool, image_index);
            return Ok(dev.read_memory(memory, (mem_base + offset) as u64, size));
        }

        let (staging, staging_mem, _) = self.ensure_staging(dev, size, false);
        self.copy_buffer_to_buffer(dev, src_buffer, src_base + offset, staging, 0, size, true);
        let bytes = dev.read_memory(staging_mem, 0, size);
        unsafe {
            dev.destroy_buffer_and_memory(staging, staging_mem);
        }
        Ok(bytes)
    }

    /// Copies `size` bytes from `src` to `dst`, device-side, with no host
    /// staging step.
    pub fn copy(&self, dev: &Device, manager: &ResourceManager, src: Id, dst: Id, size: u64, wait: bool) -> Result<()> {
        let src_obj = manager.get(src)?;
        let src_dat = match &*src_obj {
            ResourceObject::Dat(d) => d,
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "copy source is not a dat")),
        };
        let src_pool = manager.pool_for_ref(src_dat.buffer_type, src_dat.mappable);
        let (src_buffer, src_base) = src_dat.buffer_and_offset(src_pool, None);
        drop(src_obj);

        let dst_obj = manager.get(dst)?;
        let dst_dat = match &*dst_obj {
            ResourceObject::Dat(d) => d,
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "copy destination is not a dat")),
        };
        let dst_pool = manager.pool_for_ref(dst_dat.buffer_type, dst_dat.mappable);
        let (dst_buffer, dst_base) = dst_dat.buffer_and_offset(dst_pool, None);

        self.copy_buffer_to_buffer(dev, src_buffer, src_base, dst_buffer, dst_base, size, wait);
        Ok(())
    }

    /// Applies every deferred upload queued for `image_index`, called once
    /// per frame by the presenter right before that image is reused (the
    /// per-image-deferred upload path).
    pub fn drain_deferred(&mut self, dev: &Device, manager: &ResourceManager, image_index: u32) -> Result<()> {
        let ready: Vec<DeferredUpload> = {
            let mut remaining = Vec::new();
            let mut ready = Vec::new();
            for item in self.deferred.drain(..) {
                if item.image_index == image_index {
                    ready.push(item);
                } else {
                    remaining.push(item);
                }
            }
            self.deferred = remaining;
            ready
        };
        for item in ready {
            self.upload_now(dev, manager, item.dat, item.offset, &item.bytes, Some(item.image_index), true, false)?;
        }
        Ok(())
    }

    pub unsafe fn destroy(&mut self, dev: &Device) {
        if let Some(staging) = self.persistent_staging.take() {
            dev.destroy_buffer_and_memory(staging.buffer, staging.memory);
        }
        self.deferred.clear();
    }
}

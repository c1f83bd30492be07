// A command pool plus one command buffer per swapchain image.
//
// `Device::create_command_pool`/`create_command_buffers` (device.rs)
// already exist as small factory functions; this module just gives
// canvas.rs and the recorder a place to own the per-canvas pool instead of
// re-deriving it inline.

use ash::vk;

use crate::device::Device;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    pub fn new(dev: &Device, queue_family: u32, image_count: u32) -> Self {
        let pool = dev.create_command_pool(queue_family);
        let buffers = dev.create_command_buffers(pool, image_count);
        Self { pool, buffers }
    }

    pub fn resize(&mut self, dev: &Device, image_count: u32) {
        unsafe {
            dev.dev.free_command_buffers(self.pool, &self.buffers);
        }
        self.buffers = dev.create_command_buffers(self.pool, image_count);
    }

    pub fn destroy(&mut self, dev: &Device) {
        unsafe {
            dev.dev.free_command_buffers(self.pool, &self.buffers);
            dev.dev.destroy_command_pool(self.pool, None);
        }
        self.buffers.clear();
    }
}

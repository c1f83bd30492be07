// The Tex object: a typed, device-resident image.
//
// A tex is an image object: a format, a dimensionality (1D/2D/3D with
// extents), and a device-local allocation. Built on `Device::create_image`
// (device.rs), generalized here (via `Device::create_image_generic`) from
// one hardcoded 2D color image to the three `TexDims` shapes and eight
// `TexFormat` variants the data model names.

use ash::vk;

use crate::device::Device;
use crate::error::Result;
use crate::protocol::request::{TexDims, TexFormat};
use crate::resources::lifecycle::Lifecycle;

pub fn vk_format(format: TexFormat) -> vk::Format {
    match format {
        TexFormat::R8Unorm => vk::Format::R8_UNORM,
        TexFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TexFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TexFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TexFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TexFormat::R32Sfloat => vk::Format::R32_SFLOAT,
        TexFormat::Rgba32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
        TexFormat::D32Sfloat => vk::Format::D32_SFLOAT,
    }
}

fn vk_extent_and_type(dims: TexDims) -> (vk::Extent3D, vk::ImageType) {
    match dims {
        TexDims::D1(w) => (
            vk::Extent3D { width: w, height: 1, depth: 1 },
            vk::ImageType::TYPE_1D,
        ),
        TexDims::D2(w, h) => (
            vk::Extent3D { width: w, height: h, depth: 1 },
            vk::ImageType::TYPE_2D,
        ),
        TexDims::D3(w, h, d) => (
            vk::Extent3D { width: w, height: h, depth: d },
            vk::ImageType::TYPE_3D,
        ),
    }
}

fn is_depth_format(format: TexFormat) -> bool {
    matches!(format, TexFormat::D32Sfloat)
}

pub struct Tex {
    pub format: TexFormat,
    pub dims: TexDims,
    pub image: vk::Image,
    pub view: vk::ImageView,
    memory: vk::DeviceMemory,
    pub lifecycle: Lifecycle,
}

impl Tex {
    pub fn new(format: TexFormat, dims: TexDims) -> Self {
        Self {
            format,
            dims,
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            memory: vk::DeviceMemory::null(),
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    pub fn create(&mut self, dev: &Device) -> Result<()> {
        let (extent, image_type) = vk_extent_and_type(self.dims);
        let (aspect, usage) = if is_depth_format(self.format) {
            (vk::ImageAspectFlags::DEPTH, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        } else {
            (
                vk::ImageAspectFlags::COLOR,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
            )
        };
        let (image, view, memory) = dev.create_image_generic(
            image_type,
            extent,
            vk_format(self.format),
            usage,
            aspect,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageTiling::OPTIMAL,
        );
        self.image = image;
        self.view = view;
        self.memory = memory;
        self.lifecycle = self.lifecycle.advance(Lifecycle::Created)?;
        Ok(())
    }

    /// Uploads `bytes` into the whole image (`UploadTex`),
    /// currently only meaningful for 2D color textures since that is the
    /// only path the transfer engine's staged upload supports.
    pub fn upload(&self, dev: &Device, bytes: &[u8]) -> Result<()> {
        let (w, h) = match self.dims {
            TexDims::D2(w, h) => (w, h),
            TexDims::D1(w) => (w, 1),
            TexDims::D3(w, h, _) => (w, h),
        };
        dev.update_image_from_data(self.image, bytes, w, h, 0)
    }

    pub fn destroy(&mut self, dev: &Device) -> Result<()> {
        self.lifecycle.require_not_destroyed()?;
        unsafe {
            dev.dev.destroy_image_view(self.view, None);
            dev.dev.destroy_image(self.image, None);
            dev.free_memory(self.memory);
        }
        self.lifecycle = Lifecycle::Destroyed;
        Ok(())
    }
}

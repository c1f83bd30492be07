// The canvas: a render target plus its swapchain, render pass,
// framebuffers, per-image command buffers, and the recorder replayed into
// them.
//
// Two backing modes: `Swapchain`, a real windowed `VkSwapchainKHR`
// presenting to a `vk::SurfaceKHR` the window backend created, and
// `Offscreen`, a small ring of plain device-local images with no
// presentation at all (grounded on `thundr/src/display/headless.rs`,
// which allocates two 640x480 `B8G8R8A8_UNORM` images with no surface or
// swapchain object). The render pass/framebuffer shape — one color
// attachment (CLEAR -> STORE), one depth attachment (CLEAR), one subpass,
// one `SUBPASS_EXTERNAL` dependency gating `COLOR_ATTACHMENT_OUTPUT` — is
// carried over near verbatim from `thundr/src/pipelines/geometric.rs`'s
// `create_pass`/`create_framebuffers`, generalized so the color
// attachment's final layout and format depend on which mode the canvas is
// in instead of always being the swapchain's own surface format.
//
// Owns the per-image dirty bitmask (`DirtyMask`): the recorder itself
// holds only the ordered command list, since "which images still need
// the list replayed into them" is swapchain-image bookkeeping, not a
// command-list concept.

use ash::extensions::khr;
use ash::vk;

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::instance::Instance;
use crate::manager::ResourceManager;
use crate::recorder::Recorder;
use crate::resources::command_pool::CommandPool;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
const OFFSCREEN_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// A bit-per-image record of which swapchain images still hold a stale
/// recorder replay. Set for every image whenever the recorder's command
/// list changes; cleared for one image once that image's command buffer
/// has been re-recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirtyMask(u32);

impl DirtyMask {
    pub fn mark_all(&mut self, image_count: u32) {
        self.0 = if image_count >= 32 { u32::MAX } else { (1u32 << image_count) - 1 };
    }

    pub fn is_dirty(&self, image_index: u32) -> bool {
        self.0 & (1 << image_index) != 0
    }

    pub fn clear(&mut self, image_index: u32) {
        self.0 &= !(1 << image_index);
    }
}

/// The outcome of acquiring the next image to render into, mirroring the
/// three cases a presenter must branch on: render normally, render but
/// also schedule a resize, or stop presenting until a resize happens.
pub enum AcquireOutcome {
    Success(u32),
    Suboptimal(u32),
    OutOfDate,
    Invalid,
}

pub enum PresentOutcome {
    Success,
    Suboptimal,
    OutOfDate,
}

struct SwapchainState {
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
}

enum Mode {
    Swapchain(SwapchainState),
    Offscreen { memories: Vec<vk::DeviceMemory>, next_image: u32 },
}

pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
    pub image_count: u32,
    mode: Mode,

    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth_image: vk::Image,
    depth_view: vk::ImageView,
    depth_memory: vk::DeviceMemory,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    cmd_pool: CommandPool,

    pub dirty: DirtyMask,
    pub recorder: Recorder,

    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    pub in_flight_points: Vec<u64>,
    pub current_slot: usize,
    frames_in_flight: u32,
}

impl Canvas {
    pub fn new_windowed(
        dev: &Device,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        clear_color: [f32; 4],
        image_count: u32,
        frames_in_flight: u32,
    ) -> Result<Self> {
        let surface_loader = khr::Surface::new(&instance.loader, &instance.inst);
        let swapchain_loader = khr::Swapchain::new(&instance.inst, &dev.dev);

        let supported = unsafe {
            surface_loader
                .get_physical_device_surface_support(dev.pdev, dev.graphics_queue_family(), surface)
                .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkGetPhysicalDeviceSurfaceSupportKHR failed: {:?}", e)))?
        };
        if !supported {
            return Err(Error::new(ErrorKind::DeviceInit, "chosen queue family cannot present to this surface"));
        }

        let format = Self::select_surface_format(&surface_loader, surface, dev.pdev)?;
        let present_mode = Self::select_present_mode(&surface_loader, surface, dev.pdev)?;

        let mut state = SwapchainState {
            surface,
            surface_loader,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            format,
            present_mode,
        };

        let (extent, images, views) = Self::create_swapchain(dev, &mut state, width, height, image_count)?;
        let (depth_image, depth_view, depth_memory) = Self::create_depth(dev, extent);
        let render_pass = Self::create_render_pass(dev, state.format.format, vk::ImageLayout::PRESENT_SRC_KHR);
        let framebuffers = Self::create_framebuffers(dev, render_pass, extent, &views, depth_view);
        let cmd_pool = CommandPool::new(dev, dev.graphics_queue_family(), views.len() as u32);

        let mut dirty = DirtyMask::default();
        dirty.mark_all(views.len() as u32);

        let (image_available, render_finished) = Self::create_frame_semaphores(dev, frames_in_flight);

        Ok(Self {
            width: extent.width,
            height: extent.height,
            clear_color,
            image_count: views.len() as u32,
            mode: Mode::Swapchain(state),
            images,
            views,
            depth_image,
            depth_view,
            depth_memory,
            render_pass,
            framebuffers,
            cmd_pool,
            dirty,
            recorder: Recorder::new(),
            image_available,
            render_finished,
            in_flight_points: vec![0; frames_in_flight as usize],
            current_slot: 0,
            frames_in_flight,
        })
    }

    /// A canvas with no real surface or swapchain, used for tests and the
    /// headless CLI backend: a small ring of plain device-local images
    /// rendered into but never presented.
    pub fn new_offscreen(dev: &Device, width: u32, height: u32, clear_color: [f32; 4], image_count: u32, frames_in_flight: u32) -> Result<Self> {
        let extent = vk::Extent2D { width, height };
        let mut images = Vec::new();
        let mut views = Vec::new();
        let mut memories = Vec::new();
        for _ in 0..image_count.max(1) {
            let (image, view, memory) = dev.create_image(
                &extent,
                OFFSCREEN_FORMAT,
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
                vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
                vk::ImageTiling::LINEAR,
            );
            images.push(image);
            views.push(view);
            memories.push(memory);
        }

        let (depth_image, depth_view, depth_memory) = Self::create_depth(dev, extent);
        let render_pass = Self::create_render_pass(dev, OFFSCREEN_FORMAT, vk::ImageLayout::GENERAL);
        let framebuffers = Self::create_framebuffers(dev, render_pass, extent, &views, depth_view);
        let cmd_pool = CommandPool::new(dev, dev.graphics_queue_family(), views.len() as u32);

        let mut dirty = DirtyMask::default();
        dirty.mark_all(views.len() as u32);

        Ok(Self {
            width,
            height,
            clear_color,
            image_count: views.len() as u32,
            mode: Mode::Offscreen { memories, next_image: 0 },
            images,
            views,
            depth_image,
            depth_view,
            depth_memory,
            render_pass,
            framebuffers,
            cmd_pool,
            dirty,
            recorder: Recorder::new(),
            image_available: Vec::new(),
            render_finished: Vec::new(),
            in_flight_points: vec![0; frames_in_flight as usize],
            current_slot: 0,
            frames_in_flight,
        })
    }

    fn select_surface_format(loader: &khr::Surface, surface: vk::SurfaceKHR, pdev: vk::PhysicalDevice) -> Result<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            loader
                .get_physical_device_surface_formats(pdev, surface)
                .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkGetPhysicalDeviceSurfaceFormatsKHR failed: {:?}", e)))?
        };
        formats
            .iter()
            .map(|fmt| match fmt.format {
                vk::Format::UNDEFINED => vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: fmt.color_space,
                },
                _ => *fmt,
            })
            .next()
            .ok_or_else(|| Error::new(ErrorKind::DeviceInit, "surface exposes no formats"))
    }

    fn select_present_mode(loader: &khr::Surface, surface: vk::SurfaceKHR, pdev: vk::PhysicalDevice) -> Result<vk::PresentModeKHR> {
        let modes = unsafe {
            loader
                .get_physical_device_surface_present_modes(pdev, surface)
                .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkGetPhysicalDeviceSurfacePresentModesKHR failed: {:?}", e)))?
        };
        Ok(modes.into_iter().find(|m| *m == vk::PresentModeKHR::FIFO).unwrap_or(vk::PresentModeKHR::FIFO))
    }

    fn create_swapchain(
        dev: &Device,
        state: &mut SwapchainState,
        width: u32,
        height: u32,
        requested_image_count: u32,
    ) -> Result<(vk::Extent2D, Vec<vk::Image>, Vec<vk::ImageView>)> {
        let caps = unsafe {
            state
                .surface_loader
                .get_physical_device_surface_capabilities(dev.pdev, state.surface)
                .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkGetPhysicalDeviceSurfaceCapabilitiesKHR failed: {:?}", e)))?
        };

        let mut image_count = requested_image_count.max(caps.min_image_count);
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let transform = if caps.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(state.surface)
            .min_image_count(image_count)
            .image_color_space(state.format.color_space)
            .image_format(state.format.format)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(state.present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(state.swapchain);

        let new_swapchain = unsafe {
            state
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| Error::new(ErrorKind::SwapchainLost, format!("vkCreateSwapchainKHR failed: {:?}", e)))?
        };
        if state.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                state.swapchain_loader.destroy_swapchain(state.swapchain, None);
            }
        }
        state.swapchain = new_swapchain;

        let images = unsafe {
            state
                .swapchain_loader
                .get_swapchain_images(state.swapchain)
                .map_err(|e| Error::new(ErrorKind::SwapchainLost, format!("vkGetSwapchainImagesKHR failed: {:?}", e)))?
        };
        let mut views = Vec::with_capacity(images.len());
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(state.format.format)
                .image(*image)
                .subresource_range(
                    vk::ImageSubresourceRange::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1)
                        .build(),
                );
            let view = unsafe {
                dev.dev
                    .create_image_view(&view_info, None)
                    .map_err(|e| Error::new(ErrorKind::SwapchainLost, format!("vkCreateImageView failed: {:?}", e)))?
            };
            views.push(view);
        }

        Ok((extent, images, views))
    }

    fn create_depth(dev: &Device, extent: vk::Extent2D) -> (vk::Image, vk::ImageView, vk::DeviceMemory) {
        dev.create_image(
            &extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageTiling::OPTIMAL,
        )
    }

    /// One color attachment (CLEAR -> STORE, `UNDEFINED` -> `final_layout`),
    /// one depth attachment (CLEAR), one subpass, one `SUBPASS_EXTERNAL`
    /// dependency gating color attachment writes on a prior presentation
    /// read completing.
    fn create_render_pass(dev: &Device, color_format: vk::Format, final_layout: vk::ImageLayout) -> vk::RenderPass {
        let attachments = [
            vk::AttachmentDescription {
                format: color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: DEPTH_FORMAT,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ..Default::default()
        }];

        let subpasses = [vk::SubpassDescription::builder()
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { dev.dev.create_render_pass(&create_info, None).expect("vkCreateRenderPass failed") }
    }

    fn create_framebuffers(dev: &Device, pass: vk::RenderPass, extent: vk::Extent2D, views: &[vk::ImageView], depth_view: vk::ImageView) -> Vec<vk::Framebuffer> {
        views
            .iter()
            .map(|&view| {
                let attachments = [view, depth_view];
                let info = vk::FramebufferCreateInfo::builder()
                    .render_pass(pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                unsafe { dev.dev.create_framebuffer(&info, None).expect("vkCreateFramebuffer failed") }
            })
            .collect()
    }

    fn create_frame_semaphores(dev: &Device, frames_in_flight: u32) -> (Vec<vk::Semaphore>, Vec<vk::Semaphore>) {
        let info = vk::SemaphoreCreateInfo::builder();
        let make = || unsafe { dev.dev.create_semaphore(&info, None).expect("vkCreateSemaphore failed") };
        let available: Vec<vk::Semaphore> = (0..frames_in_flight).map(|_| make()).collect();
        let finished: Vec<vk::Semaphore> = (0..frames_in_flight).map(|_| make()).collect();
        (available, finished)
    }

    /// Blocks until this in-flight slot's previous submission has
    /// retired, the fence-free substitute for "wait render-finished fence
    /// for current slot".
    pub fn wait_current_slot(&self, dev: &Device) {
        dev.wait_for_timeline_point(self.in_flight_points[self.current_slot]);
    }

    pub fn acquire(&mut self, dev: &Device) -> Result<AcquireOutcome> {
        match &self.mode {
            Mode::Swapchain(state) => {
                let sema = self.image_available[self.current_slot];
                let result = unsafe { state.swapchain_loader.acquire_next_image(state.swapchain, u64::MAX, sema, vk::Fence::null()) };
                match result {
                    Ok((idx, suboptimal)) => {
                        if suboptimal {
                            Ok(AcquireOutcome::Suboptimal(idx))
                        } else {
                            Ok(AcquireOutcome::Success(idx))
                        }
                    }
                    Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
                    Err(_) => Ok(AcquireOutcome::Invalid),
                }
            }
            Mode::Offscreen { next_image, .. } => {
                let idx = *next_image;
                if let Mode::Offscreen { next_image, .. } = &mut self.mode {
                    *next_image = (*next_image + 1) % self.image_count.max(1);
                }
                let _ = dev;
                Ok(AcquireOutcome::Success(idx))
            }
        }
    }

    /// Re-records `image_index`'s command buffer from the recorder's
    /// command list if that image's dirty bit is set, then clears it.
    pub fn record_if_dirty(&mut self, dev: &Device, manager: &ResourceManager, image_index: u32) -> Result<()> {
        self.recorder.refresh_bindings_for_image(dev, manager, image_index)?;
        if !self.dirty.is_dirty(image_index) {
            return Ok(());
        }
        let cbuf = self.cmd_pool.buffers[image_index as usize];
        let extent = vk::Extent2D { width: self.width, height: self.height };

        dev.cbuf_begin_recording(cbuf, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear_color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent })
            .clear_values(&clears);
        unsafe {
            dev.dev.cmd_begin_render_pass(cbuf, &begin_info, vk::SubpassContents::INLINE);
        }
        self.recorder.replay(dev, manager, cbuf, extent, image_index)?;
        unsafe {
            dev.dev.cmd_end_render_pass(cbuf);
        }
        dev.cbuf_end_recording(cbuf);
        self.dirty.clear(image_index);
        Ok(())
    }

    /// Submits `image_index`'s command buffer, waiting on this slot's
    /// image-available semaphore at `COLOR_ATTACHMENT_OUTPUT` and
    /// signaling its render-finished semaphore (swapchain mode only —
    /// an offscreen canvas has no acquire/present to pace against, so it
    /// submits with no binary semaphores and only the device timeline).
    /// Returns the timeline point this submission reached so the caller
    /// can record it into `in_flight_points`.
    pub fn submit(&self, dev: &Device, image_index: u32) -> u64 {
        let cbuf = self.cmd_pool.buffers[image_index as usize];
        let queue = dev.graphics_queue();
        match &self.mode {
            Mode::Swapchain(_) => {
                let wait = [self.image_available[self.current_slot]];
                let signal = [self.render_finished[self.current_slot]];
                dev.cbuf_submit_async(cbuf, queue, &wait, &signal)
            }
            Mode::Offscreen { .. } => dev.cbuf_submit_async(cbuf, queue, &[], &[]),
        }
    }

    /// Presents `image_index` (a no-op returning `Success` for an
    /// offscreen canvas, which has nothing to present to).
    pub fn present(&self, dev: &Device, image_index: u32) -> Result<PresentOutcome> {
        match &self.mode {
            Mode::Swapchain(state) => {
                let wait = [self.render_finished[self.current_slot]];
                let swapchains = [state.swapchain];
                let indices = [image_index];
                let present_info = vk::PresentInfoKHR::builder().wait_semaphores(&wait).swapchains(&swapchains).image_indices(&indices);
                let result = unsafe { state.swapchain_loader.queue_present(dev.graphics_queue(), &present_info) };
                match result {
                    Ok(false) => Ok(PresentOutcome::Success),
                    Ok(true) => Ok(PresentOutcome::Suboptimal),
                    Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
                    Err(e) => Err(Error::new(ErrorKind::SwapchainLost, format!("vkQueuePresentKHR failed: {:?}", e))),
                }
            }
            Mode::Offscreen { .. } => Ok(PresentOutcome::Success),
        }
    }

    pub fn advance_slot(&mut self) {
        self.current_slot = (self.current_slot + 1) % self.frames_in_flight as usize;
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty.mark_all(self.image_count);
    }

    pub fn is_windowed(&self) -> bool {
        matches!(self.mode, Mode::Swapchain(_))
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D { width: self.width, height: self.height }
    }

    /// Reads the color attachment of `image_index` back into host memory,
    /// 4 bytes per pixel (`OFFSCREEN_FORMAT`/swapchain formats are both
    /// 8-bit-per-channel four-component). Used by the S1/S2 end-to-end
    /// scenarios to verify rendered pixel values; not part of the
    /// protocol's request surface since it is a test/debug affordance,
    /// not something the scene layer needs per frame.
    pub fn read_color_pixels(&self, dev: &Device, image_index: u32) -> Result<Vec<u8>> {
        let image = *self
            .images
            .get(image_index as usize)
            .ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "image_index out of range for this canvas"))?;
        let layout = match &self.mode {
            Mode::Swapchain(_) => vk::ImageLayout::PRESENT_SRC_KHR,
            Mode::Offscreen { .. } => vk::ImageLayout::GENERAL,
        };
        dev.download_image_to_data(image, self.width, self.height, 4, layout)
    }

    /// Rebuilds the swapchain (or, for an offscreen canvas, the plain
    /// image ring) at a new size and marks every image dirty again.
    pub fn resize(&mut self, dev: &Device, width: u32, height: u32) -> Result<()> {
        self.destroy_sized_resources(dev);
        match &mut self.mode {
            Mode::Swapchain(state) => {
                let (extent, images, views) = Self::create_swapchain(dev, state, width, height, self.image_count)?;
                self.width = extent.width;
                self.height = extent.height;
                self.images = images;
                self.views = views;
            }
            Mode::Offscreen { memories, next_image } => {
                let extent = vk::Extent2D { width, height };
                let mut images = Vec::new();
                let mut views = Vec::new();
                memories.clear();
                for _ in 0..self.image_count.max(1) {
                    let (image, view, memory) = dev.create_image(
                        &extent,
                        OFFSCREEN_FORMAT,
                        vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                        vk::ImageAspectFlags::COLOR,
                        vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
                        vk::ImageTiling::LINEAR,
                    );
                    images.push(image);
                    views.push(view);
                    memories.push(memory);
                }
                self.width = width;
                self.height = height;
                self.images = images;
                self.views = views;
                *next_image = 0;
            }
        }

        let extent = vk::Extent2D { width: self.width, height: self.height };
        let (depth_image, depth_view, depth_memory) = Self::create_depth(dev, extent);
        self.depth_image = depth_image;
        self.depth_view = depth_view;
        self.depth_memory = depth_memory;

        let color_format = match &self.mode {
            Mode::Swapchain(state) => state.format.format,
            Mode::Offscreen { .. } => OFFSCREEN_FORMAT,
        };
        let final_layout = match &self.mode {
            Mode::Swapchain(_) => vk::ImageLayout::PRESENT_SRC_KHR,
            Mode::Offscreen { .. } => vk::ImageLayout::GENERAL,
        };
        self.render_pass = Self::create_render_pass(dev, color_format, final_layout);
        self.framebuffers = Self::create_framebuffers(dev, self.render_pass, extent, &self.views, self.depth_view);
        self.cmd_pool.resize(dev, self.views.len() as u32);
        self.image_count = self.views.len() as u32;
        self.mark_all_dirty();
        Ok(())
    }

    fn destroy_sized_resources(&mut self, dev: &Device) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                dev.dev.destroy_framebuffer(fb, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                dev.dev.destroy_render_pass(self.render_pass, None);
            }
            dev.dev.destroy_image_view(self.depth_view, None);
            dev.dev.destroy_image(self.depth_image, None);
            dev.free_memory(self.depth_memory);
            match &mut self.mode {
                Mode::Swapchain(_) => {
                    for view in self.views.drain(..) {
                        dev.dev.destroy_image_view(view, None);
                    }
                    self.images.clear();
                }
                Mode::Offscreen { memories, .. } => {
                    for view in self.views.drain(..) {
                        dev.dev.destroy_image_view(view, None);
                    }
                    for image in self.images.drain(..) {
                        dev.dev.destroy_image(image, None);
                    }
                    for mem in memories.drain(..) {
                        dev.free_memory(mem);
                    }
                }
            }
        }
    }

    pub fn destroy(&mut self, dev: &Device) {
        self.destroy_sized_resources(dev);
        self.cmd_pool.destroy(dev);
        unsafe {
            for sema in self.image_available.drain(..) {
                dev.dev.destroy_semaphore(sema, None);
            }
            for sema in self.render_finished.drain(..) {
                dev.dev.destroy_semaphore(sema, None);
            }
            if let Mode::Swapchain(state) = &mut self.mode {
                if state.swapchain != vk::SwapchainKHR::null() {
                    state.swapchain_loader.destroy_swapchain(state.swapchain, None);
                }
                state.surface_loader.destroy_surface(state.surface, None);
            }
        }
    }
}

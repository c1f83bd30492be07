// The dispatcher: sole mutator of the resource manager, the per-canvas
// recorder registry, and the transfer engine.
//
// `Batch::into_requests` hands the dispatcher an ordered `Vec<Request>`;
// `submit` walks it, validating and applying one request at a time as an
// exhaustive match on `(action, object kind)`. A request that fails
// validation is skipped and logged (`dvz_utils::log::error!`); later
// requests in the batch still run, matching `spec.md` §4.5's "requests
// are independent unless they explicitly reference each other's
// newly-created IDs" rule — a later request naming an earlier one that
// failed to create will itself fail with `StaleReference`, which is the
// enforcement mechanism for that ordering rule.
//
// `ResourceObject` (resources/mod.rs) has no `Canvas` variant: a canvas's
// lifecycle (swapchain recreation, presentation, a command-buffer ring)
// doesn't fit the same sum type as the five GPU-handle-shaped L2
// objects, so canvases live in their own `HashMap<Id, Canvas>` here
// instead (see DESIGN.md).

use std::collections::HashMap;

use ash::vk;

use dvz_utils::log;

use crate::canvas::Canvas;
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::fatal;
use crate::id::Id;
use crate::instance::Instance;
use crate::manager::ResourceManager;
use crate::presenter::MAX_FRAMES_IN_FLIGHT;
use crate::protocol::batch::Batch;
use crate::protocol::request::{ObjectKind, Request, RequestAction, RequestFlags, RequestPayload, ShaderStage};
use crate::recorder::Viewport;
use crate::resources::buffer::should_be_standalone;
use crate::resources::lifecycle::Lifecycle;
use crate::resources::{Dat, Pipeline, PipelineKind, ResourceObject, Sampler, Shader, SlotBinding, Tex};
use crate::transfer::TransferEngine;

fn stage_flags(stages: &[ShaderStage]) -> vk::ShaderStageFlags {
    stages.iter().fold(vk::ShaderStageFlags::empty(), |acc, s| {
        acc | match s {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    })
}

/// The bytes a `DownloadDat` request read back, handed to the caller of
/// `submit` since a batch has no return channel of its own.
pub struct DownloadResult {
    pub id: Id,
    pub bytes: Vec<u8>,
}

/// Owns every canvas and the transfer engine. `surface` is the window
/// surface new canvases attach to; `None` means every `CreateCanvas`
/// produces an offscreen canvas instead (the headless/test path).
pub struct Dispatcher {
    canvases: HashMap<Id, Canvas>,
    transfer: TransferEngine,
    surface: Option<vk::SurfaceKHR>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            canvases: HashMap::new(),
            transfer: TransferEngine::new(),
            surface: None,
        }
    }

    /// Attaches a window surface so subsequent `CreateCanvas` requests
    /// produce windowed (swapchain-backed) canvases instead of offscreen
    /// ones.
    pub fn set_surface(&mut self, surface: vk::SurfaceKHR) {
        self.surface = Some(surface);
    }

    pub fn canvas(&self, id: Id) -> Option<&Canvas> {
        self.canvases.get(&id)
    }

    pub fn canvas_mut(&mut self, id: Id) -> Option<&mut Canvas> {
        self.canvases.get_mut(&id)
    }

    /// Borrows one canvas and the transfer engine at once, disjointly:
    /// a plain `canvas_mut(id)` ties up all of `&mut self` for as long as
    /// the returned reference lives, which makes it impossible to also
    /// reach `transfer_mut()` in the same scope. Splitting the two
    /// fields here, instead of through two whole-`&mut self` method
    /// calls, is what lets the presenter's per-frame loop hold a
    /// canvas's acquired image open while draining deferred transfers
    /// against it.
    pub fn canvas_and_transfer_mut(&mut self, id: Id) -> Option<(&mut Canvas, &mut TransferEngine)> {
        let canvas = self.canvases.get_mut(&id)?;
        Some((canvas, &mut self.transfer))
    }

    pub fn canvas_ids(&self) -> Vec<Id> {
        self.canvases.keys().copied().collect()
    }

    pub fn transfer_mut(&mut self) -> &mut TransferEngine {
        &mut self.transfer
    }

    fn default_image_count(&self) -> u32 {
        self.canvases.values().map(|c| c.image_count).max().unwrap_or(1)
    }

    fn require_canvas(&self, id: Id) -> Result<&Canvas> {
        self.canvases.get(&id).ok_or_else(|| Error::new(ErrorKind::StaleReference, "unknown canvas id"))
    }

    fn require_canvas_mut(&mut self, id: Id) -> Result<&mut Canvas> {
        self.canvases.get_mut(&id).ok_or_else(|| Error::new(ErrorKind::StaleReference, "unknown canvas id"))
    }

    /// Consumes `batch`, applying each request in order. `frame` is the
    /// presenter's current frame counter, used to tag delete requests for
    /// the resource manager's graveyard. Returns the bytes read back by
    /// any `DownloadDat` requests in submission order.
    ///
    /// A request failing with a fatal `ErrorKind` (`DeviceInit`,
    /// `FeatureMissing`, `ShaderCompile`) aborts the process via `fatal!`
    /// instead of being logged and skipped like every other request
    /// failure: there is no recovery path for a lost device or a shader
    /// that never compiled, so continuing to the next request would just
    /// be running against a GPU state nothing downstream can trust.
    pub fn submit(&mut self, dev: &Device, instance: &Instance, manager: &mut ResourceManager, frame: u64, batch: Batch) -> Vec<DownloadResult> {
        let mut downloads = Vec::new();
        for request in batch.into_requests() {
            if let Err(e) = self.apply(dev, instance, manager, frame, &request, &mut downloads) {
                let e = match &request.tag {
                    Some(tag) => e.with_tag(tag.clone()),
                    None => e,
                };
                if e.kind.is_fatal() {
                    fatal!(e);
                }
                log::error!("request failed: {}", e);
            }
        }
        downloads
    }

    fn apply(&mut self, dev: &Device, instance: &Instance, manager: &mut ResourceManager, frame: u64, req: &Request, downloads: &mut Vec<DownloadResult>) -> Result<()> {
        match (req.action, req.kind) {
            (RequestAction::Create, ObjectKind::Canvas) => self.create_canvas(dev, instance, req),
            (RequestAction::Create, ObjectKind::Dat) => self.create_dat(dev, manager, req),
            (RequestAction::Create, ObjectKind::Tex) => self.create_tex(dev, manager, req),
            (RequestAction::Create, ObjectKind::Sampler) => self.create_sampler(dev, manager, req),
            (RequestAction::Create, ObjectKind::Shader) => self.create_shader(dev, manager, req),
            (RequestAction::Create, ObjectKind::Graphics) => self.create_graphics(manager, req),
            (RequestAction::Create, ObjectKind::Compute) => self.create_compute(manager, req),
            (RequestAction::Delete, ObjectKind::Canvas) => self.delete_canvas(dev, req),
            (RequestAction::Delete, _) => self.delete_object(dev, manager, frame, req),
            (RequestAction::Resize, ObjectKind::Canvas) => self.resize_canvas(dev, req),
            (RequestAction::Update, ObjectKind::Graphics) | (RequestAction::Update, ObjectKind::Compute) => self.update_pipeline(manager, req),
            (RequestAction::Bind, ObjectKind::Graphics) | (RequestAction::Bind, ObjectKind::Compute) => self.bind_pipeline(manager, req),
            (RequestAction::Upload, ObjectKind::Dat) => self.upload_dat(dev, manager, req),
            (RequestAction::Upload, ObjectKind::Tex) => self.upload_tex(dev, manager, req),
            (RequestAction::Download, ObjectKind::Dat) => {
                let bytes = self.download_dat(dev, manager, req)?;
                if let Some(id) = req.id {
                    downloads.push(DownloadResult { id, bytes });
                }
                Ok(())
            }
            (RequestAction::Record, ObjectKind::Canvas) => self.apply_record(dev, manager, req),
            (action, kind) => Err(Error::new(ErrorKind::ValidationFailed, format!("undefined action/kind combination: {:?}/{:?}", action, kind))),
        }
    }

    fn create_canvas(&mut self, dev: &Device, instance: &Instance, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "create request missing id"))?;
        let (width, height, clear_color, image_count) = match &req.payload {
            RequestPayload::CreateCanvas { width, height, clear_color, image_count } => (*width, *height, *clear_color, *image_count),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match CreateCanvas")),
        };
        let canvas = match self.surface {
            Some(surface) => Canvas::new_windowed(dev, instance, surface, width, height, clear_color, image_count, MAX_FRAMES_IN_FLIGHT)?,
            None => Canvas::new_offscreen(dev, width, height, clear_color, image_count, MAX_FRAMES_IN_FLIGHT)?,
        };
        self.canvases.insert(id, canvas);
        Ok(())
    }

    fn create_dat(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "create request missing id"))?;
        let (buffer_type, size) = match &req.payload {
            RequestPayload::CreateDat { buffer_type, size } => (*buffer_type, *size),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match CreateDat")),
        };
        let mappable = req.flags.contains(RequestFlags::MAPPABLE);
        let dup = req.flags.contains(RequestFlags::DUP);
        let persistent_staging = req.flags.contains(RequestFlags::PERSISTENT_STAGING);
        let standalone = should_be_standalone(buffer_type, size, persistent_staging);
        let mut dat = Dat::new(buffer_type, size, mappable, dup, standalone);
        let image_count = self.default_image_count();
        if standalone {
            dat.create(dev, None, image_count)?;
        } else {
            let pool = manager.pool_for(dev, buffer_type, mappable);
            dat.create(dev, Some(pool), image_count)?;
        }
        manager.insert(id, ObjectKind::Dat, ResourceObject::Dat(dat));
        Ok(())
    }

    fn create_tex(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "create request missing id"))?;
        let (format, dims) = match &req.payload {
            RequestPayload::CreateTex { format, dims } => (*format, *dims),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match CreateTex")),
        };
        let mut tex = Tex::new(format, dims);
        tex.create(dev)?;
        manager.insert(id, ObjectKind::Tex, ResourceObject::Tex(tex));
        Ok(())
    }

    fn create_sampler(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "create request missing id"))?;
        let (filter, address_mode) = match &req.payload {
            RequestPayload::CreateSampler { filter, address_mode } => (*filter, *address_mode),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match CreateSampler")),
        };
        let mut sampler = Sampler::new(filter, address_mode);
        sampler.create(dev)?;
        manager.insert(id, ObjectKind::Sampler, ResourceObject::Sampler(sampler));
        Ok(())
    }

    fn create_shader(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "create request missing id"))?;
        let (stage, source) = match &req.payload {
            RequestPayload::CreateShader { stage, source } => (*stage, source.clone()),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match CreateShader")),
        };
        let mut shader = Shader::new(stage, source);
        shader.create(dev)?;
        manager.insert(id, ObjectKind::Shader, ResourceObject::Shader(shader));
        Ok(())
    }

    fn create_graphics(&mut self, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "create request missing id"))?;
        let (vertex_shader, fragment_shader, topology, slots) = match &req.payload {
            RequestPayload::CreateGraphics { vertex_shader, fragment_shader, topology, slots } => (*vertex_shader, *fragment_shader, *topology, slots.clone()),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match CreateGraphics")),
        };
        let mut pipeline = Pipeline::new_graphics(vertex_shader, fragment_shader, topology);
        for slot in &slots {
            pipeline.declare_slot(slot.slot, slot.stage)?;
        }
        manager.insert(id, ObjectKind::Graphics, ResourceObject::Pipeline(pipeline));
        Ok(())
    }

    fn create_compute(&mut self, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "create request missing id"))?;
        let (shader, slots) = match &req.payload {
            RequestPayload::CreateCompute { shader, slots } => (*shader, slots.clone()),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match CreateCompute")),
        };
        let mut pipeline = Pipeline::new_compute(shader);
        for slot in &slots {
            pipeline.declare_slot(slot.slot, slot.stage)?;
        }
        manager.insert(id, ObjectKind::Compute, ResourceObject::Pipeline(pipeline));
        Ok(())
    }

    fn delete_canvas(&mut self, dev: &Device, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "delete request missing id"))?;
        let mut canvas = self.canvases.remove(&id).ok_or_else(|| Error::new(ErrorKind::StaleReference, "unknown canvas id"))?;
        dev.wait_for_latest_timeline();
        canvas.destroy(dev);
        Ok(())
    }

    fn delete_object(&mut self, dev: &Device, manager: &mut ResourceManager, frame: u64, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "delete request missing id"))?;
        manager.tombstone(dev, id, frame)
    }

    fn resize_canvas(&mut self, dev: &Device, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "resize request missing id"))?;
        let (width, height) = match &req.payload {
            RequestPayload::Resize { width, height } => (*width, *height),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match Resize")),
        };
        self.require_canvas_mut(id)?.resize(dev, width, height)
    }

    fn update_pipeline(&mut self, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "update request missing id"))?;
        let mut obj = manager.get_mut(id)?;
        let pipeline = match &mut *obj {
            ResourceObject::Pipeline(p) => p,
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "update target is not a pipeline")),
        };
        match &req.payload {
            RequestPayload::SetVertexLayout { stride } => pipeline.set_vertex_layout(*stride),
            RequestPayload::SetAttr { location, offset } => pipeline.set_attr(*location, *offset),
            RequestPayload::SetSlot { slot, stage } => pipeline.declare_slot(*slot, *stage),
            RequestPayload::SetPush { stages, offset, bytes } => pipeline.set_push(stages, *offset, bytes.len() as u32),
            _ => Err(Error::new(ErrorKind::ValidationFailed, "payload does not match Update")),
        }
    }

    fn bind_pipeline(&mut self, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        match &req.payload {
            RequestPayload::BindVertex { pipeline, dat } => self.bind_vertex(manager, *pipeline, *dat),
            RequestPayload::BindIndex { pipeline, dat } => self.bind_index(manager, *pipeline, *dat),
            RequestPayload::BindDat { pipeline, slot, dat } => self.bind_dat(manager, *pipeline, *slot, *dat),
            RequestPayload::BindTex { pipeline, slot, tex, sampler } => self.bind_tex(manager, *pipeline, *slot, *tex, *sampler),
            _ => Err(Error::new(ErrorKind::ValidationFailed, "payload does not match Bind")),
        }
    }

    fn bind_vertex(&mut self, manager: &mut ResourceManager, pipeline: Id, dat: Id) -> Result<()> {
        let (buffer, offset) = {
            let obj = manager.get(dat)?;
            match &*obj {
                ResourceObject::Dat(d) => {
                    let pool = manager.pool_for_ref(d.buffer_type, d.mappable);
                    d.buffer_and_offset(pool, None)
                }
                _ => return Err(Error::new(ErrorKind::ValidationFailed, "BindVertex target is not a dat")),
            }
        };
        let mut obj = manager.get_mut(pipeline)?;
        match &mut *obj {
            ResourceObject::Pipeline(p) => {
                p.bind_vertex(buffer, offset);
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::ValidationFailed, "BindVertex target is not a pipeline")),
        }
    }

    fn bind_index(&mut self, manager: &mut ResourceManager, pipeline: Id, dat: Id) -> Result<()> {
        let (buffer, offset) = {
            let obj = manager.get(dat)?;
            match &*obj {
                ResourceObject::Dat(d) => {
                    let pool = manager.pool_for_ref(d.buffer_type, d.mappable);
                    d.buffer_and_offset(pool, None)
                }
                _ => return Err(Error::new(ErrorKind::ValidationFailed, "BindIndex target is not a dat")),
            }
        };
        let mut obj = manager.get_mut(pipeline)?;
        match &mut *obj {
            ResourceObject::Pipeline(p) => {
                p.bind_index(buffer, offset);
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::ValidationFailed, "BindIndex target is not a pipeline")),
        }
    }

    fn bind_dat(&mut self, manager: &mut ResourceManager, pipeline: Id, slot: u32, dat: Id) -> Result<()> {
        let binding = {
            let obj = manager.get(dat)?;
            match &*obj {
                ResourceObject::Dat(d) => {
                    let pool = manager.pool_for_ref(d.buffer_type, d.mappable);
                    let (buffer, offset) = d.buffer_and_offset(pool, None);
                    SlotBinding::Dat { id: dat, buffer, offset, range: d.size, buffer_type: d.buffer_type }
                }
                _ => return Err(Error::new(ErrorKind::ValidationFailed, "BindDat target is not a dat")),
            }
        };
        let mut obj = manager.get_mut(pipeline)?;
        match &mut *obj {
            ResourceObject::Pipeline(p) => p.bind_slot(slot, binding),
            _ => Err(Error::new(ErrorKind::ValidationFailed, "BindDat target is not a pipeline")),
        }
    }

    fn bind_tex(&mut self, manager: &mut ResourceManager, pipeline: Id, slot: u32, tex: Id, sampler: Id) -> Result<()> {
        let binding = {
            let view = {
                let obj = manager.get(tex)?;
                match &*obj {
                    ResourceObject::Tex(t) => t.view,
                    _ => return Err(Error::new(ErrorKind::ValidationFailed, "BindTex target is not a tex")),
                }
            };
            let handle = {
                let obj = manager.get(sampler)?;
                match &*obj {
                    ResourceObject::Sampler(s) => s.handle,
                    _ => return Err(Error::new(ErrorKind::ValidationFailed, "BindTex sampler is not a sampler")),
                }
            };
            SlotBinding::Tex { id: tex, view, sampler: handle }
        };
        let mut obj = manager.get_mut(pipeline)?;
        match &mut *obj {
            ResourceObject::Pipeline(p) => p.bind_slot(slot, binding),
            _ => Err(Error::new(ErrorKind::ValidationFailed, "BindTex target is not a pipeline")),
        }
    }

    fn upload_dat(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "upload request missing id"))?;
        let (offset, bytes, image_index) = match &req.payload {
            RequestPayload::UploadDat { offset, bytes, image_index } => (*offset, bytes.clone(), *image_index),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match UploadDat")),
        };
        self.transfer.upload(
            dev,
            manager,
            id,
            offset,
            &bytes,
            image_index,
            req.flags.contains(RequestFlags::WAIT),
            req.flags.contains(RequestFlags::PERSISTENT_STAGING),
        )
    }

    fn upload_tex(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "upload request missing id"))?;
        let bytes = match &req.payload {
            RequestPayload::UploadTex { bytes } => bytes.clone(),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match UploadTex")),
        };
        let obj = manager.get(id)?;
        match &*obj {
            ResourceObject::Tex(t) => t.upload(dev, &bytes),
            _ => Err(Error::new(ErrorKind::ValidationFailed, "UploadTex target is not a tex")),
        }
    }

    fn download_dat(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<Vec<u8>> {
        let id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "download request missing id"))?;
        let (offset, size, image_index) = match &req.payload {
            RequestPayload::DownloadDat { offset, size, image_index } => (*offset, *size, *image_index),
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "payload does not match DownloadDat")),
        };
        self.transfer.download(dev, manager, id, offset, size, image_index)
    }

    fn apply_record(&mut self, dev: &Device, manager: &mut ResourceManager, req: &Request) -> Result<()> {
        let canvas_id = req.id.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "record request missing canvas id"))?;
        match &req.payload {
            RequestPayload::RecordBegin => {
                let canvas = self.require_canvas_mut(canvas_id)?;
                canvas.recorder.push_begin();
                canvas.mark_all_dirty();
                Ok(())
            }
            RequestPayload::RecordViewport { x, y, width, height } => {
                let canvas = self.require_canvas_mut(canvas_id)?;
                canvas.recorder.push_viewport(Viewport { x: *x, y: *y, width: *width, height: *height });
                canvas.mark_all_dirty();
                Ok(())
            }
            RequestPayload::RecordPush { pipeline, stages, offset, bytes } => {
                let canvas = self.require_canvas_mut(canvas_id)?;
                canvas.recorder.push_push(*pipeline, stage_flags(stages), *offset, bytes.clone());
                canvas.mark_all_dirty();
                Ok(())
            }
            RequestPayload::RecordDraw {
                kind,
                pipeline,
                first_vertex,
                vertex_count,
                first_instance,
                instance_count,
                index_offset,
                indirect_dat,
            } => {
                self.ensure_pipeline_built(dev, manager, canvas_id, *pipeline)?;
                let canvas = self.require_canvas_mut(canvas_id)?;
                canvas.recorder.push_draw(*kind, *pipeline, *first_vertex, *vertex_count, *first_instance, *instance_count, *index_offset, *indirect_dat);
                canvas.mark_all_dirty();
                Ok(())
            }
            RequestPayload::RecordEnd => {
                let canvas = self.require_canvas_mut(canvas_id)?;
                canvas.recorder.push_end();
                canvas.mark_all_dirty();
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::ValidationFailed, "payload does not match Record")),
        }
    }

    /// Builds a graphics/compute pipeline's Vulkan objects the first time
    /// a `RecordDraw` references it, using the target canvas's render
    /// pass and extent (the lazy-build-on-first-use rule in §4.2/§4.3).
    fn ensure_pipeline_built(&self, dev: &Device, manager: &mut ResourceManager, canvas: Id, pipeline: Id) -> Result<()> {
        let needs_build = {
            let obj = manager.get(pipeline)?;
            match &*obj {
                ResourceObject::Pipeline(p) => p.lifecycle != Lifecycle::Created,
                _ => return Err(Error::new(ErrorKind::ValidationFailed, "RecordDraw target is not a pipeline")),
            }
        };
        if !needs_build {
            return Ok(());
        }

        let shader_ids: Vec<(Id, ShaderStage)> = {
            let obj = manager.get(pipeline)?;
            match &*obj {
                ResourceObject::Pipeline(p) => match p.kind {
                    PipelineKind::Graphics { vertex_shader, fragment_shader, .. } => vec![(vertex_shader, ShaderStage::Vertex), (fragment_shader, ShaderStage::Fragment)],
                    PipelineKind::Compute { shader } => vec![(shader, ShaderStage::Compute)],
                },
                _ => unreachable!(),
            }
        };

        let mut shader_modules = HashMap::new();
        for (id, _) in &shader_ids {
            let obj = manager.get(*id)?;
            match &*obj {
                ResourceObject::Shader(s) => {
                    shader_modules.insert(*id, (s.module, s.stage));
                }
                _ => return Err(Error::new(ErrorKind::ValidationFailed, "pipeline references a non-shader id")),
            }
        }

        let canvas = self.require_canvas(canvas)?;
        manager.build_pipeline(dev, pipeline, &shader_modules, canvas.render_pass(), canvas.extent())
    }

    /// Destroys every canvas and the transfer engine's staging buffer.
    /// Called once during teardown, after the device has gone idle.
    pub unsafe fn destroy_all(&mut self, dev: &Device) {
        for (_, mut canvas) in self.canvases.drain() {
            canvas.destroy(dev);
        }
        self.transfer.destroy(dev);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

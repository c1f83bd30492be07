// The recorder: a per-canvas ordered list of replayable draw commands.
//
// Holds the ordered command list only; the dirty bitmask over swapchain
// images lives on `Canvas` itself (canvas.rs), since the bitmask's
// lifetime and "which image" indexing is a swapchain concept, not a
// command-list concept. Adding or modifying a command here just reports
// back to the caller that every image should be considered dirty again;
// the caller (the dispatcher, via `Canvas::mark_all_dirty`) is the one
// that actually flips the bits.
//
// Grounded on nothing upstream directly (the closest analogue,
// `thundr::Renderer::draw`, records one fixed sequence of draw calls per
// frame rather than replaying a client-built list), so this is new code
// shaped by the recorder command set, built with the same
// begin/record/end-recording primitives `Device` already exposes
// (`cbuf_begin_recording`/`cbuf_end_recording`).

use ash::vk;

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::id::Id;
use crate::manager::ResourceManager;
use crate::protocol::request::DrawKind;
use crate::resources::pipeline::SlotBinding;
use crate::resources::ResourceObject;

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

enum Command {
    Begin,
    Viewport(Viewport),
    Push { pipeline: Id, stages: vk::ShaderStageFlags, offset: u32, bytes: Vec<u8> },
    Draw {
        kind: DrawKind,
        pipeline: Id,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
        index_offset: u32,
        indirect_dat: Option<Id>,
    },
    End,
}

/// An ordered list of recorder commands for one canvas, replayed into a
/// swapchain image's command buffer whenever that image's dirty bit is
/// set (see `Canvas::record_if_dirty`).
pub struct Recorder {
    commands: Vec<Command>,
}

impl Recorder {
    pub fn new() -> Self {
        Self { commands: Vec::new() }
    }

    pub fn push_begin(&mut self) {
        self.commands.push(Command::Begin);
    }

    pub fn push_viewport(&mut self, v: Viewport) {
        self.commands.push(Command::Viewport(v));
    }

    /// The recorder owns the push-constant payload until the command is
    /// replaced or the recorder is dropped.
    pub fn push_push(&mut self, pipeline: Id, stages: vk::ShaderStageFlags, offset: u32, bytes: Vec<u8>) {
        self.commands.push(Command::Push { pipeline, stages, offset, bytes });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push_draw(
        &mut self,
        kind: DrawKind,
        pipeline: Id,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
        index_offset: u32,
        indirect_dat: Option<Id>,
    ) {
        self.commands.push(Command::Draw {
            kind,
            pipeline,
            first_vertex,
            vertex_count,
            first_instance,
            instance_count,
            index_offset,
            indirect_dat,
        });
    }

    pub fn push_end(&mut self) {
        self.commands.push(Command::End);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Refreshes every `dup`-dat descriptor binding used by any draw in
    /// this recorder's command list against `image_index`, independent of
    /// whether the command buffer itself needs re-recording. A pipeline's
    /// descriptor set is shared across every swapchain image (there's one
    /// set per pipeline, not one per image), so the binding has to be
    /// pointed at the image about to be used right before that image's
    /// submission every frame — re-recording the command buffer only when
    /// its dirty bit is set would otherwise leave a `dup` uniform's binding
    /// stuck on whichever image last triggered a re-record.
    pub fn refresh_bindings_for_image(&self, dev: &Device, manager: &ResourceManager, image_index: u32) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for cmd in &self.commands {
            if let Command::Draw { pipeline, .. } = cmd {
                if seen.insert(*pipeline) {
                    if let Err(e) = self.refresh_dup_dat_bindings(dev, manager, *pipeline, image_index) {
                        if e.kind != ErrorKind::StaleReference {
                            return Err(e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Walks the command list, emitting the corresponding vkCmd* calls
    /// into `cbuf`, which must already be inside a render pass instance
    /// (`Canvas::record_if_dirty` begins/ends the render pass itself so
    /// the clear value and framebuffer stay canvas-owned). A `Draw`
    /// referencing a pipeline or dat that has since been deleted is
    /// skipped with a logged `StaleReference` rather than aborting the
    /// whole replay, matching "dispatch must either keep the object
    /// alive or refuse the record".
    pub fn replay(&self, dev: &Device, manager: &ResourceManager, cbuf: vk::CommandBuffer, default_extent: vk::Extent2D, image_index: u32) -> Result<()> {
        for cmd in &self.commands {
            match cmd {
                Command::Begin | Command::End => {}
                Command::Viewport(v) => {
                    let viewport = vk::Viewport {
                        x: v.x as f32,
                        y: v.y as f32,
                        width: v.width as f32,
                        height: v.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D { x: v.x, y: v.y },
                        extent: vk::Extent2D { width: v.width, height: v.height },
                    };
                    unsafe {
                        dev.dev.cmd_set_viewport(cbuf, 0, &[viewport]);
                        dev.dev.cmd_set_scissor(cbuf, 0, &[scissor]);
                    }
                }
                Command::Push { pipeline, stages, offset, bytes } => {
                    if let Err(e) = self.emit_push(dev, manager, cbuf, *pipeline, *stages, *offset, bytes) {
                        if e.kind != ErrorKind::StaleReference {
                            return Err(e);
                        }
                    }
                }
                Command::Draw {
                    kind,
                    pipeline,
                    first_vertex,
                    vertex_count,
                    first_instance,
                    instance_count,
                    index_offset,
                    indirect_dat,
                } => {
                    if let Err(e) = self.emit_draw(
                        dev,
                        manager,
                        cbuf,
                        *kind,
                        *pipeline,
                        *first_vertex,
                        *vertex_count,
                        *first_instance,
                        *instance_count,
                        *index_offset,
                        *indirect_dat,
                        image_index,
                    ) {
                        if e.kind != ErrorKind::StaleReference {
                            return Err(e);
                        }
                    }
                }
            }
        }
        let _ = default_extent;
        Ok(())
    }

    fn emit_push(
        &self,
        dev: &Device,
        manager: &ResourceManager,
        cbuf: vk::CommandBuffer,
        pipeline: Id,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) -> Result<()> {
        let object = manager.get(pipeline)?;
        let p = match &*object {
            ResourceObject::Pipeline(p) => p,
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "push target is not a pipeline")),
        };
        unsafe {
            dev.dev.cmd_push_constants(cbuf, p.pipeline_layout, stages, offset, bytes);
        }
        Ok(())
    }

    /// Re-resolves every `dup` dat bound to one of `pipeline`'s descriptor
    /// slots against `image_index` and rewrites the built descriptor set in
    /// place. A `dup` dat's physical copy is selected at `BindDat` time by
    /// whatever image happened to be current then; since each swapchain
    /// image's resources are independent (no ordering guarantee between
    /// them), the bound copy has to be refreshed before every draw so a
    /// uniform written per-image is read back from the copy matching the
    /// image actually being rendered, not whichever one `BindDat` saw last.
    ///
    /// Looks up the pipeline and each dat through separate, non-overlapping
    /// `ResourceManager` borrows (read pipeline bindings, drop; read each
    /// dat, drop; then one `get_mut` to apply): the manager's components
    /// share one lock per table, so holding a pipeline's `get_mut` open
    /// while reading a dat from the same table would deadlock.
    fn refresh_dup_dat_bindings(&self, dev: &Device, manager: &ResourceManager, pipeline: Id, image_index: u32) -> Result<()> {
        let slot_dats: Vec<(u32, Id)> = {
            let object = manager.get(pipeline)?;
            match &*object {
                ResourceObject::Pipeline(p) => p
                    .bindings
                    .iter()
                    .filter_map(|(slot, binding)| match binding {
                        SlotBinding::Dat { id, .. } => Some((*slot, *id)),
                        _ => None,
                    })
                    .collect(),
                _ => return Err(Error::new(ErrorKind::ValidationFailed, "draw target is not a pipeline")),
            }
        };
        if slot_dats.is_empty() {
            return Ok(());
        }

        let mut refreshes: Vec<(u32, vk::Buffer, u64)> = Vec::new();
        for (slot, dat_id) in slot_dats {
            let resolved = match manager.get(dat_id) {
                Ok(obj) => match &*obj {
                    ResourceObject::Dat(d) if d.dup => {
                        let pool = manager.pool_for_ref(d.buffer_type, d.mappable);
                        Some(d.buffer_and_offset(pool, Some(image_index)))
                    }
                    _ => None,
                },
                Err(_) => None,
            };
            if let Some((buffer, offset)) = resolved {
                refreshes.push((slot, buffer, offset));
            }
        }
        if refreshes.is_empty() {
            return Ok(());
        }

        let mut object = manager.get_mut(pipeline)?;
        if let ResourceObject::Pipeline(p) = &mut *object {
            for (slot, buffer, offset) in refreshes {
                p.refresh_dat_binding_for_image(dev, slot, buffer, offset);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_draw(
        &self,
        dev: &Device,
        manager: &ResourceManager,
        cbuf: vk::CommandBuffer,
        kind: DrawKind,
        pipeline: Id,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
        index_offset: u32,
        indirect_dat: Option<Id>,
        image_index: u32,
    ) -> Result<()> {
        self.refresh_dup_dat_bindings(dev, manager, pipeline, image_index)?;

        let object = manager.get(pipeline)?;
        let p = match &*object {
            ResourceObject::Pipeline(p) => p,
            _ => return Err(Error::new(ErrorKind::ValidationFailed, "draw target is not a pipeline")),
        };
        unsafe {
            dev.dev.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, p.handle);
            if let Some(set) = &p.descriptor_set {
                dev.dev.cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::GRAPHICS, p.pipeline_layout, 0, &[set.d_set], &[]);
            }
            if let Some((buffer, offset)) = p.vertex_buffer {
                Self::bind_vertex(dev, cbuf, buffer, offset);
            }
            if matches!(kind, DrawKind::Indexed | DrawKind::IndexedIndirect) {
                if let Some((buffer, offset)) = p.index_buffer {
                    Self::bind_index(dev, cbuf, buffer, offset);
                }
            }
        }
        drop(object);

        match kind {
            DrawKind::Direct => unsafe {
                dev.dev.cmd_draw(cbuf, vertex_count, instance_count, first_vertex, first_instance);
            },
            DrawKind::Indexed => unsafe {
                dev.dev.cmd_draw_indexed(cbuf, vertex_count, instance_count, index_offset, 0, first_instance);
            },
            DrawKind::Indirect => {
                let dat_id = indirect_dat.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "indirect draw requires an indirect dat"))?;
                let obj = manager.get(dat_id)?;
                let dat = match &*obj {
                    ResourceObject::Dat(d) => d,
                    _ => return Err(Error::new(ErrorKind::ValidationFailed, "indirect_dat is not a dat")),
                };
                let pool = manager.pool_for_ref(dat.buffer_type, dat.mappable);
                let (buffer, offset) = dat.buffer_and_offset(pool, None);
                unsafe {
                    dev.dev.cmd_draw_indirect(cbuf, buffer, offset, 1, std::mem::size_of::<vk::DrawIndirectCommand>() as u32);
                }
            }
            DrawKind::IndexedIndirect => {
                let dat_id = indirect_dat.ok_or_else(|| Error::new(ErrorKind::ValidationFailed, "indexed-indirect draw requires an indirect dat"))?;
                let obj = manager.get(dat_id)?;
                let dat = match &*obj {
                    ResourceObject::Dat(d) => d,
                    _ => return Err(Error::new(ErrorKind::ValidationFailed, "indirect_dat is not a dat")),
                };
                let pool = manager.pool_for_ref(dat.buffer_type, dat.mappable);
                let (buffer, offset) = dat.buffer_and_offset(pool, None);
                unsafe {
                    dev.dev
                        .cmd_draw_indexed_indirect(cbuf, buffer, offset, 1, std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32);
                }
            }
        }
        Ok(())
    }

    /// Emits a vertex or index buffer bind, used both by `replay` and by
    /// the dispatcher when recording a `BindVertex`/`BindIndex` request.
    fn bind_vertex(dev: &Device, cbuf: vk::CommandBuffer, buffer: vk::Buffer, offset: u64) {
        unsafe {
            dev.dev.cmd_bind_vertex_buffers(cbuf, 0, &[buffer], &[offset]);
        }
    }

    fn bind_index(dev: &Device, cbuf: vk::CommandBuffer, buffer: vk::Buffer, offset: u64) {
        unsafe {
            dev.dev.cmd_bind_index_buffer(cbuf, buffer, offset, vk::IndexType::UINT32);
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

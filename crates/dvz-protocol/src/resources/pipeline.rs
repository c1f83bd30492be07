// The Pipeline object: the final linked GPU state.
//
// The final linked GPU state — shaders, vertex layout, descriptor layout,
// push constant layout, blend/depth/cull/front/polygon/primitive
// settings — built lazily on first use after its descriptor slots are
// bound. New code: one hardcoded pipeline used to get linked at startup;
// this module generalizes that fixed creation into an accumulate-then-build
// state machine driven by the dispatcher's
// `SetVertexLayout`/`SetAttr`/`SetSlot`/`SetPush`/`BindDat`/`BindTex`
// requests, with a validation pass before first use that checks every slot
// has a binding.

use std::collections::HashMap;

use ash::vk;

use crate::descpool::DescPool;
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::id::Id;
use crate::protocol::request::{BufferType, PrimitiveTopology, ShaderStage};
use crate::resources::lifecycle::Lifecycle;

fn vk_topology(t: PrimitiveTopology) -> vk::PrimitiveTopology {
    match t {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn vk_stage_flags(stages: &[ShaderStage]) -> vk::ShaderStageFlags {
    stages.iter().fold(vk::ShaderStageFlags::empty(), |acc, s| {
        acc | match s {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    })
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttr {
    pub location: u32,
    pub offset: u32,
}

/// What a declared slot ends up bound to. The descriptor type (uniform
/// buffer, storage buffer, combined image sampler) is inferred from which
/// variant this is plus, for a dat, its `BufferType` — a descriptor
/// binding only names a slot index plus a dat or tex reference, not an
/// explicit descriptor type.
#[derive(Debug, Clone, Copy)]
pub enum SlotBinding {
    Dat { id: Id, buffer: vk::Buffer, offset: u64, range: u64, buffer_type: BufferType },
    Tex { id: Id, view: vk::ImageView, sampler: vk::Sampler },
}

#[derive(Debug, Clone, Copy)]
pub struct PushRange {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

pub enum PipelineKind {
    Graphics {
        vertex_shader: Id,
        fragment_shader: Id,
        topology: PrimitiveTopology,
    },
    Compute {
        shader: Id,
    },
}

/// A graphics/compute pipeline accumulating configuration in
/// `Lifecycle::Configuring`, then built once on first use.
pub struct Pipeline {
    pub kind: PipelineKind,
    pub slots: Vec<(u32, ShaderStage)>,
    pub bindings: HashMap<u32, SlotBinding>,
    pub vertex_stride: Option<u32>,
    pub attrs: Vec<VertexAttr>,
    pub push_ranges: Vec<PushRange>,

    /// Set by a `BindVertex`/`BindIndex` request, consumed by the
    /// recorder's `Draw` replay to bind the vertex/index buffer that
    /// should be in effect for this pipeline's draw calls.
    pub vertex_buffer: Option<(vk::Buffer, u64)>,
    pub index_buffer: Option<(vk::Buffer, u64)>,

    pub descriptor_layout: vk::DescriptorSetLayout,
    pub descriptor_set: Option<crate::descpool::Descriptor>,
    pub pipeline_layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
    pub lifecycle: Lifecycle,
}

impl Pipeline {
    pub fn new_graphics(vertex_shader: Id, fragment_shader: Id, topology: PrimitiveTopology) -> Self {
        Self {
            kind: PipelineKind::Graphics { vertex_shader, fragment_shader, topology },
            slots: Vec::new(),
            bindings: HashMap::new(),
            vertex_stride: None,
            attrs: Vec::new(),
            push_ranges: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            descriptor_layout: vk::DescriptorSetLayout::null(),
            descriptor_set: None,
            pipeline_layout: vk::PipelineLayout::null(),
            handle: vk::Pipeline::null(),
            lifecycle: Lifecycle::Configuring,
        }
    }

    pub fn new_compute(shader: Id) -> Self {
        Self {
            kind: PipelineKind::Compute { shader },
            slots: Vec::new(),
            bindings: HashMap::new(),
            vertex_stride: None,
            attrs: Vec::new(),
            push_ranges: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            descriptor_layout: vk::DescriptorSetLayout::null(),
            descriptor_set: None,
            pipeline_layout: vk::PipelineLayout::null(),
            handle: vk::Pipeline::null(),
            lifecycle: Lifecycle::Configuring,
        }
    }

    pub fn declare_slot(&mut self, slot: u32, stage: ShaderStage) -> Result<()> {
        self.lifecycle.require_configuring()?;
        self.slots.push((slot, stage));
        Ok(())
    }

    pub fn set_vertex_layout(&mut self, stride: u32) -> Result<()> {
        self.lifecycle.require_configuring()?;
        self.vertex_stride = Some(stride);
        Ok(())
    }

    pub fn set_attr(&mut self, location: u32, offset: u32) -> Result<()> {
        self.lifecycle.require_configuring()?;
        self.attrs.push(VertexAttr { location, offset });
        Ok(())
    }

    pub fn set_push(&mut self, stages: &[ShaderStage], offset: u32, size: u32) -> Result<()> {
        self.lifecycle.require_configuring()?;
        self.push_ranges.push(PushRange {
            stages: vk_stage_flags(stages),
            offset,
            size,
        });
        Ok(())
    }

    pub fn bind_slot(&mut self, slot: u32, binding: SlotBinding) -> Result<()> {
        self.lifecycle.require_configuring()?;
        if !self.slots.iter().any(|(s, _)| *s == slot) {
            return Err(Error::new(ErrorKind::ValidationFailed, format!("slot {} was never declared", slot)));
        }
        self.bindings.insert(slot, binding);
        Ok(())
    }

    /// Records the vertex buffer a `BindVertex` request names, so the
    /// recorder's `Draw` replay knows what to bind before issuing the draw.
    pub fn bind_vertex(&mut self, buffer: vk::Buffer, offset: u64) {
        self.vertex_buffer = Some((buffer, offset));
    }

    /// Records the index buffer a `BindIndex` request names.
    pub fn bind_index(&mut self, buffer: vk::Buffer, offset: u64) {
        self.index_buffer = Some((buffer, offset));
    }

    fn descriptor_type_for(binding: &SlotBinding) -> vk::DescriptorType {
        match binding {
            SlotBinding::Dat { buffer_type: BufferType::Storage, .. } => vk::DescriptorType::STORAGE_BUFFER,
            SlotBinding::Dat { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            SlotBinding::Tex { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    /// Rewrites a bound dat slot's buffer/offset in place and, if the
    /// descriptor set has already been built, re-issues its descriptor
    /// write so the GPU sees the new buffer on the next draw. A no-op if
    /// `buffer`/`offset` already match what's bound (the common case for a
    /// non-`dup` dat, whose resolved buffer never changes between draws).
    pub fn refresh_dat_binding_for_image(&mut self, dev: &Device, slot: u32, buffer: vk::Buffer, offset: u64) {
        let Some(binding) = self.bindings.get(&slot) else {
            return;
        };
        let (range, unchanged) = match binding {
            SlotBinding::Dat { buffer: b, offset: o, range, .. } => (*range, *b == buffer && *o == offset),
            SlotBinding::Tex { .. } => return,
        };
        if unchanged {
            return;
        }
        let ty = Self::descriptor_type_for(binding);

        if let Some(SlotBinding::Dat { buffer: b, offset: o, .. }) = self.bindings.get_mut(&slot) {
            *b = buffer;
            *o = offset;
        }

        if let Some(set) = &self.descriptor_set {
            let info = vk::DescriptorBufferInfo { buffer, offset, range };
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set.d_set)
                .dst_binding(slot)
                .dst_array_element(0)
                .descriptor_type(ty)
                .buffer_info(std::slice::from_ref(&info))
                .build();
            unsafe {
                dev.dev.update_descriptor_sets(&[write], &[]);
            }
        }
    }

    /// Builds the Vulkan pipeline object. Requires every declared slot to
    /// have a binding: a pipeline cannot be used for recording until every
    /// declared descriptor slot has one. `shader_modules` maps each
    /// referenced shader's `Id` to its compiled `(vk::ShaderModule, entry
    /// stage)`.
    pub fn build(
        &mut self,
        dev: &Device,
        descpool: &mut DescPool,
        shader_modules: &HashMap<Id, (vk::ShaderModule, ShaderStage)>,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<()> {
        if self.lifecycle == Lifecycle::Created {
            return Ok(());
        }
        for (slot, _) in &self.slots {
            if !self.bindings.contains_key(slot) {
                return Err(Error::new(ErrorKind::WrongState, format!("descriptor slot {} has no binding", slot)));
            }
        }

        let layout_bindings: Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)> = self
            .slots
            .iter()
            .map(|(slot, stage)| {
                let ty = Self::descriptor_type_for(&self.bindings[slot]);
                let stage_flags = match stage {
                    ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
                    ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
                    ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
                };
                (*slot, ty, stage_flags)
            })
            .collect();
        self.descriptor_layout = DescPool::create_layout(&dev.dev, &layout_bindings);

        if !self.slots.is_empty() {
            let set = descpool.alloc_descriptor(&dev.dev, self.descriptor_layout);
            let mut buffer_infos = Vec::new();
            let mut image_infos = Vec::new();
            let mut writes = Vec::new();
            for (slot, _) in &self.slots {
                match &self.bindings[slot] {
                    SlotBinding::Dat { buffer, offset, range, .. } => {
                        buffer_infos.push(vk::DescriptorBufferInfo {
                            buffer: *buffer,
                            offset: *offset,
                            range: *range,
                        });
                        let idx = buffer_infos.len() - 1;
                        writes.push((*slot, Self::descriptor_type_for(&self.bindings[slot]), idx, true));
                    }
                    SlotBinding::Tex { view, sampler, .. } => {
                        image_infos.push(vk::DescriptorImageInfo {
                            sampler: *sampler,
                            image_view: *view,
                            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        });
                        let idx = image_infos.len() - 1;
                        writes.push((*slot, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, idx, false));
                    }
                }
            }
            let vk_writes: Vec<vk::WriteDescriptorSet> = writes
                .iter()
                .map(|(slot, ty, idx, is_buffer)| {
                    let mut w = vk::WriteDescriptorSet::builder()
                        .dst_set(set.d_set)
                        .dst_binding(*slot)
                        .dst_array_element(0)
                        .descriptor_type(*ty);
                    if *is_buffer {
                        w = w.buffer_info(std::slice::from_ref(&buffer_infos[*idx]));
                    } else {
                        w = w.image_info(std::slice::from_ref(&image_infos[*idx]));
                    }
                    w.build()
                })
                .collect();
            unsafe {
                dev.dev.update_descriptor_sets(&vk_writes, &[]);
            }
            self.descriptor_set = Some(set);
        }

        let set_layouts = if self.slots.is_empty() { vec![] } else { vec![self.descriptor_layout] };
        let push_ranges: Vec<vk::PushConstantRange> = self
            .push_ranges
            .iter()
            .map(|p| vk::PushConstantRange {
                stage_flags: p.stages,
                offset: p.offset,
                size: p.size,
            })
            .collect();
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        self.pipeline_layout = unsafe { dev.dev.create_pipeline_layout(&layout_info, None).unwrap() };

        match &self.kind {
            PipelineKind::Graphics { vertex_shader, fragment_shader, topology } => {
                let (vs, _) = shader_modules
                    .get(vertex_shader)
                    .ok_or_else(|| Error::new(ErrorKind::StaleReference, "vertex shader not found"))?;
                let (fs, _) = shader_modules
                    .get(fragment_shader)
                    .ok_or_else(|| Error::new(ErrorKind::StaleReference, "fragment shader not found"))?;
                self.build_graphics(dev, *vs, *fs, *topology, render_pass, extent)?;
            }
            PipelineKind::Compute { shader } => {
                let (cs, _) = shader_modules.get(shader).ok_or_else(|| Error::new(ErrorKind::StaleReference, "compute shader not found"))?;
                self.build_compute(dev, *cs)?;
            }
        }

        self.lifecycle = Lifecycle::Created;
        Ok(())
    }

    fn build_graphics(
        &mut self,
        dev: &Device,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
        topology: PrimitiveTopology,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let entry = std::ffi::CString::new("main").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(&entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(&entry)
                .build(),
        ];

        let bindings = if let Some(stride) = self.vertex_stride {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        } else {
            vec![]
        };
        let attrs: Vec<vk::VertexInputAttributeDescription> = self
            .attrs
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: a.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attrs);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk_topology(topology))
            .primitive_restart_enable(false);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(std::slice::from_ref(&viewport))
            .scissors(std::slice::from_ref(&scissor));

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();
        let blend_state = vk::PipelineColorBlendStateCreateInfo::builder().attachments(std::slice::from_ref(&blend_attachment));

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend_state)
            .layout(self.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            dev.dev
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| Error::new(ErrorKind::ValidationFailed, format!("vkCreateGraphicsPipelines failed: {:?}", e)))?
        };
        self.handle = pipelines[0];
        Ok(())
    }

    fn build_compute(&mut self, dev: &Device, shader: vk::ShaderModule) -> Result<()> {
        let entry = std::ffi::CString::new("main").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader)
            .name(&entry)
            .build();
        let create_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(self.pipeline_layout).build();
        let pipelines = unsafe {
            dev.dev
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| Error::new(ErrorKind::ValidationFailed, format!("vkCreateComputePipelines failed: {:?}", e)))?
        };
        self.handle = pipelines[0];
        Ok(())
    }

    pub fn destroy(&mut self, dev: &Device, descpool: &mut DescPool) -> Result<()> {
        self.lifecycle.require_not_destroyed()?;
        unsafe {
            if self.handle != vk::Pipeline::null() {
                dev.dev.destroy_pipeline(self.handle, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                dev.dev.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if let Some(set) = self.descriptor_set.take() {
                descpool.free_descriptor(&dev.dev, &set);
            }
            if self.descriptor_layout != vk::DescriptorSetLayout::null() {
                descpool.destroy_layout(&dev.dev, self.descriptor_layout);
            }
        }
        self.lifecycle = Lifecycle::Destroyed;
        Ok(())
    }
}

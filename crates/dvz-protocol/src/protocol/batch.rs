// Append-only collection of requests submitted together.
//
// A batch is an ordered, append-only sequence of requests built up by one
// thread and handed to the dispatcher as a unit. Only the thread that
// built a batch may submit it; a batch is not `Sync`.
//
// The "ordered Vec the caller pushes onto and the backend drains" shape is
// carried over from this workspace's previous per-frame surface list, and
// `bincode`/`serde` are already in the dependency tree for the optional
// trace-log serialization this supports.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::id::{Id, IdCounter};
use crate::protocol::request::{ObjectKind, Request, RequestAction, RequestFlags, RequestPayload};

/// An ordered, append-only sequence of requests. Not `Sync`: the borrow of
/// `IdCounter` used by typed constructors ties a batch to the thread that
/// built it, matching the single-writer rule above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    requests: Vec<Request>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Request> {
        self.requests.iter()
    }

    /// Consumes the batch, handing its requests to the dispatcher in
    /// submission order.
    pub fn into_requests(self) -> Vec<Request> {
        self.requests
    }

    fn push(&mut self, id: Option<Id>, action: RequestAction, kind: ObjectKind, payload: RequestPayload, flags: RequestFlags) -> Option<Id> {
        self.requests.push(Request {
            id,
            action,
            kind,
            payload,
            flags,
            tag: None,
        });
        id
    }

    /// Tags the most recently pushed request for tracing.
    pub fn tag_last(&mut self, tag: impl Into<String>) -> &mut Self {
        if let Some(last) = self.requests.last_mut() {
            last.tag = Some(tag.into());
        }
        self
    }

    pub fn create_canvas(&mut self, counter: &IdCounter, width: u32, height: u32, clear_color: [f32; 4], image_count: u32) -> Id {
        let id = counter.next();
        self.push(
            Some(id),
            RequestAction::Create,
            ObjectKind::Canvas,
            RequestPayload::CreateCanvas {
                width,
                height,
                clear_color,
                image_count,
            },
            RequestFlags::empty(),
        );
        id
    }

    pub fn create_dat(&mut self, counter: &IdCounter, buffer_type: super::request::BufferType, size: u64, flags: RequestFlags) -> Id {
        let id = counter.next();
        self.push(
            Some(id),
            RequestAction::Create,
            ObjectKind::Dat,
            RequestPayload::CreateDat { buffer_type, size },
            flags,
        );
        id
    }

    pub fn create_tex(&mut self, counter: &IdCounter, format: super::request::TexFormat, dims: super::request::TexDims, flags: RequestFlags) -> Id {
        let id = counter.next();
        self.push(
            Some(id),
            RequestAction::Create,
            ObjectKind::Tex,
            RequestPayload::CreateTex { format, dims },
            flags,
        );
        id
    }

    pub fn create_sampler(&mut self, counter: &IdCounter, filter: super::request::FilterMode, address_mode: super::request::AddressMode) -> Id {
        let id = counter.next();
        self.push(
            Some(id),
            RequestAction::Create,
            ObjectKind::Sampler,
            RequestPayload::CreateSampler { filter, address_mode },
            RequestFlags::empty(),
        );
        id
    }

    pub fn create_shader(&mut self, counter: &IdCounter, stage: super::request::ShaderStage, source: super::request::ShaderSource) -> Id {
        let id = counter.next();
        self.push(
            Some(id),
            RequestAction::Create,
            ObjectKind::Shader,
            RequestPayload::CreateShader { stage, source },
            RequestFlags::empty(),
        );
        id
    }

    pub fn create_graphics(
        &mut self,
        counter: &IdCounter,
        vertex_shader: Id,
        fragment_shader: Id,
        topology: super::request::PrimitiveTopology,
        slots: Vec<super::request::SlotDecl>,
    ) -> Id {
        let id = counter.next();
        self.push(
            Some(id),
            RequestAction::Create,
            ObjectKind::Graphics,
            RequestPayload::CreateGraphics {
                vertex_shader,
                fragment_shader,
                topology,
                slots,
            },
            RequestFlags::empty(),
        );
        id
    }

    pub fn create_compute(&mut self, counter: &IdCounter, shader: Id, slots: Vec<super::request::SlotDecl>) -> Id {
        let id = counter.next();
        self.push(
            Some(id),
            RequestAction::Create,
            ObjectKind::Compute,
            RequestPayload::CreateCompute { shader, slots },
            RequestFlags::empty(),
        );
        id
    }

    /// Sets a graphics pipeline's per-vertex stride ahead of its first
    /// use. `kind` is `Graphics` or `Compute` since a slot/push/attr can
    /// target either, but a vertex layout only ever applies to a graphics
    /// pipeline.
    pub fn set_vertex_layout(&mut self, pipeline: Id, stride: u32) {
        self.push(
            Some(pipeline),
            RequestAction::Update,
            ObjectKind::Graphics,
            RequestPayload::SetVertexLayout { stride },
            RequestFlags::empty(),
        );
    }

    pub fn set_attr(&mut self, pipeline: Id, location: u32, offset: u32) {
        self.push(
            Some(pipeline),
            RequestAction::Update,
            ObjectKind::Graphics,
            RequestPayload::SetAttr { location, offset },
            RequestFlags::empty(),
        );
    }

    pub fn set_slot(&mut self, pipeline: Id, kind: ObjectKind, slot: u32, stage: super::request::ShaderStage) {
        self.push(
            Some(pipeline),
            RequestAction::Update,
            kind,
            RequestPayload::SetSlot { slot, stage },
            RequestFlags::empty(),
        );
    }

    pub fn set_push(&mut self, pipeline: Id, kind: ObjectKind, stages: Vec<super::request::ShaderStage>, offset: u32, bytes: Vec<u8>) {
        self.push(
            Some(pipeline),
            RequestAction::Update,
            kind,
            RequestPayload::SetPush { stages, offset, bytes },
            RequestFlags::empty(),
        );
    }

    pub fn delete(&mut self, kind: ObjectKind, id: Id) {
        self.push(Some(id), RequestAction::Delete, kind, RequestPayload::Delete, RequestFlags::empty());
    }

    pub fn resize_canvas(&mut self, canvas: Id, width: u32, height: u32) {
        self.push(
            Some(canvas),
            RequestAction::Resize,
            ObjectKind::Canvas,
            RequestPayload::Resize { width, height },
            RequestFlags::empty(),
        );
    }

    pub fn bind_vertex(&mut self, pipeline: Id, dat: Id) {
        self.push(
            Some(pipeline),
            RequestAction::Bind,
            ObjectKind::Graphics,
            RequestPayload::BindVertex { pipeline, dat },
            RequestFlags::empty(),
        );
    }

    pub fn bind_index(&mut self, pipeline: Id, dat: Id) {
        self.push(
            Some(pipeline),
            RequestAction::Bind,
            ObjectKind::Graphics,
            RequestPayload::BindIndex { pipeline, dat },
            RequestFlags::empty(),
        );
    }

    pub fn bind_dat(&mut self, pipeline: Id, slot: u32, dat: Id) {
        self.push(
            Some(pipeline),
            RequestAction::Bind,
            ObjectKind::Graphics,
            RequestPayload::BindDat { pipeline, slot, dat },
            RequestFlags::empty(),
        );
    }

    pub fn bind_tex(&mut self, pipeline: Id, slot: u32, tex: Id, sampler: Id) {
        self.push(
            Some(pipeline),
            RequestAction::Bind,
            ObjectKind::Graphics,
            RequestPayload::BindTex {
                pipeline,
                slot,
                tex,
                sampler,
            },
            RequestFlags::empty(),
        );
    }

    /// Uploading a zero-length range is a documented no-op, not an error.
    /// Enforced here rather than in the dispatcher so a zero-size upload
    /// never even enters the request stream.
    pub fn upload_dat(&mut self, dat: Id, offset: u64, bytes: Vec<u8>, image_index: Option<u32>, flags: RequestFlags) {
        if bytes.is_empty() {
            return;
        }
        self.push(
            Some(dat),
            RequestAction::Upload,
            ObjectKind::Dat,
            RequestPayload::UploadDat {
                offset,
                bytes,
                image_index,
            },
            flags,
        );
    }

    pub fn upload_tex(&mut self, tex: Id, bytes: Vec<u8>, flags: RequestFlags) {
        if bytes.is_empty() {
            return;
        }
        self.push(Some(tex), RequestAction::Upload, ObjectKind::Tex, RequestPayload::UploadTex { bytes }, flags);
    }

    /// `image_index` selects which physical copy to read back for a `dup`
    /// dat; `None` reads copy 0. Ignored for a non-`dup` dat.
    pub fn download_dat(&mut self, dat: Id, offset: u64, size: u64, image_index: Option<u32>, flags: RequestFlags) {
        self.push(
            Some(dat),
            RequestAction::Download,
            ObjectKind::Dat,
            RequestPayload::DownloadDat { offset, size, image_index },
            flags,
        );
    }

    pub fn record_begin(&mut self, canvas: Id) {
        self.push(Some(canvas), RequestAction::Record, ObjectKind::Canvas, RequestPayload::RecordBegin, RequestFlags::empty());
    }

    pub fn record_viewport(&mut self, canvas: Id, x: i32, y: i32, width: u32, height: u32) {
        self.push(
            Some(canvas),
            RequestAction::Record,
            ObjectKind::Canvas,
            RequestPayload::RecordViewport { x, y, width, height },
            RequestFlags::empty(),
        );
    }

    pub fn record_push(&mut self, canvas: Id, pipeline: Id, stages: Vec<super::request::ShaderStage>, offset: u32, bytes: Vec<u8>) {
        self.push(
            Some(canvas),
            RequestAction::Record,
            ObjectKind::Canvas,
            RequestPayload::RecordPush {
                pipeline,
                stages,
                offset,
                bytes,
            },
            RequestFlags::empty(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_draw(
        &mut self,
        canvas: Id,
        kind: super::request::DrawKind,
        pipeline: Id,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
        index_offset: u32,
        indirect_dat: Option<Id>,
    ) {
        self.push(
            Some(canvas),
            RequestAction::Record,
            ObjectKind::Canvas,
            RequestPayload::RecordDraw {
                kind,
                pipeline,
                first_vertex,
                vertex_count,
                first_instance,
                instance_count,
                index_offset,
                indirect_dat,
            },
            RequestFlags::empty(),
        );
    }

    pub fn record_end(&mut self, canvas: Id) {
        self.push(Some(canvas), RequestAction::Record, ObjectKind::Canvas, RequestPayload::RecordEnd, RequestFlags::empty());
    }

    /// Serializes the batch to the binary trace format.
    pub fn to_trace_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::new(ErrorKind::ValidationFailed, format!("trace encode failed: {}", e)))
    }

    pub fn from_trace_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::new(ErrorKind::ValidationFailed, format!("trace decode failed: {}", e)))
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request::{AddressMode, FilterMode};

    #[test]
    fn batch_round_trips_through_trace_bytes() {
        let counter = IdCounter::new();
        let mut batch = Batch::new();
        batch.create_sampler(&counter, FilterMode::Linear, AddressMode::ClampToEdge);
        let bytes = batch.to_trace_bytes().unwrap();
        let decoded = Batch::from_trace_bytes(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn zero_length_upload_is_a_no_op() {
        let counter = IdCounter::new();
        let mut batch = Batch::new();
        let dat = batch.create_dat(&counter, super::super::request::BufferType::Storage, 64, RequestFlags::empty());
        batch.upload_dat(dat, 0, Vec::new(), None, RequestFlags::empty());
        assert_eq!(batch.len(), 1);
    }
}

// The serializable request: an immutable record describing one operation
// (action, object kind, target id, an action-specific payload, optional
// flags, and an optional trace tag).
//
// `serde::{Serialize, Deserialize}` was already in use for wire-shaped
// structs elsewhere in this stack (a uniform-buffer SSBO struct);
// generalized here to the whole request so a `Batch` can be serialized to
// a binary trace: the batch stream is optionally loggable for later
// replay.

use serde::{Deserialize, Serialize};

use crate::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Canvas,
    Dat,
    Tex,
    Sampler,
    Shader,
    Graphics,
    Compute,
    Recorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestAction {
    Create,
    Delete,
    Resize,
    Update,
    Bind,
    Record,
    Upload,
    Download,
}

bitflags::bitflags! {
    #[derive(Serialize, Deserialize)]
    pub struct RequestFlags: u32 {
        /// The upload/download call should block until the copy completes
        /// (`wait=true`).
        const WAIT = 0b0001;
        /// Marks a dat as "dup": allocate one copy per swapchain image
        /// (per-image duplication flag).
        const DUP = 0b0010;
        /// Keep a staging buffer alive across uploads instead of
        /// releasing it after each one (`persistent_staging`).
        const PERSISTENT_STAGING = 0b0100;
        /// The dat is mappable from the host (mappable flag).
        const MAPPABLE = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferType {
    Staging,
    Vertex,
    Index,
    Uniform,
    Storage,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TexFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    R32Sfloat,
    Rgba32Sfloat,
    D32Sfloat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TexDims {
    D1(u32),
    D2(u32, u32),
    D3(u32, u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderSource {
    Spirv(Vec<u8>),
    Glsl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawKind {
    Direct,
    Indexed,
    Indirect,
    IndexedIndirect,
}

/// One descriptor slot declaration, collected by a graphics/compute
/// pipeline before its first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDecl {
    pub slot: u32,
    pub stage: ShaderStage,
}

/// The action-specific payload of a Request: a tagged union the
/// dispatcher (protocol/dispatcher.rs) exhaustively matches on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
    CreateCanvas {
        width: u32,
        height: u32,
        clear_color: [f32; 4],
        image_count: u32,
    },
    CreateDat {
        buffer_type: BufferType,
        size: u64,
    },
    CreateTex {
        format: TexFormat,
        dims: TexDims,
    },
    CreateSampler {
        filter: FilterMode,
        address_mode: AddressMode,
    },
    CreateShader {
        stage: ShaderStage,
        source: ShaderSource,
    },
    CreateGraphics {
        vertex_shader: Id,
        fragment_shader: Id,
        topology: PrimitiveTopology,
        slots: Vec<SlotDecl>,
    },
    CreateCompute {
        shader: Id,
        slots: Vec<SlotDecl>,
    },
    Delete,
    Resize {
        width: u32,
        height: u32,
    },
    SetVertexLayout {
        stride: u32,
    },
    SetAttr {
        location: u32,
        offset: u32,
    },
    SetSlot {
        slot: u32,
        stage: ShaderStage,
    },
    SetPush {
        stages: Vec<ShaderStage>,
        offset: u32,
        bytes: Vec<u8>,
    },
    BindVertex {
        pipeline: Id,
        dat: Id,
    },
    BindIndex {
        pipeline: Id,
        dat: Id,
    },
    BindDat {
        pipeline: Id,
        slot: u32,
        dat: Id,
    },
    BindTex {
        pipeline: Id,
        slot: u32,
        tex: Id,
        sampler: Id,
    },
    UploadDat {
        offset: u64,
        bytes: Vec<u8>,
        image_index: Option<u32>,
    },
    UploadTex {
        bytes: Vec<u8>,
    },
    DownloadDat {
        offset: u64,
        size: u64,
        image_index: Option<u32>,
    },
    RecordBegin,
    RecordViewport {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    RecordPush {
        pipeline: Id,
        stages: Vec<ShaderStage>,
        offset: u32,
        bytes: Vec<u8>,
    },
    RecordDraw {
        kind: DrawKind,
        pipeline: Id,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
        index_offset: u32,
        indirect_dat: Option<Id>,
    },
    RecordEnd,
}

/// One immutable protocol instruction. `id` is the object a
/// create-action assigns or a bind/record/upload/delete targets;
/// `reference` is the id any dependent objects a payload names (e.g. a
/// `BindVertex`'s pipeline and dat) — those are carried inside the
/// payload itself rather than duplicated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Option<Id>,
    pub action: RequestAction,
    pub kind: ObjectKind,
    pub payload: RequestPayload,
    pub flags: RequestFlags,
    pub tag: Option<String>,
}

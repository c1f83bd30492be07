pub mod batch;
pub mod dispatcher;
pub mod request;

pub use batch::Batch;
pub use dispatcher::{Dispatcher, DownloadResult};
pub use request::{
    AddressMode, BufferType, DrawKind, FilterMode, ObjectKind, PrimitiveTopology, Request, RequestAction, RequestFlags,
    RequestPayload, ShaderSource, ShaderStage, SlotDecl, TexDims, TexFormat,
};

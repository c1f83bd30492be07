// The L2 resource objects: typed wrappers over raw Vulkan handles, each
// carrying its own `Lifecycle` state machine.

pub mod buffer;
pub mod command_pool;
pub mod image;
pub mod lifecycle;
pub mod pipeline;
pub mod sampler;
pub mod shader;

pub use buffer::Dat;
pub use command_pool::CommandPool;
pub use image::Tex;
pub use lifecycle::Lifecycle;
pub use pipeline::{Pipeline, PipelineKind, SlotBinding};
pub use sampler::Sampler;
pub use shader::Shader;

/// The tagged union over every resource kind the manager's `Id` table can
/// hold, one lookup answering "what kind is this id" without probing five
/// separate tables.
pub enum ResourceObject {
    Dat(Dat),
    Tex(Tex),
    Sampler(Sampler),
    Shader(Shader),
    Pipeline(Pipeline),
}

impl ResourceObject {
    pub fn kind(&self) -> crate::protocol::request::ObjectKind {
        use crate::protocol::request::ObjectKind;
        match self {
            ResourceObject::Dat(_) => ObjectKind::Dat,
            ResourceObject::Tex(_) => ObjectKind::Tex,
            ResourceObject::Sampler(_) => ObjectKind::Sampler,
            ResourceObject::Shader(_) => ObjectKind::Shader,
            ResourceObject::Pipeline(p) => match p.kind {
                PipelineKind::Graphics { .. } => ObjectKind::Graphics,
                PipelineKind::Compute { .. } => ObjectKind::Compute,
            },
        }
    }
}

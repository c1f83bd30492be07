// The Shader object: one compiled shader stage.
//
// A shader is one pipeline stage's compiled code, taking either SPIR-V
// bytes directly or GLSL source to be compiled. Nothing upstream has a
// shader-compilation step at all (pre-built SPIR-V ships from its own
// build.rs); GLSL compilation is new code built around the
// `ShaderSource::Glsl` variant, using `shaderc` because that is the crate
// the rest of the Vulkan/ash ecosystem reaches for (it wraps the same
// glslang/shaderc used by sibling Vulkan tooling).

use ash::vk;

use crate::error::{Error, ErrorKind, Result};
use crate::protocol::request::{ShaderSource, ShaderStage};
use crate::resources::lifecycle::Lifecycle;

fn vk_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

#[cfg(feature = "glsl")]
fn compile_glsl(stage: ShaderStage, source: &str) -> Result<Vec<u32>> {
    let kind = match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        ShaderStage::Compute => shaderc::ShaderKind::Compute,
    };
    let compiler = shaderc::Compiler::new().ok_or_else(|| Error::new(ErrorKind::ShaderCompile, "could not initialize shaderc"))?;
    let artifact = compiler
        .compile_into_spirv(source, kind, "<inline>", "main", None)
        .map_err(|e| Error::new(ErrorKind::ShaderCompile, e.to_string()))?;
    Ok(artifact.as_binary().to_vec())
}

#[cfg(not(feature = "glsl"))]
fn compile_glsl(_stage: ShaderStage, _source: &str) -> Result<Vec<u32>> {
    Err(Error::new(
        ErrorKind::ShaderCompile,
        "GLSL shader sources require the `glsl` feature (shaderc) to be enabled",
    ))
}

pub struct Shader {
    pub stage: ShaderStage,
    source: ShaderSource,
    pub module: vk::ShaderModule,
    pub lifecycle: Lifecycle,
}

impl Shader {
    pub fn new(stage: ShaderStage, source: ShaderSource) -> Self {
        Self {
            stage,
            source,
            module: vk::ShaderModule::null(),
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        vk_stage(self.stage)
    }

    pub fn create(&mut self, dev: &crate::device::Device) -> Result<()> {
        let words: Vec<u32> = match &self.source {
            ShaderSource::Spirv(bytes) => {
                if bytes.len() % 4 != 0 {
                    return Err(Error::new(ErrorKind::ShaderCompile, "SPIR-V byte length is not a multiple of 4"));
                }
                bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            }
            ShaderSource::Glsl(src) => compile_glsl(self.stage, src)?,
        };
        let info = vk::ShaderModuleCreateInfo::builder().code(&words);
        self.module = unsafe {
            dev.dev
                .create_shader_module(&info, None)
                .map_err(|e| Error::new(ErrorKind::ShaderCompile, format!("vkCreateShaderModule failed: {:?}", e)))?
        };
        self.lifecycle = self.lifecycle.advance(Lifecycle::Created)?;
        Ok(())
    }

    pub fn destroy(&mut self, dev: &crate::device::Device) -> Result<()> {
        self.lifecycle.require_not_destroyed()?;
        unsafe {
            dev.dev.destroy_shader_module(self.module, None);
        }
        self.lifecycle = Lifecycle::Destroyed;
        Ok(())
    }
}

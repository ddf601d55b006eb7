use super::{Workflow, WorkflowCache};
use crate::error::{RenderError, Result};
use crate::shaders;
use naga::back::spv;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use prism_rhi::ShaderStage;
use serde::Serialize;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Compiler and writer settings folded into every shader cache key. Bump it with the naga
/// version or with any change to [`spirv_options`] so stale modules are not served.
pub const SPIRV_COMPILER: &str = "naga-23/spv-default/no-coordinate-adjust";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    fn naga_stage(self) -> naga::ShaderStage {
        match self {
            ShaderKind::Vertex => naga::ShaderStage::Vertex,
            ShaderKind::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// One entry point of an embedded WGSL shader.
#[derive(Debug, Clone, Serialize)]
pub struct ShaderInput {
    pub name: String,
    pub kind: ShaderKind,
    pub entry_point: String,
    pub compiler: &'static str,
}

impl ShaderInput {
    pub fn new(name: &str, kind: ShaderKind, entry_point: &str) -> Self {
        Self { name: name.to_string(), kind, entry_point: entry_point.to_string(), compiler: SPIRV_COMPILER }
    }
}

/// Embedded WGSL to validated SPIR-V (little-endian words).
#[derive(Debug, Default)]
pub struct ShaderWorkflow;

impl Workflow for ShaderWorkflow {
    const NAME: &'static str = "shader";
    type Input = ShaderInput;
    type Output = Vec<u8>;

    fn source(&self, input: &ShaderInput) -> Result<Vec<u8>> {
        embedded(&input.name).map(|s| s.as_bytes().to_vec())
    }

    fn work(&mut self, input: &ShaderInput) -> Result<Vec<u8>> {
        let source = embedded(&input.name)?;
        log::debug!("compiling shader {}::{}", input.name, input.entry_point);
        compile_wgsl(&input.name, source, input.kind, &input.entry_point)
    }

    fn encode(output: &Vec<u8>) -> Vec<u8> {
        output.clone()
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        let magic = bytes.get(..4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        if bytes.len() % 4 != 0 || magic != Some(SPIRV_MAGIC) {
            return Err(RenderError::CacheDecode {
                key: key.to_string(),
                message: format!("{} bytes are not a SPIR-V module", bytes.len()),
            });
        }
        Ok(bytes.to_vec())
    }
}

fn embedded(name: &str) -> Result<&'static str> {
    shaders::wgsl_source(name).ok_or_else(|| RenderError::Shader {
        name: name.to_string(),
        message: "no embedded source with this name".to_string(),
    })
}

/// Parse, validate and translate one entry point of `source` to SPIR-V.
pub fn compile_wgsl(name: &str, source: &str, kind: ShaderKind, entry_point: &str) -> Result<Vec<u8>> {
    let shader_error = |message: String| RenderError::Shader { name: name.to_string(), message };
    let module = naga::front::wgsl::parse_str(source).map_err(|e| shader_error(e.emit_to_string(source)))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| shader_error(e.emit_to_string(source)))?;

    let options = spirv_options();
    let pipeline_options = spv::PipelineOptions {
        shader_stage: kind.naga_stage(),
        entry_point: entry_point.to_string(),
    };
    let words = spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| shader_error(e.to_string()))?;
    Ok(words.iter().flat_map(|w| w.to_le_bytes()).collect())
}

fn spirv_options() -> spv::Options<'static> {
    let mut options = spv::Options::default();
    // wgpu consumes SPIR-V without undoing a Y flip, so keep clip space untouched.
    options.flags.remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);
    options
}

/// Fetch a shader stage through the cache.
pub fn load_shader(cache: &WorkflowCache, name: &str, kind: ShaderKind, entry_point: &str) -> Result<ShaderStage> {
    let input = ShaderInput::new(name, kind, entry_point);
    let source = cache.start(&mut ShaderWorkflow, &input)?;
    Ok(ShaderStage { source, entry_point: entry_point.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_embedded_shader_compiles() {
        for (name, entries) in shaders::ENTRY_POINTS {
            let source = shaders::wgsl_source(name).unwrap();
            for (kind, entry) in entries.iter() {
                let spirv = compile_wgsl(name, source, *kind, entry)
                    .unwrap_or_else(|e| panic!("{}::{} failed: {}", name, entry, e));
                assert_eq!(spirv.len() % 4, 0);
                assert_eq!(&spirv[..4], &SPIRV_MAGIC.to_le_bytes());
            }
        }
    }

    #[test]
    fn invalid_wgsl_reports_the_shader_name() {
        let err = compile_wgsl("broken", "fn nope( {", ShaderKind::Vertex, "vs_main").unwrap_err();
        assert!(matches!(err, RenderError::Shader { ref name, .. } if name == "broken"));
    }

    #[test]
    fn decode_rejects_non_spirv() {
        assert!(ShaderWorkflow::decode("k", b"abc").is_err());
        assert!(ShaderWorkflow::decode("k", &[0u8; 8]).is_err());
        let mut ok = SPIRV_MAGIC.to_le_bytes().to_vec();
        ok.extend_from_slice(&[0; 4]);
        assert_eq!(ShaderWorkflow::decode("k", &ok).unwrap(), ok);
    }

    #[test]
    fn cache_key_changes_with_the_compiler() {
        let input = ShaderInput::new("lines", ShaderKind::Vertex, "vs_main");
        assert_eq!(input.compiler, SPIRV_COMPILER);
        let current = WorkflowCache::key(&ShaderWorkflow, &input).unwrap();
        let upgraded = ShaderInput { compiler: "naga-24/spv-default/no-coordinate-adjust", ..input.clone() };
        assert_ne!(current, WorkflowCache::key(&ShaderWorkflow, &upgraded).unwrap());
        assert_eq!(current, WorkflowCache::key(&ShaderWorkflow, &input).unwrap());
    }

    #[test]
    fn unknown_shader_is_an_error() {
        let err = load_shader(&WorkflowCache::disabled(), "missing", ShaderKind::Vertex, "vs_main").unwrap_err();
        assert!(matches!(err, RenderError::Shader { .. }));
    }
}

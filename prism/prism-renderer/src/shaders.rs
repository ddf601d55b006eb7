//! WGSL sources compiled into the crate. Compiled to SPIR-V through the workflow cache.

use crate::workflow::ShaderKind;

const LINES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/lines.wgsl"));
const GBUFFER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/gbuffer.wgsl"));
const SHADOW: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shadow.wgsl"));
const SSAO: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/ssao.wgsl"));
const SSAO_BLUR: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/ssao_blur.wgsl"));
const LIGHTING: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/lighting.wgsl"));
const BLUR: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/blur.wgsl"));
const POST: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/post.wgsl"));

const VS_FS: &[(ShaderKind, &str)] = &[(ShaderKind::Vertex, "vs_main"), (ShaderKind::Fragment, "fs_main")];

/// Every embedded shader with the entry points the systems use.
pub const ENTRY_POINTS: &[(&str, &[(ShaderKind, &str)])] = &[
    ("lines", VS_FS),
    ("gbuffer", VS_FS),
    ("shadow", VS_FS),
    ("ssao", VS_FS),
    ("ssao_blur", VS_FS),
    ("lighting", VS_FS),
    ("blur", VS_FS),
    ("post", VS_FS),
];

pub fn wgsl_source(name: &str) -> Option<&'static str> {
    match name {
        "lines" => Some(LINES),
        "gbuffer" => Some(GBUFFER),
        "shadow" => Some(SHADOW),
        "ssao" => Some(SSAO),
        "ssao_blur" => Some(SSAO_BLUR),
        "lighting" => Some(LIGHTING),
        "blur" => Some(BLUR),
        "post" => Some(POST),
        _ => None,
    }
}

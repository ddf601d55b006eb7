//! wgpu graphics pipeline creation from SPIR-V stages.

use super::{descriptor::WgpuDescriptorSetLayout, texture_format_to_wgpu};
use crate::{
    BlendFactor, BlendOp, BlendState, CompareOp, CullMode, FrontFace, GraphicsPipeline,
    GraphicsPipelineDescriptor, PrimitiveTopology, ShaderStage, VertexFormat, VertexInputRate,
};

pub struct WgpuGraphicsPipeline {
    pipeline: wgpu::RenderPipeline,
    label: Option<&'static str>,
}

impl WgpuGraphicsPipeline {
    pub fn raw(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }
}

impl std::fmt::Debug for WgpuGraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuGraphicsPipeline").field("label", &self.label).finish()
    }
}

impl GraphicsPipeline for WgpuGraphicsPipeline {
    fn label(&self) -> Option<&'static str> {
        self.label
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn vertex_format_to_wgpu(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
    }
}

fn blend_factor_to_wgpu(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_to_wgpu(blend: &BlendState) -> wgpu::BlendState {
    let component = |c: &crate::BlendComponent| wgpu::BlendComponent {
        src_factor: blend_factor_to_wgpu(c.src_factor),
        dst_factor: blend_factor_to_wgpu(c.dst_factor),
        operation: match c.operation {
            BlendOp::Add => wgpu::BlendOperation::Add,
            BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        },
    };
    wgpu::BlendState { color: component(&blend.color), alpha: component(&blend.alpha) }
}

fn compare_to_wgpu(op: CompareOp) -> wgpu::CompareFunction {
    match op {
        CompareOp::Never => wgpu::CompareFunction::Never,
        CompareOp::Less => wgpu::CompareFunction::Less,
        CompareOp::Equal => wgpu::CompareFunction::Equal,
        CompareOp::LessOrEqual => wgpu::CompareFunction::LessEqual,
        CompareOp::Greater => wgpu::CompareFunction::Greater,
        CompareOp::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareOp::GreaterOrEqual => wgpu::CompareFunction::GreaterEqual,
        CompareOp::Always => wgpu::CompareFunction::Always,
    }
}

fn shader_module(device: &wgpu::Device, label: Option<&str>, stage: &ShaderStage) -> Result<wgpu::ShaderModule, String> {
    if stage.source.is_empty() || stage.source.len() % 4 != 0 {
        return Err(format!("shader {:?}: SPIR-V length {} not a multiple of 4", label, stage.source.len()));
    }
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label,
        source: wgpu::util::make_spirv(&stage.source),
    }))
}

pub(super) fn create_graphics_pipeline(
    device: &wgpu::Device,
    desc: &GraphicsPipelineDescriptor,
) -> Result<WgpuGraphicsPipeline, String> {
    let mut bind_group_layouts = Vec::with_capacity(desc.set_layouts.len());
    for layout in &desc.set_layouts {
        let layout = layout
            .as_any()
            .downcast_ref::<WgpuDescriptorSetLayout>()
            .ok_or("pipeline: set layout is not a WgpuDescriptorSetLayout")?;
        bind_group_layouts.push(layout.raw());
    }
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: desc.label,
        bind_group_layouts: &bind_group_layouts,
        push_constant_ranges: &[],
    });

    let vs = shader_module(device, desc.label, &desc.vertex_shader)?;
    let fs = desc
        .fragment_shader
        .as_ref()
        .map(|stage| shader_module(device, desc.label, stage))
        .transpose()?;

    let mut bindings = desc.vertex_input.bindings.clone();
    bindings.sort_by_key(|b| b.binding);
    let attributes: Vec<Vec<wgpu::VertexAttribute>> = bindings
        .iter()
        .map(|b| {
            desc.vertex_input
                .attributes
                .iter()
                .filter(|a| a.binding == b.binding)
                .map(|a| wgpu::VertexAttribute {
                    format: vertex_format_to_wgpu(a.format),
                    offset: u64::from(a.offset),
                    shader_location: a.location,
                })
                .collect()
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout> = bindings
        .iter()
        .zip(&attributes)
        .map(|(b, attrs)| wgpu::VertexBufferLayout {
            array_stride: u64::from(b.stride),
            step_mode: match b.input_rate {
                VertexInputRate::Vertex => wgpu::VertexStepMode::Vertex,
                VertexInputRate::Instance => wgpu::VertexStepMode::Instance,
            },
            attributes: attrs,
        })
        .collect();

    let targets: Vec<Option<wgpu::ColorTargetState>> = desc
        .color_targets
        .iter()
        .map(|t| {
            Some(wgpu::ColorTargetState {
                format: texture_format_to_wgpu(t.format),
                blend: t.blend.as_ref().map(blend_to_wgpu),
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: desc.label,
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &vs,
            entry_point: Some(&desc.vertex_shader.entry_point),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: match (&fs, &desc.fragment_shader) {
            (Some(module), Some(stage)) => Some(wgpu::FragmentState {
                module,
                entry_point: Some(&stage.entry_point),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            _ => None,
        },
        primitive: wgpu::PrimitiveState {
            topology: match desc.primitive_topology {
                PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
                PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            },
            front_face: match desc.rasterization.front_face {
                FrontFace::CounterClockwise => wgpu::FrontFace::Ccw,
                FrontFace::Clockwise => wgpu::FrontFace::Cw,
            },
            cull_mode: match desc.rasterization.cull_mode {
                CullMode::None => None,
                CullMode::Back => Some(wgpu::Face::Back),
                CullMode::Front => Some(wgpu::Face::Front),
            },
            ..Default::default()
        },
        depth_stencil: desc.depth_stencil.as_ref().map(|d| wgpu::DepthStencilState {
            format: texture_format_to_wgpu(d.format),
            depth_write_enabled: d.depth_write_enabled,
            depth_compare: compare_to_wgpu(d.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    Ok(WgpuGraphicsPipeline { pipeline, label: desc.label })
}

use glam::Vec3;
use prism_renderer::{OverlayRenderer, RenderError, Renderer, RendererConfig, Result};
use prism_rhi::headless::{HeadlessDevice, HeadlessSwapchain, RecordedCommand};
use prism_rhi::{Device, FrameBuffer, ImageLayout, LoadOp, RenderPass, Swapchain, SwapchainFrame, TextureFormat};
use scene_api::{
    CameraGroup, CoordinateSystem, LinesGrid, MeshData, PhysicalBasedMaterial, PointLight, Projection, Scene, Shape,
    TransformWrap, TrianglesMesh,
};
use std::sync::Arc;

const PRESENT_FORMAT: TextureFormat = TextureFormat::Bgra8UnormSrgb;

fn config() -> RendererConfig {
    let mut config = RendererConfig::default();
    config.cache.shaders = false;
    config.cache.irradiance = false;
    config.shadow.resolution = 16;
    config.shadow.max_lights = 2;
    config.blur.iterations = 2;
    config
}

fn setup(config: RendererConfig) -> (Arc<HeadlessDevice>, HeadlessSwapchain, Renderer) {
    setup_on(HeadlessDevice::new(), config)
}

fn setup_on(device: Arc<HeadlessDevice>, config: RendererConfig) -> (Arc<HeadlessDevice>, HeadlessSwapchain, Renderer) {
    let swapchain = device.create_swapchain((64, 48), 3, PRESENT_FORMAT).unwrap();
    let renderer = Renderer::new(device.clone(), PRESENT_FORMAT, config).unwrap();
    device.take_commands();
    (device, swapchain, renderer)
}

fn demo_scene(with_camera: bool) -> Scene {
    let mut scene = Scene::new();
    scene.add(
        Shape::new("cube")
            .with(TrianglesMesh::new(Arc::new(MeshData::cube(0.5))))
            .with(PhysicalBasedMaterial::default().with_base_color([0.8, 0.2, 0.2, 1.0]))
            .with(TransformWrap::from_translation(Vec3::new(0.0, 0.5, 0.0))),
    );
    scene.add(
        Shape::new("floor")
            .with(TrianglesMesh::new(Arc::new(MeshData::plane(5.0))))
            .with(PhysicalBasedMaterial::default().with_metallic_roughness(0.0, 0.9)),
    );
    scene.add(
        Shape::new("key light")
            .with(PointLight::default())
            .with(TransformWrap::from_translation(Vec3::new(2.0, 3.0, 2.0))),
    );
    scene.add(Shape::new("axes").with(CoordinateSystem::new(1.0)));
    scene.add(Shape::new("grid").with(LinesGrid::new(5.0, 10, [0.4, 0.4, 0.4])));
    if with_camera {
        let camera = scene.add(
            Shape::new("camera")
                .with(TransformWrap::looking_at(Vec3::new(4.0, 3.0, 6.0), Vec3::ZERO, Vec3::Y))
                .with(Projection::perspective(1.0, 0.1, 100.0)),
        );
        let mut group = CameraGroup::new();
        group.add(camera);
        scene.add(Shape::new("cameras").with(group));
    }
    scene
}

fn render_passes(commands: &[RecordedCommand]) -> Vec<(Option<&'static str>, Vec<LoadOp>)> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRenderPass { label, color_load, .. } => Some((*label, color_load.clone())),
            _ => None,
        })
        .collect()
}

fn assert_clean(device: &HeadlessDevice) {
    let stats = device.stats();
    assert_eq!(stats.layout_violations, 0);
    assert_eq!(stats.incompatible_pipelines, 0);
    assert_eq!(stats.zero_count_draws, 0);
    assert_eq!(stats.incomplete_descriptor_sets, 0);
    assert_eq!(stats.discarded_uploads, 0);
}

#[derive(Debug, Default)]
struct CountingOverlay {
    frames: usize,
}

impl OverlayRenderer for CountingOverlay {
    fn label(&self) -> &'static str {
        "editor_ui"
    }

    fn render(&mut self, _device: &dyn Device, _pass: &mut dyn RenderPass, target: &FrameBuffer) -> Result<()> {
        assert_eq!(target.color_formats(), vec![PRESENT_FORMAT]);
        self.frames += 1;
        Ok(())
    }
}

#[test]
fn full_frame_records_every_pass_in_order() {
    let (device, mut swapchain, mut renderer) = setup(config());
    let scene = demo_scene(true);
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();

    let commands = device.take_commands();
    let labels: Vec<_> = render_passes(&commands).into_iter().map(|(label, _)| label).collect();
    let first = |name: &str| labels.iter().position(|l| *l == Some(name));
    let shadow = first("shadow_map").unwrap();
    let gbuffer = first("pbr_gbuffer").unwrap();
    let ssao = first("ssao").unwrap();
    let lighting = first("lighting").unwrap();
    let blur = first("blur").unwrap();
    let post = first("post_effect").unwrap();
    assert!(shadow < gbuffer && gbuffer < ssao && ssao < lighting && lighting < blur && blur < post);
    // One light casts: six cube faces.
    assert_eq!(labels.iter().filter(|l| **l == Some("shadow_map")).count(), 6);
    assert_eq!(labels.iter().filter(|l| **l == Some("blur")).count(), 4);
    assert!(commands.iter().any(|c| c.is_draw()));

    assert_clean(&device);
    assert_eq!(device.stats().presents, 1);
    assert_eq!(renderer.frame_count(), 1);
}

#[test]
fn overlay_is_the_last_pass_and_loads_the_frame() {
    let (device, mut swapchain, mut renderer) = setup(config());
    renderer.set_overlay(Box::new(CountingOverlay::default()));
    let scene = demo_scene(true);
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();

    let commands = device.take_commands();
    let passes = render_passes(&commands);
    let (label, loads) = passes.last().unwrap();
    assert_eq!(*label, Some("editor_ui"));
    assert_eq!(loads, &vec![LoadOp::Load]);

    // Nothing but the present transition follows the overlay pass.
    let overlay_begin = commands
        .iter()
        .rposition(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
        .unwrap();
    let after: Vec<_> = commands[overlay_begin..]
        .iter()
        .filter(|c| !matches!(c, RecordedCommand::EndRenderPass))
        .skip(1)
        .collect();
    assert!(matches!(
        after.as_slice(),
        [RecordedCommand::TextureBarrier { new_layout: ImageLayout::PresentSrc, .. }, RecordedCommand::Present { .. }]
    ));
    assert_clean(&device);
}

#[test]
fn one_present_per_frame_across_the_ring() {
    let (device, mut swapchain, mut renderer) = setup(config());
    let scene = demo_scene(true);
    for _ in 0..5 {
        renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    }
    let presented: Vec<u32> = device
        .take_commands()
        .into_iter()
        .filter_map(|c| match c {
            RecordedCommand::Present { image_index, .. } => Some(image_index),
            _ => None,
        })
        .collect();
    assert_eq!(presented, vec![0, 1, 2, 0, 1]);
    let stats = device.stats();
    assert_eq!(stats.presents, 5);
    assert_eq!(renderer.frame_count(), 5);
    assert_clean(&device);
}

#[test]
fn frame_without_camera_still_renders() {
    let (device, mut swapchain, mut renderer) = setup(config());
    let scene = demo_scene(false);
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    assert_eq!(device.stats().presents, 2);
    assert_clean(&device);
}

#[test]
fn empty_scene_with_optional_passes_disabled() {
    let mut config = config();
    config.ssao.enabled = false;
    config.blur.enabled = false;
    config.shadow.enabled = false;
    let (device, mut swapchain, mut renderer) = setup(config);
    renderer.render_frame(&Scene::new(), &mut swapchain, 0.016).unwrap();

    let commands = device.take_commands();
    let labels: Vec<_> = render_passes(&commands).into_iter().map(|(label, _)| label).collect();
    assert!(!labels.contains(&Some("shadow_map")));
    assert!(!labels.contains(&Some("ssao")));
    assert!(!labels.contains(&Some("blur")));
    assert_eq!(labels.last(), Some(&Some("post_effect")));
    assert_eq!(device.stats().presents, 1);
    assert_clean(&device);
}

#[test]
fn resize_recreates_targets_after_idle() {
    let (device, mut swapchain, mut renderer) = setup(config());
    let scene = demo_scene(true);
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    let idles = device.stats().wait_idles;

    swapchain.resize((32, 24)).unwrap();
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    assert!(device.stats().wait_idles > idles);
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    assert_eq!(device.stats().presents, 3);
    assert_clean(&device);
}

#[derive(Debug)]
struct MinimizedSwapchain;

impl Swapchain for MinimizedSwapchain {
    fn acquire_next_image(&mut self) -> std::result::Result<SwapchainFrame, String> {
        Err("minimized window has no images".to_string())
    }

    fn present(&mut self, _image_index: u32) -> std::result::Result<(), String> {
        Err("minimized window cannot present".to_string())
    }

    fn resize(&mut self, _extent: (u32, u32)) -> std::result::Result<(), String> {
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        (0, 0)
    }

    fn image_count(&self) -> u32 {
        0
    }

    fn format(&self) -> TextureFormat {
        PRESENT_FORMAT
    }
}

#[test]
fn zero_sized_swapchain_skips_the_frame() {
    let (device, _swapchain, mut renderer) = setup(config());
    let submissions = device.stats().submissions;
    renderer.render_frame(&demo_scene(true), &mut MinimizedSwapchain, 0.016).unwrap();
    assert_eq!(renderer.frame_count(), 0);
    assert_eq!(device.stats().submissions, submissions);
}

#[test]
fn sky_box_texture_needs_six_faces() {
    let (_device, _swapchain, mut renderer) = setup(config());
    let face = vec![255u8; 4 * 4 * 4];
    assert!(matches!(
        renderer.upload_cube_texture(4, &[face.clone(), face]),
        Err(RenderError::MissingResource(_))
    ));
}

#[test]
fn busy_frame_slot_is_left_untouched() {
    let mut config = config();
    config.frames_in_flight = 2;
    let (device, mut swapchain, mut renderer) = setup_on(HeadlessDevice::with_deferred_completion(), config);
    let scene = demo_scene(true);
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    assert_eq!(device.in_flight(), 2);
    device.take_commands();

    let stats = device.stats();
    let indices = renderer.system_frame_indices();
    assert!(matches!(renderer.render_frame(&scene, &mut swapchain, 0.016), Err(RenderError::Gpu(_))));
    assert_eq!(device.stats(), stats);
    assert!(device.take_commands().is_empty());
    assert_eq!(renderer.frame_count(), 2);
    assert_eq!(renderer.frame_slot(), 0);
    assert_eq!(renderer.system_frame_indices(), indices);

    assert_eq!(device.complete(), 2);
    renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
    assert_eq!(renderer.frame_count(), 3);
    assert_eq!(device.in_flight(), 1);
    assert_eq!(device.stats().presents, 3);
    assert!(device.stats().buffer_writes > stats.buffer_writes);
    assert_clean(&device);
}

#[test]
fn system_rings_stay_in_step_with_the_frame_slot() {
    for frames_in_flight in [1, 2, 3] {
        let mut config = config();
        config.frames_in_flight = frames_in_flight;
        let (device, mut swapchain, mut renderer) = setup(config);
        let scene = demo_scene(true);
        for frame in 1..=7 {
            renderer.render_frame(&scene, &mut swapchain, 0.016).unwrap();
            let slot = renderer.frame_slot();
            assert_eq!(slot, frame % frames_in_flight);
            let indices = renderer.system_frame_indices();
            assert_eq!(indices.len(), 8);
            for (label, index) in indices {
                assert_eq!(index, slot, "{} after {} frames", label, frame);
            }
        }
        assert_clean(&device);
    }
}

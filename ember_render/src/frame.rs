//! The frame orchestrator: owns the device context, swapchain, passes,
//! pipelines and scene, sequences initialization, drives the per-frame loop
//! and handles resize-triggered recreation.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use ember_window::events::WindowEvent;
use ember_window::Window;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::pipeline::{flipped_viewport, Pipeline};
use crate::backend::render_pass::{RenderPass, RenderPassBuilder, Subpass};
use crate::backend::vulkan::{
    self, CommandBuffer, CommandPool, Device, Fence, Image, Instance, Semaphore, Shader, Surface,
};
use crate::backend::{DeviceConfig, InstanceConfig};
use crate::material::{CameraParameters, Material, MaterialError, NvpMatrices, UniformManager};
use crate::mesh::{Model, ModelError};
use crate::offscreen::{OffscreenFinalLayout, OffscreenRenderTarget};
use crate::push_constants::PushConstants;
use crate::scene::SceneNode;
use crate::swapchain::{Acquire, PresentOutcome, Swapchain};
use crate::texture::hdri::{self, CaptureShaders, HdriError};
use crate::texture::{Texture, TextureError};

pub const WINDOW_WIDTH: u32 = 800;
pub const WINDOW_HEIGHT: u32 = 600;
pub const WINDOW_TITLE: &str = "ember";

// Compile-time asset and shader locations; there is no CLI surface.
const HDR_PANORAMA: &str = "assets/environment.hdr";
const SKYBOX_MESH: &str = "assets/skybox.staticmesh";
const PBR_MESH: &str = "assets/helmet.staticmesh";
const PROP_MESH: &str = "assets/book.obj";

const PBR_MAPS: [&str; 6] = [
    "assets/helmet/albedo.jpg",
    "assets/helmet/normal.jpg",
    "assets/helmet/emissive.jpg",
    "assets/helmet/ao.jpg",
    "assets/helmet/metallic.png",
    "assets/helmet/roughness.png",
];

const DETAIL_TEXTURES: [&str; 3] = [
    "assets/book.jpg",
    "assets/diffuse.jpg",
    "assets/metal.jpg",
];

const SHADER_PBR_VERT: &str = "shaders/pbr.vert.spv";
const SHADER_PBR_FRAG: &str = "shaders/pbr.frag.spv";
const SHADER_SKYBOX_VERT: &str = "shaders/skybox.vert.spv";
const SHADER_SKYBOX_FRAG: &str = "shaders/skybox.frag.spv";
const SHADER_FULLSCREEN_VERT: &str = "shaders/fullscreen.vert.spv";
const SHADER_COMPOSITE_FRAG: &str = "shaders/composite.frag.spv";
const SHADER_EQUIRECT_FRAG: &str = "shaders/equirect_to_cube.frag.spv";
const SHADER_IRRADIANCE_FRAG: &str = "shaders/irradiance.frag.spv";
const SHADER_PREFILTER_FRAG: &str = "shaders/prefilter.frag.spv";
const SHADER_BRDF_FRAG: &str = "shaders/brdf_lut.frag.spv";

const ENVIRONMENT_SIZE: u32 = 512;
const IRRADIANCE_SIZE: u32 = 32;
const PREFILTER_SIZE: u32 = 128;
const BRDF_LUT_SIZE: u32 = 512;

const ORBIT_DEGREES_PER_SECOND: f32 = 30.0;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Gpu(#[from] vulkan::Error),
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Material(#[from] MaterialError),
    #[error(transparent)]
    Hdri(#[from] HdriError),
    #[error(transparent)]
    Window(#[from] ember_window::Error),
}

/// Advances the current frame-slot index modulo the slot count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameCounter {
    current: usize,
    count: usize,
}

impl FrameCounter {
    pub fn new(count: usize) -> Self {
        assert!(count > 0);
        Self { current: 0, count }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }
}

/// Everything whose lifetime is bound to the current swapchain. Recreation
/// drops this wholesale (after a device-idle wait), then rebuilds it.
struct SwapchainBound {
    // Command buffers must be freed before their pool, and everything here
    // before the device; both hold `Device` clones, so only the intra-struct
    // order matters.
    command_buffers: Vec<CommandBuffer>,
    image_available: Vec<Semaphore>,
    render_finished: Vec<Semaphore>,
    fences: Vec<Fence>,
    frame: FrameCounter,
    pbr_pipeline: Pipeline,
    skybox_pipeline: Pipeline,
    composite_pipeline: Pipeline,
    offscreen: OffscreenRenderTarget,
    render_pass: Arc<RenderPass>,
    swapchain: Swapchain,
}

/// Captured environment maps and the loaded PBR texture images, kept so the
/// descriptor sets can be rebuilt when the swapchain image count changes.
struct SceneAssets {
    environment: Arc<Image>,
    irradiance: Arc<Image>,
    prefilter: Arc<Image>,
    brdf_lut: Arc<Image>,
    pbr_maps: Vec<Arc<Image>>,
}

pub struct Application {
    bound: Option<SwapchainBound>,

    pbr_node: SceneNode,
    screen_node: SceneNode,
    skybox_node: SceneNode,
    assets: SceneAssets,
    push_constants: PushConstants,
    /// Frame-slot count the node descriptor sets were built for.
    frame_slots: u32,

    command_pool: CommandPool,
    device: Device,
    surface: Surface,
    _instance: Instance,
    window: Window,
}

impl Application {
    pub fn new(window: Window) -> Result<Self, Error> {
        let instance = Instance::new(&InstanceConfig::default())?;
        let surface =
            instance.create_surface(window.raw_display_handle()?, window.raw_window_handle()?)?;
        let adapter = instance.select_adapter(&surface)?;
        let device = Device::new(&adapter, &surface, &DeviceConfig::default())?;
        let command_pool = CommandPool::new(&device)?;

        let swapchain = Swapchain::new(&device, &surface, window.inner_size(), &command_pool)?;
        let frame_slots = swapchain.image_count();

        let assets = load_scene_assets(&device, &command_pool)?;

        let mut pbr_node = SceneNode::new();
        let mut screen_node = SceneNode::new();
        let mut skybox_node = SceneNode::new();

        let aspect = WINDOW_WIDTH as f32 / WINDOW_HEIGHT as f32;
        for (node, direction) in [
            (&mut screen_node, glam::Vec3::new(1.0, 1.0, 1.0)),
            (&mut pbr_node, glam::Vec3::new(0.0, -0.2, 1.0)),
            (&mut skybox_node, glam::Vec3::new(0.0, -0.2, 1.0)),
        ] {
            node.camera.orbit_around(glam::Vec3::ZERO, 5.0, direction);
            node.camera.set_perspective(45.0, aspect, 0.1, 1000.0);
            node.camera.set_speed(0.001);
        }

        let mut prop = Model::load_obj(&device, &command_pool, PROP_MESH)?;
        prop.set_model_matrix(glam::Mat4::IDENTITY);
        screen_node.models.push(prop);

        let mut helmet = Model::load_static_mesh(&device, &command_pool, PBR_MESH)?;
        helmet.set_model_matrix(glam::Mat4::IDENTITY);
        pbr_node.models.push(helmet);

        let mut skybox = Model::load_component_mesh(&device, &command_pool, SKYBOX_MESH)?;
        skybox.set_model_matrix(glam::Mat4::IDENTITY);
        skybox_node.models.push(skybox);

        let mut push_constants = PushConstants::new();
        push_constants.update(
            pbr_node.camera.view_matrix(),
            pbr_node.camera.projection_matrix(),
        );

        let mut app = Self {
            bound: None,
            pbr_node,
            screen_node,
            skybox_node,
            assets,
            push_constants,
            frame_slots,
            command_pool,
            device,
            surface,
            _instance: instance,
            window,
        };

        app.setup_node_uniforms(frame_slots)?;
        let bound = app.build_swapchain_bound(swapchain)?;
        app.bound = Some(bound);

        info!("initialization complete");
        Ok(app)
    }

    /// (Re)builds the per-node uniform managers and the PBR material for
    /// `frame_slots` frame slots.
    fn setup_node_uniforms(&mut self, frame_slots: u32) -> Result<(), Error> {
        let device = &self.device;

        let mut skybox_uniforms = UniformManager::new(device, frame_slots)?;
        skybox_uniforms.attach_cubemap(self.assets.environment.clone())?;
        skybox_uniforms.build()?;
        self.skybox_node.uniforms = Some(skybox_uniforms);

        let mut pbr_uniforms = UniformManager::new(device, frame_slots)?;
        pbr_uniforms.attach_cubemap(self.assets.prefilter.clone())?;
        pbr_uniforms.attach_cubemap(self.assets.irradiance.clone())?;
        pbr_uniforms.attach_image(self.assets.brdf_lut.clone())?;
        for map in &self.assets.pbr_maps {
            pbr_uniforms.attach_image(map.clone())?;
        }
        pbr_uniforms.build()?;
        self.pbr_node.uniforms = Some(pbr_uniforms);

        let mut pbr_material = Material::new();
        pbr_material.attach_texture_paths(&DETAIL_TEXTURES);
        pbr_material.build(device, &self.command_pool, frame_slots)?;
        self.pbr_node.material = Some(pbr_material);

        // The composite pass reads nothing from these buffers, but the set
        // layout expects them; leave them at their defaults.
        let mut screen_uniforms = UniformManager::new(device, frame_slots)?;
        screen_uniforms.build()?;
        for frame in 0..frame_slots as usize {
            screen_uniforms.update(
                frame,
                &NvpMatrices::default(),
                &crate::material::ObjectUniform::default(),
                &CameraParameters::default(),
            )?;
        }
        self.screen_node.uniforms = Some(screen_uniforms);

        self.frame_slots = frame_slots;
        Ok(())
    }

    /// Builds everything downstream of a freshly created swapchain: render
    /// pass, offscreen target, screen material, pipelines, command buffers
    /// and sync objects.
    fn build_swapchain_bound(&mut self, mut swapchain: Swapchain) -> Result<SwapchainBound, Error> {
        let device = &self.device;
        let extent = swapchain.extent();
        let image_count = swapchain.image_count();

        let render_pass = Arc::new(build_swapchain_render_pass(
            device,
            swapchain.format(),
            device.find_depth_format()?,
        )?);
        swapchain.create_framebuffers(&render_pass)?;

        let offscreen = OffscreenRenderTarget::new(
            device,
            &self.command_pool,
            extent.width,
            extent.height,
            image_count,
            vk::Format::R32G32B32A32_SFLOAT,
            OffscreenFinalLayout::ShaderRead,
        )?;

        // The composite pass samples the offscreen color results.
        let mut screen_material = Material::new();
        screen_material.attach_per_frame_images(offscreen.color_images().to_vec());
        screen_material.build(device, &self.command_pool, image_count)?;
        self.screen_node.material = Some(screen_material);

        let pbr_pipeline = self.build_pbr_pipeline(&offscreen, extent)?;
        let skybox_pipeline = self.build_skybox_pipeline(&offscreen, extent)?;
        let composite_pipeline = self.build_composite_pipeline(&render_pass, extent)?;

        let command_buffers = self.record_command_buffers(
            &swapchain,
            &render_pass,
            &offscreen,
            &pbr_pipeline,
            &skybox_pipeline,
            &composite_pipeline,
        )?;

        let mut image_available = Vec::with_capacity(image_count as usize);
        let mut render_finished = Vec::with_capacity(image_count as usize);
        let mut fences = Vec::with_capacity(image_count as usize);
        for _ in 0..image_count {
            image_available.push(Semaphore::new(&self.device)?);
            render_finished.push(Semaphore::new(&self.device)?);
            fences.push(Fence::new(&self.device, true)?);
        }

        Ok(SwapchainBound {
            command_buffers,
            image_available,
            render_finished,
            fences,
            frame: FrameCounter::new(image_count as usize),
            pbr_pipeline,
            skybox_pipeline,
            composite_pipeline,
            offscreen,
            render_pass,
            swapchain,
        })
    }

    fn build_pbr_pipeline(
        &self,
        offscreen: &OffscreenRenderTarget,
        extent: vk::Extent2D,
    ) -> Result<Pipeline, Error> {
        let device = &self.device;
        let model = &self.pbr_node.models[0];
        let uniforms = self.pbr_node.uniforms.as_ref().expect("pbr uniforms");
        let material = self.pbr_node.material.as_ref().expect("pbr material");

        let mut pipeline = Pipeline::new(device, offscreen.render_pass());
        pipeline.set_shaders(vec![
            Arc::new(Shader::from_file(
                device,
                SHADER_PBR_VERT,
                vk::ShaderStageFlags::VERTEX,
                "main",
            )?),
            Arc::new(Shader::from_file(
                device,
                SHADER_PBR_FRAG,
                vk::ShaderStageFlags::FRAGMENT,
                "main",
            )?),
        ]);
        pipeline.set_descriptor_layouts(vec![uniforms.layout(), material.layout()]);
        pipeline.set_push_constant_ranges(vec![self.push_constants.range()]);
        pipeline.state.viewport = flipped_viewport(extent.width, extent.height);
        pipeline.state.scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        pipeline.state.samples = device.max_sample_count();
        pipeline.state.vertex_bindings = model.vertex_input_bindings()?;
        pipeline.state.vertex_attributes = model.vertex_input_attributes()?;
        pipeline.build()?;
        Ok(pipeline)
    }

    fn build_skybox_pipeline(
        &self,
        offscreen: &OffscreenRenderTarget,
        extent: vk::Extent2D,
    ) -> Result<Pipeline, Error> {
        let device = &self.device;
        let model = &self.skybox_node.models[0];
        let uniforms = self.skybox_node.uniforms.as_ref().expect("skybox uniforms");

        let mut pipeline = Pipeline::new(device, offscreen.render_pass());
        pipeline.set_shaders(vec![
            Arc::new(Shader::from_file(
                device,
                SHADER_SKYBOX_VERT,
                vk::ShaderStageFlags::VERTEX,
                "main",
            )?),
            Arc::new(Shader::from_file(
                device,
                SHADER_SKYBOX_FRAG,
                vk::ShaderStageFlags::FRAGMENT,
                "main",
            )?),
        ]);
        pipeline.set_descriptor_layouts(vec![uniforms.layout()]);
        pipeline.state.viewport = flipped_viewport(extent.width, extent.height);
        pipeline.state.scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        pipeline.state.samples = device.max_sample_count();
        // The cube is seen from the inside.
        pipeline.state.front_face = vk::FrontFace::CLOCKWISE;
        pipeline.state.vertex_bindings = model.vertex_input_bindings()?;
        pipeline.state.vertex_attributes = model.vertex_input_attributes()?;
        pipeline.build()?;
        Ok(pipeline)
    }

    fn build_composite_pipeline(
        &self,
        render_pass: &Arc<RenderPass>,
        extent: vk::Extent2D,
    ) -> Result<Pipeline, Error> {
        let device = &self.device;
        let uniforms = self.screen_node.uniforms.as_ref().expect("screen uniforms");
        let material = self.screen_node.material.as_ref().expect("screen material");

        let mut pipeline = Pipeline::new(device, render_pass.clone());
        pipeline.set_shaders(vec![
            Arc::new(Shader::from_file(
                device,
                SHADER_FULLSCREEN_VERT,
                vk::ShaderStageFlags::VERTEX,
                "main",
            )?),
            Arc::new(Shader::from_file(
                device,
                SHADER_COMPOSITE_FRAG,
                vk::ShaderStageFlags::FRAGMENT,
                "main",
            )?),
        ]);
        pipeline.set_descriptor_layouts(vec![uniforms.layout(), material.layout()]);
        pipeline.set_push_constant_ranges(vec![self.push_constants.range()]);
        pipeline.state.viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        pipeline.state.scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        pipeline.state.samples = device.max_sample_count();
        pipeline.state.front_face = vk::FrontFace::CLOCKWISE;
        // The full-screen triangle carries no vertex buffer and no depth.
        pipeline.state.depth_test = false;
        pipeline.state.depth_write = false;
        pipeline.build()?;
        Ok(pipeline)
    }

    /// Records one primary command buffer per swapchain image: the offscreen
    /// HDR pass (skybox, then the PBR object) followed by the composite pass
    /// (full-screen triangle).
    ///
    /// Buffers are recorded once here and only re-recorded on swapchain
    /// recreation, never per frame.
    fn record_command_buffers(
        &mut self,
        swapchain: &Swapchain,
        render_pass: &Arc<RenderPass>,
        offscreen: &OffscreenRenderTarget,
        pbr_pipeline: &Pipeline,
        skybox_pipeline: &Pipeline,
        composite_pipeline: &Pipeline,
    ) -> Result<Vec<CommandBuffer>, Error> {
        let image_count = swapchain.image_count() as usize;
        let clear_values = clear_values();
        let mut buffers = Vec::with_capacity(image_count);

        for index in 0..image_count {
            let cmd = self.command_pool.allocate()?;
            cmd.begin(vk::CommandBufferUsageFlags::empty())?;

            let offscreen_info = vk::RenderPassBeginInfo::default()
                .render_pass(offscreen.render_pass().raw())
                .framebuffer(offscreen.framebuffer(index))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: swapchain.extent(),
                })
                .clear_values(&clear_values);

            cmd.begin_render_pass(&offscreen_info);

            let skybox_uniforms = self.skybox_node.uniforms.as_ref().expect("skybox uniforms");
            cmd.bind_graphics_pipeline(skybox_pipeline.raw());
            cmd.bind_descriptor_sets(
                skybox_pipeline.layout(),
                0,
                &[skybox_uniforms.descriptor_set(index)],
            );
            self.skybox_node.draw(&cmd)?;

            let pbr_uniforms = self.pbr_node.uniforms.as_ref().expect("pbr uniforms");
            let pbr_material = self.pbr_node.material.as_ref().expect("pbr material");
            cmd.bind_graphics_pipeline(pbr_pipeline.raw());
            cmd.bind_descriptor_sets(
                pbr_pipeline.layout(),
                0,
                &[
                    pbr_uniforms.descriptor_set(index),
                    pbr_material.descriptor_set(index),
                ],
            );
            cmd.push_constants(
                pbr_pipeline.layout(),
                self.push_constants.stages(),
                0,
                self.push_constants.bytes(),
            );
            self.pbr_node.draw(&cmd)?;

            cmd.end_render_pass();

            let swapchain_info = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass.raw())
                .framebuffer(swapchain.framebuffer(index))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: swapchain.extent(),
                })
                .clear_values(&clear_values);

            cmd.begin_render_pass(&swapchain_info);

            let screen_uniforms = self.screen_node.uniforms.as_ref().expect("screen uniforms");
            let screen_material = self.screen_node.material.as_ref().expect("screen material");
            cmd.bind_graphics_pipeline(composite_pipeline.raw());
            cmd.bind_descriptor_sets(
                composite_pipeline.layout(),
                0,
                &[
                    screen_uniforms.descriptor_set(index),
                    screen_material.descriptor_set(index),
                ],
            );
            cmd.push_constants(
                composite_pipeline.layout(),
                self.push_constants.stages(),
                0,
                self.push_constants.bytes(),
            );
            // Full-screen triangle; no vertex buffer is bound.
            cmd.draw(3);

            cmd.end_render_pass();
            cmd.end()?;
            buffers.push(cmd);
        }

        debug!("recorded {} primary command buffers", buffers.len());
        Ok(buffers)
    }

    /// Blocks until the device is idle, destroys all swapchain-dependent
    /// objects, waits out a minimized (zero-sized) window and rebuilds the
    /// chain: swapchain, render pass, offscreen target, pipelines, command
    /// buffers, sync objects.
    fn recreate_swapchain(&mut self) -> Result<(), Error> {
        let mut size = self.window.inner_size();
        while size.x == 0 || size.y == 0 {
            self.window.wait_events();
            size = self.window.inner_size();
        }

        self.device.wait_idle()?;
        self.bound = None;
        self.screen_node.material = None;

        info!("recreating swapchain at {}x{}", size.x, size.y);

        let swapchain = Swapchain::new(&self.device, &self.surface, size, &self.command_pool)?;
        if swapchain.image_count() != self.frame_slots {
            // The image count changed; every per-frame descriptor set must
            // be rebuilt to match.
            self.setup_node_uniforms(swapchain.image_count())?;
        }

        let aspect = size.x as f32 / size.y as f32;
        for node in [&mut self.pbr_node, &mut self.screen_node, &mut self.skybox_node] {
            node.camera.set_perspective(45.0, aspect, 0.1, 1000.0);
        }

        let bound = self.build_swapchain_bound(swapchain)?;
        self.bound = Some(bound);
        Ok(())
    }

    /// Updates the uniform buffers for one frame slot from the cameras and
    /// node transforms.
    fn update_uniforms(&mut self, frame: usize, dt: f32) -> Result<(), Error> {
        self.pbr_node
            .camera
            .horizontal_round_rotate(dt, ORBIT_DEGREES_PER_SECOND);
        self.skybox_node
            .camera
            .horizontal_round_rotate(dt, ORBIT_DEGREES_PER_SECOND);

        {
            let camera = &self.pbr_node.camera;
            let model = &self.pbr_node.models[0];
            let nvp = NvpMatrices::new(
                camera.view_matrix(),
                camera.projection_matrix(),
                model.model_matrix().inverse().transpose(),
            );
            let params = CameraParameters {
                world_position: camera.world_position().to_array(),
            };
            let uniforms = self.pbr_node.uniforms.as_ref().expect("pbr uniforms");
            uniforms.update(frame, &nvp, &model.object_uniform(), &params)?;
        }

        {
            // Pin the skybox to the camera position to cancel parallax.
            let position = self.skybox_node.camera.world_position().truncate();
            self.skybox_node.models[0]
                .set_model_matrix(glam::Mat4::from_translation(position));

            let camera = &self.skybox_node.camera;
            let model = &self.skybox_node.models[0];
            let nvp = NvpMatrices::new(
                camera.view_matrix(),
                camera.projection_matrix(),
                model.model_matrix().inverse().transpose(),
            );
            let params = CameraParameters {
                world_position: camera.world_position().to_array(),
            };
            let uniforms = self.skybox_node.uniforms.as_ref().expect("skybox uniforms");
            uniforms.update(frame, &nvp, &model.object_uniform(), &params)?;
        }

        Ok(())
    }

    /// One iteration of the frame loop: wait on this slot's fence, acquire,
    /// update uniforms, submit, present, advance. Out-of-date, suboptimal
    /// and resize-flag conditions trigger recreation and skip the rest of
    /// the frame.
    pub fn render(&mut self, dt: f32) -> Result<(), Error> {
        let bound = self.bound.as_ref().expect("swapchain state missing");
        let frame = bound.frame.current();

        bound.fences[frame].wait()?;

        let (image_index, suboptimal) =
            match bound.swapchain.acquire(&bound.image_available[frame])? {
                Acquire::Ready {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
                Acquire::OutOfDate => {
                    self.recreate_swapchain()?;
                    return Ok(());
                }
            };

        if suboptimal || self.window.take_resized() {
            self.recreate_swapchain()?;
            return Ok(());
        }

        self.update_uniforms(image_index as usize, dt)?;

        let bound = self.bound.as_ref().expect("swapchain state missing");
        bound.fences[frame].reset()?;
        bound.command_buffers[image_index as usize].submit_with_sync(
            &bound.image_available[frame],
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            &bound.render_finished[frame],
            &bound.fences[frame],
        )?;
        bound.offscreen.note_rendered(image_index as usize);

        match bound
            .swapchain
            .present(image_index, &bound.render_finished[frame])?
        {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                self.recreate_swapchain()?;
                return Ok(());
            }
        }

        if self.window.take_resized() {
            self.recreate_swapchain()?;
            return Ok(());
        }

        self.bound
            .as_mut()
            .expect("swapchain state missing")
            .frame
            .advance();
        Ok(())
    }

    /// Drives the main loop until the window is closed, then drains the
    /// device.
    pub fn run(&mut self) -> Result<(), Error> {
        let mut last = Instant::now();

        while !self.window.should_close() {
            for event in self.window.poll_events() {
                match event {
                    WindowEvent::CameraMove(direction) => {
                        self.pbr_node.camera.apply_move(direction);
                        self.screen_node.camera.apply_move(direction);
                        self.skybox_node.camera.apply_move(direction);
                    }
                    WindowEvent::CursorMoved(moved) => {
                        self.pbr_node
                            .camera
                            .on_mouse_move(moved.position.x, moved.position.y);
                        self.skybox_node
                            .camera
                            .on_mouse_move(moved.position.x, moved.position.y);
                    }
                    WindowEvent::CloseRequested | WindowEvent::Resized(_) => {}
                }
            }

            if self.window.should_close() {
                break;
            }

            let now = Instant::now();
            let dt = (now - last).as_secs_f32();
            last = now;

            self.render(dt)?;
        }

        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        // In-flight GPU work must drain before any owned object tears down.
        let _ = self.device.wait_idle();
    }
}

fn load_scene_assets(device: &Device, pool: &CommandPool) -> Result<SceneAssets, Error> {
    let environment = hdri::load_hdri_cubemap(
        device,
        pool,
        HDR_PANORAMA,
        SKYBOX_MESH,
        ENVIRONMENT_SIZE,
        &CaptureShaders {
            vertex: Path::new(SHADER_SKYBOX_VERT),
            fragment: Path::new(SHADER_EQUIRECT_FRAG),
        },
    )?;

    let irradiance = hdri::diffuse_irradiance_map(
        device,
        pool,
        environment.clone(),
        SKYBOX_MESH,
        IRRADIANCE_SIZE,
        &CaptureShaders {
            vertex: Path::new(SHADER_SKYBOX_VERT),
            fragment: Path::new(SHADER_IRRADIANCE_FRAG),
        },
    )?;

    let prefilter = hdri::specular_prefilter_map(
        device,
        pool,
        environment.clone(),
        SKYBOX_MESH,
        PREFILTER_SIZE,
        &CaptureShaders {
            vertex: Path::new(SHADER_SKYBOX_VERT),
            fragment: Path::new(SHADER_PREFILTER_FRAG),
        },
    )?;

    let brdf_lut = hdri::brdf_lut(
        device,
        pool,
        BRDF_LUT_SIZE,
        &CaptureShaders {
            vertex: Path::new(SHADER_FULLSCREEN_VERT),
            fragment: Path::new(SHADER_BRDF_FRAG),
        },
    )?;

    let mut pbr_maps = Vec::with_capacity(PBR_MAPS.len());
    for path in PBR_MAPS {
        let texture = Texture::from_file(device, pool, path)?;
        pbr_maps.push(texture.image().clone());
    }

    Ok(SceneAssets {
        environment,
        irradiance,
        prefilter,
        brdf_lut,
        pbr_maps,
    })
}

/// The swapchain-flavor render pass: multisampled color resolved into the
/// presentable image, which ends in `PRESENT_SRC_KHR`.
fn build_swapchain_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<RenderPass, vulkan::Error> {
    let samples = device.max_sample_count();
    let mut builder = RenderPassBuilder::new();

    // 0: presentable image, resolve target.
    builder.add_attachment(
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
    );

    // 1: multisampled color.
    builder.add_attachment(
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
    );

    // 2: depth.
    builder.add_attachment(
        vk::AttachmentDescription::default()
            .format(depth_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    );

    let mut subpass = Subpass::new();
    subpass.add_color_attachment(vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    });
    subpass.set_depth_stencil_attachment(vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    });
    subpass.set_resolve_attachment(vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    });
    builder.add_subpass(subpass);

    // The load-op clear may not race a prior frame's color output.
    builder.add_dependency(
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ,
            ),
    );

    builder.build(device)
}

/// Clear values shared by both passes, in attachment order: resolve color,
/// multisample color, depth.
fn clear_values() -> [vk::ClearValue; 3] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        },
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::FrameCounter;

    #[test]
    fn frame_index_wraps_modulo_slot_count() {
        // Two frame slots over three frames: 0, 1, 0.
        let mut counter = FrameCounter::new(2);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(counter.current());
            counter.advance();
        }
        assert_eq!(seen, vec![0, 1, 0]);
    }

    #[test]
    fn single_slot_counter_stays_at_zero() {
        let mut counter = FrameCounter::new(1);
        counter.advance();
        counter.advance();
        assert_eq!(counter.current(), 0);
    }
}

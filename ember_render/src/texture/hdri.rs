//! Environment-map capture: HDR panorama to cubemap, irradiance
//! convolution, specular prefiltering and the BRDF lookup table.
//!
//! Each capture renders a unit cube (or a full-screen triangle for the LUT)
//! into a small offscreen target and copies or keeps the result. All of this
//! runs synchronously at initialization time.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use thiserror::Error;
use tracing::info;

use crate::backend::pipeline::{flipped_viewport, Pipeline};
use crate::backend::vulkan::{
    self, CommandPool, Device, Image, ImageDescriptor, Shader,
};
use crate::material::{
    CameraParameters, Material, MaterialError, NvpMatrices, UniformManager,
};
use crate::mesh::{Model, ModelError};
use crate::offscreen::{OffscreenFinalLayout, OffscreenRenderTarget};
use crate::texture::{Texture, TextureError};

#[derive(Debug, Error)]
pub enum HdriError {
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Material(#[from] MaterialError),
    #[error(transparent)]
    Gpu(#[from] vulkan::Error),
}

/// Shader pair for one capture pass.
pub struct CaptureShaders<'a> {
    pub vertex: &'a Path,
    pub fragment: &'a Path,
}

/// The six fixed face view matrices for cubemap capture, in array layer
/// order +X, -X, -Y, +Y, +Z, -Z.
pub fn capture_view_matrices() -> [Mat4; 6] {
    let origin = Vec3::ZERO;
    [
        Mat4::look_at_rh(origin, Vec3::X, -Vec3::Y),
        Mat4::look_at_rh(origin, -Vec3::X, -Vec3::Y),
        Mat4::look_at_rh(origin, -Vec3::Y, -Vec3::Z),
        Mat4::look_at_rh(origin, Vec3::Y, Vec3::Z),
        Mat4::look_at_rh(origin, Vec3::Z, -Vec3::Y),
        Mat4::look_at_rh(origin, -Vec3::Z, -Vec3::Y),
    ]
}

/// The 90-degree square projection shared by all face captures.
pub fn capture_projection() -> Mat4 {
    Mat4::perspective_rh_gl(90f32.to_radians(), 1.0, 0.1, 100.0)
}

/// Renders an HDR panorama into a fresh RGBA32F cubemap.
pub fn load_hdri_cubemap(
    device: &Device,
    pool: &CommandPool,
    hdr_path: impl AsRef<Path>,
    skybox_mesh: impl AsRef<Path>,
    size: u32,
    shaders: &CaptureShaders<'_>,
) -> Result<Arc<Image>, HdriError> {
    let panorama = Texture::hdr_from_file(device, pool, hdr_path)?;
    let cubemap = capture_to_cubemap(device, pool, &panorama, skybox_mesh.as_ref(), size, shaders)?;
    info!("captured HDR panorama into a {0}x{0} cubemap", size);
    Ok(cubemap)
}

/// Convolves a cubemap into a diffuse irradiance map.
pub fn diffuse_irradiance_map(
    device: &Device,
    pool: &CommandPool,
    environment: Arc<Image>,
    skybox_mesh: impl AsRef<Path>,
    size: u32,
    shaders: &CaptureShaders<'_>,
) -> Result<Arc<Image>, HdriError> {
    let source = Texture::from_image(device, environment)?;
    let cubemap = capture_to_cubemap(device, pool, &source, skybox_mesh.as_ref(), size, shaders)?;
    info!("captured {0}x{0} diffuse irradiance map", size);
    Ok(cubemap)
}

/// Prefilters a cubemap for specular reflection lookups.
pub fn specular_prefilter_map(
    device: &Device,
    pool: &CommandPool,
    environment: Arc<Image>,
    skybox_mesh: impl AsRef<Path>,
    size: u32,
    shaders: &CaptureShaders<'_>,
) -> Result<Arc<Image>, HdriError> {
    let source = Texture::from_image(device, environment)?;
    let cubemap = capture_to_cubemap(device, pool, &source, skybox_mesh.as_ref(), size, shaders)?;
    info!("captured {0}x{0} specular prefilter map", size);
    Ok(cubemap)
}

/// Renders the split-sum BRDF lookup table with a full-screen triangle.
pub fn brdf_lut(
    device: &Device,
    pool: &CommandPool,
    size: u32,
    shaders: &CaptureShaders<'_>,
) -> Result<Arc<Image>, HdriError> {
    let target = OffscreenRenderTarget::new(
        device,
        pool,
        size,
        size,
        1,
        vk::Format::R32G32B32A32_SFLOAT,
        OffscreenFinalLayout::ShaderRead,
    )?;

    let vert = Arc::new(Shader::from_file(
        device,
        shaders.vertex,
        vk::ShaderStageFlags::VERTEX,
        "main",
    )?);
    let frag = Arc::new(Shader::from_file(
        device,
        shaders.fragment,
        vk::ShaderStageFlags::FRAGMENT,
        "main",
    )?);

    let mut pipeline = Pipeline::new(device, target.render_pass());
    pipeline.set_shaders(vec![vert, frag]);
    pipeline.state.viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: size as f32,
        height: size as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    pipeline.state.scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent: target.extent(),
    };
    pipeline.state.samples = device.max_sample_count();
    pipeline.state.depth_test = false;
    pipeline.state.depth_write = false;
    pipeline.state.front_face = vk::FrontFace::CLOCKWISE;
    pipeline.build()?;

    let clear_values = OffscreenRenderTarget::clear_values();
    let pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(target.render_pass().raw())
        .framebuffer(target.framebuffer(0))
        .render_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: target.extent(),
        })
        .clear_values(&clear_values);

    let cmd = pool.one_shot()?;
    cmd.begin_render_pass(&pass_info);
    cmd.bind_graphics_pipeline(pipeline.raw());
    cmd.draw(3);
    cmd.end_render_pass();
    cmd.end()?;
    cmd.submit_and_wait()?;
    target.note_rendered(0);

    info!("rendered {0}x{0} BRDF lookup table", size);
    Ok(target.color_images()[0].clone())
}

/// Shared capture core: renders the skybox mesh six times, once per face
/// view matrix, into a transfer-src offscreen target and copies each result
/// into the corresponding cubemap array layer.
fn capture_to_cubemap(
    device: &Device,
    pool: &CommandPool,
    source: &Texture,
    skybox_mesh: &Path,
    size: u32,
    shaders: &CaptureShaders<'_>,
) -> Result<Arc<Image>, HdriError> {
    let cubemap = Image::new(
        device,
        &ImageDescriptor::cubemap(
            size,
            size,
            vk::Format::R32G32B32A32_SFLOAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        ),
    )?;
    cubemap.transition_layout(
        pool,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        cubemap.full_range(vk::ImageAspectFlags::COLOR),
    )?;

    let target = OffscreenRenderTarget::new(
        device,
        pool,
        size,
        size,
        1,
        vk::Format::R32G32B32A32_SFLOAT,
        OffscreenFinalLayout::TransferSrc,
    )?;

    let mut model = Model::load_component_mesh(device, pool, skybox_mesh)?;
    model.set_model_matrix(Mat4::IDENTITY);

    let mut uniforms = UniformManager::new(device, 1)?;
    uniforms.build()?;

    let mut material = Material::new();
    material.attach_per_frame_images(vec![source.image().clone()]);
    material.build(device, pool, 1)?;

    let vert = Arc::new(Shader::from_file(
        device,
        shaders.vertex,
        vk::ShaderStageFlags::VERTEX,
        "main",
    )?);
    let frag = Arc::new(Shader::from_file(
        device,
        shaders.fragment,
        vk::ShaderStageFlags::FRAGMENT,
        "main",
    )?);

    let mut pipeline = Pipeline::new(device, target.render_pass());
    pipeline.set_shaders(vec![vert, frag]);
    pipeline.set_descriptor_layouts(vec![uniforms.layout(), material.layout()]);
    pipeline.state.viewport = flipped_viewport(size, size);
    pipeline.state.scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent: target.extent(),
    };
    pipeline.state.samples = device.max_sample_count();
    // The cube is seen from the inside.
    pipeline.state.front_face = vk::FrontFace::CLOCKWISE;
    pipeline.state.vertex_bindings = model.vertex_input_bindings()?;
    pipeline.state.vertex_attributes = model.vertex_input_attributes()?;
    pipeline.build()?;

    let projection = capture_projection();
    let clear_values = OffscreenRenderTarget::clear_values();

    for (face, view) in capture_view_matrices().into_iter().enumerate() {
        let nvp = NvpMatrices::new(view, projection, view.inverse().transpose());
        let camera = CameraParameters::default();
        uniforms.update(0, &nvp, &model.object_uniform(), &camera)?;

        let pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(target.render_pass().raw())
            .framebuffer(target.framebuffer(0))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: target.extent(),
            })
            .clear_values(&clear_values);

        let cmd = pool.one_shot()?;
        cmd.begin_render_pass(&pass_info);
        cmd.bind_graphics_pipeline(pipeline.raw());
        cmd.bind_descriptor_sets(
            pipeline.layout(),
            0,
            &[uniforms.descriptor_set(0), material.descriptor_set(0)],
        );
        model.draw(&cmd)?;
        cmd.end_render_pass();

        // The pass leaves the color result in transfer-src layout; lift it
        // into the face layer.
        cmd.copy_image_to_cubemap_face(
            target.color_images()[0].raw(),
            cubemap.raw(),
            size,
            size,
            face as u32,
            0,
        );
        cmd.end()?;
        cmd.submit_and_wait()?;
        target.note_rendered(0);
    }

    cubemap.transition_layout(
        pool,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        cubemap.full_range(vk::ImageAspectFlags::COLOR),
    )?;

    Ok(Arc::new(cubemap))
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::{capture_projection, capture_view_matrices};

    #[test]
    fn face_views_look_down_their_axes() {
        let views = capture_view_matrices();
        let directions = [
            Vec3::X,
            -Vec3::X,
            -Vec3::Y,
            Vec3::Y,
            Vec3::Z,
            -Vec3::Z,
        ];

        for (view, direction) in views.iter().zip(directions) {
            // The face direction maps onto the view-space forward axis.
            let transformed = (*view * direction.extend(1.0)).truncate();
            assert!((transformed - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
        }
    }

    #[test]
    fn face_views_are_distinct() {
        let views = capture_view_matrices();
        for (i, a) in views.iter().enumerate() {
            for b in views.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn projection_is_square_90_degrees() {
        let projection = capture_projection();
        // 1 / tan(45 deg) == 1 for both axes at aspect 1.
        assert!((projection.x_axis.x - 1.0).abs() < 1e-5);
        assert!((projection.y_axis.y - 1.0).abs() < 1e-5);
        assert_ne!(projection, Mat4::IDENTITY);
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use thiserror::Error;

use crate::backend::descriptors::{
    DescriptorPool, DescriptorSet, DescriptorSetLayout, UniformParameter,
};
use crate::backend::vulkan::{self, Buffer, CommandPool, Device, Image};
use crate::texture::{Texture, TextureError};

#[derive(Debug, Error)]
pub enum MaterialError {
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error(transparent)]
    Gpu(#[from] vulkan::Error),
}

/// Per-frame view/projection/normal matrices, visible to the vertex stage.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct NvpMatrices {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
}

impl NvpMatrices {
    pub fn new(view: Mat4, projection: Mat4, normal: Mat4) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            normal: normal.to_cols_array_2d(),
        }
    }
}

impl Default for NvpMatrices {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Per-object model matrix.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ObjectUniform {
    pub model: [[f32; 4]; 4],
}

impl Default for ObjectUniform {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
        }
    }
}

/// Camera parameters for shading, visible to the fragment stage.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct CameraParameters {
    pub world_position: [f32; 4],
}

/// Builds and owns the per-node uniform descriptor set: three uniform-buffer
/// bindings (matrices, object, camera) plus any number of attached
/// environment/material images.
///
/// Staged construction: `attach_*` accumulates bindings, [`build`] finalizes
/// the layout/pool/set trio exactly once. Attaching after [`build`] is a
/// programmer error.
///
/// [`build`]: Self::build
pub struct UniformManager {
    device: Device,
    frame_count: u32,
    params: Vec<UniformParameter>,
    next_binding: u32,
    layout: DescriptorSetLayout,
    pool: DescriptorPool,
    set: Option<DescriptorSet>,
}

impl UniformManager {
    pub fn new(device: &Device, frame_count: u32) -> Result<Self, vulkan::Error> {
        let mut params = Vec::new();

        let uniform_buffers = |size: vk::DeviceSize| -> Result<Vec<Arc<Buffer>>, vulkan::Error> {
            (0..frame_count)
                .map(|_| Ok(Arc::new(Buffer::create_uniform(device, size, None)?)))
                .collect()
        };

        params.push(UniformParameter::uniform(
            0,
            vk::ShaderStageFlags::VERTEX,
            uniform_buffers(std::mem::size_of::<NvpMatrices>() as vk::DeviceSize)?,
        ));
        params.push(UniformParameter::uniform(
            1,
            vk::ShaderStageFlags::VERTEX,
            uniform_buffers(std::mem::size_of::<ObjectUniform>() as vk::DeviceSize)?,
        ));
        params.push(UniformParameter::uniform(
            2,
            vk::ShaderStageFlags::FRAGMENT,
            uniform_buffers(std::mem::size_of::<CameraParameters>() as vk::DeviceSize)?,
        ));

        Ok(Self {
            device: device.clone(),
            frame_count,
            params,
            next_binding: 3,
            layout: DescriptorSetLayout::new(device),
            pool: DescriptorPool::new(device),
            set: None,
        })
    }

    /// Attaches a captured cubemap (environment, irradiance or prefilter
    /// map) at the next free binding.
    pub fn attach_cubemap(&mut self, image: Arc<Image>) -> Result<(), MaterialError> {
        self.attach_shared_image(image)
    }

    /// Attaches a 2D image (e.g. a lookup table or material map) at the next
    /// free binding.
    pub fn attach_image(&mut self, image: Arc<Image>) -> Result<(), MaterialError> {
        self.attach_shared_image(image)
    }

    fn attach_shared_image(&mut self, image: Arc<Image>) -> Result<(), MaterialError> {
        assert!(self.set.is_none(), "attach called after build");

        let texture = Arc::new(Texture::from_image(&self.device, image)?);
        let per_frame = (0..self.frame_count)
            .map(|_| vec![texture.clone()])
            .collect();

        self.params.push(UniformParameter::sampled_textures(
            self.next_binding,
            vk::ShaderStageFlags::FRAGMENT,
            per_frame,
        ));
        self.next_binding += 1;
        Ok(())
    }

    /// Finalizes layout, pool and sets. Rebuilding replaces all three.
    pub fn build(&mut self) -> Result<(), vulkan::Error> {
        self.layout.build(&self.params)?;
        self.pool.build(&self.params, self.frame_count)?;
        self.set = Some(DescriptorSet::new(
            &self.device,
            &self.params,
            &self.layout,
            &self.pool,
            self.frame_count,
        )?);
        Ok(())
    }

    /// Writes the three uniform buffers of one frame slot through their
    /// mappings. Frame slots are disjoint, so no synchronization with other
    /// frames is needed.
    pub fn update(
        &self,
        frame: usize,
        nvp: &NvpMatrices,
        object: &ObjectUniform,
        camera: &CameraParameters,
    ) -> Result<(), vulkan::Error> {
        self.params[0].buffers[frame].write_mapped(bytemuck::bytes_of(nvp))?;
        self.params[1].buffers[frame].write_mapped(bytemuck::bytes_of(object))?;
        self.params[2].buffers[frame].write_mapped(bytemuck::bytes_of(camera))?;
        Ok(())
    }

    pub fn descriptor_set(&self, frame: usize) -> vk::DescriptorSet {
        self.set
            .as_ref()
            .expect("uniform manager was not built")
            .get(frame)
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.raw()
    }
}

/// Texture bindings for one material: file-loaded textures plus per-frame
/// image attachments (e.g. the offscreen color results), combined into one
/// texture-array binding.
///
/// Same staged-construction contract as [`UniformManager`]: attach, then
/// [`build`] once.
///
/// [`build`]: Self::build
pub struct Material {
    texture_paths: Vec<PathBuf>,
    /// Each entry holds one image per frame index.
    attached_per_frame: Vec<Vec<Arc<Image>>>,
    layout: Option<DescriptorSetLayout>,
    pool: Option<DescriptorPool>,
    set: Option<DescriptorSet>,
}

impl Material {
    pub fn new() -> Self {
        Self {
            texture_paths: Vec::new(),
            attached_per_frame: Vec::new(),
            layout: None,
            pool: None,
            set: None,
        }
    }

    pub fn attach_texture_path(&mut self, path: impl AsRef<Path>) {
        assert!(self.set.is_none(), "attach called after build");
        self.texture_paths.push(path.as_ref().to_path_buf());
    }

    pub fn attach_texture_paths(&mut self, paths: &[impl AsRef<Path>]) {
        for path in paths {
            self.attach_texture_path(path);
        }
    }

    /// Attaches one image per frame index, e.g. the offscreen render
    /// target's color results.
    pub fn attach_per_frame_images(&mut self, images: Vec<Arc<Image>>) {
        assert!(self.set.is_none(), "attach called after build");
        self.attached_per_frame.push(images);
    }

    /// Loads the attached texture files, wraps the attached images and
    /// builds the layout/pool/set trio.
    pub fn build(
        &mut self,
        device: &Device,
        cmd_pool: &CommandPool,
        frame_count: u32,
    ) -> Result<(), MaterialError> {
        let file_textures: Vec<Arc<Texture>> = self
            .texture_paths
            .iter()
            .map(|path| Ok(Arc::new(Texture::from_file(device, cmd_pool, path)?)))
            .collect::<Result<_, MaterialError>>()?;

        let mut per_frame: Vec<Vec<Arc<Texture>>> = Vec::with_capacity(frame_count as usize);
        for frame in 0..frame_count as usize {
            let mut textures: Vec<Arc<Texture>> = file_textures.clone();
            for images in &self.attached_per_frame {
                assert_eq!(
                    images.len(),
                    frame_count as usize,
                    "per-frame attachment needs one image per frame"
                );
                textures.push(Arc::new(Texture::from_image(
                    device,
                    images[frame].clone(),
                )?));
            }
            per_frame.push(textures);
        }

        let params = vec![UniformParameter::sampled_textures(
            0,
            vk::ShaderStageFlags::FRAGMENT,
            per_frame,
        )];

        let mut layout = DescriptorSetLayout::new(device);
        layout.build(&params)?;
        let mut pool = DescriptorPool::new(device);
        pool.build(&params, frame_count)?;
        let set = DescriptorSet::new(device, &params, &layout, &pool, frame_count)?;

        self.layout = Some(layout);
        self.pool = Some(pool);
        self.set = Some(set);
        Ok(())
    }

    pub fn descriptor_set(&self, frame: usize) -> vk::DescriptorSet {
        self.set.as_ref().expect("material was not built").get(frame)
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.as_ref().expect("material was not built").raw()
    }

    /// Total texture count in the array binding.
    pub fn texture_count(&self) -> u32 {
        (self.texture_paths.len() + self.attached_per_frame.len()) as u32
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::Zeroable;
    use glam::Mat4;

    use super::{CameraParameters, Material, NvpMatrices, ObjectUniform};

    #[test]
    fn uniform_structs_have_std140_friendly_sizes() {
        assert_eq!(std::mem::size_of::<NvpMatrices>(), 192);
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 64);
        assert_eq!(std::mem::size_of::<CameraParameters>(), 16);
    }

    #[test]
    fn nvp_matrices_default_to_identity() {
        let nvp = NvpMatrices::default();
        assert_eq!(Mat4::from_cols_array_2d(&nvp.view), Mat4::IDENTITY);
        assert_eq!(Mat4::from_cols_array_2d(&nvp.projection), Mat4::IDENTITY);

        let zero = NvpMatrices::zeroed();
        assert_ne!(
            Mat4::from_cols_array_2d(&zero.view),
            Mat4::from_cols_array_2d(&nvp.view)
        );
    }

    #[test]
    fn material_counts_paths_and_attachments() {
        let mut material = Material::new();
        material.attach_texture_paths(&["a.jpg", "b.jpg", "c.jpg"]);
        material.attach_per_frame_images(Vec::new());
        assert_eq!(material.texture_count(), 4);
    }
}

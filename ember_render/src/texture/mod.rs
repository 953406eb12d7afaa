pub mod hdri;

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use image::RgbaImage;
use thiserror::Error;
use tracing::debug;

use crate::backend::vulkan::{self, CommandPool, Device, Image, ImageDescriptor, Sampler};

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("cubemap face {index} is {got_width}x{got_height}, expected {width}x{height}")]
    FaceDimensionMismatch {
        index: usize,
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error(transparent)]
    Gpu(#[from] vulkan::Error),
}

/// A sampleable image: the underlying (possibly shared) image plus a
/// sampler.
///
/// Textures always describe themselves to descriptors in
/// `SHADER_READ_ONLY_OPTIMAL`, the layout the image is guaranteed to be in
/// whenever it is sampled.
pub struct Texture {
    image: Arc<Image>,
    sampler: Arc<Sampler>,
}

impl Texture {
    /// Loads a 2D LDR texture from a compressed image file.
    pub fn from_file(
        device: &Device,
        pool: &CommandPool,
        path: impl AsRef<Path>,
    ) -> Result<Self, TextureError> {
        let decoded = image::open(path.as_ref())?.to_rgba8();
        let (width, height) = decoded.dimensions();
        debug!("loaded texture {:?} ({}x{})", path.as_ref(), width, height);
        Self::from_rgba8(device, pool, width, height, decoded.as_raw())
    }

    /// Uploads raw RGBA8 pixels as an SRGB 2D texture.
    pub fn from_rgba8(
        device: &Device,
        pool: &CommandPool,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<Self, TextureError> {
        let image = Image::new(
            device,
            &ImageDescriptor::color_2d(
                width,
                height,
                vk::Format::R8G8B8A8_SRGB,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            ),
        )?;

        upload(pool, &image, data)?;

        Ok(Self {
            image: Arc::new(image),
            sampler: Arc::new(Sampler::new(device)?),
        })
    }

    /// Loads six equally-dimensioned face images into one cubemap.
    ///
    /// Dimension consistency is validated while decoding, before any GPU
    /// resource is created; a mismatch aborts the load.
    pub fn cubemap_from_files(
        device: &Device,
        pool: &CommandPool,
        paths: &[impl AsRef<Path>; 6],
    ) -> Result<Self, TextureError> {
        let mut faces = Vec::with_capacity(6);
        for path in paths {
            faces.push(image::open(path.as_ref())?.to_rgba8());
        }

        let (width, height, data) = assemble_cubemap(&faces)?;

        let image = Image::new(
            device,
            &ImageDescriptor::cubemap(
                width,
                height,
                vk::Format::R8G8B8A8_SRGB,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            ),
        )?;

        upload(pool, &image, &data)?;

        Ok(Self {
            image: Arc::new(image),
            sampler: Arc::new(Sampler::new(device)?),
        })
    }

    /// Loads an HDR panorama as an equirectangular RGBA32F 2D texture.
    pub fn hdr_from_file(
        device: &Device,
        pool: &CommandPool,
        path: impl AsRef<Path>,
    ) -> Result<Self, TextureError> {
        let decoded = image::open(path.as_ref())?.to_rgba32f();
        let (width, height) = decoded.dimensions();
        debug!("loaded HDR panorama {:?} ({}x{})", path.as_ref(), width, height);

        let image = Image::new(
            device,
            &ImageDescriptor::color_2d(
                width,
                height,
                vk::Format::R32G32B32A32_SFLOAT,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            ),
        )?;

        upload(pool, &image, bytemuck::cast_slice(decoded.as_raw()))?;

        Ok(Self {
            image: Arc::new(image),
            sampler: Arc::new(Sampler::new(device)?),
        })
    }

    /// Wraps an existing (shared) image, e.g. an offscreen color result or a
    /// captured environment map, with a fresh sampler.
    pub fn from_image(device: &Device, image: Arc<Image>) -> Result<Self, TextureError> {
        Ok(Self {
            image,
            sampler: Arc::new(Sampler::new(device)?),
        })
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.raw(),
            image_view: self.image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }
}

fn upload(pool: &CommandPool, image: &Image, data: &[u8]) -> Result<(), TextureError> {
    let aspect = vk::ImageAspectFlags::COLOR;

    image.transition_layout(
        pool,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        image.full_range(aspect),
    )?;

    image.fill_from_bytes(pool, data)?;

    image.transition_layout(
        pool,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        image.full_range(aspect),
    )?;

    Ok(())
}

/// Validates that all six faces share the dimensions of face 0 and
/// concatenates their pixels in face order.
pub fn assemble_cubemap(faces: &[RgbaImage]) -> Result<(u32, u32, Vec<u8>), TextureError> {
    assert_eq!(faces.len(), 6);

    let (width, height) = faces[0].dimensions();
    for (index, face) in faces.iter().enumerate() {
        let (got_width, got_height) = face.dimensions();
        if (got_width, got_height) != (width, height) {
            return Err(TextureError::FaceDimensionMismatch {
                index,
                width,
                height,
                got_width,
                got_height,
            });
        }
    }

    let face_size = (width * height * 4) as usize;
    let mut data = Vec::with_capacity(face_size * 6);
    for face in faces {
        data.extend_from_slice(face.as_raw());
    }

    Ok((width, height, data))
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::{assemble_cubemap, TextureError};

    #[test]
    fn cubemap_faces_concatenate_in_order() {
        let mut faces = Vec::new();
        for value in 0..6u8 {
            let mut face = RgbaImage::new(2, 2);
            for pixel in face.pixels_mut() {
                *pixel = image::Rgba([value, value, value, 255]);
            }
            faces.push(face);
        }

        let (width, height, data) = assemble_cubemap(&faces).unwrap();
        assert_eq!((width, height), (2, 2));
        assert_eq!(data.len(), 2 * 2 * 4 * 6);
        // Face order is preserved: each face's block starts with its value.
        for face in 0..6 {
            assert_eq!(data[face * 16], face as u8);
        }
    }

    #[test]
    fn cubemap_face_dimension_mismatch_aborts() {
        let mut faces: Vec<RgbaImage> = (0..6).map(|_| RgbaImage::new(4, 4)).collect();
        faces[3] = RgbaImage::new(4, 2);

        let err = assemble_cubemap(&faces).unwrap_err();
        match err {
            TextureError::FaceDimensionMismatch {
                index, got_height, ..
            } => {
                assert_eq!(index, 3);
                assert_eq!(got_height, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

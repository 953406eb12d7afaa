use std::sync::Arc;

use ash::vk;
use glam::UVec2;
use tracing::{debug, info};

use crate::backend::render_pass::RenderPass;
use crate::backend::vulkan::{CommandPool, Device, Error, Image, Semaphore, Surface};

/// The presentable image chain plus the matching depth and multisample
/// attachments and framebuffers.
///
/// Recreation on resize is driven by the frame orchestrator: it destroys the
/// swapchain-dependent objects, waits for a nonzero framebuffer extent and
/// constructs a new `Swapchain`.
pub struct Swapchain {
    device: Device,
    // Never read after creation, but keeps the surface alive as long as the
    // native swapchain exists.
    _surface: Surface,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth_images: Vec<Arc<Image>>,
    multisample_images: Vec<Arc<Image>>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::Format,
    extent: vk::Extent2D,
    image_count: u32,
}

/// Result of acquiring the next presentable image.
pub enum Acquire {
    Ready { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; recreate and skip the
    /// frame. Not an error.
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl Swapchain {
    pub fn new(
        device: &Device,
        surface: &Surface,
        framebuffer_size: UVec2,
        pool: &CommandPool,
    ) -> Result<Self, Error> {
        let caps = surface.capabilities(device)?;
        let formats = surface.formats(device)?;
        let present_modes = surface.present_modes(device)?;

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&caps, framebuffer_size);
        let image_count = clamp_image_count(&caps);

        let families = device.queue_families();
        let family_indices = [families.graphics, families.present];

        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.raw())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Rendering and presentation may run on different queue families, in
        // which case the images must be shared between them.
        if families.graphics == families.present {
            info = info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        } else {
            info = info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices);
        }

        let loader = ash::khr::swapchain::Device::new(device.instance().raw(), device.raw());
        let swapchain = unsafe { loader.create_swapchain(&info, None)? };

        // The implementation may create more images than requested.
        let images = unsafe { loader.get_swapchain_images(swapchain)? };
        let image_count = images.len() as u32;

        let views = images
            .iter()
            .map(|image| create_color_view(device, *image, surface_format.format))
            .collect::<Result<Vec<_>, _>>()?;

        let mut depth_images = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            let image = Image::create_depth(device, extent.width, extent.height)?;
            image.transition_layout(
                pool,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                image.full_range(vk::ImageAspectFlags::DEPTH),
            )?;
            depth_images.push(Arc::new(image));
        }

        let mut multisample_images = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            let image =
                Image::create_render_target(device, extent.width, extent.height, surface_format.format)?;
            image.transition_layout(
                pool,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                image.full_range(vk::ImageAspectFlags::COLOR),
            )?;
            multisample_images.push(Arc::new(image));
        }

        info!(
            "created swapchain: {} images, {}x{}, {:?}, {:?}",
            image_count, extent.width, extent.height, surface_format.format, present_mode
        );

        Ok(Self {
            device: device.clone(),
            _surface: surface.clone(),
            loader,
            swapchain,
            images,
            views,
            depth_images,
            multisample_images,
            framebuffers: Vec::new(),
            format: surface_format.format,
            extent,
            image_count,
        })
    }

    /// Packs {presentable view, multisample view, depth view} into one
    /// framebuffer per swapchain image, in that fixed attachment order.
    pub fn create_framebuffers(&mut self, render_pass: &RenderPass) -> Result<(), Error> {
        assert!(self.framebuffers.is_empty());

        for index in 0..self.images.len() {
            let attachments = [
                self.views[index],
                self.multisample_images[index].view(),
                self.depth_images[index].view(),
            ];

            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.raw())
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.raw().create_framebuffer(&info, None)? };
            self.framebuffers.push(framebuffer);
        }

        debug!("created {} swapchain framebuffers", self.framebuffers.len());
        Ok(())
    }

    pub fn acquire(&self, image_available: &Semaphore) -> Result<Acquire, Error> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                image_available.raw(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(Acquire::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    pub fn present(
        &self,
        image_index: u32,
        render_finished: &Semaphore,
    ) -> Result<PresentOutcome, Error> {
        let wait_semaphores = [render_finished.raw()];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(self.device.present_queue(), &info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.raw().destroy_framebuffer(framebuffer, None);
            }
            for view in self.views.drain(..) {
                self.device.raw().destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_color_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, Error> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = unsafe { device.raw().create_image_view(&info, None)? };
    Ok(view)
}

/// Picks an SRGB BGRA8 surface format if available, otherwise the first
/// reported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| formats[0])
}

/// Prefers mailbox, falling back to FIFO, the only mode every device must
/// support.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Requests one image more than the minimum, clamped into
/// `[min_image_count, max_image_count]`. A `max_image_count` of zero means
/// unbounded.
pub fn clamp_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    count
}

/// Derives the swapchain extent: either the surface's fixed current extent,
/// or the framebuffer size clamped into the supported range when the surface
/// reports the "any size" sentinel.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: UVec2) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: framebuffer_size.x.clamp(
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: framebuffer_size.y.clamp(
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use glam::UVec2;

    use super::{choose_extent, choose_present_mode, choose_surface_format, clamp_image_count};

    #[test]
    fn surface_format_prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );

        // Falls back to the first reported format.
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn present_mode_prefers_mailbox_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_clamps_to_bounds() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.min_image_count = 2;
        caps.max_image_count = 3;
        assert_eq!(clamp_image_count(&caps), 3);

        caps.max_image_count = 8;
        assert_eq!(clamp_image_count(&caps), 3);

        // Zero means unbounded.
        caps.max_image_count = 0;
        assert_eq!(clamp_image_count(&caps), 3);
    }

    #[test]
    fn extent_uses_fixed_current_extent() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let extent = choose_extent(&caps, UVec2::new(1, 1));
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn extent_clamps_framebuffer_size_on_sentinel() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.min_image_extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 4096,
            height: 4096,
        };

        // A restored 800x600 window produces exactly that extent.
        let extent = choose_extent(&caps, UVec2::new(800, 600));
        assert_eq!((extent.width, extent.height), (800, 600));

        let extent = choose_extent(&caps, UVec2::new(8192, 16));
        assert_eq!((extent.width, extent.height), (4096, 64));
    }
}

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::render_pass::{RenderPass, RenderPassBuilder, Subpass};
use crate::backend::vulkan::{CommandPool, Device, Error, Image, ImageDescriptor};

/// Where an offscreen pass leaves its color result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OffscreenFinalLayout {
    /// The result is sampled by a later pass (HDR scene pass feeding the
    /// screen-space composite).
    ShaderRead,
    /// The result is copied out, e.g. into a cubemap face during environment
    /// capture.
    TransferSrc,
}

impl OffscreenFinalLayout {
    fn to_vk(self) -> vk::ImageLayout {
        match self {
            Self::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        }
    }
}

/// A swapchain-independent render target: per image index one set of
/// {sampleable color image, multisample color image, depth image} and a
/// framebuffer, plus a render pass whose color result ends up sampleable or
/// copyable instead of presentable.
pub struct OffscreenRenderTarget {
    device: Device,
    extent: vk::Extent2D,
    color_images: Vec<Arc<Image>>,
    multisample_images: Vec<Arc<Image>>,
    depth_images: Vec<Arc<Image>>,
    render_pass: Arc<RenderPass>,
    framebuffers: Vec<vk::Framebuffer>,
    final_layout: vk::ImageLayout,
}

impl OffscreenRenderTarget {
    pub fn new(
        device: &Device,
        pool: &CommandPool,
        width: u32,
        height: u32,
        image_count: u32,
        color_format: vk::Format,
        final_layout: OffscreenFinalLayout,
    ) -> Result<Self, Error> {
        let mut color_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        if final_layout == OffscreenFinalLayout::TransferSrc {
            color_usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let mut color_images = Vec::with_capacity(image_count as usize);
        let mut multisample_images = Vec::with_capacity(image_count as usize);
        let mut depth_images = Vec::with_capacity(image_count as usize);

        for _ in 0..image_count {
            let color = Image::new(
                device,
                &ImageDescriptor::color_2d(width, height, color_format, color_usage),
            )?;
            color.transition_layout(
                pool,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                color.full_range(vk::ImageAspectFlags::COLOR),
            )?;
            color_images.push(Arc::new(color));

            let multisample = Image::create_render_target(device, width, height, color_format)?;
            multisample.transition_layout(
                pool,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                multisample.full_range(vk::ImageAspectFlags::COLOR),
            )?;
            multisample_images.push(Arc::new(multisample));

            let depth = Image::create_depth(device, width, height)?;
            depth.transition_layout(
                pool,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                depth.full_range(vk::ImageAspectFlags::DEPTH),
            )?;
            depth_images.push(Arc::new(depth));
        }

        let render_pass = build_render_pass(
            device,
            color_format,
            depth_images[0].format(),
            device.max_sample_count(),
            final_layout.to_vk(),
        )?;

        let extent = vk::Extent2D { width, height };

        let mut framebuffers = Vec::with_capacity(image_count as usize);
        for index in 0..image_count as usize {
            let attachments = [
                color_images[index].view(),
                multisample_images[index].view(),
                depth_images[index].view(),
            ];

            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.raw())
                .attachments(&attachments)
                .width(width)
                .height(height)
                .layers(1);

            let framebuffer = unsafe { device.raw().create_framebuffer(&info, None)? };
            framebuffers.push(framebuffer);
        }

        debug!(
            "created offscreen target: {} images, {}x{}, {:?}",
            image_count, width, height, color_format
        );

        Ok(Self {
            device: device.clone(),
            extent,
            color_images,
            multisample_images,
            depth_images,
            render_pass: Arc::new(render_pass),
            framebuffers,
            final_layout: final_layout.to_vk(),
        })
    }

    pub fn render_pass(&self) -> Arc<RenderPass> {
        self.render_pass.clone()
    }

    /// The sampleable (or copyable) color results, one per image index.
    pub fn color_images(&self) -> &[Arc<Image>] {
        &self.color_images
    }

    pub fn multisample_images(&self) -> &[Arc<Image>] {
        &self.multisample_images
    }

    pub fn depth_images(&self) -> &[Arc<Image>] {
        &self.depth_images
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Records the layout the render pass left the color image in. Call
    /// after a submission that executed this target's render pass.
    pub fn note_rendered(&self, index: usize) {
        self.color_images[index].assume_layout(self.final_layout);
    }

    /// Clear values in attachment order: color, multisample color, depth.
    pub fn clear_values() -> [vk::ClearValue; 3] {
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
}

impl Drop for OffscreenRenderTarget {
    fn drop(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.raw().destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

/// The offscreen-flavor render pass: multisampled color resolved into the
/// sampleable image, whose final layout is shader-read-only or transfer-src.
fn build_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
    final_layout: vk::ImageLayout,
) -> Result<RenderPass, Error> {
    let mut builder = RenderPassBuilder::new();

    // 0: resolve target, sampled or copied after the pass.
    builder.add_attachment(
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(final_layout),
    );

    // 1: multisampled color, rendered into and resolved away.
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

    // Execution may not reach color-attachment output before the previous
    // frame's reads of the resolve image have completed.
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

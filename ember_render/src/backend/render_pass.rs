use ash::vk;
use tracing::debug;

use super::vulkan::{Device, Error};

/// A subpass description under construction.
///
/// Attachment references are partitioned into input/color/depth/resolve
/// roles. The depth-stencil and resolve references use the undefined-layout
/// sentinel to mean "absent": a reference whose layout is `UNDEFINED` is
/// translated to a null pointer in the final description, which keeps "not
/// used" distinct from "used with layout zero".
#[derive(Clone, Debug, Default)]
pub struct Subpass {
    input_refs: Vec<vk::AttachmentReference>,
    color_refs: Vec<vk::AttachmentReference>,
    depth_stencil_ref: vk::AttachmentReference,
    resolve_ref: vk::AttachmentReference,
}

impl Subpass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input_attachment(&mut self, reference: vk::AttachmentReference) {
        self.input_refs.push(reference);
    }

    pub fn add_color_attachment(&mut self, reference: vk::AttachmentReference) {
        self.color_refs.push(reference);
    }

    pub fn set_depth_stencil_attachment(&mut self, reference: vk::AttachmentReference) {
        self.depth_stencil_ref = reference;
    }

    pub fn set_resolve_attachment(&mut self, reference: vk::AttachmentReference) {
        self.resolve_ref = reference;
    }

    /// Every subpass must produce at least one color output.
    pub fn validate(&self) -> Result<(), Error> {
        if self.color_refs.is_empty() {
            return Err(Error::NoColorAttachments);
        }
        Ok(())
    }

    fn description(&self) -> vk::SubpassDescription<'_> {
        let mut description = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .input_attachments(&self.input_refs)
            .color_attachments(&self.color_refs);

        if self.resolve_ref.layout != vk::ImageLayout::UNDEFINED {
            description =
                description.resolve_attachments(std::slice::from_ref(&self.resolve_ref));
        }

        if self.depth_stencil_ref.layout != vk::ImageLayout::UNDEFINED {
            description = description.depth_stencil_attachment(&self.depth_stencil_ref);
        }

        description
    }
}

/// Accumulates attachment descriptions, subpasses and dependencies, then
/// constructs the native render pass in one call.
///
/// Attachment reference indices must match the position of the corresponding
/// attachment description added here.
#[derive(Clone, Debug, Default)]
pub struct RenderPassBuilder {
    attachments: Vec<vk::AttachmentDescription>,
    subpasses: Vec<Subpass>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attachment(&mut self, description: vk::AttachmentDescription) {
        self.attachments.push(description);
    }

    pub fn add_subpass(&mut self, subpass: Subpass) {
        self.subpasses.push(subpass);
    }

    pub fn add_dependency(&mut self, dependency: vk::SubpassDependency) {
        self.dependencies.push(dependency);
    }

    /// An empty attachment, subpass or dependency list indicates a build
    /// order bug in the caller.
    pub fn validate(&self) -> Result<(), Error> {
        if self.attachments.is_empty() || self.subpasses.is_empty() || self.dependencies.is_empty()
        {
            return Err(Error::EmptyRenderPass);
        }

        for subpass in &self.subpasses {
            subpass.validate()?;
        }

        Ok(())
    }

    pub fn build(&self, device: &Device) -> Result<RenderPass, Error> {
        self.validate()?;

        let descriptions: Vec<vk::SubpassDescription<'_>> = self
            .subpasses
            .iter()
            .map(Subpass::description)
            .collect();

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&self.attachments)
            .subpasses(&descriptions)
            .dependencies(&self.dependencies);

        let render_pass = unsafe { device.raw().create_render_pass(&info, None)? };
        debug!(
            "created render pass with {} attachments",
            self.attachments.len()
        );

        Ok(RenderPass {
            device: device.clone(),
            render_pass,
        })
    }
}

pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    pub fn raw(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::{RenderPassBuilder, Subpass};
    use crate::backend::vulkan::Error;

    fn color_ref() -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    #[test]
    fn subpass_without_color_attachments_is_rejected() {
        let subpass = Subpass::new();
        assert!(matches!(
            subpass.validate(),
            Err(Error::NoColorAttachments)
        ));

        let mut subpass = Subpass::new();
        subpass.add_color_attachment(color_ref());
        assert!(subpass.validate().is_ok());
    }

    #[test]
    fn empty_render_pass_is_rejected() {
        let builder = RenderPassBuilder::new();
        assert!(matches!(builder.validate(), Err(Error::EmptyRenderPass)));

        // An attachment alone is not enough; subpasses and dependencies are
        // still missing.
        let mut builder = RenderPassBuilder::new();
        builder.add_attachment(vk::AttachmentDescription::default());
        assert!(matches!(builder.validate(), Err(Error::EmptyRenderPass)));
    }

    #[test]
    fn complete_render_pass_validates() {
        let mut subpass = Subpass::new();
        subpass.add_color_attachment(color_ref());

        let mut builder = RenderPassBuilder::new();
        builder.add_attachment(vk::AttachmentDescription::default());
        builder.add_subpass(subpass);
        builder.add_dependency(vk::SubpassDependency::default());
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn undefined_layout_marks_absent_depth_and_resolve() {
        let mut subpass = Subpass::new();
        subpass.add_color_attachment(color_ref());

        let description = subpass.description();
        assert!(description.p_depth_stencil_attachment.is_null());
        assert!(description.p_resolve_attachments.is_null());

        let mut subpass = Subpass::new();
        subpass.add_color_attachment(color_ref());
        subpass.set_depth_stencil_attachment(vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });
        subpass.set_resolve_attachment(color_ref());

        let description = subpass.description();
        assert!(!description.p_depth_stencil_attachment.is_null());
        assert!(!description.p_resolve_attachments.is_null());
    }
}

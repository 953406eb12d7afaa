use std::sync::Arc;

use ash::vk;

use super::vulkan::{Buffer, Device, Error};
use crate::texture::Texture;

/// The descriptor types this renderer binds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One shader-visible parameter: a binding slot plus the per-frame resources
/// bound into it.
///
/// A flat list of these fully determines the descriptor set layout, the pool
/// sizing and the set contents, one-to-one-to-one. Binding indices within one
/// build must be unique; the API assigns by explicit index, not position.
pub struct UniformParameter {
    pub binding: u32,
    pub kind: DescriptorKind,
    /// Number of descriptors in the binding (array size for texture arrays).
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// One buffer per frame slot for `UniformBuffer` parameters.
    pub buffers: Vec<Arc<Buffer>>,
    /// One texture list per frame slot for `CombinedImageSampler`
    /// parameters; each list holds `count` textures.
    pub textures: Vec<Vec<Arc<Texture>>>,
}

impl UniformParameter {
    pub fn uniform(binding: u32, stages: vk::ShaderStageFlags, buffers: Vec<Arc<Buffer>>) -> Self {
        Self {
            binding,
            kind: DescriptorKind::UniformBuffer,
            count: 1,
            stages,
            buffers,
            textures: Vec::new(),
        }
    }

    pub fn sampled_textures(
        binding: u32,
        stages: vk::ShaderStageFlags,
        per_frame: Vec<Vec<Arc<Texture>>>,
    ) -> Self {
        let count = per_frame.first().map_or(0, Vec::len) as u32;
        assert!(count > 0);
        Self {
            binding,
            kind: DescriptorKind::CombinedImageSampler,
            count,
            stages,
            buffers: Vec::new(),
            textures: per_frame,
        }
    }
}

/// The layout-relevant projection of a [`UniformParameter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingDesc {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Maps each parameter to exactly one layout binding entry.
pub fn binding_descs(params: &[UniformParameter]) -> Vec<BindingDesc> {
    params
        .iter()
        .map(|param| BindingDesc {
            binding: param.binding,
            kind: param.kind,
            count: param.count,
            stages: param.stages,
        })
        .collect()
}

/// Pool sizes per descriptor type: the summed descriptor count of all
/// parameters of that type, multiplied by the frame count. Types with a zero
/// count are omitted entirely, since zero-sized pool entries are invalid.
pub fn pool_sizes(params: &[UniformParameter], frame_count: u32) -> Vec<(DescriptorKind, u32)> {
    let mut uniforms = 0;
    let mut samplers = 0;
    for param in params {
        match param.kind {
            DescriptorKind::UniformBuffer => uniforms += param.count,
            DescriptorKind::CombinedImageSampler => samplers += param.count,
        }
    }

    let mut sizes = Vec::new();
    if uniforms > 0 {
        sizes.push((DescriptorKind::UniformBuffer, uniforms * frame_count));
    }
    if samplers > 0 {
        sizes.push((DescriptorKind::CombinedImageSampler, samplers * frame_count));
    }
    sizes
}

/// A descriptor set layout built from a parameter list.
pub struct DescriptorSetLayout {
    device: Device,
    layout: Option<vk::DescriptorSetLayout>,
    bindings: Vec<BindingDesc>,
}

impl DescriptorSetLayout {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            layout: None,
            bindings: Vec::new(),
        }
    }

    /// Builds (or rebuilds) the layout. Rebuilding destroys the previous
    /// layout object before creating the new one.
    pub fn build(&mut self, params: &[UniformParameter]) -> Result<(), Error> {
        self.destroy();
        self.bindings = binding_descs(params);

        let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = self
            .bindings
            .iter()
            .map(|desc| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(desc.binding)
                    .descriptor_type(desc.kind.to_vk())
                    .descriptor_count(desc.count)
                    .stage_flags(desc.stages)
            })
            .collect();

        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.raw().create_descriptor_set_layout(&info, None)? };
        self.layout = Some(layout);
        Ok(())
    }

    pub fn bindings(&self) -> &[BindingDesc] {
        &self.bindings
    }

    pub fn raw(&self) -> vk::DescriptorSetLayout {
        self.layout.expect("descriptor set layout was not built")
    }

    fn destroy(&mut self) {
        if let Some(layout) = self.layout.take() {
            unsafe {
                self.device.raw().destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A descriptor pool sized for `frame_count` sets of a parameter list.
pub struct DescriptorPool {
    device: Device,
    pool: Option<vk::DescriptorPool>,
}

impl DescriptorPool {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            pool: None,
        }
    }

    pub fn build(&mut self, params: &[UniformParameter], frame_count: u32) -> Result<(), Error> {
        self.destroy();

        let sizes: Vec<vk::DescriptorPoolSize> = pool_sizes(params, frame_count)
            .into_iter()
            .map(|(kind, count)| vk::DescriptorPoolSize {
                ty: kind.to_vk(),
                descriptor_count: count,
            })
            .collect();

        let info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(frame_count);

        let pool = unsafe { self.device.raw().create_descriptor_pool(&info, None)? };
        self.pool = Some(pool);
        Ok(())
    }

    pub fn raw(&self) -> vk::DescriptorPool {
        self.pool.expect("descriptor pool was not built")
    }

    fn destroy(&mut self) {
        if let Some(pool) = self.pool.take() {
            unsafe {
                self.device.raw().destroy_descriptor_pool(pool, None);
            }
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// `frame_count` descriptor sets allocated from one layout, with every
/// parameter's resources written in.
///
/// The sets live as long as their pool; they are not individually freed.
pub struct DescriptorSet {
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorSet {
    pub fn new(
        device: &Device,
        params: &[UniformParameter],
        layout: &DescriptorSetLayout,
        pool: &DescriptorPool,
        frame_count: u32,
    ) -> Result<Self, Error> {
        let layouts = vec![layout.raw(); frame_count as usize];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.raw())
            .set_layouts(&layouts);

        // Allocation failure here indicates a pool/layout sizing bug, not a
        // recoverable runtime condition.
        let sets = unsafe { device.raw().allocate_descriptor_sets(&info)? };

        for (frame, set) in sets.iter().enumerate() {
            // Collect all buffer/image infos first so the write structs can
            // borrow them without reallocation moving them.
            let mut buffer_infos = Vec::new();
            let mut image_infos = Vec::new();
            for param in params {
                match param.kind {
                    DescriptorKind::UniformBuffer => {
                        assert!(
                            param.buffers.len() >= frame_count as usize,
                            "uniform parameter at binding {} needs one buffer per frame",
                            param.binding
                        );
                        buffer_infos.push([param.buffers[frame].descriptor_info()]);
                        image_infos.push(Vec::new());
                    }
                    DescriptorKind::CombinedImageSampler => {
                        assert!(
                            param.textures.len() >= frame_count as usize,
                            "texture parameter at binding {} needs one texture list per frame",
                            param.binding
                        );
                        let infos: Vec<vk::DescriptorImageInfo> = param.textures[frame]
                            .iter()
                            .map(|texture| texture.descriptor_info())
                            .collect();
                        assert_eq!(infos.len(), param.count as usize);
                        buffer_infos.push([vk::DescriptorBufferInfo::default()]);
                        image_infos.push(infos);
                    }
                }
            }

            let mut writes = Vec::new();
            for (index, param) in params.iter().enumerate() {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(param.binding)
                    .dst_array_element(0)
                    .descriptor_type(param.kind.to_vk());

                let write = match param.kind {
                    DescriptorKind::UniformBuffer => write.buffer_info(&buffer_infos[index]),
                    DescriptorKind::CombinedImageSampler => write.image_info(&image_infos[index]),
                };
                writes.push(write);
            }

            unsafe {
                device.raw().update_descriptor_sets(&writes, &[]);
            }
        }

        Ok(Self { sets })
    }

    pub fn get(&self, frame: usize) -> vk::DescriptorSet {
        self.sets[frame]
    }

    pub fn count(&self) -> usize {
        self.sets.len()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::{binding_descs, pool_sizes, DescriptorKind, UniformParameter};

    fn uniform_param(binding: u32) -> UniformParameter {
        UniformParameter {
            binding,
            kind: DescriptorKind::UniformBuffer,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            buffers: Vec::new(),
            textures: Vec::new(),
        }
    }

    fn texture_param(binding: u32, count: u32) -> UniformParameter {
        UniformParameter {
            binding,
            kind: DescriptorKind::CombinedImageSampler,
            count,
            stages: vk::ShaderStageFlags::FRAGMENT,
            buffers: Vec::new(),
            textures: Vec::new(),
        }
    }

    #[test]
    fn pool_sizes_scale_with_frame_count() {
        let params = vec![uniform_param(0), uniform_param(1), texture_param(2, 3)];

        for frames in [1, 2, 3] {
            let sizes = pool_sizes(&params, frames);
            assert_eq!(
                sizes,
                vec![
                    (DescriptorKind::UniformBuffer, 2 * frames),
                    (DescriptorKind::CombinedImageSampler, 3 * frames),
                ]
            );
        }
    }

    #[test]
    fn pool_sizes_omit_zero_count_types() {
        let params = vec![uniform_param(0)];
        let sizes = pool_sizes(&params, 2);
        assert_eq!(sizes, vec![(DescriptorKind::UniformBuffer, 2)]);

        let params = vec![texture_param(0, 1)];
        let sizes = pool_sizes(&params, 2);
        assert_eq!(sizes, vec![(DescriptorKind::CombinedImageSampler, 2)]);

        assert!(pool_sizes(&[], 3).is_empty());
    }

    #[test]
    fn binding_descs_are_stable_across_builds() {
        let params = vec![uniform_param(0), texture_param(1, 2)];

        let first = binding_descs(&params);
        let second = binding_descs(&params);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].binding, 0);
        assert_eq!(first[1].count, 2);
    }
}

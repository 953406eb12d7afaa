use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// The push-constant block: view and projection matrices for shaders that
/// bypass the uniform buffers.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct PushConstantData {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl Default for PushConstantData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY.to_cols_array_2d(),
            projection: Mat4::IDENTITY.to_cols_array_2d(),
        }
    }
}

/// Owns the push-constant range declaration and the current data blob.
pub struct PushConstants {
    data: PushConstantData,
    stages: vk::ShaderStageFlags,
}

impl PushConstants {
    pub fn new() -> Self {
        Self {
            data: PushConstantData::default(),
            stages: vk::ShaderStageFlags::VERTEX,
        }
    }

    pub fn range(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages,
            offset: 0,
            size: std::mem::size_of::<PushConstantData>() as u32,
        }
    }

    pub fn update(&mut self, view: Mat4, projection: Mat4) {
        self.data.view = view.to_cols_array_2d();
        self.data.projection = projection.to_cols_array_2d();
    }

    pub fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.data)
    }
}

impl Default for PushConstants {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use glam::{Mat4, Vec3};

    use super::PushConstants;

    #[test]
    fn range_covers_two_matrices_at_offset_zero() {
        let constants = PushConstants::new();
        let range = constants.range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 128);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn update_replaces_the_blob() {
        let mut constants = PushConstants::new();
        let before = constants.bytes().to_vec();
        constants.update(
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            Mat4::IDENTITY,
        );
        assert_ne!(constants.bytes(), &before[..]);
        assert_eq!(constants.bytes().len(), 128);
    }
}

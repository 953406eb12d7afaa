use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

use crate::backend::vulkan::CommandBuffer;
use crate::camera::Camera;
use crate::material::{Material, UniformManager};
use crate::mesh::{Model, ModelError};

/// A drawable node: TRS transform, derived matrices, an attached camera and
/// the models it draws.
///
/// The model and normal matrices are recomputed lazily behind a dirty flag;
/// [`draw`] clears the flag before any matrix is read.
///
/// [`draw`]: Self::draw
pub struct SceneNode {
    position: Vec3,
    /// Euler angles in radians, XYZ order.
    rotation: Vec3,
    scale: Vec3,
    dirty: bool,
    model_matrix: Mat4,
    normal_matrix: Mat4,

    pub camera: Camera,
    pub models: Vec<Model>,
    pub material: Option<Material>,
    pub uniforms: Option<UniformManager>,
}

impl SceneNode {
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            // Forces the first draw to compute the matrices.
            dirty: true,
            model_matrix: Mat4::IDENTITY,
            normal_matrix: Mat4::IDENTITY,
            camera: Camera::new(),
            models: Vec::new(),
            material: None,
            uniforms: None,
        }
    }

    pub fn set_position(&mut self, x: f32, y: f32, z: f32) {
        self.position = Vec3::new(x, y, z);
        self.dirty = true;
    }

    pub fn set_rotation(&mut self, x: f32, y: f32, z: f32) {
        self.rotation = Vec3::new(x, y, z);
        self.dirty = true;
    }

    pub fn set_scale(&mut self, x: f32, y: f32, z: f32) {
        self.scale = Vec3::new(x, y, z);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Recomputes the model matrix (translate * rotate * scale) and the
    /// normal matrix (inverse transpose of the upper 3x3) and clears the
    /// dirty flag.
    pub fn update(&mut self) {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );

        self.model_matrix = Mat4::from_translation(self.position)
            * Mat4::from_quat(rotation)
            * Mat4::from_scale(self.scale);

        self.normal_matrix =
            Mat4::from_mat3(Mat3::from_mat4(self.model_matrix).inverse().transpose());

        self.dirty = false;
    }

    pub fn model_matrix(&self) -> Mat4 {
        debug_assert!(!self.dirty);
        self.model_matrix
    }

    pub fn normal_matrix(&self) -> Mat4 {
        debug_assert!(!self.dirty);
        self.normal_matrix
    }

    /// Draws every attached model, recomputing the matrices first if needed.
    pub fn draw(&mut self, cmd: &CommandBuffer) -> Result<(), ModelError> {
        if self.dirty {
            self.update();
        }

        for model in &self.models {
            model.draw(cmd)?;
        }
        Ok(())
    }
}

impl Default for SceneNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3, Vec4};

    use super::SceneNode;

    #[test]
    fn starts_dirty_and_update_clears() {
        let mut node = SceneNode::new();
        assert!(node.is_dirty());
        node.update();
        assert!(!node.is_dirty());
        assert_eq!(node.model_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn mutation_marks_dirty() {
        let mut node = SceneNode::new();
        node.update();
        node.set_scale(2.0, 2.0, 2.0);
        assert!(node.is_dirty());
    }

    #[test]
    fn model_matrix_applies_trs() {
        let mut node = SceneNode::new();
        node.set_position(1.0, 2.0, 3.0);
        node.set_scale(2.0, 2.0, 2.0);
        node.update();

        let p = node.model_matrix() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!((p.truncate() - Vec3::new(3.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn normal_matrix_is_inverse_transpose() {
        let mut node = SceneNode::new();
        node.set_scale(2.0, 1.0, 1.0);
        node.update();

        // A non-uniform scale must not leave normals scaled with the
        // geometry: the x component shrinks instead of growing.
        let n = node.normal_matrix() * Vec4::new(1.0, 0.0, 0.0, 0.0);
        assert!((n.x - 0.5).abs() < 1e-5);
    }
}

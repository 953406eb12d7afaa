use ember_window::events::CameraMove;
use glam::{Mat4, Vec3, Vec4};

/// A camera in either free-fly or orbit control mode.
///
/// The view matrix is recomputed on every mutation of position, front or up;
/// a stale view matrix is never observable after a mutation.
#[derive(Clone, Debug)]
pub struct Camera {
    position: Vec3,
    front: Vec3,
    up: Vec3,
    speed: f32,
    pitch: f32,
    yaw: f32,
    sensitivity: f32,
    mode: Mode,
    view: Mat4,
    projection: Mat4,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Mode {
    FreeFly,
    Orbit {
        target: Vec3,
        distance: f32,
        /// Angle around the vertical axis, in radians.
        angle: f32,
        /// Fixed height offset above the target.
        height: f32,
    },
}

impl Camera {
    pub fn new() -> Self {
        let mut camera = Self {
            position: Vec3::ZERO,
            front: -Vec3::Z,
            up: Vec3::Y,
            speed: 0.01,
            pitch: 0.0,
            yaw: -90.0,
            sensitivity: 0.1,
            mode: Mode::FreeFly,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        camera.update();
        camera
    }

    /// Free-fly placement: derives front and up from a target point.
    pub fn look_at(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.position = position;
        self.front = (target - position).normalize();

        let right = self.front.cross(up).normalize();
        self.up = right.cross(self.front).normalize();

        self.mode = Mode::FreeFly;
        self.update();
    }

    /// Orbit placement: the camera sits `distance` away from `target` along
    /// `direction` and keeps facing the target.
    pub fn orbit_around(&mut self, target: Vec3, distance: f32, direction: Vec3) {
        let direction = direction.normalize();
        let height = direction.y * distance;
        let planar = Vec3::new(direction.x, 0.0, direction.z);
        let angle = planar.z.atan2(planar.x);

        self.mode = Mode::Orbit {
            target,
            distance,
            angle,
            height,
        };
        self.position = target + direction * distance;
        self.front = (target - self.position).normalize();
        self.update();
    }

    /// Advances the orbit by `degrees_per_second * dt` around the vertical
    /// axis. No-op in free-fly mode.
    pub fn horizontal_round_rotate(&mut self, dt: f32, degrees_per_second: f32) {
        let Mode::Orbit {
            target,
            distance,
            mut angle,
            height,
        } = self.mode
        else {
            return;
        };

        angle += (degrees_per_second * dt).to_radians();

        let planar_radius = (distance * distance - height * height).max(0.0).sqrt();
        self.position = target
            + Vec3::new(
                planar_radius * angle.cos(),
                height,
                planar_radius * angle.sin(),
            );
        self.front = (target - self.position).normalize();
        self.mode = Mode::Orbit {
            target,
            distance,
            angle,
            height,
        };
        self.update();
    }

    /// Recomputes the view matrix from position, front and up.
    pub fn update(&mut self) {
        self.view = Mat4::look_at_rh(self.position, self.position + self.front, self.up);
    }

    pub fn set_perspective(&mut self, fov_degrees: f32, aspect: f32, near: f32, far: f32) {
        self.projection = Mat4::perspective_rh_gl(fov_degrees.to_radians(), aspect, near, far);
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    pub fn apply_move(&mut self, direction: CameraMove) {
        let right = self.front.cross(self.up).normalize();
        match direction {
            CameraMove::Left => self.position -= right * self.speed,
            CameraMove::Right => self.position += right * self.speed,
            CameraMove::Forward => self.position += self.front * self.speed,
            CameraMove::Back => self.position -= self.front * self.speed,
        }
        self.update();
    }

    pub fn pitch(&mut self, y_offset: f32) {
        self.pitch = (self.pitch + y_offset * self.sensitivity).clamp(-89.0, 89.0);
        self.rebuild_front();
    }

    pub fn yaw(&mut self, x_offset: f32) {
        self.yaw += x_offset * self.sensitivity;
        self.rebuild_front();
    }

    pub fn on_mouse_move(&mut self, _xpos: f32, _ypos: f32) {
        // Mouse look is currently disabled; the orbit drive owns the camera.
    }

    fn rebuild_front(&mut self) {
        let pitch = self.pitch.to_radians();
        let yaw = self.yaw.to_radians();
        self.front = Vec3::new(
            yaw.cos() * pitch.cos(),
            pitch.sin(),
            yaw.sin() * pitch.cos(),
        )
        .normalize();
        self.update();
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    /// World-space position as a homogeneous point.
    pub fn world_position(&self) -> Vec4 {
        self.position.extend(1.0)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use ember_window::events::CameraMove;
    use glam::{Mat4, Vec3};

    use super::Camera;

    #[test]
    fn view_matrix_follows_moves() {
        let mut camera = Camera::new();
        camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        camera.set_speed(1.0);

        let before = camera.view_matrix();
        camera.apply_move(CameraMove::Forward);
        let after = camera.view_matrix();

        assert_ne!(before, after);
        // Moving forward from +Z towards the origin shrinks z.
        assert!((camera.world_position().z - 4.0).abs() < 1e-5);
    }

    #[test]
    fn pitch_clamps_at_89_degrees() {
        let mut camera = Camera::new();
        camera.set_sensitivity(1.0);
        camera.pitch(500.0);
        // Front may never reach straight up.
        assert!(camera.view_matrix().is_finite());
        camera.pitch(-2000.0);
        assert!(camera.view_matrix().is_finite());
    }

    #[test]
    fn orbit_preserves_distance() {
        let mut camera = Camera::new();
        let target = Vec3::ZERO;
        camera.orbit_around(target, 5.0, Vec3::new(0.0, -0.2, 1.0));

        let before = camera.world_position().truncate().distance(target);
        camera.horizontal_round_rotate(0.25, 30.0);
        let after = camera.world_position().truncate().distance(target);

        assert!((before - 5.0).abs() < 1e-4);
        assert!((after - 5.0).abs() < 1e-4);
        assert_ne!(camera.view_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn free_fly_ignores_orbit_rotation() {
        let mut camera = Camera::new();
        camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let before = camera.view_matrix();
        camera.horizontal_round_rotate(1.0, 30.0);
        assert_eq!(before, camera.view_matrix());
    }
}

use glam::{Mat4, Vec3};

use crate::controller::CameraPose;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
            fov: std::f32::consts::PI / 3.0,
            near: 0.1,
            far: 1000.0,
        }
    }

    pub fn set_pose(&mut self, pose: &CameraPose) {
        self.position = pose.position;
        self.yaw = pose.yaw;
        self.pitch = pose.pitch;
    }

    /// Look direction; at zero yaw/pitch the camera faces -z.
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            -self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect.max(1e-3), self.near, self.far)
    }

    /// Column-major model-view-projection in the layout the sort kernel
    /// consumes: its camera-forward row grows with view distance, which is
    /// what makes the counting sort back-to-front.
    pub fn model_view_projection(&self, aspect: f32) -> [f32; 16] {
        (self.projection_matrix(aspect) * self.view_matrix()).to_cols_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pose_faces_negative_z() {
        let camera = Camera::new(Vec3::ZERO, 0.0, 0.0);
        let forward = camera.forward();
        assert!(forward.x.abs() < 1e-6);
        assert!(forward.y.abs() < 1e-6);
        assert!((forward.z + 1.0).abs() < 1e-6);
    }

    #[test]
    fn mvp_depth_row_grows_with_distance() {
        let camera = Camera::new(Vec3::ZERO, 0.0, 0.0);
        let m = camera.model_view_projection(1.0);
        let depth = |p: Vec3| m[2] * p.x + m[6] * p.y + m[10] * p.z + m[14];
        let near = depth(Vec3::new(0.0, 0.0, -1.0));
        let far = depth(Vec3::new(0.0, 0.0, -50.0));
        assert!(far > near, "far {far} should exceed near {near}");
    }

    #[test]
    fn yaw_rotates_the_look_direction() {
        let camera = Camera::new(Vec3::ZERO, std::f32::consts::FRAC_PI_2, 0.0);
        let forward = camera.forward();
        assert!((forward.x + 1.0).abs() < 1e-6);
        assert!(forward.z.abs() < 1e-6);
    }
}

use glam::{Mat4, Vec3};
use penumbra_render::{RenderView, ViewportCamera};

/// Perspective camera with position, yaw and pitch.
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
    pub sensitivity: f32,
    /// Follow the aspect ratio of the viewport the camera is bound to.
    pub auto_aspect: bool,
    attached: bool,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 10.0, 15.0),
            yaw: -90.0_f32.to_radians(),
            pitch: -30.0_f32.to_radians(),
            fov: 60.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
            speed: 10.0,
            sensitivity: 0.003,
            auto_aspect: true,
            attached: false,
        }
    }
}

impl FlyCamera {
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    /// Move along the view direction; negative `amount` backs off.
    pub fn advance(&mut self, amount: f32) {
        self.position += self.forward() * self.speed * amount;
    }

    pub fn strafe(&mut self, amount: f32) {
        self.position += self.right() * self.speed * amount;
    }

    pub fn rise(&mut self, amount: f32) {
        self.position.y += self.speed * amount;
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * self.sensitivity;
        self.pitch -= dy * self.sensitivity;
        self.pitch = self
            .pitch
            .clamp(-89.0_f32.to_radians(), 89.0_f32.to_radians());
    }

    /// Whether a viewport currently holds this camera.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    /// Camera inputs for the next frame.
    pub fn render_view(&self) -> RenderView {
        RenderView {
            camera_position: self.position,
            view: self.view_matrix(),
            projection: self.projection_matrix(),
        }
    }
}

impl ViewportCamera for FlyCamera {
    fn auto_aspect_ratio(&self) -> bool {
        self.auto_aspect
    }

    fn set_aspect_ratio(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    fn notify_viewport(&mut self, attached: bool) {
        self.attached = attached;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera() {
        let cam = FlyCamera::default();
        assert!(cam.position.y > 0.0);
        let view = cam.render_view();
        assert!(!(view.projection * view.view).col(0).x.is_nan());
        assert_eq!(view.camera_position, cam.position);
    }

    #[test]
    fn camera_movement() {
        let mut cam = FlyCamera::default();
        let start = cam.position;
        cam.advance(1.0);
        assert_ne!(cam.position, start);
        cam.advance(-1.0);
        assert!((cam.position - start).length() < 1e-4);
    }

    #[test]
    fn viewport_binding() {
        let mut cam = FlyCamera::default();
        cam.notify_viewport(true);
        assert!(cam.is_attached());
        cam.set_aspect_ratio(2.0);
        assert_eq!(cam.aspect, 2.0);
        cam.set_aspect_ratio(0.0);
        assert_eq!(cam.aspect, 2.0);
        cam.notify_viewport(false);
        assert!(!cam.is_attached());
    }
}

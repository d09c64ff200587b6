use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub const FOV_Y_DEGREES: f32 = 60.0;
pub const NEAR: f32 = 1.0;
pub const FAR: f32 = 20_000.0;
pub const MIN_EYE_Z: f32 = 5.0;

/// Perspective camera looking straight down the -z axis at the layout plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub aspect: f32,
}

impl Camera {
    pub fn new(aspect: f32) -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 2_500.0),
            aspect,
        }
    }

    /// Eye distance at which the whole `[-spread, spread]` square fits the view.
    pub fn overview(aspect: f32, spread: f32) -> Self {
        let half_fov = (FOV_Y_DEGREES.to_radians() / 2.0).tan();
        let fit = spread / half_fov / aspect.min(1.0).max(f32::EPSILON);
        Self {
            eye: Vec3::new(0.0, 0.0, (fit * 1.1).clamp(MIN_EYE_Z, FAR * 0.9)),
            aspect,
        }
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view(&self) -> Mat4 {
        let center = Vec3::new(self.eye.x, self.eye.y, 0.0);
        Mat4::look_at_rh(self.eye, center, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), self.aspect, NEAR, FAR)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Moves parallel to the layout plane, scaled by height so panning feels constant.
    pub fn pan(&mut self, dx: f32, dy: f32) {
        let scale = self.eye.z * 0.001;
        self.eye.x += dx * scale;
        self.eye.y += dy * scale;
    }

    pub fn zoom(&mut self, factor: f32) {
        self.eye.z = (self.eye.z * factor).clamp(MIN_EYE_Z, FAR * 0.9);
    }

    pub fn uniform(&self, point_scale: f32) -> CameraUniform {
        CameraUniform {
            view_proj: self.view_proj().to_cols_array_2d(),
            point_scale,
            _padding: [0.0; 3],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub point_scale: f32,
    pub _padding: [f32; 3],
}

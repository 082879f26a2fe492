// projector.rs — 相机位姿 -> 投影矩阵 / 视图矩阵

use glam::{Mat4, Quat, Vec3};

pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 100.0;

/// Camera placement for one frame. Derived every query, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
}

impl CameraPose {
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov: f32) -> Self {
        Self { eye, target, up, fov }
    }

    /// Pose for an animation keyframe: forward is `-Z` and up is `+Y` in the
    /// camera's local frame.
    pub fn from_orientation(position: Vec3, orientation: Quat, fov: f32) -> Self {
        let forward = (orientation * Vec3::NEG_Z).normalize();
        let up = (orientation * Vec3::Y).normalize();
        Self {
            eye: position,
            target: position + forward,
            up,
            fov,
        }
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }
}

/// Matrices handed to the renderer, right-handed and column-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    pub proj: Mat4,
    pub view: Mat4,
}

impl ViewProjection {
    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }
}

/// Build the projection and view matrices for `pose`.
///
/// Same function for live playback and export so both paths produce the
/// same numbers for the same pose.
pub fn project(pose: &CameraPose, aspect_ratio: f32) -> ViewProjection {
    // perspective_rh uses the [0,1] depth range expected by wgpu
    let proj = Mat4::perspective_rh(pose.fov.to_radians(), aspect_ratio, Z_NEAR, Z_FAR);
    let view = Mat4::look_at_rh(pose.eye, pose.target, pose.up);
    ViewProjection { proj, view }
}

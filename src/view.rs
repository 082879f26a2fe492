// view.rs — 视角控制器：拖动 / 滚轮 / 模式切换 / 过极点检测

use glam::Vec3;

use crate::animation::{Playback, PlaybackMode, Preset};
use crate::config::ControlSettings;
use crate::panorama::{ViewMode, ViewState};
use crate::projector::{self, CameraPose, ViewProjection};

pub const PITCH_LIMIT: f32 = 89.0;
pub const FOV_MIN: f32 = 1.0;
pub const FOV_MAX: f32 = 120.0;

/// Margin (degrees) keeping both interval endpoints out of the pole test.
/// Below one ulp at the nodes, so a sample a hair short of a pole still
/// leaves the pole inside the next interval.
pub const POLE_EPSILON: f32 = f32::EPSILON;

/// Wrap an angle into `[0, 360)`.
pub fn wrap_yaw(yaw: f32) -> f32 {
    let wrapped = yaw.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// True iff the open interval between the two pitches contains an angle
/// congruent to 90 mod 180, i.e. the view direction went through a pole.
pub fn pole_crossing(prev_pitch: f32, pitch: f32) -> bool {
    if !prev_pitch.is_finite() || !pitch.is_finite() {
        return false;
    }
    let (lo, hi) = if prev_pitch <= pitch {
        (prev_pitch, pitch)
    } else {
        (pitch, prev_pitch)
    };
    let lo = lo + POLE_EPSILON;
    let hi = hi - POLE_EPSILON;
    if lo >= hi {
        return false;
    }

    let mut node = 90.0 + ((lo - 90.0) / 180.0).ceil() * 180.0;
    if node <= lo {
        node += 180.0;
    }
    node < hi
}

/// Unit view direction for the given angles in degrees.
pub fn direction(yaw: f32, pitch: f32) -> Vec3 {
    let (yaw, pitch) = (yaw.to_radians(), pitch.to_radians());
    Vec3::new(
        yaw.sin() * pitch.cos(),
        pitch.sin(),
        yaw.cos() * pitch.cos(),
    )
}

/// Camera pose for the interactive (non-animated) modes.
///
/// The outside-looking-in modes flip `up_sign` whenever the pitch passed a
/// pole since the previous call, then record the pitch in `prev_pitch`.
pub fn compute_static_pose(state: &mut ViewState) -> CameraPose {
    let dir = direction(state.yaw, state.pitch);
    match state.mode {
        ViewMode::Perspective => CameraPose::look_at(Vec3::ZERO, dir, Vec3::Y, state.fov),
        ViewMode::LittlePlanet | ViewMode::CrystalBall => {
            if pole_crossing(state.prev_pitch, state.pitch) {
                state.up_sign = -state.up_sign;
            }
            state.prev_pitch = state.pitch;
            let eye = dir * state.mode.eye_distance();
            CameraPose::look_at(eye, Vec3::ZERO, Vec3::new(0.0, state.up_sign, 0.0), state.fov)
        }
    }
}

/// Turns input deltas and elapsed time into camera poses.
#[derive(Debug, Clone)]
pub struct ViewController {
    state: ViewState,
    playback: Option<Playback>,
    settings: ControlSettings,
}

impl ViewController {
    pub fn new(mode: ViewMode, settings: ControlSettings) -> Self {
        Self {
            state: ViewState::new(mode),
            playback: None,
            settings,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn mode(&self) -> ViewMode {
        self.state.mode
    }

    pub fn playback(&self) -> Option<&Playback> {
        self.playback.as_ref()
    }

    pub fn is_animating(&self) -> bool {
        self.playback.is_some()
    }

    /// Switch mode, restoring its default pitch/yaw/fov and cancelling any
    /// animation. Drag state carries over.
    pub fn set_mode(&mut self, mode: ViewMode) {
        let dragging = self.state.dragging;
        let last_cursor = self.state.last_cursor;
        self.state = ViewState {
            dragging,
            last_cursor,
            ..ViewState::new(mode)
        };
        if self.playback.take().is_some() {
            log::debug!("animation cancelled by mode switch");
        }
        log::debug!("view mode -> {:?}", mode);
    }

    pub fn on_button(&mut self, pressed: bool, cursor: (f64, f64)) {
        self.state.dragging = pressed;
        if pressed {
            self.state.last_cursor = cursor;
        }
    }

    /// Cursor sample in window pixels; converted into a drag delta while the
    /// button is held.
    pub fn on_cursor_moved(&mut self, cursor: (f64, f64)) {
        if !self.state.dragging {
            return;
        }
        let (last_x, last_y) = self.state.last_cursor;
        self.state.last_cursor = cursor;
        self.on_drag((cursor.0 - last_x) as f32, (cursor.1 - last_y) as f32);
    }

    /// Apply a delta since the previous cursor sample. Screen y grows
    /// downwards, so it is inverted for pitch.
    pub fn on_drag(&mut self, dx: f32, dy: f32) {
        if !self.state.dragging {
            return;
        }
        let s = self.settings.drag_sensitivity;
        self.state.yaw += dx * s;
        self.state.pitch += -dy * s;
    }

    pub fn on_scroll(&mut self, dy: f32) {
        self.state.fov = (self.state.fov - self.settings.scroll_step * dy).clamp(FOV_MIN, FOV_MAX);
    }

    /// Held-key nudge, in key steps. Positive pitch looks up, positive yaw
    /// turns the same way as dragging right.
    pub fn nudge(&mut self, pitch_steps: f32, yaw_steps: f32) {
        self.state.pitch += pitch_steps * self.settings.key_step;
        self.state.yaw += yaw_steps * self.settings.key_step;
    }

    pub fn play(&mut self, preset: Preset) {
        log::info!("starting animation {}", preset.label());
        self.playback = Some(Playback::new(preset, PlaybackMode::Once));
    }

    /// Advance the animation clock by wall-clock `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        if let Some(playback) = self.playback.as_mut() {
            playback.advance(dt);
        }
    }

    /// Normalize angles after the inputs of one frame were applied.
    pub fn tick(&mut self) {
        self.state.yaw = wrap_yaw(self.state.yaw);
        if self.state.mode == ViewMode::Perspective && !self.is_animating() {
            self.state.pitch = self.state.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        }
    }

    /// Pose for this frame: the animation if one is active, else the static
    /// pose of the current mode.
    pub fn current_pose(&mut self) -> CameraPose {
        match &self.playback {
            Some(playback) => playback.pose(),
            None => compute_static_pose(&mut self.state),
        }
    }

    pub fn camera(&mut self, aspect_ratio: f32) -> ViewProjection {
        let pose = self.current_pose();
        projector::project(&pose, aspect_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller(mode: ViewMode) -> ViewController {
        ViewController::new(mode, ControlSettings::default())
    }

    #[test]
    fn test_wrap_yaw_range_and_congruence() {
        for x in [-720.5f32, -360.0, -1.0, -1e-8, 0.0, 45.0, 359.9, 360.0, 725.0, 1e6] {
            let w = wrap_yaw(x);
            assert!((0.0..360.0).contains(&w), "wrap_yaw({x}) = {w}");
            let diff = (f64::from(x) - f64::from(w)) / 360.0;
            assert!((diff - diff.round()).abs() < 1e-4, "wrap_yaw({x}) = {w}");
        }
        assert_eq!(wrap_yaw(370.0), 10.0);
        assert_eq!(wrap_yaw(-10.0), 350.0);
    }

    #[test]
    fn test_pole_crossing_cases() {
        assert!(!pole_crossing(10.0, 20.0));
        assert!(pole_crossing(80.0, 100.0));
        assert!(pole_crossing(100.0, 280.0));
        // 270 lies outside (100, 260)
        assert!(!pole_crossing(100.0, 260.0));
        assert!(!pole_crossing(95.0, 96.0));
        assert!(pole_crossing(-80.0, -100.0));
        // endpoints are excluded
        assert!(!pole_crossing(90.0, 95.0));
        assert!(!pole_crossing(85.0, 90.0));
        assert!(!pole_crossing(90.0, 90.0));
        // a pole on the lower endpoint must not hide the next one
        assert!(pole_crossing(90.0, 300.0));
        // samples just short of / just past a pole
        assert!(!pole_crossing(89.8, 89.99997));
        assert!(pole_crossing(89.99997, 90.2));
        assert!(pole_crossing(80.0, 90.00005));
        assert!(!pole_crossing(90.00005, 100.0));
    }

    #[test]
    fn test_pole_crossing_symmetric() {
        let samples = [-270.0f32, -95.0, -90.0, -10.0, 0.0, 80.0, 90.0, 100.0, 260.0, 450.0];
        for &a in &samples {
            for &b in &samples {
                assert_eq!(pole_crossing(a, b), pole_crossing(b, a), "({a}, {b})");
            }
        }
    }

    #[test]
    fn test_drag_only_while_dragging() {
        let mut c = controller(ViewMode::Perspective);
        c.on_drag(10.0, 10.0);
        assert_eq!((c.state().yaw, c.state().pitch), (0.0, 0.0));

        c.on_button(true, (100.0, 100.0));
        c.on_cursor_moved((110.0, 90.0));
        assert_relative_eq!(c.state().yaw, 2.0, epsilon = 1e-6);
        assert_relative_eq!(c.state().pitch, 2.0, epsilon = 1e-6);

        c.on_button(false, (110.0, 90.0));
        c.on_cursor_moved((300.0, 300.0));
        assert_relative_eq!(c.state().yaw, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_scroll_clamps_fov() {
        let mut c = controller(ViewMode::Perspective);
        c.on_scroll(1.0);
        assert_eq!(c.state().fov, 56.0);
        c.on_scroll(100.0);
        assert_eq!(c.state().fov, FOV_MIN);
        c.on_scroll(-100.0);
        assert_eq!(c.state().fov, FOV_MAX);
    }

    #[test]
    fn test_tick_clamps_pitch_only_for_interactive_perspective() {
        let mut c = controller(ViewMode::Perspective);
        c.on_button(true, (0.0, 0.0));
        c.on_drag(-1900.0, -1000.0);
        c.tick();
        assert_eq!(c.state().pitch, PITCH_LIMIT);
        assert!((0.0..360.0).contains(&c.state().yaw));

        let mut c = controller(ViewMode::LittlePlanet);
        c.nudge(40.0, 0.0);
        c.tick();
        assert_eq!(c.state().pitch, 110.0);

        let mut c = controller(ViewMode::Perspective);
        c.play(Preset::Rotate);
        c.nudge(400.0, 0.0);
        c.tick();
        assert_eq!(c.state().pitch, 200.0);
    }

    #[test]
    fn test_set_mode_resets_regardless_of_drag() {
        let mut c = controller(ViewMode::LittlePlanet);
        c.on_button(true, (0.0, 0.0));
        c.on_drag(50.0, 80.0);
        c.on_scroll(3.0);
        c.play(Preset::Swipe);
        c.set_mode(ViewMode::Perspective);
        let s = c.state();
        assert_eq!((s.pitch, s.yaw, s.fov), (0.0, 0.0, 60.0));
        assert_eq!(s.prev_pitch, 0.0);
        assert!(s.dragging);
        assert!(!c.is_animating());
    }

    #[test]
    fn test_perspective_pose_looks_outward() {
        let mut c = controller(ViewMode::Perspective);
        let pose = c.current_pose();
        assert_eq!(pose.eye, Vec3::ZERO);
        assert!(pose.target.abs_diff_eq(Vec3::Z, 1e-6));
        assert_eq!(pose.up, Vec3::Y);
    }

    #[test]
    fn test_crystal_ball_eye_outside_sphere() {
        let mut c = controller(ViewMode::CrystalBall);
        let pose = c.current_pose();
        assert!(pose.eye.abs_diff_eq(Vec3::new(0.0, 0.0, 1.5), 1e-6));
        assert_eq!(pose.target, Vec3::ZERO);
    }

    #[test]
    fn test_little_planet_flips_up_across_pole() {
        let mut c = controller(ViewMode::LittlePlanet);
        c.on_button(true, (0.0, 0.0));
        // 90 -> 80
        c.on_drag(0.0, 50.0);
        let pose = c.current_pose();
        assert_eq!(pose.up, Vec3::Y);
        // 80 -> 100 passes the zenith
        c.on_drag(0.0, -100.0);
        let pose = c.current_pose();
        assert_eq!(pose.up, Vec3::NEG_Y);
        assert_relative_eq!(c.state().prev_pitch, 100.0, epsilon = 1e-4);
        // back through it
        c.on_drag(0.0, 100.0);
        assert_eq!(c.current_pose().up, Vec3::Y);
    }

    #[test]
    fn test_small_drag_steps_flip_up_near_zenith() {
        let mut c = controller(ViewMode::LittlePlanet);
        c.on_button(true, (0.0, 0.0));
        // 90 -> 88
        c.on_drag(0.0, 10.0);
        c.tick();
        assert_eq!(c.current_pose().up, Vec3::Y);

        // 0.2 degree steps up to ~92; accumulated samples land next to 90
        for _ in 0..20 {
            c.on_drag(0.0, -1.0);
            c.tick();
            c.current_pose();
        }
        assert!(c.state().pitch > 91.0);
        assert_eq!(c.state().up_sign, -1.0);
        assert_eq!(c.current_pose().up, Vec3::NEG_Y);
    }

    #[test]
    fn test_sample_just_past_zenith_flips_once() {
        let mut c = controller(ViewMode::LittlePlanet);
        c.on_button(true, (0.0, 0.0));
        c.on_drag(0.0, 50.0);
        assert_eq!(c.current_pose().up, Vec3::Y);

        // 80 -> 90.00005 -> 100
        c.on_drag(0.0, -(10.00005 / 0.2));
        assert!(c.state().pitch > 90.0);
        assert_eq!(c.current_pose().up, Vec3::NEG_Y);
        c.on_drag(0.0, -50.0);
        assert_eq!(c.current_pose().up, Vec3::NEG_Y);
    }

    /// Poles (90 + 180k) lying strictly below `pitch`.
    fn poles_below(pitch: f32) -> i64 {
        ((f64::from(pitch) - 90.0) / 180.0).ceil() as i64
    }

    #[test]
    fn test_up_sign_tracks_parity_of_poles_crossed() {
        // xorshift, fixed seeds
        let mut seed = 0x2545_f491_u32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };

        for _ in 0..64 {
            let mut c = controller(ViewMode::CrystalBall);
            c.on_button(true, (0.0, 0.0));
            let start = c.state().pitch;
            c.current_pose();

            // a sample exactly on a pole is excluded from both intervals
            let mut on_pole = false;
            for _ in 0..200 {
                // steps of up to 30 degrees, either way
                let dy = (next() % 6001) as f32 / 20.0 - 150.0;
                c.on_drag(0.0, dy);
                c.tick();
                c.current_pose();
                on_pole |= (c.state().pitch - 90.0).rem_euclid(180.0) == 0.0;
            }
            if on_pole {
                continue;
            }

            let end = c.state().pitch;
            let crossed = (poles_below(end) - poles_below(start)).abs();
            let expected = if crossed % 2 == 1 { -1.0 } else { 1.0 };
            assert_eq!(c.state().up_sign, expected, "start {start}, end {end}");
        }
    }

    #[test]
    fn test_default_little_planet_camera_is_finite() {
        let mut c = controller(ViewMode::LittlePlanet);
        let vp = c.camera(16.0 / 9.0);
        assert!(vp.view.is_finite());
        assert!(vp.proj.is_finite());
    }

    #[test]
    fn test_animation_drives_camera() {
        let mut c = controller(ViewMode::Perspective);
        c.play(Preset::Rotate);
        c.advance(4.5);
        let expected = Preset::Rotate.track().interpolate(4.5);
        assert_eq!(c.current_pose(), expected);
        assert_eq!(c.camera(1.5), projector::project(&expected, 1.5));
    }
}

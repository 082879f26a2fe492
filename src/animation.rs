// animation.rs — 照片动画师：关键帧轨道与插值
//
// N 个关键帧、N-1 个阶段。每个阶段内位置与 fov 线性插值，朝向使用 slerp。
// 预设 (ROTATE / SWIPE / SWIPE_ROTATE) 只是数据表，共用同一套插值逻辑。

use std::sync::Arc;

use glam::{EulerRot, Quat, Vec3};

use crate::error::{PanoramaError, Result};
use crate::projector::CameraPose;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub position: Vec3,
    pub orientation: Quat,
    /// Vertical field of view in degrees.
    pub fov: f32,
}

impl Keyframe {
    pub fn new(position: Vec3, orientation: Quat, fov: f32) -> Self {
        Self {
            position,
            orientation,
            fov,
        }
    }

    /// Keyframe authored with Euler angles in degrees: pitch about X, then yaw
    /// about Y.
    pub fn from_euler(position: Vec3, pitch_deg: f32, yaw_deg: f32, fov: f32) -> Self {
        let orientation = Quat::from_euler(
            EulerRot::YXZ,
            yaw_deg.to_radians(),
            pitch_deg.to_radians(),
            0.0,
        );
        Self::new(position, orientation, fov)
    }

    pub fn pose(&self) -> CameraPose {
        CameraPose::from_orientation(self.position, self.orientation, self.fov)
    }
}

/// Active stage and its normalized progress at some point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageCursor {
    pub index: usize,
    pub progress: f32,
}

/// Immutable keyframe track. Invariant: `stage_durations.len() == keyframes.len() - 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationTrack {
    keyframes: Vec<Keyframe>,
    stage_durations: Vec<f32>,
}

impl AnimationTrack {
    pub fn new(keyframes: Vec<Keyframe>, stage_durations: Vec<f32>) -> Result<Self> {
        if keyframes.len() < 2 {
            return Err(PanoramaError::invalid_track(format!(
                "need at least 2 keyframes, got {}",
                keyframes.len()
            )));
        }
        if stage_durations.len() != keyframes.len() - 1 {
            return Err(PanoramaError::invalid_track(format!(
                "{} keyframes need {} stage durations, got {}",
                keyframes.len(),
                keyframes.len() - 1,
                stage_durations.len()
            )));
        }
        if let Some(d) = stage_durations.iter().find(|d| !d.is_finite() || **d < 0.0) {
            return Err(PanoramaError::invalid_track(format!(
                "stage duration must be finite and non-negative, got {d}"
            )));
        }
        let finite = keyframes.iter().all(|k| {
            k.position.is_finite() && k.orientation.is_finite() && k.fov.is_finite()
        });
        if !finite {
            return Err(PanoramaError::invalid_track("keyframe holds a non-finite value"));
        }

        let keyframes = keyframes
            .into_iter()
            .map(|k| Keyframe {
                orientation: k.orientation.normalize(),
                ..k
            })
            .collect();

        Ok(Self {
            keyframes,
            stage_durations,
        })
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn stage_durations(&self) -> &[f32] {
        &self.stage_durations
    }

    pub fn total_duration(&self) -> f32 {
        self.stage_durations.iter().sum()
    }

    /// Find the active stage at time `t` (seconds).
    ///
    /// The first stage whose cumulative end is `>= t` is active, so a stage
    /// boundary belongs to the earlier stage. Past the end the last stage is
    /// reported with progress 1.
    pub fn locate(&self, t: f32) -> StageCursor {
        let mut stage_end = 0.0f32;
        for (index, &duration) in self.stage_durations.iter().enumerate() {
            let stage_start = stage_end;
            stage_end += duration;
            if t <= stage_end {
                let progress = if duration > 0.0 {
                    ((t - stage_start) / duration).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                return StageCursor { index, progress };
            }
        }
        StageCursor {
            index: self.stage_durations.len() - 1,
            progress: 1.0,
        }
    }

    pub fn stage_progress(&self, t: f32) -> f32 {
        self.locate(t).progress
    }

    /// Camera pose at time `t`. Saturates at both ends of the track.
    pub fn interpolate(&self, t: f32) -> CameraPose {
        self.sample(t).pose()
    }

    /// Interpolated keyframe at time `t`; exact keyframes at the stage ends.
    pub fn sample(&self, t: f32) -> Keyframe {
        let StageCursor { index, progress } = self.locate(t);
        let from = &self.keyframes[index];
        let to = &self.keyframes[index + 1];

        if progress <= 0.0 {
            return *from;
        }
        if progress >= 1.0 {
            return *to;
        }

        Keyframe {
            position: from.position.lerp(to.position, progress),
            orientation: from.orientation.slerp(to.orientation, progress).normalize(),
            fov: lerp(from.fov, to.fov, progress),
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Named camera-move effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// 360° sweep around the horizon, then up toward the zenith and back.
    Rotate,
    /// Four-keyframe variant of [`Preset::Rotate`].
    RotateCompact,
    /// Ground-to-sky sweep.
    Swipe,
    /// Sky-to-ground sweep with a turn.
    SwipeRotate,
}

impl Preset {
    pub fn label(self) -> &'static str {
        match self {
            Preset::Rotate => "ROTATE",
            Preset::RotateCompact => "ROTATE (compact)",
            Preset::Swipe => "SWIPE",
            Preset::SwipeRotate => "SWIPE_ROTATE",
        }
    }

    pub fn track(self) -> AnimationTrack {
        let (keyframes, stage_durations) = match self {
            Preset::Rotate => (
                vec![
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 0.0, 60.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 180.0, 60.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 360.0, 60.0),
                    Keyframe::from_euler(Vec3::new(0.0, 0.5, 0.0), -45.0, 180.0, 90.0),
                    Keyframe::from_euler(Vec3::new(0.0, 1.0, 0.0), -90.0, 360.0, 120.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 0.0, 60.0),
                ],
                vec![4.0, 4.0, 1.0, 1.0, 1.0],
            ),
            Preset::RotateCompact => (
                vec![
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 0.0, 60.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 180.0, 60.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 360.0, 60.0),
                    Keyframe::from_euler(Vec3::new(0.0, 1.0, 0.0), -90.0, 0.0, 120.0),
                ],
                vec![4.0, 4.0, 2.0],
            ),
            Preset::Swipe => (
                vec![
                    Keyframe::from_euler(Vec3::new(0.0, 1.0, 0.0), -90.0, 0.0, 120.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 180.0, 60.0),
                    Keyframe::from_euler(Vec3::new(0.0, -1.0, 0.0), 90.0, 360.0, 120.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 0.0, 80.0),
                ],
                vec![5.0, 2.0, 2.0],
            ),
            Preset::SwipeRotate => (
                vec![
                    Keyframe::from_euler(Vec3::new(0.0, -1.0, 0.0), 90.0, 0.0, 120.0),
                    Keyframe::from_euler(Vec3::new(0.0, -1.0, 0.0), 90.0, 0.0, 110.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 180.0, 60.0),
                    Keyframe::from_euler(Vec3::new(0.0, 1.0, 0.0), -90.0, 360.0, 120.0),
                    Keyframe::from_euler(Vec3::ZERO, 0.0, 0.0, 60.0),
                ],
                vec![1.5, 3.0, 2.0, 2.0],
            ),
        };
        // preset tables satisfy the track invariants (covered by tests)
        AnimationTrack {
            keyframes,
            stage_durations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Stop on the last keyframe.
    #[default]
    Once,
    /// Wrap back to the start once the track completes.
    Loop,
}

/// Wall-clock driven playback time for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackClock {
    elapsed: f32,
    total: f32,
    mode: PlaybackMode,
}

impl PlaybackClock {
    pub fn new(total: f32, mode: PlaybackMode) -> Self {
        Self {
            elapsed: 0.0,
            total: total.max(0.0),
            mode,
        }
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
    }

    pub fn advance(&mut self, dt: f32) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        self.elapsed += dt;
        match self.mode {
            PlaybackMode::Once => self.elapsed = self.elapsed.min(self.total),
            PlaybackMode::Loop if self.total > 0.0 => {
                self.elapsed = self.elapsed.rem_euclid(self.total);
            }
            PlaybackMode::Loop => self.elapsed = 0.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.mode == PlaybackMode::Once && self.elapsed >= self.total
    }
}

/// A preset being played back: immutable track plus its clock.
#[derive(Debug, Clone)]
pub struct Playback {
    preset: Preset,
    track: Arc<AnimationTrack>,
    clock: PlaybackClock,
}

impl Playback {
    pub fn new(preset: Preset, mode: PlaybackMode) -> Self {
        let track = preset.track();
        let clock = PlaybackClock::new(track.total_duration(), mode);
        Self {
            preset,
            track: Arc::new(track),
            clock,
        }
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    /// Shared handle to the track, safe to hand to an export worker.
    pub fn track(&self) -> Arc<AnimationTrack> {
        self.track.clone()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn advance(&mut self, dt: f32) {
        let was_finished = self.clock.is_finished();
        self.clock.advance(dt);
        if !was_finished && self.clock.is_finished() {
            log::info!("animation {} finished", self.preset.label());
        }
    }

    pub fn pose(&self) -> CameraPose {
        self.track.interpolate(self.clock.elapsed())
    }

    /// Fraction of the whole track already played, in `[0,1]`.
    pub fn fraction(&self) -> f32 {
        let total = self.track.total_duration();
        if total > 0.0 {
            (self.clock.elapsed() / total).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scenario_track() -> AnimationTrack {
        let keyframes = (0..6)
            .map(|i| {
                Keyframe::from_euler(
                    Vec3::new(i as f32, 0.0, 0.0),
                    0.0,
                    30.0 * i as f32,
                    60.0 + 10.0 * i as f32,
                )
            })
            .collect();
        AnimationTrack::new(keyframes, vec![4.0, 4.0, 1.0, 1.0, 1.0]).unwrap()
    }

    #[test]
    fn test_total_duration_and_stage_lookup() {
        let track = scenario_track();
        assert_relative_eq!(track.total_duration(), 11.0);
        let cursor = track.locate(4.5);
        assert_eq!(cursor.index, 1);
        assert_relative_eq!(cursor.progress, 0.125, epsilon = 1e-6);
    }

    #[test]
    fn test_stage_progress_bounds() {
        let track = scenario_track();
        assert_eq!(track.stage_progress(0.0), 0.0);
        assert_eq!(track.stage_progress(track.total_duration()), 1.0);
        assert_eq!(track.stage_progress(50.0), 1.0);
        assert_eq!(track.stage_progress(-3.0), 0.0);
        // boundary belongs to the earlier stage
        assert_eq!(track.locate(4.0), StageCursor { index: 0, progress: 1.0 });
    }

    #[test]
    fn test_stage_progress_monotonic_within_stage() {
        let track = scenario_track();
        let mut last = 0.0;
        for step in 0..=40 {
            let t = 4.0 + 4.0 * (step as f32 / 40.0);
            let cursor = track.locate(t);
            if cursor.index != 1 {
                continue;
            }
            assert!(cursor.progress >= last);
            last = cursor.progress;
        }
        assert_relative_eq!(last, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_interpolate_endpoints_reproduce_keyframes() {
        let track = scenario_track();
        let first = track.keyframes()[0];
        let last = *track.keyframes().last().unwrap();

        let start = track.sample(0.0);
        assert_eq!(start.position, first.position);
        assert_eq!(start.fov, first.fov);
        assert!(start.orientation.abs_diff_eq(first.orientation, 1e-6));

        let end = track.sample(track.total_duration());
        assert_eq!(end.position, last.position);
        assert_eq!(end.fov, last.fov);
        assert!(end.orientation.abs_diff_eq(last.orientation, 1e-6));

        assert_eq!(track.sample(-1.0), first);
        assert_eq!(track.sample(100.0), last);
        assert_eq!(track.interpolate(0.0), first.pose());
    }

    #[test]
    fn test_interpolate_mid_stage() {
        let track = scenario_track();
        // stage 1 runs 4..8 between keyframes 1 and 2
        let k = track.sample(6.0);
        assert!(k.position.abs_diff_eq(Vec3::new(1.5, 0.0, 0.0), 1e-5));
        assert_relative_eq!(k.fov, 75.0, epsilon = 1e-4);
        let expected = Quat::from_rotation_y(45f32.to_radians());
        assert!(k.orientation.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_slerp_boundaries_and_unit_length() {
        let q0 = Quat::from_rotation_x(0.3);
        let q1 = Quat::from_euler(EulerRot::YXZ, 2.0, -0.7, 0.0);
        assert!(q0.slerp(q1, 0.0).abs_diff_eq(q0, 1e-6));
        assert!(q0.slerp(q1, 1.0).abs_diff_eq(q1, 1e-6));
        for step in 0..=20 {
            let q = q0.slerp(q1, step as f32 / 20.0);
            assert_relative_eq!(q.length(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_zero_length_stage_completes_instantly() {
        let a = Keyframe::from_euler(Vec3::ZERO, 0.0, 0.0, 60.0);
        let b = Keyframe::from_euler(Vec3::Y, 0.0, 90.0, 90.0);
        let c = Keyframe::from_euler(Vec3::X, 0.0, 180.0, 30.0);
        let track = AnimationTrack::new(vec![a, b, c], vec![0.0, 2.0]).unwrap();
        assert_eq!(track.locate(0.0), StageCursor { index: 0, progress: 1.0 });
        assert_eq!(track.sample(0.0).position, b.position);
        assert_relative_eq!(track.sample(1.0).fov, 60.0, epsilon = 1e-5);
    }

    #[test]
    fn test_track_validation() {
        let k = Keyframe::from_euler(Vec3::ZERO, 0.0, 0.0, 60.0);
        assert!(AnimationTrack::new(vec![k], vec![]).is_err());
        assert!(AnimationTrack::new(vec![k, k], vec![1.0, 1.0]).is_err());
        assert!(AnimationTrack::new(vec![k, k], vec![-1.0]).is_err());
        assert!(AnimationTrack::new(vec![k, k], vec![f32::NAN]).is_err());
        let bad = Keyframe::new(Vec3::new(f32::INFINITY, 0.0, 0.0), Quat::IDENTITY, 60.0);
        assert!(AnimationTrack::new(vec![k, bad], vec![1.0]).is_err());
        assert!(AnimationTrack::new(vec![k, k], vec![0.0]).is_ok());
    }

    #[test]
    fn test_presets_are_valid_tracks() {
        let expected = [
            (Preset::Rotate, 6, 11.0),
            (Preset::RotateCompact, 4, 10.0),
            (Preset::Swipe, 4, 9.0),
            (Preset::SwipeRotate, 5, 8.5),
        ];
        for (preset, nodes, total) in expected {
            let track = preset.track();
            let rebuilt = AnimationTrack::new(
                track.keyframes().to_vec(),
                track.stage_durations().to_vec(),
            )
            .unwrap();
            assert_eq!(track.keyframes().len(), nodes, "{}", preset.label());
            assert_relative_eq!(track.total_duration(), total);
            assert_relative_eq!(rebuilt.total_duration(), total);
        }
    }

    #[test]
    fn test_rotate_preset_half_turn() {
        let track = Preset::Rotate.track();
        // after the first stage the camera faces the opposite direction
        let pose = track.interpolate(4.0);
        assert!(pose.forward().abs_diff_eq(Vec3::Z, 1e-5));
        assert!(pose.up.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_clock_once_clamps() {
        let mut clock = PlaybackClock::new(11.0, PlaybackMode::Once);
        clock.advance(5.0);
        assert_eq!(clock.elapsed(), 5.0);
        assert!(!clock.is_finished());
        clock.advance(10.0);
        assert_eq!(clock.elapsed(), 11.0);
        assert!(clock.is_finished());
        clock.advance(-1.0);
        assert_eq!(clock.elapsed(), 11.0);
        clock.reset();
        assert_eq!(clock.elapsed(), 0.0);
    }

    #[test]
    fn test_clock_loop_wraps() {
        let mut clock = PlaybackClock::new(4.0, PlaybackMode::Loop);
        clock.advance(3.0);
        clock.advance(2.5);
        assert_relative_eq!(clock.elapsed(), 1.5, epsilon = 1e-6);
        assert!(!clock.is_finished());
    }

    #[test]
    fn test_playback_pose_follows_clock() {
        let mut playback = Playback::new(Preset::Swipe, PlaybackMode::Once);
        assert_eq!(playback.fraction(), 0.0);
        playback.advance(5.0);
        let expected = playback.track().interpolate(5.0);
        assert_eq!(playback.pose(), expected);
        playback.advance(100.0);
        assert_eq!(playback.fraction(), 1.0);
        assert!(playback.clock().is_finished());
    }
}

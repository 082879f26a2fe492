// input.rs — 输入事件分发
//
// Window events are translated into plain `InputEvent` values in main.rs and
// delivered here synchronously, one at a time, on the render thread.

use crate::animation::Preset;
use crate::media::MediaKind;
use crate::panorama::ViewMode;
use crate::view::ViewController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    Perspective,
    LittlePlanet,
    CrystalBall,
    PlayRotate,
    PlayRotateCompact,
    PlaySwipe,
    PlaySwipeRotate,
    Export,
    PitchUp,
    PitchDown,
    YawLeft,
    YawRight,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    ButtonPressed { cursor: (f64, f64) },
    ButtonReleased { cursor: (f64, f64) },
    CursorMoved { cursor: (f64, f64) },
    /// Scroll in lines, positive away from the user.
    Scroll { dy: f32 },
    KeyPressed(KeyAction),
    KeyReleased(KeyAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Ignored,
    ExportRequested,
}

#[derive(Debug, Default, Clone, Copy)]
struct HeldKeys {
    pitch_up: bool,
    pitch_down: bool,
    yaw_left: bool,
    yaw_right: bool,
}

impl HeldKeys {
    fn set(&mut self, action: KeyAction, down: bool) -> bool {
        let slot = match action {
            KeyAction::PitchUp => &mut self.pitch_up,
            KeyAction::PitchDown => &mut self.pitch_down,
            KeyAction::YawLeft => &mut self.yaw_left,
            KeyAction::YawRight => &mut self.yaw_right,
            _ => return false,
        };
        *slot = down;
        true
    }

    fn steps(&self) -> (f32, f32) {
        let axis = |pos: bool, neg: bool| f32::from(u8::from(pos)) - f32::from(u8::from(neg));
        (
            axis(self.pitch_up, self.pitch_down),
            axis(self.yaw_right, self.yaw_left),
        )
    }
}

/// Routes input events to a `ViewController` and drives its per-frame update.
#[derive(Debug)]
pub struct InputDispatcher {
    controller: ViewController,
    media: MediaKind,
    held: HeldKeys,
}

impl InputDispatcher {
    pub fn new(controller: ViewController, media: MediaKind) -> Self {
        Self {
            controller,
            media,
            held: HeldKeys::default(),
        }
    }

    pub fn controller(&self) -> &ViewController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ViewController {
        &mut self.controller
    }

    pub fn dispatch(&mut self, event: InputEvent) -> DispatchOutcome {
        match event {
            InputEvent::ButtonPressed { cursor } => self.controller.on_button(true, cursor),
            InputEvent::ButtonReleased { cursor } => self.controller.on_button(false, cursor),
            InputEvent::CursorMoved { cursor } => self.controller.on_cursor_moved(cursor),
            InputEvent::Scroll { dy } => self.controller.on_scroll(dy),
            InputEvent::KeyPressed(action) => return self.key_pressed(action),
            InputEvent::KeyReleased(action) => {
                if !self.held.set(action, false) {
                    return DispatchOutcome::Ignored;
                }
            }
        }
        DispatchOutcome::Handled
    }

    fn key_pressed(&mut self, action: KeyAction) -> DispatchOutcome {
        if self.held.set(action, true) {
            return DispatchOutcome::Handled;
        }
        match action {
            KeyAction::Perspective => self.controller.set_mode(ViewMode::Perspective),
            KeyAction::LittlePlanet => self.controller.set_mode(ViewMode::LittlePlanet),
            KeyAction::CrystalBall => self.controller.set_mode(ViewMode::CrystalBall),
            KeyAction::PlayRotate
            | KeyAction::PlayRotateCompact
            | KeyAction::PlaySwipe
            | KeyAction::PlaySwipeRotate => {
                if !self.media.supports_animation() {
                    log::debug!("animations are disabled for video input");
                    return DispatchOutcome::Ignored;
                }
                let preset = match action {
                    KeyAction::PlayRotate => Preset::Rotate,
                    KeyAction::PlayRotateCompact => Preset::RotateCompact,
                    KeyAction::PlaySwipe => Preset::Swipe,
                    _ => Preset::SwipeRotate,
                };
                self.controller.play(preset);
            }
            KeyAction::Export => return DispatchOutcome::ExportRequested,
            KeyAction::PitchUp | KeyAction::PitchDown | KeyAction::YawLeft | KeyAction::YawRight => {}
        }
        DispatchOutcome::Handled
    }

    /// One frame of updates: held-key nudges, animation clock, then angle
    /// normalization.
    pub fn frame(&mut self, dt: f32) {
        let (pitch_steps, yaw_steps) = self.held.steps();
        if pitch_steps != 0.0 || yaw_steps != 0.0 {
            self.controller.nudge(pitch_steps, yaw_steps);
        }
        self.controller.advance(dt);
        self.controller.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlSettings;

    fn dispatcher(media: MediaKind) -> InputDispatcher {
        InputDispatcher::new(
            ViewController::new(ViewMode::Perspective, ControlSettings::default()),
            media,
        )
    }

    #[test]
    fn test_drag_sequence_moves_camera() {
        let mut d = dispatcher(MediaKind::Image);
        d.dispatch(InputEvent::ButtonPressed { cursor: (10.0, 10.0) });
        d.dispatch(InputEvent::CursorMoved { cursor: (60.0, 10.0) });
        d.dispatch(InputEvent::ButtonReleased { cursor: (60.0, 10.0) });
        d.dispatch(InputEvent::CursorMoved { cursor: (500.0, 10.0) });
        d.frame(0.016);
        assert!((d.controller().state().yaw - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_mode_keys_switch_mode() {
        let mut d = dispatcher(MediaKind::Video);
        assert_eq!(
            d.dispatch(InputEvent::KeyPressed(KeyAction::CrystalBall)),
            DispatchOutcome::Handled
        );
        assert_eq!(d.controller().mode(), ViewMode::CrystalBall);
        assert_eq!(d.controller().state().fov, 85.0);
    }

    #[test]
    fn test_presets_only_for_images() {
        let mut d = dispatcher(MediaKind::Video);
        assert_eq!(
            d.dispatch(InputEvent::KeyPressed(KeyAction::PlaySwipe)),
            DispatchOutcome::Ignored
        );
        assert!(!d.controller().is_animating());

        let mut d = dispatcher(MediaKind::Image);
        d.dispatch(InputEvent::KeyPressed(KeyAction::PlaySwipeRotate));
        let playback = d.controller().playback().unwrap();
        assert_eq!(playback.preset(), Preset::SwipeRotate);
    }

    #[test]
    fn test_compact_rotate_key_plays_four_node_track() {
        let mut d = dispatcher(MediaKind::Image);
        assert_eq!(
            d.dispatch(InputEvent::KeyPressed(KeyAction::PlayRotateCompact)),
            DispatchOutcome::Handled
        );
        let playback = d.controller().playback().unwrap();
        assert_eq!(playback.preset(), Preset::RotateCompact);
        assert_eq!(playback.track().keyframes().len(), 4);
    }

    #[test]
    fn test_export_key_is_reported() {
        let mut d = dispatcher(MediaKind::Image);
        assert_eq!(
            d.dispatch(InputEvent::KeyPressed(KeyAction::Export)),
            DispatchOutcome::ExportRequested
        );
    }

    #[test]
    fn test_held_keys_nudge_each_frame() {
        let mut d = dispatcher(MediaKind::Image);
        d.dispatch(InputEvent::KeyPressed(KeyAction::PitchUp));
        d.dispatch(InputEvent::KeyPressed(KeyAction::YawLeft));
        d.frame(0.016);
        d.frame(0.016);
        let step = ControlSettings::default().key_step;
        assert!((d.controller().state().pitch - 2.0 * step).abs() < 1e-5);
        assert!((d.controller().state().yaw - (360.0 - 2.0 * step)).abs() < 1e-3);

        d.dispatch(InputEvent::KeyReleased(KeyAction::PitchUp));
        d.dispatch(InputEvent::KeyReleased(KeyAction::YawLeft));
        d.frame(0.016);
        assert!((d.controller().state().pitch - 2.0 * step).abs() < 1e-5);
    }

    #[test]
    fn test_release_of_action_key_is_ignored() {
        let mut d = dispatcher(MediaKind::Image);
        assert_eq!(
            d.dispatch(InputEvent::KeyReleased(KeyAction::Export)),
            DispatchOutcome::Ignored
        );
    }

    #[test]
    fn test_frame_advances_animation() {
        let mut d = dispatcher(MediaKind::Image);
        d.dispatch(InputEvent::KeyPressed(KeyAction::PlayRotate));
        d.frame(1.25);
        let elapsed = d.controller().playback().unwrap().clock().elapsed();
        assert!((elapsed - 1.25).abs() < 1e-6);
    }
}

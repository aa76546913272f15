use penumbra_render::RenderToggles;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Axis values within this distance of zero are ignored.
pub const JOYSTICK_DEAD_ZONE: f32 = 0.2;

/// A high-level action produced by any input device.
///
/// The pipeline never sees raw input events; it only sees the toggles these
/// actions change between frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    TogglePerspective,
    ToggleShadowDebug,
    ToggleWireframe,
    /// Grow or shrink the orthographic box. A negative input value grows the
    /// box by `rate` per second, a positive one shrinks it.
    ZoomBox { rate: f32 },
    /// Bound to nothing yet.
    Noop,
}

impl Action {
    /// Whether the action fires once per press rather than every frame the
    /// input is held.
    pub fn is_toggle(&self) -> bool {
        matches!(
            self,
            Action::TogglePerspective | Action::ToggleShadowDebug | Action::ToggleWireframe
        )
    }

    /// Apply the action. `value` is the input's reading (1.0 for a pressed
    /// key, the axis position for a joystick) and `dt` the seconds since the
    /// last frame. Returns whether anything changed.
    pub fn perform(&self, toggles: &mut RenderToggles, value: f32, dt: f32) -> bool {
        match *self {
            Action::TogglePerspective => {
                toggles.toggle_perspective();
                debug!(perspective = toggles.perspective(), "perspective toggled");
                true
            }
            Action::ToggleShadowDebug => {
                toggles.toggle_shadow_debug();
                debug!(shadow_debug = toggles.shadow_debug(), "shadow debug toggled");
                true
            }
            Action::ToggleWireframe => {
                toggles.toggle_wireframe();
                debug!(wireframe = toggles.wireframe(), "wireframe toggled");
                true
            }
            Action::ZoomBox { rate } => {
                let step = rate * dt;
                let before = toggles.box_size();
                if value < -JOYSTICK_DEAD_ZONE {
                    toggles.set_box_size(before + step);
                } else if value > JOYSTICK_DEAD_ZONE {
                    toggles.set_box_size(before - step);
                }
                toggles.box_size() != before
            }
            Action::Noop => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_flip() {
        let mut toggles = RenderToggles::default();
        assert!(Action::ToggleWireframe.perform(&mut toggles, 1.0, 0.016));
        assert!(toggles.wireframe());
        Action::TogglePerspective.perform(&mut toggles, 1.0, 0.016);
        assert!(!toggles.perspective());
        Action::ToggleShadowDebug.perform(&mut toggles, 1.0, 0.016);
        assert!(toggles.shadow_debug());
        assert!(!Action::Noop.perform(&mut toggles, 1.0, 0.016));
    }

    #[test]
    fn zoom_respects_dead_zone() {
        let mut toggles = RenderToggles::default();
        toggles.set_box_size(5.0);
        let zoom = Action::ZoomBox { rate: 2.0 };
        assert!(!zoom.perform(&mut toggles, 0.1, 1.0));
        assert!(!zoom.perform(&mut toggles, -0.2, 1.0));
        assert_eq!(toggles.box_size(), 5.0);

        assert!(zoom.perform(&mut toggles, 0.9, 0.5));
        assert_eq!(toggles.box_size(), 4.0);
        assert!(zoom.perform(&mut toggles, -0.9, 1.0));
        assert_eq!(toggles.box_size(), 6.0);
        assert_eq!(toggles.clip_size(), 60.0);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut toggles = RenderToggles::default();
        let zoom = Action::ZoomBox { rate: 100.0 };
        zoom.perform(&mut toggles, 1.0, 1.0);
        assert_eq!(toggles.box_size(), toggles.min_box_size());
        assert!(!zoom.perform(&mut toggles, 1.0, 1.0));
        zoom.perform(&mut toggles, -1.0, 1.0);
        assert_eq!(toggles.box_size(), toggles.max_box_size());
    }

    #[test]
    fn only_switches_are_toggles() {
        assert!(Action::ToggleWireframe.is_toggle());
        assert!(!Action::ZoomBox { rate: 1.0 }.is_toggle());
        assert!(!Action::Noop.is_toggle());
    }
}

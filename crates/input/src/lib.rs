//! Input actions for the penumbra pipeline.
//!
//! Keys and axes resolve to [`Action`]s through [`InputBindings`]; actions
//! mutate a [`penumbra_render::RenderToggles`] that the pipeline snapshots at
//! the start of the next frame.
//!
//! # Invariants
//! - Actions never touch GPU state.
//! - Axis input inside the dead zone changes nothing.

pub mod action;
pub mod bindings;

pub use action::{Action, JOYSTICK_DEAD_ZONE};
pub use bindings::{DEFAULT_ZOOM_RATE, InputBindings};

pub fn crate_info() -> &'static str {
    "penumbra-input v0.1.0"
}

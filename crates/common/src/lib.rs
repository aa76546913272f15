//! Shared value types used by the render core, its backends, and the apps.
//!
//! # Invariants
//! - Every value produced by a checked constructor lies in its documented range.

mod types;

pub use types::{check_unit, Color, Transform, UnitRangeError};

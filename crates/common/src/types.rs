use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// A value that was required to lie in `[0, 1]` but did not.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("{what} must be within [0, 1], got {value}")]
pub struct UnitRangeError {
    pub what: &'static str,
    pub value: f32,
}

/// Validate that `value` lies in the closed unit interval. NaN is rejected.
pub fn check_unit(what: &'static str, value: f32) -> Result<f32, UnitRangeError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(UnitRangeError { what, value })
    }
}

/// Linear RGBA color with each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);

    /// Opaque color. Channels are not validated; use [`Color::try_new`] for
    /// user-supplied values.
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Checked constructor: every channel must be in `[0, 1]`.
    pub fn try_new(r: f32, g: f32, b: f32, a: f32) -> Result<Self, UnitRangeError> {
        Ok(Self {
            r: check_unit("red", r)?,
            g: check_unit("green", g)?,
            b: check_unit("blue", b)?,
            a: check_unit("alpha", a)?,
        })
    }

    /// Convert 8-bit channels into the unit range.
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// World matrix: scale, then rotate, then translate.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_check_rejects_out_of_range_and_nan() {
        assert_eq!(check_unit("x", 0.5), Ok(0.5));
        assert!(check_unit("x", -0.01).is_err());
        assert!(check_unit("x", 1.01).is_err());
        assert!(check_unit("x", f32::NAN).is_err());
    }

    #[test]
    fn color_checked_constructor() {
        assert!(Color::try_new(0.0, 0.5, 1.0, 1.0).is_ok());
        let err = Color::try_new(0.0, 2.0, 0.0, 1.0).unwrap_err();
        assert_eq!(err.what, "green");
    }

    #[test]
    fn color_from_rgba8() {
        let c = Color::from_rgba8(255, 0, 255, 255);
        assert_eq!(c.to_array(), [1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn transform_default_is_identity() {
        let t = Transform::default();
        assert_eq!(t.position, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.to_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn transform_matrix_translates() {
        let t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        let p = t.to_matrix().transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(1.0, 2.0, 3.0));
    }
}

use glam::{Mat4, Vec3};
use penumbra_common::Color;
use serde::{Deserialize, Serialize};

use crate::device::TextureHandle;
use crate::geometry::SkinMatrices;
use crate::renderable::Material;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightKind {
    /// Parallel rays; position, range and attenuation are ignored.
    Directional,
    #[default]
    Point,
    Spot,
}

/// A scene light as the shaders see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub ambient: Color,
    pub diffuse: Color,
    pub specular: Color,
    pub range: f32,
    pub constant_attenuation: f32,
    pub linear_attenuation: f32,
    pub quadratic_attenuation: f32,
    /// Half-angle of a spot cone, degrees. 180 for point lights.
    pub cone_cutoff_degrees: f32,
    pub falloff_exponent: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            ambient: Color::BLACK,
            diffuse: Color::WHITE,
            specular: Color::WHITE,
            range: 1000.0,
            constant_attenuation: 1.0,
            linear_attenuation: 0.0,
            quadratic_attenuation: 0.0,
            cone_cutoff_degrees: 180.0,
            falloff_exponent: 0.0,
        }
    }
}

impl Light {
    pub fn point(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn directional(direction: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            direction: direction.normalize_or_zero(),
            ..Self::default()
        }
    }

    pub fn spot(position: Vec3, direction: Vec3, cone_cutoff_degrees: f32) -> Self {
        Self {
            kind: LightKind::Spot,
            position,
            direction: direction.normalize_or_zero(),
            cone_cutoff_degrees,
            ..Self::default()
        }
    }
}

/// Uniform light reaching every surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmbientLight {
    pub intensity: Color,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            intensity: Color::rgb(0.3, 0.3, 0.3),
        }
    }
}

/// Which pass a [`ShadingContext`] was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PassKind {
    Shadow,
    Main,
    Debug,
}

/// The shadow depth texture and the unit it is sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShadowBinding {
    pub unit: u32,
    pub texture: TextureHandle,
}

/// Per-draw shader inputs.
///
/// Built on the stack for exactly one draw and dropped right after it, so it
/// borrows lights, material and skin from their owners.
#[derive(Debug, Clone, Copy)]
pub struct ShadingContext<'a> {
    pub pass: PassKind,
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    /// Light projection times light view.
    pub light_space: Mat4,
    pub lights: &'a [Light],
    pub ambient: AmbientLight,
    pub material: Option<&'a Material>,
    pub skin: Option<&'a SkinMatrices>,
    pub shadow_map: Option<ShadowBinding>,
    /// Grid resolution for instanced-patch programs.
    pub patch_resolution: u32,
}

impl<'a> ShadingContext<'a> {
    /// Empty context for `pass`: identity matrices, no lights, no material.
    pub fn new(pass: PassKind) -> Self {
        Self {
            pass,
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            light_space: Mat4::IDENTITY,
            lights: &[],
            ambient: AmbientLight::default(),
            material: None,
            skin: None,
            shadow_map: None,
            patch_resolution: 0,
        }
    }

    pub fn model_view(&self) -> Mat4 {
        self.view * self.model
    }

    /// Inverse-transpose of the model-view matrix.
    pub fn normal_matrix(&self) -> Mat4 {
        self.model_view().inverse().transpose()
    }
}

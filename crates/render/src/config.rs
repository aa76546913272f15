//! Pipeline configuration and the runtime toggles derived from it.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Shadow-map settings. The map is allocated once and never resized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub enabled: bool,
    /// Edge length of the square depth texture, in texels.
    pub resolution: u32,
    /// Light position relative to the camera.
    pub light_offset: [f32; 3],
    /// Half-extent of the light's orthographic volume.
    pub box_size: f32,
    /// Half-depth of the light's orthographic volume.
    pub clip_size: f32,
    /// Unit the main pass samples the shadow map from.
    pub texture_unit: u32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: 8192,
            light_offset: [4.0, 2.84, 1.0],
            box_size: 40.0,
            clip_size: 40.0,
            texture_unit: 5,
        }
    }
}

impl ShadowConfig {
    pub fn light_offset(&self) -> Vec3 {
        Vec3::from_array(self.light_offset)
    }

    /// The light looks at the camera with +Y up, so the offset must not be
    /// zero or vertical.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.resolution == 0 {
            return invalid("shadow resolution must be non-zero".into());
        }
        let offset = self.light_offset();
        if !offset.is_finite() || offset.cross(Vec3::Y).length_squared() <= f32::EPSILON {
            return invalid(format!(
                "shadow light offset {:?} must be finite and not vertical",
                self.light_offset
            ));
        }
        if !(self.box_size > 0.0 && self.clip_size > 0.0) {
            return invalid("shadow box and clip sizes must be positive".into());
        }
        Ok(())
    }
}

/// Bounds for the orthographic camera projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrthoConfig {
    pub min_box_size: f32,
    pub max_box_size: f32,
    pub initial_box_size: f32,
}

impl Default for OrthoConfig {
    fn default() -> Self {
        Self {
            min_box_size: RenderToggles::MIN_BOX_SIZE,
            max_box_size: RenderToggles::MAX_BOX_SIZE,
            initial_box_size: RenderToggles::MAX_BOX_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub shadows: ShadowConfig,
    pub ortho: OrthoConfig,
    /// The shadow-map debug quad is `viewport width / divisor` pixels square.
    pub debug_quad_divisor: i32,
    /// How long callers wait for the render context before giving up.
    pub context_timeout_ms: u64,
    /// Clear color of the shadow and main passes.
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            shadows: ShadowConfig::default(),
            ortho: OrthoConfig::default(),
            debug_quad_divisor: 4,
            context_timeout_ms: 20_000,
            clear_color: [0.2, 0.3, 0.3, 1.0],
        }
    }
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), "loaded render config");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let ortho = &self.ortho;
        if !(ortho.min_box_size > 0.0 && ortho.min_box_size <= ortho.max_box_size) {
            return invalid(format!(
                "ortho box size range [{}, {}] must be positive and ordered",
                ortho.min_box_size, ortho.max_box_size
            ));
        }
        if !(ortho.min_box_size..=ortho.max_box_size).contains(&ortho.initial_box_size) {
            return invalid(format!(
                "initial box size {} outside [{}, {}]",
                ortho.initial_box_size, ortho.min_box_size, ortho.max_box_size
            ));
        }
        self.shadows.validate()?;
        if self.debug_quad_divisor <= 0 {
            return invalid(format!(
                "debug quad divisor must be positive, got {}",
                self.debug_quad_divisor
            ));
        }
        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return invalid(format!(
                "clear color channels must be in [0, 1]: {:?}",
                self.clear_color
            ));
        }
        Ok(())
    }
}

/// Switches flipped by input handling between frames.
///
/// The pipeline snapshots these at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderToggles {
    wireframe: bool,
    perspective: bool,
    shadow_debug: bool,
    box_size: f32,
    min_box_size: f32,
    max_box_size: f32,
}

impl Default for RenderToggles {
    fn default() -> Self {
        Self::from_config(&OrthoConfig::default())
    }
}

impl RenderToggles {
    pub const MIN_BOX_SIZE: f32 = 1.0;
    pub const MAX_BOX_SIZE: f32 = 10.0;

    /// Bounds out of order are swapped and NaN bounds fall back to the
    /// defaults, so an unvalidated config still yields a usable range.
    pub fn from_config(ortho: &OrthoConfig) -> Self {
        let min = if ortho.min_box_size.is_nan() { Self::MIN_BOX_SIZE } else { ortho.min_box_size };
        let max = if ortho.max_box_size.is_nan() { Self::MAX_BOX_SIZE } else { ortho.max_box_size };
        let (min_box_size, max_box_size) = if min <= max { (min, max) } else { (max, min) };
        let mut toggles = Self {
            wireframe: false,
            perspective: true,
            shadow_debug: false,
            box_size: max_box_size,
            min_box_size,
            max_box_size,
        };
        toggles.set_box_size(ortho.initial_box_size);
        toggles
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn set_wireframe(&mut self, on: bool) {
        self.wireframe = on;
    }

    pub fn toggle_wireframe(&mut self) {
        self.wireframe = !self.wireframe;
    }

    pub fn perspective(&self) -> bool {
        self.perspective
    }

    pub fn set_perspective(&mut self, on: bool) {
        self.perspective = on;
    }

    pub fn toggle_perspective(&mut self) {
        self.perspective = !self.perspective;
    }

    pub fn shadow_debug(&self) -> bool {
        self.shadow_debug
    }

    pub fn set_shadow_debug(&mut self, on: bool) {
        self.shadow_debug = on;
    }

    pub fn toggle_shadow_debug(&mut self) {
        self.shadow_debug = !self.shadow_debug;
    }

    pub fn box_size(&self) -> f32 {
        self.box_size
    }

    /// Always ten times the box size.
    pub fn clip_size(&self) -> f32 {
        10.0 * self.box_size
    }

    /// Clamped to the configured range. NaN leaves the size unchanged.
    pub fn set_box_size(&mut self, size: f32) {
        if size.is_nan() {
            return;
        }
        self.box_size = size.clamp(self.min_box_size, self.max_box_size);
    }

    pub fn min_box_size(&self) -> f32 {
        self.min_box_size
    }

    pub fn max_box_size(&self) -> f32 {
        self.max_box_size
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = RenderConfig::default();
        assert!(config.shadows.enabled);
        assert_eq!(config.shadows.resolution, 8192);
        assert_eq!(config.shadows.texture_unit, 5);
        assert_eq!(config.debug_quad_divisor, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = RenderConfig::from_yaml_str("shadows:\n  resolution: 2048\n").unwrap();
        assert_eq!(config.shadows.resolution, 2048);
        assert_eq!(config.shadows.box_size, 40.0);
        assert_eq!(config.ortho.max_box_size, 10.0);
    }

    #[test]
    fn yaml_round_trips() {
        let config = RenderConfig::default();
        let text = config.to_yaml_string().unwrap();
        assert_eq!(RenderConfig::from_yaml_str(&text).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for yaml in [
            "ortho:\n  min_box_size: 5\n  max_box_size: 2\n",
            "ortho:\n  initial_box_size: 50\n",
            "shadows:\n  resolution: 0\n",
            "debug_quad_divisor: 0\n",
            "clear_color: [0.0, 0.0, 2.0, 1.0]\n",
        ] {
            assert!(
                matches!(
                    RenderConfig::from_yaml_str(yaml),
                    Err(ConfigError::Invalid(_))
                ),
                "{yaml}"
            );
        }
        assert!(matches!(
            RenderConfig::from_yaml_str("shadows: [1, 2]"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn light_offset_must_leave_the_vertical() {
        for yaml in [
            "shadows:\n  light_offset: [0.0, 5.0, 0.0]\n",
            "shadows:\n  light_offset: [0.0, 0.0, 0.0]\n",
            "shadows:\n  light_offset: [0.0, -3.0, 0.0]\n",
            "shadows:\n  light_offset: [.nan, 1.0, 1.0]\n",
        ] {
            assert!(
                matches!(
                    RenderConfig::from_yaml_str(yaml),
                    Err(ConfigError::Invalid(_))
                ),
                "{yaml}"
            );
        }
        let tilted = RenderConfig::from_yaml_str("shadows:\n  light_offset: [0.0, 5.0, 0.5]\n");
        assert!(tilted.is_ok());
    }

    #[test]
    fn toggles_tolerate_unordered_bounds() {
        let toggles = RenderToggles::from_config(&OrthoConfig {
            min_box_size: 5.0,
            max_box_size: 2.0,
            initial_box_size: 9.0,
        });
        assert_eq!(toggles.min_box_size(), 2.0);
        assert_eq!(toggles.max_box_size(), 5.0);
        assert_eq!(toggles.box_size(), 5.0);

        let toggles = RenderToggles::from_config(&OrthoConfig {
            min_box_size: f32::NAN,
            max_box_size: f32::NAN,
            initial_box_size: f32::NAN,
        });
        assert_eq!(toggles.min_box_size(), RenderToggles::MIN_BOX_SIZE);
        assert_eq!(toggles.box_size(), RenderToggles::MAX_BOX_SIZE);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shadows:\n  enabled: false\ncontext_timeout_ms: 500").unwrap();
        let config = RenderConfig::load(file.path()).unwrap();
        assert!(!config.shadows.enabled);
        assert_eq!(config.context_timeout_ms, 500);

        let missing = RenderConfig::load(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn box_size_is_clamped() {
        let mut toggles = RenderToggles::default();
        assert_eq!(toggles.box_size(), 10.0);

        toggles.set_box_size(-5.0);
        assert_eq!(toggles.box_size(), RenderToggles::MIN_BOX_SIZE);
        assert_eq!(toggles.clip_size(), 10.0 * toggles.box_size());

        toggles.set_box_size(1000.0);
        assert_eq!(toggles.box_size(), RenderToggles::MAX_BOX_SIZE);
        assert_eq!(toggles.clip_size(), 10.0 * toggles.box_size());

        toggles.set_box_size(4.5);
        assert_eq!(toggles.clip_size(), 45.0);
        toggles.set_box_size(f32::NAN);
        assert_eq!(toggles.box_size(), 4.5);
    }

    #[test]
    fn toggles_flip() {
        let mut toggles = RenderToggles::default();
        assert!(toggles.perspective());
        toggles.toggle_perspective();
        toggles.toggle_wireframe();
        toggles.toggle_shadow_debug();
        assert!(!toggles.perspective());
        assert!(toggles.wireframe());
        assert!(toggles.shadow_debug());
    }
}

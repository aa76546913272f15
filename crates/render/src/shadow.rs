use glam::{Mat4, Vec3};

use crate::config::ShadowConfig;
use crate::device::{DepthTarget, GpuDevice};
use crate::error::RenderError;

/// Light view, light projection and their product for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSpace {
    pub view: Mat4,
    pub projection: Mat4,
    /// `projection * view`.
    pub matrix: Mat4,
}

/// The depth-only target rendered from the light each frame.
#[derive(Debug, Clone)]
pub struct ShadowMap {
    target: DepthTarget,
    light_offset: Vec3,
    box_size: f32,
    clip_size: f32,
    texture_unit: u32,
}

impl ShadowMap {
    pub fn create(device: &mut dyn GpuDevice, config: &ShadowConfig) -> Result<Self, RenderError> {
        config.validate()?;
        let caps = device.capabilities();
        if config.texture_unit >= caps.texture_unit_count {
            return Err(RenderError::InvalidTextureUnit {
                unit: config.texture_unit,
                available: caps.texture_unit_count,
            });
        }
        let resolution = config.resolution.min(caps.max_texture_size);
        let target = device.create_depth_target(resolution)?;
        Ok(Self {
            target,
            light_offset: config.light_offset(),
            box_size: config.box_size,
            clip_size: config.clip_size,
            texture_unit: config.texture_unit,
        })
    }

    pub fn target(&self) -> &DepthTarget {
        &self.target
    }

    pub fn resolution(&self) -> u32 {
        self.target.resolution
    }

    pub fn texture_unit(&self) -> u32 {
        self.texture_unit
    }

    /// Light transforms for a camera at `camera_position`: the light sits at
    /// the camera plus the fixed offset and looks back at the camera.
    pub fn light_space(&self, camera_position: Vec3) -> LightSpace {
        let eye = camera_position + self.light_offset;
        let view = Mat4::look_at_rh(eye, camera_position, Vec3::Y);
        let (b, c) = (self.box_size, self.clip_size);
        let projection = Mat4::orthographic_rh(-b, b, -b, b, -c, c);
        LightSpace {
            view,
            projection,
            matrix: projection * view,
        }
    }

    pub fn destroy(&self, device: &mut dyn GpuDevice) {
        device.destroy_depth_target(&self.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceCaps;
    use crate::recording::RecordingDevice;

    #[test]
    fn resolution_capped_by_device() {
        let mut device = RecordingDevice::with_caps(DeviceCaps {
            texture_unit_count: 8,
            max_texture_size: 4096,
        });
        let map = ShadowMap::create(&mut device, &ShadowConfig::default()).unwrap();
        assert_eq!(map.resolution(), 4096);
        assert_eq!(map.texture_unit(), 5);
    }

    #[test]
    fn texture_unit_must_exist() {
        let mut device = RecordingDevice::with_caps(DeviceCaps {
            texture_unit_count: 4,
            max_texture_size: 4096,
        });
        let err = ShadowMap::create(&mut device, &ShadowConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidTextureUnit {
                unit: 5,
                available: 4
            }
        ));
    }

    #[test]
    fn vertical_light_offset_is_rejected() {
        let mut device = RecordingDevice::new();
        let config = ShadowConfig {
            light_offset: [0.0, 5.0, 0.0],
            ..ShadowConfig::default()
        };
        let err = ShadowMap::create(&mut device, &config).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
        assert!(device.commands().is_empty());

        let map = ShadowMap::create(&mut device, &ShadowConfig::default()).unwrap();
        assert!(map.light_space(Vec3::ZERO).matrix.is_finite());
    }

    #[test]
    fn camera_lands_in_light_volume() {
        let mut device = RecordingDevice::new();
        let map = ShadowMap::create(&mut device, &ShadowConfig::default()).unwrap();
        let camera = Vec3::new(10.0, 2.0, -3.0);
        let space = map.light_space(camera);
        assert_eq!(space.matrix, space.projection * space.view);

        let clip = space.matrix.project_point3(camera);
        assert!(clip.x.abs() < 1e-4 && clip.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&clip.z));
    }
}

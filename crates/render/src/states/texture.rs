use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::device::{GpuDevice, SamplerDesc, TextureBinding, TextureDesc, TextureHandle};
use crate::error::RenderError;

use super::ReleaseQueue;

/// Number of faces a cube-map target consumes, one per unit slot.
pub const CUBE_FACES: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureTarget {
    #[default]
    TwoDimensional,
    /// Six faces in slot order +Y, -Y, -X, +X, +Z, -Z, stored in one object
    /// bound at unit 0.
    CubeMap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MinFilter {
    NearestNoMipmaps,
    BilinearNoMipmaps,
    NearestNearestMipmap,
    BilinearNearestMipmap,
    NearestLinearMipmap,
    #[default]
    Trilinear,
}

impl MinFilter {
    /// Whether sampling reads mip levels, so the upload must generate them.
    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, Self::NearestNoMipmaps | Self::BilinearNoMipmaps)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MagFilter {
    Nearest,
    #[default]
    Bilinear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    #[default]
    ClampToEdge,
    MirroredClampToEdge,
    ClampToBorder,
}

/// CPU-side RGBA8 image. Owned by the asset layer and shared with states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Texture {
    pub fn rgba8(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            pixels,
        }
    }

    /// Bytes in one `width` x `height` RGBA8 image.
    pub fn byte_len(width: u32, height: u32) -> Result<usize, RenderError> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|texels| texels.checked_mul(4))
            .ok_or_else(|| RenderError::Device(format!("{width}x{height} texture is too large")))
    }

    /// Single-colour texture, handy as a placeholder.
    pub fn solid(
        name: impl Into<String>,
        width: u32,
        height: u32,
        rgba: [u8; 4],
    ) -> Result<Self, RenderError> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(Self::byte_len(width, height)?)
            .collect();
        Ok(Self::rgba8(name, width, height, pixels))
    }
}

/// Textures bound to numbered units, with sampling parameters.
///
/// GPU objects are created lazily: assigning a texture, changing the target
/// or changing a filter marks the state dirty, and the next apply re-uploads
/// everything. Otherwise apply only rebinds.
#[derive(Debug)]
pub struct TextureState {
    target: TextureTarget,
    min_filter: MinFilter,
    mag_filter: MagFilter,
    wrap: WrapMode,
    textures: Vec<Option<Arc<Texture>>>,
    objects: Vec<Option<TextureHandle>>,
    dirty: bool,
    unit_count: u32,
    release: ReleaseQueue,
}

impl TextureState {
    /// `unit_count` comes from the device capabilities. Disposed GPU objects
    /// are handed to `release` for deletion on the render thread.
    pub fn new(unit_count: u32, release: ReleaseQueue) -> Self {
        Self {
            target: TextureTarget::default(),
            min_filter: MinFilter::default(),
            mag_filter: MagFilter::default(),
            wrap: WrapMode::default(),
            textures: Vec::new(),
            objects: Vec::new(),
            dirty: true,
            unit_count,
            release,
        }
    }

    fn check_unit(&self, unit: u32) -> Result<(), RenderError> {
        if unit >= self.unit_count {
            return Err(RenderError::InvalidTextureUnit {
                unit,
                available: self.unit_count,
            });
        }
        Ok(())
    }

    pub fn set_texture(&mut self, texture: Arc<Texture>) -> Result<(), RenderError> {
        self.set_texture_at(texture, 0)
    }

    pub fn set_texture_at(&mut self, texture: Arc<Texture>, unit: u32) -> Result<(), RenderError> {
        self.check_unit(unit)?;
        let slot = unit as usize;
        if self.textures.len() <= slot {
            self.textures.resize(slot + 1, None);
        }
        self.textures[slot] = Some(texture);
        self.dirty = true;
        Ok(())
    }

    pub fn texture(&self) -> Result<&Arc<Texture>, RenderError> {
        self.texture_at(0)
    }

    pub fn texture_at(&self, unit: u32) -> Result<&Arc<Texture>, RenderError> {
        self.check_unit(unit)?;
        self.textures
            .get(unit as usize)
            .and_then(Option::as_ref)
            .ok_or(RenderError::EmptyTextureUnit(unit))
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn set_target(&mut self, target: TextureTarget) {
        self.target = target;
        self.dirty = true;
    }

    pub fn min_filter(&self) -> MinFilter {
        self.min_filter
    }

    pub fn set_min_filter(&mut self, filter: MinFilter) {
        self.min_filter = filter;
        self.dirty = true;
    }

    pub fn mag_filter(&self) -> MagFilter {
        self.mag_filter
    }

    pub fn set_mag_filter(&mut self, filter: MagFilter) {
        self.mag_filter = filter;
        self.dirty = true;
    }

    pub fn wrap_mode(&self) -> WrapMode {
        self.wrap
    }

    /// Wrapping is a sampler parameter and takes effect on the next bind
    /// without a re-upload.
    pub fn set_wrap_mode(&mut self, wrap: WrapMode) {
        self.wrap = wrap;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// GPU objects currently owned, one per occupied unit.
    pub fn gpu_objects(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.objects.iter().flatten().copied()
    }

    pub fn sampler(&self) -> SamplerDesc {
        SamplerDesc {
            min_filter: self.min_filter,
            mag_filter: self.mag_filter,
            wrap: self.wrap,
        }
    }

    pub(crate) fn apply(&mut self, device: &mut dyn GpuDevice) {
        if self.dirty {
            self.destroy_objects(device);
            match self.target {
                TextureTarget::TwoDimensional => self.commit_2d(device),
                TextureTarget::CubeMap => self.commit_cube(device),
            }
            self.dirty = false;
        }
        let sampler = self.sampler();
        for (unit, object) in self.objects.iter().enumerate() {
            if let Some(texture) = object {
                device.bind_texture(
                    unit as u32,
                    Some(TextureBinding {
                        target: self.target,
                        texture: *texture,
                        sampler,
                    }),
                );
            }
        }
    }

    fn commit_2d(&mut self, device: &mut dyn GpuDevice) {
        let mipmapped = self.min_filter.uses_mipmaps();
        self.objects = self
            .textures
            .iter()
            .enumerate()
            .map(|(unit, texture)| {
                let texture = texture.as_ref()?;
                let desc = TextureDesc {
                    target: TextureTarget::TwoDimensional,
                    width: texture.width,
                    height: texture.height,
                    mipmapped,
                };
                match device.create_texture(&desc, &[texture.pixels.as_slice()]) {
                    Ok(handle) => {
                        trace!(unit, texture = %texture.name, "uploaded 2D texture");
                        Some(handle)
                    }
                    Err(err) => {
                        warn!(unit, texture = %texture.name, error = %err, "texture upload failed");
                        None
                    }
                }
            })
            .collect();
    }

    fn commit_cube(&mut self, device: &mut dyn GpuDevice) {
        let faces: Option<Vec<&Arc<Texture>>> = self
            .textures
            .iter()
            .take(CUBE_FACES)
            .map(Option::as_ref)
            .collect();
        let faces = match faces {
            Some(faces) if faces.len() == CUBE_FACES => faces,
            _ => {
                warn!(
                    assigned = self.textures.iter().flatten().count(),
                    "cube map needs six faces in units 0..6; nothing uploaded"
                );
                return;
            }
        };
        let (width, height) = (faces[0].width, faces[0].height);
        if faces.iter().any(|f| f.width != width || f.height != height) {
            warn!("cube map faces differ in size; nothing uploaded");
            return;
        }
        let desc = TextureDesc {
            target: TextureTarget::CubeMap,
            width,
            height,
            mipmapped: self.min_filter.uses_mipmaps(),
        };
        let layers: Vec<&[u8]> = faces.iter().map(|f| f.pixels.as_slice()).collect();
        match device.create_texture(&desc, &layers) {
            Ok(handle) => self.objects = vec![Some(handle)],
            Err(err) => warn!(error = %err, "cube map upload failed"),
        }
    }

    fn destroy_objects(&mut self, device: &mut dyn GpuDevice) {
        for object in self.objects.drain(..).flatten() {
            device.destroy_texture(object);
        }
    }

    /// Forget all textures and queue the GPU objects for release. Safe to
    /// call more than once.
    pub(crate) fn dispose(&mut self) {
        self.textures.clear();
        for object in self.objects.drain(..).flatten() {
            self.release.push(object);
        }
        self.dirty = true;
    }
}

impl Clone for TextureState {
    /// Shares the assigned textures but not the GPU objects; the copy uploads
    /// its own on first apply.
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            min_filter: self.min_filter,
            mag_filter: self.mag_filter,
            wrap: self.wrap,
            textures: self.textures.clone(),
            objects: Vec::new(),
            dirty: true,
            unit_count: self.unit_count,
            release: self.release.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{GpuCommand, RecordingDevice};

    fn checker() -> Arc<Texture> {
        Arc::new(Texture::solid("checker", 2, 2, [255, 0, 255, 255]).unwrap())
    }

    #[test]
    fn defaults() {
        let state = TextureState::new(16, ReleaseQueue::new());
        assert_eq!(state.target(), TextureTarget::TwoDimensional);
        assert_eq!(state.min_filter(), MinFilter::Trilinear);
        assert_eq!(state.mag_filter(), MagFilter::Bilinear);
        assert_eq!(state.wrap_mode(), WrapMode::ClampToEdge);
    }

    #[test]
    fn mipmap_flags() {
        assert!(!MinFilter::NearestNoMipmaps.uses_mipmaps());
        assert!(!MinFilter::BilinearNoMipmaps.uses_mipmaps());
        assert!(MinFilter::NearestNearestMipmap.uses_mipmaps());
        assert!(MinFilter::BilinearNearestMipmap.uses_mipmaps());
        assert!(MinFilter::NearestLinearMipmap.uses_mipmaps());
        assert!(MinFilter::Trilinear.uses_mipmaps());
    }

    #[test]
    fn unit_bounds_follow_capabilities() {
        let mut state = TextureState::new(4, ReleaseQueue::new());
        assert!(state.set_texture_at(checker(), 3).is_ok());
        assert!(matches!(
            state.set_texture_at(checker(), 4),
            Err(RenderError::InvalidTextureUnit {
                unit: 4,
                available: 4
            })
        ));
        assert!(matches!(
            state.texture_at(1),
            Err(RenderError::EmptyTextureUnit(1))
        ));
        assert_eq!(state.texture_at(3).unwrap().name, "checker");
    }

    #[test]
    fn upload_happens_once_until_dirty() {
        let mut device = RecordingDevice::new();
        let mut state = TextureState::new(16, ReleaseQueue::new());
        state.set_texture(checker()).unwrap();

        state.apply(&mut device);
        state.apply(&mut device);
        let uploads = device
            .commands()
            .iter()
            .filter(|c| matches!(c, GpuCommand::CreateTexture { .. }))
            .count();
        let binds = device
            .commands()
            .iter()
            .filter(|c| matches!(c, GpuCommand::BindTexture { .. }))
            .count();
        assert_eq!(uploads, 1);
        assert_eq!(binds, 2);
        assert!(!state.is_dirty());

        state.set_texture(checker()).unwrap();
        state.apply(&mut device);
        assert!(
            device
                .commands()
                .iter()
                .any(|c| matches!(c, GpuCommand::DestroyTexture(_)))
        );
    }

    #[test]
    fn wrap_change_only_rebinds() {
        let mut device = RecordingDevice::new();
        let mut state = TextureState::new(16, ReleaseQueue::new());
        state.set_texture(checker()).unwrap();
        state.apply(&mut device);
        state.set_wrap_mode(WrapMode::Repeat);
        assert!(!state.is_dirty());
        state.set_min_filter(MinFilter::NearestNoMipmaps);
        assert!(state.is_dirty());
    }

    #[test]
    fn oversized_images_are_rejected() {
        assert_eq!(Texture::byte_len(2, 3).unwrap(), 24);
        assert!(matches!(
            Texture::byte_len(u32::MAX, u32::MAX),
            Err(RenderError::Device(_))
        ));
        assert!(Texture::solid("huge", u32::MAX, u32::MAX, [0; 4]).is_err());
        assert_eq!(Texture::solid("px", 1, 2, [9; 4]).unwrap().pixels.len(), 8);
    }

    #[test]
    fn cube_map_needs_six_faces() {
        let mut device = RecordingDevice::new();
        let mut state = TextureState::new(16, ReleaseQueue::new());
        state.set_target(TextureTarget::CubeMap);
        for unit in 0..5 {
            state.set_texture_at(checker(), unit).unwrap();
        }
        state.apply(&mut device);
        assert_eq!(state.gpu_objects().count(), 0);

        state.set_texture_at(checker(), 5).unwrap();
        state.apply(&mut device);
        assert_eq!(state.gpu_objects().count(), 1);
        assert!(device.commands().iter().any(|c| matches!(
            c,
            GpuCommand::BindTexture {
                unit: 0,
                target: TextureTarget::CubeMap,
                ..
            }
        )));
    }

    #[test]
    fn dispose_queues_objects_and_is_repeatable() {
        let mut device = RecordingDevice::new();
        let release = ReleaseQueue::new();
        let mut state = TextureState::new(16, release.clone());
        state.set_texture(checker()).unwrap();
        state.apply(&mut device);

        state.dispose();
        state.dispose();
        assert_eq!(release.len(), 1);
        assert!(state.texture().is_err());
    }

    #[test]
    fn clone_does_not_share_gpu_objects() {
        let mut device = RecordingDevice::new();
        let mut state = TextureState::new(16, ReleaseQueue::new());
        state.set_texture(checker()).unwrap();
        state.apply(&mut device);

        let copy = state.clone();
        assert!(copy.is_dirty());
        assert_eq!(copy.gpu_objects().count(), 0);
        assert_eq!(copy.texture().unwrap().name, "checker");
    }
}

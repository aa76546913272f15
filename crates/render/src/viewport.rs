//! Screen-space regions of a render window.
//!
//! A viewport keeps its rectangle and scissor rectangle in normalized
//! `[0, 1]` surface coordinates with a bottom-left origin, and converts both
//! to pixels whenever the surface or the rectangles change. Configuration
//! errors are reported where they happen and leave the viewport untouched.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use penumbra_common::{check_unit, Color};
use tracing::debug;

use crate::device::PixelRect;
use crate::error::RenderError;

const CONTAINMENT_EPSILON: f32 = 1e-6;

/// A camera that can be bound to a [`Viewport`].
pub trait ViewportCamera {
    /// Whether the camera wants its aspect ratio to follow the viewport.
    fn auto_aspect_ratio(&self) -> bool;
    fn set_aspect_ratio(&mut self, aspect: f32);
    /// Called with `true` when bound to a viewport, `false` when unbound.
    fn notify_viewport(&mut self, attached: bool);
}

pub type SharedCamera = Rc<RefCell<dyn ViewportCamera>>;

/// Observer of viewport changes. Both callbacks default to doing nothing.
pub trait ViewportListener {
    fn on_camera_changed(&mut self, _viewport: &Viewport) {}
    fn on_dimensions_changed(&mut self, _viewport: &Viewport) {}
}

pub type SharedViewportListener = Rc<RefCell<dyn ViewportListener>>;

/// Rectangle in normalized surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub bottom: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const FULL: NormalizedRect = NormalizedRect {
        bottom: 0.0,
        left: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Every component must be within `[0, 1]`.
    pub fn new(bottom: f32, left: f32, width: f32, height: f32) -> Result<Self, RenderError> {
        Ok(Self {
            bottom: check_unit("bottom", bottom)?,
            left: check_unit("left", left)?,
            width: check_unit("width", width)?,
            height: check_unit("height", height)?,
        })
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn top(&self) -> f32 {
        self.bottom + self.height
    }

    pub fn contains(&self, other: &NormalizedRect) -> bool {
        other.left + CONTAINMENT_EPSILON >= self.left
            && other.bottom + CONTAINMENT_EPSILON >= self.bottom
            && other.right() <= self.right() + CONTAINMENT_EPSILON
            && other.top() <= self.top() + CONTAINMENT_EPSILON
    }

    /// Truncating conversion to pixels on a `width` x `height` surface.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let (w, h) = (width as f32, height as f32);
        PixelRect {
            x: (self.left * w) as i32,
            y: (self.bottom * h) as i32,
            width: (self.width * w) as i32,
            height: (self.height * h) as i32,
        }
    }
}

pub struct Viewport {
    rect: NormalizedRect,
    scissor: NormalizedRect,
    surface: (u32, u32),
    pixels: PixelRect,
    scissor_pixels: PixelRect,
    clear_color: [f32; 4],
    clear_depth: [f32; 1],
    camera: Option<SharedCamera>,
    listeners: Vec<SharedViewportListener>,
}

impl Viewport {
    /// Full-surface viewport with a black clear color and a clear depth of 1.
    pub fn new(surface_width: u32, surface_height: u32) -> Self {
        let mut viewport = Self {
            rect: NormalizedRect::FULL,
            scissor: NormalizedRect::FULL,
            surface: (surface_width, surface_height),
            pixels: PixelRect::default(),
            scissor_pixels: PixelRect::default(),
            clear_color: Color::BLACK.to_array(),
            clear_depth: [1.0],
            camera: None,
            listeners: Vec::new(),
        };
        viewport.notify_dimensions_changed();
        viewport
    }

    pub fn with_dimensions(
        surface_width: u32,
        surface_height: u32,
        bottom: f32,
        left: f32,
        width: f32,
        height: f32,
    ) -> Result<Self, RenderError> {
        let mut viewport = Self::new(surface_width, surface_height);
        viewport.set_dimensions(bottom, left, width, height)?;
        Ok(viewport)
    }

    /// Set the viewport rectangle; the scissor rectangle follows it.
    pub fn set_dimensions(
        &mut self,
        bottom: f32,
        left: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError> {
        let rect = NormalizedRect::new(bottom, left, width, height)?;
        self.rect = rect;
        self.scissor = rect;
        self.notify_dimensions_changed();
        Ok(())
    }

    /// Set the viewport rectangle and keep the current scissor rectangle,
    /// which must still fit inside.
    pub fn set_dimensions_keeping_scissor(
        &mut self,
        bottom: f32,
        left: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError> {
        let rect = NormalizedRect::new(bottom, left, width, height)?;
        if !rect.contains(&self.scissor) {
            return Err(RenderError::ScissorOutsideViewport);
        }
        self.rect = rect;
        self.notify_dimensions_changed();
        Ok(())
    }

    /// Restrict drawing to a sub-rectangle of the viewport.
    pub fn set_scissors(
        &mut self,
        bottom: f32,
        left: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError> {
        let scissor = NormalizedRect::new(bottom, left, width, height)?;
        if !self.rect.contains(&scissor) {
            return Err(RenderError::ScissorOutsideViewport);
        }
        self.scissor = scissor;
        self.notify_dimensions_changed();
        Ok(())
    }

    /// Called by the owning window when the surface is resized.
    pub fn set_surface_size(&mut self, width: u32, height: u32) {
        self.surface = (width, height);
        self.notify_dimensions_changed();
    }

    /// Recompute pixel rectangles, refresh an auto-aspect camera, and tell
    /// listeners.
    pub fn notify_dimensions_changed(&mut self) {
        let (w, h) = self.surface;
        self.pixels = self.rect.to_pixels(w, h);
        self.scissor_pixels = self.scissor.to_pixels(w, h);
        if let Some(camera) = &self.camera {
            self.update_aspect(&mut *camera.borrow_mut());
        }
        for listener in &self.listeners {
            listener.borrow_mut().on_dimensions_changed(self);
        }
    }

    fn update_aspect(&self, camera: &mut dyn ViewportCamera) {
        if camera.auto_aspect_ratio() && self.pixels.height > 0 {
            camera.set_aspect_ratio(self.pixels.width as f32 / self.pixels.height as f32);
        }
    }

    /// Bind `camera`, unbinding the previous one, and tell listeners.
    pub fn set_camera(&mut self, camera: Option<SharedCamera>) {
        if let Some(old) = self.camera.take() {
            old.borrow_mut().notify_viewport(false);
        }
        if let Some(camera) = &camera {
            let mut cam = camera.borrow_mut();
            self.update_aspect(&mut *cam);
            cam.notify_viewport(true);
        }
        self.camera = camera;
        for listener in &self.listeners {
            listener.borrow_mut().on_camera_changed(self);
        }
    }

    pub fn camera(&self) -> Option<&SharedCamera> {
        self.camera.as_ref()
    }

    pub fn add_listener(&mut self, listener: SharedViewportListener) {
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &SharedViewportListener) {
        self.listeners.retain(|l| !Rc::ptr_eq(l, listener));
    }

    pub fn remove_all_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn rect(&self) -> NormalizedRect {
        self.rect
    }

    pub fn scissor(&self) -> NormalizedRect {
        self.scissor
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    pub fn pixel_rect(&self) -> PixelRect {
        self.pixels
    }

    pub fn scissor_pixel_rect(&self) -> PixelRect {
        self.scissor_pixels
    }

    pub fn actual_left(&self) -> i32 {
        self.pixels.x
    }

    pub fn actual_bottom(&self) -> i32 {
        self.pixels.y
    }

    pub fn actual_width(&self) -> i32 {
        self.pixels.width
    }

    pub fn actual_height(&self) -> i32 {
        self.pixels.height
    }

    pub fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) -> Result<(), RenderError> {
        self.clear_color = Color::try_new(r, g, b, a)?.to_array();
        Ok(())
    }

    pub fn set_clear_color_rgba8(&mut self, r: u8, g: u8, b: u8, a: u8) {
        self.clear_color = Color::from_rgba8(r, g, b, a).to_array();
    }

    pub fn clear_color(&self) -> Color {
        let [r, g, b, a] = self.clear_color;
        Color { r, g, b, a }
    }

    /// Clear color laid out for upload.
    pub fn clear_color_buffer(&self) -> &[f32; 4] {
        &self.clear_color
    }

    pub fn set_clear_depth(&mut self, depth: f32) -> Result<(), RenderError> {
        self.clear_depth = [check_unit("clear depth", depth)?];
        Ok(())
    }

    pub fn clear_depth(&self) -> f32 {
        self.clear_depth[0]
    }

    pub fn clear_depth_buffer(&self) -> &[f32; 1] {
        &self.clear_depth
    }

    /// Detach the camera and drop listeners. Listeners are not told about
    /// the camera going away.
    pub fn dispose(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.borrow_mut().notify_viewport(false);
        }
        self.listeners.clear();
        debug!(rect = ?self.rect, "viewport disposed");
    }
}

impl fmt::Debug for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Viewport")
            .field("rect", &self.rect)
            .field("scissor", &self.scissor)
            .field("surface", &self.surface)
            .field("pixels", &self.pixels)
            .field("scissor_pixels", &self.scissor_pixels)
            .field("has_camera", &self.camera.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

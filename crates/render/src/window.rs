use crate::error::RenderError;
use crate::viewport::Viewport;

/// A drawing surface and the viewports laid over it.
///
/// A full-surface viewport exists from creation. The OS window itself
/// belongs to the application; this type tracks its size.
#[derive(Debug)]
pub struct RenderWindow {
    title: String,
    width: u32,
    height: u32,
    viewports: Vec<Viewport>,
}

impl RenderWindow {
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            viewports: vec![Viewport::new(width, height)],
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn create_viewport(
        &mut self,
        bottom: f32,
        left: f32,
        width: f32,
        height: f32,
    ) -> Result<&mut Viewport, RenderError> {
        let viewport =
            Viewport::with_dimensions(self.width, self.height, bottom, left, width, height)?;
        self.viewports.push(viewport);
        let index = self.viewports.len() - 1;
        Ok(&mut self.viewports[index])
    }

    pub fn viewport(&self, index: usize) -> Result<&Viewport, RenderError> {
        self.viewports
            .get(index)
            .ok_or(RenderError::NoSuchViewport(index))
    }

    pub fn viewport_mut(&mut self, index: usize) -> Result<&mut Viewport, RenderError> {
        self.viewports
            .get_mut(index)
            .ok_or(RenderError::NoSuchViewport(index))
    }

    pub fn viewport_count(&self) -> usize {
        self.viewports.len()
    }

    pub fn viewports(&self) -> impl Iterator<Item = &Viewport> {
        self.viewports.iter()
    }

    pub fn remove_viewport(&mut self, index: usize) -> Result<(), RenderError> {
        if index >= self.viewports.len() {
            return Err(RenderError::NoSuchViewport(index));
        }
        self.viewports.remove(index).dispose();
        Ok(())
    }

    pub fn remove_all_viewports(&mut self) {
        for mut viewport in self.viewports.drain(..) {
            viewport.dispose();
        }
    }

    /// Track a new surface size and refresh every viewport.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        for viewport in &mut self.viewports {
            viewport.set_surface_size(width, height);
        }
    }
}

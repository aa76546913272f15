use penumbra_render::HudText;

/// Where an overlay draws: the frame's encoder and its swapchain view.
pub struct OverlayTarget<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub view: &'a wgpu::TextureView,
    /// Surface size in physical pixels.
    pub size: (u32, u32),
}

/// Screen-space text renderer run after all 3D passes of a frame.
///
/// The device owns no font machinery; applications plug one in (the viewer
/// uses egui).
pub trait OverlayPass {
    fn render(&mut self, target: OverlayTarget<'_>, texts: &[HudText]);
}

/// Top-left position of `text`'s glyph box on a surface `surface_height`
/// pixels tall. HUD coordinates have a bottom-left origin.
pub fn top_left_origin(text: &HudText, surface_height: u32) -> (f32, f32) {
    let top = surface_height as f32 - text.y as f32 - text.size;
    (text.x as f32, top.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hud_origin_flips_to_top_left() {
        let text = HudText::new("fps", 15, 15);
        assert_eq!(top_left_origin(&text, 600), (15.0, 600.0 - 15.0 - 24.0));
        let high = HudText::new("clipped", 0, 590);
        assert_eq!(top_left_origin(&high, 600).1, 0.0);
    }
}

use penumbra_render::HudText;
use penumbra_render_wgpu::{OverlayPass, OverlayTarget, top_left_origin};

/// Paints HUD strings with egui on top of the finished frame.
pub struct EguiHud {
    ctx: egui::Context,
    renderer: egui_wgpu::Renderer,
}

impl EguiHud {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        Self {
            ctx: egui::Context::default(),
            renderer: egui_wgpu::Renderer::new(device, format, None, 1, false),
        }
    }
}

impl OverlayPass for EguiHud {
    fn render(&mut self, target: OverlayTarget<'_>, texts: &[HudText]) {
        let (width, height) = target.size;
        let raw_input = egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(
                egui::Pos2::ZERO,
                egui::vec2(width as f32, height as f32),
            )),
            ..Default::default()
        };
        let full_output = self.ctx.run(raw_input, |ctx| {
            let painter = ctx.layer_painter(egui::LayerId::new(
                egui::Order::Foreground,
                egui::Id::new("hud"),
            ));
            for text in texts {
                let (x, y) = top_left_origin(text, height);
                painter.text(
                    egui::pos2(x, y),
                    egui::Align2::LEFT_TOP,
                    &text.text,
                    egui::FontId::monospace(text.size),
                    egui::Color32::WHITE,
                );
            }
        });

        let paint_jobs = self
            .ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [width, height],
            pixels_per_point: full_output.pixels_per_point,
        };
        for (id, image_delta) in &full_output.textures_delta.set {
            self.renderer
                .update_texture(target.device, target.queue, *id, image_delta);
        }
        self.renderer.update_buffers(
            target.device,
            target.queue,
            target.encoder,
            &paint_jobs,
            &screen_descriptor,
        );
        {
            let mut pass = target
                .encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("hud_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    ..Default::default()
                })
                .forget_lifetime();
            self.renderer
                .render(&mut pass, &paint_jobs, &screen_descriptor);
        }
        for id in &full_output.textures_delta.free {
            self.renderer.free_texture(id);
        }
    }
}

//! Translation of the pipeline's fixed-function vocabulary into wgpu terms.

use penumbra_render::{
    CullFace, DepthFunction, DrawSource, MagFilter, MinFilter, PixelRect, PolygonMode, Primitive,
    SamplerDesc, VertexWinding, WrapMode,
};

pub fn topology(primitive: Primitive, source: DrawSource) -> wgpu::PrimitiveTopology {
    if matches!(source, DrawSource::Patches { .. }) {
        return wgpu::PrimitiveTopology::TriangleStrip;
    }
    match primitive {
        Primitive::Points => wgpu::PrimitiveTopology::PointList,
        Primitive::Lines => wgpu::PrimitiveTopology::LineList,
        Primitive::Triangles => wgpu::PrimitiveTopology::TriangleList,
        Primitive::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

pub fn compare(function: DepthFunction) -> wgpu::CompareFunction {
    match function {
        DepthFunction::AlwaysFail => wgpu::CompareFunction::Never,
        DepthFunction::Less => wgpu::CompareFunction::Less,
        DepthFunction::Equal => wgpu::CompareFunction::Equal,
        DepthFunction::LessOrEqual => wgpu::CompareFunction::LessEqual,
        DepthFunction::Greater => wgpu::CompareFunction::Greater,
        DepthFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthFunction::GreaterOrEqual => wgpu::CompareFunction::GreaterEqual,
        DepthFunction::AlwaysPass => wgpu::CompareFunction::Always,
    }
}

pub fn cull_mode(enabled: bool, face: CullFace) -> Option<wgpu::Face> {
    enabled.then_some(match face {
        CullFace::Front => wgpu::Face::Front,
        CullFace::Back => wgpu::Face::Back,
    })
}

pub fn front_face(winding: VertexWinding) -> wgpu::FrontFace {
    match winding {
        VertexWinding::Clockwise => wgpu::FrontFace::Cw,
        VertexWinding::CounterClockwise => wgpu::FrontFace::Ccw,
    }
}

/// Line mode needs a device feature; without it everything is filled.
pub fn polygon_mode(mode: PolygonMode, line_supported: bool) -> wgpu::PolygonMode {
    match mode {
        PolygonMode::Line if line_supported => wgpu::PolygonMode::Line,
        _ => wgpu::PolygonMode::Fill,
    }
}

fn address_mode(wrap: WrapMode, border_supported: bool) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat | WrapMode::MirroredClampToEdge => {
            wgpu::AddressMode::MirrorRepeat
        }
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::ClampToBorder if border_supported => wgpu::AddressMode::ClampToBorder,
        WrapMode::ClampToBorder => wgpu::AddressMode::ClampToEdge,
    }
}

pub fn sampler_descriptor(desc: SamplerDesc, border_supported: bool) -> wgpu::SamplerDescriptor<'static> {
    let (min_filter, mipmap_filter) = match desc.min_filter {
        MinFilter::NearestNoMipmaps | MinFilter::NearestNearestMipmap => {
            (wgpu::FilterMode::Nearest, wgpu::FilterMode::Nearest)
        }
        MinFilter::BilinearNoMipmaps | MinFilter::BilinearNearestMipmap => {
            (wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest)
        }
        MinFilter::NearestLinearMipmap => (wgpu::FilterMode::Nearest, wgpu::FilterMode::Linear),
        MinFilter::Trilinear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Linear),
    };
    let mag_filter = match desc.mag_filter {
        MagFilter::Nearest => wgpu::FilterMode::Nearest,
        MagFilter::Bilinear => wgpu::FilterMode::Linear,
    };
    let address = address_mode(desc.wrap, border_supported);
    let lod_max_clamp = if desc.min_filter.uses_mipmaps() { 32.0 } else { 0.0 };
    wgpu::SamplerDescriptor {
        label: Some("texture_sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter,
        min_filter,
        mipmap_filter,
        lod_max_clamp,
        border_color: (address == wgpu::AddressMode::ClampToBorder)
            .then_some(wgpu::SamplerBorderColor::OpaqueWhite),
        ..Default::default()
    }
}

/// Pixel rectangle in wgpu's top-left space, clipped to the target.
/// `None` when nothing of it remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Flip a bottom-left rectangle into top-left space and clip it to a
/// `target_width` x `target_height` target.
pub fn flip_and_clip(rect: PixelRect, target_width: u32, target_height: u32) -> Option<TargetRect> {
    let (tw, th) = (target_width as i64, target_height as i64);
    let left = (rect.x as i64).clamp(0, tw);
    let right = (rect.x as i64 + rect.width as i64).clamp(0, tw);
    let bottom = (rect.y as i64).clamp(0, th);
    let top = (rect.y as i64 + rect.height as i64).clamp(0, th);
    if right <= left || top <= bottom {
        return None;
    }
    Some(TargetRect {
        x: left as u32,
        y: (th - top) as u32,
        width: (right - left) as u32,
        height: (top - bottom) as u32,
    })
}

/// Number of levels in a full mip chain for a `width` x `height` image.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Box-filter an RGBA8 image down to the next mip level.
pub fn downsample(pixels: &[u8], width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let (nw, nh) = ((width / 2).max(1), (height / 2).max(1));
    let mut out = Vec::with_capacity(nw as usize * nh as usize * 4);
    for y in 0..nh {
        for x in 0..nw {
            let mut sum = [0u32; 4];
            let mut taps = 0;
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (sx, sy) = (x * 2 + dx, y * 2 + dy);
                if sx >= width || sy >= height {
                    continue;
                }
                let i = ((sy * width + sx) * 4) as usize;
                for (c, s) in sum.iter_mut().enumerate() {
                    *s += pixels[i + c] as u32;
                }
                taps += 1;
            }
            out.extend(sum.iter().map(|s| (s / taps.max(1)) as u8));
        }
    }
    (out, nw, nh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_draw_as_strips() {
        let patches = DrawSource::Patches {
            vertices_per_patch: 4,
            instance_count: 9,
        };
        assert_eq!(
            topology(Primitive::Triangles, patches),
            wgpu::PrimitiveTopology::TriangleStrip
        );
        assert_eq!(
            topology(Primitive::Lines, DrawSource::Arrays { vertex_count: 2 }),
            wgpu::PrimitiveTopology::LineList
        );
    }

    #[test]
    fn culling_and_winding() {
        assert_eq!(cull_mode(false, CullFace::Back), None);
        assert_eq!(cull_mode(true, CullFace::Front), Some(wgpu::Face::Front));
        assert_eq!(front_face(VertexWinding::Clockwise), wgpu::FrontFace::Cw);
        assert_eq!(polygon_mode(PolygonMode::Line, false), wgpu::PolygonMode::Fill);
    }

    #[test]
    fn rect_is_flipped_to_top_left() {
        let rect = flip_and_clip(PixelRect::new(0, 0, 200, 150), 800, 600).unwrap();
        assert_eq!(
            rect,
            TargetRect {
                x: 0,
                y: 450,
                width: 200,
                height: 150
            }
        );
    }

    #[test]
    fn rect_is_clipped_to_target() {
        let rect = flip_and_clip(PixelRect::new(-10, 500, 100, 200), 800, 600).unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 0);
        assert_eq!(rect.width, 90);
        assert_eq!(rect.height, 100);
        assert_eq!(flip_and_clip(PixelRect::new(900, 0, 10, 10), 800, 600), None);
    }

    #[test]
    fn mip_chain() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 64), 9);
        assert_eq!(mip_level_count(300, 2), 9);

        let pixels = [0, 0, 0, 255, 255, 255, 255, 255, 100, 100, 100, 255, 100, 100, 100, 255];
        let (level, w, h) = downsample(&pixels, 2, 2);
        assert_eq!((w, h), (1, 1));
        assert_eq!(level, vec![113, 113, 113, 255]);
    }

    #[test]
    fn samplers_follow_filters() {
        let desc = sampler_descriptor(
            SamplerDesc {
                min_filter: MinFilter::NearestNoMipmaps,
                mag_filter: MagFilter::Nearest,
                wrap: WrapMode::ClampToBorder,
            },
            false,
        );
        assert_eq!(desc.min_filter, wgpu::FilterMode::Nearest);
        assert_eq!(desc.lod_max_clamp, 0.0);
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.border_color, None);

        let trilinear = sampler_descriptor(SamplerDesc::default(), true);
        assert_eq!(trilinear.mipmap_filter, wgpu::FilterMode::Linear);
    }
}

use std::sync::Arc;

use vello_cpu::kurbo::Shape as _;

use crate::{
    assets::PreparedImage,
    compose::text::TextBrushRgba8,
    foundation::{
        core::{Affine, Rect, Rgba8},
        error::{StatcastError, StatcastResult},
    },
};

pub(crate) fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

pub(crate) fn rect_to_cpu(r: Rect) -> vello_cpu::kurbo::Rect {
    vello_cpu::kurbo::Rect::new(r.x0, r.y0, r.x1, r.y1)
}

pub(crate) fn color(c: Rgba8) -> vello_cpu::peniko::Color {
    vello_cpu::peniko::Color::from_rgba8(c.r, c.g, c.b, c.a)
}

pub(crate) fn rounded_rect_path(r: Rect, radius: f64) -> vello_cpu::kurbo::BezPath {
    let rr = vello_cpu::kurbo::RoundedRect::from_rect(rect_to_cpu(r), radius);
    let mut p = vello_cpu::kurbo::BezPath::new();
    for el in rr.path_elements(0.1) {
        p.push(el);
    }
    p
}

pub(crate) fn circle_path(cx: f64, cy: f64, radius: f64) -> vello_cpu::kurbo::BezPath {
    let c = vello_cpu::kurbo::Circle::new((cx, cy), radius);
    let mut p = vello_cpu::kurbo::BezPath::new();
    for el in c.path_elements(0.1) {
        p.push(el);
    }
    p
}

/// Wrap premultiplied RGBA8 bytes as an image paint.
pub(crate) fn premul_bytes_to_image(
    rgba8_premul: &[u8],
    width: u32,
    height: u32,
) -> StatcastResult<vello_cpu::Image> {
    let w: u16 = width
        .try_into()
        .map_err(|_| StatcastError::validation("image width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| StatcastError::validation("image height exceeds u16"))?;
    if rgba8_premul.len() != width as usize * height as usize * 4 {
        return Err(StatcastError::validation("image byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for px in rgba8_premul.chunks_exact(4) {
        let a = px[3];
        may_have_opacities |= a != 255;
        pixels.push(vello_cpu::peniko::color::PremulRgba8 {
            r: px[0],
            g: px[1],
            b: px[2],
            a,
        });
    }

    let pixmap = vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, may_have_opacities);
    Ok(vello_cpu::Image {
        image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
        sampler: vello_cpu::peniko::ImageSampler::default(),
    })
}

pub(crate) fn prepared_to_image(img: &PreparedImage) -> StatcastResult<vello_cpu::Image> {
    premul_bytes_to_image(img.rgba8_premul.as_slice(), img.width, img.height)
}

/// Vertical two-stop gradient, top to bottom, as premultiplied RGBA8 bytes.
pub(crate) fn vertical_gradient_bytes(top: Rgba8, bottom: Rgba8, w: u32, h: u32) -> Vec<u8> {
    let top = top.premul();
    let bottom = bottom.premul();
    let mut bytes = vec![0u8; (w as usize).saturating_mul(h as usize).saturating_mul(4)];
    let h1 = (h.max(1) - 1) as f32;
    for y in 0..h {
        let t = if h1 <= 0.0 { 0.0 } else { (y as f32) / h1 };
        let lerp = |a: u8, b: u8| -> u8 {
            let af = a as f32;
            let bf = b as f32;
            (af + (bf - af) * t).round().clamp(0.0, 255.0) as u8
        };
        let c = [
            lerp(top[0], bottom[0]),
            lerp(top[1], bottom[1]),
            lerp(top[2], bottom[2]),
            lerp(top[3], bottom[3]),
        ];
        let row = (y as usize) * (w as usize) * 4;
        for px in bytes[row..row + (w as usize) * 4].chunks_exact_mut(4) {
            px.copy_from_slice(&c);
        }
    }
    bytes
}

/// Draw a shaped line with its top-left corner at the current transform's origin.
pub(crate) fn fill_layout(
    ctx: &mut vello_cpu::RenderContext,
    font: &vello_cpu::peniko::FontData,
    layout: &parley::Layout<TextBrushRgba8>,
) {
    for line in layout.lines() {
        for item in line.items() {
            let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                continue;
            };

            let brush = run.style().brush;
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                brush.r, brush.g, brush.b, brush.a,
            ));

            let glyphs = run.positioned_glyphs().map(|g| vello_cpu::Glyph {
                id: g.id,
                x: g.x,
                y: g.y,
            });
            ctx.glyph_run(font)
                .font_size(run.run().font_size())
                .fill_glyphs(glyphs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_endpoints_match_stops() {
        let top = Rgba8::rgb(10, 20, 30);
        let bottom = Rgba8::rgb(110, 120, 130);
        let bytes = vertical_gradient_bytes(top, bottom, 3, 5);
        assert_eq!(&bytes[0..4], &[10, 20, 30, 255]);
        let last_row = 4 * 3 * 4;
        assert_eq!(&bytes[last_row..last_row + 4], &[110, 120, 130, 255]);
        let mid_row = 2 * 3 * 4;
        assert_eq!(&bytes[mid_row..mid_row + 4], &[60, 70, 80, 255]);
    }

    #[test]
    fn image_wrapping_checks_lengths() {
        assert!(premul_bytes_to_image(&[0; 16], 2, 2).is_ok());
        assert!(premul_bytes_to_image(&[0; 15], 2, 2).is_err());
        assert!(premul_bytes_to_image(&[], 70_000, 0).is_err());
    }
}

use std::sync::Arc;

use crate::foundation::error::{StatcastError, StatcastResult};

/// Raster image in premultiplied RGBA8, row-major, tightly packed.
#[derive(Clone, Debug)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Arc<Vec<u8>>,
}

/// Decode an avatar, crop it to a centred square of `diameter` pixels and clip it to a circle
/// with an anti-aliased edge.
pub fn decode_avatar(bytes: &[u8], diameter: u32) -> StatcastResult<PreparedImage> {
    if diameter == 0 {
        return Err(StatcastError::validation("avatar diameter must be non-zero"));
    }
    let dyn_img = image::load_from_memory(bytes)
        .map_err(|e| StatcastError::decode(format!("avatar image: {e}")))?;
    let square = dyn_img.resize_to_fill(
        diameter,
        diameter,
        image::imageops::FilterType::Triangle,
    );

    let mut rgba8_premul = square.to_rgba8().into_raw();
    premultiply_rgba8_in_place(&mut rgba8_premul);
    clip_to_circle_in_place(&mut rgba8_premul, diameter);

    Ok(PreparedImage {
        width: diameter,
        height: diameter,
        rgba8_premul: Arc::new(rgba8_premul),
    })
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

// Premultiplied data lets the coverage scale all four channels uniformly.
fn clip_to_circle_in_place(rgba8_premul: &mut [u8], diameter: u32) {
    let r = diameter as f32 / 2.0;
    for (i, px) in rgba8_premul.chunks_exact_mut(4).enumerate() {
        let x = (i as u32 % diameter) as f32 + 0.5 - r;
        let y = (i as u32 / diameter) as f32 + 0.5 - r;
        let coverage = (r - (x * x + y * y).sqrt() + 0.5).clamp(0.0, 1.0);
        if coverage >= 1.0 {
            continue;
        }
        for c in px.iter_mut() {
            *c = (f32::from(*c) * coverage).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn avatar_is_square_and_circle_clipped() {
        let avatar = decode_avatar(&png_bytes(40, 20, [255, 0, 0, 255]), 16).unwrap();
        assert_eq!((avatar.width, avatar.height), (16, 16));

        let px = |x: usize, y: usize| {
            let i = (y * 16 + x) * 4;
            &avatar.rgba8_premul[i..i + 4]
        };
        let center = px(8, 8);
        assert!(center[0] >= 250 && center[1] <= 5 && center[3] >= 250);
        assert_eq!(px(0, 0), &[0, 0, 0, 0]);
        assert_eq!(px(15, 15), &[0, 0, 0, 0]);
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = decode_avatar(b"not an image", 16).unwrap_err();
        assert!(matches!(err, StatcastError::Decode(_)));
    }
}

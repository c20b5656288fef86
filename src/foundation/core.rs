use crate::foundation::error::{StatcastError, StatcastResult};

pub use kurbo::{Affine, Point, Rect};

/// Output canvas dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    /// Create a canvas suitable for yuv420p output: non-zero, even, and within the raster
    /// surface's `u16` limits.
    pub fn new(width: u32, height: u32) -> StatcastResult<Self> {
        if width == 0 || height == 0 {
            return Err(StatcastError::validation("canvas width/height must be non-zero"));
        }
        if !width.is_multiple_of(2) || !height.is_multiple_of(2) {
            return Err(StatcastError::validation(
                "canvas width/height must be even (required for yuv420p output)",
            ));
        }
        if width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
            return Err(StatcastError::validation("canvas width/height exceed u16"));
        }
        Ok(Self { width, height })
    }
}

/// Straight-alpha RGBA8 color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Premultiply into the byte order used by raster surfaces.
    pub fn premul(self) -> [u8; 4] {
        let a = u16::from(self.a);
        let mul = |c: u8| -> u8 { ((u16::from(c) * a + 127) / 255) as u8 };
        [mul(self.r), mul(self.g), mul(self.b), self.a]
    }
}

/// One rendered frame in premultiplied (or flattened opaque) RGBA8, row-major.
#[derive(Clone, Debug)]
pub struct FrameRGBA {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// Read one pixel; `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.data.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

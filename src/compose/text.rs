use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::error::{StatcastError, StatcastResult};

/// Locations tried, in order, when no font path is configured.
pub const FALLBACK_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// RGBA8 brush color used by Parley text layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextBrushRgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Read font bytes from `configured`, or from the first fallback location that exists.
pub fn load_font_bytes(configured: Option<&Path>) -> StatcastResult<Vec<u8>> {
    if let Some(path) = configured {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read font '{}'", path.display()))?;
        return Ok(bytes);
    }
    let found = FALLBACK_FONT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or_else(|| {
            StatcastError::validation("no font configured and no fallback system font found")
        })?;
    tracing::debug!(path = %found.display(), "using fallback font");
    let bytes =
        std::fs::read(&found).with_context(|| format!("read font '{}'", found.display()))?;
    Ok(bytes)
}

/// Shapes text with a single registered font.
pub struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
    family_name: String,
    font: vello_cpu::peniko::FontData,
}

impl TextLayoutEngine {
    pub fn new(font_bytes: Vec<u8>) -> StatcastResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.clone()), None);
        let family_id = families.first().map(|(id, _)| *id).ok_or_else(|| {
            StatcastError::validation("no font families registered from font bytes")
        })?;
        let family_name = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| StatcastError::validation("registered font family has no name"))?
            .to_string();

        let font = vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(font_bytes), 0);

        Ok(Self {
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            family_name,
            font,
        })
    }

    pub fn font(&self) -> &vello_cpu::peniko::FontData {
        &self.font
    }

    /// Family name the registered font was recorded under.
    pub fn family_name(&self) -> &str {
        &self.family_name
    }

    /// Shape one line of plain text.
    pub fn layout_line(
        &mut self,
        text: &str,
        size_px: f32,
        brush: TextBrushRgba8,
    ) -> StatcastResult<parley::Layout<TextBrushRgba8>> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(StatcastError::validation(
                "text size_px must be finite and > 0",
            ));
        }

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(self.family_name.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        layout.break_all_lines(None);
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_font_bytes_are_rejected() {
        assert!(TextLayoutEngine::new(b"definitely not a font".to_vec()).is_err());
    }

    #[test]
    fn missing_configured_font_is_an_error() {
        let err = load_font_bytes(Some(Path::new("/nonexistent/font.ttf"))).unwrap_err();
        assert!(err.to_string().contains("read font"));
    }

    #[test]
    fn fallback_font_lays_out_when_available() {
        let Ok(bytes) = load_font_bytes(None) else {
            return;
        };
        let mut engine = TextLayoutEngine::new(bytes).unwrap();
        let brush = TextBrushRgba8 {
            r: 255,
            g: 255,
            b: 255,
            a: 255,
        };
        let layout = engine.layout_line("LIVE", 24.0, brush).unwrap();
        assert!(layout.width() > 0.0);
        assert!(engine.layout_line("x", 0.0, brush).is_err());
    }
}

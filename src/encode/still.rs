use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::{
    core::FrameRGBA,
    error::{StatcastError, StatcastResult},
};

/// Write `frame` as a PNG at `path`, replacing any previous file in one step.
///
/// The image goes to a sibling temporary file first and is renamed over `path`, so a reader
/// polling the file never sees a partial image.
pub fn write_png_atomic(path: &Path, frame: &FrameRGBA) -> StatcastResult<()> {
    let tmp = temp_sibling(path);
    save_png(&tmp, frame)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replace '{}' with '{}'", path.display(), tmp.display()))?;
    Ok(())
}

/// Write `frame` as a PNG at `path`.
pub fn save_png(path: &Path, frame: &FrameRGBA) -> StatcastResult<()> {
    ensure_parent_dir(path)?;
    let expected = frame.width as usize * frame.height as usize * 4;
    if frame.data.len() != expected {
        return Err(StatcastError::validation(
            "frame.data size mismatch with width*height*4",
        ));
    }
    let straight;
    let bytes = if frame.premultiplied {
        straight = unpremultiply(&frame.data);
        straight.as_slice()
    } else {
        frame.data.as_slice()
    };
    image::save_buffer_with_format(
        path,
        bytes,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", path.display()))?;
    Ok(())
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> StatcastResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "frame".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn unpremultiply(src: &[u8]) -> Vec<u8> {
    let mut out = src.to_vec();
    for px in out.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * 255 + a / 2) / a).min(255) as u8;
        }
    }
    out
}

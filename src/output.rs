//! Encodes a result buffer into the requested format on disk.

use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::codec;
use crate::error::{Error, Result};
use crate::log;
use crate::models::OutputFormat;

/// Write the upscaled buffer as `<stem>_<scale>x.<ext>` under `output_dir`
/// and return the path. JPEG output drops the alpha channel; PNG keeps it.
pub fn materialize(
    buffer: &[u32],
    width: u32,
    height: u32,
    format: OutputFormat,
    output_dir: &Path,
    original_file_name: &str,
    scale: u32,
) -> Result<PathBuf> {
    let image = codec::decode(buffer, width, height)?;

    std::fs::create_dir_all(output_dir)?;

    let stem = Path::new(original_file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upscaled");
    let path = output_dir.join(format!("{}_{}x.{}", stem, scale, format.extension()));

    let saved = match format {
        OutputFormat::Jpeg => DynamicImage::ImageRgba8(image)
            .to_rgb8()
            .save_with_format(&path, format.image_format()),
        OutputFormat::Png => image.save_with_format(&path, format.image_format()),
    };
    saved.map_err(|e| match e {
        image::ImageError::IoError(io) => Error::Storage(io),
        other => Error::Encode(other),
    })?;

    log::info(&format!("saved {}", path.display()));
    Ok(path)
}

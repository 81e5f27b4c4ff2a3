//! Conversion between decoded bitmaps and the flat packed-pixel buffer the
//! inference backend consumes and produces.
//!
//! One `u32` per pixel, channel-packed ARGB (alpha in the high byte),
//! row-major, no padding. This module is the one place pixel layout is
//! decided; no resizing or color conversion happens here.

use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbaImage};

use crate::error::{Error, Result};

/// An image selected for upscaling. Dimensions come from the file header;
/// the pixel data is only decoded once an attempt starts.
#[derive(Debug, Clone)]
pub struct InputImage {
    pub file_name: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl InputImage {
    pub fn load(path: &Path) -> Result<Self> {
        let (width, height) = image::image_dimensions(path).map_err(Error::UnsupportedImage)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self {
            file_name,
            path: path.to_path_buf(),
            width,
            height,
        })
    }
}

/// Decode an image file into a packed pixel buffer.
pub fn encode_file(path: &Path) -> Result<(Vec<u32>, u32, u32)> {
    let image = image::open(path).map_err(Error::UnsupportedImage)?;
    Ok(encode_image(&image))
}

/// Pack an already decoded image. Pure transform.
pub fn encode_image(image: &DynamicImage) -> (Vec<u32>, u32, u32) {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut buffer = Vec::with_capacity(width as usize * height as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        buffer.push(((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32);
    }
    (buffer, width, height)
}

/// Unpack a pixel buffer back into a bitmap.
pub fn decode(buffer: &[u32], width: u32, height: u32) -> Result<RgbaImage> {
    let expected = width as usize * height as usize;
    if buffer.len() != expected {
        return Err(Error::BufferSizeMismatch {
            expected,
            actual: buffer.len(),
        });
    }

    let mut image = RgbaImage::new(width, height);
    for (pixel, packed) in image.pixels_mut().zip(buffer) {
        let a = (packed >> 24) as u8;
        let r = (packed >> 16) as u8;
        let g = (packed >> 8) as u8;
        let b = *packed as u8;
        pixel.0 = [r, g, b, a];
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    // Small deterministic generator, enough to cover odd sizes and all channels.
    fn xorshift(state: &mut u32) -> u32 {
        let mut x = *state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        *state = x;
        x
    }

    fn random_image(state: &mut u32, width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |_, _| {
            let v = xorshift(state);
            Rgba([v as u8, (v >> 8) as u8, (v >> 16) as u8, (v >> 24) as u8])
        })
    }

    #[test]
    fn test_round_trip_random_images() {
        let mut state = 0x2545_f491;
        for (width, height) in [(1, 1), (3, 2), (7, 7), (16, 9), (31, 17)] {
            let original = random_image(&mut state, width, height);
            let (buffer, w, h) = encode_image(&DynamicImage::ImageRgba8(original.clone()));
            assert_eq!((w, h), (width, height));
            assert_eq!(buffer.len(), (width * height) as usize);

            let decoded = decode(&buffer, w, h).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let buffer = vec![0u32; 11];
        match decode(&buffer, 3, 4) {
            Err(Error::BufferSizeMismatch { expected, actual }) => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 11);
            }
            other => panic!("expected BufferSizeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_an_image.png");
        std::fs::write(&path, b"definitely not pixels").unwrap();

        assert!(matches!(
            encode_file(&path),
            Err(Error::UnsupportedImage(_))
        ));
    }

    #[test]
    fn test_encode_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let mut state = 0x1234_5678;
        let original = random_image(&mut state, 12, 8);
        original.save(&path).unwrap();

        let (buffer, w, h) = encode_file(&path).unwrap();
        assert_eq!((w, h), (12, 8));
        assert_eq!(decode(&buffer, w, h).unwrap(), original);
    }

    #[test]
    fn test_input_image_reads_header_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        RgbaImage::new(20, 10).save(&path).unwrap();

        let input = InputImage::load(&path).unwrap();
        assert_eq!(input.file_name, "photo.png");
        assert_eq!((input.width, input.height), (20, 10));
    }
}

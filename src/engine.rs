//! Blocking binding to the neural super-resolution backend.
//!
//! The production implementation runs an ONNX session tile by tile,
//! reporting per-tile progress and a rolling time estimate through the
//! shared tracker. The call blocks the calling thread for its whole
//! duration and is not guaranteed interruptible; cancellation is handled
//! one layer up by discarding the eventual result.

use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{anyhow, Result};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::log;
use crate::progress::{ProgressTracker, INDETERMINATE_TIME};

/// Edge length of one inference tile, in input pixels.
const TILE_SIZE: u32 = 192;
/// Tile overlap in pixels per side, cropped on paste to avoid seam artifacts.
const TILE_OVERLAP: u32 = 16;

/// Synchronous, blocking contract to the upscaling backend.
///
/// Returns the upscaled buffer of `(width*scale) x (height*scale)` packed
/// pixels, or `None` on any backend-internal failure. Implementations must
/// not panic across this boundary and must be invoked off the interaction
/// context.
pub trait InferenceEngine: Send + Sync {
    fn run_upscaling(
        &self,
        model_data: &[u8],
        scale: u32,
        input: &[u32],
        width: u32,
        height: u32,
        progress: &ProgressTracker,
    ) -> Option<Vec<u32>>;
}

/// ONNX Runtime backed engine.
pub struct OrtEngine {
    tile_size: u32,
}

impl OrtEngine {
    pub fn new() -> Self {
        Self {
            tile_size: TILE_SIZE,
        }
    }

    /// Smaller tiles lower peak memory at the cost of more session runs.
    pub fn with_tile_size(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(32),
        }
    }
}

impl Default for OrtEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for OrtEngine {
    fn run_upscaling(
        &self,
        model_data: &[u8],
        scale: u32,
        input: &[u32],
        width: u32,
        height: u32,
        progress: &ProgressTracker,
    ) -> Option<Vec<u32>> {
        match self.run_inner(model_data, scale, input, width, height, progress) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                log::error(&format!("inference failed: {:#}", e));
                None
            }
        }
    }
}

fn ensure_runtime() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ort::init().commit().map(|_| ()).map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| anyhow!("failed to initialize ONNX Runtime: {}", e))
}

impl OrtEngine {
    fn run_inner(
        &self,
        model_data: &[u8],
        scale: u32,
        input: &[u32],
        width: u32,
        height: u32,
        progress: &ProgressTracker,
    ) -> Result<Vec<u32>> {
        if width == 0 || height == 0 || scale == 0 {
            return Err(anyhow!("degenerate input {}x{} at scale {}", width, height, scale));
        }
        if input.len() != width as usize * height as usize {
            return Err(anyhow!(
                "input buffer holds {} pixels for a {}x{} image",
                input.len(),
                width,
                height
            ));
        }

        ensure_runtime()?;

        let mut session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_execution_providers([
                ort::execution_providers::DirectMLExecutionProvider::default().build(),
            ])?
            .commit_from_memory(model_data)?;

        let input_name = session.inputs[0].name.to_string();
        let output_name = session.outputs[0].name.to_string();
        log::debug(&format!(
            "session ready, input '{}', output '{}'",
            input_name, output_name
        ));

        let tile = self.tile_size;
        let tiles_x = width.div_ceil(tile);
        let tiles_y = height.div_ceil(tile);
        let total = (tiles_x as u64) * (tiles_y as u64);

        let out_width = width * scale;
        let out_height = height * scale;
        let mut out = vec![0u32; out_width as usize * out_height as usize];

        progress.report(0.0, INDETERMINATE_TIME);
        let started = Instant::now();
        let mut done = 0u64;

        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                // core region this tile is responsible for
                let x0 = tx * tile;
                let y0 = ty * tile;
                let x1 = (x0 + tile).min(width);
                let y1 = (y0 + tile).min(height);
                // expanded region fed to the model, clamped to the image
                let ex0 = x0.saturating_sub(TILE_OVERLAP);
                let ey0 = y0.saturating_sub(TILE_OVERLAP);
                let ex1 = (x1 + TILE_OVERLAP).min(width);
                let ey1 = (y1 + TILE_OVERLAP).min(height);
                let ew = ex1 - ex0;
                let eh = ey1 - ey0;

                let tensor = pack_tile(input, width, ex0, ey0, ew, eh);
                let input_value = Value::from_array(tensor)?;
                let outputs = session.run(ort::inputs![input_name.as_str() => input_value])?;
                let (output_shape, output_data) =
                    outputs[output_name.as_str()].try_extract_tensor::<f32>()?;

                let shape = output_shape.as_ref().to_vec();
                if shape.len() != 4
                    || shape[1] != 3
                    || shape[2] as u32 != eh * scale
                    || shape[3] as u32 != ew * scale
                {
                    return Err(anyhow!(
                        "unexpected output shape {:?} for a {}x{} tile at scale {}",
                        shape,
                        ew,
                        eh,
                        scale
                    ));
                }

                // paste only the core region, dropping the overlap margin
                let tile_w = (ew * scale) as usize;
                let tile_h = (eh * scale) as usize;
                let plane = tile_w * tile_h;
                let off_x = (x0 - ex0) * scale;
                let off_y = (y0 - ey0) * scale;
                for y in 0..(y1 - y0) * scale {
                    let src_row = (off_y + y) as usize * tile_w;
                    let dest_row = (y0 * scale + y) as usize * out_width as usize;
                    for x in 0..(x1 - x0) * scale {
                        let src = src_row + (off_x + x) as usize;
                        let r = to_channel(output_data[src]);
                        let g = to_channel(output_data[plane + src]);
                        let b = to_channel(output_data[2 * plane + src]);
                        out[dest_row + (x0 * scale + x) as usize] =
                            0xFF00_0000 | ((r as u32) << 16) | ((g as u32) << 8) | b as u32;
                    }
                }

                done += 1;
                let elapsed = started.elapsed().as_millis() as u64;
                let estimate = if elapsed == 0 {
                    INDETERMINATE_TIME
                } else {
                    ((elapsed / done) * (total - done)) as i64
                };
                progress.report(done as f32 / total as f32 * 100.0, estimate);
            }
        }

        Ok(out)
    }
}

/// Normalize a packed ARGB region into a `[1, 3, h, w]` tensor in `[0, 1]`.
fn pack_tile(input: &[u32], stride: u32, x0: u32, y0: u32, w: u32, h: u32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for y in 0..h {
        for x in 0..w {
            let p = input[((y0 + y) * stride + (x0 + x)) as usize];
            tensor[[0, 0, y as usize, x as usize]] = ((p >> 16) & 0xFF) as f32 / 255.0;
            tensor[[0, 1, y as usize, x as usize]] = ((p >> 8) & 0xFF) as f32 / 255.0;
            tensor[[0, 2, y as usize, x as usize]] = (p & 0xFF) as f32 / 255.0;
        }
    }
    tensor
}

fn to_channel(value: f32) -> u8 {
    (value * 255.0).clamp(0.0, 255.0) as u8
}

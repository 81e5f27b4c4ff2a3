//! Model and output format catalogs, plus the model payload store.
//!
//! Both sets are closed and small; behavior hangs off the variant through
//! plain method lookup tables rather than any plugin mechanism.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpscalingModel {
    X2Plus,
    X4Plus,
    X4General,
    X4Anime,
}

impl UpscalingModel {
    pub const VALUES: [UpscalingModel; 4] = [
        UpscalingModel::X2Plus,
        UpscalingModel::X4Plus,
        UpscalingModel::X4General,
        UpscalingModel::X4Anime,
    ];

    /// Stable identifier, also the payload file stem.
    pub fn id(self) -> &'static str {
        match self {
            UpscalingModel::X2Plus => "realesrgan-x2plus",
            UpscalingModel::X4Plus => "realesrgan-x4plus",
            UpscalingModel::X4General => "realesr-general-x4",
            UpscalingModel::X4Anime => "apisr-grl-x4",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UpscalingModel::X2Plus => "General photo",
            UpscalingModel::X4Plus => "General photo (quality)",
            UpscalingModel::X4General => "General purpose",
            UpscalingModel::X4Anime => "Drawings & anime",
        }
    }

    pub fn scale(self) -> u32 {
        match self {
            UpscalingModel::X2Plus => 2,
            UpscalingModel::X4Plus => 4,
            UpscalingModel::X4General => 4,
            UpscalingModel::X4Anime => 4,
        }
    }

    pub fn download_url(self) -> &'static str {
        match self {
            UpscalingModel::X2Plus => {
                "https://huggingface.co/TensorStack/Upscale-amuse/resolve/main/RealESRGAN-2x/model.onnx"
            }
            UpscalingModel::X4Plus => {
                "https://huggingface.co/TensorStack/Upscale-amuse/resolve/main/RealESRGAN-4x/model.onnx"
            }
            UpscalingModel::X4General => {
                "https://huggingface.co/TensorStack/Upscale-amuse/resolve/main/RealESR-General-4x/model.onnx"
            }
            UpscalingModel::X4Anime => {
                "https://huggingface.co/Xenova/4x_APISR_GRL_GAN_generator-onnx/resolve/main/onnx/model.onnx"
            }
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::VALUES.iter().copied().find(|m| m.id() == id)
    }
}

impl std::fmt::Display for UpscalingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}x)", self.label(), self.scale())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    pub const VALUES: [OutputFormat; 2] = [OutputFormat::Png, OutputFormat::Jpeg];

    pub fn id(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    pub fn format_name(self) -> &'static str {
        match self {
            OutputFormat::Png => "PNG",
            OutputFormat::Jpeg => "JPEG",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.format_name())
    }
}

/// Supplies raw model bytes for one attempt. The orchestrator treats the
/// payload as opaque and caches nothing beyond the attempt's lifetime.
pub trait ModelPayloadStore: Send + Sync {
    fn load(&self, model: UpscalingModel) -> anyhow::Result<Vec<u8>>;
}

/// Payload store backed by a directory of `.onnx` files, fetching missing
/// payloads from the model's published URL on first use.
pub struct DiskModelStore {
    models_dir: PathBuf,
}

impl DiskModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    fn payload_path(&self, model: UpscalingModel) -> PathBuf {
        self.models_dir.join(format!("{}.onnx", model.id()))
    }
}

impl ModelPayloadStore for DiskModelStore {
    fn load(&self, model: UpscalingModel) -> anyhow::Result<Vec<u8>> {
        let path = self.payload_path(model);
        if !path.exists() {
            log::info(&format!(
                "model {} not found locally, downloading",
                model.id()
            ));
            download_payload(model.download_url(), &path)?;
        }
        Ok(fs::read(&path)?)
    }
}

fn download_payload(url: &str, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(600))
        .user_agent("superscale/0.1")
        .build()?;

    log::info(&format!("downloading from {}", url));
    let mut response = client.get(url).send()?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {} for {}", response.status(), url);
    }

    let tmp = path.with_extension("part");
    let mut out = fs::File::create(&tmp)?;
    io::copy(&mut response, &mut out)?;
    fs::rename(&tmp, path)?;

    log::info(&format!("model saved to {}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_lookup_round_trips() {
        for model in UpscalingModel::VALUES {
            assert_eq!(UpscalingModel::from_id(model.id()), Some(model));
        }
        assert_eq!(UpscalingModel::from_id("waifu2x"), None);
    }

    #[test]
    fn test_model_scales() {
        assert_eq!(UpscalingModel::X2Plus.scale(), 2);
        assert_eq!(UpscalingModel::X4Plus.scale(), 4);
        assert_eq!(UpscalingModel::X4General.scale(), 4);
        assert_eq!(UpscalingModel::X4Anime.scale(), 4);
    }

    #[test]
    fn test_format_lookup_accepts_aliases() {
        assert_eq!(OutputFormat::from_id("png"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::from_id("JPEG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_id("jpg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_id("webp"), None);
    }

    #[test]
    fn test_format_extensions() {
        assert_eq!(OutputFormat::Png.extension(), "png");
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn test_disk_store_reads_existing_payload_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realesrgan-x4plus.onnx");
        fs::write(&path, b"payload bytes").unwrap();

        let store = DiskModelStore::new(dir.path());
        let bytes = store.load(UpscalingModel::X4Plus).unwrap();
        assert_eq!(bytes, b"payload bytes");
    }
}

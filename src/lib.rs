//! Neural super-resolution upscaling, orchestrated one attempt at a time.
//!
//! The pipeline: an input image is packed into a flat ARGB buffer
//! ([`codec`]), pushed through a blocking inference backend ([`engine`])
//! that reports through a shared progress cell ([`progress`]), and the
//! result is written back out as an image file ([`output`]). The
//! [`task::UpscalingTask`] state machine ties it together: it runs the
//! blocking work off the interaction context, exposes snapshots that
//! observers can poll or subscribe to, and supports cooperative
//! cancellation and explicit consumption of terminal results.

pub mod codec;
pub mod engine;
pub mod error;
pub mod log;
pub mod models;
pub mod output;
pub mod progress;
pub mod task;

pub use codec::InputImage;
pub use engine::{InferenceEngine, OrtEngine};
pub use error::{Error, Result};
pub use models::{DiskModelStore, ModelPayloadStore, OutputFormat, UpscalingModel};
pub use progress::{
    ProgressSnapshot, ProgressTracker, INDETERMINATE_PROGRESS, INDETERMINATE_TIME,
};
pub use task::{TaskConfig, TaskInputData, TaskProgress, TaskSnapshot, UpscalingTask};

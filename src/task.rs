//! Lifecycle of one upscaling attempt.
//!
//! `UpscalingTask` owns a single shared state slot holding the latest
//! `(input, progress)` pair. Observers poll or subscribe; terminal states
//! persist until explicitly consumed, so a result is never lost because
//! nobody was listening when the backend finished. Cancellation is
//! cooperative: the blocking backend call is never killed, its eventual
//! result is discarded when the generation it started under has moved on.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::codec;
use crate::engine::InferenceEngine;
use crate::error::{Error, Result};
use crate::log;
use crate::models::{ModelPayloadStore, OutputFormat, UpscalingModel};
use crate::output;
use crate::progress::{ProgressSnapshot, ProgressTracker, INDETERMINATE_PROGRESS, INDETERMINATE_TIME};

/// Immutable description of one attempt; fully determines its reproduction.
#[derive(Debug, Clone)]
pub struct TaskInputData {
    pub original_file_name: String,
    pub source_path: PathBuf,
    pub output_format: OutputFormat,
    pub model: UpscalingModel,
}

/// Progress of the current attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskProgress {
    Running {
        progress: f32,
        estimated_millis_left: i64,
    },
    Success {
        output_path: PathBuf,
        execution_millis: u64,
    },
    Failed,
    Cancelled,
}

impl TaskProgress {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskProgress::Running { .. })
    }
}

/// The latest `(input, progress)` pair. Progress is meaningless without
/// the input that produced it, so the two are only ever exposed together.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub input: TaskInputData,
    pub progress: TaskProgress,
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub output_dir: PathBuf,
    /// Maximum wall-clock duration for one attempt. On expiry the task
    /// fails and the backend call is abandoned; the backend may hold its
    /// resources until the call returns on its own.
    pub watchdog: Option<Duration>,
}

impl TaskConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            watchdog: None,
        }
    }
}

/// Orchestrates one cancellable, progress-reporting upscaling attempt at a
/// time. All operations are non-blocking for the caller; `start` must be
/// called from within a tokio runtime.
pub struct UpscalingTask {
    engine: Arc<dyn InferenceEngine>,
    store: Arc<dyn ModelPayloadStore>,
    config: TaskConfig,
    state: Arc<watch::Sender<Option<TaskSnapshot>>>,
    generation: Arc<AtomicU64>,
}

impl UpscalingTask {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        store: Arc<dyn ModelPayloadStore>,
        config: TaskConfig,
    ) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            engine,
            store,
            config,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a new attempt. Rejected while one is running, and while an
    /// unconsumed success is held so a finished artifact is never silently
    /// overwritten. A failed or cancelled attempt may be retried directly
    /// by starting again with the retained input.
    pub fn start(&self, input: TaskInputData) -> Result<()> {
        let mut attempt = 0;
        let mut rejected = None;

        self.state.send_if_modified(|slot| match slot {
            Some(s) if !s.progress.is_terminal() => {
                rejected = Some(Error::TaskAlreadyRunning);
                false
            }
            Some(s) if matches!(s.progress, TaskProgress::Success { .. }) => {
                rejected = Some(Error::UnconsumedResult);
                false
            }
            _ => {
                attempt = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *slot = Some(TaskSnapshot {
                    input: input.clone(),
                    progress: TaskProgress::Running {
                        progress: INDETERMINATE_PROGRESS,
                        estimated_millis_left: INDETERMINATE_TIME,
                    },
                });
                true
            }
        });
        if let Some(e) = rejected {
            return Err(e);
        }

        let tracker = ProgressTracker::new();
        self.spawn_forwarder(attempt, tracker.subscribe());
        self.spawn_worker(attempt, input, tracker);
        if let Some(limit) = self.config.watchdog {
            self.spawn_watchdog(attempt, limit);
        }
        Ok(())
    }

    /// Cooperative cancel: bumps the generation so the in-flight result is
    /// discarded when the backend returns, and resolves the attempt
    /// immediately. Idempotent; a no-op outside `Running`.
    pub fn cancel(&self) {
        self.state.send_if_modified(|slot| match slot.as_mut() {
            Some(s) if !s.progress.is_terminal() => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                s.progress = TaskProgress::Cancelled;
                log::info(&format!("cancelled upscaling of {}", s.input.original_file_name));
                true
            }
            _ => false,
        });
    }

    /// Clear a terminal state back to idle. Idempotent; never discards a
    /// running attempt.
    pub fn consume(&self) {
        self.state.send_if_modified(|slot| match slot {
            Some(s) if s.progress.is_terminal() => {
                *slot = None;
                true
            }
            _ => false,
        });
    }

    /// Non-blocking read of the latest state, `None` while idle.
    pub fn snapshot(&self) -> Option<TaskSnapshot> {
        self.state.borrow().clone()
    }

    /// Change-notified state reads for observers that attach and detach
    /// freely; the current value is always immediately available.
    pub fn subscribe(&self) -> watch::Receiver<Option<TaskSnapshot>> {
        self.state.subscribe()
    }

    fn spawn_forwarder(&self, attempt: u64, mut updates: watch::Receiver<ProgressSnapshot>) {
        let state = self.state.clone();
        let generation = self.generation.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                if generation.load(Ordering::SeqCst) != attempt {
                    break;
                }
                let snap = *updates.borrow_and_update();
                state.send_if_modified(|slot| {
                    if generation.load(Ordering::SeqCst) != attempt {
                        return false;
                    }
                    match slot.as_mut() {
                        Some(s) if !s.progress.is_terminal() => {
                            s.progress = TaskProgress::Running {
                                progress: snap.progress,
                                estimated_millis_left: snap.estimated_millis_left,
                            };
                            true
                        }
                        _ => false,
                    }
                });
            }
        });
    }

    fn spawn_worker(&self, attempt: u64, input: TaskInputData, tracker: ProgressTracker) {
        let engine = self.engine.clone();
        let store = self.store.clone();
        let output_dir = self.config.output_dir.clone();
        let state = self.state.clone();
        let generation = self.generation.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let attempt_input = input.clone();
            let joined = tokio::task::spawn_blocking(move || {
                run_attempt(
                    &attempt_input,
                    engine.as_ref(),
                    store.as_ref(),
                    &output_dir,
                    &tracker,
                )
            })
            .await;

            let outcome = match joined {
                Ok(Ok(output_path)) => TaskProgress::Success {
                    output_path,
                    execution_millis: started.elapsed().as_millis() as u64,
                },
                Ok(Err(e)) => {
                    log::error(&format!(
                        "upscaling {} failed: {}",
                        input.original_file_name, e
                    ));
                    TaskProgress::Failed
                }
                Err(e) => {
                    log::error(&format!("upscaling worker panicked: {}", e));
                    TaskProgress::Failed
                }
            };

            let applied = state.send_if_modified(|slot| {
                if generation.load(Ordering::SeqCst) != attempt {
                    return false;
                }
                match slot.as_mut() {
                    Some(s) if !s.progress.is_terminal() => {
                        s.progress = outcome.clone();
                        true
                    }
                    _ => false,
                }
            });
            if !applied {
                log::debug(&format!(
                    "discarding stale result for {}",
                    input.original_file_name
                ));
            }
        });
    }

    fn spawn_watchdog(&self, attempt: u64, limit: Duration) {
        let state = self.state.clone();
        let generation = self.generation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let expired = state.send_if_modified(|slot| {
                if generation
                    .compare_exchange(attempt, attempt + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return false;
                }
                match slot.as_mut() {
                    Some(s) if !s.progress.is_terminal() => {
                        s.progress = TaskProgress::Failed;
                        true
                    }
                    _ => false,
                }
            });
            if expired {
                log::warn(&format!(
                    "attempt exceeded {:?}, abandoning the backend call",
                    limit
                ));
            }
        });
    }
}

/// The whole blocking pipeline for one attempt. Every failure folds into
/// the `Failed` terminal state at the join point; nothing escapes to the
/// foreground context.
fn run_attempt(
    input: &TaskInputData,
    engine: &dyn InferenceEngine,
    store: &dyn ModelPayloadStore,
    output_dir: &Path,
    tracker: &ProgressTracker,
) -> Result<PathBuf> {
    log::info(&format!(
        "upscaling {} with {} to {}",
        input.original_file_name,
        input.model.id(),
        input.output_format.format_name()
    ));

    let (buffer, width, height) = codec::encode_file(&input.source_path)?;
    let payload = store.load(input.model).map_err(Error::ModelPayload)?;

    let scale = input.model.scale();
    let result = engine
        .run_upscaling(&payload, scale, &buffer, width, height, tracker)
        .ok_or(Error::InferenceFailed)?;

    let out_width = width * scale;
    let out_height = height * scale;
    let expected = out_width as usize * out_height as usize;
    if result.len() != expected {
        log::error(&format!(
            "backend produced {} pixels, expected {}",
            result.len(),
            expected
        ));
        return Err(Error::InferenceFailed);
    }

    output::materialize(
        &result,
        out_width,
        out_height,
        input.output_format,
        output_dir,
        &input.original_file_name,
        scale,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullEngine;

    impl InferenceEngine for NullEngine {
        fn run_upscaling(
            &self,
            _model_data: &[u8],
            _scale: u32,
            _input: &[u32],
            _width: u32,
            _height: u32,
            _progress: &ProgressTracker,
        ) -> Option<Vec<u32>> {
            None
        }
    }

    struct EmptyStore;

    impl ModelPayloadStore for EmptyStore {
        fn load(&self, _model: UpscalingModel) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn idle_task() -> UpscalingTask {
        UpscalingTask::new(
            Arc::new(NullEngine),
            Arc::new(EmptyStore),
            TaskConfig::new("./upscaled"),
        )
    }

    #[test]
    fn test_idle_task_has_no_snapshot() {
        assert!(idle_task().snapshot().is_none());
    }

    #[test]
    fn test_cancel_on_idle_is_a_no_op() {
        let task = idle_task();
        task.cancel();
        task.cancel();
        assert!(task.snapshot().is_none());
    }

    #[test]
    fn test_consume_on_idle_is_a_no_op() {
        let task = idle_task();
        task.consume();
        assert!(task.snapshot().is_none());
    }

    #[test]
    fn test_terminal_predicate() {
        assert!(TaskProgress::Failed.is_terminal());
        assert!(TaskProgress::Cancelled.is_terminal());
        assert!(TaskProgress::Success {
            output_path: PathBuf::from("out.png"),
            execution_millis: 10
        }
        .is_terminal());
        assert!(!TaskProgress::Running {
            progress: 10.0,
            estimated_millis_left: 100
        }
        .is_terminal());
    }
}

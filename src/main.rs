use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Parser;

use superscale::{
    log, DiskModelStore, InputImage, OrtEngine, OutputFormat, TaskConfig, TaskInputData,
    TaskProgress, UpscalingModel, UpscalingTask,
};

#[derive(Parser)]
#[command(name = "superscale", about = "Neural super-resolution image upscaler")]
struct Args {
    /// Image to upscale
    input: Option<PathBuf>,

    /// Model id, see --list-models
    #[arg(long, default_value = "realesrgan-x4plus")]
    model: String,

    /// Output format: png or jpeg
    #[arg(long, default_value = "png")]
    format: String,

    /// Directory holding (or receiving) model payloads
    #[arg(long, default_value = "./models")]
    models_dir: PathBuf,

    /// Directory the upscaled image is written to
    #[arg(long, default_value = "./upscaled")]
    output_dir: PathBuf,

    /// Give up on the attempt after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// List the available models and exit
    #[arg(long)]
    list_models: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    log::init(Some(PathBuf::from("superscale.log")), args.debug);

    if args.list_models {
        for model in UpscalingModel::VALUES {
            println!("{:<22} {}", model.id(), model);
        }
        return Ok(());
    }

    let input_path = args
        .input
        .ok_or_else(|| anyhow!("no input image given, see --help"))?;
    let model = UpscalingModel::from_id(&args.model)
        .ok_or_else(|| anyhow!("unknown model '{}', see --list-models", args.model))?;
    let format = OutputFormat::from_id(&args.format)
        .ok_or_else(|| anyhow!("unknown output format '{}', expected png or jpeg", args.format))?;

    let image = InputImage::load(&input_path)?;
    println!("{}: {}x{}", image.file_name, image.width, image.height);
    println!(
        "upscaling to {}x{} ({}) with {}",
        image.width * model.scale(),
        image.height * model.scale(),
        format.format_name(),
        model
    );

    let task = UpscalingTask::new(
        Arc::new(OrtEngine::new()),
        Arc::new(DiskModelStore::new(&args.models_dir)),
        TaskConfig {
            output_dir: args.output_dir.clone(),
            watchdog: args.timeout_secs.map(Duration::from_secs),
        },
    );

    task.start(TaskInputData {
        original_file_name: image.file_name.clone(),
        source_path: input_path,
        output_format: format,
        model,
    })?;
    println!("processing... (Ctrl-C cancels)");

    let mut updates = task.subscribe();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    bail!("task state channel closed");
                }
                let snapshot = updates.borrow_and_update().clone();
                let Some(snapshot) = snapshot else { continue };
                match snapshot.progress {
                    TaskProgress::Running { progress, estimated_millis_left } => {
                        if progress < 0.0 {
                            println!("processing...");
                        } else if estimated_millis_left < 0 {
                            println!("{:>5.1}%", progress.min(100.0));
                        } else {
                            println!(
                                "{:>5.1}%  about {} left",
                                progress.min(100.0),
                                format_period(estimated_millis_left)
                            );
                        }
                    }
                    TaskProgress::Success { output_path, execution_millis } => {
                        println!(
                            "done in {}: {}",
                            format_period(execution_millis as i64),
                            output_path.display()
                        );
                        task.consume();
                        return Ok(());
                    }
                    TaskProgress::Failed => {
                        task.consume();
                        bail!(
                            "upscaling {} failed, see superscale.log for details",
                            snapshot.input.original_file_name
                        );
                    }
                    TaskProgress::Cancelled => {
                        println!("cancelled");
                        task.consume();
                        return Ok(());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                task.cancel();
            }
        }
    }
}

fn format_period(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

use anyhow::{bail, Context};
use camera_recorder::capture::native::NativeBackend;
use camera_recorder::capture::traits::{LiveSource, PreviewTarget, ViewportSize};
use camera_recorder::recorder::artifact_file_name;
use camera_recorder::{init, CaptureArbiter, RecorderConfig, RecorderInit, RecordingEvent, SizeLimit};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "camera-recorder")]
#[command(about = "Record the camera and microphone into an MP4/WebM file")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Viewport the capture orientation is chosen for, as WIDTHxHEIGHT
    #[arg(long, global = true, default_value = "1280x720")]
    viewport: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras and microphones
    Devices,

    /// Record until the duration or the size limit is reached
    Record {
        /// Camera id (from 'devices'); default camera when omitted
        #[arg(long)]
        camera: Option<String>,

        /// Microphone id (from 'devices'); default microphone when omitted
        #[arg(long)]
        microphone: Option<String>,

        /// Maximum duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Stop once the recording grows past this many bytes
        #[arg(long, default_value = "2000000")]
        max_bytes: u64,

        /// Directory the recording is written to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

/// Preview target without a window
struct HeadlessPreview {
    viewport: ViewportSize,
}

impl PreviewTarget for HeadlessPreview {
    fn viewport(&self) -> ViewportSize {
        self.viewport
    }

    fn attach(&self, source: Arc<dyn LiveSource>) {
        tracing::debug!("Preview attached to {}", source.id());
    }

    fn detach(&self) {}

    fn show_unsupported(&self, message: &str) {
        eprintln!("{}", message);
    }
}

fn parse_viewport(value: &str) -> anyhow::Result<ViewportSize> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("viewport must look like 1280x720, got {value}"))?;
    Ok(ViewportSize::new(w.trim().parse()?, h.trim().parse()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    camera_recorder::init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::default(),
    };
    let preview = Arc::new(HeadlessPreview {
        viewport: parse_viewport(&cli.viewport)?,
    });
    let params = RecorderInit::new(preview, Arc::new(NativeBackend::new()), Arc::new(CaptureArbiter::new()))
        .with_unsupported_message("Camera recording is not supported on this machine")
        .with_config(config);
    let recorder = init(params).await?;

    if !recorder.camera_supported() {
        bail!("no usable camera and microphone found");
    }

    match cli.command {
        Commands::Devices => {
            let catalog = recorder.list_devices().await;
            if !catalog.success {
                bail!("could not list devices (permission denied?)");
            }
            println!("Cameras:");
            for device in &catalog.video_devices {
                println!("  {:<24} {}", format!("'{}'", device.id), device.label);
            }
            println!("Microphones:");
            for device in &catalog.audio_devices {
                println!("  {:<24} {}", format!("'{}'", device.id), device.label);
            }
        }
        Commands::Record {
            camera,
            microphone,
            duration,
            max_bytes,
            output,
        } => {
            if let Some(id) = camera {
                recorder.set_video_device_id(&id).await?;
            }
            if let Some(id) = microphone {
                recorder.set_audio_device_id(&id).await?;
            }

            if !recorder.start_preview().await {
                bail!("failed to open the camera");
            }
            let mut events = recorder.subscribe();
            if !recorder.start_recording().await {
                recorder.stop_preview().await;
                bail!("failed to start recording");
            }

            let limit = SizeLimit::new(max_bytes);
            let deadline = tokio::time::sleep(Duration::from_secs(duration));
            tokio::pin!(deadline);
            println!("Recording for up to {duration}s or {max_bytes} bytes, Ctrl+C to stop");

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(RecordingEvent::Progress { total_size }) => {
                            if limit.exceeded(total_size) {
                                println!("Size limit reached ({total_size} bytes)");
                                break;
                            }
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            let media = recorder.stop_recording().await;
            recorder.stop_preview().await;
            if media.is_empty() {
                bail!("the recording is empty");
            }

            tokio::fs::create_dir_all(&output).await?;
            let path = output.join(artifact_file_name(&media.mime_type, chrono::Local::now()));
            tokio::fs::write(&path, &media.data)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Saved {} ({} bytes, {})", path.display(), media.len(), media.mime_type);
        }
    }

    Ok(())
}

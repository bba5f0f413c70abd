//! Camera Recorder - camera and microphone capture, normalized and recorded.
//!
//! Opens a camera+microphone source whose orientation matches the viewport,
//! composites it onto a 9:16 or 16:9 surface and records that surface in
//! 100 ms chunks. At most one recorder per process holds the camera.

pub mod capture;
pub mod config;
pub mod handle;
pub mod recorder;
pub mod utils;

pub use config::{HotSwapPolicy, RecorderConfig};
pub use handle::{init, RecorderHandle, RecorderInit};
pub use recorder::{CaptureArbiter, CaptureState, RecordedMedia, RecordingEvent, SizeLimit};
pub use utils::error::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camera_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

//! Recording state management
//!
//! Defines the capture state machine, acquisition requests and the
//! artifacts handed back to callers.

use crate::capture::traits::{
    AudioConstraints, DeviceSelector, FacingMode, FrameSize, MediaConstraints, VideoConstraints,
};
use crate::config::RecorderConfig;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// No live source
    #[default]
    Idle,
    /// Waiting for the platform to open devices
    Acquiring,
    /// Waiting for delivered geometry and checking orientation
    Normalizing,
    /// Live source, surface and encoder are bound
    Ready,
    /// Encoding
    Recording,
    /// Finalizing a recording or releasing the live source
    Stopping,
    /// Acquisition failed; settles back to Idle
    Failed,
}

impl CaptureState {
    /// A live source is bound
    pub fn has_source(&self) -> bool {
        matches!(self, CaptureState::Ready | CaptureState::Recording | CaptureState::Stopping)
    }
}

/// Parameters of one acquisition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    /// Explicit capture size. Only the orientation retry sets this;
    /// otherwise the size is derived from the viewport.
    pub desired_size: Option<FrameSize>,

    /// Ideal frame rate; zero uses the configured rate
    pub frame_rate: u32,

    /// Selected camera; empty lets the facing hint decide
    pub video_device_id: String,

    /// Selected microphone; empty lets the platform decide
    pub audio_device_id: String,

    pub facing: FacingMode,
}

impl CaptureRequest {
    pub fn with_devices(video_device_id: impl Into<String>, audio_device_id: impl Into<String>) -> Self {
        Self {
            video_device_id: video_device_id.into(),
            audio_device_id: audio_device_id.into(),
            ..Self::default()
        }
    }

    /// Platform constraints for capturing at `size`
    pub fn constraints(&self, config: &RecorderConfig, size: FrameSize) -> MediaConstraints {
        let frame_rate = if self.frame_rate > 0 {
            self.frame_rate
        } else {
            config.frame_rate
        };
        let audio = &config.audio;

        MediaConstraints {
            video: VideoConstraints {
                width: size.width,
                height: size.height,
                frame_rate,
                max_frame_rate: frame_rate,
                device: DeviceSelector::from_id(&self.video_device_id, DeviceSelector::Facing(self.facing)),
            },
            audio: AudioConstraints {
                device: DeviceSelector::from_id(&self.audio_device_id, DeviceSelector::Default),
                echo_cancellation: audio.echo_cancellation,
                noise_suppression: audio.noise_suppression,
                auto_gain_control: audio.auto_gain_control,
                sample_rate: audio.sample_rate,
                sample_size: audio.sample_size,
                channel_count: audio.channel_count,
            },
        }
    }
}

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    /// Recording started
    Started,
    /// A chunk was appended; running total in bytes
    Progress { total_size: u64 },
    /// Recording finalized
    Stopped { total_size: u64 },
    /// Recording torn down without an artifact (pre-emption, hot-swap)
    Aborted,
}

/// Final artifact of a recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMedia {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl RecordedMedia {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension matching the MIME type
    pub fn extension(&self) -> &'static str {
        extension_for(&self.mime_type)
    }
}

/// `mp4` for the MP4 family, `webm` for everything else
pub fn extension_for(mime_type: &str) -> &'static str {
    if mime_type.starts_with("video/mp4") {
        "mp4"
    } else {
        "webm"
    }
}

/// `video_<date>_<time>_<random>.<ext>` for saving an artifact
pub fn artifact_file_name(mime_type: &str, recorded_at: DateTime<Local>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "video_{}_{}.{}",
        recorded_at.format("%Y-%m-%d_%H-%M-%S"),
        &random[..6],
        extension_for(mime_type)
    )
}

/// Byte budget a caller enforces on a running recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimit {
    pub max_bytes: u64,
}

impl SizeLimit {
    pub const fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn exceeded(&self, total_size: u64) -> bool {
        total_size > self.max_bytes
    }

    pub fn remaining(&self, total_size: u64) -> u64 {
        self.max_bytes.saturating_sub(total_size)
    }
}

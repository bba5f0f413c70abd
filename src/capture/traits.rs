//! Capture trait definitions
//!
//! Platform-agnostic traits for the camera/microphone host, the preview
//! target and the encoder.

use crate::recorder::compositor::RenderSurface;
use crate::utils::error::RecorderResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Decoded RGBA frame delivered by a video track
pub type VideoFrame = image::RgbaImage;

/// Sender half handed to an encoder for its data-available events
pub type ChunkSender = mpsc::UnboundedSender<Vec<u8>>;

/// Pixel dimensions of a frame or surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; zero-height sizes report 0
    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn is_portrait(&self) -> bool {
        self.aspect() < 1.0
    }

    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Window/viewport geometry of the preview target, in CSS-like pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// What a host is able to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Camera/microphone acquisition is available
    pub capture: bool,
    /// Device enumeration is available
    pub enumerate: bool,
}

/// Kind of a media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// A device as reported by raw enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

impl MediaDeviceInfo {
    pub fn new(device_id: impl Into<String>, kind: DeviceKind, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            label: label.into(),
        }
    }
}

/// Camera facing hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// How a track's device is chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceSelector {
    /// Let the platform pick
    Default,
    /// Any device facing the given way
    Facing(FacingMode),
    /// Exactly this device
    Exact(String),
}

impl DeviceSelector {
    /// Empty ids fall back to `fallback`, anything else is an exact match
    pub fn from_id(id: &str, fallback: DeviceSelector) -> Self {
        if id.is_empty() {
            fallback
        } else {
            DeviceSelector::Exact(id.to_string())
        }
    }

    pub fn exact_id(&self) -> Option<&str> {
        match self {
            DeviceSelector::Exact(id) => Some(id),
            _ => None,
        }
    }
}

/// Requested video track properties. Sizes and frame rate are ideals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub max_frame_rate: u32,
    pub device: DeviceSelector,
}

/// Requested audio track properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    pub device: DeviceSelector,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub sample_size: u16,
    pub channel_count: u16,
}

/// Full acquisition request handed to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: VideoConstraints,
    pub audio: AudioConstraints,
}

/// Identity of an open track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    /// Concrete device the platform chose
    pub device_id: String,
    pub label: String,
}

/// An open microphone track. Samples are interleaved f32.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub info: TrackInfo,
    pub sample_rate: u32,
    pub channels: u16,
    samples: broadcast::Sender<Arc<Vec<f32>>>,
}

impl AudioTrack {
    pub fn new(info: TrackInfo, sample_rate: u32, channels: u16) -> Self {
        let (samples, _) = broadcast::channel(64);
        Self {
            info,
            sample_rate,
            channels,
            samples,
        }
    }

    /// Deliver a block of samples to every subscriber
    pub fn publish(&self, block: Vec<f32>) {
        let _ = self.samples.send(Arc::new(block));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<f32>>> {
        self.samples.subscribe()
    }
}

/// An open camera+microphone handle
#[async_trait]
pub trait LiveSource: Send + Sync {
    fn id(&self) -> &str;

    fn video_track(&self) -> Option<&TrackInfo>;

    fn audio_track(&self) -> Option<&AudioTrack>;

    /// Resolves once frame geometry is known, returning the geometry
    /// currently delivered. Later calls observe rotations applied since.
    async fn loaded_metadata(&self) -> RecorderResult<FrameSize>;

    /// Most recent decoded frame, if any
    fn latest_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Stop every track. Idempotent.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// On-screen preview the live source is bound to
pub trait PreviewTarget: Send + Sync {
    /// Current window/viewport geometry
    fn viewport(&self) -> ViewportSize;

    fn attach(&self, source: Arc<dyn LiveSource>);

    fn detach(&self);

    /// Shown when the host cannot capture at all
    fn show_unsupported(&self, message: &str);
}

/// Everything an encoder is bound to
#[derive(Clone)]
pub struct EncoderSettings {
    pub mime_type: String,
    pub video_bits_per_second: u32,
    pub audio_bits_per_second: u32,
    /// Rate at which the surface is sampled
    pub frame_rate: u32,
    pub surface: Arc<RenderSurface>,
    pub audio: Option<AudioTrack>,
}

impl std::fmt::Debug for EncoderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSettings")
            .field("mime_type", &self.mime_type)
            .field("video_bits_per_second", &self.video_bits_per_second)
            .field("audio_bits_per_second", &self.audio_bits_per_second)
            .field("frame_rate", &self.frame_rate)
            .field("surface", &self.surface.size())
            .field("audio", &self.audio.as_ref().map(|a| &a.info))
            .finish()
    }
}

/// Encoder driven by an encode session. May be started again after `stop`.
#[async_trait]
pub trait MediaEncoder: Send {
    fn mime_type(&self) -> &str;

    /// Begin encoding, sending data every `timeslice`
    fn start(&mut self, timeslice: Duration, sink: ChunkSender) -> RecorderResult<()>;

    /// Finalize. Resolves after the last chunk was sent and the sender dropped.
    async fn stop(&mut self) -> RecorderResult<()>;

    /// Tear down without finalizing
    fn abort(&mut self) {}
}

/// Camera/microphone host
#[async_trait]
pub trait MediaBackend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn enumerate_devices(&self) -> RecorderResult<Vec<MediaDeviceInfo>>;

    async fn open(&self, constraints: &MediaConstraints) -> RecorderResult<Arc<dyn LiveSource>>;

    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn create_encoder(&self, settings: EncoderSettings) -> RecorderResult<Box<dyn MediaEncoder>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_orientation() {
        assert!(FrameSize::new(720, 1280).is_portrait());
        assert!(!FrameSize::new(1280, 720).is_portrait());
        assert!(!FrameSize::new(640, 640).is_portrait());
        assert_eq!(FrameSize::new(640, 360).swapped(), FrameSize::new(360, 640));
        assert_eq!(FrameSize::new(10, 0).aspect(), 0.0);
    }

    #[test]
    fn test_selector_from_id() {
        assert_eq!(
            DeviceSelector::from_id("", DeviceSelector::Facing(FacingMode::User)),
            DeviceSelector::Facing(FacingMode::User)
        );
        assert_eq!(
            DeviceSelector::from_id("cam-2", DeviceSelector::Default),
            DeviceSelector::Exact("cam-2".to_string())
        );
    }
}

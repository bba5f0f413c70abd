//! Native capture host
//!
//! nokhwa cameras, cpal microphones and an ffmpeg encoder.

mod audio;
mod camera;
mod encoder;

pub use audio::{list_microphones, MicStream};
pub use camera::{list_cameras, CameraStream};
pub use encoder::{profile_for, EncoderProfile, FfmpegEncoder};

use crate::capture::traits::{
    AudioTrack, Capabilities, EncoderSettings, FrameSize, LiveSource, MediaBackend, MediaConstraints,
    MediaDeviceInfo, MediaEncoder, TrackInfo, VideoFrame,
};
use crate::utils::error::{RecorderError, RecorderResult};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Host backed by the machine's real devices
#[derive(Debug, Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaBackend for NativeBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            capture: true,
            enumerate: true,
        }
    }

    async fn enumerate_devices(&self) -> RecorderResult<Vec<MediaDeviceInfo>> {
        tokio::task::spawn_blocking(|| {
            let mut devices = list_cameras()?;
            devices.extend(list_microphones()?);
            Ok(devices)
        })
        .await
        .map_err(|e| RecorderError::DeviceAcquisitionFailed(format!("enumeration task failed: {}", e)))?
    }

    async fn open(&self, constraints: &MediaConstraints) -> RecorderResult<Arc<dyn LiveSource>> {
        let camera = CameraStream::open(&constraints.video).await?;

        let audio_constraints = constraints.audio.clone();
        let mic = tokio::task::spawn_blocking(move || MicStream::open(&audio_constraints))
            .await
            .map_err(|e| RecorderError::DeviceAcquisitionFailed(format!("microphone task failed: {}", e)))??;

        let video = TrackInfo {
            id: Uuid::new_v4().to_string(),
            device_id: camera.device_id().to_string(),
            label: camera.label().to_string(),
        };

        Ok(Arc::new(NativeSource {
            id: Uuid::new_v4().to_string(),
            video,
            camera,
            mic,
        }))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        encoder::is_type_supported(mime_type)
    }

    fn create_encoder(&self, settings: EncoderSettings) -> RecorderResult<Box<dyn MediaEncoder>> {
        Ok(Box::new(FfmpegEncoder::new(settings)?))
    }
}

/// Camera and microphone opened together
pub struct NativeSource {
    id: String,
    video: TrackInfo,
    camera: CameraStream,
    mic: MicStream,
}

#[async_trait]
impl LiveSource for NativeSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn video_track(&self) -> Option<&TrackInfo> {
        Some(&self.video)
    }

    fn audio_track(&self) -> Option<&AudioTrack> {
        Some(self.mic.track())
    }

    async fn loaded_metadata(&self) -> RecorderResult<FrameSize> {
        self.camera.delivered().await
    }

    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.camera.latest_frame()
    }

    fn stop(&self) {
        self.camera.stop();
        self.mic.stop();
    }

    fn is_live(&self) -> bool {
        self.camera.is_running()
    }
}

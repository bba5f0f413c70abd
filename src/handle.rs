//! Recorder handle
//!
//! The surface exposed to embedding UI code: one `init` per preview target,
//! returning a handle for preview, device selection and recording.

use crate::capture::devices::{DeviceCatalog, DeviceRegistry};
use crate::capture::permissions::PermissionNegotiator;
use crate::capture::probe::{has_camera_and_mic, probe};
use crate::capture::traits::{MediaBackend, PreviewTarget};
use crate::config::{RecorderConfig, FALLBACK_MIME_TYPE};
use crate::recorder::arbiter::CaptureArbiter;
use crate::recorder::session::CaptureSessionManager;
use crate::recorder::state::{CaptureState, RecordedMedia, RecordingEvent};
use crate::utils::error::{RecorderError, RecorderResult};
use crate::utils::log_sink::{LogSink, TracingLogSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const DEFAULT_UNSUPPORTED_MESSAGE: &str = "Video Not Supported";

/// Parameters of [`init`]
pub struct RecorderInit {
    /// Where the live preview is shown
    pub target: Arc<dyn PreviewTarget>,
    /// Shown on the target when the host cannot record
    pub unsupported_message: String,
    pub log_sink: Arc<dyn LogSink>,
    pub backend: Arc<dyn MediaBackend>,
    /// Shared by every recorder of the process
    pub arbiter: Arc<CaptureArbiter>,
    pub config: RecorderConfig,
}

impl RecorderInit {
    pub fn new(target: Arc<dyn PreviewTarget>, backend: Arc<dyn MediaBackend>, arbiter: Arc<CaptureArbiter>) -> Self {
        Self {
            target,
            unsupported_message: DEFAULT_UNSUPPORTED_MESSAGE.to_string(),
            log_sink: Arc::new(TracingLogSink),
            backend,
            arbiter,
            config: RecorderConfig::default(),
        }
    }

    pub fn with_unsupported_message(mut self, message: impl Into<String>) -> Self {
        self.unsupported_message = message.into();
        self
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    pub fn with_config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }
}

/// Probe the host and build a recorder bound to `params.target`.
///
/// Only an invalid configuration is an error. A host without camera or
/// microphone yields a handle whose `camera_supported()` is false.
pub async fn init(params: RecorderInit) -> RecorderResult<RecorderHandle> {
    params.config.validate()?;

    let RecorderInit {
        target,
        unsupported_message,
        log_sink,
        backend,
        arbiter,
        config,
    } = params;

    let supported = probe(backend.as_ref()).supported && has_camera_and_mic(backend.as_ref()).await;
    if !supported {
        tracing::warn!("{}: camera or microphone unavailable", RecorderError::UnsupportedPlatform);
        log_sink.append("Camera recording is not supported on this device");
        target.show_unsupported(&unsupported_message);
    }

    let camera_supported = Arc::new(AtomicBool::new(supported));
    let permissions = Arc::new(PermissionNegotiator::new(backend.clone(), config.clone()));
    let registry = DeviceRegistry::new(backend.clone(), permissions.clone(), camera_supported.clone());
    let session = CaptureSessionManager::new(backend, arbiter, permissions.clone(), target, log_sink, config);

    tracing::info!("Recorder {} initialized (camera supported: {})", session.id(), supported);

    Ok(RecorderHandle {
        camera_supported,
        permissions,
        registry,
        session,
    })
}

/// Handle to one initialized recorder
pub struct RecorderHandle {
    camera_supported: Arc<AtomicBool>,
    permissions: Arc<PermissionNegotiator>,
    registry: DeviceRegistry,
    session: CaptureSessionManager,
}

impl RecorderHandle {
    /// False once the probe or a device enumeration failed
    pub fn camera_supported(&self) -> bool {
        self.camera_supported.load(Ordering::SeqCst)
    }

    /// Obtain camera+microphone permission. A new grant fills empty device
    /// selections with the devices the platform picked; later calls leave
    /// the selection alone so an explicit "Default" choice sticks.
    pub async fn ensure_permission(&self) -> bool {
        if !self.camera_supported() {
            return false;
        }
        if !self.permissions.ensure().await {
            return false;
        }
        if let Some(granted) = self.permissions.take_fresh_grant() {
            self.session.seed_selection(&granted);
        }
        true
    }

    /// Open the camera and show the preview
    pub async fn start_preview(&self) -> bool {
        if !self.ensure_permission().await {
            return false;
        }
        self.session.start().await
    }

    /// Close the camera. A running recording is discarded.
    pub async fn stop_preview(&self) {
        self.session.stop().await;
    }

    pub async fn list_devices(&self) -> DeviceCatalog {
        if !self.camera_supported() {
            return DeviceCatalog::failed();
        }
        self.registry.list_devices().await
    }

    /// Start recording. The preview must be running.
    pub async fn start_recording(&self) -> bool {
        match self.session.start_recording().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Recording not started: {}", e);
                false
            }
        }
    }

    /// Stop recording and return the artifact. Empty data when nothing was
    /// recording.
    pub async fn stop_recording(&self) -> RecordedMedia {
        match self.session.stop_recording().await {
            Some(media) => media,
            None => RecordedMedia {
                data: Vec::new(),
                mime_type: self
                    .session
                    .mime_type()
                    .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string()),
            },
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_recording()
    }

    /// Bytes collected by the running (or last) recording
    pub fn total_size(&self) -> u64 {
        self.session.total_size()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.session.subscribe()
    }

    pub fn state(&self) -> CaptureState {
        self.session.state()
    }

    pub fn session(&self) -> &CaptureSessionManager {
        &self.session
    }

    pub fn video_device_id(&self) -> String {
        self.session.selection().video_device_id
    }

    pub fn audio_device_id(&self) -> String {
        self.session.selection().audio_device_id
    }

    /// Select a camera; a running preview switches to it
    pub async fn set_video_device_id(&self, device_id: &str) -> RecorderResult<bool> {
        self.session.update_video_device(device_id).await
    }

    /// Select a microphone; a running preview switches to it
    pub async fn set_audio_device_id(&self, device_id: &str) -> RecorderResult<bool> {
        self.session.update_audio_device(device_id).await
    }
}

//! Synthetic capture host
//!
//! In-process backend with scripted devices, geometry and encoder output.
//! Lets the recorder run headless, and lets tests reproduce devices that
//! rotate late, deny permission or are busy.

use super::traits::{
    AudioTrack, Capabilities, ChunkSender, DeviceKind, DeviceSelector, EncoderSettings, FrameSize,
    LiveSource, MediaBackend, MediaConstraints, MediaDeviceInfo, MediaEncoder, PreviewTarget,
    TrackInfo, VideoFrame, ViewportSize,
};
use crate::utils::error::{RecorderError, RecorderResult};
use async_trait::async_trait;
use image::Rgba;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

const FRAME_COLOR: Rgba<u8> = Rgba([32, 96, 160, 255]);

struct SyntheticState {
    capabilities: Capabilities,
    devices: Vec<MediaDeviceInfo>,
    enumerate_fails: bool,
    permission_denied: bool,
    busy: bool,
    /// Geometry scripts consumed one per `open`
    deliveries: VecDeque<Vec<FrameSize>>,
    supported_mime_types: Vec<String>,
    encoder_script: Vec<usize>,
    finalize_delay: Duration,
    constraints_log: Vec<MediaConstraints>,
}

/// Scripted in-process camera/microphone host
pub struct SyntheticBackend {
    state: Mutex<SyntheticState>,
    live_sources: Arc<AtomicUsize>,
    opens: AtomicUsize,
    finalizations: Arc<AtomicUsize>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    /// One camera, one microphone, every MIME type supported
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                capabilities: Capabilities {
                    capture: true,
                    enumerate: true,
                },
                devices: vec![
                    MediaDeviceInfo::new("synthetic-camera-0", DeviceKind::VideoInput, "Synthetic Camera"),
                    MediaDeviceInfo::new("synthetic-mic-0", DeviceKind::AudioInput, "Synthetic Microphone"),
                ],
                enumerate_fails: false,
                permission_denied: false,
                busy: false,
                deliveries: VecDeque::new(),
                supported_mime_types: crate::config::default_mime_preferences(),
                encoder_script: Vec::new(),
                finalize_delay: Duration::ZERO,
                constraints_log: Vec::new(),
            }),
            live_sources: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
            finalizations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn set_devices(&self, devices: Vec<MediaDeviceInfo>) {
        self.state.lock().devices = devices;
    }

    pub fn set_enumerate_fails(&self, fails: bool) {
        self.state.lock().enumerate_fails = fails;
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.state.lock().permission_denied = denied;
    }

    /// Devices held by another application
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Geometry reported by the next opened source: the first entry on the
    /// first metadata read, later entries on later reads. Unscripted opens
    /// deliver the requested size.
    pub fn push_delivery(&self, geometry: Vec<FrameSize>) {
        self.state.lock().deliveries.push_back(geometry);
    }

    pub fn set_supported_mime_types(&self, mime_types: &[&str]) {
        self.state.lock().supported_mime_types = mime_types.iter().map(|m| m.to_string()).collect();
    }

    /// Chunk sizes every encoder emits, one per timeslice; the remainder
    /// is flushed on stop
    pub fn set_encoder_script(&self, chunk_sizes: Vec<usize>) {
        self.state.lock().encoder_script = chunk_sizes;
    }

    /// Time an encoder takes to flush its container on stop
    pub fn set_finalize_delay(&self, delay: Duration) {
        self.state.lock().finalize_delay = delay;
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Sources opened and not yet stopped
    pub fn live_source_count(&self) -> usize {
        self.live_sources.load(Ordering::SeqCst)
    }

    /// Encoder finalizations across all encoders
    pub fn finalize_count(&self) -> usize {
        self.finalizations.load(Ordering::SeqCst)
    }

    pub fn constraints_log(&self) -> Vec<MediaConstraints> {
        self.state.lock().constraints_log.clone()
    }

    fn pick_device(
        devices: &[MediaDeviceInfo],
        kind: DeviceKind,
        selector: &DeviceSelector,
    ) -> RecorderResult<MediaDeviceInfo> {
        let mut candidates = devices.iter().filter(|d| d.kind == kind);
        let found = match selector.exact_id() {
            Some(id) => candidates.find(|d| d.device_id == id),
            None => candidates.next(),
        };
        found.cloned().ok_or_else(|| {
            RecorderError::DeviceAcquisitionFailed(format!("no {:?} device matches {:?}", kind, selector))
        })
    }
}

#[async_trait]
impl MediaBackend for SyntheticBackend {
    fn capabilities(&self) -> Capabilities {
        self.state.lock().capabilities
    }

    async fn enumerate_devices(&self) -> RecorderResult<Vec<MediaDeviceInfo>> {
        let state = self.state.lock();
        if !state.capabilities.enumerate {
            return Err(RecorderError::UnsupportedPlatform);
        }
        if state.enumerate_fails {
            return Err(RecorderError::DeviceAcquisitionFailed("enumeration failed".to_string()));
        }
        Ok(state.devices.clone())
    }

    async fn open(&self, constraints: &MediaConstraints) -> RecorderResult<Arc<dyn LiveSource>> {
        // Acquisition always suspends the caller
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.constraints_log.push(constraints.clone());

        if !state.capabilities.capture {
            return Err(RecorderError::UnsupportedPlatform);
        }
        if state.permission_denied {
            return Err(RecorderError::PermissionDenied("NotAllowedError".to_string()));
        }
        if state.busy {
            return Err(RecorderError::DeviceAcquisitionFailed(
                "NotReadableError: device in use".to_string(),
            ));
        }

        let camera = Self::pick_device(&state.devices, DeviceKind::VideoInput, &constraints.video.device)?;
        let mic = Self::pick_device(&state.devices, DeviceKind::AudioInput, &constraints.audio.device)?;
        let geometry = state
            .deliveries
            .pop_front()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| vec![FrameSize::new(constraints.video.width, constraints.video.height)]);
        drop(state);

        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live_sources.fetch_add(1, Ordering::SeqCst);

        let audio = AudioTrack::new(
            TrackInfo {
                id: Uuid::new_v4().to_string(),
                device_id: mic.device_id,
                label: mic.label,
            },
            constraints.audio.sample_rate,
            constraints.audio.channel_count,
        );

        Ok(Arc::new(SyntheticSource {
            id: Uuid::new_v4().to_string(),
            video: TrackInfo {
                id: Uuid::new_v4().to_string(),
                device_id: camera.device_id,
                label: camera.label,
            },
            audio,
            geometry,
            reads: AtomicUsize::new(0),
            frame: Mutex::new(None),
            live: AtomicBool::new(true),
            live_sources: self.live_sources.clone(),
        }))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.state.lock().supported_mime_types.iter().any(|m| m == mime_type)
    }

    fn create_encoder(&self, settings: EncoderSettings) -> RecorderResult<Box<dyn MediaEncoder>> {
        let state = self.state.lock();
        Ok(Box::new(SyntheticEncoder {
            mime_type: settings.mime_type,
            script: state.encoder_script.clone(),
            finalize_delay: state.finalize_delay,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            sink: Arc::new(Mutex::new(None)),
            ticker: None,
            finalizations: self.finalizations.clone(),
        }))
    }
}

/// Live source with scripted geometry and solid-color frames
pub struct SyntheticSource {
    id: String,
    video: TrackInfo,
    audio: AudioTrack,
    geometry: Vec<FrameSize>,
    reads: AtomicUsize,
    frame: Mutex<Option<Arc<VideoFrame>>>,
    live: AtomicBool,
    live_sources: Arc<AtomicUsize>,
}

impl SyntheticSource {
    fn current_geometry(&self) -> FrameSize {
        let read = self.reads.load(Ordering::SeqCst).saturating_sub(1);
        self.geometry[read.min(self.geometry.len() - 1)]
    }
}

#[async_trait]
impl LiveSource for SyntheticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn video_track(&self) -> Option<&TrackInfo> {
        Some(&self.video)
    }

    fn audio_track(&self) -> Option<&AudioTrack> {
        Some(&self.audio)
    }

    async fn loaded_metadata(&self) -> RecorderResult<FrameSize> {
        tokio::task::yield_now().await;
        if !self.is_live() {
            return Err(RecorderError::DeviceAcquisitionFailed("source stopped".to_string()));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.current_geometry())
    }

    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        if !self.is_live() {
            return None;
        }
        let size = self.current_geometry();
        let mut cached = self.frame.lock();
        let stale = cached
            .as_ref()
            .map_or(true, |f| f.dimensions() != (size.width, size.height));
        if stale {
            *cached = Some(Arc::new(VideoFrame::from_pixel(size.width, size.height, FRAME_COLOR)));
        }
        cached.clone()
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.live_sources.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Encoder replaying a chunk-size script
struct SyntheticEncoder {
    mime_type: String,
    script: Vec<usize>,
    pending: Arc<Mutex<VecDeque<usize>>>,
    sink: Arc<Mutex<Option<ChunkSender>>>,
    ticker: Option<JoinHandle<()>>,
    finalize_delay: Duration,
    finalizations: Arc<AtomicUsize>,
}

#[async_trait]
impl MediaEncoder for SyntheticEncoder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn start(&mut self, timeslice: Duration, sink: ChunkSender) -> RecorderResult<()> {
        if self.ticker.is_some() {
            return Err(RecorderError::Encoder("encoder already started".to_string()));
        }
        *self.pending.lock() = self.script.iter().copied().collect();
        *self.sink.lock() = Some(sink);

        let pending = self.pending.clone();
        let sink = self.sink.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeslice);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let next = pending.lock().pop_front();
                let Some(size) = next else {
                    continue;
                };
                if let Some(tx) = sink.lock().as_ref() {
                    let _ = tx.send(vec![0u8; size]);
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> RecorderResult<()> {
        let Some(ticker) = self.ticker.take() else {
            return Ok(());
        };
        ticker.abort();

        let sink = self.sink.lock().take();
        let remaining: Vec<usize> = self.pending.lock().drain(..).collect();
        if let Some(tx) = sink {
            for size in remaining {
                let _ = tx.send(vec![0u8; size]);
            }
        }
        if !self.finalize_delay.is_zero() {
            tokio::time::sleep(self.finalize_delay).await;
        }
        self.finalizations.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.sink.lock().take();
        self.pending.lock().clear();
    }
}

/// Preview target with a settable viewport
pub struct SyntheticPreview {
    viewport: Mutex<ViewportSize>,
    attached: Mutex<Option<Arc<dyn LiveSource>>>,
    unsupported: Mutex<Option<String>>,
}

impl SyntheticPreview {
    pub fn new(viewport: ViewportSize) -> Self {
        Self {
            viewport: Mutex::new(viewport),
            attached: Mutex::new(None),
            unsupported: Mutex::new(None),
        }
    }

    /// Simulate a window resize or device rotation
    pub fn set_viewport(&self, viewport: ViewportSize) {
        *self.viewport.lock() = viewport;
    }

    pub fn attached_source_id(&self) -> Option<String> {
        self.attached.lock().as_ref().map(|s| s.id().to_string())
    }

    pub fn unsupported_message(&self) -> Option<String> {
        self.unsupported.lock().clone()
    }
}

impl PreviewTarget for SyntheticPreview {
    fn viewport(&self) -> ViewportSize {
        *self.viewport.lock()
    }

    fn attach(&self, source: Arc<dyn LiveSource>) {
        *self.attached.lock() = Some(source);
    }

    fn detach(&self) {
        self.attached.lock().take();
    }

    fn show_unsupported(&self, message: &str) {
        *self.unsupported.lock() = Some(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::recorder::state::CaptureRequest;

    fn constraints(size: FrameSize) -> MediaConstraints {
        CaptureRequest::default().constraints(&RecorderConfig::default(), size)
    }

    #[tokio::test]
    async fn test_unscripted_open_delivers_requested_size() {
        let backend = SyntheticBackend::new();
        let source = backend.open(&constraints(FrameSize::new(360, 640))).await.unwrap();

        assert_eq!(source.loaded_metadata().await.unwrap(), FrameSize::new(360, 640));
        assert_eq!(backend.live_source_count(), 1);
        source.stop();
        source.stop();
        assert_eq!(backend.live_source_count(), 0);
    }

    #[tokio::test]
    async fn test_scripted_geometry_advances_per_read() {
        let backend = SyntheticBackend::new();
        backend.push_delivery(vec![FrameSize::new(640, 360), FrameSize::new(360, 640)]);
        let source = backend.open(&constraints(FrameSize::new(360, 640))).await.unwrap();

        assert_eq!(source.loaded_metadata().await.unwrap(), FrameSize::new(640, 360));
        assert_eq!(source.loaded_metadata().await.unwrap(), FrameSize::new(360, 640));
        assert_eq!(source.loaded_metadata().await.unwrap(), FrameSize::new(360, 640));
        assert_eq!(source.latest_frame().unwrap().dimensions(), (360, 640));
    }

    #[tokio::test]
    async fn test_unknown_exact_device_fails() {
        let backend = SyntheticBackend::new();
        let mut c = constraints(FrameSize::new(640, 360));
        c.video.device = DeviceSelector::Exact("missing".to_string());

        let result = backend.open(&c).await;
        assert!(matches!(result, Err(RecorderError::DeviceAcquisitionFailed(_))));
        assert_eq!(backend.live_source_count(), 0);
    }
}

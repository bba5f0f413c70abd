//! Capture session manager
//!
//! Owns the live camera+microphone source of one recorder instance, the
//! render surface sized from the geometry the device actually delivered,
//! and the encode session bound to both.
//!
//! Lifecycle: `Idle -> Acquiring -> Normalizing -> Ready -> Recording`,
//! back to `Idle` through `Stopping`. Finalizing a recording passes through
//! `Stopping` on its way back to `Ready`. Acquisition errors pass through `Failed`
//! and settle in `Idle` with the arbitration token released.

use super::arbiter::{CaptureArbiter, CaptureOwner, OwnerId};
use super::compositor::RenderSurface;
use super::encode::{negotiate_mime_type, EncodeSession};
use super::orientation::OrientationContext;
use super::state::{CaptureRequest, CaptureState, RecordedMedia, RecordingEvent};
use crate::capture::permissions::{GrantedDevices, PermissionNegotiator};
use crate::capture::probe::probe;
use crate::capture::traits::{EncoderSettings, FrameSize, LiveSource, MediaBackend, PreviewTarget};
use crate::config::{HotSwapPolicy, RecorderConfig};
use crate::utils::error::{RecorderError, RecorderResult};
use crate::utils::log_sink::LogSink;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

/// Selected devices. Empty ids let the platform choose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelection {
    pub video_device_id: String,
    pub audio_device_id: String,
}

#[derive(Default)]
struct CaptureSlot {
    state: CaptureState,
    source: Option<Arc<dyn LiveSource>>,
    surface: Option<Arc<RenderSurface>>,
    encode: Option<Arc<EncodeSession>>,
    orientation: Option<OrientationContext>,
}

/// Outcome of a successful acquisition
struct Acquired {
    source: Arc<dyn LiveSource>,
    delivered: FrameSize,
    orientation: OrientationContext,
}

#[derive(Clone, Copy)]
enum DeviceSlot {
    Video,
    Audio,
}

struct CaptureInner {
    id: OwnerId,
    backend: Arc<dyn MediaBackend>,
    arbiter: Arc<CaptureArbiter>,
    permissions: Arc<PermissionNegotiator>,
    preview: Arc<dyn PreviewTarget>,
    log: Arc<dyn LogSink>,
    config: RecorderConfig,

    /// Serializes start/stop/hot-swap of this instance
    ops: AsyncMutex<()>,
    slot: Mutex<CaptureSlot>,
    selection: RwLock<DeviceSelection>,
    attempts: AtomicU64,
    events: broadcast::Sender<RecordingEvent>,
}

/// Manages the live source of one recorder instance
pub struct CaptureSessionManager {
    inner: Arc<CaptureInner>,
}

impl CaptureSessionManager {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        arbiter: Arc<CaptureArbiter>,
        permissions: Arc<PermissionNegotiator>,
        preview: Arc<dyn PreviewTarget>,
        log: Arc<dyn LogSink>,
        config: RecorderConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(CaptureInner {
                id: OwnerId::new(),
                backend,
                arbiter,
                permissions,
                preview,
                log,
                config,
                ops: AsyncMutex::new(()),
                slot: Mutex::new(CaptureSlot::default()),
                selection: RwLock::new(DeviceSelection::default()),
                attempts: AtomicU64::new(0),
                events,
            }),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    pub fn state(&self) -> CaptureState {
        self.inner.slot.lock().state
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.events.subscribe()
    }

    /// Acquisition attempts issued so far, orientation retries included
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn surface(&self) -> Option<Arc<RenderSurface>> {
        self.inner.slot.lock().surface.clone()
    }

    pub fn orientation(&self) -> Option<OrientationContext> {
        self.inner.slot.lock().orientation
    }

    /// Negotiated MIME type of the bound encoder
    pub fn mime_type(&self) -> Option<String> {
        self.inner
            .slot
            .lock()
            .encode
            .as_ref()
            .map(|e| e.mime_type().to_string())
    }

    /// Bytes collected by the running (or last) recording
    pub fn total_size(&self) -> u64 {
        self.inner
            .slot
            .lock()
            .encode
            .as_ref()
            .map_or(0, |e| e.total_size())
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    pub fn selection(&self) -> DeviceSelection {
        self.inner.selection.read().clone()
    }

    /// Fill empty selections with the devices the permission grant chose.
    /// Never restarts capture.
    pub fn seed_selection(&self, granted: &GrantedDevices) {
        let mut selection = self.inner.selection.write();
        if selection.video_device_id.is_empty() {
            selection.video_device_id = granted.video_device_id.clone();
        }
        if selection.audio_device_id.is_empty() {
            selection.audio_device_id = granted.audio_device_id.clone();
        }
    }

    /// Start capture with the current device selection
    pub async fn start(&self) -> bool {
        let selection = self.selection();
        let request = CaptureRequest::with_devices(selection.video_device_id, selection.audio_device_id);
        self.start_with(request).await
    }

    /// Start capture. Errors are logged and reported as `false`, leaving
    /// the session idle and the arbitration token unheld.
    pub async fn start_with(&self, request: CaptureRequest) -> bool {
        let _op = self.inner.ops.lock().await;
        self.inner.start_locked(request).await
    }

    /// Stop the live source and release the token. No-op when idle.
    pub async fn stop(&self) {
        let _op = self.inner.ops.lock().await;
        if self.state().has_source() {
            self.inner.set_state(CaptureState::Stopping);
        }
        self.inner.stop_locked();
    }

    /// Start encoding the render surface. Only valid when `Ready`.
    pub async fn start_recording(&self) -> RecorderResult<()> {
        let _op = self.inner.ops.lock().await;

        let encode = {
            let slot = self.inner.slot.lock();
            if slot.state != CaptureState::Ready {
                return Err(RecorderError::InvalidState(format!(
                    "cannot record while {:?}",
                    slot.state
                )));
            }
            slot.encode
                .clone()
                .ok_or_else(|| RecorderError::InvalidState("no encoder bound".to_string()))?
        };

        encode.start().await?;

        let mut slot = self.inner.slot.lock();
        if slot.encode.as_ref().is_some_and(|e| Arc::ptr_eq(e, &encode)) {
            slot.state = CaptureState::Recording;
            Ok(())
        } else {
            drop(slot);
            encode.abort();
            Err(RecorderError::InvalidState(
                "capture was released while recording started".to_string(),
            ))
        }
    }

    /// Finalize the running recording. Returns `None` when nothing is
    /// recording, including for the second of two concurrent callers.
    pub async fn stop_recording(&self) -> Option<RecordedMedia> {
        let _op = self.inner.ops.lock().await;

        let encode = {
            let slot = self.inner.slot.lock();
            if slot.state != CaptureState::Recording {
                return None;
            }
            slot.encode.clone()?
        };

        self.inner.set_state(CaptureState::Stopping);
        let media = encode.stop().await;

        let mut slot = self.inner.slot.lock();
        if slot.state == CaptureState::Stopping && slot.encode.as_ref().is_some_and(|e| Arc::ptr_eq(e, &encode)) {
            slot.state = CaptureState::Ready;
        }
        media
    }

    /// Select a camera. See [`Self::update_audio_device`].
    pub async fn update_video_device(&self, device_id: &str) -> RecorderResult<bool> {
        self.inner.update_device(DeviceSlot::Video, device_id).await
    }

    /// Select a microphone. A live capture is restarted on the new device;
    /// returns whether that restart happened and succeeded. While recording
    /// the configured [`HotSwapPolicy`] decides.
    pub async fn update_audio_device(&self, device_id: &str) -> RecorderResult<bool> {
        self.inner.update_device(DeviceSlot::Audio, device_id).await
    }
}

impl CaptureInner {
    fn set_state(&self, state: CaptureState) {
        let mut slot = self.slot.lock();
        if slot.state != state {
            tracing::debug!("Capture {} state: {:?} -> {:?}", self.id, slot.state, state);
            slot.state = state;
        }
    }

    fn log_line(&self, line: String) {
        tracing::debug!("Capture {}: {}", self.id, line);
        self.log.append(&line);
    }

    /// Drop the source, surface and encoder. Leaves the token alone.
    fn teardown(&self) {
        let released = std::mem::take(&mut *self.slot.lock());

        if let Some(encode) = released.encode {
            encode.abort();
        }
        if let Some(source) = released.source {
            source.stop();
            self.preview.detach();
            tracing::info!("Capture {} released source {}", self.id, source.id());
        }
    }

    fn stop_locked(&self) {
        self.teardown();
        if self.arbiter.release(self.id) {
            tracing::debug!("Capture {} released the arbitration token", self.id);
        }
    }

    async fn start_locked(self: &Arc<Self>, request: CaptureRequest) -> bool {
        if !probe(self.backend.as_ref()).supported {
            tracing::warn!("Capture {} not started: {}", self.id, RecorderError::UnsupportedPlatform);
            return false;
        }

        // Whoever else holds the camera lets go before we open it
        if let Some(evicted) = self.arbiter.preempt(self.id) {
            tracing::info!("Capture {} pre-empted {}", self.id, evicted);
        }
        self.teardown();

        match self.acquire(&request).await.and_then(|acquired| self.bind(acquired)) {
            Ok(()) => {
                let owner: Arc<dyn CaptureOwner> = self.clone();
                if let Some(displaced) = self.arbiter.claim(&owner) {
                    tracing::info!("Capture {} displaced {} while acquiring", self.id, displaced);
                }
                true
            }
            Err(e) => {
                self.log_line(format!("Camera start failed: {}", e));
                if matches!(e, RecorderError::PermissionDenied(_)) {
                    self.permissions.invalidate();
                }
                self.set_state(CaptureState::Failed);
                self.stop_locked();
                false
            }
        }
    }

    /// Open a source whose delivered orientation matches the viewport,
    /// retrying once with swapped dimensions
    async fn acquire(&self, request: &CaptureRequest) -> RecorderResult<Acquired> {
        let orientation = OrientationContext::from_viewport(self.preview.viewport(), self.config.narrow_viewport_width);
        let mut size = request
            .desired_size
            .unwrap_or_else(|| orientation.target_size(self.config.long_side, self.config.short_side));
        let mut retried = false;

        loop {
            self.set_state(CaptureState::Acquiring);
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let source = self.backend.open(&request.constraints(&self.config, size)).await?;
            self.preview.attach(source.clone());

            self.set_state(CaptureState::Normalizing);
            let delivered = match self.delivered_geometry(source.as_ref(), &orientation).await {
                Ok(delivered) => delivered,
                Err(e) => {
                    source.stop();
                    self.preview.detach();
                    return Err(e);
                }
            };

            if !orientation.is_inverted(delivered) {
                if retried {
                    self.log_line(format!("Orientation fixed: requested {}, got {}", size, delivered));
                }
                return Ok(Acquired {
                    source,
                    delivered,
                    orientation,
                });
            }

            if retried {
                self.log_line(format!(
                    "Orientation still inverted after retry, accepting {} (requested {})",
                    delivered, size
                ));
                return Ok(Acquired {
                    source,
                    delivered,
                    orientation,
                });
            }

            self.log_line(format!("Orientation retry: requested {}, got {}", size, delivered));
            source.stop();
            self.preview.detach();
            size = size.swapped();
            retried = true;
        }
    }

    /// Delivered geometry, re-read once after the settle delay when the
    /// first read looks like a rotation that has not applied yet
    async fn delivered_geometry(
        &self,
        source: &dyn LiveSource,
        orientation: &OrientationContext,
    ) -> RecorderResult<FrameSize> {
        let first = source.loaded_metadata().await?;
        let settle = self.config.rotation_settle();
        if !orientation.is_inverted(first) || settle.is_zero() {
            return Ok(first);
        }

        tokio::time::sleep(settle).await;
        let settled = source.loaded_metadata().await?;
        if settled != first {
            tracing::debug!("Rotation applied after settle: {} -> {}", first, settled);
        }
        Ok(settled)
    }

    /// Allocate the surface and encoder for an acquired source
    fn bind(&self, acquired: Acquired) -> RecorderResult<()> {
        let Acquired {
            source,
            delivered,
            orientation,
        } = acquired;

        let surface = Arc::new(RenderSurface::for_source(delivered, self.config.long_side));
        let mime_type = negotiate_mime_type(self.backend.as_ref(), &self.config.mime_preferences);
        let settings = EncoderSettings {
            mime_type,
            video_bits_per_second: self.config.video_bits_per_second,
            audio_bits_per_second: self.config.audio_bits_per_second,
            frame_rate: self.config.capture_frame_rate,
            surface: surface.clone(),
            audio: source.audio_track().cloned(),
        };

        let encoder = match self.backend.create_encoder(settings) {
            Ok(encoder) => encoder,
            Err(e) => {
                source.stop();
                self.preview.detach();
                return Err(e);
            }
        };
        let encode = Arc::new(EncodeSession::new(
            encoder,
            surface.clone(),
            source.clone(),
            self.config.timeslice(),
            self.config.redraw_interval(),
            self.events.clone(),
        ));

        tracing::info!(
            "Capture {} ready: source {} delivering {}, surface {}, {}",
            self.id,
            source.id(),
            delivered,
            surface.size(),
            encode.mime_type()
        );

        *self.slot.lock() = CaptureSlot {
            state: CaptureState::Ready,
            source: Some(source),
            surface: Some(surface),
            encode: Some(encode),
            orientation: Some(orientation),
        };
        Ok(())
    }

    async fn update_device(self: &Arc<Self>, which: DeviceSlot, device_id: &str) -> RecorderResult<bool> {
        let _op = self.ops.lock().await;

        let unchanged = {
            let selection = self.selection.read();
            match which {
                DeviceSlot::Video => selection.video_device_id == device_id,
                DeviceSlot::Audio => selection.audio_device_id == device_id,
            }
        };
        if unchanged {
            return Ok(false);
        }

        let state = self.slot.lock().state;
        if state == CaptureState::Recording {
            match self.config.hot_swap_policy {
                HotSwapPolicy::Reject => return Err(RecorderError::RecordingInProgress),
                HotSwapPolicy::StopAndRestart => {
                    self.log_line("Device changed while recording, discarding the recording".to_string());
                }
            }
        }

        let request = {
            let mut selection = self.selection.write();
            match which {
                DeviceSlot::Video => selection.video_device_id = device_id.to_string(),
                DeviceSlot::Audio => selection.audio_device_id = device_id.to_string(),
            }
            CaptureRequest::with_devices(selection.video_device_id.clone(), selection.audio_device_id.clone())
        };

        if !state.has_source() {
            return Ok(false);
        }

        tracing::info!("Capture {} switching devices", self.id);
        self.stop_locked();
        Ok(self.start_locked(request).await)
    }
}

impl CaptureOwner for CaptureInner {
    fn owner_id(&self) -> OwnerId {
        self.id
    }

    fn release_for_preemption(&self) {
        self.teardown();
    }
}

impl Drop for CaptureInner {
    fn drop(&mut self) {
        self.teardown();
        self.arbiter.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{SyntheticBackend, SyntheticPreview};
    use crate::capture::traits::ViewportSize;
    use crate::utils::log_sink::MemoryLogSink;

    struct Fixture {
        backend: Arc<SyntheticBackend>,
        arbiter: Arc<CaptureArbiter>,
        log: Arc<MemoryLogSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: Arc::new(SyntheticBackend::new()),
                arbiter: Arc::new(CaptureArbiter::new()),
                log: Arc::new(MemoryLogSink::new()),
            }
        }

        fn manager(&self, viewport: ViewportSize) -> CaptureSessionManager {
            let config = RecorderConfig {
                rotation_settle_ms: 0,
                ..RecorderConfig::default()
            };
            let permissions = Arc::new(PermissionNegotiator::new(self.backend.clone(), config.clone()));
            CaptureSessionManager::new(
                self.backend.clone(),
                self.arbiter.clone(),
                permissions,
                Arc::new(SyntheticPreview::new(viewport)),
                self.log.clone(),
                config,
            )
        }
    }

    #[tokio::test]
    async fn test_start_binds_landscape_surface_on_desktop() {
        let fx = Fixture::new();
        let manager = fx.manager(ViewportSize::new(1280, 800));

        assert!(manager.start().await);
        assert_eq!(manager.state(), CaptureState::Ready);
        assert_eq!(manager.surface().unwrap().size(), FrameSize::new(640, 360));
        assert_eq!(manager.attempts(), 1);
        assert!(fx.arbiter.is_held_by(manager.id()));
        assert_eq!(manager.mime_type().as_deref(), Some("video/mp4;codecs=h264,aac"));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_token() {
        let fx = Fixture::new();
        let manager = fx.manager(ViewportSize::new(1280, 800));

        manager.stop().await;
        assert!(manager.start().await);
        manager.stop().await;
        manager.stop().await;

        assert_eq!(manager.state(), CaptureState::Idle);
        assert_eq!(fx.arbiter.holder(), None);
        assert_eq!(fx.backend.live_source_count(), 0);
    }

    #[tokio::test]
    async fn test_busy_device_fails_cleanly() {
        let fx = Fixture::new();
        fx.backend.set_busy(true);
        let manager = fx.manager(ViewportSize::new(1280, 800));

        assert!(!manager.start().await);
        assert_eq!(manager.state(), CaptureState::Idle);
        assert_eq!(fx.arbiter.holder(), None);
        assert!(fx.log.lines().iter().any(|l| l.contains("Camera start failed")));
    }

    #[tokio::test]
    async fn test_seed_selection_keeps_explicit_choice() {
        let fx = Fixture::new();
        let manager = fx.manager(ViewportSize::new(1280, 800));
        manager.update_video_device("cam-x").await.unwrap();

        manager.seed_selection(&GrantedDevices {
            video_device_id: "synthetic-camera-0".to_string(),
            audio_device_id: "synthetic-mic-0".to_string(),
        });

        let selection = manager.selection();
        assert_eq!(selection.video_device_id, "cam-x");
        assert_eq!(selection.audio_device_id, "synthetic-mic-0");
    }
}

//! Camera and microphone permission
//!
//! Permission is requested by briefly opening both devices. The grant is
//! cached for the process lifetime and only dropped when an acquisition
//! reports that it was revoked.

use super::probe::probe;
use super::traits::{FrameSize, MediaBackend};
use crate::config::RecorderConfig;
use crate::recorder::state::CaptureRequest;
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Devices the platform picked when permission was granted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedDevices {
    pub video_device_id: String,
    pub audio_device_id: String,
}

/// Acquires camera+microphone permission at most once at a time
pub struct PermissionNegotiator {
    backend: Arc<dyn MediaBackend>,
    config: RecorderConfig,
    granted: RwLock<Option<GrantedDevices>>,
    /// Set by each new grant until a caller takes it
    fresh_grant: Mutex<Option<GrantedDevices>>,
    /// Held while a prompt is in flight
    gate: AsyncMutex<()>,
    requests: AtomicU64,
}

impl PermissionNegotiator {
    pub fn new(backend: Arc<dyn MediaBackend>, config: RecorderConfig) -> Self {
        Self {
            backend,
            config,
            granted: RwLock::new(None),
            fresh_grant: Mutex::new(None),
            gate: AsyncMutex::new(()),
            requests: AtomicU64::new(0),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.granted.read().is_some()
    }

    pub fn granted_devices(&self) -> Option<GrantedDevices> {
        self.granted.read().clone()
    }

    /// Number of underlying permission requests issued
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Devices of the most recent grant, returned once per grant
    pub fn take_fresh_grant(&self) -> Option<GrantedDevices> {
        self.fresh_grant.lock().take()
    }

    /// Forget the grant after the platform reported a revocation
    pub fn invalidate(&self) {
        self.fresh_grant.lock().take();
        if self.granted.write().take().is_some() {
            tracing::info!("Camera/microphone permission revoked, will prompt again");
        }
    }

    /// Make sure permission is granted. Never prompts twice concurrently;
    /// callers arriving mid-prompt observe its outcome.
    pub async fn ensure(&self) -> bool {
        if self.is_granted() {
            return true;
        }

        let _gate = self.gate.lock().await;
        if self.is_granted() {
            return true;
        }

        match self.request().await {
            Ok(devices) => {
                tracing::info!(
                    "Permission granted (camera: {:?}, microphone: {:?})",
                    devices.video_device_id,
                    devices.audio_device_id
                );
                *self.fresh_grant.lock() = Some(devices.clone());
                *self.granted.write() = Some(devices);
                true
            }
            Err(e) => {
                tracing::warn!("Permission not obtained: {}", e);
                false
            }
        }
    }

    async fn request(&self) -> RecorderResult<GrantedDevices> {
        if !probe(self.backend.as_ref()).supported {
            return Err(RecorderError::UnsupportedPlatform);
        }

        self.requests.fetch_add(1, Ordering::SeqCst);
        let request = CaptureRequest::default();
        let size = FrameSize::new(self.config.long_side, self.config.short_side);
        let source = self.backend.open(&request.constraints(&self.config, size)).await?;

        let devices = GrantedDevices {
            video_device_id: source
                .video_track()
                .map(|t| t.device_id.clone())
                .unwrap_or_default(),
            audio_device_id: source
                .audio_track()
                .map(|t| t.info.device_id.clone())
                .unwrap_or_default(),
        };

        // Only the grant is wanted, not the devices
        source.stop();
        Ok(devices)
    }
}

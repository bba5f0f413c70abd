//! Device registry
//!
//! Lists cameras and microphones for selection. Each list starts with a
//! synthetic "Default" entry whose empty id lets the platform choose.

use super::permissions::PermissionNegotiator;
use super::traits::{DeviceKind, MediaBackend, MediaDeviceInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Label of the synthetic default entry
pub const DEFAULT_DEVICE_LABEL: &str = "Default";

/// One selectable device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub label: String,
}

impl DeviceEntry {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.id.is_empty()
    }
}

/// Selectable cameras and microphones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCatalog {
    /// False when permission or enumeration failed
    pub success: bool,
    pub video_devices: Vec<DeviceEntry>,
    pub audio_devices: Vec<DeviceEntry>,
}

impl DeviceCatalog {
    pub fn failed() -> Self {
        Self {
            success: false,
            video_devices: Vec::new(),
            audio_devices: Vec::new(),
        }
    }

    /// Split raw enumeration by kind, dedupe ids and add the default entries
    pub fn from_raw(devices: &[MediaDeviceInfo]) -> Self {
        Self {
            success: true,
            video_devices: normalize(devices, DeviceKind::VideoInput),
            audio_devices: normalize(devices, DeviceKind::AudioInput),
        }
    }
}

fn normalize(devices: &[MediaDeviceInfo], kind: DeviceKind) -> Vec<DeviceEntry> {
    let mut seen = HashSet::new();
    let mut entries: Vec<DeviceEntry> = devices
        .iter()
        .filter(|d| d.kind == kind)
        .filter(|d| seen.insert(d.device_id.clone()))
        .map(|d| DeviceEntry::new(d.device_id.clone(), d.label.clone()))
        .collect();

    if !entries.iter().any(DeviceEntry::is_default) {
        entries.insert(0, DeviceEntry::new("", DEFAULT_DEVICE_LABEL));
    }
    entries
}

/// Enumerates devices once permission is in place
pub struct DeviceRegistry {
    backend: Arc<dyn MediaBackend>,
    permissions: Arc<PermissionNegotiator>,
    camera_supported: Arc<AtomicBool>,
}

impl DeviceRegistry {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        permissions: Arc<PermissionNegotiator>,
        camera_supported: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            permissions,
            camera_supported,
        }
    }

    /// Current catalog. Denied permission or a failed enumeration yields an
    /// empty catalog with `success == false`; the latter also marks the
    /// camera as unsupported.
    pub async fn list_devices(&self) -> DeviceCatalog {
        if !self.permissions.ensure().await {
            return DeviceCatalog::failed();
        }

        match self.backend.enumerate_devices().await {
            Ok(devices) => {
                let catalog = DeviceCatalog::from_raw(&devices);
                tracing::debug!(
                    "Enumerated {} cameras, {} microphones",
                    catalog.video_devices.len(),
                    catalog.audio_devices.len()
                );
                catalog
            }
            Err(e) => {
                tracing::error!("Failed to enumerate devices: {}", e);
                self.camera_supported.store(false, Ordering::SeqCst);
                DeviceCatalog::failed()
            }
        }
    }
}

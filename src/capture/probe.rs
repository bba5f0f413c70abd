//! Capability probe
//!
//! Decides whether capture can work at all before anything is acquired.

use super::traits::{DeviceKind, MediaBackend};
use serde::Serialize;

/// Result of a capability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub supported: bool,
}

/// Both acquisition and enumeration must be available. No side effects.
pub fn probe(backend: &dyn MediaBackend) -> ProbeReport {
    let caps = backend.capabilities();
    ProbeReport {
        supported: caps.capture && caps.enumerate,
    }
}

/// Enumeration lists at least one camera and one microphone.
/// Enumeration errors count as absent hardware.
pub async fn has_camera_and_mic(backend: &dyn MediaBackend) -> bool {
    if !probe(backend).supported {
        return false;
    }
    match backend.enumerate_devices().await {
        Ok(devices) => {
            let has_camera = devices.iter().any(|d| d.kind == DeviceKind::VideoInput);
            let has_mic = devices.iter().any(|d| d.kind == DeviceKind::AudioInput);
            has_camera && has_mic
        }
        Err(e) => {
            tracing::warn!("Device enumeration failed during probe: {}", e);
            false
        }
    }
}

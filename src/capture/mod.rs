//! Camera and microphone access
//!
//! The host is reached only through the traits in [`traits`]. The synthetic
//! backend runs in-process; the native backend (feature `native`) drives
//! real devices.

pub mod devices;
pub mod permissions;
pub mod probe;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "native")]
pub mod native;

pub use devices::{DeviceCatalog, DeviceEntry, DeviceRegistry, DEFAULT_DEVICE_LABEL};
pub use permissions::{GrantedDevices, PermissionNegotiator};
pub use probe::{has_camera_and_mic, probe, ProbeReport};
pub use synthetic::{SyntheticBackend, SyntheticPreview};
pub use traits::{
    Capabilities, DeviceKind, DeviceSelector, FacingMode, FrameSize, LiveSource, MediaBackend,
    MediaConstraints, MediaDeviceInfo, MediaEncoder, PreviewTarget, ViewportSize,
};

//! Recording pipeline
//!
//! - `CaptureSessionManager` acquires and normalizes the live source
//! - `RenderSurface` / `RedrawTask` composite it onto a fixed-aspect surface
//! - `EncodeSession` encodes the surface into chunked media

pub mod arbiter;
pub mod compositor;
pub mod encode;
pub mod orientation;
pub mod session;
pub mod state;

pub use arbiter::{CaptureArbiter, CaptureOwner, OwnerId};
pub use compositor::{cover_fit, DrawRect, RedrawTask, RenderSurface};
pub use encode::{negotiate_mime_type, ChunkList, EncodeSession};
pub use orientation::OrientationContext;
pub use session::{CaptureSessionManager, DeviceSelection};
pub use state::{artifact_file_name, extension_for, CaptureRequest, CaptureState, RecordedMedia, RecordingEvent, SizeLimit};

//! Webcam capture using nokhwa
//!
//! The camera lives on its own thread (nokhwa handles are not `Send` on
//! every platform). Decoded frames are published for the compositor and
//! the delivered resolution through a watch channel.

use crate::capture::traits::{DeviceKind, DeviceSelector, FrameSize, MediaDeviceInfo, VideoConstraints, VideoFrame};
use crate::utils::error::{RecorderError, RecorderResult};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{oneshot, watch};

/// Cameras known to nokhwa. Ids are nokhwa camera indices.
pub fn list_cameras() -> RecorderResult<Vec<MediaDeviceInfo>> {
    let cameras = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| RecorderError::DeviceAcquisitionFailed(format!("camera query failed: {}", e)))?;

    Ok(cameras
        .into_iter()
        .map(|info| {
            let id = match info.index() {
                CameraIndex::Index(i) => i.to_string(),
                CameraIndex::String(s) => s.to_string(),
            };
            MediaDeviceInfo::new(id, DeviceKind::VideoInput, info.human_name())
        })
        .collect())
}

fn camera_index(selector: &DeviceSelector) -> CameraIndex {
    match selector.exact_id() {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.to_string()),
        },
        // No facing information on desktop cameras
        None => CameraIndex::Index(0),
    }
}

fn index_id(index: &CameraIndex) -> String {
    match index {
        CameraIndex::Index(i) => i.to_string(),
        CameraIndex::String(s) => s.clone(),
    }
}

/// Map a nokhwa failure onto the acquisition taxonomy
fn acquisition_error(context: &str, error: nokhwa::NokhwaError) -> RecorderError {
    let message = format!("{}: {}", context, error);
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("not authorized") {
        RecorderError::PermissionDenied(message)
    } else {
        RecorderError::DeviceAcquisitionFailed(message)
    }
}

/// Stop flag plus the thread polling the camera. Stopping joins the
/// thread so the device is closed once `stop` returns.
struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureThread {
    fn new(running: Arc<AtomicBool>, handle: JoinHandle<()>) -> Self {
        Self {
            running,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns false when the thread was already stopped
    fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        // Waits for the in-flight frame, at most one frame period
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Webcam capture thread panicked");
            }
        }
        true
    }
}

/// Result of opening the camera on its thread
struct Opened {
    device_id: String,
    label: String,
}

/// A running camera stream
pub struct CameraStream {
    device_id: String,
    label: String,
    latest: Arc<Mutex<Option<Arc<VideoFrame>>>>,
    geometry: watch::Receiver<Option<FrameSize>>,
    thread: CaptureThread,
}

impl CameraStream {
    /// Open the selected camera, asking for the closest MJPEG mode to the
    /// constraints. Resolves once the stream is running.
    pub async fn open(constraints: &VideoConstraints) -> RecorderResult<Self> {
        let index = camera_index(&constraints.device);
        let requested = CameraFormat::new(
            Resolution::new(constraints.width, constraints.height),
            FrameFormat::MJPEG,
            constraints.frame_rate,
        );

        let running = Arc::new(AtomicBool::new(true));
        let latest = Arc::new(Mutex::new(None));
        let (geometry_tx, geometry) = watch::channel(None);
        let (opened_tx, opened_rx) = oneshot::channel::<RecorderResult<Opened>>();

        let thread = {
            let running = running.clone();
            let latest = latest.clone();
            std::thread::spawn(move || {
                let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(requested));
                let mut camera = match Camera::new(index.clone(), format) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = opened_tx.send(Err(acquisition_error("failed to open camera", e)));
                        return;
                    }
                };
                if let Err(e) = camera.open_stream() {
                    let _ = opened_tx.send(Err(acquisition_error("failed to start camera stream", e)));
                    return;
                }

                let resolution = camera.resolution();
                let mut delivered = FrameSize::new(resolution.width(), resolution.height());
                let _ = geometry_tx.send(Some(delivered));
                let _ = opened_tx.send(Ok(Opened {
                    device_id: index_id(&index),
                    label: camera.info().human_name(),
                }));

                tracing::info!(
                    "Webcam opened: {} @ {}fps (requested {}x{})",
                    delivered,
                    camera.frame_rate(),
                    requested.resolution().width(),
                    requested.resolution().height()
                );

                while running.load(Ordering::SeqCst) {
                    // Blocks until the camera delivers the next frame
                    let decoded = match camera.frame().and_then(|frame| frame.decode_image::<RgbAFormat>()) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            tracing::debug!("Failed to capture frame: {}", e);
                            continue;
                        }
                    };

                    let size = FrameSize::new(decoded.width(), decoded.height());
                    let Some(frame) = VideoFrame::from_raw(size.width, size.height, decoded.into_raw()) else {
                        continue;
                    };
                    if size != delivered {
                        tracing::info!("Webcam geometry changed: {} -> {}", delivered, size);
                        delivered = size;
                        let _ = geometry_tx.send(Some(size));
                    }
                    *latest.lock() = Some(Arc::new(frame));
                }

                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Error stopping camera stream: {}", e);
                }
                tracing::info!("Webcam capture thread stopped");
            })
        };

        let opened = match opened_rx.await {
            Ok(result) => result,
            Err(_) => Err(RecorderError::DeviceAcquisitionFailed(
                "camera thread exited before opening".to_string(),
            )),
        };

        match opened {
            Ok(Opened { device_id, label }) => Ok(Self {
                device_id,
                label,
                latest,
                geometry,
                thread: CaptureThread::new(running, thread),
            }),
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Geometry of the frames currently delivered
    pub async fn delivered(&self) -> RecorderResult<FrameSize> {
        let mut geometry = self.geometry.clone();
        let size = *geometry
            .wait_for(|g| g.is_some())
            .await
            .map_err(|_| RecorderError::DeviceAcquisitionFailed("camera stream ended".to_string()))?;
        size.ok_or_else(|| RecorderError::DeviceAcquisitionFailed("camera stream ended".to_string()))
    }

    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.latest.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }

    /// Stop capturing and close the camera. Blocks until the capture thread
    /// has finished its current frame and released the device.
    pub fn stop(&self) {
        if self.thread.stop() {
            self.latest.lock().take();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_waits_for_the_device_to_close() {
        let running = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(AtomicBool::new(false));
        let handle = {
            let running = running.clone();
            let closed = closed.clone();
            std::thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    // Stands in for a blocking frame read
                    std::thread::sleep(std::time::Duration::from_millis(30));
                }
                std::thread::sleep(std::time::Duration::from_millis(30));
                closed.store(true, Ordering::SeqCst);
            })
        };
        let thread = CaptureThread::new(running, handle);

        assert!(thread.is_running());
        assert!(thread.stop());
        assert!(closed.load(Ordering::SeqCst));
        assert!(!thread.is_running());
        assert!(!thread.stop());
    }

    #[test]
    fn test_camera_index_from_selector() {
        assert!(matches!(camera_index(&DeviceSelector::Default), CameraIndex::Index(0)));
        assert!(matches!(
            camera_index(&DeviceSelector::Exact("2".to_string())),
            CameraIndex::Index(2)
        ));
        assert!(matches!(
            camera_index(&DeviceSelector::Exact("/dev/video4".to_string())),
            CameraIndex::String(_)
        ));
    }
}

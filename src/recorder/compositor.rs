//! Frame compositor
//!
//! Cover-fits the live video onto a fixed-aspect render surface. The surface,
//! not the preview, is what the encoder samples.

use crate::capture::traits::{FrameSize, LiveSource, VideoFrame};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Where a source frame lands on the surface. May extend past the edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Scale `source` so it fully covers `surface`, centering the overflow axis
pub fn cover_fit(source: FrameSize, surface: FrameSize) -> DrawRect {
    let source_aspect = source.aspect();
    let surface_aspect = surface.aspect();
    let (surface_w, surface_h) = (surface.width as f64, surface.height as f64);

    if source_aspect > surface_aspect {
        // Wider than the surface: match height, overflow width
        let height = surface_h;
        let width = height * source_aspect;
        DrawRect {
            x: (surface_w - width) / 2.0,
            y: 0.0,
            width,
            height,
        }
    } else {
        let width = surface_w;
        let height = width / source_aspect;
        DrawRect {
            x: 0.0,
            y: (surface_h - height) / 2.0,
            width,
            height,
        }
    }
}

/// Region of the source that stays visible after a cover fit, in source pixels
fn visible_region(source: FrameSize, rect: &DrawRect) -> (u32, u32, u32, u32) {
    let scale = rect.width / source.width as f64;
    let x = ((-rect.x) / scale).max(0.0).round() as u32;
    let y = ((-rect.y) / scale).max(0.0).round() as u32;
    let width = (source.width.saturating_sub(2 * x)).max(1);
    let height = (source.height.saturating_sub(2 * y)).max(1);
    (x, y, width, height)
}

/// Fixed-size off-screen drawing target sampled by the encoder
#[derive(Debug)]
pub struct RenderSurface {
    size: FrameSize,
    canvas: Mutex<RgbaImage>,
    frames_drawn: AtomicU64,
}

impl RenderSurface {
    /// Blank surface of exactly `size`
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            canvas: Mutex::new(RgbaImage::from_pixel(size.width, size.height, Rgba([0, 0, 0, 255]))),
            frames_drawn: AtomicU64::new(0),
        }
    }

    /// 9:16 for portrait sources, 16:9 otherwise, with the long side fixed
    pub fn layout_for(source: FrameSize, long_side: u32) -> FrameSize {
        let short_side = long_side * 9 / 16;
        if source.is_portrait() {
            FrameSize::new(short_side, long_side)
        } else {
            FrameSize::new(long_side, short_side)
        }
    }

    /// Surface sized from the delivered (not requested) source geometry
    pub fn for_source(source: FrameSize, long_side: u32) -> Self {
        Self::new(Self::layout_for(source, long_side))
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn aspect(&self) -> f64 {
        self.size.aspect()
    }

    /// Draw one frame with a cover fit
    pub fn draw_cover(&self, frame: &VideoFrame) {
        let source = FrameSize::new(frame.width(), frame.height());
        if source.is_empty() {
            return;
        }

        let rect = cover_fit(source, self.size);
        let (x, y, width, height) = visible_region(source, &rect);
        let cropped = imageops::crop_imm(frame, x, y, width, height).to_image();
        let scaled = imageops::resize(&cropped, self.size.width, self.size.height, FilterType::Triangle);

        *self.canvas.lock() = scaled;
        self.frames_drawn.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of the current surface contents
    pub fn snapshot(&self) -> RgbaImage {
        self.canvas.lock().clone()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Relaxed)
    }
}

/// Cancellable repeating redraw task. Cancelling twice is a no-op.
#[derive(Debug, Default)]
pub struct RedrawTask {
    handle: Option<JoinHandle<()>>,
}

impl RedrawTask {
    /// Redraw the latest source frame onto `surface` every `period`
    pub fn spawn(source: Arc<dyn LiveSource>, surface: Arc<RenderSurface>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last: Option<Arc<VideoFrame>> = None;

            loop {
                ticker.tick().await;
                if !source.is_live() {
                    tracing::debug!("Source {} ended, redraw loop exiting", source.id());
                    break;
                }
                let Some(frame) = source.latest_frame() else {
                    continue;
                };
                if last.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, &frame)) {
                    continue;
                }
                surface.draw_cover(&frame);
                last = Some(frame);
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Returns whether a running task was cancelled by this call
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RedrawTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

//! Encode session
//!
//! Drives the encoder against the render surface (video) and the live
//! source (audio), collects the chunks it hands over and assembles the
//! final artifact on stop.

use super::compositor::{RedrawTask, RenderSurface};
use super::state::{RecordedMedia, RecordingEvent};
use crate::capture::traits::{LiveSource, MediaBackend, MediaEncoder};
use crate::config::FALLBACK_MIME_TYPE;
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// How long stop waits for the last chunks after the encoder acknowledged
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// First supported type from `preferences`, else the generic WebM fallback
pub fn negotiate_mime_type(backend: &dyn MediaBackend, preferences: &[String]) -> String {
    if let Some(mime) = preferences.iter().find(|m| backend.is_type_supported(m)) {
        return mime.clone();
    }
    tracing::warn!(
        "{}; using {}",
        RecorderError::EncoderUnavailable("no preferred MIME type is supported".to_string()),
        FALLBACK_MIME_TYPE
    );
    FALLBACK_MIME_TYPE.to_string()
}

/// Encoded chunks in arrival order
#[derive(Debug, Default)]
pub struct ChunkList {
    chunks: Vec<Vec<u8>>,
    total_bytes: u64,
}

impl ChunkList {
    /// Append a chunk. Empty chunks are skipped and return `None`;
    /// otherwise returns the new total.
    pub fn push(&mut self, chunk: Vec<u8>) -> Option<u64> {
        if chunk.is_empty() {
            return None;
        }
        self.total_bytes += chunk.len() as u64;
        self.chunks.push(chunk);
        Some(self.total_bytes)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenate every chunk
    pub fn assemble(self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// One start..stop cycle
struct RecordingSession {
    chunks: Arc<Mutex<ChunkList>>,
    collector: JoinHandle<()>,
}

struct EncoderSlot {
    encoder: Box<dyn MediaEncoder>,
    session: Option<RecordingSession>,
}

/// Encoder bound to one render surface and live source
pub struct EncodeSession {
    mime_type: String,
    surface: Arc<RenderSurface>,
    source: Arc<dyn LiveSource>,
    timeslice: Duration,
    redraw_period: Duration,
    slot: AsyncMutex<EncoderSlot>,
    redraw: Mutex<RedrawTask>,
    recording: AtomicBool,
    total_size: Arc<AtomicU64>,
    events: broadcast::Sender<RecordingEvent>,
}

impl EncodeSession {
    pub fn new(
        encoder: Box<dyn MediaEncoder>,
        surface: Arc<RenderSurface>,
        source: Arc<dyn LiveSource>,
        timeslice: Duration,
        redraw_period: Duration,
        events: broadcast::Sender<RecordingEvent>,
    ) -> Self {
        Self {
            mime_type: encoder.mime_type().to_string(),
            surface,
            source,
            timeslice,
            redraw_period,
            slot: AsyncMutex::new(EncoderSlot {
                encoder,
                session: None,
            }),
            redraw: Mutex::new(RedrawTask::default()),
            recording: AtomicBool::new(false),
            total_size: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn surface(&self) -> &Arc<RenderSurface> {
        &self.surface
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Sum of chunk lengths of the running (or last) recording
    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::SeqCst)
    }

    pub fn is_redrawing(&self) -> bool {
        self.redraw.lock().is_active()
    }

    /// Start encoding. Fails if a recording is already active.
    pub async fn start(&self) -> RecorderResult<()> {
        let mut slot = self.slot.lock().await;
        if slot.session.is_some() {
            return Err(RecorderError::InvalidState("recording already active".to_string()));
        }
        if !self.source.is_live() {
            return Err(RecorderError::InvalidState("live source has ended".to_string()));
        }

        let chunks = Arc::new(Mutex::new(ChunkList::default()));
        self.total_size.store(0, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let collector = {
            let chunks = chunks.clone();
            let total_size = self.total_size.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    let appended = chunks.lock().push(chunk);
                    if let Some(total) = appended {
                        total_size.store(total, Ordering::SeqCst);
                        let _ = events.send(RecordingEvent::Progress { total_size: total });
                    }
                }
            })
        };

        // The compositor is the encoder's only video producer
        *self.redraw.lock() = RedrawTask::spawn(self.source.clone(), self.surface.clone(), self.redraw_period);

        if let Err(e) = slot.encoder.start(self.timeslice, tx) {
            self.redraw.lock().cancel();
            collector.abort();
            return Err(e);
        }

        slot.session = Some(RecordingSession { chunks, collector });
        self.recording.store(true, Ordering::SeqCst);
        let _ = self.events.send(RecordingEvent::Started);

        tracing::info!(
            "Encoding started: {} @ {} ({}ms timeslice)",
            self.mime_type,
            self.surface.size(),
            self.timeslice.as_millis()
        );
        Ok(())
    }

    /// Finalize and return the artifact. Returns `None` when nothing is
    /// recording, including for a second concurrent caller.
    pub async fn stop(&self) -> Option<RecordedMedia> {
        let mut slot = self.slot.lock().await;
        let session = slot.session.take()?;

        if let Err(e) = slot.encoder.stop().await {
            tracing::warn!("Encoder finalize failed: {}", e);
        }

        let RecordingSession { chunks, mut collector } = session;
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut collector).await.is_err() {
            tracing::warn!("Encoder kept its chunk sender open after stop");
            collector.abort();
        }

        self.redraw.lock().cancel();
        self.recording.store(false, Ordering::SeqCst);

        let chunks = std::mem::take(&mut *chunks.lock());
        let total_size = chunks.total_bytes();
        let chunk_count = chunks.len();
        let data = chunks.assemble();
        let _ = self.events.send(RecordingEvent::Stopped { total_size });

        tracing::info!(
            "Encoding stopped: {} chunks, {} bytes ({})",
            chunk_count,
            total_size,
            self.mime_type
        );

        Some(RecordedMedia {
            data,
            mime_type: self.mime_type.clone(),
        })
    }

    /// Tear down synchronously, discarding any buffered data. A stop already
    /// in flight finishes on its own.
    pub fn abort(&self) {
        self.redraw.lock().cancel();

        let Ok(mut slot) = self.slot.try_lock() else {
            return;
        };
        if let Some(session) = slot.session.take() {
            slot.encoder.abort();
            session.collector.abort();
            self.recording.store(false, Ordering::SeqCst);
            let _ = self.events.send(RecordingEvent::Aborted);
            tracing::info!("Encoding aborted ({} bytes discarded)", self.total_size());
        }
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_list_totals() {
        let mut list = ChunkList::default();
        let totals: Vec<u64> = [1000usize, 2000, 1500]
            .iter()
            .filter_map(|&n| list.push(vec![0u8; n]))
            .collect();

        assert_eq!(totals, vec![1000, 3000, 4500]);
        assert_eq!(list.total_bytes(), 4500);
        assert_eq!(list.assemble().len(), 4500);
    }

    #[test]
    fn test_chunk_list_skips_empty() {
        let mut list = ChunkList::default();
        assert_eq!(list.push(Vec::new()), None);
        assert!(list.is_empty());
        assert_eq!(list.push(vec![1, 2, 3]), Some(3));
        assert_eq!(list.push(vec![4]), Some(4));
        assert_eq!(list.assemble(), vec![1, 2, 3, 4]);
    }
}

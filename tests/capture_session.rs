use camera_recorder::capture::permissions::PermissionNegotiator;
use camera_recorder::capture::synthetic::{SyntheticBackend, SyntheticPreview};
use camera_recorder::capture::traits::{FrameSize, ViewportSize};
use camera_recorder::recorder::{CaptureArbiter, CaptureSessionManager, CaptureState, RecordingEvent};
use camera_recorder::utils::MemoryLogSink;
use camera_recorder::RecorderConfig;
use std::sync::Arc;

const PHONE_PORTRAIT: ViewportSize = ViewportSize::new(390, 844);
const DESKTOP: ViewportSize = ViewportSize::new(1440, 900);

struct Harness {
    backend: Arc<SyntheticBackend>,
    arbiter: Arc<CaptureArbiter>,
    log: Arc<MemoryLogSink>,
}

impl Harness {
    fn new() -> Self {
        Self {
            backend: Arc::new(SyntheticBackend::new()),
            arbiter: Arc::new(CaptureArbiter::new()),
            log: Arc::new(MemoryLogSink::new()),
        }
    }

    fn manager_with(&self, viewport: ViewportSize, config: RecorderConfig) -> CaptureSessionManager {
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

    fn manager(&self, viewport: ViewportSize) -> CaptureSessionManager {
        self.manager_with(
            viewport,
            RecorderConfig {
                rotation_settle_ms: 0,
                ..RecorderConfig::default()
            },
        )
    }
}

#[tokio::test]
async fn surface_follows_delivered_not_requested_orientation() {
    let h = Harness::new();
    // Portrait requested twice, landscape delivered twice
    h.backend.push_delivery(vec![FrameSize::new(640, 360)]);
    h.backend.push_delivery(vec![FrameSize::new(640, 360)]);
    let manager = h.manager(PHONE_PORTRAIT);

    assert!(manager.start().await);

    let surface = manager.surface().unwrap();
    assert_eq!(surface.size(), FrameSize::new(640, 360));
    assert!((surface.aspect() - 16.0 / 9.0).abs() < 1e-9);
    assert_eq!(manager.state(), CaptureState::Ready);
}

#[tokio::test]
async fn surface_is_portrait_for_portrait_delivery_on_desktop() {
    let h = Harness::new();
    h.backend.push_delivery(vec![FrameSize::new(480, 640)]);
    h.backend.push_delivery(vec![FrameSize::new(720, 1280)]);
    let manager = h.manager(DESKTOP);

    assert!(manager.start().await);

    let surface = manager.surface().unwrap();
    assert_eq!(surface.size(), FrameSize::new(360, 640));
    assert!((surface.aspect() - 9.0 / 16.0).abs() < 1e-9);
}

#[tokio::test]
async fn orientation_retry_fires_once_and_settles_ready() {
    let h = Harness::new();
    h.backend.push_delivery(vec![FrameSize::new(640, 360)]);
    h.backend.push_delivery(vec![FrameSize::new(360, 640)]);
    let manager = h.manager(PHONE_PORTRAIT);

    assert!(manager.start().await);

    assert_eq!(h.backend.open_count(), 2);
    assert_eq!(manager.attempts(), 2);
    assert_eq!(manager.state(), CaptureState::Ready);
    assert_eq!(h.backend.live_source_count(), 1);
    assert_eq!(manager.surface().unwrap().size(), FrameSize::new(360, 640));

    // The retry asks for swapped dimensions
    let requested: Vec<(u32, u32)> = h
        .backend
        .constraints_log()
        .iter()
        .map(|c| (c.video.width, c.video.height))
        .collect();
    assert_eq!(requested, vec![(360, 640), (640, 360)]);

    let lines = h.log.lines();
    assert!(lines.iter().any(|l| l.contains("Orientation retry")));
    assert!(lines.iter().any(|l| l.contains("Orientation fixed")));
}

#[tokio::test]
async fn second_inversion_is_accepted() {
    let h = Harness::new();
    h.backend.push_delivery(vec![FrameSize::new(640, 360)]);
    h.backend.push_delivery(vec![FrameSize::new(640, 360)]);
    h.backend.push_delivery(vec![FrameSize::new(360, 640)]);
    let manager = h.manager(PHONE_PORTRAIT);

    assert!(manager.start().await);
    assert_eq!(h.backend.open_count(), 2);
    assert_eq!(manager.state(), CaptureState::Ready);
}

#[tokio::test(start_paused = true)]
async fn pending_rotation_is_awaited_before_retrying() {
    let h = Harness::new();
    h.backend
        .push_delivery(vec![FrameSize::new(640, 360), FrameSize::new(360, 640)]);
    let manager = h.manager_with(PHONE_PORTRAIT, RecorderConfig::default());

    assert!(manager.start().await);
    assert_eq!(h.backend.open_count(), 1);
    assert_eq!(manager.surface().unwrap().size(), FrameSize::new(360, 640));
}

#[tokio::test]
async fn starting_b_releases_a() {
    let h = Harness::new();
    let a = h.manager(DESKTOP);
    let b = h.manager(DESKTOP);

    assert!(a.start().await);
    assert!(h.arbiter.is_held_by(a.id()));

    assert!(b.start().await);
    assert_eq!(a.state(), CaptureState::Idle);
    assert_eq!(b.state(), CaptureState::Ready);
    assert!(h.arbiter.is_held_by(b.id()));
    assert_eq!(h.backend.live_source_count(), 1);

    assert!(a.start().await);
    assert_eq!(b.state(), CaptureState::Idle);
    assert!(h.arbiter.is_held_by(a.id()));
    assert_eq!(h.backend.live_source_count(), 1);
}

#[tokio::test]
async fn restarting_the_holder_keeps_one_source() {
    let h = Harness::new();
    let a = h.manager(DESKTOP);

    assert!(a.start().await);
    assert!(a.start().await);

    assert_eq!(h.backend.open_count(), 2);
    assert_eq!(h.backend.live_source_count(), 1);
    assert!(h.arbiter.is_held_by(a.id()));
}

#[tokio::test]
async fn preempting_a_recording_aborts_it() {
    let h = Harness::new();
    let a = h.manager(DESKTOP);
    let b = h.manager(DESKTOP);
    let mut events = a.subscribe();

    assert!(a.start().await);
    a.start_recording().await.unwrap();
    assert!(b.start().await);

    assert_eq!(a.state(), CaptureState::Idle);
    assert!(a.stop_recording().await.is_none());

    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        aborted |= event == RecordingEvent::Aborted;
    }
    assert!(aborted);
}

#[tokio::test]
async fn failed_start_leaves_idle_and_token_free() {
    let h = Harness::new();
    let a = h.manager(DESKTOP);
    assert!(a.start().await);

    h.backend.set_busy(true);
    assert!(!a.start().await);

    assert_eq!(a.state(), CaptureState::Idle);
    assert_eq!(h.arbiter.holder(), None);
    assert_eq!(h.backend.live_source_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn total_size_is_reported_after_each_chunk() {
    let h = Harness::new();
    h.backend.set_encoder_script(vec![1000, 2000, 1500]);
    let manager = h.manager(DESKTOP);
    let mut events = manager.subscribe();

    assert!(manager.start().await);
    manager.start_recording().await.unwrap();
    assert_eq!(manager.state(), CaptureState::Recording);

    let mut totals = Vec::new();
    while totals.len() < 3 {
        if let RecordingEvent::Progress { total_size } = events.recv().await.unwrap() {
            totals.push(total_size);
        }
    }
    assert_eq!(totals, vec![1000, 3000, 4500]);
    assert_eq!(manager.total_size(), 4500);

    let media = manager.stop_recording().await.unwrap();
    assert_eq!(media.len(), 4500);
    assert_eq!(media.mime_type, "video/mp4;codecs=h264,aac");
    assert_eq!(manager.state(), CaptureState::Ready);
}

#[tokio::test(start_paused = true)]
async fn concurrent_stops_finalize_once() {
    let h = Harness::new();
    h.backend.set_encoder_script(vec![1000, 2000, 1500]);
    let manager = h.manager(DESKTOP);

    assert!(manager.start().await);
    manager.start_recording().await.unwrap();

    let (first, second) = tokio::join!(manager.stop_recording(), manager.stop_recording());
    let results = [first, second];

    let artifacts: Vec<_> = results.iter().flatten().collect();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].len(), 4500);
    assert_eq!(h.backend.finalize_count(), 1);

    // Stopping again after the fact is still harmless
    assert!(manager.stop_recording().await.is_none());
    assert_eq!(h.backend.finalize_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn finalizing_passes_through_stopping() {
    let h = Harness::new();
    h.backend.set_encoder_script(vec![800]);
    h.backend.set_finalize_delay(std::time::Duration::from_millis(50));
    let manager = h.manager(DESKTOP);
    assert!(manager.start().await);
    manager.start_recording().await.unwrap();

    let observed = async {
        loop {
            let state = manager.state();
            if state != CaptureState::Recording {
                return state;
            }
            tokio::task::yield_now().await;
        }
    };
    let (media, seen) = tokio::join!(manager.stop_recording(), observed);

    assert_eq!(seen, CaptureState::Stopping);
    assert_eq!(media.unwrap().len(), 800);
    assert_eq!(manager.state(), CaptureState::Ready);
}

#[tokio::test(start_paused = true)]
async fn recording_can_be_repeated_on_one_source() {
    let h = Harness::new();
    h.backend.set_encoder_script(vec![500]);
    let manager = h.manager(DESKTOP);
    assert!(manager.start().await);

    for _ in 0..2 {
        manager.start_recording().await.unwrap();
        let media = manager.stop_recording().await.unwrap();
        assert_eq!(media.len(), 500);
    }
    assert_eq!(h.backend.finalize_count(), 2);
    assert_eq!(h.backend.open_count(), 1);
}

#[tokio::test]
async fn recording_requires_ready() {
    let h = Harness::new();
    let manager = h.manager(DESKTOP);

    assert!(manager.start_recording().await.is_err());

    assert!(manager.start().await);
    manager.start_recording().await.unwrap();
    assert!(manager.start_recording().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn compositor_draws_onto_the_surface_while_recording() {
    let h = Harness::new();
    let manager = h.manager(DESKTOP);
    assert!(manager.start().await);
    let surface = manager.surface().unwrap();
    assert_eq!(surface.frames_drawn(), 0);

    manager.start_recording().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(surface.frames_drawn() >= 1);

    manager.stop_recording().await.unwrap();
    let drawn = surface.frames_drawn();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(surface.frames_drawn(), drawn);
}

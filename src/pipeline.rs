//! Face pipeline driver.
//!
//! Owns the capture thread: one landmark inference per iteration, so slow
//! inference naturally backpressures the loop instead of piling up calls.
//! Sustained low throughput relaxes analysis cost exactly once; the
//! degradation is never re-escalated.

use crate::config::FaceCaptureConfig;
use crate::errors::CaptureError;
use crate::events::{EventQueue, SessionEvent};
use crate::landmarks::LandmarkSource;
use crate::session::{CapturePhase, CaptureSession};
use crate::types::VideoFrame;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Raster frame provider. The underlying camera stream is owned by the
/// caller; the pipeline only reads from it and never starts or stops it.
pub trait FrameSource: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Produce the current frame. Implementations typically block until the
    /// next frame is displayed, which paces the loop.
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Open,
    Started,
    Stopped,
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub ticks: u64,
    pub effective_fps: f32,
    pub dropped_events: u64,
    pub degraded: bool,
}

struct Inner {
    state: Mutex<PipelineState>,
    session: Mutex<CaptureSession>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    detector: Mutex<Option<Box<dyn LandmarkSource>>>,
    events: Arc<EventQueue<SessionEvent>>,
    stop_flag: AtomicBool,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    degraded: AtomicBool,
    ticks: AtomicU64,
    /// Caller-facing handles only; the loop thread's `Arc<Inner>` clone is
    /// deliberately not counted here.
    handles: AtomicUsize,
}

/// Handle to a running (or stopped) capture pipeline.
pub struct CapturePipeline {
    inner: Arc<Inner>,
}

impl CapturePipeline {
    /// Build a pipeline around an external frame source and a pluggable
    /// landmark detector. A detector that fails its readiness probe is the
    /// one fatal condition: the pipeline reports capability-unavailable and
    /// is never constructed.
    pub fn open(
        source: Box<dyn FrameSource>,
        mut detector: Box<dyn LandmarkSource>,
        config: FaceCaptureConfig,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigError)?;
        detector.warm_up()?;

        let events = Arc::new(EventQueue::new(1024));
        let session = CaptureSession::new(
            config.pipeline.clone(),
            config.gate.clone(),
            events.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PipelineState::Open),
                session: Mutex::new(session),
                source: Mutex::new(Some(source)),
                detector: Mutex::new(Some(detector)),
                events,
                stop_flag: AtomicBool::new(false),
                thread: Mutex::new(None),
                degraded: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
                handles: AtomicUsize::new(1),
            }),
        })
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        if *state == PipelineState::Started {
            return Err(CaptureError::SessionError(
                "pipeline already started".to_string(),
            ));
        }

        self.inner.stop_flag.store(false, Ordering::Relaxed);
        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("facecapture-pipeline".to_string())
            .spawn(move || capture_loop(inner))
            .map_err(|e| CaptureError::SessionError(format!("spawn failed: {}", e)))?;

        *self.inner.thread.lock().expect("lock poisoned") = Some(handle);
        *state = PipelineState::Started;
        Ok(())
    }

    pub fn stop(&self, join_timeout: Duration) -> Result<(), CaptureError> {
        {
            let state = self.inner.state.lock().expect("lock poisoned");
            if *state != PipelineState::Started {
                return Err(CaptureError::SessionError(
                    "pipeline is not running".to_string(),
                ));
            }
        }

        self.inner.stop_flag.store(true, Ordering::Relaxed);
        let handle = self.inner.thread.lock().expect("lock poisoned").take();

        if let Some(handle) = handle {
            let start = Instant::now();
            let mut handle = Some(handle);
            loop {
                if handle.as_ref().is_some_and(|h| h.is_finished()) {
                    if let Some(h) = handle.take() {
                        let _ = h.join();
                    }
                    break;
                }
                if start.elapsed() >= join_timeout {
                    // Keep the handle so a later stop can retry the join.
                    *self.inner.thread.lock().expect("lock poisoned") = handle.take();
                    return Err(CaptureError::SessionError(
                        "timed out joining pipeline thread".to_string(),
                    ));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        *self.inner.state.lock().expect("lock poisoned") = PipelineState::Stopped;
        Ok(())
    }

    /// Drain the next event, waiting up to `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Result<Option<SessionEvent>, CaptureError> {
        self.inner.events.pop_timeout(timeout)
    }

    /// Reinitialize the capture session for a new attempt.
    pub fn reset(&self) {
        self.inner.session.lock().expect("lock poisoned").reset();
    }

    pub fn phase(&self) -> CapturePhase {
        self.inner.session.lock().expect("lock poisoned").phase()
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.inner
            .session
            .lock()
            .expect("lock poisoned")
            .session_id()
    }

    pub fn stats(&self) -> PipelineStats {
        let session = self.inner.session.lock().expect("lock poisoned");
        PipelineStats {
            ticks: self.inner.ticks.load(Ordering::Relaxed),
            effective_fps: session.fps(),
            dropped_events: self.inner.events.dropped(),
            degraded: self.inner.degraded.load(Ordering::Relaxed),
        }
    }
}

impl Clone for CapturePipeline {
    fn clone(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if self.inner.handles.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        // Last caller handle gone: the loop thread must not outlive it.
        self.inner.stop_flag.store(true, Ordering::Relaxed);
        self.inner.events.close();
        if let Some(handle) = self.inner.thread.lock().expect("lock poisoned").take() {
            let deadline = Instant::now() + Duration::from_secs(1);
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

fn capture_loop(inner: Arc<Inner>) {
    let mut source = match inner.source.lock().expect("lock poisoned").take() {
        Some(s) => s,
        None => return,
    };
    let mut detector = match inner.detector.lock().expect("lock poisoned").take() {
        Some(d) => d,
        None => {
            *inner.source.lock().expect("lock poisoned") = Some(source);
            return;
        }
    };

    while !inner.stop_flag.load(Ordering::Relaxed) {
        let frame = match source.next_frame() {
            Ok(f) => f,
            Err(e) => {
                // Per-tick failures never stop the loop.
                log::warn!("frame source error, retrying: {}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        // At most one inference call in flight: the next iteration does not
        // begin until this result is consumed.
        let landmarks = match detector.detect(&frame) {
            Ok(l) => l,
            Err(e) => {
                log::debug!("detector error this tick: {}", e);
                None
            }
        };

        let mut session = inner.session.lock().expect("lock poisoned");
        session.tick(&frame, landmarks.as_ref(), Instant::now());
        inner.ticks.fetch_add(1, Ordering::Relaxed);

        if !inner.degraded.load(Ordering::Relaxed) && session.fps_below_floor() {
            inner.degraded.store(true, Ordering::Relaxed);
            let fps = session.fps();
            drop(session);
            detector.set_refinement(false);
            inner
                .events
                .push_drop_oldest(SessionEvent::PerformanceDegraded { effective_fps: fps });
            log::warn!(
                "throughput {:.1} fps below floor, landmark refinement disabled",
                fps
            );
        }
    }

    // Hand resources back so the pipeline can be restarted.
    *inner.source.lock().expect("lock poisoned") = Some(source);
    *inner.detector.lock().expect("lock poisoned") = Some(detector);
}

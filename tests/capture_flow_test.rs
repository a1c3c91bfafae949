//! Capture Flow Testing
//!
//! End-to-end tests for the capture pipeline public API:
//! - Full stabilize / blink / capture sequence through the running pipeline
//! - Exactly-once delivery of the capture payload
//! - Session reset and identifier rotation
//! - Behavior when no face is ever detected

use facecapture::testing::{checker_frame, face_landmarks, ScriptedLandmarkSource};
use facecapture::{
    CaptureError, CapturePhase, CapturePipeline, FaceCaptureConfig, FrameSource, LandmarkSet,
    SessionEvent, VideoFrame,
};
use std::time::{Duration, Instant};

/// Replays one frame at a fixed cadence so wall-clock debounce and delay
/// windows behave like a real camera feed.
struct PacedSource {
    frame: VideoFrame,
    interval: Duration,
}

impl FrameSource for PacedSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.frame.width, self.frame.height)
    }

    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
        std::thread::sleep(self.interval);
        Ok(self.frame.clone())
    }
}

fn paced_checker() -> Box<PacedSource> {
    Box::new(PacedSource {
        frame: checker_frame(640, 480, 4, 30, 225),
        interval: Duration::from_millis(10),
    })
}

/// Shortened windows so the full flow runs in well under a second.
fn fast_config() -> FaceCaptureConfig {
    let mut config = FaceCaptureConfig::default();
    config.pipeline.required_stable_frames = 10;
    config.pipeline.required_blink_count = 2;
    config.pipeline.blink_debounce_ms = 50;
    config.pipeline.pending_delay_ms = 100;
    config.pipeline.sample_every_n = 2;
    config
}

fn blink_script(blinks: usize) -> Vec<Option<LandmarkSet>> {
    let open = face_landmarks(0.5, 0.5, 0.22, 0.35);
    let closed = face_landmarks(0.5, 0.5, 0.22, 0.12);

    let mut script = Vec::new();
    for _ in 0..15 {
        script.push(Some(open.clone()));
    }
    for _ in 0..blinks {
        for _ in 0..2 {
            script.push(Some(closed.clone()));
        }
        for _ in 0..10 {
            script.push(Some(open.clone()));
        }
    }
    script
}

fn drain_until_capture(pipeline: &CapturePipeline, deadline: Duration) -> Vec<SessionEvent> {
    let until = Instant::now() + deadline;
    let mut events = Vec::new();
    while Instant::now() < until {
        match pipeline.next_event(Duration::from_millis(100)).unwrap() {
            Some(event) => {
                let done = matches!(event, SessionEvent::Captured(_));
                events.push(event);
                if done {
                    break;
                }
            }
            None => {}
        }
    }
    events
}

#[test]
fn test_full_capture_flow_through_pipeline() {
    let detector = Box::new(ScriptedLandmarkSource::new(blink_script(2)));
    let pipeline = CapturePipeline::open(paced_checker(), detector, fast_config()).unwrap();
    pipeline.start().unwrap();

    let events = drain_until_capture(&pipeline, Duration::from_secs(10));
    pipeline.stop(Duration::from_secs(2)).unwrap();

    let captures: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Captured(cap) => Some(cap),
            _ => None,
        })
        .collect();
    assert_eq!(captures.len(), 1, "events: {}", events.len());

    let cap = captures[0];
    assert_eq!(cap.width, 384);
    assert_eq!(cap.height, 384);
    // PNG signature.
    assert_eq!(&cap.data[0..4], &[0x89, b'P', b'N', b'G']);
    assert!(cap.accepted_with.is_empty());
    assert_eq!(cap.session_id, pipeline.session_id());

    let blink_events = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::BlinkDetected { .. }))
        .count();
    assert_eq!(blink_events, 2);

    assert_eq!(pipeline.phase(), CapturePhase::Captured);
}

#[test]
fn test_no_second_capture_after_terminal_phase() {
    // Extra blinks after the trigger must not produce another payload.
    let detector = Box::new(ScriptedLandmarkSource::new(blink_script(5)));
    let pipeline = CapturePipeline::open(paced_checker(), detector, fast_config()).unwrap();
    pipeline.start().unwrap();

    let mut events = drain_until_capture(&pipeline, Duration::from_secs(10));
    // Keep draining past the capture for a while.
    let until = Instant::now() + Duration::from_millis(500);
    while Instant::now() < until {
        if let Some(event) = pipeline.next_event(Duration::from_millis(50)).unwrap() {
            events.push(event);
        }
    }
    pipeline.stop(Duration::from_secs(2)).unwrap();

    let captures = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Captured(_)))
        .count();
    assert_eq!(captures, 1);
}

#[test]
fn test_reset_rotates_session_id() {
    let detector = Box::new(ScriptedLandmarkSource::new(blink_script(2)));
    let pipeline = CapturePipeline::open(paced_checker(), detector, fast_config()).unwrap();
    pipeline.start().unwrap();

    drain_until_capture(&pipeline, Duration::from_secs(10));
    let first_id = pipeline.session_id();
    assert_eq!(pipeline.phase(), CapturePhase::Captured);

    pipeline.reset();
    assert_ne!(pipeline.session_id(), first_id);
    assert_eq!(pipeline.phase(), CapturePhase::Idle);

    pipeline.stop(Duration::from_secs(2)).unwrap();
}

#[test]
fn test_no_face_stays_idle() {
    let detector = Box::new(ScriptedLandmarkSource::new(vec![None]));
    let pipeline = CapturePipeline::open(paced_checker(), detector, fast_config()).unwrap();
    pipeline.start().unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(pipeline.phase(), CapturePhase::Idle);
    let stats = pipeline.stats();
    assert!(stats.ticks > 0);
    assert!(!stats.degraded);

    pipeline.stop(Duration::from_secs(2)).unwrap();
}

//! Offline pipeline simulation: drives the full capture flow with synthetic
//! frames and a scripted landmark detector, printing events as they arrive.
//!
//! Useful for exercising the state machine end to end without a camera:
//! stabilize, blink three times, capture.

use anyhow::Result;
use facecapture::testing::{checker_frame, face_landmarks, ScriptedLandmarkSource};
use facecapture::{
    CapturePipeline, CaptureError, FaceCaptureConfig, FrameSource, SessionEvent, VideoFrame,
};
use std::time::{Duration, Instant};

/// Replays one synthetic frame at a fixed rate, like a 30 fps camera.
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

fn blink_script() -> Vec<Option<facecapture::LandmarkSet>> {
    let open = face_landmarks(0.5, 0.5, 0.22, 0.35);
    let closed = face_landmarks(0.5, 0.5, 0.22, 0.12);

    let mut script = Vec::new();
    // Hold steady through the stabilization window.
    for _ in 0..70 {
        script.push(Some(open.clone()));
    }
    // Three blinks, spaced well past the debounce window at 30 fps.
    for _ in 0..3 {
        for _ in 0..3 {
            script.push(Some(closed.clone()));
        }
        for _ in 0..22 {
            script.push(Some(open.clone()));
        }
    }
    // Keep the face steady through the pending delay and the gate.
    for _ in 0..60 {
        script.push(Some(open.clone()));
    }
    script
}

fn main() -> Result<()> {
    facecapture::init_logging();

    let source = PacedSource {
        frame: checker_frame(640, 480, 4, 30, 225),
        interval: Duration::from_millis(33),
    };
    let detector = ScriptedLandmarkSource::new(blink_script());

    let pipeline = CapturePipeline::open(
        Box::new(source),
        Box::new(detector),
        FaceCaptureConfig::load_or_default(),
    )?;
    pipeline.start()?;
    log::info!("simulation started, session {}", pipeline.session_id());

    let deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < deadline {
        match pipeline.next_event(Duration::from_millis(500))? {
            Some(SessionEvent::Diagnostics(d)) => {
                log::debug!("diagnostics: {}", serde_json::to_string(&d)?);
            }
            Some(SessionEvent::Captured(cap)) => {
                println!(
                    "captured {} bytes ({}x{}, {:?}) for session {}",
                    cap.data.len(),
                    cap.width,
                    cap.height,
                    cap.format,
                    cap.session_id
                );
                break;
            }
            Some(SessionEvent::Rejected { issues, hard }) => {
                println!("rejected (hard={}): {:?}", hard, issues);
                if hard {
                    break;
                }
            }
            Some(other) => println!("{}", serde_json::to_string(&other)?),
            None => {}
        }
    }

    let stats = pipeline.stats();
    println!("stats: {}", serde_json::to_string(&stats)?);
    pipeline.stop(Duration::from_secs(2))?;
    Ok(())
}

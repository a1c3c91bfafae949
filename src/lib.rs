//! FaceCapture: landmark-driven face capture pipeline for identity
//! enrollment flows.
//!
//! This crate turns a live camera stream plus a pluggable face landmark
//! detector into a single high-quality face image. It tracks per-frame
//! geometry and quality, scores readiness, drives a blink-gated capture
//! state machine and normalizes the accepted frame into a fixed square
//! artifact. A standalone brightness controller steers preview gain,
//! torch and exposure toward a target luminance.
//!
//! # Features
//! - Guidance box tracking with temporal smoothing
//! - Composite readiness scoring with per-frame guidance hints
//! - Blink-gesture liveness gating with adaptive EAR thresholds
//! - Post-capture quality gate and square-crop normalization
//! - Adaptive brightness feedback loop (preview gain, torch, exposure)
//! - Bounded event delivery with an exactly-once capture payload
//!
//! # Usage
//! ```rust,ignore
//! use facecapture::{CapturePipeline, FaceCaptureConfig};
//!
//! let pipeline = CapturePipeline::open(camera, detector, FaceCaptureConfig::load_or_default())?;
//! pipeline.start()?;
//! while let Some(event) = pipeline.next_event(std::time::Duration::from_secs(1))? {
//!     // react to diagnostics, blinks and the final capture
//! }
//! ```
pub mod analyzer;
pub mod brightness;
pub mod config;
pub mod errors;
pub mod events;
pub mod gate;
pub mod landmarks;
pub mod pipeline;
pub mod scorer;
pub mod session;
pub mod types;

// Testing utilities - synthetic frames and scripted detectors
pub mod testing;

// Re-exports for convenience
pub use brightness::{BrightnessController, HardwareControl, LuminanceSample, PreviewAdjust};
pub use config::{BrightnessConfig, FaceCaptureConfig, GateConfig, PipelineConfig};
pub use errors::CaptureError;
pub use events::{DiagnosticsUpdate, SessionEvent};
pub use gate::{Normalizer, QualityGate};
pub use landmarks::{LandmarkSet, LandmarkSource};
pub use pipeline::{CapturePipeline, FrameSource, PipelineStats};
pub use session::{CapturePhase, CaptureSession};
pub use types::{
    FrameMetrics, NormalizedCapture, OutputFormat, QualityIssue, QualityVerdict, VideoFrame,
};

/// Initialize logging for the capture pipeline
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "facecapture=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

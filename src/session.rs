//! Session-scoped capture state machine.
//!
//! Requires a stability hold, then a counted blink gesture, before handing
//! the frame to the quality gate. One state machine instance lives per
//! capture attempt; `reset()` reinitializes everything explicitly. The
//! capture payload is emitted at most once between `reset()` calls.

use crate::analyzer::{AnalyzerConfig, GeometryAnalyzer};
use crate::config::{GateConfig, PipelineConfig};
use crate::events::{DiagnosticsUpdate, EventQueue, SessionEvent};
use crate::gate::{Normalizer, QualityGate};
use crate::landmarks::{EarBaseline, LandmarkSet};
use crate::scorer::{ReadinessReport, ReadinessScorer, ScorerConfig};
use crate::types::{FrameMetrics, VideoFrame};
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Stable frames removed per non-ready tick during the blink phase. A soft
/// penalty: blinking itself degrades orientation/alignment for a few ticks
/// and must not hard-reset the hold.
const SOFT_PENALTY: u32 = 2;

/// Ticks considered when measuring effective throughput.
const FPS_WINDOW: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CapturePhase {
    Idle,
    Stabilizing,
    BlinkPhase,
    PendingCapture,
    Captured,
    Rejected,
}

/// Sliding-window throughput tracker over the last [`FPS_WINDOW`] ticks.
#[derive(Debug)]
struct FpsTracker {
    ticks: VecDeque<Instant>,
}

impl FpsTracker {
    fn new() -> Self {
        Self {
            ticks: VecDeque::with_capacity(FPS_WINDOW),
        }
    }

    fn record(&mut self, now: Instant) {
        if self.ticks.len() == FPS_WINDOW {
            self.ticks.pop_front();
        }
        self.ticks.push_back(now);
    }

    fn fps(&self) -> f32 {
        if self.ticks.len() < 2 {
            return 0.0;
        }
        let span = self
            .ticks
            .back()
            .unwrap()
            .duration_since(*self.ticks.front().unwrap())
            .as_secs_f32();
        if span <= 0.0 {
            return 0.0;
        }
        (self.ticks.len() - 1) as f32 / span
    }

    /// Sustained-low check: only meaningful once the window is full.
    fn below_floor(&self, floor: f32) -> bool {
        self.ticks.len() == FPS_WINDOW && self.fps() < floor
    }
}

pub struct CaptureSession {
    id: Uuid,
    cfg: PipelineConfig,
    analyzer: GeometryAnalyzer,
    scorer: ReadinessScorer,
    gate: QualityGate,
    normalizer: Normalizer,
    events: Arc<EventQueue<SessionEvent>>,

    phase: CapturePhase,
    stable_frames: u32,
    blink_count: u32,
    ear: EarBaseline,
    eyes_closed: bool,
    last_blink: Option<Instant>,
    pending_since: Option<Instant>,
    reject_hard: bool,
    fps: FpsTracker,
}

impl CaptureSession {
    pub fn new(
        pipeline: PipelineConfig,
        gate: GateConfig,
        events: Arc<EventQueue<SessionEvent>>,
    ) -> Self {
        let analyzer = GeometryAnalyzer::new(AnalyzerConfig {
            box_smoothing: pipeline.box_smoothing,
            sample_every_n: pipeline.sample_every_n,
            min_face_fraction: pipeline.min_face_size_fraction,
            ..AnalyzerConfig::default()
        });
        let scorer = ReadinessScorer::new(ScorerConfig {
            ready_score: pipeline.ready_score,
            alignment_min_ratio: pipeline.alignment_min_ratio,
            ..ScorerConfig::default()
        });
        let normalizer = Normalizer::new(
            pipeline.output_size,
            pipeline.sharpen_strength,
            pipeline.output_format,
        );
        Self {
            id: Uuid::new_v4(),
            analyzer,
            scorer,
            gate: QualityGate::new(gate),
            normalizer,
            events,
            cfg: pipeline,
            phase: CapturePhase::Idle,
            stable_frames: 0,
            blink_count: 0,
            ear: EarBaseline::new(),
            eyes_closed: false,
            last_blink: None,
            pending_since: None,
            reject_hard: false,
            fps: FpsTracker::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn stable_frames(&self) -> u32 {
        self.stable_frames
    }

    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    pub fn fps(&self) -> f32 {
        self.fps.fps()
    }

    pub fn fps_below_floor(&self) -> bool {
        self.fps.below_floor(self.cfg.fps_floor)
    }

    /// Start a fresh capture attempt: all counters zeroed, smoothing state
    /// cleared, new session id. Idempotent.
    pub fn reset(&mut self) {
        self.id = Uuid::new_v4();
        self.phase = CapturePhase::Idle;
        self.stable_frames = 0;
        self.blink_count = 0;
        self.ear = EarBaseline::new();
        self.eyes_closed = false;
        self.last_blink = None;
        self.pending_since = None;
        self.reject_hard = false;
        self.analyzer.reset();
    }

    /// Advance the machine by one frame. `landmarks` of `None` means no
    /// face this tick: analysis is skipped and no counters change.
    pub fn tick(&mut self, frame: &VideoFrame, landmarks: Option<&LandmarkSet>, now: Instant) {
        self.fps.record(now);

        if self.phase == CapturePhase::Captured {
            // Terminal until reset().
            return;
        }

        let Some(set) = landmarks else {
            return;
        };

        let Some(metrics) = self.analyzer.analyze(frame, set) else {
            self.quality_dip();
            return;
        };

        // Blink edge tracking runs in every phase so a closure in progress
        // when the blink phase starts is not miscounted.
        let ear = metrics.mean_ear();
        let closed = ear < self.ear.threshold();
        let mut blink_completed = false;
        if closed && !self.eyes_closed {
            self.eyes_closed = true;
        } else if !closed && self.eyes_closed {
            self.eyes_closed = false;
            blink_completed = true;
        }
        if !closed {
            self.ear.update(ear);
        }

        let report = self.scorer.score(&metrics, frame.width, frame.height);
        self.emit_diagnostics(&report, &metrics);

        match self.phase {
            CapturePhase::Idle => {
                if report.ready {
                    self.stable_frames = 1;
                    self.set_phase(CapturePhase::Stabilizing);
                }
            }
            CapturePhase::Stabilizing => {
                if report.ready {
                    self.stable_frames += 1;
                    if self.stable_frames >= self.cfg.required_stable_frames {
                        self.blink_count = 0;
                        self.set_phase(CapturePhase::BlinkPhase);
                    }
                } else {
                    self.stable_frames = 0;
                    self.set_phase(CapturePhase::Idle);
                }
            }
            CapturePhase::BlinkPhase => {
                if !report.ready {
                    self.stable_frames = self.stable_frames.saturating_sub(SOFT_PENALTY);
                }
                if blink_completed {
                    let debounced = self
                        .last_blink
                        .map_or(true, |t| {
                            now.duration_since(t)
                                >= Duration::from_millis(self.cfg.blink_debounce_ms)
                        });
                    if debounced {
                        self.blink_count += 1;
                        self.last_blink = Some(now);
                        self.events.push_drop_oldest(SessionEvent::BlinkDetected {
                            count: self.blink_count,
                        });
                        log::debug!("blink {} of {}", self.blink_count, self.cfg.required_blink_count);
                        if self.blink_count >= self.cfg.required_blink_count {
                            self.pending_since = Some(now);
                            self.set_phase(CapturePhase::PendingCapture);
                        }
                    }
                }
            }
            CapturePhase::PendingCapture => {
                let since = self.pending_since.unwrap_or(now);
                if now.duration_since(since) >= Duration::from_millis(self.cfg.pending_delay_ms) {
                    self.run_gate(frame, &metrics);
                }
            }
            CapturePhase::Rejected => {
                let target = if self.reject_hard {
                    CapturePhase::Idle
                } else {
                    CapturePhase::BlinkPhase
                };
                self.set_phase(target);
            }
            CapturePhase::Captured => {}
        }
    }

    /// The gate fires exactly once per attempt, on the first tick past the
    /// pending delay that produced valid metrics.
    fn run_gate(&mut self, frame: &VideoFrame, metrics: &FrameMetrics) {
        let verdict = self.gate.evaluate(frame, metrics);
        let severe = verdict.severe_count();

        if verdict.passed || severe == 0 {
            if !verdict.passed {
                log::warn!(
                    "accepting capture with minor issues: {:?}",
                    verdict.issues
                );
            }
            match self.normalizer.normalize(
                frame,
                &metrics.guide_box,
                self.id,
                verdict.issues.clone(),
            ) {
                Ok(capture) => {
                    self.events.push_must_deliver(SessionEvent::Captured(capture));
                    self.set_phase(CapturePhase::Captured);
                }
                Err(e) => {
                    log::warn!("normalization failed, retrying gesture: {}", e);
                    self.soft_reject(verdict.issues);
                }
            }
        } else if severe >= 2 {
            // Blur and lighting compounding: the frame is unusable, restart
            // the whole hold.
            log::info!("hard gate rejection: {:?}", verdict.issues);
            self.stable_frames = 0;
            self.blink_count = 0;
            self.reject_hard = true;
            self.events.push_drop_oldest(SessionEvent::Rejected {
                issues: verdict.issues,
                hard: true,
            });
            self.set_phase(CapturePhase::Rejected);
        } else {
            log::info!("soft gate rejection: {:?}", verdict.issues);
            self.soft_reject(verdict.issues);
        }
    }

    fn soft_reject(&mut self, issues: Vec<crate::types::QualityIssue>) {
        self.blink_count = 0;
        self.stable_frames /= 2;
        self.reject_hard = false;
        self.events.push_drop_oldest(SessionEvent::Rejected {
            issues,
            hard: false,
        });
        self.set_phase(CapturePhase::Rejected);
    }

    /// Outside the blink phase a quality failure is a hard interruption of
    /// the stability hold.
    fn quality_dip(&mut self) {
        match self.phase {
            CapturePhase::Stabilizing => {
                self.stable_frames = 0;
                self.set_phase(CapturePhase::Idle);
            }
            CapturePhase::BlinkPhase => {
                self.stable_frames = self.stable_frames.saturating_sub(SOFT_PENALTY);
            }
            _ => {}
        }
    }

    fn set_phase(&mut self, to: CapturePhase) {
        if self.phase != to {
            let from = self.phase;
            self.phase = to;
            self.events
                .push_drop_oldest(SessionEvent::PhaseChanged { from, to });
        }
    }

    fn emit_diagnostics(&self, report: &ReadinessReport, metrics: &FrameMetrics) {
        self.events
            .push_drop_oldest(SessionEvent::Diagnostics(DiagnosticsUpdate {
                session_id: self.id,
                timestamp: Utc::now(),
                phase: self.phase,
                composite_score: report.composite,
                aligned: report.aligned,
                brightness: metrics.brightness,
                sharpness: metrics.sharpness,
                blink_count: self.blink_count,
                stable_frames: self.stable_frames,
                fps: self.fps.fps(),
                guidance: report.guidance.clone(),
            }));
    }
}

//! Adaptive brightness feedback controller.
//!
//! Runs independently of the capture state machine: it samples the preview
//! luminance on its own cadence and steers three actuators toward a target
//! brightness. The preview gain filter is cosmetic and never touches the
//! pixels the capture path reads. Torch and exposure are hardware side
//! effects and only ever commanded on a state change.

use crate::config::BrightnessConfig;
use crate::errors::CaptureError;
use crate::events::EventQueue;
use crate::pipeline::FrameSource;
use crate::types::VideoFrame;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Floor on the sampling cadence.
const MIN_INTERVAL_MS: u64 = 150;
/// Maximum preview gain magnitude.
const GAIN_LIMIT: f32 = 0.18;
/// Fraction of the luma error converted to gain per cycle.
const GAIN_RESPONSE: f32 = 0.9;
/// Exposure compensation step per cycle.
const EXPOSURE_NUDGE: f32 = 0.25;
/// Nudges smaller than this are not worth a hardware round trip.
const EXPOSURE_MIN_DELTA: f32 = 0.2;

const GRID_W: u32 = 64;
const GRID_H: u32 = 48;

/// Device exposure compensation limits.
#[derive(Debug, Clone, Copy)]
pub struct ExposureRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

/// Cosmetic gain applied to the preview surface only.
pub trait PreviewAdjust: Send {
    fn apply_filter(&mut self, brightness: f32, contrast: f32) -> Result<(), CaptureError>;
    fn clear_filter(&mut self) -> Result<(), CaptureError>;
}

/// Torch and exposure control for the active camera.
pub trait HardwareControl: Send {
    fn torch_supported(&self) -> bool;
    fn set_torch(&mut self, on: bool) -> Result<(), CaptureError>;
    /// `None` when the device does not expose exposure compensation.
    fn exposure_range(&self) -> Option<ExposureRange>;
    fn exposure_compensation(&self) -> Result<f32, CaptureError>;
    fn set_exposure_compensation(&mut self, value: f32) -> Result<(), CaptureError>;
}

/// One completed control cycle.
#[derive(Debug, Clone, Serialize)]
pub struct LuminanceSample {
    pub timestamp: DateTime<Utc>,
    /// Mean relative luminance of the sampled grid, 0..1.
    pub luma: f32,
    /// Preview gain applied this cycle, signed.
    pub gain: f32,
    pub torch_on: bool,
}

struct ControlState {
    preview: Box<dyn PreviewAdjust>,
    hardware: Box<dyn HardwareControl>,
    torch_on: bool,
    torch_disabled: bool,
    exposure_disabled: bool,
}

struct Inner {
    cfg: BrightnessConfig,
    state: Mutex<ControlState>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    events: EventQueue<LuminanceSample>,
    busy: AtomicBool,
    dropped_cycles: AtomicU64,
    stop_flag: AtomicBool,
    running: AtomicBool,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// Handle to the brightness control loop. Configuration is fixed at
/// construction.
#[derive(Clone)]
pub struct BrightnessController {
    inner: Arc<Inner>,
}

impl BrightnessController {
    pub fn new(
        cfg: BrightnessConfig,
        preview: Box<dyn PreviewAdjust>,
        hardware: Box<dyn HardwareControl>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                state: Mutex::new(ControlState {
                    preview,
                    hardware,
                    torch_on: false,
                    torch_disabled: false,
                    exposure_disabled: false,
                }),
                source: Mutex::new(None),
                events: EventQueue::new(256),
                busy: AtomicBool::new(false),
                dropped_cycles: AtomicU64::new(0),
                stop_flag: AtomicBool::new(false),
                running: AtomicBool::new(false),
                thread: Mutex::new(None),
            }),
        }
    }

    /// Start the sampling loop on `source`. Starting an already running
    /// controller is a no-op.
    pub fn start(&self, source: Box<dyn FrameSource>) -> Result<(), CaptureError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::debug!("brightness controller already running");
            return Ok(());
        }

        self.inner.stop_flag.store(false, Ordering::Relaxed);
        *self.inner.source.lock().expect("lock poisoned") = Some(source);

        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("facecapture-brightness".to_string())
            .spawn(move || control_loop(inner))
            .map_err(|e| {
                self.inner.running.store(false, Ordering::SeqCst);
                CaptureError::ControlError(format!("spawn failed: {}", e))
            })?;

        *self.inner.thread.lock().expect("lock poisoned") = Some(handle);
        Ok(())
    }

    /// Stop the loop, join the thread and undo every visible adjustment.
    pub fn stop(&self, join_timeout: Duration) -> Result<(), CaptureError> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.stop_flag.store(true, Ordering::Relaxed);
        let taken = self.inner.thread.lock().expect("lock poisoned").take();
        if let Some(handle) = taken {
            let start = Instant::now();
            while !handle.is_finished() {
                if start.elapsed() >= join_timeout {
                    // Keep the handle and the running state so a later stop
                    // can retry the join and still run the teardown.
                    *self.inner.thread.lock().expect("lock poisoned") = Some(handle);
                    self.inner.running.store(true, Ordering::SeqCst);
                    return Err(CaptureError::ControlError(
                        "timed out joining brightness thread".to_string(),
                    ));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = handle.join();
        }

        let mut state = self.inner.state.lock().expect("lock poisoned");
        if let Err(e) = state.preview.clear_filter() {
            log::warn!("failed to clear preview filter: {}", e);
        }
        if state.torch_on {
            match state.hardware.set_torch(false) {
                Ok(()) => state.torch_on = false,
                Err(e) => log::warn!("failed to switch torch off on stop: {}", e),
            }
        }
        Ok(())
    }

    /// Run a single control cycle against `frame`. Returns `None` when a
    /// cycle is already executing; overlapping triggers are dropped, not
    /// queued.
    pub fn analyze_now(&self, frame: &VideoFrame) -> Option<LuminanceSample> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.inner.dropped_cycles.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let sample = {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            run_cycle(&self.inner.cfg, &mut state, frame)
        };
        self.inner.busy.store(false, Ordering::Release);

        self.inner.events.push_drop_oldest(sample.clone());
        Some(sample)
    }

    pub fn next_sample(&self, timeout: Duration) -> Result<Option<LuminanceSample>, CaptureError> {
        self.inner.events.pop_timeout(timeout)
    }

    pub fn dropped_cycles(&self) -> u64 {
        self.inner.dropped_cycles.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

fn control_loop(inner: Arc<Inner>) {
    let mut source = match inner.source.lock().expect("lock poisoned").take() {
        Some(s) => s,
        None => return,
    };
    let interval = Duration::from_millis(inner.cfg.sampling_interval_ms.max(MIN_INTERVAL_MS));
    let controller = BrightnessController {
        inner: inner.clone(),
    };

    while !inner.stop_flag.load(Ordering::Relaxed) {
        match source.next_frame() {
            Ok(frame) => {
                controller.analyze_now(&frame);
            }
            Err(e) => log::warn!("brightness sampling frame error: {}", e),
        }

        // Sleep in short slices so stop() is not held up by the interval.
        let wake = Instant::now() + interval;
        while Instant::now() < wake {
            if inner.stop_flag.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    *inner.source.lock().expect("lock poisoned") = Some(source);
}

fn run_cycle(cfg: &BrightnessConfig, state: &mut ControlState, frame: &VideoFrame) -> LuminanceSample {
    let luma = mean_luminance(frame);
    let gain = ((cfg.target_luma - luma) * GAIN_RESPONSE).clamp(-GAIN_LIMIT, GAIN_LIMIT);

    if let Err(e) = state.preview.apply_filter(1.0 + gain, 1.0) {
        log::warn!("preview gain filter failed: {}", e);
    }

    if cfg.auto_torch && !state.torch_disabled {
        apply_torch(cfg, state, luma);
    }
    if cfg.enable_exposure_tuning && !state.exposure_disabled {
        apply_exposure(cfg, state, luma);
    }

    LuminanceSample {
        timestamp: Utc::now(),
        luma,
        gain,
        torch_on: state.torch_on,
    }
}

/// Torch with hysteresis: on below the low threshold, off above the high
/// one, unchanged in between. The hardware is commanded only on a
/// transition.
fn apply_torch(cfg: &BrightnessConfig, state: &mut ControlState, luma: f32) {
    let desired = if luma < cfg.low_threshold {
        true
    } else if luma > cfg.high_threshold {
        false
    } else {
        state.torch_on
    };

    if desired == state.torch_on {
        return;
    }
    if !state.hardware.torch_supported() {
        state.torch_disabled = true;
        return;
    }
    match state.hardware.set_torch(desired) {
        Ok(()) => state.torch_on = desired,
        Err(e) => {
            log::warn!("torch control failed, disabling: {}", e);
            state.torch_disabled = true;
        }
    }
}

/// Small exposure compensation nudge toward the target, only when the
/// scene is outside the comfort band and the change clears the minimum
/// delta.
fn apply_exposure(cfg: &BrightnessConfig, state: &mut ControlState, luma: f32) {
    if luma >= cfg.low_threshold && luma <= cfg.high_threshold {
        return;
    }
    let range = match state.hardware.exposure_range() {
        Some(r) => r,
        None => {
            state.exposure_disabled = true;
            return;
        }
    };
    let current = match state.hardware.exposure_compensation() {
        Ok(c) => c,
        Err(e) => {
            log::warn!("exposure query failed, disabling: {}", e);
            state.exposure_disabled = true;
            return;
        }
    };

    let step = if luma < cfg.target_luma {
        EXPOSURE_NUDGE
    } else {
        -EXPOSURE_NUDGE
    };
    let desired = (current + step).clamp(range.min, range.max);
    if (desired - current).abs() < EXPOSURE_MIN_DELTA {
        return;
    }
    if let Err(e) = state.hardware.set_exposure_compensation(desired) {
        log::warn!("exposure control failed, disabling: {}", e);
        state.exposure_disabled = true;
    }
}

/// Mean BT.709 relative luminance over a fixed coarse grid.
pub(crate) fn mean_luminance(frame: &VideoFrame) -> f32 {
    if frame.width == 0 || frame.height == 0 {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for gy in 0..GRID_H {
        let y = (gy * frame.height) / GRID_H + frame.height / (2 * GRID_H).max(1);
        for gx in 0..GRID_W {
            let x = (gx * frame.width) / GRID_W + frame.width / (2 * GRID_W).max(1);
            sum += frame.luminance709_at(x, y);
        }
    }
    sum / (GRID_W * GRID_H) as f32
}

//! Bounded event delivery between the pipeline loops and the caller.
//!
//! Events replace ad-hoc callbacks: the loops push structured updates into a
//! bounded drop-oldest queue the caller drains at its own pace. Diagnostics
//! are droppable; the single capture payload is pushed with must-deliver
//! semantics so the exactly-once contract survives a slow consumer.

use crate::errors::CaptureError;
use crate::session::CapturePhase;
use crate::types::{NormalizedCapture, QualityIssue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Periodic structured update for UI binding. Purely observational.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsUpdate {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: CapturePhase,
    pub composite_score: f32,
    pub aligned: bool,
    pub brightness: Option<f32>,
    pub sharpness: Option<f32>,
    pub blink_count: u32,
    pub stable_frames: u32,
    pub fps: f32,
    pub guidance: Vec<&'static str>,
}

/// Everything a capture session reports outward.
#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    Diagnostics(DiagnosticsUpdate),
    PhaseChanged {
        from: CapturePhase,
        to: CapturePhase,
    },
    BlinkDetected {
        count: u32,
    },
    Captured(NormalizedCapture),
    Rejected {
        issues: Vec<QualityIssue>,
        hard: bool,
    },
    PerformanceDegraded {
        effective_fps: f32,
    },
}

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

/// Bounded drop-oldest queue with blocking pop.
pub struct EventQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                dropped: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Push, discarding the oldest entry when full.
    pub fn push_drop_oldest(&self, item: T) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.closed {
            return;
        }
        if g.items.len() >= g.capacity {
            g.items.pop_front();
            g.dropped = g.dropped.saturating_add(1);
        }
        g.items.push_back(item);
        self.cv.notify_one();
    }

    /// Push without ever discarding; used for the capture payload, which
    /// must reach the caller exactly once.
    pub fn push_must_deliver(&self, item: T) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.closed {
            return;
        }
        g.items.push_back(item);
        self.cv.notify_one();
    }

    /// Pop with timeout. `Ok(None)` on timeout; an error once closed and
    /// drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, CaptureError> {
        let mut g = self.inner.lock().expect("lock poisoned");

        if timeout == Duration::ZERO {
            if let Some(item) = g.items.pop_front() {
                return Ok(Some(item));
            }
            if g.closed {
                return Err(CaptureError::SessionError("event queue closed".to_string()));
            }
            return Ok(None);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = g.items.pop_front() {
                return Ok(Some(item));
            }
            if g.closed {
                return Err(CaptureError::SessionError("event queue closed".to_string()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .expect("lock poisoned");
            g = ng;
        }
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").dropped
    }

    pub fn close(&self) {
        let mut g = self.inner.lock().expect("lock poisoned");
        g.closed = true;
        self.cv.notify_all();
    }
}

//! Progress reporting.
//!
//! Rate-limits per-attempt progress ticks and forwards them as typed
//! events so UIs are never flooded.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use imgfan_core::domain::{ItemId, ServiceId};
use imgfan_core::events::{AppEvent, ProgressPhase};
use imgfan_core::ports::{AppEventEmitter, ProgressSink};

/// Minimum spacing between non-terminal progress events.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Rate-limiter for progress updates.
///
/// Each admitted tick opens a quiet window of one interval; ticks that
/// land inside the window are dropped.
pub struct ProgressThrottle {
    next_allowed: Option<Instant>,
    interval: Duration,
}

impl ProgressThrottle {
    /// Create a throttle that admits at most one tick per `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            next_allowed: None,
            interval,
        }
    }

    /// Check if enough time has passed to emit another progress update.
    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        if self.next_allowed.is_some_and(|at| now < at) {
            return false;
        }
        self.next_allowed = Some(now + self.interval);
        true
    }

    /// Force the next check to return true.
    pub const fn reset(&mut self) {
        self.next_allowed = None;
    }
}

/// A [`ProgressSink`] scoped to one `(item, service)` attempt that forwards
/// throttled ticks as [`AppEvent::UploadProgress`].
///
/// Terminal ticks (100% or the `Complete` phase) always pass through so the
/// final state is never lost to the throttle.
pub struct EmitterProgressSink {
    emitter: Box<dyn AppEventEmitter>,
    item_id: ItemId,
    service: ServiceId,
    throttle: Mutex<ProgressThrottle>,
}

impl EmitterProgressSink {
    /// Create a sink for one `(item, service)` pair.
    pub fn new(emitter: Box<dyn AppEventEmitter>, item_id: ItemId, service: ServiceId) -> Self {
        Self {
            emitter,
            item_id,
            service,
            throttle: Mutex::new(ProgressThrottle::new(DEFAULT_TICK_INTERVAL)),
        }
    }
}

impl ProgressSink for EmitterProgressSink {
    fn report(
        &self,
        progress: u8,
        phase: ProgressPhase,
        bytes_uploaded: Option<u64>,
        total_bytes: Option<u64>,
    ) {
        let terminal = progress >= 100 || phase == ProgressPhase::Complete;
        let pass = match self.throttle.lock() {
            Ok(mut throttle) => terminal || throttle.should_emit(),
            Err(_) => terminal,
        };
        if !pass {
            return;
        }

        self.emitter.emit(AppEvent::UploadProgress {
            item_id: self.item_id,
            service: self.service.clone(),
            progress: progress.min(100),
            phase,
            bytes_uploaded,
            total_bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgfan_core::ports::BroadcastEmitter;

    #[test]
    fn test_throttle_quiet_window() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(40));

        // A burst of ticks admits only the first one.
        assert!(throttle.should_emit());
        for _ in 0..5 {
            assert!(!throttle.should_emit());
        }

        std::thread::sleep(Duration::from_millis(50));
        assert!(throttle.should_emit());
    }

    #[test]
    fn test_throttle_reset_reopens_window() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());

        throttle.reset();
        assert!(throttle.should_emit());
    }

    #[test]
    fn test_throttle_zero_interval_admits_everything() {
        let mut throttle = ProgressThrottle::new(Duration::ZERO);
        for _ in 0..3 {
            assert!(throttle.should_emit());
        }
    }

    #[test]
    fn test_sink_terminal_tick_bypasses_throttle() {
        let emitter = BroadcastEmitter::new(16);
        let mut rx = emitter.subscribe();
        let sink = EmitterProgressSink::new(
            Box::new(emitter),
            ItemId::new(),
            ServiceId::new("a"),
        );

        sink.report(10, ProgressPhase::Uploading, None, None);
        sink.report(50, ProgressPhase::Uploading, None, None); // throttled away
        sink.report(100, ProgressPhase::Complete, None, None); // terminal

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert!(matches!(first, AppEvent::UploadProgress { progress: 10, .. }));
        assert!(matches!(second, AppEvent::UploadProgress { progress: 100, .. }));
    }
}

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Liveness gate for one peer.
///
/// ```text
/// Closed   --threshold consecutive failures--> Open
/// Open     --recovery elapsed-----------------> HalfOpen
/// HalfOpen --success--> Closed, --failure--> Open
/// ```
///
/// The coordinator resolver treats a peer as live while its breaker lets
/// requests through.
pub struct CircuitBreaker {
    state: AtomicU8,
    failures: AtomicU32,
    threshold: u32,
    recovery: Duration,
    /// Milliseconds after `epoch` at which the breaker last opened.
    opened_at_ms: AtomicU64,
    epoch: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery: Duration) -> Self {
        CircuitBreaker {
            state: AtomicU8::new(CLOSED),
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            recovery,
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            CLOSED => CircuitState::Closed,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => {
                let open_for = self
                    .elapsed_ms()
                    .saturating_sub(self.opened_at_ms.load(Ordering::Acquire));
                if open_for < self.recovery.as_millis() as u64 {
                    return CircuitState::Open;
                }
                // Whoever wins the swap lets the probe through; everybody
                // re-reads the outcome.
                let _ = self.state.compare_exchange(
                    OPEN,
                    HALF_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                match self.state.load(Ordering::Acquire) {
                    CLOSED => CircuitState::Closed,
                    OPEN => CircuitState::Open,
                    _ => CircuitState::HalfOpen,
                }
            }
        }
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.state.store(CLOSED, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => self.open(),
            CLOSED if failures >= self.threshold => self.open(),
            _ => {}
        }
    }

    fn open(&self) {
        self.opened_at_ms.store(self.elapsed_ms(), Ordering::Release);
        self.state.store(OPEN, Ordering::Release);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

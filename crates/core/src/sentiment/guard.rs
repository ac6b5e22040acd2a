use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rolling-window call budget. `try_acquire` never blocks: over-budget
/// callers are told no and expected to degrade.
#[derive(Debug)]
pub struct RollingWindowLimiter {
    max_calls: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RollingWindowLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            stamps: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub async fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut stamps = self.stamps.lock().await;
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() >= self.max_calls {
            return false;
        }
        stamps.push_back(now);
        true
    }
}

/// Stops calling a failing dependency after `threshold` consecutive
/// failures. After `cooldown` a single probe call is let through
/// (half-open); its outcome closes or re-opens the circuit.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Whether a call may proceed right now.
    pub async fn allow(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.opened_at {
            None => true,
            Some(opened_at) => Instant::now().duration_since(opened_at) >= self.cooldown,
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.threshold {
            inner.opened_at = Some(Instant::now());
        }
    }
}

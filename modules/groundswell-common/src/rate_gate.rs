use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::GroundswellError;

/// Token-bucket limiter for one external resource class.
///
/// Tokens refill lazily from elapsed time (no background timer) and cap at
/// `capacity`. `acquire` suspends until enough tokens are available; waiters
/// queue FIFO on the internal mutex. An optional `min_gap` enforces a minimum
/// spacing between grants on top of the bucket itself.
pub struct RateGate {
    capacity: f64,
    refill_per_second: f64,
    min_gap: Duration,
    state: Mutex<GateState>,
}

struct GateState {
    tokens: f64,
    last_refill: Instant,
    last_grant: Option<Instant>,
}

impl RateGate {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_second,
            min_gap: Duration::ZERO,
            state: Mutex::new(GateState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
                last_grant: None,
            }),
        }
    }

    /// Convenience constructor for per-minute quotas (starts full).
    pub fn per_minute(quota: u32) -> Self {
        Self::new(quota, quota as f64 / 60.0)
    }

    pub fn with_min_gap(mut self, gap: Duration) -> Self {
        self.min_gap = gap;
        self
    }

    /// Deduct `n` tokens, suspending until they are available. Requests larger
    /// than the bucket capacity are clamped, otherwise they could never be
    /// granted.
    pub async fn acquire(&self, n: u32) {
        // Infallible without a cancel flag.
        let _ = self.acquire_inner(n, None).await;
    }

    /// Cancellation-aware acquire: returns `Err(Cancelled)` as soon as the
    /// flag flips while waiting.
    pub async fn acquire_cancellable(
        &self,
        n: u32,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), GroundswellError> {
        self.acquire_inner(n, Some(cancel)).await
    }

    async fn acquire_inner(
        &self,
        n: u32,
        cancel: Option<&Arc<AtomicBool>>,
    ) -> Result<(), GroundswellError> {
        let need = (n as f64).min(self.capacity);

        loop {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(GroundswellError::Cancelled);
                }
            }

            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
                state.last_refill = now;

                let gap_remaining = state
                    .last_grant
                    .map(|g| self.min_gap.saturating_sub(now.duration_since(g)))
                    .unwrap_or(Duration::ZERO);

                if state.tokens >= need && gap_remaining.is_zero() {
                    state.tokens -= need;
                    state.last_grant = Some(now);
                    return Ok(());
                }

                let token_wait = if state.tokens >= need {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64((need - state.tokens) / self.refill_per_second)
                };
                token_wait.max(gap_remaining).max(Duration::from_millis(5))
            };

            // Sleep in short slices so cancellation is observed promptly.
            let slice = wait.min(Duration::from_millis(250));
            tokio::time::sleep(slice).await;
        }
    }

    /// Tokens currently available (after lazy refill). Diagnostic only.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_immediately_when_tokens_available() {
        let gate = RateGate::new(10, 1.0);
        let start = Instant::now();
        gate.acquire(5).await;
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(gate.available().await < 5.5);
    }

    #[tokio::test]
    async fn empty_bucket_parks_until_refill() {
        let gate = RateGate::new(1, 50.0);
        gate.acquire(1).await;

        let start = Instant::now();
        gate.acquire(1).await;
        // Refill of 1 token at 50/s needs ~20ms.
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn oversized_request_is_clamped_to_capacity() {
        let gate = RateGate::new(2, 100.0);
        let start = Instant::now();
        gate.acquire(1000).await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn min_gap_spaces_out_grants() {
        let gate = RateGate::new(100, 1000.0).with_min_gap(Duration::from_millis(30));
        let start = Instant::now();
        gate.acquire(1).await;
        gate.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn cancellation_interrupts_waiters() {
        let gate = RateGate::new(1, 0.01);
        gate.acquire(1).await;

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::Relaxed);
        });

        let result = gate.acquire_cancellable(1, &cancel).await;
        assert!(matches!(result, Err(GroundswellError::Cancelled)));
    }

    #[tokio::test]
    async fn parallel_waiters_all_proceed() {
        let gate = Arc::new(RateGate::new(2, 200.0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let g = gate.clone();
            handles.push(tokio::spawn(async move { g.acquire(1).await }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }
}

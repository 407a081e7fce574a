use std::time::{Duration, Instant};

/// Token bucket for outgoing lines. Servers disconnect clients that flood,
/// so every line the bot writes passes through here first.
///
/// Unlike a drop-on-empty limiter, lines are never refused: the bucket may go
/// negative and the caller waits the returned delay before writing.
pub struct SendThrottle {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl SendThrottle {
    /// - `burst`: lines that may go out back to back
    /// - `per_seconds`: one more line every N seconds after the burst
    pub fn new(burst: u32, per_seconds: f64, now: Instant) -> Self {
        Self {
            tokens: burst as f64,
            max_tokens: burst as f64,
            refill_rate: 1.0 / per_seconds,
            last_refill: now,
        }
    }

    /// Reserve a slot for one line and return how long to wait before
    /// sending it.
    pub fn delay_for_next(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.refill_rate)
        }
    }
}

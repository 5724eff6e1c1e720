use std::time::Duration;

/// Exponential delay between failed compaction passes.
///
/// Unlike a connect retry loop, a compactor never gives up: the delay just
/// stops growing at `max_delay` until a pass succeeds and `reset` is called.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            current_attempt: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    /// Delay for the next retry; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2_u32.saturating_pow(self.current_attempt);
        let delay = std::cmp::min(
            self.initial_delay.saturating_mul(factor),
            self.max_delay,
        );
        self.current_attempt = self.current_attempt.saturating_add(1);
        delay
    }

    pub async fn sleep(&mut self) {
        let delay = self.next_delay();
        log::warn!(
            "⏳ Compaction retry {} in {}ms",
            self.current_attempt,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

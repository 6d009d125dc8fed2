//! Adaptive AIMD rate limiter for outbound completion calls

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

/// Consecutive successes required before an upward rate adjustment
const RECOVERY_SUCCESSES: u32 = 10;

/// Minimum time between upward rate adjustments
const RECOVERY_COOLDOWN: Duration = Duration::from_secs(30);

/// Multiplier applied on throttling feedback
const DECREASE_FACTOR: f64 = 0.5;

/// Multiplier applied on gated recovery
const INCREASE_FACTOR: f64 = 1.2;

#[derive(Debug)]
struct LimiterState {
    /// Allowed rate in requests per second; the control variable
    current_rate: f64,

    /// Externally configured ceiling, re-read on every acquire
    target_rate: f64,

    consecutive_successes: u32,
    last_increase: Instant,
    next_permit: Instant,
}

/// Paces outbound calls at `current_rate` requests per second and adapts
/// that rate to feedback: multiplicative decrease on throttling, cautious
/// gated increase on sustained success.
///
/// The allowed throughput of the remote service is not known a priori and
/// changes over time, so the limiter never trusts `target_rate` as anything
/// more than a ceiling.
pub struct AdaptiveRateLimiter {
    state: Mutex<LimiterState>,
    floor_rate: f64,
}

impl AdaptiveRateLimiter {
    pub fn new(target_rate: f64, floor_rate: f64) -> Self {
        let target_rate = Self::sanitize_target(target_rate, floor_rate);
        let now = Instant::now();
        Self {
            state: Mutex::new(LimiterState {
                current_rate: target_rate,
                target_rate,
                consecutive_successes: 0,
                last_increase: now,
                next_permit: now,
            }),
            floor_rate,
        }
    }

    /// A target must stay a positive, finite rate; anything else would make
    /// the pacing interval (`1000 / rate` ms) meaningless. Bad inputs clamp
    /// to the floor.
    fn sanitize_target(target_rate: f64, floor_rate: f64) -> f64 {
        if target_rate.is_finite() && target_rate > 0.0 {
            target_rate
        } else {
            warn!(
                "Ignoring invalid target rate {}, clamping to floor {:.2} req/s",
                target_rate, floor_rate
            );
            floor_rate
        }
    }

    /// Lower or raise the configured ceiling at runtime. A lowered ceiling
    /// takes effect on the next `acquire`.
    pub async fn set_target_rate(&self, target_rate: f64) {
        let target_rate = Self::sanitize_target(target_rate, self.floor_rate);
        let mut state = self.state.lock().await;
        info!(
            "Rate limiter target changed: {:.2} -> {:.2} req/s",
            state.target_rate, target_rate
        );
        state.target_rate = target_rate;
    }

    /// Wait until the next permit slot. Slots are spaced
    /// `1000 / current_rate` milliseconds apart; the slot is reserved under
    /// the lock so feedback calls are never blocked by the pacing sleep.
    pub async fn acquire(&self) {
        let slot = {
            let mut state = self.state.lock().await;

            // The ceiling may have been lowered since the last permit
            if state.current_rate > state.target_rate {
                state.current_rate = state.target_rate;
            }

            let interval = Duration::from_secs_f64(1.0 / state.current_rate);
            let now = Instant::now();
            let slot = if state.next_permit > now {
                state.next_permit
            } else {
                now
            };
            state.next_permit = slot + interval;
            slot
        };

        sleep_until(slot).await;
    }

    /// Throttling feedback: halve the rate, clamped at the floor
    pub async fn on_throttled(&self) {
        let mut state = self.state.lock().await;
        let previous = state.current_rate;
        state.current_rate = (state.current_rate * DECREASE_FACTOR).max(self.floor_rate);
        state.consecutive_successes = 0;
        warn!(
            "Throttled by provider, rate {:.2} -> {:.2} req/s",
            previous, state.current_rate
        );
    }

    /// Success feedback: after enough consecutive successes and a cooldown,
    /// recover toward the target
    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_successes += 1;

        let cooled_down = state.last_increase.elapsed() >= RECOVERY_COOLDOWN;
        if state.consecutive_successes >= RECOVERY_SUCCESSES
            && cooled_down
            && state.current_rate < state.target_rate
        {
            let previous = state.current_rate;
            state.current_rate = (state.current_rate * INCREASE_FACTOR).min(state.target_rate);
            state.consecutive_successes = 0;
            state.last_increase = Instant::now();
            debug!(
                "Recovering rate {:.2} -> {:.2} req/s",
                previous, state.current_rate
            );
        }
    }

    /// Current allowed rate in requests per second
    pub async fn current_rate(&self) -> f64 {
        self.state.lock().await.current_rate
    }
}

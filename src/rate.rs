use std::time::Duration;

use tracing::{debug, warn};

/// Smallest delay a rate limit backs off from, so a zero base still grows.
const MIN_BACKOFF_STEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct RateSettings {
    /// Delay between two requests when nothing is pushing back.
    pub base: Duration,
    pub ceiling: Duration,
    pub multiplier: f64,
    /// Consecutive successes needed before the delay steps back down.
    pub decay_after: u32,
    /// Upper bound of the random extra added to each wait.
    pub jitter: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            ceiling: Duration::from_secs(60),
            multiplier: 2.0,
            decay_after: 5,
            jitter: Duration::ZERO,
        }
    }
}

/// Adaptive inter-request delay.
#[derive(Debug)]
pub struct RateController {
    settings: RateSettings,
    current: Duration,
    streak: u32,
    started: bool,
}

impl RateController {
    pub fn new(mut settings: RateSettings) -> Self {
        settings.ceiling = settings.ceiling.max(settings.base);
        Self {
            current: settings.base,
            settings,
            streak: 0,
            started: false,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// How long to hold off before the next request. The very first request
    /// of a run goes out immediately.
    pub fn next_delay(&mut self) -> Duration {
        if !self.started {
            self.started = true;
            return Duration::ZERO;
        }
        let jitter = self.settings.jitter.as_secs_f64();
        if jitter > 0.0 {
            self.current + Duration::from_secs_f64(rand::random_range(0.0..jitter))
        } else {
            self.current
        }
    }

    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            debug!("Waiting {:.1}s before next request", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }

    pub fn on_rate_limited(&mut self) {
        self.streak = 0;
        let next = self.current.max(MIN_BACKOFF_STEP).mul_f64(self.settings.multiplier);
        self.current = next.min(self.settings.ceiling);
        warn!(
            "Rate limited, request delay now {:.1}s",
            self.current.as_secs_f64()
        );
    }

    pub fn on_success(&mut self) {
        if self.current <= self.settings.base {
            return;
        }
        self.streak += 1;
        if self.streak >= self.settings.decay_after {
            self.streak = 0;
            let next = self.current.div_f64(self.settings.multiplier);
            self.current = if next < MIN_BACKOFF_STEP {
                self.settings.base
            } else {
                next.max(self.settings.base)
            };
            debug!("Request delay decayed to {:.1}s", self.current.as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RateSettings {
        RateSettings {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(6),
            multiplier: 2.0,
            decay_after: 3,
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn backs_off_up_to_ceiling() {
        let mut rc = RateController::new(settings());
        let mut seen = Vec::new();
        for _ in 0..4 {
            rc.on_rate_limited();
            seen.push(rc.current_delay().as_secs());
        }
        assert_eq!(seen, [2, 4, 6, 6]);
    }

    #[test]
    fn decays_after_a_run_of_successes() {
        let mut rc = RateController::new(settings());
        rc.on_rate_limited();
        rc.on_rate_limited();
        assert_eq!(rc.current_delay(), Duration::from_secs(4));

        rc.on_success();
        rc.on_success();
        assert_eq!(rc.current_delay(), Duration::from_secs(4));
        rc.on_success();
        assert_eq!(rc.current_delay(), Duration::from_secs(2));

        // a rate limit in the middle of a streak starts it over
        rc.on_success();
        rc.on_rate_limited();
        rc.on_success();
        rc.on_success();
        assert_eq!(rc.current_delay(), Duration::from_secs(4));

        for _ in 0..9 {
            rc.on_success();
        }
        assert_eq!(rc.current_delay(), Duration::from_secs(1));
    }

    #[test]
    fn zero_base_still_backs_off_and_returns_to_zero() {
        let mut rc = RateController::new(RateSettings {
            base: Duration::ZERO,
            ..settings()
        });
        rc.on_rate_limited();
        assert_eq!(rc.current_delay(), Duration::from_secs(2));
        rc.on_rate_limited();
        assert_eq!(rc.current_delay(), Duration::from_secs(4));

        for _ in 0..6 {
            rc.on_success();
        }
        assert_eq!(rc.current_delay(), Duration::from_secs(1));
        for _ in 0..3 {
            rc.on_success();
        }
        assert_eq!(rc.current_delay(), Duration::ZERO);
    }

    #[test]
    fn ceiling_below_base_is_raised() {
        let mut rc = RateController::new(RateSettings {
            ceiling: Duration::from_millis(1),
            ..settings()
        });
        rc.on_rate_limited();
        assert_eq!(rc.current_delay(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn first_wait_is_free() {
        let mut rc = RateController::new(settings());
        let t0 = tokio::time::Instant::now();
        rc.wait().await;
        assert_eq!(t0.elapsed(), Duration::ZERO);
        rc.wait().await;
        assert!(t0.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_range() {
        let mut rc = RateController::new(RateSettings {
            jitter: Duration::from_millis(500),
            ..settings()
        });
        assert_eq!(rc.next_delay(), Duration::ZERO);
        for _ in 0..20 {
            let d = rc.next_delay();
            assert!(d >= Duration::from_secs(1) && d < Duration::from_millis(1500));
        }
    }
}

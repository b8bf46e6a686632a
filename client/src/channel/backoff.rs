use std::time::Duration;

/// Retry delay bounds. All ranges are inclusive and expressed in milliseconds
/// when randomized.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub initial_min: Duration,
    pub initial_max: Duration,
    pub rate_limit_min: Duration,
    pub rate_limit_max: Duration,
    pub floor: Duration,
    pub ceiling: Duration,
    /// Delay used while the network is offline; `retry_stalled` cuts it short
    pub offline_pin: Duration,
    /// Backoffs at or above this are considered stalled
    pub stall_threshold: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_min: Duration::from_millis(192),
            initial_max: Duration::from_millis(448),
            rate_limit_min: Duration::from_millis(900),
            rate_limit_max: Duration::from_millis(4900),
            floor: Duration::from_millis(63),
            ceiling: Duration::from_millis(300_000),
            offline_pin: Duration::from_secs(24 * 3600),
            stall_threshold: Duration::from_secs(4),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryCause {
    Transient,
    RateLimited,
}

/// Exponential backoff of one channel. Zero means "no failure since the last success".
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: Duration::ZERO,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    /// Computes and stores the delay before the next attempt.
    pub fn next_delay(&mut self, cause: RetryCause, online: bool) -> Duration {
        if !online {
            self.current = self.config.offline_pin;
            return self.current;
        }

        let pinned = self.current >= self.config.offline_pin;
        self.current = match cause {
            RetryCause::RateLimited if self.current < self.config.rate_limit_min || pinned => {
                random_between(self.config.rate_limit_min, self.config.rate_limit_max)
            }
            _ if self.current.is_zero() || pinned => {
                random_between(self.config.initial_min, self.config.initial_max)
            }
            _ => self.current.saturating_mul(2),
        };
        self.current = self.current.clamp(self.config.floor, self.config.ceiling);
        self.current
    }

    pub fn is_stalled(&self) -> bool {
        self.current >= self.config.stall_threshold
    }

    /// Replaces a long backoff with a fresh short one.
    pub fn refresh(&mut self) -> Duration {
        self.current = random_between(self.config.initial_min, self.config.initial_max)
            .clamp(self.config.floor, self.config.ceiling);
        self.current
    }
}

fn random_between(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = (max.as_millis() as u64).max(min_ms);
    Duration::from_millis(fastrand::u64(min_ms..=max_ms))
}

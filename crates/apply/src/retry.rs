//! Bounded retry-on-conflict policy for updates.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

/// Update retry policy: `attempts` total tries, exponential backoff between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 5, base: Duration::from_millis(10), factor: 2.0, cap: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Defaults overridden by `REKON_UPDATE_RETRY_{STEPS,BASE_MS,FACTOR,CAP_MS}`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            attempts: env_parse::<u32>("REKON_UPDATE_RETRY_STEPS").unwrap_or(d.attempts).max(1),
            base: env_parse::<u64>("REKON_UPDATE_RETRY_BASE_MS").map(Duration::from_millis).unwrap_or(d.base),
            factor: env_parse::<f64>("REKON_UPDATE_RETRY_FACTOR").filter(|f| *f >= 1.0).unwrap_or(d.factor),
            cap: env_parse::<u64>("REKON_UPDATE_RETRY_CAP_MS").map(Duration::from_millis).unwrap_or(d.cap),
        }
    }

    /// Single attempt, no retries.
    pub fn never() -> Self { Self { attempts: 1, ..Self::default() } }

    /// No sleeping between attempts; handy for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self { attempts: attempts.max(1), base: Duration::ZERO, factor: 1.0, cap: Duration::ZERO }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let nanos = (self.base.as_nanos() as f64 * self.factor.powi(exp)).round();
        Duration::from_nanos(nanos.clamp(0.0, u64::MAX as f64) as u64).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_grows_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(1), Duration::from_millis(10));
        assert_eq!(p.delay(2), Duration::from_millis(20));
        assert_eq!(p.delay(3), Duration::from_millis(40));
        assert_eq!(p.delay(30), Duration::from_secs(1));
    }

    #[test]
    fn immediate_never_sleeps() {
        let p = RetryPolicy::immediate(0);
        assert_eq!(p.attempts, 1);
        assert_eq!(p.delay(4), Duration::ZERO);
    }
}

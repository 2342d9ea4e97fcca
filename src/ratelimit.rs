//! Remaining-quota tracking and polling-cadence policy
//!
//! One scalar (remaining core quota) drives a small hysteresis state machine:
//! crossing a threshold downward emits a signal once, and rising back above
//! it emits the paired recovery signal once. The observed value is cached
//! for a TTL so the quota probe does not itself consume quota.
//!
//! The limiter is the only state shared between concurrently monitored PRs;
//! `observe` is the single update path.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long one quota observation stays fresh.
const QUOTA_CACHE_TTL: Duration = Duration::from_secs(60);

/// Quota bands, ordered from healthy to exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuotaLevel {
    /// >= 500 remaining: normal interval, structured calls
    Normal,
    /// < 500: polling interval stretched
    Reduced,
    /// < 200: simple REST calls preferred over structured calls
    RestPriority,
    /// < 100: approaching the limit
    Low,
    /// < 50: nearly exhausted
    Critical,
    /// 0: quota exhausted, REST path forced
    Exhausted,
}

impl QuotaLevel {
    fn for_remaining(remaining: u32) -> Self {
        match remaining {
            0 => Self::Exhausted,
            1..=49 => Self::Critical,
            50..=99 => Self::Low,
            100..=199 => Self::RestPriority,
            200..=499 => Self::Reduced,
            _ => Self::Normal,
        }
    }

    /// Polling-interval multiplier for this band
    const fn interval_multiplier(self) -> u32 {
        match self {
            Self::Normal => 1,
            Self::Reduced | Self::RestPriority | Self::Low | Self::Critical => 2,
            Self::Exhausted => 4,
        }
    }
}

/// Transition signals produced when an observation crosses a threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitSignal {
    /// Polling interval increased (quota dropped below 500)
    AdjustedInterval,
    /// Quota recovered to the normal band; interval restored
    Recovered,
    /// Simple REST calls now preferred (quota dropped below 200)
    RestPriorityEntered,
    /// Structured calls resumed (quota recovered above 200)
    RestPriorityExited,
    /// Quota dropped below 100
    Warning,
    /// Quota dropped below 50
    LimitReached,
}

#[derive(Debug)]
struct Inner {
    remaining: Option<u32>,
    observed_at: Option<Instant>,
    level: QuotaLevel,
}

/// Shared rate-limit cache and cadence policy
#[derive(Debug)]
pub struct RateLimiter {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(QUOTA_CACHE_TTL)
    }
}

impl RateLimiter {
    /// Create a limiter with the given cache TTL
    pub const fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                remaining: None,
                observed_at: None,
                level: QuotaLevel::Normal,
            }),
        }
    }

    /// Whether the cached observation has expired (or never happened)
    pub fn needs_refresh(&self) -> bool {
        let inner = self.inner.lock().expect("rate limiter lock");
        inner
            .observed_at
            .is_none_or(|at| at.elapsed() >= self.ttl)
    }

    /// Record a fresh quota observation and return the threshold crossings.
    ///
    /// This is the single update path; everything else only reads.
    pub fn observe(&self, remaining: u32) -> Vec<RateLimitSignal> {
        let mut inner = self.inner.lock().expect("rate limiter lock");
        let old = inner.level;
        let new = QuotaLevel::for_remaining(remaining);
        inner.remaining = Some(remaining);
        inner.observed_at = Some(Instant::now());
        inner.level = new;

        let mut signals = Vec::new();
        if new > old {
            // Degrading: announce each band we just entered.
            if old < QuotaLevel::Reduced && new >= QuotaLevel::Reduced {
                signals.push(RateLimitSignal::AdjustedInterval);
            }
            if old < QuotaLevel::RestPriority && new >= QuotaLevel::RestPriority {
                signals.push(RateLimitSignal::RestPriorityEntered);
            }
            if old < QuotaLevel::Low && new >= QuotaLevel::Low {
                signals.push(RateLimitSignal::Warning);
            }
            if old < QuotaLevel::Critical && new >= QuotaLevel::Critical {
                signals.push(RateLimitSignal::LimitReached);
            }
        } else if new < old {
            // Recovering: announce each band we just left.
            if old >= QuotaLevel::RestPriority && new < QuotaLevel::RestPriority {
                signals.push(RateLimitSignal::RestPriorityExited);
            }
            if old >= QuotaLevel::Reduced && new < QuotaLevel::Reduced {
                signals.push(RateLimitSignal::Recovered);
            }
        }
        signals
    }

    /// Whether simple REST calls should be preferred right now
    pub fn prefer_rest(&self) -> bool {
        let inner = self.inner.lock().expect("rate limiter lock");
        inner.level >= QuotaLevel::RestPriority
    }

    /// Current quota band
    pub fn level(&self) -> QuotaLevel {
        self.inner.lock().expect("rate limiter lock").level
    }

    /// Last observed remaining quota, if any observation has been made
    pub fn remaining(&self) -> Option<u32> {
        self.inner.lock().expect("rate limiter lock").remaining
    }

    /// Polling interval adjusted for the current band
    pub fn interval(&self, base: Duration) -> Duration {
        let inner = self.inner.lock().expect("rate limiter lock");
        base * inner.level.interval_multiplier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_match_thresholds() {
        assert_eq!(QuotaLevel::for_remaining(5000), QuotaLevel::Normal);
        assert_eq!(QuotaLevel::for_remaining(500), QuotaLevel::Normal);
        assert_eq!(QuotaLevel::for_remaining(499), QuotaLevel::Reduced);
        assert_eq!(QuotaLevel::for_remaining(199), QuotaLevel::RestPriority);
        assert_eq!(QuotaLevel::for_remaining(99), QuotaLevel::Low);
        assert_eq!(QuotaLevel::for_remaining(49), QuotaLevel::Critical);
        assert_eq!(QuotaLevel::for_remaining(0), QuotaLevel::Exhausted);
    }

    #[test]
    fn entering_rest_priority_signals_once() {
        let limiter = RateLimiter::default();
        let signals = limiter.observe(150);
        assert!(signals.contains(&RateLimitSignal::RestPriorityEntered));
        assert!(limiter.prefer_rest());

        // Staying inside the band is quiet.
        assert!(limiter.observe(140).is_empty());
    }

    #[test]
    fn recovery_emits_paired_signals() {
        let limiter = RateLimiter::default();
        limiter.observe(150);
        let signals = limiter.observe(600);
        assert_eq!(
            signals,
            vec![RateLimitSignal::RestPriorityExited, RateLimitSignal::Recovered]
        );
        assert!(!limiter.prefer_rest());
    }

    #[test]
    fn degrading_through_several_bands_emits_each_crossing() {
        let limiter = RateLimiter::default();
        let signals = limiter.observe(10);
        assert_eq!(
            signals,
            vec![
                RateLimitSignal::AdjustedInterval,
                RateLimitSignal::RestPriorityEntered,
                RateLimitSignal::Warning,
                RateLimitSignal::LimitReached,
            ]
        );
    }

    #[test]
    fn exhausted_quota_forces_rest_and_stretches_interval() {
        let limiter = RateLimiter::default();
        limiter.observe(0);
        assert!(limiter.prefer_rest());
        assert_eq!(
            limiter.interval(Duration::from_secs(30)),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn cache_ttl_controls_refresh() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(limiter.needs_refresh());
        limiter.observe(1000);
        assert!(!limiter.needs_refresh());

        let expired = RateLimiter::new(Duration::ZERO);
        expired.observe(1000);
        assert!(expired.needs_refresh());
    }
}

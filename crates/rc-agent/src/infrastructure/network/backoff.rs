//! Exponential reconnect backoff with equal jitter.
//!
//! Many devices lose their connection at the same moment when the server
//! restarts.  If they all retried on the same schedule they would hit the
//! server in synchronized waves.  *Equal jitter* keeps half of each delay
//! fixed (so retries never become too aggressive) and randomizes the other
//! half (so devices spread out):
//!
//! ```text
//! base   = min(max, initial * multiplier^attempt)
//! delay  = base / 2 + random(0 ..= base / 2)
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "millis")]
    pub initial: Duration,
    #[serde(with = "millis")]
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Rejects policies that would retry without waiting or shrink the delay.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial.is_zero() {
            return Err("initial delay must be greater than zero".into());
        }
        if self.max < self.initial {
            return Err(format!(
                "max delay {}ms is below initial delay {}ms",
                self.max.as_millis(),
                self.initial.as_millis()
            ));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(format!("multiplier must be at least 1.0, got {}", self.multiplier));
        }
        Ok(())
    }
}

/// Applies equal jitter to `base` using `sample` in `[0, 1]`.
pub fn apply_jitter(base: Duration, sample: f64) -> Duration {
    let half = base / 2;
    half + half.mul_f64(sample.clamp(0.0, 1.0))
}

/// Tracks the current attempt number for one reconnect sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Un-jittered delay for the current attempt.
    pub fn base_delay(&self) -> Duration {
        let factor = self.policy.multiplier.max(1.0).powi(self.attempt as i32);
        let secs = self.policy.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.policy.max.as_secs_f64() {
            self.policy.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Returns the jittered delay for this attempt and advances to the next.
    pub fn next_delay(&mut self) -> Duration {
        let delay = apply_jitter(self.base_delay(), rand::thread_rng().gen_range(0.0..=1.0));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Starts over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Serializes a `Duration` as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

//! Millisecond clocks.
//!
//! Two different notions of time are used by the agent:
//!
//! - **Monotonic** time stamps encoded frames.  It never goes backwards, even
//!   when the device's wall clock is corrected by NTP, so the viewer can rely
//!   on it for frame pacing.  It is measured from the first call in the
//!   process, not from the Unix epoch.
//! - **Wall-clock** time stamps heartbeats and diagnostics reports, which the
//!   server correlates with its own logs.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the first call to any monotonic clock helper.
pub fn monotonic_ms() -> u64 {
    monotonic_ms_at(Instant::now())
}

/// Converts `instant` into the process-relative monotonic millisecond scale.
///
/// Instants taken before the process epoch saturate to `0`.
pub fn monotonic_ms_at(instant: Instant) -> u64 {
    let epoch = *PROCESS_EPOCH.get_or_init(Instant::now);
    instant.saturating_duration_since(epoch).as_millis() as u64
}

/// Milliseconds since the Unix epoch, or `0` if the system clock is set before 1970.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic_ms_never_decreases() {
        let a = monotonic_ms();
        let b = monotonic_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_monotonic_ms_at_tracks_instant_offsets() {
        let _ = monotonic_ms();
        let base = Instant::now();
        let later = base + Duration::from_millis(250);
        assert_eq!(monotonic_ms_at(later) - monotonic_ms_at(base), 250);
    }

    #[test]
    fn test_unix_ms_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(unix_ms() > 1_577_836_800_000);
    }
}

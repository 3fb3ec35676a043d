use std::time::Duration;

/// Longest single pacing sleep, keeps workers responsive to cancellation
pub const MAX_PACING_SLEEP: Duration = Duration::from_millis(100);

/// Sleep after a sweep in which every address was throttled
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Ideal sweep time when the range has no aggregate target
const UNTARGETED_SWEEP: Duration = Duration::from_millis(1);

/// How long to sleep after a sweep that sent `sent` packets in `elapsed`.
///
/// A productive sweep is stretched to `sent / target_rate` seconds, capped at
/// [`MAX_PACING_SLEEP`] per call. An empty sweep sleeps [`IDLE_SLEEP`] so a
/// fully throttled block does not spin.
pub fn pacing_delay(sent: u64, target_rate: u64, elapsed: Duration) -> Duration {
    if sent == 0 {
        return IDLE_SLEEP;
    }

    let ideal = if target_rate > 0 {
        Duration::from_secs_f64(sent as f64 / target_rate as f64)
    } else {
        UNTARGETED_SWEEP
    };

    ideal.saturating_sub(elapsed).min(MAX_PACING_SLEEP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_sweep() {
        assert_eq!(pacing_delay(0, 1000, Duration::ZERO), IDLE_SLEEP);
        assert_eq!(pacing_delay(0, 0, Duration::from_secs(1)), IDLE_SLEEP);
    }

    #[test]
    fn test_fast_sweep_sleeps_remainder() {
        // 50 packets at 1000 QPS should take 50ms
        let delay = pacing_delay(50, 1000, Duration::from_millis(20));
        assert_eq!(delay, Duration::from_millis(30));
    }

    #[test]
    fn test_slow_sweep_no_sleep() {
        assert_eq!(pacing_delay(50, 1000, Duration::from_millis(80)), Duration::ZERO);
    }

    #[test]
    fn test_sleep_capped() {
        // 10000 packets at 1000 QPS would want 10s
        assert_eq!(pacing_delay(10_000, 1000, Duration::ZERO), MAX_PACING_SLEEP);
    }

    #[test]
    fn test_zero_target_rate() {
        assert_eq!(pacing_delay(5, 0, Duration::ZERO), Duration::from_millis(1));
        assert_eq!(pacing_delay(5, 0, Duration::from_millis(2)), Duration::ZERO);
    }
}

//! Exponential jittered backoff shared by dispatching-entry retries and
//! backend-sink delivery retries.

use std::time::Duration;

use rand::Rng;

/// Compute the delay before attempt `attempt` (0-indexed), capped and
/// jittered full-range (0..=computed delay), matching the "jittered,
/// capped at 30s" requirement without favoring either extreme.
pub fn delay_for_attempt(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = exp.min(cap.as_secs_f64());
    let jittered = rand::thread_rng().gen_range(0.0..=capped);
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        for attempt in 0..10 {
            let d = delay_for_attempt(attempt, base, cap);
            assert!(d <= cap);
        }
    }

    #[test]
    fn delay_grows_with_attempt_on_average() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        let avg = |attempt: u32| -> f64 {
            let n = 200;
            let sum: f64 = (0..n)
                .map(|_| delay_for_attempt(attempt, base, cap).as_secs_f64())
                .sum();
            sum / n as f64
        };
        assert!(avg(4) > avg(0));
    }
}

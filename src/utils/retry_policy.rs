/// Exponential backoff retry policy
///
/// The first retry waits `base` seconds and each following retry multiplies the
/// delay by `multiplier`. `base` is derived so that the delays of all retries add
/// up to roughly `total_time_s`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExponentialBackoff {
    max_retries: u64,
    base_delay_s: f64,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub(crate) fn new(max_retries: u64, total_time_s: u64, multiplier: f64) -> Self {
        let base_delay_s = if max_retries == 0 {
            0.0
        } else if (multiplier - 1.0).abs() < f64::EPSILON {
            total_time_s as f64 / max_retries as f64
        } else {
            total_time_s as f64 * (multiplier - 1.0) / (multiplier.powi(max_retries as i32) - 1.0)
        };

        Self {
            max_retries,
            base_delay_s,
            multiplier,
        }
    }

    /// Getter for `max_retries`
    pub(crate) fn max_retries(&self) -> u64 {
        self.max_retries
    }

    /// Delay in seconds before the given retry (1-based)
    pub(crate) fn get_delay(&self, attempt: u64) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        (self.base_delay_s * self.multiplier.powi(exponent)).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::ExponentialBackoff;

    #[test]
    fn test_delays_grow_and_sum_to_total() {
        let policy = ExponentialBackoff::new(3, 10, 1.5);
        let delays: Vec<u64> = (1..=3).map(|a| policy.get_delay(a)).collect();

        assert_eq!(delays, vec![2, 3, 5]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_zero_retries_never_waits() {
        let policy = ExponentialBackoff::new(0, 10, 1.5);
        assert_eq!(policy.max_retries(), 0);
        assert_eq!(policy.get_delay(1), 0);
    }
}

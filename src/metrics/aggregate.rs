// src/metrics/aggregate.rs

//! Numeric helpers: nearest-rank percentiles, rates and means.

/// Nearest-rank percentile: the value at index `floor(n * pct / 100)` of the
/// ascending-sorted sample, clamped to the last element.
///
/// `pct` is in `[0, 100]`. Returns `None` for an empty sample. The input does
/// not need to be sorted.
pub fn percentile(pct: f64, samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let rank = (n as f64 * pct.clamp(0.0, 100.0) / 100.0).floor() as usize;
    Some(sorted[rank.min(n - 1)])
}

/// `successes / (successes + failures)`, or 0 when there is nothing to rate.
pub fn success_rate(successes: usize, failures: usize) -> f64 {
    ratio(successes as f64, (successes + failures) as f64)
}

/// `num / den`, or 0 when `den` is 0.
pub fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENS: [f64; 10] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];

    #[test]
    fn median_uses_floor_rank() {
        assert_eq!(percentile(50.0, &TENS), Some(60.0));
    }

    #[test]
    fn zeroth_percentile_is_the_minimum() {
        assert_eq!(percentile(0.0, &TENS), Some(10.0));
        let shuffled = [70.0, 10.0, 40.0];
        assert_eq!(percentile(0.0, &shuffled), Some(10.0));
    }

    #[test]
    fn top_percentiles_clamp_to_the_maximum() {
        assert_eq!(percentile(100.0, &TENS), Some(100.0));
        assert_eq!(percentile(99.0, &TENS), Some(100.0));
        assert_eq!(percentile(90.0, &TENS), Some(100.0));
        assert_eq!(percentile(95.0, &[5.0]), Some(5.0));
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(percentile(50.0, &[]), None);
        assert_eq!(mean(&[]), None);
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(ratio(3.0, 0.0), 0.0);
    }

    #[test]
    fn rates() {
        assert_eq!(success_rate(3, 1), 0.75);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
    }
}

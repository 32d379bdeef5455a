//! Numerically stable log-domain sums and differences.
//!
//! Score state uses `0.0` as an "unset" sentinel (not `log(1)`); callers are
//! expected to gate on that sentinel before reaching for these helpers.

/// `log(exp(x) + exp(y))` with the max factored out.
pub fn log_sum_exp(x: f64, y: f64) -> f64 {
    let max_val = x.max(y);
    ((x - max_val).exp() + (y - max_val).exp()).ln() + max_val
}

/// `log(exp(x) - exp(y))` with the max factored out.
///
/// Returns `-inf` when `x == y`; the caller guarantees `x >= y` (mass being
/// removed was previously added).
pub fn log_diff_exp(x: f64, y: f64) -> f64 {
    let max_val = x.max(y);
    ((x - max_val).exp() - (y - max_val).exp()).ln() + max_val
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_of_equal_masses_doubles() {
        let x = 0.25f64.ln();
        let total = log_sum_exp(x, x);
        assert!((total - 0.5f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn sum_matches_linear_domain() {
        let total = log_sum_exp(0.7f64.ln(), 0.2f64.ln());
        assert!((total - 0.9f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn diff_matches_linear_domain() {
        let rest = log_diff_exp(0.9f64.ln(), 0.2f64.ln());
        assert!((rest - 0.7f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn diff_of_equal_masses_is_neg_inf() {
        let x = 0.4f64.ln();
        assert!(log_diff_exp(x, x).is_infinite());
    }

    #[test]
    fn stable_for_large_magnitudes() {
        // naive exp() would overflow here
        let total = log_sum_exp(750.0, 749.0);
        assert!((total - (750.0 + (1.0 + (-1.0f64).exp()).ln())).abs() < 1e-9);
    }
}

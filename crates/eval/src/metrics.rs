//! Validation error metrics over pairwise-complete prediction pairs.

use serde::Serialize;

/// Scalar error metrics between predicted means and held-out observations.
///
/// All metrics are computed over pairwise-complete pairs only: indices where
/// both values are finite. With zero complete pairs, or zero variance on
/// either side, the undefined metrics are NaN and stay NaN through
/// aggregation; they are never coerced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub rmse: f64,
    pub mae: f64,
    pub bias: f64,
    /// Pearson correlation between predictions and observations
    pub r: f64,
    pub r2: f64,
    /// Number of complete pairs the metrics are computed over
    pub n_pairs: usize,
}

impl Metrics {
    /// Compute metrics between `predicted` and `observed`, NaN marking a
    /// missing value on either side.
    ///
    /// **Panics** if the slices have different lengths.
    pub fn compute(predicted: &[f64], observed: &[f64]) -> Metrics {
        assert_eq!(
            predicted.len(),
            observed.len(),
            "predicted and observed lengths must match"
        );
        let pairs: Vec<(f64, f64)> = predicted
            .iter()
            .zip(observed.iter())
            .filter(|(p, o)| p.is_finite() && o.is_finite())
            .map(|(&p, &o)| (p, o))
            .collect();
        let n = pairs.len();
        if n == 0 {
            return Metrics {
                rmse: f64::NAN,
                mae: f64::NAN,
                bias: f64::NAN,
                r: f64::NAN,
                r2: f64::NAN,
                n_pairs: 0,
            };
        }
        let nf = n as f64;
        let rmse = (pairs.iter().map(|(p, o)| (p - o) * (p - o)).sum::<f64>() / nf).sqrt();
        let mae = pairs.iter().map(|(p, o)| (p - o).abs()).sum::<f64>() / nf;
        let bias = pairs.iter().map(|(p, o)| p - o).sum::<f64>() / nf;

        let p_mean = pairs.iter().map(|(p, _)| p).sum::<f64>() / nf;
        let o_mean = pairs.iter().map(|(_, o)| o).sum::<f64>() / nf;
        let cov = pairs
            .iter()
            .map(|(p, o)| (p - p_mean) * (o - o_mean))
            .sum::<f64>();
        let p_var = pairs.iter().map(|(p, _)| (p - p_mean) * (p - p_mean)).sum::<f64>();
        let o_var = pairs.iter().map(|(_, o)| (o - o_mean) * (o - o_mean)).sum::<f64>();
        // 0/0 when either side is constant: correlation undefined
        let r = cov / (p_var.sqrt() * o_var.sqrt());
        Metrics {
            rmse,
            mae,
            bias,
            r,
            r2: r * r,
            n_pairs: n,
        }
    }

    /// Arithmetic mean of per-fold metrics; NaN entries propagate
    pub fn aggregate(folds: &[Metrics]) -> Metrics {
        let nf = folds.len() as f64;
        Metrics {
            rmse: folds.iter().map(|m| m.rmse).sum::<f64>() / nf,
            mae: folds.iter().map(|m| m.mae).sum::<f64>() / nf,
            bias: folds.iter().map(|m| m.bias).sum::<f64>() / nf,
            r: folds.iter().map(|m| m.r).sum::<f64>() / nf,
            r2: folds.iter().map(|m| m.r2).sum::<f64>() / nf,
            n_pairs: folds.iter().map(|m| m.n_pairs).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_literal_scenario() {
        let m = Metrics::compute(&[2., 3., 4.], &[1., 3., 6.]);
        assert_abs_diff_eq!(m.rmse, (5f64 / 3.).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(m.mae, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.bias, -1. / 3., epsilon = 1e-12);
        // R^2 is exactly 75/76 for this configuration
        assert_abs_diff_eq!(m.r2, 75. / 76., epsilon = 1e-12);
        assert_abs_diff_eq!(m.r, (75f64 / 76.).sqrt(), epsilon = 1e-12);
        assert_eq!(m.n_pairs, 3);
    }

    #[test]
    fn test_missing_pairs_are_excluded() {
        let with_gap = Metrics::compute(&[2., 3., 4.], &[1., f64::NAN, 6.]);
        let reduced = Metrics::compute(&[2., 4.], &[1., 6.]);
        assert_eq!(with_gap.n_pairs, 2);
        assert_abs_diff_eq!(with_gap.rmse, reduced.rmse, epsilon = 1e-12);
        assert_abs_diff_eq!(with_gap.mae, reduced.mae, epsilon = 1e-12);
        assert_abs_diff_eq!(with_gap.bias, reduced.bias, epsilon = 1e-12);
        // A missing prediction is excluded the same way
        let pred_gap = Metrics::compute(&[2., f64::NAN, 4.], &[1., 3., 6.]);
        assert_eq!(pred_gap.n_pairs, 2);
    }

    #[test]
    fn test_no_complete_pairs_is_nan() {
        let m = Metrics::compute(&[1., 2.], &[f64::NAN, f64::NAN]);
        assert_eq!(m.n_pairs, 0);
        assert!(m.rmse.is_nan() && m.mae.is_nan() && m.bias.is_nan() && m.r.is_nan());
    }

    #[test]
    fn test_constant_side_gives_nan_correlation() {
        let m = Metrics::compute(&[2., 2., 2.], &[1., 3., 6.]);
        assert!(m.r.is_nan());
        // The pointwise metrics stay defined
        assert!(m.rmse.is_finite());
    }

    #[test]
    fn test_aggregate_mean() {
        let folds: Vec<Metrics> = [1., 2., 3., 4., 5.]
            .iter()
            .map(|&v| Metrics {
                rmse: v,
                mae: v,
                bias: 0.,
                r: 1.,
                r2: 1.,
                n_pairs: 10,
            })
            .collect();
        let agg = Metrics::aggregate(&folds);
        assert_abs_diff_eq!(agg.rmse, 3.0, epsilon = 1e-15);
        assert_eq!(agg.n_pairs, 50);
    }

    #[test]
    fn test_aggregate_propagates_nan() {
        let folds = vec![
            Metrics::compute(&[1., 2.], &[1., 2.]),
            Metrics::compute(&[1., 2.], &[f64::NAN, f64::NAN]),
        ];
        let agg = Metrics::aggregate(&folds);
        assert!(agg.rmse.is_nan());
    }
}

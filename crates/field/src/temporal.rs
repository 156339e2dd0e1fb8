//! Temporal dependence of the latent field across time groups.
//!
//! The field is replicated per time group and coupled by a stationary AR(1)
//! process with unit marginal variance; both the precision matrix and the
//! correlation log-determinant have closed forms.

use linfa::Float;
use ndarray::Array2;

/// Precision matrix of a stationary, unit-variance AR(1) process of length
/// `t` with lag-one correlation `rho`. Tridiagonal; identity when `t == 1`.
pub fn ar1_precision<F: Float>(rho: F, t: usize) -> Array2<F> {
    let mut q = Array2::zeros((t, t));
    if t == 1 {
        q[[0, 0]] = F::one();
        return q;
    }
    let scale = F::one() / (F::one() - rho * rho);
    for i in 0..t {
        q[[i, i]] = if i == 0 || i == t - 1 {
            scale
        } else {
            (F::one() + rho * rho) * scale
        };
        if i + 1 < t {
            q[[i, i + 1]] = -rho * scale;
            q[[i + 1, i]] = -rho * scale;
        }
    }
    q
}

/// Log-determinant of the AR(1) correlation matrix: (t - 1) ln(1 - rho^2)
pub fn ar1_corr_logdet<F: Float>(rho: F, t: usize) -> F {
    F::cast(t.saturating_sub(1)) * (F::one() - rho * rho).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn ar1_correlation(rho: f64, t: usize) -> Array2<f64> {
        let mut k = Array2::zeros((t, t));
        for i in 0..t {
            for j in 0..t {
                k[[i, j]] = rho.powi((i as i32 - j as i32).abs());
            }
        }
        k
    }

    #[test]
    fn test_precision_inverts_correlation() {
        let (rho, t) = (0.6, 5);
        let q = ar1_precision(rho, t);
        let k = ar1_correlation(rho, t);
        let prod = q.dot(&k);
        for i in 0..t {
            for j in 0..t {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(prod[[i, j]], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_logdet_matches_direct_product() {
        let (rho, t) = (0.85, 7);
        // |K| = (1 - rho^2)^(t-1) for the stationary AR(1) correlation
        let direct = ((1. - rho * rho) as f64).ln() * (t - 1) as f64;
        assert_abs_diff_eq!(ar1_corr_logdet(rho, t), direct, epsilon = 1e-12);
    }

    #[test]
    fn test_single_group_is_identity() {
        let q = ar1_precision(0.9, 1);
        assert_eq!(q.dim(), (1, 1));
        assert_abs_diff_eq!(q[[0, 0]], 1.0);
        assert_abs_diff_eq!(ar1_corr_logdet(0.9, 1), 0.0);
    }
}

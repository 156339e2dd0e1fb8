//! Posterior summaries returned by an inference engine.

use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayView1};

/// 97.5% standard normal quantile
pub(crate) const Z_975: f64 = 1.959963984540054;

/// Posterior summary of one fixed-effect coefficient
#[derive(Debug, Clone)]
pub struct FixedEffectSummary<F: Float> {
    pub name: String,
    pub mean: F,
    pub sd: F,
    pub quant025: F,
    pub median: F,
    pub quant975: F,
}

impl<F: Float> FixedEffectSummary<F> {
    /// Summary of a Gaussian marginal given its two moments
    pub fn from_moments(name: String, mean: F, sd: F) -> Self {
        let half = F::cast(Z_975) * sd;
        FixedEffectSummary {
            name,
            mean,
            sd,
            quant025: mean - half,
            median: mean,
            quant975: mean + half,
        }
    }

    /// Marginal density curve as a (n_points, 2) array of (value, density),
    /// spanning four standard deviations around the mean.
    pub fn marginal(&self, n_points: usize) -> Array2<F> {
        let n_points = n_points.max(2);
        let span = F::cast(4.) * self.sd;
        let lo = self.mean - span;
        let step = F::cast(2.) * span / F::cast(n_points - 1);
        let norm = F::one() / (self.sd * F::cast((2. * std::f64::consts::PI).sqrt()));
        let mut out = Array2::zeros((n_points, 2));
        for i in 0..n_points {
            let x = lo + F::cast(i) * step;
            let z = (x - self.mean) / self.sd;
            out[[i, 0]] = x;
            out[[i, 1]] = norm * F::exp(F::cast(-0.5) * z * z);
        }
        out
    }
}

/// Link between a hyperparameter's internal (Gaussian) scale and its
/// natural scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HyperLink {
    /// natural = exp(internal)
    Log,
    /// natural = tanh(internal / 2), for correlations in (-1, 1)
    FisherZ,
}

impl HyperLink {
    pub fn to_natural<F: Float>(&self, internal: F) -> F {
        match self {
            HyperLink::Log => internal.exp(),
            HyperLink::FisherZ => (internal / F::cast(2.)).tanh(),
        }
    }

    pub fn to_internal<F: Float>(&self, natural: F) -> F {
        match self {
            HyperLink::Log => natural.ln(),
            HyperLink::FisherZ => ((F::one() + natural) / (F::one() - natural)).ln(),
        }
    }
}

/// Posterior summary of one hyperparameter.
///
/// The posterior is Gaussian on the internal scale (Laplace approximation at
/// the mode); natural-scale quantiles follow by the monotone link.
#[derive(Debug, Clone)]
pub struct HyperparameterSummary<F: Float> {
    pub name: String,
    /// Natural-scale posterior mode
    pub estimate: F,
    pub quant025: F,
    pub median: F,
    pub quant975: F,
    /// Standard deviation on the internal scale
    pub internal_sd: F,
    pub(crate) internal_mode: F,
    pub(crate) link: HyperLink,
}

impl<F: Float> HyperparameterSummary<F> {
    /// Summary from an internal-scale Gaussian approximation
    pub fn from_internal(name: String, mode: F, sd: F, link: HyperLink) -> Self {
        let half = F::cast(Z_975) * sd;
        HyperparameterSummary {
            name,
            estimate: link.to_natural(mode),
            quant025: link.to_natural(mode - half),
            median: link.to_natural(mode),
            quant975: link.to_natural(mode + half),
            internal_sd: sd,
            internal_mode: mode,
            link,
        }
    }

    /// Marginal density curve as a (n_points, 2) array of (value, density) on
    /// the natural scale, by change of variables from the internal Gaussian.
    pub fn marginal(&self, n_points: usize) -> Array2<F> {
        let n_points = n_points.max(2);
        let span = F::cast(4.) * self.internal_sd;
        let lo = self.internal_mode - span;
        let step = F::cast(2.) * span / F::cast(n_points - 1);
        let norm =
            F::one() / (self.internal_sd * F::cast((2. * std::f64::consts::PI).sqrt()));
        let mut out = Array2::zeros((n_points, 2));
        for i in 0..n_points {
            let z = lo + F::cast(i) * step;
            let x = self.link.to_natural(z);
            let std = (z - self.internal_mode) / self.internal_sd;
            // |dz/dx| from the inverse link
            let jac = match self.link {
                HyperLink::Log => F::one() / x,
                HyperLink::FisherZ => F::cast(2.) / (F::one() - x * x),
            };
            out[[i, 0]] = x;
            out[[i, 1]] = norm * F::exp(F::cast(-0.5) * std * std) * jac;
        }
        out
    }
}

/// Per-row posterior of the linear predictor over all stacked rows
#[derive(Debug, Clone)]
pub struct LinearPredictor<F: Float> {
    mean: Array1<F>,
    sd: Array1<F>,
}

impl<F: Float> LinearPredictor<F> {
    pub fn new(mean: Array1<F>, sd: Array1<F>) -> Self {
        debug_assert_eq!(mean.len(), sd.len());
        LinearPredictor { mean, sd }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    pub fn sd(&self) -> &Array1<F> {
        &self.sd
    }

    /// Posterior means of a row range (e.g. a stack's prediction block)
    pub fn mean_of(&self, rows: std::ops::Range<usize>) -> ArrayView1<F> {
        self.mean.slice(s![rows])
    }

    /// Posterior sds of a row range
    pub fn sd_of(&self, rows: std::ops::Range<usize>) -> ArrayView1<F> {
        self.sd.slice(s![rows])
    }
}

/// The posterior returned by a successful fit
#[derive(Debug, Clone)]
pub struct Posterior<F: Float> {
    pub(crate) fixed: Vec<FixedEffectSummary<F>>,
    pub(crate) hyperparameters: Vec<HyperparameterSummary<F>>,
    pub(crate) linear: LinearPredictor<F>,
    pub(crate) log_marginal: F,
}

impl<F: Float> Posterior<F> {
    /// Assemble a posterior; the seam alternate engine backends go through
    pub fn new(
        fixed: Vec<FixedEffectSummary<F>>,
        hyperparameters: Vec<HyperparameterSummary<F>>,
        linear: LinearPredictor<F>,
        log_marginal: F,
    ) -> Self {
        Posterior {
            fixed,
            hyperparameters,
            linear,
            log_marginal,
        }
    }

    /// Fixed-effect coefficient summaries, intercept first
    pub fn fixed_effects(&self) -> &[FixedEffectSummary<F>] {
        &self.fixed
    }

    /// Hyperparameter summaries on their natural scales
    pub fn hyperparameters(&self) -> &[HyperparameterSummary<F>] {
        &self.hyperparameters
    }

    /// Linear predictor posterior over every stacked row
    pub fn linear_predictor(&self) -> &LinearPredictor<F> {
        &self.linear
    }

    /// Log marginal likelihood at the fitted hyperparameters
    pub fn log_marginal(&self) -> F {
        self.log_marginal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_fixed_effect_quantiles() {
        let s = FixedEffectSummary::from_moments("tmax".to_string(), 1.0f64, 0.5);
        assert_abs_diff_eq!(s.quant025, 1.0 - 1.959963984540054 * 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(s.median, 1.0);
        let marginal = s.marginal(101);
        assert_eq!(marginal.dim(), (101, 2));
        // Density peaks at the mean
        let mid = marginal[[50, 1]];
        assert!(marginal.column(1).iter().all(|&v| v <= mid + 1e-12));
    }

    #[test]
    fn test_hyper_links_roundtrip() {
        for x in [0.1f64, 1.0, 7.3] {
            let z = HyperLink::Log.to_internal(x);
            assert_abs_diff_eq!(HyperLink::Log.to_natural(z), x, epsilon = 1e-12);
        }
        for c in [-0.7f64, 0.0, 0.95] {
            let z = HyperLink::FisherZ.to_internal(c);
            assert_abs_diff_eq!(HyperLink::FisherZ.to_natural(z), c, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_hyper_quantiles_are_ordered() {
        let s = HyperparameterSummary::from_internal(
            "spatial range".to_string(),
            0.3f64,
            0.4,
            HyperLink::Log,
        );
        assert!(s.quant025 < s.median && s.median < s.quant975);
        assert_abs_diff_eq!(s.estimate, 0.3f64.exp(), epsilon = 1e-12);
    }
}

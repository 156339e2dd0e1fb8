//! Penalized-complexity priors for the field hyperparameters.
//!
//! Each prior is specified by a probability statement about the natural-scale
//! parameter, `(threshold, probability)`, rather than by distribution
//! parameters directly:
//! * spatial range: P(range < threshold) = probability
//! * field standard deviation: P(sd > threshold) = probability
//! * AR(1) correlation: P(cor > threshold) = probability, base model cor = 1

use crate::errors::{FieldError, Result};
use linfa::Float;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum distance to the AR(1) base model, d(cor) = sqrt(1 - cor) at cor = -1
const AR1_MAX_DISTANCE: f64 = std::f64::consts::SQRT_2;

fn check_probability<F: Float>(probability: F, what: &str) -> Result<()> {
    if probability <= F::zero() || probability >= F::one() {
        return Err(FieldError::InvalidValue(format!(
            "{what} prior probability should lie strictly between 0 and 1, got {probability}"
        )));
    }
    Ok(())
}

/// PC prior on the spatial practical range: P(range < threshold) = probability.
///
/// The inverse range is exponential with rate `threshold * (-ln probability)`,
/// shrinking towards an infinite-range (flat) base model.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct RangePrior<F: Float> {
    threshold: F,
    probability: F,
}

impl<F: Float> RangePrior<F> {
    pub fn new(threshold: F, probability: F) -> Result<Self> {
        if threshold <= F::zero() {
            return Err(FieldError::InvalidValue(format!(
                "range prior threshold should be positive, got {threshold}"
            )));
        }
        check_probability(probability, "range")?;
        Ok(RangePrior {
            threshold,
            probability,
        })
    }

    pub fn threshold(&self) -> F {
        self.threshold
    }

    pub fn probability(&self) -> F {
        self.probability
    }

    /// Exponential rate on 1/range
    pub fn rate(&self) -> F {
        -self.probability.ln() * self.threshold
    }

    /// Log density at a range value
    pub fn log_density(&self, range: F) -> F {
        let lambda = self.rate();
        lambda.ln() - F::cast(2.) * range.ln() - lambda / range
    }
}

impl<F: Float> Default for RangePrior<F> {
    fn default() -> Self {
        RangePrior {
            threshold: F::cast(0.5),
            probability: F::cast(0.5),
        }
    }
}

/// PC prior on the field marginal standard deviation:
/// P(sd > threshold) = probability.
///
/// The sd is exponential with rate `-ln(probability) / threshold`, shrinking
/// towards a zero-variance base model.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct StdevPrior<F: Float> {
    threshold: F,
    probability: F,
}

impl<F: Float> StdevPrior<F> {
    pub fn new(threshold: F, probability: F) -> Result<Self> {
        if threshold <= F::zero() {
            return Err(FieldError::InvalidValue(format!(
                "stdev prior threshold should be positive, got {threshold}"
            )));
        }
        check_probability(probability, "stdev")?;
        Ok(StdevPrior {
            threshold,
            probability,
        })
    }

    pub fn threshold(&self) -> F {
        self.threshold
    }

    pub fn probability(&self) -> F {
        self.probability
    }

    /// Exponential rate on the sd
    pub fn rate(&self) -> F {
        -self.probability.ln() / self.threshold
    }

    /// Log density at an sd value
    pub fn log_density(&self, sd: F) -> F {
        let lambda = self.rate();
        lambda.ln() - lambda * sd
    }
}

impl<F: Float> Default for StdevPrior<F> {
    fn default() -> Self {
        StdevPrior {
            threshold: F::cast(1.0),
            probability: F::cast(0.01),
        }
    }
}

/// PC prior on the AR(1) lag-one correlation with base model cor = 1:
/// P(cor > threshold) = probability.
///
/// The distance to the base model d(cor) = sqrt(1 - cor) follows a truncated
/// exponential on (0, sqrt 2); its rate is found by bisection on the CDF
/// statement, which is solvable only when
/// probability > sqrt(1 - threshold) / sqrt(2).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct Ar1Prior<F: Float> {
    threshold: F,
    probability: F,
    rate: F,
}

impl<F: Float> Ar1Prior<F> {
    pub fn new(threshold: F, probability: F) -> Result<Self> {
        if threshold <= -F::one() || threshold >= F::one() {
            return Err(FieldError::InvalidValue(format!(
                "AR(1) prior threshold should lie strictly between -1 and 1, got {threshold}"
            )));
        }
        check_probability(probability, "AR(1)")?;
        let rate = solve_ar1_rate(threshold, probability)?;
        Ok(Ar1Prior {
            threshold,
            probability,
            rate,
        })
    }

    pub fn threshold(&self) -> F {
        self.threshold
    }

    pub fn probability(&self) -> F {
        self.probability
    }

    /// Truncated exponential rate on d(cor) = sqrt(1 - cor)
    pub fn rate(&self) -> F {
        self.rate
    }

    /// Log density at a correlation value in (-1, 1)
    pub fn log_density(&self, cor: F) -> F {
        let lambda = self.rate;
        let d = (F::one() - cor).sqrt();
        lambda.ln()
            - lambda * d
            - (F::one() - F::exp(-lambda * F::cast(AR1_MAX_DISTANCE))).ln()
            - (F::cast(2.) * d).ln()
    }
}

impl<F: Float> Default for Ar1Prior<F> {
    fn default() -> Self {
        // P(cor > 0.8) = 0.9, solvable by construction
        Ar1Prior::new(F::cast(0.8), F::cast(0.9)).unwrap()
    }
}

/// Solve P(cor > threshold) = probability for the truncated exponential rate.
///
/// The CDF of the distance, F(d) = (1 - exp(-rate d)) / (1 - exp(-rate sqrt 2)),
/// increases with the rate from d / sqrt(2); bisection over a bracket grown
/// from below.
fn solve_ar1_rate<F: Float>(threshold: F, probability: F) -> Result<F> {
    let d0 = (F::one() - threshold).sqrt();
    let limit = d0 / F::cast(AR1_MAX_DISTANCE);
    if probability <= limit {
        return Err(FieldError::InvalidValue(format!(
            "AR(1) prior P(cor > {threshold}) = {probability} is not reachable; \
             the probability should exceed {limit}"
        )));
    }
    let cdf = |rate: F| {
        (F::one() - F::exp(-rate * d0)) / (F::one() - F::exp(-rate * F::cast(AR1_MAX_DISTANCE)))
            - probability
    };
    let mut lo = F::cast(1e-9);
    let mut hi = F::one();
    let mut grow = 0;
    while cdf(hi) < F::zero() && grow < 60 {
        hi = hi * F::cast(2.);
        grow += 1;
    }
    if cdf(hi) < F::zero() {
        return Err(FieldError::InvalidValue(
            "AR(1) prior rate bracket exhausted".to_string(),
        ));
    }
    for _ in 0..100 {
        let mid = (lo + hi) / F::cast(2.);
        if cdf(mid) < F::zero() {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok((lo + hi) / F::cast(2.))
}

/// Observation likelihood family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Likelihood {
    #[default]
    Gaussian,
}

impl fmt::Display for Likelihood {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Likelihood::Gaussian => write!(f, "Gaussian"),
        }
    }
}

/// The prior specification handed to an inference engine
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct ModelPriors<F: Float> {
    pub range: RangePrior<F>,
    pub stdev: StdevPrior<F>,
    pub ar1: Ar1Prior<F>,
    pub likelihood: Likelihood,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_range_rate_closed_form() {
        let prior = RangePrior::new(0.5f64, 0.5).unwrap();
        // lambda = -ln(0.5) * 0.5
        assert_abs_diff_eq!(prior.rate(), 0.34657359, epsilon = 1e-8);
    }

    #[test]
    fn test_stdev_rate_closed_form() {
        let prior = StdevPrior::new(1.0f64, 0.01).unwrap();
        // lambda = -ln(0.01)
        assert_abs_diff_eq!(prior.rate(), 4.60517019, epsilon = 1e-8);
    }

    #[test]
    fn test_ar1_rate_satisfies_cdf() {
        let prior = Ar1Prior::new(0.8f64, 0.9).unwrap();
        let rate = prior.rate();
        let d0 = (1.0f64 - 0.8).sqrt();
        let cdf = (1. - (-rate * d0).exp()) / (1. - (-rate * std::f64::consts::SQRT_2).exp());
        assert_abs_diff_eq!(cdf, 0.9, epsilon = 1e-9);
    }

    #[test]
    fn test_unreachable_ar1_prior_is_an_error() {
        // P(cor > -0.9) = 0.5 would need more mass than the base allows
        let err = Ar1Prior::new(-0.9f64, 0.5).unwrap_err();
        assert!(matches!(err, FieldError::InvalidValue(_)));
    }

    #[test]
    fn test_invalid_probability() {
        assert!(RangePrior::new(1.0f64, 0.).is_err());
        assert!(StdevPrior::new(1.0f64, 1.).is_err());
        assert!(RangePrior::new(-1.0f64, 0.5).is_err());
    }

    #[test]
    fn test_log_densities_are_finite() {
        let priors = ModelPriors::<f64>::default();
        for x in [0.05, 0.5, 5.0] {
            assert!(priors.range.log_density(x).is_finite());
            assert!(priors.stdev.log_density(x).is_finite());
        }
        for cor in [-0.5, 0.0, 0.9] {
            assert!(priors.ar1.log_density(cor).is_finite());
        }
    }
}

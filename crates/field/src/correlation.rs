//! Spatial correlation models over inter-vertex distances.
//!
//! The `range` parameter follows the usual practical-range convention:
//! the distance at which correlation has decayed to roughly 0.1, with the
//! Matern scalings `kappa = sqrt(8 nu) / range`.

use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for the spatial correlation of a latent field between two sites
pub trait SpatialCorrelation<F: Float>: Clone + Copy + Default + fmt::Display + Sync {
    /// Correlation at separation `d` for a given practical `range`
    fn value(&self, d: F, range: F) -> F;
}

/// Matern 3/2 correlation model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Matern32Corr();

impl<F: Float> SpatialCorrelation<F> for Matern32Corr {
    /// (1 + kappa.d) exp(- kappa.d) with kappa = sqrt(12) / range
    fn value(&self, d: F, range: F) -> F {
        let kd = F::cast(12.).sqrt() * d / range;
        (F::one() + kd) * F::exp(-kd)
    }
}

impl fmt::Display for Matern32Corr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern3/2")
    }
}

/// Matern 5/2 correlation model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Matern52Corr();

impl<F: Float> SpatialCorrelation<F> for Matern52Corr {
    /// (1 + kappa.d + kappa^2.d^2/3) exp(- kappa.d) with kappa = sqrt(20) / range
    fn value(&self, d: F, range: F) -> F {
        let kd = F::cast(20.).sqrt() * d / range;
        (F::one() + kd + kd * kd / F::cast(3.)) * F::exp(-kd)
    }
}

impl fmt::Display for Matern52Corr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern5/2")
    }
}

/// Squared exponential correlation model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SquaredExponentialCorr();

impl<F: Float> SpatialCorrelation<F> for SquaredExponentialCorr {
    /// exp(-(s.d)^2) with s = sqrt(ln 10) / range, so that value(range) = 0.1
    fn value(&self, d: F, range: F) -> F {
        let sd = F::cast(std::f64::consts::LN_10).sqrt() * d / range;
        F::exp(-sd * sd)
    }
}

impl fmt::Display for SquaredExponentialCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SquaredExponential")
    }
}

/// Condensed pairwise distances between lattice vertices.
///
/// Stores the strictly-lower-triangle distances of a (n, n) distance matrix
/// as a flat vector together with their (row, col) indices.
#[derive(Debug, Clone)]
pub struct VertexDistances<F: Float> {
    /// Distances as a (n * (n - 1) / 2,) vector
    pub d: Array1<F>,
    /// Indices of each distance in the square matrix
    pub indices: Vec<(usize, usize)>,
    /// Number of vertices
    pub n: usize,
}

impl<F: Float> VertexDistances<F> {
    /// Compute pairwise Euclidean distances between points of a (n, 2) array
    pub fn new(coords: &ArrayBase<impl Data<Elem = F>, Ix2>) -> VertexDistances<F> {
        let n = coords.nrows();
        let n_pairs = n * (n - 1) / 2;
        let mut d = Array1::zeros(n_pairs);
        let mut indices = Vec::with_capacity(n_pairs);
        let mut k = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let dx = coords[[i, 0]] - coords[[j, 0]];
                let dy = coords[[i, 1]] - coords[[j, 1]];
                d[k] = (dx * dx + dy * dy).sqrt();
                indices.push((i, j));
                k += 1;
            }
        }
        VertexDistances { d, indices, n }
    }
}

/// Build the (n, n) correlation matrix for the given model and range,
/// with `nugget` added on the diagonal for numerical stability.
pub(crate) fn correlation_matrix<F: Float, Corr: SpatialCorrelation<F>>(
    corr: &Corr,
    dists: &VertexDistances<F>,
    range: F,
    nugget: F,
) -> Array2<F> {
    let mut k = Array2::<F>::eye(dists.n).mapv(|v| v + v * nugget);
    for (value, &(i, j)) in dists.d.iter().zip(dists.indices.iter()) {
        let c = corr.value(*value, range);
        k[[i, j]] = c;
        k[[j, i]] = c;
    }
    k
}

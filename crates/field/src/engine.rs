//! The inference engine abstraction and its default latent Gaussian backend.
//!
//! [InferenceEngine] is the seam between model assembly and posterior
//! computation: the evaluator only ever sees `fit(stack, priors) ->
//! posterior`, so the default backend can be swapped for a mock in tests or
//! for an interop boundary to an external sampler.
//!
//! [LatentGaussian] implements an empirical-Bayes treatment of the Gaussian
//! model: latent coefficients (fixed effects and field basis weights) carry a
//! Gaussian prior whose field block is kron(AR1 across time groups, spatial
//! correlation at lattice vertices) scaled by the field variance; the
//! hyperparameters maximize the closed-form marginal likelihood penalized by
//! the PC priors, and a Laplace approximation at the mode provides their
//! posterior spread. This is a deliberate approximation of the full
//! hierarchical treatment: conditional on the modal hyperparameters every
//! posterior summary below is exact.

use crate::correlation::{correlation_matrix, SpatialCorrelation, VertexDistances};
use crate::errors::{FieldError, Result};
use crate::optimization::{optimize_params, prepare_multistart, CobylaParams};
use crate::posterior::{
    FixedEffectSummary, HyperLink, HyperparameterSummary, LinearPredictor, Posterior,
};
use crate::priors::ModelPriors;
use crate::stack::Stack;
use crate::temporal::{ar1_corr_logdet, ar1_precision};

use linfa::{Float, ParamGuard};
use linfa_linalg::{cholesky::*, triangular::*};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

/// Default number of multistarts for hyperparameter optimization
pub const ENGINE_OPTIM_N_START: usize = 4;
/// Minimum number of objective evaluations for the COBYLA optimizer
pub const ENGINE_COBYLA_MIN_EVAL: usize = 25;
/// Default maximum number of objective evaluations for the COBYLA optimizer
pub const ENGINE_COBYLA_MAX_EVAL: usize = 200;
/// Rate of the Gamma(1, rate) prior on the Gaussian noise precision
const NOISE_GAMMA_RATE: f64 = 5e-5;
/// ln(2 pi)
const LN_2PI: f64 = 1.8378770664093453;

/// An abstract capability producing a posterior from a stacked model input.
pub trait InferenceEngine<F: Float> {
    /// Fit the model and return posterior summaries for fixed effects,
    /// hyperparameters and the linear predictor at every stacked row,
    /// prediction block included.
    fn fit(&self, stack: &Stack<F>, priors: &ModelPriors<F>) -> Result<Posterior<F>>;
}

/// Natural-scale hyperparameters of the Gaussian observation model
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hyperparameters<F: Float> {
    /// Precision of the Gaussian observation noise
    pub noise_precision: F,
    /// Practical range of the spatial correlation
    pub range: F,
    /// Marginal standard deviation of the field
    pub stdev: F,
    /// Lag-one correlation of the AR(1) time dependence
    pub ar1_cor: F,
}

/// Internal-scale box bounds, ordered like [Hyperparameters] fields:
/// (ln precision, ln range, ln stdev, Fisher-z correlation)
pub type HyperBounds<F> = [(F, F); 4];

/// How the hyperparameters are obtained
#[derive(Clone, Copy, Debug)]
pub enum HyperTuning<F: Float> {
    /// Given constants, no optimization
    Fixed(Hyperparameters<F>),
    /// MAP estimation within internal-scale bounds
    Optimized { bounds: HyperBounds<F> },
}

impl<F: Float> Default for HyperTuning<F> {
    fn default() -> Self {
        HyperTuning::Optimized {
            bounds: [
                (F::cast(-9.2), F::cast(13.8)),
                (F::cast(-4.6), F::cast(4.6)),
                (F::cast(-6.9), F::cast(4.6)),
                (F::cast(-5.3), F::cast(7.6)),
            ],
        }
    }
}

/// The latent Gaussian engine, parameterized by its spatial correlation model.
///
/// Build one through [LatentGaussian::params]; an instance is a validated,
/// immutable configuration and [fit](InferenceEngine::fit) never mutates it,
/// so one engine can serve many folds.
#[derive(Clone, Debug)]
pub struct LatentGaussian<F: Float, Corr: SpatialCorrelation<F>> {
    pub(crate) corr: Corr,
    pub(crate) hyper_tuning: HyperTuning<F>,
    pub(crate) n_start: usize,
    pub(crate) max_eval: usize,
    pub(crate) seed: Option<u64>,
    pub(crate) hyper_sd: bool,
    /// Jitter added to the spatial correlation diagonal
    pub(crate) nugget: F,
    /// Precision of the vague Gaussian prior on fixed effects
    pub(crate) fixed_precision: F,
}

impl<F: Float, Corr: SpatialCorrelation<F>> Default for LatentGaussian<F, Corr> {
    fn default() -> Self {
        LatentGaussian {
            corr: Corr::default(),
            hyper_tuning: HyperTuning::default(),
            n_start: ENGINE_OPTIM_N_START,
            max_eval: ENGINE_COBYLA_MAX_EVAL,
            seed: Some(42),
            hyper_sd: true,
            nugget: F::cast(1e-8),
            fixed_precision: F::cast(1e-4),
        }
    }
}

impl<F: Float, Corr: SpatialCorrelation<F>> LatentGaussian<F, Corr> {
    /// Engine parameters constructor
    pub fn params() -> LatentGaussianParams<F, Corr> {
        LatentGaussianParams(LatentGaussian::default())
    }

    pub fn corr(&self) -> &Corr {
        &self.corr
    }

    pub fn hyper_tuning(&self) -> &HyperTuning<F> {
        &self.hyper_tuning
    }

    pub fn n_start(&self) -> usize {
        self.n_start
    }

    pub fn max_eval(&self) -> usize {
        self.max_eval
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

impl<F: Float, Corr: SpatialCorrelation<F>> std::fmt::Display for LatentGaussian<F, Corr> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let tuning = match self.hyper_tuning {
            HyperTuning::Fixed(_) => "fixed",
            HyperTuning::Optimized { .. } => "optimized",
        };
        write!(f, "LatentGaussian(corr={}, hyper={})", self.corr, tuning)
    }
}

/// The set of parameters configuring a [LatentGaussian] engine
#[derive(Clone, Debug)]
pub struct LatentGaussianParams<F: Float, Corr: SpatialCorrelation<F>>(LatentGaussian<F, Corr>);

impl<F: Float, Corr: SpatialCorrelation<F>> LatentGaussianParams<F, Corr> {
    /// Set the spatial correlation model.
    pub fn corr(mut self, corr: Corr) -> Self {
        self.0.corr = corr;
        self
    }

    /// Set hyperparameter tuning: fixed values or MAP within bounds.
    pub fn hyper_tuning(mut self, hyper_tuning: HyperTuning<F>) -> Self {
        self.0.hyper_tuning = hyper_tuning;
        self
    }

    /// Set the number of optimization restarts.
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the max number of objective evaluations per optimization start.
    /// Values below [ENGINE_COBYLA_MIN_EVAL] are clamped up.
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = ENGINE_COBYLA_MIN_EVAL.max(max_eval);
        self
    }

    /// Set the multistart seed; `None` draws starts from entropy.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }

    /// Toggle the Laplace pass computing hyperparameter spreads.
    pub fn hyper_sd(mut self, hyper_sd: bool) -> Self {
        self.0.hyper_sd = hyper_sd;
        self
    }

    /// Set the spatial correlation jitter.
    pub fn nugget(mut self, nugget: F) -> Self {
        self.0.nugget = nugget;
        self
    }

    /// Set the precision of the vague prior on fixed effects.
    pub fn fixed_precision(mut self, fixed_precision: F) -> Self {
        self.0.fixed_precision = fixed_precision;
        self
    }
}

impl<F: Float, Corr: SpatialCorrelation<F>> ParamGuard for LatentGaussianParams<F, Corr> {
    type Checked = LatentGaussian<F, Corr>;
    type Error = FieldError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.nugget <= F::zero() {
            return Err(FieldError::InvalidValue(format!(
                "nugget should be positive, got {}",
                self.0.nugget
            )));
        }
        if self.0.fixed_precision <= F::zero() {
            return Err(FieldError::InvalidValue(format!(
                "fixed effect precision should be positive, got {}",
                self.0.fixed_precision
            )));
        }
        match &self.0.hyper_tuning {
            HyperTuning::Fixed(h) => {
                if h.noise_precision <= F::zero() || h.range <= F::zero() || h.stdev <= F::zero() {
                    return Err(FieldError::InvalidValue(
                        "fixed hyperparameters should be positive".to_string(),
                    ));
                }
                if h.ar1_cor <= -F::one() || h.ar1_cor >= F::one() {
                    return Err(FieldError::InvalidValue(format!(
                        "fixed AR(1) correlation should lie strictly between -1 and 1, got {}",
                        h.ar1_cor
                    )));
                }
            }
            HyperTuning::Optimized { bounds } => {
                for (lo, up) in bounds {
                    if lo >= up {
                        return Err(FieldError::InvalidValue(format!(
                            "hyperparameter bounds should be increasing, got ({lo}, {up})"
                        )));
                    }
                }
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// Natural-scale working form of the internal hyperparameter vector
#[derive(Clone, Copy, Debug)]
struct Theta<F: Float> {
    tau: F,
    range: F,
    stdev: F,
    rho: F,
}

const HYPER_LINKS: [HyperLink; 4] = [
    HyperLink::Log,
    HyperLink::Log,
    HyperLink::Log,
    HyperLink::FisherZ,
];

fn theta_from_internal<F: Float>(z: &[F; 4]) -> Theta<F> {
    Theta {
        tau: HYPER_LINKS[0].to_natural(z[0]),
        range: HYPER_LINKS[1].to_natural(z[1]),
        stdev: HYPER_LINKS[2].to_natural(z[2]),
        rho: HYPER_LINKS[3].to_natural(z[3]),
    }
}

fn theta_to_internal<F: Float>(h: &Hyperparameters<F>) -> [F; 4] {
    [
        HYPER_LINKS[0].to_internal(h.noise_precision),
        HYPER_LINKS[1].to_internal(h.range),
        HYPER_LINKS[2].to_internal(h.stdev),
        HYPER_LINKS[3].to_internal(h.ar1_cor),
    ]
}

/// Stack quantities precomputed once per fit: sparse design rows, the
/// observed-data cross products and the inter-vertex distances. Only the
/// prior precision depends on the hyperparameters.
struct Assembled<F: Float> {
    /// Sparse design rows over all stacked rows, (column, value) pairs
    rows: Vec<Vec<(usize, F)>>,
    /// Indices of estimation rows carrying an observed response
    n_obs: usize,
    /// Z'Z over observed rows
    g0: Array2<F>,
    /// Z'y over observed rows
    b0: Array1<F>,
    /// y'y over observed rows
    yty: F,
    /// Variance of the observed responses, for optimizer initialization
    y_var: F,
    n_fixed: usize,
    n_vertices: usize,
    n_groups: usize,
    /// Total latent dimension: fixed effects + field basis
    p: usize,
    dists: VertexDistances<F>,
}

impl<F: Float> Assembled<F> {
    fn new(stack: &Stack<F>) -> Assembled<F> {
        let field = stack.field();
        let n_fixed = stack.n_fixed();
        let n_vertices = field.n_vertices();
        let n_groups = field.n_groups();
        let p = n_fixed + field.len();

        let mut rows = Vec::with_capacity(stack.n_rows());
        let mut observed: Vec<(usize, F)> = Vec::new();
        for block in [stack.estimation(), stack.prediction()] {
            for i in 0..block.len() {
                let mut row: Vec<(usize, F)> = Vec::with_capacity(n_fixed + 3);
                row.push((0, F::one()));
                for (j, &value) in block.covariates().row(i).iter().enumerate() {
                    row.push((1 + j, value));
                }
                let proj = &block.projection().rows()[i];
                let group = block.time_groups()[i];
                for k in 0..3 {
                    let col = n_fixed + field.column(proj.vertices[k], group);
                    row.push((col, proj.weights[k]));
                }
                if let Some(y) = block.response()[i] {
                    observed.push((rows.len(), y));
                }
                rows.push(row);
            }
        }

        let mut g0 = Array2::zeros((p, p));
        let mut b0 = Array1::zeros(p);
        let mut yty = F::zero();
        for &(r, y) in &observed {
            for &(ci, vi) in &rows[r] {
                b0[ci] = b0[ci] + vi * y;
                for &(cj, vj) in &rows[r] {
                    g0[[ci, cj]] = g0[[ci, cj]] + vi * vj;
                }
            }
            yty = yty + y * y;
        }

        let n_obs = observed.len();
        let y_var = if n_obs > 1 {
            let mean = observed.iter().map(|&(_, y)| y).sum::<F>() / F::cast(n_obs);
            observed
                .iter()
                .map(|&(_, y)| (y - mean) * (y - mean))
                .sum::<F>()
                / F::cast(n_obs - 1)
        } else {
            F::zero()
        };

        Assembled {
            rows,
            n_obs,
            g0,
            b0,
            yty,
            y_var,
            n_fixed,
            n_vertices,
            n_groups,
            p,
            dists: VertexDistances::new(field.vertex_coords()),
        }
    }
}

impl<F: Float, Corr: SpatialCorrelation<F>> LatentGaussian<F, Corr> {
    /// Prior precision of the latent coefficients and its log determinant
    fn prior_precision(&self, asm: &Assembled<F>, theta: &Theta<F>) -> Result<(Array2<F>, F)> {
        let (nv, ng, nf) = (asm.n_vertices, asm.n_groups, asm.n_fixed);
        let ks = correlation_matrix(&self.corr, &asm.dists, theta.range, self.nugget);
        let ls = ks.cholesky()?;
        let logdet_ks = ls.diag().mapv(|v| v.ln()).sum() * F::cast(2.);
        let ls_inv = ls.solve_triangular(&Array2::eye(nv), UPLO::Lower)?;
        let qs = ls_inv.t().dot(&ls_inv);
        let qt = ar1_precision(theta.rho, ng);

        let sigma2 = theta.stdev * theta.stdev;
        let mut q = Array2::zeros((asm.p, asm.p));
        for j in 0..nf {
            q[[j, j]] = self.fixed_precision;
        }
        for g in 0..ng {
            let fac = qt[[g, g]] / sigma2;
            let off = nf + g * nv;
            for i in 0..nv {
                for j in 0..nv {
                    q[[off + i, off + j]] = fac * qs[[i, j]];
                }
            }
            if g + 1 < ng {
                let fac = qt[[g, g + 1]] / sigma2;
                let (ro, co) = (nf + g * nv, nf + (g + 1) * nv);
                for i in 0..nv {
                    for j in 0..nv {
                        q[[ro + i, co + j]] = fac * qs[[i, j]];
                        q[[co + j, ro + i]] = fac * qs[[i, j]];
                    }
                }
            }
        }

        let m = F::cast(nv * ng);
        let logdet_prior = F::cast(nf) * self.fixed_precision.ln()
            - F::cast(2.) * m * theta.stdev.ln()
            - F::cast(nv) * ar1_corr_logdet(theta.rho, ng)
            - F::cast(ng) * logdet_ks;
        Ok((q, logdet_prior))
    }

    /// Log marginal likelihood of the observed responses at given
    /// hyperparameters, by the matrix determinant lemma and Woodbury identity
    fn log_marginal(&self, asm: &Assembled<F>, theta: &Theta<F>) -> Result<F> {
        let (mut q, logdet_prior) = self.prior_precision(asm, theta)?;
        let tau = theta.tau;
        q.zip_mut_with(&asm.g0, |a, &b| *a = *a + tau * b);
        let l = q.cholesky()?;
        let logdet_q = l.diag().mapv(|v| v.ln()).sum() * F::cast(2.);
        let rhs = asm.b0.mapv(|v| v * tau).insert_axis(Axis(1));
        let a = l.solve_triangular(&rhs, UPLO::Lower)?;
        let quad = a.mapv(|v| v * v).sum();
        let n = F::cast(asm.n_obs);
        Ok(F::cast(0.5)
            * (logdet_prior - logdet_q + n * (tau.ln() - F::cast(LN_2PI)) - tau * asm.yty + quad))
    }

    /// PC prior and noise prior log densities on the internal scale,
    /// Jacobians included
    fn log_hyper_prior(&self, priors: &ModelPriors<F>, z: &[F; 4], theta: &Theta<F>) -> F {
        let noise = F::cast(NOISE_GAMMA_RATE).ln() - F::cast(NOISE_GAMMA_RATE) * theta.tau + z[0];
        let range = priors.range.log_density(theta.range) + z[1];
        let stdev = priors.stdev.log_density(theta.stdev) + z[2];
        let ar1 = priors.ar1.log_density(theta.rho)
            + ((F::one() - theta.rho * theta.rho) / F::cast(2.)).ln();
        noise + range + stdev + ar1
    }

    /// The objective minimized over the internal hyperparameter scale
    fn neg_log_posterior(&self, asm: &Assembled<F>, priors: &ModelPriors<F>, z: &[F; 4]) -> f64 {
        let theta = theta_from_internal(z);
        match self.log_marginal(asm, &theta) {
            Ok(lml) => {
                let value = lml + self.log_hyper_prior(priors, z, &theta);
                let value = -value.to_f64().unwrap_or(f64::NAN);
                if value.is_nan() {
                    f64::INFINITY
                } else {
                    value
                }
            }
            Err(_) => f64::INFINITY,
        }
    }

    fn optimize_hyper(
        &self,
        asm: &Assembled<F>,
        priors: &ModelPriors<F>,
        bounds: &HyperBounds<F>,
    ) -> Result<[F; 4]> {
        let init = Hyperparameters {
            noise_precision: if asm.y_var > F::zero() {
                F::cast(2.) / asm.y_var
            } else {
                F::one()
            },
            range: priors.range.threshold(),
            stdev: F::one() / priors.stdev.rate(),
            ar1_cor: priors.ar1.threshold(),
        };
        let bounds_f64: Vec<(f64, f64)> = bounds
            .iter()
            .map(|(lo, up)| (lo.to_f64().unwrap(), up.to_f64().unwrap()))
            .collect();
        let z0 = theta_to_internal(&init);
        let z0: Array1<f64> = z0
            .iter()
            .zip(&bounds_f64)
            .map(|(z, &(lo, up))| z.to_f64().unwrap().clamp(lo, up))
            .collect();

        let objfn = |x: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
            let z = [
                F::cast(x[0]),
                F::cast(x[1]),
                F::cast(x[2]),
                F::cast(x[3]),
            ];
            self.neg_log_posterior(asm, priors, &z)
        };

        let inits = prepare_multistart(self.n_start, &z0, &bounds_f64, self.seed);
        debug!("hyperparameter multistart from {inits:?}");
        // Ties break on the start index so the reduction is deterministic
        // whatever the parallel schedule
        let (fval, _, z_opt) = (0..inits.nrows())
            .into_par_iter()
            .map(|i| {
                let (fval, z) = optimize_params(
                    objfn,
                    &inits.row(i).to_owned(),
                    &bounds_f64,
                    CobylaParams {
                        maxeval: self.max_eval,
                        ..CobylaParams::default()
                    },
                );
                (fval, i, z)
            })
            .reduce(
                || (f64::INFINITY, usize::MAX, Array1::zeros(4)),
                |a, b| {
                    if b.0 < a.0 || (b.0 == a.0 && b.1 < a.1) {
                        b
                    } else {
                        a
                    }
                },
            );
        if !fval.is_finite() {
            return Err(FieldError::FitFailure(
                "hyperparameter optimization found no finite objective value".to_string(),
            ));
        }
        debug!("hyperparameter MAP at {z_opt} (objective {fval})");
        Ok([
            F::cast(z_opt[0]),
            F::cast(z_opt[1]),
            F::cast(z_opt[2]),
            F::cast(z_opt[3]),
        ])
    }

    /// Internal-scale posterior sds by a finite-difference Laplace pass
    fn laplace_sd(&self, asm: &Assembled<F>, priors: &ModelPriors<F>, z: &[F; 4]) -> [F; 4] {
        let nan = [F::nan(); 4];
        let f = |zf: &[f64; 4]| {
            let z = [
                F::cast(zf[0]),
                F::cast(zf[1]),
                F::cast(zf[2]),
                F::cast(zf[3]),
            ];
            self.neg_log_posterior(asm, priors, &z)
        };
        let z0: [f64; 4] = [
            z[0].to_f64().unwrap_or(f64::NAN),
            z[1].to_f64().unwrap_or(f64::NAN),
            z[2].to_f64().unwrap_or(f64::NAN),
            z[3].to_f64().unwrap_or(f64::NAN),
        ];
        let step: Vec<f64> = z0.iter().map(|v| 1e-3 * (1. + v.abs())).collect();
        let f0 = f(&z0);
        let mut hess = Array2::<f64>::zeros((4, 4));
        for i in 0..4 {
            let mut zp = z0;
            let mut zm = z0;
            zp[i] += step[i];
            zm[i] -= step[i];
            hess[[i, i]] = (f(&zp) + f(&zm) - 2. * f0) / (step[i] * step[i]);
            for j in (i + 1)..4 {
                let (mut zpp, mut zpm, mut zmp, mut zmm) = (z0, z0, z0, z0);
                zpp[i] += step[i];
                zpp[j] += step[j];
                zpm[i] += step[i];
                zpm[j] -= step[j];
                zmp[i] -= step[i];
                zmp[j] += step[j];
                zmm[i] -= step[i];
                zmm[j] -= step[j];
                let mixed = (f(&zpp) - f(&zpm) - f(&zmp) + f(&zmm)) / (4. * step[i] * step[j]);
                hess[[i, j]] = mixed;
                hess[[j, i]] = mixed;
            }
        }
        if hess.iter().any(|v| !v.is_finite()) {
            warn!("non-finite Laplace Hessian, hyperparameter spreads unavailable");
            return nan;
        }
        match hess.cholesky() {
            Ok(l) => match l.solve_triangular(&Array2::eye(4), UPLO::Lower) {
                Ok(l_inv) => {
                    let cov = l_inv.t().dot(&l_inv);
                    let mut sd = [F::zero(); 4];
                    for i in 0..4 {
                        sd[i] = F::cast(cov[[i, i]].sqrt());
                    }
                    sd
                }
                Err(_) => nan,
            },
            Err(_) => {
                // Not positive definite away from a clean optimum; fall back
                // to the diagonal curvature
                warn!("Laplace Hessian not positive definite, using diagonal curvature");
                let mut sd = [F::nan(); 4];
                for i in 0..4 {
                    if hess[[i, i]] > 0. {
                        sd[i] = F::cast((1. / hess[[i, i]]).sqrt());
                    }
                }
                sd
            }
        }
    }
}

impl<F: Float, Corr: SpatialCorrelation<F>> InferenceEngine<F> for LatentGaussian<F, Corr> {
    fn fit(&self, stack: &Stack<F>, priors: &ModelPriors<F>) -> Result<Posterior<F>> {
        let asm = Assembled::new(stack);
        if asm.n_obs == 0 {
            return Err(FieldError::FitFailure(
                "estimation block has no observed responses".to_string(),
            ));
        }
        info!(
            "fitting {self}: {} observed rows, {} prediction rows, latent dimension {}",
            asm.n_obs,
            stack.prediction().len(),
            asm.p
        );

        let z_opt = match &self.hyper_tuning {
            HyperTuning::Fixed(h) => theta_to_internal(h),
            HyperTuning::Optimized { bounds } => self.optimize_hyper(&asm, priors, bounds)?,
        };
        let theta = theta_from_internal(&z_opt);

        // Posterior of the latent coefficients at the modal hyperparameters
        let (mut q, _) = self
            .prior_precision(&asm, &theta)
            .map_err(|e| FieldError::FitFailure(format!("prior assembly failed: {e}")))?;
        let tau = theta.tau;
        q.zip_mut_with(&asm.g0, |a, &b| *a = *a + tau * b);
        let l = q
            .cholesky()
            .map_err(|e| FieldError::FitFailure(format!("posterior factorization failed: {e}")))?;
        let l_inv = l.solve_triangular(&Array2::eye(asm.p), UPLO::Lower)?;
        let cov = l_inv.t().dot(&l_inv);
        let mean = cov.dot(&asm.b0.mapv(|v| v * tau));

        let mut lin_mean = Array1::zeros(asm.rows.len());
        let mut lin_sd = Array1::zeros(asm.rows.len());
        for (r, row) in asm.rows.iter().enumerate() {
            let mut mu = F::zero();
            let mut var = F::zero();
            for &(ci, vi) in row {
                mu = mu + vi * mean[ci];
                for &(cj, vj) in row {
                    var = var + vi * vj * cov[[ci, cj]];
                }
            }
            lin_mean[r] = mu;
            // Clamp tiny negative round-off
            lin_sd[r] = var.max(F::zero()).sqrt();
        }

        let mut names = vec!["(Intercept)".to_string()];
        names.extend(stack.covariate_names().iter().cloned());
        let fixed = names
            .into_iter()
            .enumerate()
            .map(|(j, name)| {
                FixedEffectSummary::from_moments(name, mean[j], cov[[j, j]].max(F::zero()).sqrt())
            })
            .collect();

        let internal_sd = match &self.hyper_tuning {
            HyperTuning::Fixed(_) => [F::zero(); 4],
            HyperTuning::Optimized { .. } if self.hyper_sd => {
                self.laplace_sd(&asm, priors, &z_opt)
            }
            HyperTuning::Optimized { .. } => [F::nan(); 4],
        };
        let hyper_names = [
            "Precision for Gaussian observations",
            "Practical range for field",
            "Stdev for field",
            "AR(1) correlation for time",
        ];
        let hyperparameters = (0..4)
            .map(|i| {
                HyperparameterSummary::from_internal(
                    hyper_names[i].to_string(),
                    z_opt[i],
                    internal_sd[i],
                    HYPER_LINKS[i],
                )
            })
            .collect();

        let log_marginal = self
            .log_marginal(&asm, &theta)
            .map_err(|e| FieldError::FitFailure(format!("evidence computation failed: {e}")))?;

        Ok(Posterior {
            fixed,
            hyperparameters,
            linear: LinearPredictor::new(lin_mean, lin_sd),
            log_marginal,
        })
    }
}

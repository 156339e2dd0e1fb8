//! Station-level k-fold cross-validation of a field model.
//!
//! For each fold the evaluator splits the observations by station fold,
//! assembles a stacked model input whose prediction block is the held-out
//! subset, fits the engine, reads the linear predictor back at the held-out
//! rows and scores them. Folds are independent; the fold assignment is
//! computed once before any dispatch and the aggregation is a deterministic
//! reduction in fold order, so the sequential and parallel paths report
//! identical results.

use crate::assemble::stack_observations;
use crate::dataset::{Observation, OzoneTable, ResponseTransform};
use crate::errors::{EvalError, Result};
use crate::folds::FoldAssignment;
use crate::metrics::Metrics;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smogcast_field::{
    Ar1Prior, InferenceEngine, Likelihood, ModelPriors, RangePrior, StdevPrior,
};
use smogcast_mesh::MeshParams;
use std::fmt;
use std::path::Path;
use std::time::Instant;

/// Default number of folds
pub const CV_DEFAULT_FOLDS: usize = 5;
/// Default fold assignment seed
pub const CV_DEFAULT_SEED: u64 = 23;

/// Cross-validation configuration.
///
/// Prior settings are `(threshold, probability)` pairs in the
/// penalized-complexity sense; see the field crate's prior types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvConfig {
    n_folds: usize,
    seed: u64,
    mesh: MeshParams<f64>,
    range_prior: (f64, f64),
    stdev_prior: (f64, f64),
    ar1_prior: (f64, f64),
    transform: ResponseTransform,
    n_time: Option<usize>,
    likelihood: Likelihood,
    parallel: bool,
}

impl Default for CvConfig {
    fn default() -> Self {
        CvConfig {
            n_folds: CV_DEFAULT_FOLDS,
            seed: CV_DEFAULT_SEED,
            mesh: MeshParams::default(),
            range_prior: (0.5, 0.5),
            stdev_prior: (1.0, 0.01),
            ar1_prior: (0.8, 0.9),
            transform: ResponseTransform::Sqrt,
            n_time: None,
            likelihood: Likelihood::Gaussian,
            parallel: false,
        }
    }
}

impl CvConfig {
    /// Set the number of folds.
    pub fn n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    /// Set the fold assignment seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the mesh discretization parameters.
    pub fn mesh(mut self, mesh: MeshParams<f64>) -> Self {
        self.mesh = mesh;
        self
    }

    /// Set the (threshold, probability) PC prior on the spatial range.
    pub fn range_prior(mut self, threshold: f64, probability: f64) -> Self {
        self.range_prior = (threshold, probability);
        self
    }

    /// Set the (threshold, probability) PC prior on the field stdev.
    pub fn stdev_prior(mut self, threshold: f64, probability: f64) -> Self {
        self.stdev_prior = (threshold, probability);
        self
    }

    /// Set the (threshold, probability) PC prior on the AR(1) correlation.
    pub fn ar1_prior(mut self, threshold: f64, probability: f64) -> Self {
        self.ar1_prior = (threshold, probability);
        self
    }

    /// Set the response transform.
    pub fn transform(mut self, transform: ResponseTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Set the number of time points retained from the table.
    pub fn n_time(mut self, n_time: Option<usize>) -> Self {
        self.n_time = n_time;
        self
    }

    /// Set the observation likelihood family.
    pub fn likelihood(mut self, likelihood: Likelihood) -> Self {
        self.likelihood = likelihood;
        self
    }

    /// Dispatch folds on the rayon pool instead of running them in sequence.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn get_n_folds(&self) -> usize {
        self.n_folds
    }

    pub fn get_seed(&self) -> u64 {
        self.seed
    }

    pub fn get_mesh(&self) -> &MeshParams<f64> {
        &self.mesh
    }

    pub fn get_transform(&self) -> ResponseTransform {
        self.transform
    }

    pub fn get_n_time(&self) -> Option<usize> {
        self.n_time
    }

    /// Build the validated prior specification
    pub fn model_priors(&self) -> Result<ModelPriors<f64>> {
        Ok(ModelPriors {
            range: RangePrior::new(self.range_prior.0, self.range_prior.1)
                .map_err(EvalError::from)?,
            stdev: StdevPrior::new(self.stdev_prior.0, self.stdev_prior.1)
                .map_err(EvalError::from)?,
            ar1: Ar1Prior::new(self.ar1_prior.0, self.ar1_prior.1).map_err(EvalError::from)?,
            likelihood: self.likelihood,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.n_folds < 2 {
            return Err(EvalError::InvalidValue(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.n_folds
            )));
        }
        self.mesh.validate()?;
        self.model_priors()?;
        Ok(())
    }
}

/// Outcome of one fold: metrics, or the error that stopped it
#[derive(Debug, Clone, Serialize)]
pub struct FoldScore {
    pub fold: usize,
    pub metrics: Option<Metrics>,
    pub error: Option<String>,
}

/// The cross-validation report
#[derive(Debug, Clone, Serialize)]
pub struct CvReport {
    pub folds: Vec<FoldScore>,
    /// Arithmetic mean over succeeded folds; NaN metrics propagate
    pub aggregate: Metrics,
    pub n_succeeded: usize,
    pub n_failed: usize,
}

impl CvReport {
    /// Save the report as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

impl fmt::Display for CvReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{:>5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
            "fold", "rmse", "mae", "bias", "r", "r2", "pairs"
        )?;
        for score in &self.folds {
            match (&score.metrics, &score.error) {
                (Some(m), _) => writeln!(
                    f,
                    "{:>5} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>6}",
                    score.fold, m.rmse, m.mae, m.bias, m.r, m.r2, m.n_pairs
                )?,
                (None, Some(e)) => writeln!(f, "{:>5} failed: {e}", score.fold)?,
                (None, None) => writeln!(f, "{:>5} failed", score.fold)?,
            }
        }
        let a = &self.aggregate;
        writeln!(
            f,
            "{:>5} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>6}",
            "mean", a.rmse, a.mae, a.bias, a.r, a.r2, a.n_pairs
        )?;
        write!(
            f,
            "{} folds succeeded, {} failed",
            self.n_succeeded, self.n_failed
        )
    }
}

/// The cross-validation evaluator
pub struct CrossValidator {
    config: CvConfig,
}

impl CrossValidator {
    pub fn new(config: CvConfig) -> Result<Self> {
        config.validate()?;
        Ok(CrossValidator { config })
    }

    pub fn config(&self) -> &CvConfig {
        &self.config
    }

    /// The station fold assignment this configuration induces on a table
    pub fn fold_assignment(&self, table: &OzoneTable) -> Result<FoldAssignment> {
        FoldAssignment::assign_seeded(table.stations(), self.config.n_folds, self.config.seed)
    }

    /// Run the full cross-validation with the given engine.
    ///
    /// Folds whose mesh or fit fails are excluded from the aggregate and
    /// reported with their error; a run where every fold fails is an error.
    pub fn run<E: InferenceEngine<f64> + Sync>(
        &self,
        table: &OzoneTable,
        engine: &E,
    ) -> Result<CvReport> {
        let cfg = &self.config;
        let assignment = self.fold_assignment(table)?;
        let obs_folds = assignment.observation_folds(table.observations())?;
        let priors = cfg.model_priors()?;
        let n_groups = table.n_time();

        let run_fold = |fold: usize| -> std::result::Result<Metrics, String> {
            let start = Instant::now();
            let mut estimation: Vec<&Observation> = Vec::new();
            let mut validation: Vec<&Observation> = Vec::new();
            for (obs, &obs_fold) in table.observations().iter().zip(&obs_folds) {
                if obs_fold == fold {
                    validation.push(obs);
                } else {
                    estimation.push(obs);
                }
            }
            if validation.is_empty() {
                return Err("validation subset is empty".to_string());
            }
            let stack = stack_observations(&cfg.mesh, n_groups, &estimation, &validation)
                .map_err(|e| e.to_string())?;
            let posterior = engine.fit(&stack, &priors).map_err(|e| e.to_string())?;
            let predicted = posterior
                .linear_predictor()
                .mean_of(stack.prediction_rows())
                .to_vec();
            let observed: Vec<f64> = validation
                .iter()
                .map(|o| o.response.unwrap_or(f64::NAN))
                .collect();
            let metrics = Metrics::compute(&predicted, &observed);
            info!(
                "fold {fold}: {} validation rows scored in {:.1?}",
                validation.len(),
                start.elapsed()
            );
            Ok(metrics)
        };

        let outcomes: Vec<(usize, std::result::Result<Metrics, String>)> = if cfg.parallel {
            (1..=cfg.n_folds)
                .into_par_iter()
                .map(|fold| (fold, run_fold(fold)))
                .collect()
        } else {
            (1..=cfg.n_folds).map(|fold| (fold, run_fold(fold))).collect()
        };

        let mut folds = Vec::with_capacity(cfg.n_folds);
        let mut succeeded = Vec::new();
        for (fold, outcome) in outcomes {
            match outcome {
                Ok(metrics) => {
                    succeeded.push(metrics);
                    folds.push(FoldScore {
                        fold,
                        metrics: Some(metrics),
                        error: None,
                    });
                }
                Err(error) => {
                    warn!("fold {fold} failed: {error}");
                    folds.push(FoldScore {
                        fold,
                        metrics: None,
                        error: Some(error),
                    });
                }
            }
        }
        if succeeded.is_empty() {
            return Err(EvalError::AllFoldsFailed(cfg.n_folds));
        }
        let aggregate = Metrics::aggregate(&succeeded);
        Ok(CvReport {
            n_succeeded: succeeded.len(),
            n_failed: folds.len() - succeeded.len(),
            folds,
            aggregate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::StationDay;
    use approx::assert_abs_diff_eq;
    use smogcast_field::{
        FieldError, LinearPredictor, ModelPriors, Posterior, Stack,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic stand-in for the real engine: the linear predictor is a
    /// fixed function of covariates and time group
    struct MockEngine;

    impl InferenceEngine<f64> for MockEngine {
        fn fit(
            &self,
            stack: &Stack<f64>,
            _priors: &ModelPriors<f64>,
        ) -> smogcast_field::Result<Posterior<f64>> {
            let mut mean = Vec::with_capacity(stack.n_rows());
            for block in [stack.estimation(), stack.prediction()] {
                for i in 0..block.len() {
                    let covs = block.covariates().row(i);
                    let g = block.time_groups()[i] as f64;
                    mean.push(covs.sum() * 0.05 + 0.1 * g);
                }
            }
            let n = mean.len();
            Ok(Posterior::new(
                vec![],
                vec![],
                LinearPredictor::new(mean.into(), ndarray::Array1::from_elem(n, 0.1)),
                0.,
            ))
        }
    }

    /// Fails on one call index, delegating to [MockEngine] otherwise
    struct FlakyEngine {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl FlakyEngine {
        fn failing_on(call: usize) -> Self {
            FlakyEngine {
                calls: AtomicUsize::new(0),
                fail_on: Some(call),
            }
        }

        fn always_failing() -> Self {
            FlakyEngine {
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    impl InferenceEngine<f64> for FlakyEngine {
        fn fit(
            &self,
            stack: &Stack<f64>,
            priors: &ModelPriors<f64>,
        ) -> smogcast_field::Result<Posterior<f64>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_on {
                Some(fail) if call != fail => MockEngine.fit(stack, priors),
                _ => Err(FieldError::FitFailure("synthetic divergence".to_string())),
            }
        }
    }

    fn table(missing_station: Option<&str>) -> OzoneTable {
        let stations = [
            ("A", -78.0, 42.0),
            ("B", -76.0, 43.0),
            ("C", -74.0, 41.5),
            ("D", -73.5, 42.7),
        ];
        let mut records = Vec::new();
        for &(name, lon, lat) in &stations {
            for day in 1u32..=3 {
                let missing = Some(name) == missing_station;
                records.push(StationDay {
                    station: name.to_string(),
                    lon,
                    lat,
                    year: 1995,
                    month: 7,
                    day,
                    y8hrmax: if missing {
                        None
                    } else {
                        Some(40. + lon.abs() + day as f64)
                    },
                    tmax: 80. + day as f64,
                    wdsp: 4.,
                    rh: 0.6,
                });
            }
        }
        OzoneTable::from_records(records, ResponseTransform::Sqrt, None).unwrap()
    }

    fn config(n_folds: usize) -> CvConfig {
        CvConfig::default()
            .n_folds(n_folds)
            .mesh(MeshParams::new(1.5, 0.05, 6.0))
    }

    #[test]
    fn test_partition_completeness() {
        let table = table(None);
        let cv = CrossValidator::new(config(4)).unwrap();
        let assignment = cv.fold_assignment(&table).unwrap();
        let obs_folds = assignment.observation_folds(table.observations()).unwrap();
        // Every observation lands in exactly one validation subset
        let total: usize = (1..=4)
            .map(|f| obs_folds.iter().filter(|&&g| g == f).count())
            .sum();
        assert_eq!(total, table.observations().len());
        // Station integrity: one fold per station across its observations
        for s in table.stations() {
            let folds: Vec<usize> = table
                .observations()
                .iter()
                .zip(&obs_folds)
                .filter(|(o, _)| &o.station == s)
                .map(|(_, &f)| f)
                .collect();
            assert!(folds.windows(2).all(|w| w[0] == w[1]));
        }
    }

    #[test]
    fn test_cv_is_idempotent() {
        let table = table(None);
        let cv = CrossValidator::new(config(2)).unwrap();
        let one = cv.run(&table, &MockEngine).unwrap();
        let two = cv.run(&table, &MockEngine).unwrap();
        assert_eq!(one.n_succeeded, two.n_succeeded);
        for (a, b) in one.folds.iter().zip(&two.folds) {
            let (ma, mb) = (a.metrics.unwrap(), b.metrics.unwrap());
            assert_eq!(ma, mb);
        }
        assert_eq!(one.aggregate, two.aggregate);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let table = table(None);
        let sequential = CrossValidator::new(config(2)).unwrap();
        let parallel = CrossValidator::new(config(2).parallel(true)).unwrap();
        let a = sequential.run(&table, &MockEngine).unwrap();
        let b = parallel.run(&table, &MockEngine).unwrap();
        assert_eq!(a.aggregate, b.aggregate);
        for (x, y) in a.folds.iter().zip(&b.folds) {
            assert_eq!(x.fold, y.fold);
            assert_eq!(x.metrics, y.metrics);
        }
    }

    #[test]
    fn test_failed_fold_is_excluded_and_reported() {
        let table = table(None);
        let cv = CrossValidator::new(config(4)).unwrap();
        let engine = FlakyEngine::failing_on(1);
        let report = cv.run(&table, &engine).unwrap();
        assert_eq!(report.n_succeeded, 3);
        assert_eq!(report.n_failed, 1);
        let failed: Vec<&FoldScore> =
            report.folds.iter().filter(|f| f.error.is_some()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].fold, 2);
        assert!(failed[0].error.as_ref().unwrap().contains("divergence"));
        assert!(report.aggregate.rmse.is_finite());
    }

    #[test]
    fn test_all_folds_failed_is_an_error() {
        let table = table(None);
        let cv = CrossValidator::new(config(2)).unwrap();
        let err = cv.run(&table, &FlakyEngine::always_failing()).unwrap_err();
        assert!(matches!(err, EvalError::AllFoldsFailed(2)));
    }

    #[test]
    fn test_all_missing_validation_fold_propagates_nan() {
        let table = table(Some("D"));
        let cv = CrossValidator::new(config(4)).unwrap();
        let report = cv.run(&table, &MockEngine).unwrap();
        // Every fit succeeds; the fold validating station D has no complete
        // pairs, its metrics are NaN and the mean stays NaN
        assert_eq!(report.n_succeeded, 4);
        let empty: Vec<&FoldScore> = report
            .folds
            .iter()
            .filter(|f| f.metrics.map(|m| m.n_pairs) == Some(0))
            .collect();
        assert_eq!(empty.len(), 1);
        assert!(report.aggregate.rmse.is_nan());
    }

    #[test]
    fn test_report_renders_three_decimals() {
        let report = CvReport {
            folds: vec![FoldScore {
                fold: 1,
                metrics: Some(Metrics::compute(&[2., 3., 4.], &[1., 3., 6.])),
                error: None,
            }],
            aggregate: Metrics::compute(&[2., 3., 4.], &[1., 3., 6.]),
            n_succeeded: 1,
            n_failed: 0,
        };
        let text = format!("{report}");
        assert!(text.contains("1.291"), "rmse rounded to 3 decimals: {text}");
        assert!(text.contains("1 folds succeeded"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(CrossValidator::new(CvConfig::default().n_folds(1)).is_err());
        assert!(CrossValidator::new(
            CvConfig::default().mesh(MeshParams::new(0., 0., 1.))
        )
        .is_err());
        assert!(CrossValidator::new(CvConfig::default().range_prior(0.5, 1.5)).is_err());
    }

    #[test]
    fn test_mock_metrics_value() {
        // The mock engine is deterministic, so a fold's metrics are a pure
        // function of the split; spot-check a self-consistent quantity
        let table = table(None);
        let cv = CrossValidator::new(config(2)).unwrap();
        let report = cv.run(&table, &MockEngine).unwrap();
        for score in &report.folds {
            let m = score.metrics.unwrap();
            assert!(m.n_pairs > 0);
            assert!(m.rmse >= 0.);
            assert_abs_diff_eq!(m.r2, m.r * m.r, epsilon = 1e-12);
        }
    }
}

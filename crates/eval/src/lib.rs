//! This library implements the evaluation pipeline for Bayesian
//! spatio-temporal ozone field models: typed loading of the station and grid
//! tables, deterministic station-level fold assignment, k-fold
//! cross-validation against any [InferenceEngine](smogcast_field::InferenceEngine)
//! backend, error metrics over pairwise-complete pairs and single-pass grid
//! surface prediction.
//!
//! # Example
//!
//! ```no_run
//! use linfa::ParamGuard;
//! use smogcast_eval::{CrossValidator, CvConfig, OzoneTable, ResponseTransform};
//! use smogcast_field::{LatentGaussian, Matern32Corr};
//!
//! let table = OzoneTable::from_csv_path(
//!     "ozone.csv",
//!     ResponseTransform::Sqrt,
//!     Some(14),
//! ).expect("table loaded");
//! let engine: LatentGaussian<f64, Matern32Corr> = LatentGaussian::params()
//!     .n_start(2)
//!     .check()
//!     .expect("engine configured");
//! let cv = CrossValidator::new(CvConfig::default()).expect("valid config");
//! let report = cv.run(&table, &engine).expect("cross-validation");
//! println!("{report}");
//! ```
mod assemble;
mod cv;
mod dataset;
mod errors;
mod folds;
mod grid;
mod metrics;

pub use cv::*;
pub use dataset::*;
pub use errors::*;
pub use folds::*;
pub use grid::*;
pub use metrics::*;

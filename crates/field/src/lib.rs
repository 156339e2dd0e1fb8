//! This library implements latent Gaussian space-time field models over a
//! station network, the modeling layer between a spatial discretization
//! ([smogcast-mesh](smogcast_mesh)) and an evaluation pipeline.
//!
//! The field lives on the vertices of a [TriangleMesh](smogcast_mesh::TriangleMesh),
//! replicated per time group and coupled across groups by an AR(1)
//! dependence. Hyperparameters carry penalized-complexity priors specified as
//! `(threshold, probability)` statements. A model input is a [Stack] of an
//! estimation block and a prediction block sharing one [FieldIndex]; fitting
//! goes through the [InferenceEngine] trait whose default backend is
//! [LatentGaussian].
mod correlation;
mod engine;
mod errors;
mod optimization;
mod posterior;
mod priors;
mod stack;
mod temporal;

pub use correlation::*;
pub use engine::*;
pub use errors::*;
pub use posterior::*;
pub use priors::*;
pub use stack::*;
pub use temporal::*;

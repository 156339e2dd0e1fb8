use smogcast_mesh::MeshError;
use thiserror::Error;

/// A result type for latent field modeling
pub type Result<T> = std::result::Result<T, FieldError>;

/// An error when assembling or fitting a latent Gaussian field model
#[derive(Error, Debug)]
pub enum FieldError {
    /// When the spatial discretization fails
    #[error(transparent)]
    MeshError(#[from] MeshError),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When the engine cannot produce a fit
    #[error("Fit failure: {0}")]
    FitFailure(String),
    /// When a value is invalid
    #[error("Value error: {0}")]
    InvalidValue(String),
}

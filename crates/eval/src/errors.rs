use smogcast_field::FieldError;
use smogcast_mesh::MeshError;
use thiserror::Error;

/// A result type for the evaluation pipeline
pub type Result<T> = std::result::Result<T, EvalError>;

/// An error when loading data, cross-validating or predicting on a grid
#[derive(Error, Debug)]
pub enum EvalError {
    /// When the field model fails
    #[error(transparent)]
    FieldError(#[from] FieldError),
    /// When the spatial discretization fails
    #[error(transparent)]
    MeshError(#[from] MeshError),
    /// When reading tabular input fails
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    /// When IO fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    /// When report serialization fails
    #[error("Save error: {0}")]
    SaveError(#[from] serde_json::Error),
    /// When a value is invalid
    #[error("Value error: {0}")]
    InvalidValue(String),
    /// When every cross-validation fold failed
    #[error("all {0} folds failed")]
    AllFoldsFailed(usize),
}

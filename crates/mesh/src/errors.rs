use thiserror::Error;

/// A result type for mesh construction and projection
pub type Result<T> = std::result::Result<T, MeshError>;

/// An error raised when discretizing a station network
#[derive(Error, Debug)]
pub enum MeshError {
    /// When a parameter value is invalid
    #[error("Value error: {0}")]
    InvalidValue(String),
    /// When the training coordinates cannot support a triangulation
    #[error("Insufficient spatial support: {0}")]
    InsufficientSupport(String),
    /// When a queried point falls outside the meshed extent
    #[error("Point {index} at ({x}, {y}) falls outside the meshed extent")]
    PointOutsideMesh { index: usize, x: f64, y: f64 },
}

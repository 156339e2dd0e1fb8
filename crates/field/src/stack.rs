//! Space-time basis indexing and the stacked model input.
//!
//! A [Stack] bundles an estimation block (rows with observed responses) and a
//! prediction block (rows whose responses are withheld by construction) over
//! a shared [FieldIndex], so that an engine fits the latent field once and
//! reads posterior linear predictors for every row, held-out rows included.

use crate::errors::{FieldError, Result};
use linfa::Float;
use ndarray::Array2;
use smogcast_mesh::Projection;

/// Enumeration of the (vertex, time group) basis functions of the field.
///
/// Basis (v, g) occupies column `v + n_vertices * g` of the field design.
#[derive(Debug, Clone)]
pub struct FieldIndex<F: Float> {
    /// Lattice vertex coordinates as a (n_vertices, 2) array
    vertex_coords: Array2<F>,
    /// Number of time groups the field is replicated over
    n_groups: usize,
}

impl<F: Float> FieldIndex<F> {
    pub fn new(vertex_coords: Array2<F>, n_groups: usize) -> Result<Self> {
        if vertex_coords.ncols() != 2 {
            return Err(FieldError::InvalidValue(format!(
                "vertex coordinates should have 2 columns, got {}",
                vertex_coords.ncols()
            )));
        }
        if n_groups == 0 {
            return Err(FieldError::InvalidValue(
                "field needs at least one time group".to_string(),
            ));
        }
        Ok(FieldIndex {
            vertex_coords,
            n_groups,
        })
    }

    pub fn n_vertices(&self) -> usize {
        self.vertex_coords.nrows()
    }

    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    /// Total number of basis functions
    pub fn len(&self) -> usize {
        self.n_vertices() * self.n_groups
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Design column of basis function (vertex, group)
    pub fn column(&self, vertex: usize, group: usize) -> usize {
        debug_assert!(vertex < self.n_vertices() && group < self.n_groups);
        vertex + self.n_vertices() * group
    }

    pub fn vertex_coords(&self) -> &Array2<F> {
        &self.vertex_coords
    }
}

/// One block of stacked rows sharing a response availability status
#[derive(Debug, Clone)]
pub struct Block<F: Float> {
    /// Response per row; `None` marks a missing value
    response: Vec<Option<F>>,
    /// Covariate values as a (n, n_covariates) array
    covariates: Array2<F>,
    /// Spatial projection rows onto the lattice
    projection: Projection<F>,
    /// Time group of each row, 0-based
    time_groups: Vec<usize>,
}

impl<F: Float> Block<F> {
    pub fn new(
        response: Vec<Option<F>>,
        covariates: Array2<F>,
        projection: Projection<F>,
        time_groups: Vec<usize>,
    ) -> Result<Self> {
        let n = response.len();
        if covariates.nrows() != n || projection.len() != n || time_groups.len() != n {
            return Err(FieldError::InvalidValue(format!(
                "block rows disagree: {} responses, {} covariate rows, {} projection rows, {} time groups",
                n,
                covariates.nrows(),
                projection.len(),
                time_groups.len()
            )));
        }
        Ok(Block {
            response,
            covariates,
            projection,
            time_groups,
        })
    }

    /// A block whose responses are all withheld (prediction side)
    pub fn unobserved(
        covariates: Array2<F>,
        projection: Projection<F>,
        time_groups: Vec<usize>,
    ) -> Result<Self> {
        let n = covariates.nrows();
        Block::new(vec![None; n], covariates, projection, time_groups)
    }

    pub fn len(&self) -> usize {
        self.response.len()
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    pub fn response(&self) -> &[Option<F>] {
        &self.response
    }

    pub fn covariates(&self) -> &Array2<F> {
        &self.covariates
    }

    pub fn projection(&self) -> &Projection<F> {
        &self.projection
    }

    pub fn time_groups(&self) -> &[usize] {
        &self.time_groups
    }
}

/// The combined model input submitted to an inference engine.
///
/// Row order is estimation block first, prediction block second; the block
/// row ranges are exposed so posterior quantities can be read back per block.
#[derive(Debug, Clone)]
pub struct Stack<F: Float> {
    estimation: Block<F>,
    prediction: Block<F>,
    field: FieldIndex<F>,
    covariate_names: Vec<String>,
}

impl<F: Float> Stack<F> {
    pub fn new(
        estimation: Block<F>,
        prediction: Block<F>,
        field: FieldIndex<F>,
        covariate_names: Vec<String>,
    ) -> Result<Self> {
        for (what, block) in [("estimation", &estimation), ("prediction", &prediction)] {
            if block.covariates().ncols() != covariate_names.len() {
                return Err(FieldError::InvalidValue(format!(
                    "{} block has {} covariate columns for {} names",
                    what,
                    block.covariates().ncols(),
                    covariate_names.len()
                )));
            }
            if block.projection().n_vertices() != field.n_vertices() {
                return Err(FieldError::InvalidValue(format!(
                    "{} block was projected on {} vertices, field has {}",
                    what,
                    block.projection().n_vertices(),
                    field.n_vertices()
                )));
            }
            if let Some(&g) = block.time_groups().iter().find(|&&g| g >= field.n_groups()) {
                return Err(FieldError::InvalidValue(format!(
                    "{what} block refers to time group {g}, field has {}",
                    field.n_groups()
                )));
            }
        }
        // Held-out responses must never reach the engine through the
        // prediction block
        if prediction.response().iter().any(|r| r.is_some()) {
            return Err(FieldError::InvalidValue(
                "prediction block must not carry response values".to_string(),
            ));
        }
        Ok(Stack {
            estimation,
            prediction,
            field,
            covariate_names,
        })
    }

    pub fn estimation(&self) -> &Block<F> {
        &self.estimation
    }

    pub fn prediction(&self) -> &Block<F> {
        &self.prediction
    }

    pub fn field(&self) -> &FieldIndex<F> {
        &self.field
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    /// Total number of stacked rows
    pub fn n_rows(&self) -> usize {
        self.estimation.len() + self.prediction.len()
    }

    /// Number of fixed effects: intercept plus covariates
    pub fn n_fixed(&self) -> usize {
        1 + self.covariate_names.len()
    }

    /// Row range of the estimation block in stacked order
    pub fn estimation_rows(&self) -> std::ops::Range<usize> {
        0..self.estimation.len()
    }

    /// Row range of the prediction block in stacked order
    pub fn prediction_rows(&self) -> std::ops::Range<usize> {
        self.estimation.len()..self.n_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use smogcast_mesh::{MeshParams, TriangleMesh};

    fn small_mesh() -> TriangleMesh<f64> {
        let coords = array![[0., 0.], [2., 0.], [0., 2.], [2., 2.]];
        TriangleMesh::build(&coords, &MeshParams::new(1.5, 0., 0.5)).expect("mesh built")
    }

    fn small_stack() -> Stack<f64> {
        let mesh = small_mesh();
        let est_pts = array![[0.5, 0.5], [1.5, 1.5], [1.0, 0.2]];
        let pred_pts = array![[0.2, 1.8]];
        let field = FieldIndex::new(mesh.vertex_coords().to_owned(), 2).unwrap();
        let est = Block::new(
            vec![Some(1.0), None, Some(0.5)],
            array![[0.1], [0.2], [0.3]],
            mesh.project(&est_pts).unwrap(),
            vec![0, 1, 1],
        )
        .unwrap();
        let pred = Block::unobserved(
            array![[0.4]],
            mesh.project(&pred_pts).unwrap(),
            vec![0],
        )
        .unwrap();
        Stack::new(est, pred, field, vec!["tmax".to_string()]).unwrap()
    }

    #[test]
    fn test_block_ranges() {
        let stack = small_stack();
        assert_eq!(stack.n_rows(), 4);
        assert_eq!(stack.estimation_rows(), 0..3);
        assert_eq!(stack.prediction_rows(), 3..4);
        assert_eq!(stack.n_fixed(), 2);
    }

    #[test]
    fn test_field_index_columns() {
        let mesh = small_mesh();
        let nv = mesh.n_vertices();
        let field = FieldIndex::new(mesh.vertex_coords().to_owned(), 3).unwrap();
        assert_eq!(field.len(), nv * 3);
        assert_eq!(field.column(0, 0), 0);
        assert_eq!(field.column(2, 1), 2 + nv);
    }

    #[test]
    fn test_prediction_responses_are_rejected() {
        let mesh = small_mesh();
        let pts = array![[0.5, 0.5]];
        let field = FieldIndex::new(mesh.vertex_coords().to_owned(), 1).unwrap();
        let est = Block::new(
            vec![Some(1.0)],
            array![[0.1]],
            mesh.project(&pts).unwrap(),
            vec![0],
        )
        .unwrap();
        let leaky = Block::new(
            vec![Some(2.0)],
            array![[0.1]],
            mesh.project(&pts).unwrap(),
            vec![0],
        )
        .unwrap();
        let err = Stack::new(est, leaky, field, vec!["tmax".to_string()]).unwrap_err();
        assert!(matches!(err, FieldError::InvalidValue(_)));
    }

    #[test]
    fn test_mismatched_dimensions_are_rejected() {
        let mesh = small_mesh();
        let pts = array![[0.5, 0.5], [1.0, 1.0]];
        let proj = mesh.project(&pts).unwrap();
        let err = Block::new(vec![Some(1.0)], array![[0.1], [0.2]], proj, vec![0, 0]).unwrap_err();
        assert!(matches!(err, FieldError::InvalidValue(_)));
    }
}

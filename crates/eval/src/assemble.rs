//! Model input assembly: from typed records to a stacked engine input.
//!
//! The mesh is built from the estimation-side coordinates only and reused
//! for the prediction-side projection, so held-out locations influence which
//! triangle they fall into but never the vertex set.

use crate::dataset::{GridPoint, Observation, COVARIATE_NAMES};
use crate::errors::Result;
use log::debug;
use ndarray::Array2;
use smogcast_field::{Block, FieldIndex, Stack};
use smogcast_mesh::{MeshParams, TriangleMesh};

fn coords_of(observations: &[&Observation]) -> Array2<f64> {
    Array2::from_shape_fn((observations.len(), 2), |(i, j)| {
        if j == 0 {
            observations[i].lon
        } else {
            observations[i].lat
        }
    })
}

fn covariates_of(observations: &[&Observation]) -> Array2<f64> {
    Array2::from_shape_fn((observations.len(), 3), |(i, j)| {
        observations[i].covariates[j]
    })
}

/// Build the stacked model input for an estimation subset and a held-out
/// prediction subset of observations.
pub(crate) fn stack_observations(
    mesh_params: &MeshParams<f64>,
    n_groups: usize,
    estimation: &[&Observation],
    prediction: &[&Observation],
) -> Result<Stack<f64>> {
    let mesh = TriangleMesh::build(&coords_of(estimation), mesh_params)?;
    debug!(
        "stacking {} estimation and {} prediction rows on {} vertices",
        estimation.len(),
        prediction.len(),
        mesh.n_vertices()
    );
    let est = Block::new(
        estimation.iter().map(|o| o.response).collect(),
        covariates_of(estimation),
        mesh.project(&coords_of(estimation))?,
        estimation.iter().map(|o| o.time_index - 1).collect(),
    )?;
    let pred = Block::unobserved(
        covariates_of(prediction),
        mesh.project(&coords_of(prediction))?,
        prediction.iter().map(|o| o.time_index - 1).collect(),
    )?;
    let field = FieldIndex::new(mesh.vertex_coords().to_owned(), n_groups)?;
    let names = COVARIATE_NAMES.iter().map(|s| s.to_string()).collect();
    Ok(Stack::new(est, pred, field, names)?)
}

/// Build the stacked model input for the full observation set and a grid
/// time slice.
pub(crate) fn stack_grid(
    mesh_params: &MeshParams<f64>,
    n_groups: usize,
    estimation: &[&Observation],
    grid_slice: &[&GridPoint],
) -> Result<Stack<f64>> {
    let mesh = TriangleMesh::build(&coords_of(estimation), mesh_params)?;
    let est = Block::new(
        estimation.iter().map(|o| o.response).collect(),
        covariates_of(estimation),
        mesh.project(&coords_of(estimation))?,
        estimation.iter().map(|o| o.time_index - 1).collect(),
    )?;
    let grid_coords = Array2::from_shape_fn((grid_slice.len(), 2), |(i, j)| {
        if j == 0 {
            grid_slice[i].lon
        } else {
            grid_slice[i].lat
        }
    });
    let grid_covs = Array2::from_shape_fn((grid_slice.len(), 3), |(i, j)| {
        grid_slice[i].covariates[j]
    });
    let pred = Block::unobserved(
        grid_covs,
        mesh.project(&grid_coords)?,
        grid_slice.iter().map(|p| p.time_index - 1).collect(),
    )?;
    let field = FieldIndex::new(mesh.vertex_coords().to_owned(), n_groups)?;
    let names = COVARIATE_NAMES.iter().map(|s| s.to_string()).collect();
    Ok(Stack::new(est, pred, field, names)?)
}

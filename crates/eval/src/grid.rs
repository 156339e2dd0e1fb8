//! Continuous-surface prediction on a spatial grid at one time slice.
//!
//! The whole observation table is the estimation block; the prediction block
//! is the grid restricted to the configured time slice. The output surface
//! carries the posterior mean and sd of the linear predictor per grid point,
//! on the transformed response scale, ready for an external renderer.

use crate::assemble::stack_grid;
use crate::dataset::{GridTable, Observation, OzoneTable};
use crate::errors::{EvalError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use smogcast_field::InferenceEngine;
use std::io::Write;
use std::path::Path;

use crate::cv::CvConfig;

/// Grid prediction configuration: the shared model settings plus the
/// predicted time slice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    model: CvConfig,
    time_slice: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            model: CvConfig::default(),
            time_slice: 1,
        }
    }
}

impl GridConfig {
    /// Set the shared model settings (mesh, priors, transform).
    pub fn model(mut self, model: CvConfig) -> Self {
        self.model = model;
        self
    }

    /// Set the predicted time slice, 1-based.
    pub fn time_slice(mut self, time_slice: usize) -> Self {
        self.time_slice = time_slice;
        self
    }

    pub fn get_time_slice(&self) -> usize {
        self.time_slice
    }

    pub fn get_model(&self) -> &CvConfig {
        &self.model
    }
}

/// Posterior summary at one grid point
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GridCell {
    pub lon: f64,
    pub lat: f64,
    pub mean: f64,
    pub sd: f64,
}

/// The predicted surface at one time slice
#[derive(Debug, Clone, Serialize)]
pub struct GridSurface {
    pub time_slice: usize,
    pub cells: Vec<GridCell>,
}

impl GridSurface {
    /// Write the surface as CSV for the rendering collaborator
    pub fn to_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        for cell in &self.cells {
            csv.serialize(cell)?;
        }
        csv.flush()?;
        Ok(())
    }
}

/// The grid prediction driver
pub struct GridPredictor {
    config: GridConfig,
}

impl GridPredictor {
    pub fn new(config: GridConfig) -> Result<Self> {
        if config.time_slice == 0 {
            return Err(EvalError::InvalidValue(
                "time slice is 1-based, got 0".to_string(),
            ));
        }
        Ok(GridPredictor { config })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Fit on the full table and predict the grid at the configured slice
    pub fn run<E: InferenceEngine<f64> + Sync>(
        &self,
        table: &OzoneTable,
        grid: &GridTable,
        engine: &E,
    ) -> Result<GridSurface> {
        let slice = self.config.time_slice;
        if slice > table.n_time() {
            return Err(EvalError::InvalidValue(format!(
                "time slice {slice} exceeds the {} time points of the table",
                table.n_time()
            )));
        }
        let points = grid.slice(slice);
        if points.is_empty() {
            return Err(EvalError::InvalidValue(format!(
                "grid has no points at time slice {slice}"
            )));
        }
        let estimation: Vec<&Observation> = table.observations().iter().collect();
        let model = self.config.get_model();
        let stack = stack_grid(model.get_mesh(), table.n_time(), &estimation, &points)?;
        let priors = model.model_priors()?;
        let posterior = engine.fit(&stack, &priors)?;
        let mean = posterior.linear_predictor().mean_of(stack.prediction_rows());
        let sd = posterior.linear_predictor().sd_of(stack.prediction_rows());
        info!(
            "grid surface at slice {slice}: {} points from {} observations",
            points.len(),
            estimation.len()
        );
        let cells = points
            .iter()
            .enumerate()
            .map(|(i, p)| GridCell {
                lon: p.lon,
                lat: p.lat,
                mean: mean[i],
                sd: sd[i],
            })
            .collect();
        Ok(GridSurface {
            time_slice: slice,
            cells,
        })
    }
}

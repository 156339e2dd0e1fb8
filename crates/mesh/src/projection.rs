use crate::errors::{MeshError, Result};
use crate::lattice::TriangleMesh;
use linfa::Float;
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};

/// One projected point: the vertex ids of its containing triangle and the
/// matching barycentric weights (non-negative, summing to one).
#[derive(Clone, Copy, Debug)]
pub struct ProjRow<F: Float> {
    pub vertices: [usize; 3],
    pub weights: [F; 3],
}

/// A sparse design matrix mapping lattice vertex values to point values.
///
/// One row per projected point, three non-zeros per row. Columns are lattice
/// vertex ids; the full space-time design is obtained by shifting the column
/// block per time group.
#[derive(Clone, Debug)]
pub struct Projection<F: Float> {
    rows: Vec<ProjRow<F>>,
    n_vertices: usize,
}

impl<F: Float> Projection<F> {
    /// Number of projected points (matrix rows)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of lattice vertices (matrix columns)
    pub fn n_vertices(&self) -> usize {
        self.n_vertices
    }

    pub fn rows(&self) -> &[ProjRow<F>] {
        &self.rows
    }

    /// Evaluate the piecewise-linear interpolant of per-vertex `values` at
    /// every projected point.
    ///
    /// **Panics** if `values` length differs from the vertex count.
    pub fn interpolate(&self, values: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        assert_eq!(
            values.len(),
            self.n_vertices,
            "values length must match the mesh vertex count"
        );
        let mut out = Array1::zeros(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            let mut acc = F::zero();
            for k in 0..3 {
                acc = acc + row.weights[k] * values[row.vertices[k]];
            }
            out[i] = acc;
        }
        out
    }
}

impl<F: Float> TriangleMesh<F> {
    /// Project points given as a (n, 2) array onto the lattice vertices.
    ///
    /// Each point is located in its containing cell in constant time; the
    /// cell's anti-diagonal decides which of its two triangles holds the
    /// point. Points outside the lattice extent are an error naming the
    /// offending row.
    pub fn project(&self, points: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Projection<F>> {
        if points.ncols() != 2 {
            return Err(MeshError::InvalidValue(format!(
                "points should have 2 columns (lon, lat), got {}",
                points.ncols()
            )));
        }
        let (n_cols, _) = self.grid_dims();
        let origin = self.origin();

        let mut rows = Vec::with_capacity(points.nrows());
        for (index, p) in points.rows().into_iter().enumerate() {
            let (x, y) = (p[0], p[1]);
            let (cx, u) = self.locate_axis(x - origin.0, self.grid_dims().0 - 1, index, x, y)?;
            let (cy, v) = self.locate_axis(y - origin.1, self.grid_dims().1 - 1, index, x, y)?;

            let v00 = cy * n_cols + cx;
            let v10 = v00 + 1;
            let v01 = v00 + n_cols;
            let v11 = v01 + 1;

            let row = if u + v <= F::one() {
                ProjRow {
                    vertices: [v00, v10, v01],
                    weights: [F::one() - u - v, u, v],
                }
            } else {
                ProjRow {
                    vertices: [v10, v11, v01],
                    weights: [F::one() - v, u + v - F::one(), F::one() - u],
                }
            };
            rows.push(row);
        }
        Ok(Projection {
            rows,
            n_vertices: self.n_vertices(),
        })
    }

    /// Locate one axis coordinate: cell index and local coordinate in [0, 1]
    fn locate_axis(
        &self,
        offset: F,
        n_cells: usize,
        index: usize,
        x: F,
        y: F,
    ) -> Result<(usize, F)> {
        let t = offset / self.spacing();
        // Tolerate boundary rounding, reject genuinely external points
        let tol = F::cast(1e-9) * F::cast(n_cells.max(1));
        if t < -tol || t > F::cast(n_cells) + tol {
            return Err(MeshError::PointOutsideMesh {
                index,
                x: x.to_f64().unwrap_or(f64::NAN),
                y: y.to_f64().unwrap_or(f64::NAN),
            });
        }
        let t = t.max(F::zero()).min(F::cast(n_cells));
        let cell = t
            .floor()
            .to_usize()
            .unwrap_or(0)
            .min(n_cells.saturating_sub(1));
        Ok((cell, t - F::cast(cell)))
    }
}

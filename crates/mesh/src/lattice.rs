use crate::errors::{MeshError, Result};
use linfa::Float;
use log::debug;
use ndarray::{Array2, ArrayBase, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Relative tolerance under which the collapsed sites are considered collinear
const COLLINEARITY_RTOL: f64 = 1e-8;

/// Discretization parameters of a [TriangleMesh].
///
/// Units are those of the input coordinates (degrees for lon/lat data).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct MeshParams<F: Float> {
    /// Maximum length of a triangle edge
    max_edge: F,
    /// Minimum separation between sites; closer sites are collapsed
    cutoff: F,
    /// Extension of the lattice beyond the site bounding box, on every side
    offset: F,
}

impl<F: Float> Default for MeshParams<F> {
    fn default() -> Self {
        MeshParams {
            max_edge: F::cast(0.75),
            cutoff: F::cast(0.05),
            offset: F::cast(1.0),
        }
    }
}

impl<F: Float> MeshParams<F> {
    pub fn new(max_edge: F, cutoff: F, offset: F) -> Self {
        MeshParams {
            max_edge,
            cutoff,
            offset,
        }
    }

    /// Set maximum triangle edge length.
    pub fn set_max_edge(mut self, max_edge: F) -> Self {
        self.max_edge = max_edge;
        self
    }

    /// Set minimum site separation.
    pub fn set_cutoff(mut self, cutoff: F) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Set lattice extension beyond the site bounding box.
    pub fn set_offset(mut self, offset: F) -> Self {
        self.offset = offset;
        self
    }

    pub fn max_edge(&self) -> F {
        self.max_edge
    }

    pub fn cutoff(&self) -> F {
        self.cutoff
    }

    pub fn offset(&self) -> F {
        self.offset
    }

    /// Check mesh params consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_edge <= F::zero() {
            return Err(MeshError::InvalidValue(format!(
                "max_edge should be positive, got {}",
                self.max_edge
            )));
        }
        if self.cutoff < F::zero() {
            return Err(MeshError::InvalidValue(format!(
                "cutoff should not be negative, got {}",
                self.cutoff
            )));
        }
        if self.offset < F::zero() {
            return Err(MeshError::InvalidValue(format!(
                "offset should not be negative, got {}",
                self.offset
            )));
        }
        Ok(())
    }
}

/// A regular right-triangle lattice covering the extent of a set of sites.
///
/// Vertices sit on a square grid of spacing `max_edge / sqrt(2)` so that the
/// cell diagonals, the longest edges produced, never exceed `max_edge`. Each
/// square cell is split along its anti-diagonal into two triangles. The
/// lattice is built from estimation-side coordinates only; prediction points
/// are projected onto the same vertex set afterwards.
#[derive(Clone, Debug)]
pub struct TriangleMesh<F: Float> {
    /// Vertex coordinates as a (n_vertices, 2) array
    vertices: Array2<F>,
    /// Vertex ids of each triangle, counter-clockwise
    triangles: Vec<[usize; 3]>,
    /// Lower-left corner of the lattice
    origin: (F, F),
    /// Grid spacing along both axes
    spacing: F,
    /// Number of vertex columns
    n_cols: usize,
    /// Number of vertex rows
    n_rows: usize,
}

impl<F: Float> TriangleMesh<F> {
    /// Build a mesh from site coordinates given as a (n, 2) array.
    ///
    /// Fails with [MeshError::InsufficientSupport] when, after collapsing
    /// sites closer than the cutoff, fewer than 3 distinct sites remain or
    /// the remaining sites are collinear.
    pub fn build(
        coords: &ArrayBase<impl Data<Elem = F>, Ix2>,
        params: &MeshParams<F>,
    ) -> Result<Self> {
        params.validate()?;
        if coords.ncols() != 2 {
            return Err(MeshError::InvalidValue(format!(
                "site coordinates should have 2 columns (lon, lat), got {}",
                coords.ncols()
            )));
        }
        if coords.nrows() == 0 {
            return Err(MeshError::InsufficientSupport(
                "no site coordinates given".to_string(),
            ));
        }

        let sites = collapse_sites(coords, params.cutoff);
        check_spatial_support(&sites)?;

        let (mut xmin, mut xmax) = (sites[0].0, sites[0].0);
        let (mut ymin, mut ymax) = (sites[0].1, sites[0].1);
        for &(x, y) in &sites {
            xmin = xmin.min(x);
            xmax = xmax.max(x);
            ymin = ymin.min(y);
            ymax = ymax.max(y);
        }
        let origin = (xmin - params.offset, ymin - params.offset);
        let width = xmax + params.offset - origin.0;
        let height = ymax + params.offset - origin.1;

        // Cell diagonal is the longest edge: spacing * sqrt(2) == max_edge
        let spacing = params.max_edge / F::cast(2.).sqrt();
        let n_cells_x = cell_count(width, spacing);
        let n_cells_y = cell_count(height, spacing);
        let (n_cols, n_rows) = (n_cells_x + 1, n_cells_y + 1);

        let mut vertices = Array2::zeros((n_cols * n_rows, 2));
        for r in 0..n_rows {
            for c in 0..n_cols {
                let v = r * n_cols + c;
                vertices[[v, 0]] = origin.0 + F::cast(c) * spacing;
                vertices[[v, 1]] = origin.1 + F::cast(r) * spacing;
            }
        }

        let mut triangles = Vec::with_capacity(2 * n_cells_x * n_cells_y);
        for r in 0..n_cells_y {
            for c in 0..n_cells_x {
                let v00 = r * n_cols + c;
                let v10 = v00 + 1;
                let v01 = v00 + n_cols;
                let v11 = v01 + 1;
                triangles.push([v00, v10, v01]);
                triangles.push([v10, v11, v01]);
            }
        }

        debug!(
            "mesh: {} sites -> {} vertices ({} x {}), {} triangles",
            sites.len(),
            n_cols * n_rows,
            n_cols,
            n_rows,
            triangles.len()
        );

        Ok(TriangleMesh {
            vertices,
            triangles,
            origin,
            spacing,
            n_cols,
            n_rows,
        })
    }

    /// Number of lattice vertices, the dimension of the spatial basis
    pub fn n_vertices(&self) -> usize {
        self.n_cols * self.n_rows
    }

    /// Number of triangles
    pub fn n_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Vertex coordinates as a (n_vertices, 2) array
    pub fn vertex_coords(&self) -> &Array2<F> {
        &self.vertices
    }

    /// Vertex ids of each triangle
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Grid spacing between neighbouring vertices
    pub fn spacing(&self) -> F {
        self.spacing
    }

    pub(crate) fn origin(&self) -> (F, F) {
        self.origin
    }

    pub(crate) fn grid_dims(&self) -> (usize, usize) {
        (self.n_cols, self.n_rows)
    }
}

fn cell_count<F: Float>(extent: F, spacing: F) -> usize {
    let n = (extent / spacing).ceil().to_usize().unwrap_or(1);
    n.max(1)
}

/// Collapse sites closer than `cutoff`, keeping the first of each cluster
fn collapse_sites<F: Float>(
    coords: &ArrayBase<impl Data<Elem = F>, Ix2>,
    cutoff: F,
) -> Vec<(F, F)> {
    let mut kept: Vec<(F, F)> = Vec::new();
    for row in coords.rows() {
        let (x, y) = (row[0], row[1]);
        let dup = kept.iter().any(|&(kx, ky)| {
            let (dx, dy) = (x - kx, y - ky);
            (dx * dx + dy * dy).sqrt() < cutoff
        });
        if !dup {
            kept.push((x, y));
        }
    }
    kept
}

fn check_spatial_support<F: Float>(sites: &[(F, F)]) -> Result<()> {
    if sites.len() < 3 {
        return Err(MeshError::InsufficientSupport(format!(
            "triangulation requires at least 3 distinct sites, got {}",
            sites.len()
        )));
    }
    let p0 = sites[0];
    // Farthest site from p0 spans the principal direction
    let mut p1 = p0;
    let mut d01 = F::zero();
    for &p in sites.iter().skip(1) {
        let d = dist(p0, p);
        if d > d01 {
            d01 = d;
            p1 = p;
        }
    }
    if d01 == F::zero() {
        return Err(MeshError::InsufficientSupport(
            "all sites coincide".to_string(),
        ));
    }
    let mut max_perp = F::zero();
    for &p in sites {
        let cross = (p1.0 - p0.0) * (p.1 - p0.1) - (p1.1 - p0.1) * (p.0 - p0.0);
        max_perp = max_perp.max(cross.abs() / d01);
    }
    if max_perp < F::cast(COLLINEARITY_RTOL) * d01 {
        return Err(MeshError::InsufficientSupport(
            "sites are collinear, triangulation is degenerate".to_string(),
        ));
    }
    Ok(())
}

fn dist<F: Float>(a: (F, F), b: (F, F)) -> F {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    (dx * dx + dy * dy).sqrt()
}

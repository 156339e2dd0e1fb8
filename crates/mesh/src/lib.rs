//! This library implements the spatial discretization used by latent
//! Gaussian field models over a network of fixed monitoring stations.
//!
//! A [TriangleMesh] is a regular right-triangle lattice covering the
//! bounding box of the station coordinates, extended outwards by an
//! `offset` so that boundary effects stay away from the data. Station
//! coordinates closer than `cutoff` are collapsed to a single site
//! before the extent is computed. The lattice spacing is derived from
//! `max_edge` so that no triangle edge exceeds it.
//!
//! A mesh projects arbitrary (lon, lat) points onto its vertices with
//! barycentric weights, producing the sparse [Projection] rows used as
//! design matrices by field models: piecewise-linear in space, exact
//! for affine functions.
mod errors;
mod lattice;
mod projection;

pub use errors::*;
pub use lattice::*;
pub use projection::*;

//! The `halo_core` crate computes halo orbits about the collinear L1/L2 points of the
//! circular restricted three-body problem, together with their stable and unstable
//! invariant manifolds.
//!
//! Key components:
//! - **Dynamics**: synodic-frame equations of motion and the STM variational equations.
//! - **Solvers**: adaptive Dormand-Prince integrator with event location.
//! - **Analytical**: Richardson's third-order halo approximation, used as a corrector seed.
//! - **Corrector**: half-period differential correction with explicit formula selection.
//! - **Monodromy / Manifold**: eigenstructure of the monodromy matrix and manifold generation.
//! - **Family**: batch amplitude sweeps and the family table.
pub mod analytical;
pub mod corrector;
pub mod dynamics;
pub mod error;
pub mod family;
pub mod manifold;
pub mod monodromy;
pub mod propagation;
pub mod solvers;
pub mod system;
pub mod traits;
pub mod types;

pub use error::{HaloError, IntegrationError, Result};

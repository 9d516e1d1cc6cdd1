//! Error type shared by the solver, the samplers and the meshers.
//!
//! Numerical trouble inside a step (empty neighbourhoods, NaN positions) is
//! recovered locally and never shows up here. Only configuration problems,
//! mesh capacity overflow and snapshot I/O reach the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PbfError {
    /// Rejected at construction time; the solver/mesher was not built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lattice with a zero node count or a non-positive cell width.
    #[error("invalid lattice: counts {counts:?}, cell width {width:?}")]
    InvalidLattice { counts: [usize; 3], width: [f32; 3] },

    /// The parallel mesher needed more vertex slots than it was given.
    #[error("marching cubes needs {required} vertices but capacity is {capacity}")]
    VertexCapacityExceeded { required: usize, capacity: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PbfError>;

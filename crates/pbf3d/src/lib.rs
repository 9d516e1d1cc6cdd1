//! 3D Position Based Fluids with Marching Cubes surfacing
//!
//! An incompressible particle fluid solved with position-based SPH
//! constraints, colliding against signed-distance solids, with the free
//! surface reconstructed from the particle density field each step.
//!
//! # Example
//!
//! ```
//! use pbf3d::{Environment, FluidPipeline, PbfSolver};
//! use glam::Vec3;
//!
//! let env = Environment {
//!     domain_min: Vec3::splat(-0.2),
//!     domain_max: Vec3::splat(0.2),
//!     ..Environment::default()
//! };
//! let mut solver = PbfSolver::new(env).unwrap();
//! let spacing = solver.environment().particle_spacing();
//! solver.add_box(Vec3::splat(-0.1), Vec3::splat(0.1), spacing, Vec3::ZERO);
//!
//! let mut pipeline = FluidPipeline::new(solver);
//! pipeline.step().unwrap();
//! assert!(!pipeline.mesh().is_empty());
//! ```

pub mod boundary;
pub mod config;
pub mod constants;
pub mod error;
pub mod grid;
pub mod implicit;
pub mod kernels;
pub mod marching_cubes;
pub mod mesh;
pub mod particle;
pub mod pipeline;
pub mod snapshot;
pub mod solid;
pub mod solver;
pub mod state;

pub use config::{ArtificialPressure, Environment, FluidRegion, Scene, SolidDesc};
pub use error::{PbfError, Result};
pub use glam::Vec3;
pub use grid::SpatialGrid;
pub use implicit::{mesh_lattice_for_bounds, FluidField, LatticeSpec, ScalarField, ScalarLattice, SolidField};
pub use kernels::SphKernels;
pub use marching_cubes::{create_mesher, CpuMesher, MeshExtractor, MeshReport, MesherBackend, ParallelMesher};
pub use mesh::Mesh;
pub use particle::{BoundaryParticles, ColorMode, ParticleRecord, Particles};
pub use pipeline::FluidPipeline;
pub use snapshot::{snapshot_file_name, Snapshot, SnapshotWriter};
pub use solid::{CollisionInfo, Containment, DistanceField, Solid, SolidShape};
pub use solver::{PbfSolver, SolverPhase};
pub use state::{MeshStats, SimulationState, StepStats, StepTimings};

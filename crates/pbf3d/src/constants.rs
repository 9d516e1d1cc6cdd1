//! Default physical and numerical constants.
//!
//! Everything here is only a default: the live values come from
//! [`Environment`](crate::config::Environment) so scenes can override them.

/// Gravity acceleration (m/s^2) - negative Y direction
pub const GRAVITY: f32 = -9.81;

/// Rest density of water (kg/m³)
pub const WATER_REST_DENSITY: f32 = 998.29;

/// Default particle radius (m). Particles are seeded at twice this spacing.
pub const PARTICLE_RADIUS: f32 = 0.02;

/// Smoothing length relative to particle radius (h = 4r = 2 * spacing)
pub const SMOOTHING_LENGTH_SCALE: f32 = 4.0;

/// Default time step (s)
pub const TIME_STEP: f32 = 0.005;

// =============================================================================
// CONSTRAINT SOLVER
// =============================================================================

/// Minimum number of constraint projection passes per step
pub const SOLVER_ITERATIONS: usize = 3;

/// Relaxation added to the lambda denominator, scaled by 1/h^2 so it is
/// independent of scene units.
pub const RELAXATION: f32 = 1.0e-2;

/// Artificial pressure strength k in s_corr = -k (W(r)/W(dq))^n
pub const ARTIFICIAL_PRESSURE_K: f32 = 0.1;

/// Artificial pressure exponent n
pub const ARTIFICIAL_PRESSURE_N: i32 = 4;

/// Artificial pressure reference distance dq, as a fraction of h
pub const ARTIFICIAL_PRESSURE_DQ: f32 = 0.2;

/// XSPH viscosity blend factor
pub const XSPH_VISCOSITY: f32 = 0.01;

/// Below this many neighbours (self excluded) a particle gets the rest density.
pub const MIN_NEIGHBORS: usize = 1;

// =============================================================================
// SURFACE EXTRACTION
// =============================================================================

/// Lattice cells along the longest axis of the meshed region
pub const MESH_MAX_N: usize = 64;

/// Density iso value for the fluid surface (about 3/4 of water rest density)
pub const MESH_THRESHOLD: f32 = 750.0;

/// Relative margin added around the meshed bounds on every side
pub const MESH_MARGIN: f32 = 0.05;

/// Default vertex capacity of the parallel mesher
pub const MESH_VERTEX_CAPACITY: usize = 1 << 20;

/// Zero-padded digits in snapshot file names
pub const SNAPSHOT_STEP_DIGITS: usize = 5;

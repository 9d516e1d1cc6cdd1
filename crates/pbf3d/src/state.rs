//! Per-run bookkeeping owned by the driver.

use serde::Serialize;

/// Summary of one solver step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StepStats {
    /// Constraint passes actually run
    pub iterations: usize,
    /// Mean positive relative density error at the last check
    pub density_error: f32,
    /// Particles reset after producing a non-finite position
    pub nan_recoveries: usize,
    /// Particles touching a solid at the end of the step
    pub contacts: usize,
}

/// Size of the last extracted surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MeshStats {
    pub vertices: usize,
    pub faces: usize,
    /// Lattice node counts used for sampling
    pub lattice: [usize; 3],
    /// Vertices the full surface needed (differs from `vertices` when truncated)
    pub required_vertices: usize,
    pub truncated: bool,
}

/// Wall-clock time of the last step, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StepTimings {
    pub solver_ms: f32,
    pub sampling_ms: f32,
    pub meshing_ms: f32,
}

/// Step counter, simulated time and the most recent statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SimulationState {
    pub step: u64,
    pub time: f64,
    pub last_iterations: usize,
    pub last_density_error: f32,
    pub total_nan_recoveries: u64,
    pub last_mesh: Option<MeshStats>,
    pub timings: StepTimings,
}

impl SimulationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_step(&mut self, dt: f32, stats: &StepStats) {
        self.step += 1;
        self.time += dt as f64;
        self.last_iterations = stats.iterations;
        self.last_density_error = stats.density_error;
        self.total_nan_recoveries += stats.nan_recoveries as u64;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

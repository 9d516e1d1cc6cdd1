//! Step driver: solver step, then optional surface extraction and snapshot.

use std::time::Instant;

use crate::config::Scene;
use crate::error::Result;
use crate::implicit::{mesh_lattice_for_bounds, LatticeSpec, ScalarLattice};
use crate::marching_cubes::{create_mesher, MeshExtractor, MeshReport, MesherBackend};
use crate::mesh::Mesh;
use crate::snapshot::{Snapshot, SnapshotWriter};
use crate::solver::PbfSolver;
use crate::state::{MeshStats, SimulationState, StepStats};

/// Steps between progress lines at info level.
const LOG_INTERVAL: u64 = 100;

pub struct FluidPipeline {
    solver: PbfSolver,
    mesher: Box<dyn MeshExtractor>,
    state: SimulationState,
    mesh: Mesh,
    meshing: bool,
    /// Accept truncated meshes from a capacity-bounded mesher
    allow_truncation: bool,
    snapshots: Option<SnapshotWriter>,
}

impl FluidPipeline {
    pub fn new(solver: PbfSolver) -> Self {
        let env = solver.environment();
        let mesher = create_mesher(env.mesher, env.mesh_vertex_capacity);
        log::info!(
            "pipeline: {} particles, {} mesher",
            solver.num_particles(),
            mesher.name()
        );
        Self {
            solver,
            mesher,
            state: SimulationState::new(),
            mesh: Mesh::new(),
            meshing: true,
            allow_truncation: false,
            snapshots: None,
        }
    }

    pub fn from_scene(scene: &Scene) -> Result<Self> {
        Ok(Self::new(scene.build()?))
    }

    pub fn with_meshing(mut self, enabled: bool) -> Self {
        self.meshing = enabled;
        self
    }

    pub fn with_truncation(mut self, allowed: bool) -> Self {
        self.allow_truncation = allowed;
        self
    }

    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    pub fn solver(&self) -> &PbfSolver {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut PbfSolver {
        &mut self.solver
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Surface from the last extraction.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// One full step: solve, then mesh and snapshot if enabled.
    pub fn step(&mut self) -> Result<StepStats> {
        let start = Instant::now();
        let stats = self.solver.advance(&mut self.state);
        self.state.timings.solver_ms = start.elapsed().as_secs_f32() * 1000.0;

        if self.meshing {
            self.extract_surface()?;
        }
        if let Some(writer) = &self.snapshots {
            writer.write(&Snapshot {
                step: self.state.step,
                time: self.state.time,
                particles: self.solver.output_particles(),
            })?;
        }

        if self.state.step % LOG_INTERVAL == 0 {
            log::info!(
                "step {} (t = {:.3}s): {} passes, density error {:.4}, {:.1} ms",
                self.state.step,
                self.state.time,
                stats.iterations,
                stats.density_error,
                self.state.timings.solver_ms
            );
        }
        Ok(stats)
    }

    /// Run `steps` steps.
    pub fn run(&mut self, steps: u64) -> Result<()> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    /// Lattice the configured backend samples on, or `None` when there is
    /// nothing to mesh.
    pub fn mesh_lattice(&self) -> Result<Option<LatticeSpec>> {
        let env = self.solver.environment();
        match env.mesher {
            MesherBackend::Cpu => {
                let Some((lo, hi)) = self.solver.particles().bounds() else {
                    return Ok(None);
                };
                // The density field reaches one support radius past the particles
                let h = self.solver.kernels().h;
                let spec = mesh_lattice_for_bounds(lo - h, hi + h, env.mesh_max_n, env.mesh_margin)?;
                Ok(Some(spec))
            }
            MesherBackend::Parallel => {
                let (lo, hi) = env.mesh_bounds();
                Ok(Some(mesh_lattice_for_bounds(lo, hi, env.mesh_max_n, env.mesh_margin)?))
            }
        }
    }

    /// Sample the fluid density and rebuild the surface mesh.
    pub fn extract_surface(&mut self) -> Result<&Mesh> {
        let Some(spec) = self.mesh_lattice()? else {
            self.mesh.clear();
            self.state.last_mesh = Some(MeshStats::default());
            return Ok(&self.mesh);
        };
        let threshold = self.solver.environment().mesh_threshold;

        let start = Instant::now();
        let lattice = ScalarLattice::sample(spec, &self.solver.fluid_field())?;
        self.state.timings.sampling_ms = start.elapsed().as_secs_f32() * 1000.0;

        let start = Instant::now();
        let (mesh, report) = if self.allow_truncation {
            self.mesher.create_mesh_clipped(&lattice, threshold)?
        } else {
            let mesh = self.mesher.create_mesh(&lattice, threshold)?;
            let n = mesh.vertex_count();
            let report = MeshReport {
                emitted: n,
                required: n,
                truncated: false,
            };
            (mesh, report)
        };
        self.state.timings.meshing_ms = start.elapsed().as_secs_f32() * 1000.0;

        self.state.last_mesh = Some(MeshStats {
            vertices: mesh.vertex_count(),
            faces: mesh.face_count(),
            lattice: spec.counts,
            required_vertices: report.required,
            truncated: report.truncated,
        });
        log::debug!(
            "mesh: {} vertices, {} faces on a {:?} lattice",
            mesh.vertex_count(),
            mesh.face_count(),
            spec.counts
        );
        self.mesh = mesh;
        Ok(&self.mesh)
    }

    /// Clear particles and counters; solids stay.
    pub fn reset(&mut self) {
        self.solver.reset();
        self.state.reset();
        self.mesh.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use glam::Vec3;

    fn drop_pipeline(backend: MesherBackend) -> FluidPipeline {
        let env = Environment {
            domain_min: Vec3::splat(-0.25),
            domain_max: Vec3::splat(0.25),
            mesh_max_n: 24,
            mesher: backend,
            ..Environment::default()
        };
        let mut solver = PbfSolver::new(env).unwrap();
        solver.add_sphere(Vec3::ZERO, 0.08, 0.04, Vec3::ZERO);
        FluidPipeline::new(solver)
    }

    #[test]
    fn test_step_records_state_and_mesh() {
        let mut pipeline = drop_pipeline(MesherBackend::Cpu);
        pipeline.run(2).unwrap();
        assert_eq!(pipeline.state().step, 2);
        let stats = pipeline.state().last_mesh.unwrap();
        assert!(stats.faces > 0);
        assert!(!stats.truncated);
        assert!(pipeline.mesh().validate().is_ok());
    }

    #[test]
    fn test_empty_fluid_gives_empty_mesh() {
        let mut pipeline = drop_pipeline(MesherBackend::Cpu);
        pipeline.reset();
        pipeline.step().unwrap();
        assert!(pipeline.mesh().is_empty());
        assert_eq!(pipeline.state().step, 1);
    }

    #[test]
    fn test_parallel_backend_uses_mesh_boundary() {
        let pipeline = drop_pipeline(MesherBackend::Parallel);
        let spec = pipeline.mesh_lattice().unwrap().unwrap();
        assert_eq!(spec.counts[0], 25);
        assert!(spec.origin.x < -0.5);
    }
}

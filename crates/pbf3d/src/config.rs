//! Simulation environment and scene description.
//!
//! Both are plain serde structs with defaults, so a scene file only needs to
//! list the values it changes.

use std::path::Path;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{PbfError, Result};
use crate::marching_cubes::MesherBackend;
use crate::particle::ColorMode;
use crate::solid::{Containment, Solid};
use crate::solver::PbfSolver;

/// Tensile-instability correction `s_corr = -k (W(r) / W(dq * h))^n`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtificialPressure {
    pub k: f32,
    pub n: i32,
    /// Reference distance as a fraction of the smoothing length
    pub dq: f32,
}

impl Default for ArtificialPressure {
    fn default() -> Self {
        Self {
            k: ARTIFICIAL_PRESSURE_K,
            n: ARTIFICIAL_PRESSURE_N,
            dq: ARTIFICIAL_PRESSURE_DQ,
        }
    }
}

/// Solver, domain and meshing parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub dt: f32,
    pub gravity: Vec3,
    pub rest_density: f32,
    pub particle_radius: f32,
    /// Kernel support radius h
    pub smoothing_length: f32,

    /// Minimum constraint passes per step
    pub iterations: usize,
    /// Maximum passes; equal to `iterations` for a fixed count
    pub max_iterations: usize,
    /// Target mean relative density error for early exit
    pub eta: f32,
    pub use_artificial_pressure: bool,
    pub artificial_pressure: ArtificialPressure,
    /// Constraint relaxation epsilon, in units of 1/h^2
    pub relaxation: f32,
    pub xsph_viscosity: f32,
    /// Vorticity confinement strength (0 disables)
    pub vorticity: f32,
    /// Fraction of the normal velocity reflected at contacts
    pub restitution: f32,
    /// Sample static particles on solid surfaces
    pub boundary_particles: bool,

    pub domain_min: Vec3,
    pub domain_max: Vec3,

    /// Lattice cells along the longest meshed axis
    pub mesh_max_n: usize,
    pub mesh_threshold: f32,
    pub mesh_boundary_center: Vec3,
    pub mesh_boundary_extent: Vec3,
    pub mesh_margin: f32,
    pub mesh_vertex_capacity: usize,
    pub mesher: MesherBackend,

    pub color_mode: ColorMode,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            dt: TIME_STEP,
            gravity: Vec3::new(0.0, GRAVITY, 0.0),
            rest_density: WATER_REST_DENSITY,
            particle_radius: PARTICLE_RADIUS,
            smoothing_length: PARTICLE_RADIUS * SMOOTHING_LENGTH_SCALE,
            iterations: SOLVER_ITERATIONS,
            max_iterations: SOLVER_ITERATIONS,
            eta: 0.01,
            use_artificial_pressure: true,
            artificial_pressure: ArtificialPressure::default(),
            relaxation: RELAXATION,
            xsph_viscosity: XSPH_VISCOSITY,
            vorticity: 0.0,
            restitution: 0.0,
            boundary_particles: false,
            domain_min: Vec3::new(-0.5, -0.5, -0.5),
            domain_max: Vec3::new(0.5, 0.5, 0.5),
            mesh_max_n: MESH_MAX_N,
            mesh_threshold: MESH_THRESHOLD,
            mesh_boundary_center: Vec3::ZERO,
            mesh_boundary_extent: Vec3::splat(0.5),
            mesh_margin: MESH_MARGIN,
            mesh_vertex_capacity: MESH_VERTEX_CAPACITY,
            mesher: MesherBackend::Cpu,
            color_mode: ColorMode::Density,
        }
    }
}

impl Environment {
    /// Rest spacing between seeded particles.
    pub fn particle_spacing(&self) -> f32 {
        2.0 * self.particle_radius
    }

    /// Box container bounding the simulation.
    pub fn domain(&self) -> Solid {
        Solid::container(self.domain_min, self.domain_max)
    }

    /// Meshing region of the parallel backend.
    pub fn mesh_bounds(&self) -> (Vec3, Vec3) {
        (
            self.mesh_boundary_center - self.mesh_boundary_extent,
            self.mesh_boundary_center + self.mesh_boundary_extent,
        )
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid<T>(msg: String) -> Result<T> {
            Err(PbfError::InvalidConfig(msg))
        }

        let scalars = [
            ("dt", self.dt),
            ("rest_density", self.rest_density),
            ("particle_radius", self.particle_radius),
            ("smoothing_length", self.smoothing_length),
        ];
        for (name, value) in scalars {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{} must be positive and finite, got {}", name, value));
            }
        }

        let finite = [
            ("eta", self.eta),
            ("relaxation", self.relaxation),
            ("xsph_viscosity", self.xsph_viscosity),
            ("vorticity", self.vorticity),
            ("restitution", self.restitution),
            ("mesh_threshold", self.mesh_threshold),
            ("mesh_margin", self.mesh_margin),
            ("artificial_pressure.k", self.artificial_pressure.k),
            ("artificial_pressure.dq", self.artificial_pressure.dq),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return invalid(format!("{} must be finite, got {}", name, value));
            }
        }

        let vectors = [
            ("gravity", self.gravity),
            ("domain_min", self.domain_min),
            ("domain_max", self.domain_max),
            ("mesh_boundary_center", self.mesh_boundary_center),
            ("mesh_boundary_extent", self.mesh_boundary_extent),
        ];
        for (name, value) in vectors {
            if !value.is_finite() {
                return invalid(format!("{} must be finite, got {:?}", name, value));
            }
        }

        if self.iterations == 0 {
            return invalid("iterations must be at least 1".into());
        }
        if self.max_iterations < self.iterations {
            return invalid(format!(
                "max_iterations ({}) is below iterations ({})",
                self.max_iterations, self.iterations
            ));
        }
        if self.mesh_max_n == 0 {
            return invalid("mesh_max_n must be at least 1".into());
        }
        if self.domain_min.cmpge(self.domain_max).any() {
            return invalid(format!(
                "domain is empty: min {:?}, max {:?}",
                self.domain_min, self.domain_max
            ));
        }
        if self.artificial_pressure.dq <= 0.0 || self.artificial_pressure.dq >= 1.0 {
            return invalid(format!(
                "artificial_pressure.dq must lie in (0, 1), got {}",
                self.artificial_pressure.dq
            ));
        }
        Ok(())
    }
}

/// Region filled with fluid particles at rest spacing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FluidRegion {
    Box { min: Vec3, max: Vec3, velocity: Vec3 },
    Sphere { center: Vec3, radius: f32, velocity: Vec3 },
}

/// Solid obstacle or container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolidDesc {
    Box {
        center: Vec3,
        half_extents: Vec3,
        #[serde(default)]
        containment: Containment,
        #[serde(default)]
        velocity: Vec3,
    },
    OpenBox {
        center: Vec3,
        inner_half: Vec3,
        outer_half: Vec3,
        #[serde(default)]
        velocity: Vec3,
    },
    Sphere {
        center: Vec3,
        radius: f32,
        #[serde(default)]
        containment: Containment,
        #[serde(default)]
        velocity: Vec3,
    },
}

impl SolidDesc {
    pub fn to_solid(&self) -> Solid {
        let (mut solid, velocity) = match self {
            SolidDesc::Box {
                center,
                half_extents,
                containment,
                velocity,
            } => {
                let mut s = Solid::cuboid(*center, *half_extents);
                s.containment = *containment;
                (s, *velocity)
            }
            SolidDesc::OpenBox {
                center,
                inner_half,
                outer_half,
                velocity,
            } => (Solid::open_box(*center, *inner_half, *outer_half), *velocity),
            SolidDesc::Sphere {
                center,
                radius,
                containment,
                velocity,
            } => {
                let mut s = Solid::sphere(*center, *radius);
                s.containment = *containment;
                (s, *velocity)
            }
        };
        if velocity != Vec3::ZERO {
            solid = solid.with_velocity(velocity);
        }
        solid
    }
}

/// A full scene: environment, initial fluid and solids.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub name: String,
    pub environment: Environment,
    pub fluids: Vec<FluidRegion>,
    pub solids: Vec<SolidDesc>,
    /// Random offset added to seeded particles, as a fraction of the spacing
    pub jitter: f32,
    pub seed: u64,
}

impl Scene {
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let scene: Scene = serde_json::from_str(&json)?;
        log::info!(
            "loaded scene '{}' from {} ({} fluid regions, {} solids)",
            scene.name,
            path.display(),
            scene.fluids.len(),
            scene.solids.len()
        );
        Ok(scene)
    }

    /// Construct a solver holding this scene's solids and fluid.
    pub fn build(&self) -> Result<PbfSolver> {
        let mut solver = PbfSolver::new(self.environment.clone())?;
        for desc in &self.solids {
            solver.add_solid(desc.to_solid());
        }

        let spacing = self.environment.particle_spacing();
        let mut rng = StdRng::seed_from_u64(self.seed);
        for (index, region) in self.fluids.iter().enumerate() {
            let start = solver.num_particles();
            match region {
                FluidRegion::Box { min, max, velocity } => {
                    solver.add_box(*min, *max, spacing, *velocity);
                }
                FluidRegion::Sphere {
                    center,
                    radius,
                    velocity,
                } => {
                    solver.add_sphere(*center, *radius, spacing, *velocity);
                }
            }
            let tag = u32::try_from(index).unwrap_or(u32::MAX);
            solver.tag_particles(start..solver.num_particles(), tag);
            if self.jitter > 0.0 {
                solver.jitter_particles(start..solver.num_particles(), self.jitter * spacing, &mut rng);
            }
        }

        solver.init_boundary()?;
        Ok(solver)
    }

    /// Water column in one corner of a box tank.
    pub fn dam_break() -> Self {
        let environment = Environment {
            domain_min: Vec3::new(-0.4, 0.0, -0.2),
            domain_max: Vec3::new(0.4, 0.6, 0.2),
            mesh_boundary_center: Vec3::new(0.0, 0.3, 0.0),
            mesh_boundary_extent: Vec3::new(0.4, 0.3, 0.2),
            max_iterations: 10,
            ..Environment::default()
        };
        Self {
            name: "dam_break".into(),
            environment,
            fluids: vec![FluidRegion::Box {
                min: Vec3::new(-0.38, 0.02, -0.18),
                max: Vec3::new(-0.1, 0.3, 0.18),
                velocity: Vec3::ZERO,
            }],
            solids: vec![SolidDesc::Sphere {
                center: Vec3::new(0.15, 0.1, 0.0),
                radius: 0.08,
                containment: Containment::Object,
                velocity: Vec3::ZERO,
            }],
            jitter: 0.0,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_environment_is_valid() {
        let env = Environment::default();
        assert!(env.validate().is_ok());
        assert!((env.smoothing_length - 4.0 * env.particle_radius).abs() < 1e-7);
    }

    #[test]
    fn test_validate_rejections() {
        let cases: Vec<(&str, Environment)> = vec![
            ("dt", Environment { dt: 0.0, ..Default::default() }),
            ("h", Environment { smoothing_length: -1.0, ..Default::default() }),
            ("rho", Environment { rest_density: f32::NAN, ..Default::default() }),
            ("iters", Environment { iterations: 0, ..Default::default() }),
            (
                "max iters",
                Environment {
                    iterations: 4,
                    max_iterations: 2,
                    ..Default::default()
                },
            ),
            ("mesh n", Environment { mesh_max_n: 0, ..Default::default() }),
            (
                "domain",
                Environment {
                    domain_min: Vec3::ONE,
                    domain_max: Vec3::ZERO,
                    ..Default::default()
                },
            ),
            (
                "gravity",
                Environment {
                    gravity: Vec3::new(0.0, f32::INFINITY, 0.0),
                    ..Default::default()
                },
            ),
        ];
        for (name, env) in cases {
            assert!(
                matches!(env.validate(), Err(PbfError::InvalidConfig(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let env: Environment = serde_json::from_str(r#"{ "dt": 0.002, "iterations": 5, "max_iterations": 8 }"#).unwrap();
        assert_eq!(env.dt, 0.002);
        assert_eq!(env.iterations, 5);
        assert_eq!(env.rest_density, WATER_REST_DENSITY);
        assert_eq!(env.mesher, MesherBackend::Cpu);
    }

    #[test]
    fn test_solid_desc_conversion() {
        let desc = SolidDesc::Sphere {
            center: Vec3::ONE,
            radius: 0.5,
            containment: Containment::Container,
            velocity: Vec3::X,
        };
        let solid = desc.to_solid();
        assert_eq!(solid.containment, Containment::Container);
        assert!(!solid.fixed);
        assert_eq!(solid.velocity, Vec3::X);
    }
}

//! Position Based Fluids (Macklin & Müller 2013) in 3D.
//!
//! Per step: predict with gravity, then repeatedly project the density
//! constraint `C_i = rho_i / rho0 - 1` onto the predicted positions,
//! resolving solid contacts after every pass. Velocities are recovered from
//! the position change and smoothed with XSPH (plus optional vorticity
//! confinement).

use std::ops::Range;

use glam::Vec3;
use rand::Rng;
use rayon::prelude::*;

use crate::boundary;
use crate::config::Environment;
use crate::constants::MIN_NEIGHBORS;
use crate::error::Result;
use crate::grid::SpatialGrid;
use crate::implicit::FluidField;
use crate::kernels::SphKernels;
use crate::particle::{BoundaryParticles, ParticleRecord, Particles};
use crate::solid::{DistanceField, Solid};
use crate::state::{SimulationState, StepStats};

/// What the solver is currently doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverPhase {
    #[default]
    Idle,
    Stepping,
    Resetting,
}

/// Last contact of a particle during a step.
#[derive(Clone, Copy, Debug)]
struct Contact {
    normal: Vec3,
    velocity: Vec3,
}

pub struct PbfSolver {
    env: Environment,
    kernels: SphKernels,
    /// Per-particle mass, calibrated so a rest lattice has the rest density
    mass: f32,
    particles: Particles,
    boundary: BoundaryParticles,
    solids: Vec<Solid>,
    domain: Solid,
    grid: SpatialGrid,
    boundary_grid: SpatialGrid,
    /// `grid` no longer indexes `particles.positions`
    grid_stale: bool,
    boundary_dirty: bool,
    phase: SolverPhase,
    contacts: Vec<Option<Contact>>,
    neighbor_counts: Vec<usize>,
}

impl PbfSolver {
    pub fn new(env: Environment) -> Result<Self> {
        env.validate()?;
        let kernels = SphKernels::new(env.smoothing_length);
        let spacing = env.particle_spacing();
        let mass = env.rest_density / kernels.lattice_sum(spacing);
        log::info!(
            "PBF solver: h = {}, spacing = {}, mass = {:.6e}, iterations {}..={}",
            kernels.h,
            spacing,
            mass,
            env.iterations,
            env.max_iterations
        );

        Ok(Self {
            domain: env.domain(),
            grid: SpatialGrid::new(kernels.h),
            boundary_grid: SpatialGrid::new(kernels.h),
            kernels,
            mass,
            env,
            particles: Particles::new(),
            boundary: BoundaryParticles::new(),
            solids: Vec::new(),
            grid_stale: true,
            boundary_dirty: true,
            phase: SolverPhase::Idle,
            contacts: Vec::new(),
            neighbor_counts: Vec::new(),
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn kernels(&self) -> &SphKernels {
        &self.kernels
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &Particles {
        &self.particles
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.particles.positions
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.particles.velocities
    }

    pub fn densities(&self) -> &[f32] {
        &self.particles.densities
    }

    /// Neighbour count (self excluded) of each particle in the last pass.
    pub fn neighbor_counts(&self) -> &[usize] {
        &self.neighbor_counts
    }

    pub fn boundary(&self) -> &BoundaryParticles {
        &self.boundary
    }

    pub fn solids(&self) -> &[Solid] {
        &self.solids
    }

    /// The box container around the whole simulation.
    pub fn domain(&self) -> &Solid {
        &self.domain
    }

    /// Add a solid; returns its index.
    pub fn add_solid(&mut self, solid: Solid) -> usize {
        self.solids.push(solid);
        self.boundary_dirty = true;
        self.solids.len() - 1
    }

    /// Mutable access to a solid (e.g. to change its velocity). Boundary
    /// particles are regenerated on the next step.
    pub fn solid_mut(&mut self, index: usize) -> Option<&mut Solid> {
        self.boundary_dirty = true;
        self.solids.get_mut(index)
    }

    /// Free space check used when seeding particles.
    fn is_free(&self, p: Vec3) -> bool {
        p.is_finite()
            && !self.domain.distance(p, 0.0).is_penetrating()
            && self
                .solids
                .iter()
                .all(|s| !s.distance(p, 0.0).is_penetrating())
    }

    fn seed_points(&mut self, points: impl Iterator<Item = Vec3>, velocity: Vec3, what: &str) -> usize {
        let mut added = 0;
        let mut rejected = 0;
        for p in points {
            if self.is_free(p) {
                self.particles.push(p, velocity, 0);
                added += 1;
            } else {
                rejected += 1;
            }
        }
        if rejected > 0 {
            log::warn!("{}: {} points outside the domain or inside solids were skipped", what, rejected);
        }
        if added > 0 {
            self.grid_stale = true;
        }
        added
    }

    /// Fill a sphere with particles on a regular lattice of the given
    /// spacing. Returns the number of particles added.
    pub fn add_sphere(&mut self, center: Vec3, radius: f32, spacing: f32, velocity: Vec3) -> usize {
        if !(spacing > 0.0) || !(radius >= 0.0) {
            log::warn!("add_sphere: invalid radius {} or spacing {}", radius, spacing);
            return 0;
        }
        let n = (radius / spacing).floor() as i32;
        let points = (-n..=n).flat_map(move |k| {
            (-n..=n).flat_map(move |j| {
                (-n..=n).filter_map(move |i| {
                    let offset = Vec3::new(i as f32, j as f32, k as f32) * spacing;
                    (offset.length() <= radius).then_some(center + offset)
                })
            })
        });
        self.seed_points(points, velocity, "add_sphere")
    }

    /// Fill `[min, max]` with particles at cell centres of a lattice with the
    /// given spacing. Returns the number of particles added.
    pub fn add_box(&mut self, min: Vec3, max: Vec3, spacing: f32, velocity: Vec3) -> usize {
        if !(spacing > 0.0) || min.cmpgt(max).any() {
            log::warn!("add_box: invalid box {:?}..{:?} or spacing {}", min, max, spacing);
            return 0;
        }
        let counts = ((max - min) / spacing).floor().as_uvec3();
        let points = (0..counts.z).flat_map(move |k| {
            (0..counts.y).flat_map(move |j| {
                (0..counts.x).map(move |i| {
                    min + (Vec3::new(i as f32, j as f32, k as f32) + 0.5) * spacing
                })
            })
        });
        self.seed_points(points, velocity, "add_box")
    }

    /// Displace a range of particles by a uniform random offset in
    /// `[-amount, amount]` per axis.
    pub fn jitter_particles<R: Rng>(&mut self, range: Range<usize>, amount: f32, rng: &mut R) {
        let amount = amount.abs();
        let end = range.end.min(self.particles.len());
        for i in range.start..end {
            let offset = Vec3::new(
                rng.gen_range(-amount..=amount),
                rng.gen_range(-amount..=amount),
                rng.gen_range(-amount..=amount),
            );
            let p = self.particles.positions[i] + offset;
            if self.is_free(p) {
                self.particles.positions[i] = p;
                self.particles.predicted[i] = p;
            }
        }
        self.grid_stale = true;
    }

    /// Set the type tag of a range of particles.
    pub fn tag_particles(&mut self, range: Range<usize>, tag: u32) {
        let end = range.end.min(self.particles.len());
        let start = range.start.min(end);
        self.particles.tags[start..end].fill(tag);
    }

    /// Snapshot of all particles as `(position, velocity)` records.
    pub fn output_particles(&self) -> Vec<ParticleRecord> {
        self.particles.records()
    }

    /// Replace all particles with the given records. Non-finite records are
    /// skipped; returns the number loaded.
    pub fn input_particles(&mut self, records: &[ParticleRecord]) -> usize {
        self.particles = Particles::with_capacity(records.len());
        for r in records {
            if r.position.is_finite() && r.velocity.is_finite() {
                self.particles.push(r.position, r.velocity, 0);
            }
        }
        let skipped = records.len() - self.particles.len();
        if skipped > 0 {
            log::warn!("input_particles: skipped {} non-finite records", skipped);
        }
        self.grid_stale = true;
        self.particles.len()
    }

    /// Drop all particles and return to Idle. Solids are kept.
    pub fn reset(&mut self) {
        self.phase = SolverPhase::Resetting;
        self.particles.clear();
        self.contacts.clear();
        self.neighbor_counts.clear();
        self.grid.build(&[]);
        self.grid_stale = false;
        log::info!("solver reset");
        self.phase = SolverPhase::Idle;
    }

    /// (Re)generate boundary particles for all solids and the domain, if
    /// enabled in the environment.
    pub fn init_boundary(&mut self) -> Result<()> {
        self.boundary_dirty = false;
        self.boundary.clear();
        if self.env.boundary_particles {
            let mut all = self.solids.clone();
            all.push(self.domain.clone());
            self.boundary = boundary::generate(&all, self.env.particle_radius, &self.kernels)?;
        }
        self.boundary_grid.build(&self.boundary.positions);
        Ok(())
    }

    /// Density field of the current particle positions, for meshing.
    pub fn fluid_field(&mut self) -> FluidField<'_> {
        if self.grid_stale {
            self.grid.build(&self.particles.positions);
            self.grid_stale = false;
        }
        FluidField::new(&self.particles.positions, &self.grid, self.kernels, self.mass)
    }

    /// Step by the environment's `dt` and record the result.
    pub fn advance(&mut self, state: &mut SimulationState) -> StepStats {
        let dt = self.env.dt;
        let stats = self.step(dt);
        state.record_step(dt, &stats);
        stats
    }

    /// Density and neighbour count (self excluded) at `p`, where `grid`
    /// indexes `positions`.
    fn density_at(&self, positions: &[Vec3], p: Vec3) -> (f32, usize) {
        let k = &self.kernels;
        let rho0 = self.env.rest_density;
        let mut rho = 0.0;
        let mut count = 0usize;
        self.grid.for_each_neighbor(positions, p, k.h, |_, _, r2| {
            rho += self.mass * k.poly6(r2);
            count += 1;
        });
        self.boundary_grid
            .for_each_neighbor(&self.boundary.positions, p, k.h, |b, _, r2| {
                rho += rho0 * self.boundary.volumes[b] * k.poly6(r2);
                count += 1;
            });
        let count = count.saturating_sub(1);
        if count < MIN_NEIGHBORS {
            (rho0, count)
        } else {
            (rho, count)
        }
    }

    fn lambda_at(&self, positions: &[Vec3], i: usize, density: f32, neighbors: usize) -> f32 {
        let rho0 = self.env.rest_density;
        let c = density / rho0 - 1.0;
        if neighbors < MIN_NEIGHBORS || c <= 0.0 {
            return 0.0;
        }

        let k = &self.kernels;
        let scale = self.mass / rho0;
        let p = positions[i];
        let mut grad_i = Vec3::ZERO;
        let mut sum_grad_sq = 0.0;
        self.grid.for_each_neighbor(positions, p, k.h, |j, r_vec, r2| {
            if j != i {
                let grad_j = k.spiky_gradient(r_vec, r2.sqrt()) * scale;
                sum_grad_sq += grad_j.length_squared();
                grad_i += grad_j;
            }
        });
        // Boundary particles do not move, so only i's gradient sees them
        self.boundary_grid
            .for_each_neighbor(&self.boundary.positions, p, k.h, |b, r_vec, r2| {
                grad_i += k.spiky_gradient(r_vec, r2.sqrt()) * self.boundary.volumes[b];
            });
        sum_grad_sq += grad_i.length_squared();

        let epsilon = self.env.relaxation / k.h2;
        -c / (sum_grad_sq + epsilon)
    }

    fn delta_at(&self, positions: &[Vec3], lambdas: &[f32], i: usize) -> Vec3 {
        let k = &self.kernels;
        let ap = &self.env.artificial_pressure;
        let w_dq = k.poly6((ap.dq * k.h).powi(2));
        let p = positions[i];
        let lambda_i = lambdas[i];

        let mut delta = Vec3::ZERO;
        self.grid.for_each_neighbor(positions, p, k.h, |j, r_vec, r2| {
            if j == i {
                return;
            }
            let s_corr = if self.env.use_artificial_pressure && w_dq > 0.0 {
                -ap.k * (k.poly6(r2) / w_dq).powi(ap.n)
            } else {
                0.0
            };
            delta += k.spiky_gradient(r_vec, r2.sqrt()) * (lambda_i + lambdas[j] + s_corr);
        });
        delta *= self.mass / self.env.rest_density;

        if lambda_i != 0.0 {
            self.boundary_grid
                .for_each_neighbor(&self.boundary.positions, p, k.h, |b, r_vec, r2| {
                    delta += k.spiky_gradient(r_vec, r2.sqrt()) * (lambda_i * self.boundary.volumes[b]);
                });
        }
        delta
    }

    /// Advance the simulation by `dt`. Never fails: degenerate particles are
    /// repaired in place.
    pub fn step(&mut self, dt: f32) -> StepStats {
        let mut stats = StepStats::default();
        if !(dt > 0.0) || !dt.is_finite() {
            log::warn!("ignoring step with dt = {}", dt);
            return stats;
        }
        if self.boundary_dirty {
            if let Err(e) = self.init_boundary() {
                log::warn!("boundary particles disabled for this scene: {}", e);
                self.boundary.clear();
                self.boundary_grid.build(&[]);
            }
        }
        self.phase = SolverPhase::Stepping;
        let n = self.particles.len();
        let rho0 = self.env.rest_density;

        // 1. Neighbours and densities at the committed positions
        self.grid.build(&self.particles.positions);
        let committed: Vec<(f32, usize)> = {
            let positions = &self.particles.positions;
            positions.par_iter().map(|&p| self.density_at(positions, p)).collect()
        };
        for (i, (rho, _)) in committed.into_iter().enumerate() {
            self.particles.densities[i] = rho;
        }

        // 2. Prediction
        let gravity = self.env.gravity;
        {
            let Particles {
                positions,
                predicted,
                velocities,
                ..
            } = &mut self.particles;
            velocities
                .par_iter_mut()
                .zip(predicted.par_iter_mut())
                .zip(positions.par_iter())
                .for_each(|((v, x_star), &x)| {
                    *v += gravity * dt;
                    *x_star = x + *v * dt;
                });
        }
        self.contacts.clear();
        self.contacts.resize(n, None);
        self.resolve_collisions(&mut stats);

        // 3. Constraint projection
        let mut lambdas = vec![0.0f32; n];
        let mut density_error = 0.0;
        let mut passes = 0;
        while passes < self.env.max_iterations {
            self.grid.build(&self.particles.predicted);
            let estimates: Vec<(f32, usize)> = {
                let predicted = &self.particles.predicted;
                predicted.par_iter().map(|&p| self.density_at(predicted, p)).collect()
            };
            density_error = if n > 0 {
                estimates
                    .iter()
                    .map(|&(rho, _)| (rho / rho0 - 1.0).max(0.0))
                    .sum::<f32>()
                    / n as f32
            } else {
                0.0
            };
            if passes >= self.env.iterations && density_error <= self.env.eta {
                break;
            }

            lambdas = {
                let predicted = &self.particles.predicted;
                estimates
                    .par_iter()
                    .enumerate()
                    .map(|(i, &(rho, count))| self.lambda_at(predicted, i, rho, count))
                    .collect()
            };
            let deltas: Vec<Vec3> = {
                let predicted = &self.particles.predicted;
                (0..n)
                    .into_par_iter()
                    .map(|i| self.delta_at(predicted, &lambdas, i))
                    .collect()
            };

            self.neighbor_counts.clear();
            self.neighbor_counts.extend(estimates.iter().map(|&(_, c)| c));
            for (i, (rho, _)) in estimates.into_iter().enumerate() {
                self.particles.densities[i] = rho;
            }

            {
                let Particles {
                    positions,
                    predicted,
                    velocities,
                    ..
                } = &mut self.particles;
                for i in 0..n {
                    let x = predicted[i] + deltas[i];
                    if x.is_finite() {
                        predicted[i] = x;
                    } else {
                        predicted[i] = positions[i];
                        velocities[i] = Vec3::ZERO;
                        stats.nan_recoveries += 1;
                    }
                }
            }
            self.resolve_collisions(&mut stats);
            passes += 1;
        }
        stats.iterations = passes;
        stats.density_error = density_error;
        self.particles.lambdas = lambdas;

        // 4. Velocity update, contact velocity cleanup and commit
        self.finalize_velocities(dt, &mut stats);

        // 5. Boundary reaction forces from the last pass
        self.accumulate_boundary_forces(dt);

        // 6. Velocity smoothing on the committed positions
        self.grid.build(&self.particles.positions);
        self.grid_stale = false;
        if self.env.xsph_viscosity > 0.0 {
            self.apply_xsph();
        }
        if self.env.vorticity > 0.0 {
            self.apply_vorticity_confinement(dt);
        }

        self.particles.update_colors(self.env.color_mode, rho0);
        self.move_solids(dt);

        if stats.nan_recoveries > 0 {
            log::warn!("recovered {} particles with non-finite positions", stats.nan_recoveries);
        }
        log::trace!(
            "step: {} passes, density error {:.4}, {} contacts",
            stats.iterations,
            stats.density_error,
            stats.contacts
        );
        self.phase = SolverPhase::Idle;
        stats
    }

    /// Push penetrating predicted positions back to the surface of every
    /// solid and the domain, remembering the contact.
    fn resolve_collisions(&mut self, stats: &mut StepStats) {
        let radius = self.env.particle_radius;
        let solids = &self.solids;
        let domain = &self.domain;
        let Particles {
            positions,
            predicted,
            velocities,
            ..
        } = &mut self.particles;

        let recovered: usize = predicted
            .par_iter_mut()
            .zip(self.contacts.par_iter_mut())
            .zip(velocities.par_iter_mut())
            .zip(positions.par_iter())
            .map(|(((x_star, contact), v), &x)| {
                for solid in solids.iter().chain(std::iter::once(domain)) {
                    let info = solid.distance(*x_star, radius);
                    if info.is_penetrating() {
                        *x_star = info.contact;
                        *contact = Some(Contact {
                            normal: info.normal,
                            velocity: info.velocity,
                        });
                    }
                }
                if x_star.is_finite() {
                    0
                } else {
                    *x_star = x;
                    *v = Vec3::ZERO;
                    1
                }
            })
            .sum();
        stats.nan_recoveries += recovered;
    }

    fn finalize_velocities(&mut self, dt: f32, stats: &mut StepStats) {
        let restitution = self.env.restitution;
        let inv_dt = 1.0 / dt;
        let Particles {
            positions,
            predicted,
            velocities,
            on_boundary,
            ..
        } = &mut self.particles;

        let (recovered, contacts) = positions
            .par_iter_mut()
            .zip(predicted.par_iter_mut())
            .zip(velocities.par_iter_mut())
            .zip(on_boundary.par_iter_mut())
            .zip(self.contacts.par_iter())
            .map(|((((x, x_star), v), touching), contact)| {
                let mut new_v = (*x_star - *x) * inv_dt;
                if let Some(c) = contact {
                    let relative = new_v - c.velocity;
                    let vn = relative.dot(c.normal);
                    if vn < 0.0 {
                        new_v -= (1.0 + restitution) * vn * c.normal;
                    }
                }
                *touching = contact.is_some();

                if x_star.is_finite() && new_v.is_finite() {
                    *v = new_v;
                    *x = *x_star;
                    (0usize, contact.is_some() as usize)
                } else {
                    *x_star = *x;
                    *v = Vec3::ZERO;
                    (1, 0)
                }
            })
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
        stats.nan_recoveries += recovered;
        stats.contacts = contacts;
    }

    /// Reaction of every boundary particle to the last pass's corrections,
    /// as a force (`-m dx / dt^2`).
    fn accumulate_boundary_forces(&mut self, dt: f32) {
        let k = &self.kernels;
        let factor = -self.mass / (dt * dt);
        let BoundaryParticles {
            positions: boundary_positions,
            volumes,
            forces,
            ..
        } = &mut self.boundary;
        forces.iter_mut().for_each(|f| *f = Vec3::ZERO);
        if boundary_positions.is_empty() {
            return;
        }

        let predicted = &self.particles.predicted;
        for (i, &lambda) in self.particles.lambdas.iter().enumerate() {
            if lambda == 0.0 {
                continue;
            }
            self.boundary_grid
                .for_each_neighbor(boundary_positions, predicted[i], k.h, |b, r_vec, r2| {
                    // r_vec = x_i - x_b
                    forces[b] += k.spiky_gradient(r_vec, r2.sqrt()) * (factor * lambda * volumes[b]);
                });
        }
    }

    /// XSPH: blend each velocity toward its neighbourhood average.
    fn apply_xsph(&mut self) {
        let k = &self.kernels;
        let c = self.env.xsph_viscosity;
        let positions = &self.particles.positions;
        let velocities = &self.particles.velocities;
        let densities = &self.particles.densities;
        let smoothed: Vec<Vec3> = (0..positions.len())
            .into_par_iter()
            .map(|i| {
                let mut acc = Vec3::ZERO;
                self.grid.for_each_neighbor(positions, positions[i], k.h, |j, _, r2| {
                    if j != i {
                        let volume = self.mass / densities[j].max(f32::EPSILON);
                        acc += (velocities[j] - velocities[i]) * (volume * k.poly6(r2));
                    }
                });
                velocities[i] + c * acc
            })
            .collect();
        self.particles.velocities = smoothed;
    }

    /// Re-inject rotational energy lost to damping:
    /// `f = eps (N x omega)`, `N = grad|omega| / |grad|omega||`.
    fn apply_vorticity_confinement(&mut self, dt: f32) {
        let k = &self.kernels;
        let strength = self.env.vorticity;
        let positions = &self.particles.positions;
        let velocities = &self.particles.velocities;
        let n = positions.len();

        // Pass A: vorticity
        let omegas: Vec<Vec3> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut omega = Vec3::ZERO;
                self.grid.for_each_neighbor(positions, positions[i], k.h, |j, r_vec, r2| {
                    if j != i {
                        let grad = k.spiky_gradient(r_vec, r2.sqrt());
                        omega += (velocities[j] - velocities[i]).cross(grad);
                    }
                });
                omega
            })
            .collect();

        // Pass B: confinement force
        let forces: Vec<Vec3> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut eta = Vec3::ZERO;
                self.grid.for_each_neighbor(positions, positions[i], k.h, |j, r_vec, r2| {
                    if j != i {
                        let grad = k.spiky_gradient(r_vec, r2.sqrt());
                        eta += grad * (omegas[j].length() - omegas[i].length());
                    }
                });
                let len = eta.length();
                if len > 1e-6 {
                    (eta / len).cross(omegas[i]) * strength
                } else {
                    Vec3::ZERO
                }
            })
            .collect();

        for (v, f) in self.particles.velocities.iter_mut().zip(forces) {
            *v += f * dt;
        }
    }

    /// Advance moving solids and carry their boundary particles along.
    fn move_solids(&mut self, dt: f32) {
        let mut moved = false;
        for (id, solid) in self.solids.iter_mut().enumerate() {
            if solid.fixed || solid.velocity == Vec3::ZERO {
                continue;
            }
            solid.advance(dt);
            let shift = solid.velocity * dt;
            for (p, _) in self
                .boundary
                .positions
                .iter_mut()
                .zip(&self.boundary.solid_ids)
                .filter(|&(_, &sid)| sid == id)
            {
                *p += shift;
            }
            moved = true;
        }
        if moved {
            self.boundary_grid.build(&self.boundary.positions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_env() -> Environment {
        Environment {
            domain_min: Vec3::splat(-0.3),
            domain_max: Vec3::splat(0.3),
            ..Environment::default()
        }
    }

    #[test]
    fn test_invalid_environment_rejected() {
        let env = Environment {
            dt: -1.0,
            ..Environment::default()
        };
        assert!(PbfSolver::new(env).is_err());
    }

    #[test]
    fn test_mass_reproduces_rest_density_on_lattice() {
        let mut solver = PbfSolver::new(small_env()).unwrap();
        let spacing = solver.environment().particle_spacing();
        solver.add_box(Vec3::splat(-0.1), Vec3::splat(0.1), spacing, Vec3::ZERO);
        let positions = solver.positions().to_vec();
        // Particle closest to the block centre has a full neighbourhood
        let centre = positions
            .iter()
            .copied()
            .min_by(|a, b| a.length().total_cmp(&b.length()))
            .unwrap();
        let field = solver.fluid_field();
        let rho = crate::implicit::ScalarField::value(&field, centre);
        let rho0 = small_env().rest_density;
        assert!((rho - rho0).abs() < 1e-3 * rho0, "rho = {}", rho);
    }

    #[test]
    fn test_add_box_rejects_outside_domain() {
        let mut solver = PbfSolver::new(small_env()).unwrap();
        let spacing = 0.04;
        // Half of this box is outside the domain
        let added = solver.add_box(Vec3::new(0.14, -0.1, -0.1), Vec3::new(0.46, 0.1, 0.1), spacing, Vec3::ZERO);
        assert_eq!(added, 4 * 5 * 5);
        assert!(solver.positions().iter().all(|p| p.x < 0.3));
    }

    #[test]
    fn test_add_sphere_counts() {
        let mut solver = PbfSolver::new(small_env()).unwrap();
        let added = solver.add_sphere(Vec3::ZERO, 0.04, 0.04, Vec3::X);
        // Centre plus the six axis neighbours
        assert_eq!(added, 7);
        assert!(solver.velocities().iter().all(|v| *v == Vec3::X));
    }

    #[test]
    fn test_isolated_particle_takes_rest_density() {
        let mut solver = PbfSolver::new(small_env()).unwrap();
        solver.add_sphere(Vec3::ZERO, 0.0, 0.04, Vec3::ZERO);
        let stats = solver.step(0.005);
        assert_eq!(solver.densities()[0], small_env().rest_density);
        assert_eq!(solver.particles().lambdas[0], 0.0);
        assert_eq!(stats.density_error, 0.0);
    }

    #[test]
    fn test_reset_clears_particles() {
        let mut solver = PbfSolver::new(small_env()).unwrap();
        solver.add_sphere(Vec3::ZERO, 0.08, 0.04, Vec3::ZERO);
        assert!(solver.num_particles() > 0);
        solver.reset();
        assert_eq!(solver.num_particles(), 0);
        assert_eq!(solver.phase(), SolverPhase::Idle);
        let stats = solver.step(0.005);
        assert_eq!(stats.contacts, 0);
    }

    #[test]
    fn test_non_finite_input_skipped() {
        let mut solver = PbfSolver::new(small_env()).unwrap();
        let records = [
            ParticleRecord {
                position: Vec3::ZERO,
                velocity: Vec3::Y,
            },
            ParticleRecord {
                position: Vec3::splat(f32::NAN),
                velocity: Vec3::ZERO,
            },
        ];
        assert_eq!(solver.input_particles(&records), 1);
        assert_eq!(solver.output_particles()[0].velocity, Vec3::Y);
    }

    #[test]
    fn test_iteration_bounds() {
        let env = Environment {
            iterations: 2,
            max_iterations: 6,
            eta: 0.0,
            ..small_env()
        };
        let mut solver = PbfSolver::new(env).unwrap();
        let spacing = solver.environment().particle_spacing();
        // Compressed block: spacing 0.7x rest
        solver.add_box(Vec3::splat(-0.08), Vec3::splat(0.08), 0.7 * spacing, Vec3::ZERO);
        let stats = solver.step(0.005);
        assert!(stats.iterations >= 2 && stats.iterations <= 6, "{:?}", stats);

        let env = Environment {
            iterations: 3,
            max_iterations: 3,
            ..small_env()
        };
        let mut solver = PbfSolver::new(env).unwrap();
        solver.add_box(Vec3::splat(-0.08), Vec3::splat(0.08), 0.7 * spacing, Vec3::ZERO);
        assert_eq!(solver.step(0.005).iterations, 3);
    }
}

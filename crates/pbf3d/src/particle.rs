//! Particle storage for the position-based solver.
//!
//! Fluid particles are kept as a structure of arrays so each attribute can
//! be handed to a renderer or GPU buffer as one contiguous slice.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// How particle colours are derived after each step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// Leave colours untouched
    None,
    /// Blue (sparse) to white (compressed) by density ratio
    #[default]
    Density,
    /// Gradient over spawn order, for watching particles mix
    Ramp,
}

/// One `(position, velocity)` record of a particle snapshot.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Fluid particles (structure of arrays).
#[derive(Clone, Debug, Default)]
pub struct Particles {
    pub positions: Vec<Vec3>,
    /// Positions being corrected during the constraint passes
    pub predicted: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub densities: Vec<f32>,
    /// Constraint multipliers from the last pass
    pub lambdas: Vec<f32>,
    pub colors: Vec<[f32; 4]>,
    /// Index of the scene fluid region that spawned the particle (0 when
    /// added directly)
    pub tags: Vec<u32>,
    /// Touching a solid at the end of the last step
    pub on_boundary: Vec<bool>,
}

impl Particles {
    /// Create an empty particle collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            predicted: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
            densities: Vec::with_capacity(capacity),
            lambdas: Vec::with_capacity(capacity),
            colors: Vec::with_capacity(capacity),
            tags: Vec::with_capacity(capacity),
            on_boundary: Vec::with_capacity(capacity),
        }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Add a particle with the given position, velocity and tag.
    pub fn push(&mut self, position: Vec3, velocity: Vec3, tag: u32) {
        self.positions.push(position);
        self.predicted.push(position);
        self.velocities.push(velocity);
        self.densities.push(0.0);
        self.lambdas.push(0.0);
        self.colors.push([0.0, 0.0, 1.0, 1.0]);
        self.tags.push(tag);
        self.on_boundary.push(false);
    }

    /// Remove all particles.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.predicted.clear();
        self.velocities.clear();
        self.densities.clear();
        self.lambdas.clear();
        self.colors.clear();
        self.tags.clear();
        self.on_boundary.clear();
    }

    /// Axis-aligned bounds of all finite positions.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut iter = self.positions.iter().filter(|p| p.is_finite());
        let first = *iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p))))
    }

    /// Position/velocity pairs for snapshot output.
    pub fn records(&self) -> Vec<ParticleRecord> {
        self.positions
            .iter()
            .zip(&self.velocities)
            .map(|(&position, &velocity)| ParticleRecord { position, velocity })
            .collect()
    }

    /// Raw position buffer for GPU upload.
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Recolour particles from their current state.
    pub fn update_colors(&mut self, mode: ColorMode, rest_density: f32) {
        match mode {
            ColorMode::None => {}
            ColorMode::Density => {
                for (color, &rho) in self.colors.iter_mut().zip(&self.densities) {
                    *color = ramp((rho / rest_density - 0.5).clamp(0.0, 1.0));
                }
            }
            ColorMode::Ramp => {
                let n = self.len().max(2) as f32 - 1.0;
                for (i, color) in self.colors.iter_mut().enumerate() {
                    *color = ramp(i as f32 / n);
                }
            }
        }
    }
}

/// Blue → cyan → white colour ramp for t in [0, 1].
fn ramp(t: f32) -> [f32; 4] {
    if t < 0.5 {
        let s = t * 2.0;
        [0.0, s, 1.0, 1.0]
    } else {
        let s = (t - 0.5) * 2.0;
        [s, 1.0, 1.0, 1.0]
    }
}

/// Static particles sampled on a solid surface.
///
/// They take part in the density sum with a per-particle volume weight so
/// fluid next to a wall does not see a density deficit.
#[derive(Clone, Debug, Default)]
pub struct BoundaryParticles {
    pub positions: Vec<Vec3>,
    /// Surface normal (into free space) at each particle
    pub normals: Vec<Vec3>,
    /// Volume weight psi (rest-density-scaled particle volume)
    pub volumes: Vec<f32>,
    /// Index of the solid each particle was sampled from
    pub solid_ids: Vec<usize>,
    /// Contact force exerted by the fluid during the last step
    pub forces: Vec<Vec3>,
}

impl BoundaryParticles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push(&mut self, position: Vec3, normal: Vec3, solid_id: usize) {
        self.positions.push(position);
        self.normals.push(normal);
        self.volumes.push(0.0);
        self.solid_ids.push(solid_id);
        self.forces.push(Vec3::ZERO);
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.volumes.clear();
        self.solid_ids.clear();
        self.forces.clear();
    }

    /// Sum of contact forces on one solid.
    pub fn total_force(&self, solid_id: usize) -> Vec3 {
        self.forces
            .iter()
            .zip(&self.solid_ids)
            .filter(|&(_, &id)| id == solid_id)
            .map(|(f, _)| *f)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_arrays_in_sync() {
        let mut p = Particles::new();
        p.push(Vec3::ONE, Vec3::X, 3);
        p.push(Vec3::ZERO, Vec3::ZERO, 0);
        assert_eq!(p.len(), 2);
        assert_eq!(p.predicted.len(), 2);
        assert_eq!(p.lambdas.len(), 2);
        assert_eq!(p.tags, vec![3, 0]);
        p.clear();
        assert!(p.is_empty() && p.colors.is_empty() && p.on_boundary.is_empty());
    }

    #[test]
    fn test_bounds_skip_non_finite() {
        let mut p = Particles::new();
        assert!(p.bounds().is_none());
        p.push(Vec3::new(1.0, -2.0, 0.0), Vec3::ZERO, 0);
        p.push(Vec3::new(-1.0, 3.0, 0.5), Vec3::ZERO, 0);
        p.push(Vec3::splat(f32::NAN), Vec3::ZERO, 0);
        let (lo, hi) = p.bounds().unwrap();
        assert_eq!(lo, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(hi, Vec3::new(1.0, 3.0, 0.5));
    }

    #[test]
    fn test_records_and_bytes() {
        let mut p = Particles::new();
        p.push(Vec3::ONE, Vec3::Y, 0);
        let rec = p.records();
        assert_eq!(rec[0].velocity, Vec3::Y);
        assert_eq!(p.position_bytes().len(), 12);
    }

    #[test]
    fn test_density_colors() {
        let mut p = Particles::new();
        p.push(Vec3::ZERO, Vec3::ZERO, 0);
        p.push(Vec3::ONE, Vec3::ZERO, 0);
        p.densities = vec![0.0, 2000.0];
        p.update_colors(ColorMode::Density, 1000.0);
        assert_eq!(p.colors[0], [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(p.colors[1], [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_boundary_force_per_solid() {
        let mut b = BoundaryParticles::new();
        b.push(Vec3::ZERO, Vec3::Y, 0);
        b.push(Vec3::X, Vec3::Y, 1);
        b.push(Vec3::Z, Vec3::Y, 0);
        b.forces = vec![Vec3::Y, Vec3::X, Vec3::Y];
        assert_eq!(b.total_force(0), Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(b.total_force(1), Vec3::X);
    }
}

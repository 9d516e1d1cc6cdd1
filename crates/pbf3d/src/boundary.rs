//! Boundary particles sampled from solid surfaces.
//!
//! Each solid's implicit field is meshed at particle spacing with the surface
//! pushed one particle radius into the solid; the mesh vertices become
//! static particles. Their volume weights follow Akinci et al. 2012:
//! `V_b = 1 / Σ_k W(x_b - x_k)` over neighbouring boundary particles.

use glam::Vec3;

use crate::error::{PbfError, Result};
use crate::grid::SpatialGrid;
use crate::implicit::{LatticeSpec, ScalarLattice, SolidField};
use crate::kernels::SphKernels;
use crate::marching_cubes::{CpuMesher, MeshExtractor};
use crate::particle::BoundaryParticles;
use crate::solid::{DistanceField, Solid};

/// Upper bound on sampling lattice nodes per solid.
const MAX_SAMPLE_NODES: usize = 1 << 24;

/// Surface points and free-space normals of one solid, spaced about
/// `2 * particle_radius` apart and `particle_radius` inside the solid.
pub fn sample_surface(solid: &Solid, particle_radius: f32) -> Result<Vec<(Vec3, Vec3)>> {
    let spacing = 2.0 * particle_radius;
    let (lo, hi) = solid.bounds();
    let pad = Vec3::splat(2.0 * spacing);
    let origin = lo - pad;
    let extent = hi + pad - origin;
    let counts = extent
        .to_array()
        .map(|l| (l / spacing).ceil() as usize + 1);
    let spec = LatticeSpec::new(origin, Vec3::splat(spacing), counts)?;
    if spec.node_count() > MAX_SAMPLE_NODES {
        return Err(PbfError::InvalidConfig(format!(
            "boundary sampling lattice {:?} too large for particle radius {}",
            counts, particle_radius
        )));
    }

    let field = SolidField::new(solid, particle_radius);
    let lattice = ScalarLattice::sample(spec, &field)?;
    let mesh = CpuMesher::new().create_mesh(&lattice, 0.0)?;

    Ok(mesh
        .vertices
        .iter()
        .map(|&p| (p, solid.distance(p, 0.0).normal))
        .collect())
}

/// Fill in the volume weights of all boundary particles.
pub fn compute_volumes(boundary: &mut BoundaryParticles, kernels: &SphKernels) {
    let grid = SpatialGrid::with_positions(&boundary.positions, kernels.h);
    let positions = &boundary.positions;
    for (b, volume) in boundary.volumes.iter_mut().enumerate() {
        let mut delta = 0.0;
        grid.for_each_neighbor(positions, positions[b], kernels.h, |_, _, r2| {
            delta += kernels.poly6(r2);
        });
        // The self term keeps delta positive
        *volume = 1.0 / delta.max(f32::EPSILON);
    }
}

/// Boundary particles for a list of solids, `solid_ids` indexing into it.
pub fn generate(solids: &[Solid], particle_radius: f32, kernels: &SphKernels) -> Result<BoundaryParticles> {
    let mut boundary = BoundaryParticles::new();
    for (id, solid) in solids.iter().enumerate() {
        let points = sample_surface(solid, particle_radius)?;
        log::debug!("solid {}: {} boundary particles", id, points.len());
        for (p, n) in points {
            boundary.push(p, n, id);
        }
    }
    compute_volumes(&mut boundary, kernels);
    log::info!(
        "generated {} boundary particles for {} solids",
        boundary.len(),
        solids.len()
    );
    Ok(boundary)
}

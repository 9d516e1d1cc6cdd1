//! Implicit scalar fields and their sampling onto regular lattices.
//!
//! A lattice stores node values with x varying fastest, then y, then z.
//! Meshers read the lattice; they never evaluate the field directly.

use glam::{UVec3, Vec3};
use rayon::prelude::*;

use crate::error::{PbfError, Result};
use crate::grid::SpatialGrid;
use crate::kernels::SphKernels;
use crate::solid::DistanceField;

/// Anything that can be evaluated at a point in space.
pub trait ScalarField: Sync {
    fn value(&self, p: Vec3) -> f32;
}

impl<F: Fn(Vec3) -> f32 + Sync> ScalarField for F {
    fn value(&self, p: Vec3) -> f32 {
        self(p)
    }
}

/// Geometry of a sampling lattice: node `(i, j, k)` sits at
/// `origin + (i, j, k) * width`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatticeSpec {
    pub origin: Vec3,
    /// Cell width per axis
    pub width: Vec3,
    /// Node count per axis
    pub counts: [usize; 3],
}

impl LatticeSpec {
    pub fn new(origin: Vec3, width: Vec3, counts: [usize; 3]) -> Result<Self> {
        let spec = Self {
            origin,
            width,
            counts,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        let bad_width = !self.width.is_finite() || self.width.min_element() <= 0.0;
        if self.counts.contains(&0) || bad_width || !self.origin.is_finite() {
            return Err(PbfError::InvalidLattice {
                counts: self.counts,
                width: self.width.to_array(),
            });
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.counts[0] * self.counts[1] * self.counts[2]
    }

    /// Number of cubes (one less than nodes on each axis).
    pub fn cell_counts(&self) -> [usize; 3] {
        self.counts.map(|n| n.saturating_sub(1))
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.counts[1] + j) * self.counts[0] + i
    }

    #[inline]
    pub fn node_position(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.origin + UVec3::new(i as u32, j as u32, k as u32).as_vec3() * self.width
    }

    /// Far corner of the lattice.
    pub fn max_corner(&self) -> Vec3 {
        self.node_position(self.counts[0] - 1, self.counts[1] - 1, self.counts[2] - 1)
    }
}

/// Cubic lattice covering `[min, max]` with `max_n` cells along the longest
/// axis. The bounds are first grown by `margin` times their extent (half on
/// each side).
pub fn mesh_lattice_for_bounds(min: Vec3, max: Vec3, max_n: usize, margin: f32) -> Result<LatticeSpec> {
    let extent = max - min;
    let longest = extent.max_element();
    if max_n == 0 || !longest.is_finite() || longest <= 0.0 || extent.min_element() < 0.0 {
        return Err(PbfError::InvalidLattice {
            counts: [max_n; 3],
            width: extent.to_array(),
        });
    }

    let origin = min - 0.5 * margin * extent;
    let extent = extent * (1.0 + margin);
    let h = extent.max_element() / max_n as f32;
    // The small bias keeps the longest axis at exactly max_n cells
    let counts = extent
        .to_array()
        .map(|l| ((l / h - 1e-4).ceil() as usize).max(1) + 1);
    LatticeSpec::new(origin, Vec3::splat(h), counts)
}

/// Dense node values of a sampled field.
#[derive(Clone, Debug)]
pub struct ScalarLattice {
    pub spec: LatticeSpec,
    pub values: Vec<f32>,
}

impl ScalarLattice {
    /// Evaluate `field` at every node, one z-slab per rayon task.
    pub fn sample<F: ScalarField + ?Sized>(spec: LatticeSpec, field: &F) -> Result<Self> {
        spec.validate()?;
        let [nx, ny, _] = spec.counts;
        let mut values = vec![0.0f32; spec.node_count()];
        values
            .par_chunks_mut(nx * ny)
            .enumerate()
            .for_each(|(k, slab)| {
                for j in 0..ny {
                    for i in 0..nx {
                        slab[j * nx + i] = field.value(spec.node_position(i, j, k));
                    }
                }
            });
        Ok(Self { spec, values })
    }

    /// Wrap precomputed values.
    pub fn from_values(spec: LatticeSpec, values: Vec<f32>) -> Result<Self> {
        spec.validate()?;
        if values.len() != spec.node_count() {
            return Err(PbfError::InvalidLattice {
                counts: spec.counts,
                width: spec.width.to_array(),
            });
        }
        Ok(Self { spec, values })
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f32 {
        self.values[self.spec.index(i, j, k)]
    }

    /// Central-difference gradient at a node, one-sided on the lattice faces.
    pub fn gradient(&self, i: usize, j: usize, k: usize) -> Vec3 {
        let [nx, ny, nz] = self.spec.counts;
        let diff = |lo: f32, hi: f32, span: usize, w: f32| {
            if span == 0 {
                0.0
            } else {
                (hi - lo) / (span as f32 * w)
            }
        };

        let (x0, x1) = (i.saturating_sub(1), (i + 1).min(nx - 1));
        let (y0, y1) = (j.saturating_sub(1), (j + 1).min(ny - 1));
        let (z0, z1) = (k.saturating_sub(1), (k + 1).min(nz - 1));
        let w = self.spec.width;
        Vec3::new(
            diff(self.get(x0, j, k), self.get(x1, j, k), x1 - x0, w.x),
            diff(self.get(i, y0, k), self.get(i, y1, k), y1 - y0, w.y),
            diff(self.get(i, j, z0), self.get(i, j, z1), z1 - z0, w.z),
        )
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.values
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }
}

/// Particle density field `Σ m W(x - x_j) - iso_offset`.
///
/// `grid` must index `positions` with a cell size of at least `h`.
pub struct FluidField<'a> {
    positions: &'a [Vec3],
    grid: &'a SpatialGrid,
    kernels: SphKernels,
    mass: f32,
    pub iso_offset: f32,
}

impl<'a> FluidField<'a> {
    pub fn new(positions: &'a [Vec3], grid: &'a SpatialGrid, kernels: SphKernels, mass: f32) -> Self {
        Self {
            positions,
            grid,
            kernels,
            mass,
            iso_offset: 0.0,
        }
    }

    pub fn with_iso_offset(mut self, iso_offset: f32) -> Self {
        self.iso_offset = iso_offset;
        self
    }
}

impl ScalarField for FluidField<'_> {
    fn value(&self, p: Vec3) -> f32 {
        let mut rho = 0.0;
        self.grid
            .for_each_neighbor(self.positions, p, self.kernels.h, |_, _, r2| {
                rho += self.mass * self.kernels.poly6(r2);
            });
        rho - self.iso_offset
    }
}

/// Signed distance of a solid shifted by `offset`; zero on the offset surface,
/// negative inside the solid.
pub struct SolidField<'a> {
    solid: &'a dyn DistanceField,
    pub offset: f32,
}

impl<'a> SolidField<'a> {
    pub fn new(solid: &'a dyn DistanceField, offset: f32) -> Self {
        Self { solid, offset }
    }
}

impl ScalarField for SolidField<'_> {
    fn value(&self, p: Vec3) -> f32 {
        self.solid.implicit(p) + self.offset
    }
}

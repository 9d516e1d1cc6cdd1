//! Uniform grid for neighbour search.
//!
//! Particles are bucketed by `floor(position / cell_size)` into per-cell
//! linked lists (`heads` / `next`), dense over the bounding box of the
//! indexed points. The grid is rebuilt from scratch every step.

use glam::{IVec3, Vec3};

/// Cell coordinates are clamped to this range so a stray far-away point
/// cannot blow up the dense cell array.
const MAX_CELL_COORD: i32 = 1 << 20;

#[derive(Clone, Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    /// Cell coordinate of the first stored cell
    origin: IVec3,
    /// Number of cells per axis
    dims: IVec3,
    /// First particle in each cell, -1 when empty
    heads: Vec<i32>,
    /// Next particle in the same cell, -1 at the end of the list
    next: Vec<i32>,
    indexed: usize,
    occupied: usize,
}

impl SpatialGrid {
    /// Create an empty grid with the given cell edge length.
    pub fn new(cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive, got {}", cell_size);
        Self {
            cell_size,
            origin: IVec3::ZERO,
            dims: IVec3::ZERO,
            heads: Vec::new(),
            next: Vec::new(),
            indexed: 0,
            occupied: 0,
        }
    }

    /// Build a grid over the given positions.
    pub fn with_positions(positions: &[Vec3], cell_size: f32) -> Self {
        let mut grid = Self::new(cell_size);
        grid.build(positions);
        grid
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Change the cell size; takes effect on the next `build`.
    pub fn set_cell_size(&mut self, cell_size: f32) {
        assert!(cell_size > 0.0, "cell_size must be positive, got {}", cell_size);
        self.cell_size = cell_size;
    }

    /// Integer cell containing `p`.
    #[inline]
    pub fn cell_of(&self, p: Vec3) -> IVec3 {
        let c = (p / self.cell_size).floor();
        IVec3::new(
            (c.x as i32).clamp(-MAX_CELL_COORD, MAX_CELL_COORD),
            (c.y as i32).clamp(-MAX_CELL_COORD, MAX_CELL_COORD),
            (c.z as i32).clamp(-MAX_CELL_COORD, MAX_CELL_COORD),
        )
    }

    /// Number of indexed particles.
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    /// Number of cells holding at least one particle.
    pub fn occupied_cells(&self) -> usize {
        self.occupied
    }

    #[inline]
    fn linear_index(&self, cell: IVec3) -> Option<usize> {
        let local = cell - self.origin;
        if local.x < 0
            || local.y < 0
            || local.z < 0
            || local.x >= self.dims.x
            || local.y >= self.dims.y
            || local.z >= self.dims.z
        {
            return None;
        }
        Some(
            (local.z as usize * self.dims.y as usize + local.y as usize) * self.dims.x as usize
                + local.x as usize,
        )
    }

    /// Rebuild the buckets over `positions`. Non-finite positions are not
    /// indexed. Runs in O(n + cells of the bounding box).
    pub fn build(&mut self, positions: &[Vec3]) {
        self.next.clear();
        self.next.resize(positions.len(), -1);
        self.indexed = 0;
        self.occupied = 0;

        let mut min = IVec3::splat(i32::MAX);
        let mut max = IVec3::splat(i32::MIN);
        for p in positions.iter().filter(|p| p.is_finite()) {
            let c = self.cell_of(*p);
            min = min.min(c);
            max = max.max(c);
        }

        if min.x > max.x {
            self.origin = IVec3::ZERO;
            self.dims = IVec3::ZERO;
            self.heads.clear();
            return;
        }

        self.origin = min;
        self.dims = max - min + IVec3::ONE;
        let cell_count = self.dims.x as usize * self.dims.y as usize * self.dims.z as usize;
        self.heads.clear();
        self.heads.resize(cell_count, -1);

        for (i, p) in positions.iter().enumerate() {
            if !p.is_finite() {
                continue;
            }
            if let Some(cell) = self.linear_index(self.cell_of(*p)) {
                if self.heads[cell] == -1 {
                    self.occupied += 1;
                }
                self.next[i] = self.heads[cell];
                self.heads[cell] = i as i32;
                self.indexed += 1;
            }
        }
    }

    /// Particles stored in a single cell.
    pub fn cell_particles(&self, cell: IVec3) -> CellIter<'_> {
        let head = self.linear_index(cell).map_or(-1, |c| self.heads[c]);
        CellIter {
            next: &self.next,
            current: head,
        }
    }

    /// Visit every particle whose cell lies within `ceil(radius / cell_size)`
    /// cells of the query cell on each axis. This is a candidate set: the
    /// caller does the exact distance test.
    pub fn for_each_candidate<F: FnMut(usize)>(&self, p: Vec3, radius: f32, mut f: F) {
        if self.indexed == 0 || !p.is_finite() {
            return;
        }
        let reach = (radius.max(0.0) / self.cell_size).ceil() as i32;
        let center = self.cell_of(p);
        let lo = (center - IVec3::splat(reach)).max(self.origin);
        let hi = (center + IVec3::splat(reach)).min(self.origin + self.dims - IVec3::ONE);

        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    for j in self.cell_particles(IVec3::new(x, y, z)) {
                        f(j);
                    }
                }
            }
        }
    }

    /// Collect the candidate set for a query.
    pub fn query(&self, p: Vec3, radius: f32) -> Vec<usize> {
        let mut out = Vec::new();
        self.for_each_candidate(p, radius, |j| out.push(j));
        out
    }

    /// Visit candidates that are strictly within `radius` of `p`, passing the
    /// index, `p - positions[j]` and its squared length.
    #[inline]
    pub fn for_each_neighbor<F: FnMut(usize, Vec3, f32)>(
        &self,
        positions: &[Vec3],
        p: Vec3,
        radius: f32,
        mut f: F,
    ) {
        let r2_max = radius * radius;
        self.for_each_candidate(p, radius, |j| {
            let r_vec = p - positions[j];
            let r2 = r_vec.length_squared();
            if r2 < r2_max {
                f(j, r_vec, r2);
            }
        });
    }
}

/// Iterator over the linked list of one cell.
pub struct CellIter<'a> {
    next: &'a [i32],
    current: i32,
}

impl Iterator for CellIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.current < 0 {
            return None;
        }
        let i = self.current as usize;
        self.current = self.next[i];
        Some(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_grid() {
        let grid = SpatialGrid::with_positions(&[], 0.5);
        assert!(grid.is_empty());
        assert_eq!(grid.occupied_cells(), 0);
        assert!(grid.query(Vec3::ZERO, 1.0).is_empty());
    }

    #[test]
    fn test_every_particle_in_exactly_one_cell() {
        let positions = vec![
            Vec3::new(0.1, 0.1, 0.1),
            Vec3::new(0.6, 0.1, 0.1),
            Vec3::new(-0.4, 2.3, 0.9),
            Vec3::new(0.15, 0.12, 0.11),
        ];
        let grid = SpatialGrid::with_positions(&positions, 0.5);
        assert_eq!(grid.len(), 4);
        assert_eq!(grid.occupied_cells(), 3);

        for (i, p) in positions.iter().enumerate() {
            let cell = grid.cell_of(*p);
            let found: Vec<usize> = grid.cell_particles(cell).collect();
            assert!(found.contains(&i), "particle {} missing from its cell", i);
        }
    }

    #[test]
    fn test_negative_coordinates_use_floor() {
        let grid = SpatialGrid::new(1.0);
        assert_eq!(grid.cell_of(Vec3::new(-0.5, 0.5, -1.0)), IVec3::new(-1, 0, -1));
    }

    #[test]
    fn test_boundary_particle_found_from_adjacent_cell() {
        // Particle exactly on the x = 1.0 cell face belongs to cell 1
        let positions = vec![Vec3::new(1.0, 0.5, 0.5)];
        let grid = SpatialGrid::with_positions(&positions, 1.0);
        assert_eq!(grid.cell_of(positions[0]).x, 1);
        let found = grid.query(Vec3::new(0.99, 0.5, 0.5), 0.05);
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn test_non_finite_positions_skipped() {
        let positions = vec![Vec3::ONE, Vec3::splat(f32::NAN)];
        let grid = SpatialGrid::with_positions(&positions, 0.5);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.query(Vec3::ONE, 0.5), vec![0]);
    }

    #[test]
    fn test_large_radius_reaches_far_cells() {
        let positions = vec![Vec3::ZERO, Vec3::new(2.2, 0.0, 0.0)];
        let grid = SpatialGrid::with_positions(&positions, 0.5);
        let mut found = grid.query(Vec3::ZERO, 2.5);
        found.sort_unstable();
        assert_eq!(found, vec![0, 1]);
    }
}

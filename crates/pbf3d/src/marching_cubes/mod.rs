//! Marching Cubes surface extraction from a sampled scalar lattice.
//!
//! Two interchangeable backends implement [`MeshExtractor`]:
//! - [`CpuMesher`]: sequential reference path with a hashed edge cache
//! - [`ParallelMesher`]: classify / scan / generate over z-slabs with rayon,
//!   bounded by a vertex capacity
//!
//! A corner counts as inside when its value is above the threshold. Faces
//! are wound so their geometric normal points toward lower values.

pub mod cpu;
pub mod parallel;
pub mod tables;

pub use cpu::CpuMesher;
pub use parallel::ParallelMesher;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::implicit::ScalarLattice;
use crate::mesh::Mesh;
use tables::{CORNER_OFFSETS, EDGE_CONNECTIONS};

/// Turns a scalar lattice into a triangle mesh.
pub trait MeshExtractor: Send + Sync {
    fn create_mesh(&self, lattice: &ScalarLattice, threshold: f32) -> Result<Mesh>;

    /// Like `create_mesh`, but a capacity-bounded backend returns a truncated
    /// mesh and a report instead of failing.
    fn create_mesh_clipped(&self, lattice: &ScalarLattice, threshold: f32) -> Result<(Mesh, MeshReport)> {
        let mesh = self.create_mesh(lattice, threshold)?;
        let n = mesh.vertex_count();
        let report = MeshReport {
            emitted: n,
            required: n,
            truncated: false,
        };
        Ok((mesh, report))
    }

    fn name(&self) -> &'static str;
}

/// Which mesher the pipeline uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MesherBackend {
    #[default]
    Cpu,
    Parallel,
}

/// Outcome of a capacity-bounded extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshReport {
    /// Vertices actually written
    pub emitted: usize,
    /// Vertices the full surface needs
    pub required: usize,
    pub truncated: bool,
}

pub fn create_mesher(backend: MesherBackend, vertex_capacity: usize) -> Box<dyn MeshExtractor> {
    match backend {
        MesherBackend::Cpu => Box::new(CpuMesher::new()),
        MesherBackend::Parallel => Box::new(ParallelMesher::new(vertex_capacity)),
    }
}

/// Bit `c` set when corner `c` of cube `(i, j, k)` is above `threshold`.
#[inline]
pub(crate) fn cube_index(lattice: &ScalarLattice, i: usize, j: usize, k: usize, threshold: f32) -> usize {
    let mut index = 0;
    for (c, [dx, dy, dz]) in CORNER_OFFSETS.iter().enumerate() {
        if lattice.get(i + dx, j + dy, k + dz) > threshold {
            index |= 1 << c;
        }
    }
    index
}

/// Lower node and axis (0 = x, 1 = y, 2 = z) of cube edge `edge`.
#[inline]
pub(crate) fn edge_owner(i: usize, j: usize, k: usize, edge: usize) -> ([usize; 3], usize) {
    let [a, b] = EDGE_CONNECTIONS[edge];
    let (oa, ob) = (CORNER_OFFSETS[a], CORNER_OFFSETS[b]);
    let node = [i + oa[0].min(ob[0]), j + oa[1].min(ob[1]), k + oa[2].min(ob[2])];
    let axis = (0..3).find(|&d| oa[d] != ob[d]).unwrap_or(0);
    (node, axis)
}

/// Identity of a lattice edge, unique within one lattice.
#[inline]
pub(crate) fn edge_key(lattice: &ScalarLattice, node: [usize; 3], axis: usize) -> usize {
    lattice.spec.index(node[0], node[1], node[2]) * 3 + axis
}

/// The other end of the edge leaving `node` along `axis`.
#[inline]
pub(crate) fn edge_end(node: [usize; 3], axis: usize) -> [usize; 3] {
    let mut end = node;
    end[axis] += 1;
    end
}

/// Interpolated crossing point on a lattice edge, plus the parameter `t`
/// measured from `node`.
#[inline]
pub(crate) fn edge_vertex(lattice: &ScalarLattice, node: [usize; 3], axis: usize, threshold: f32) -> (Vec3, f32) {
    let end = edge_end(node, axis);
    let v0 = lattice.get(node[0], node[1], node[2]);
    let v1 = lattice.get(end[0], end[1], end[2]);
    let dv = v1 - v0;
    let t = if dv.abs() > f32::EPSILON {
        ((threshold - v0) / dv).clamp(0.0, 1.0)
    } else {
        0.5
    };
    let p0 = lattice.spec.node_position(node[0], node[1], node[2]);
    let p1 = lattice.spec.node_position(end[0], end[1], end[2]);
    (p0 + (p1 - p0) * t, t)
}

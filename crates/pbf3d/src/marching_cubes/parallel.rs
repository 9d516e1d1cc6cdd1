//! Data-parallel Marching Cubes in the style of a GPU compute pipeline.
//!
//! 1. Classify: mark every lattice edge whose endpoints straddle the
//!    threshold, counting per z-slab.
//! 2. Scan: exclusive prefix sum over the marks gives each crossing edge a
//!    vertex slot. Numbering depends only on the lattice, so the output is
//!    deterministic regardless of thread scheduling.
//! 3. Generate: vertices (with gradient normals) and faces are produced per
//!    z-slab and concatenated in slab order.
//!
//! The vertex buffer has a fixed capacity, like a preallocated GPU buffer.

use glam::Vec3;
use rayon::prelude::*;

use super::tables::TRI_TABLE;
use super::{cube_index, edge_end, edge_key, edge_owner, edge_vertex, MeshExtractor, MeshReport};
use crate::error::{PbfError, Result};
use crate::implicit::ScalarLattice;
use crate::mesh::Mesh;

const NO_VERTEX: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
pub struct ParallelMesher {
    max_vertices: usize,
}

impl ParallelMesher {
    pub fn new(max_vertices: usize) -> Self {
        Self { max_vertices }
    }

    pub fn max_vertices(&self) -> usize {
        self.max_vertices
    }

    /// Extract the surface, dropping vertices past the capacity together with
    /// every face that uses them.
    fn extract(&self, lattice: &ScalarLattice, threshold: f32) -> Result<(Mesh, MeshReport)> {
        lattice.spec.validate()?;
        let [cx, cy, cz] = lattice.spec.cell_counts();
        if cx == 0 || cy == 0 || cz == 0 {
            return Ok((Mesh::new(), MeshReport::default()));
        }

        let slots = Self::scan_edges(lattice, threshold);
        let required = slots.total;
        let emitted = required.min(self.max_vertices);

        let mut mesh = Mesh::new();
        self.generate_vertices(lattice, threshold, &slots, &mut mesh);
        let emitted_slots = u32::try_from(emitted).unwrap_or(u32::MAX);
        mesh.faces = Self::generate_faces(lattice, threshold, &slots, emitted_slots);

        let report = MeshReport {
            emitted,
            required,
            truncated: required > self.max_vertices,
        };
        if report.truncated {
            log::warn!(
                "parallel mesher: surface needs {} vertices, capacity {}; mesh truncated",
                required,
                self.max_vertices
            );
        }
        log::trace!(
            "parallel mesher: {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        );
        Ok((mesh, report))
    }

    /// Classify and scan: slot of every lattice edge (`NO_VERTEX` where the
    /// surface does not cross).
    fn scan_edges(lattice: &ScalarLattice, threshold: f32) -> EdgeSlots {
        let [nx, ny, nz] = lattice.spec.counts;
        let slab_len = nx * ny * 3;
        let mut slots = vec![NO_VERTEX; slab_len * nz];

        // Classify: 0/1 marks, with a count per slab
        let counts: Vec<u32> = slots
            .par_chunks_mut(slab_len)
            .enumerate()
            .map(|(k, slab)| {
                let mut count = 0;
                for j in 0..ny {
                    for i in 0..nx {
                        let inside = lattice.get(i, j, k) > threshold;
                        for axis in 0..3 {
                            let end = edge_end([i, j, k], axis);
                            if end[0] >= nx || end[1] >= ny || end[2] >= nz {
                                continue;
                            }
                            if (lattice.get(end[0], end[1], end[2]) > threshold) != inside {
                                slab[(j * nx + i) * 3 + axis] = 1;
                                count += 1;
                            }
                        }
                    }
                }
                count
            })
            .collect();

        // Exclusive scan over slab totals
        let mut offsets = Vec::with_capacity(counts.len());
        let mut total = 0u32;
        for c in &counts {
            offsets.push(total);
            total += c;
        }

        // Local scan inside each slab
        slots
            .par_chunks_mut(slab_len)
            .zip(offsets.par_iter())
            .for_each(|(slab, &base)| {
                let mut next = base;
                for slot in slab.iter_mut() {
                    if *slot == 1 {
                        *slot = next;
                        next += 1;
                    } else {
                        *slot = NO_VERTEX;
                    }
                }
            });

        EdgeSlots {
            slots,
            slab_len,
            total: total as usize,
        }
    }

    fn generate_vertices(&self, lattice: &ScalarLattice, threshold: f32, slots: &EdgeSlots, mesh: &mut Mesh) {
        let [nx, _, _] = lattice.spec.counts;
        let capacity = u32::try_from(self.max_vertices).unwrap_or(u32::MAX);

        let per_slab: Vec<Vec<(Vec3, Vec3)>> = slots
            .slots
            .par_chunks(slots.slab_len)
            .enumerate()
            .map(|(k, slab)| {
                let mut out = Vec::new();
                for (local, &slot) in slab.iter().enumerate() {
                    if slot == NO_VERTEX || slot >= capacity {
                        continue;
                    }
                    let axis = local % 3;
                    let node_flat = local / 3;
                    let node = [node_flat % nx, node_flat / nx, k];
                    let (p, t) = edge_vertex(lattice, node, axis, threshold);
                    let end = edge_end(node, axis);
                    let g0 = lattice.gradient(node[0], node[1], node[2]);
                    let g1 = lattice.gradient(end[0], end[1], end[2]);
                    let normal = -(g0 + (g1 - g0) * t).normalize_or_zero();
                    out.push((p, normal));
                }
                out
            })
            .collect();

        for slab in per_slab {
            for (p, n) in slab {
                mesh.vertices.push(p);
                mesh.normals.push(n);
            }
        }
    }

    fn generate_faces(lattice: &ScalarLattice, threshold: f32, slots: &EdgeSlots, emitted: u32) -> Vec<[u32; 3]> {
        let [cx, cy, cz] = lattice.spec.cell_counts();
        let per_slab: Vec<Vec<[u32; 3]>> = (0..cz)
            .into_par_iter()
            .map(|k| {
                let mut faces = Vec::new();
                for j in 0..cy {
                    for i in 0..cx {
                        let row = &TRI_TABLE[cube_index(lattice, i, j, k, threshold)];
                        for tri in row.chunks_exact(3).take_while(|t| t[0] != 255) {
                            let mut face = [0u32; 3];
                            for (slot, &edge) in face.iter_mut().zip(tri) {
                                let (node, axis) = edge_owner(i, j, k, edge as usize);
                                *slot = slots.slots[edge_key(lattice, node, axis)];
                            }
                            if face.iter().all(|&v| v < emitted) {
                                faces.push(face);
                            }
                        }
                    }
                }
                faces
            })
            .collect();
        per_slab.concat()
    }
}

impl MeshExtractor for ParallelMesher {
    fn create_mesh(&self, lattice: &ScalarLattice, threshold: f32) -> Result<Mesh> {
        let (mesh, report) = self.extract(lattice, threshold)?;
        if report.truncated {
            return Err(PbfError::VertexCapacityExceeded {
                required: report.required,
                capacity: self.max_vertices,
            });
        }
        Ok(mesh)
    }

    fn create_mesh_clipped(&self, lattice: &ScalarLattice, threshold: f32) -> Result<(Mesh, MeshReport)> {
        self.extract(lattice, threshold)
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}

struct EdgeSlots {
    /// Vertex slot per lattice edge, indexed by `node * 3 + axis`
    slots: Vec<u32>,
    slab_len: usize,
    total: usize,
}

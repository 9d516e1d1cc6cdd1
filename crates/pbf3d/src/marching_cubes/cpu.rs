//! Sequential Marching Cubes.

use rustc_hash::FxHashMap;

use super::tables::TRI_TABLE;
use super::{cube_index, edge_key, edge_owner, edge_vertex, MeshExtractor};
use crate::error::Result;
use crate::implicit::ScalarLattice;
use crate::mesh::Mesh;

/// Reference mesher. Walks the cubes in lattice order and shares edge
/// vertices through a per-call hash map; normals are area-weighted face
/// normals.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuMesher;

impl CpuMesher {
    pub fn new() -> Self {
        Self
    }
}

impl MeshExtractor for CpuMesher {
    fn create_mesh(&self, lattice: &ScalarLattice, threshold: f32) -> Result<Mesh> {
        lattice.spec.validate()?;
        let mut mesh = Mesh::new();
        let [cx, cy, cz] = lattice.spec.cell_counts();
        let mut edge_cache: FxHashMap<usize, u32> = FxHashMap::default();

        for k in 0..cz {
            for j in 0..cy {
                for i in 0..cx {
                    let case = cube_index(lattice, i, j, k, threshold);
                    let row = &TRI_TABLE[case];
                    for tri in row.chunks_exact(3).take_while(|t| t[0] != 255) {
                        let mut face = [0u32; 3];
                        for (slot, &edge) in face.iter_mut().zip(tri) {
                            let (node, axis) = edge_owner(i, j, k, edge as usize);
                            let key = edge_key(lattice, node, axis);
                            *slot = *edge_cache.entry(key).or_insert_with(|| {
                                let (p, _) = edge_vertex(lattice, node, axis, threshold);
                                mesh.vertices.push(p);
                                (mesh.vertices.len() - 1) as u32
                            });
                        }
                        mesh.faces.push(face);
                    }
                }
            }
        }

        mesh.compute_area_weighted_normals();
        log::trace!(
            "cpu mesher: {} vertices, {} faces, {} cached edges",
            mesh.vertex_count(),
            mesh.face_count(),
            edge_cache.len()
        );
        Ok(mesh)
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implicit::LatticeSpec;
    use glam::Vec3;

    #[test]
    fn test_single_corner_gives_one_triangle() {
        let spec = LatticeSpec::new(Vec3::ZERO, Vec3::ONE, [2, 2, 2]).unwrap();
        let mut values = vec![0.0; 8];
        values[0] = 1.0;
        let lattice = ScalarLattice::from_values(spec, values).unwrap();
        let mesh = CpuMesher::new().create_mesh(&lattice, 0.5).unwrap();
        assert_eq!(mesh.face_count(), 1);
        assert_eq!(mesh.vertex_count(), 3);
        // Surface faces away from the high corner at the origin
        let n = mesh.face_normal(mesh.faces[0]);
        assert!(n.dot(Vec3::ONE) > 0.0, "normal {:?}", n);
    }

    #[test]
    fn test_uniform_lattice_is_empty() {
        let spec = LatticeSpec::new(Vec3::ZERO, Vec3::ONE, [4, 4, 4]).unwrap();
        let lattice = ScalarLattice::sample(spec, &|_: Vec3| 1.0).unwrap();
        let mesh = CpuMesher::new().create_mesh(&lattice, 0.5).unwrap();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
    }

    #[test]
    fn test_shared_edges_deduplicated() {
        // Plane x = 1.5 crossing a 4x3x3 lattice
        let spec = LatticeSpec::new(Vec3::ZERO, Vec3::ONE, [4, 3, 3]).unwrap();
        let lattice = ScalarLattice::sample(spec, &|p: Vec3| 1.5 - p.x).unwrap();
        let mesh = CpuMesher::new().create_mesh(&lattice, 0.0).unwrap();
        // One crossing per x-edge row: 3 * 3 vertices, 2 triangles per cube face
        assert_eq!(mesh.vertex_count(), 9);
        assert_eq!(mesh.face_count(), 8);
        for n in &mesh.normals {
            assert!((*n - Vec3::X).length() < 1e-5, "normal {:?}", n);
        }
        assert!((mesh.surface_area() - 4.0).abs() < 1e-4);
    }
}

//! Triangle mesh produced by surface extraction.

use glam::Vec3;

use crate::error::{PbfError, Result};

/// Indexed triangle mesh. Every face index is below `vertices.len()`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    /// Per-vertex unit normals (same length as `vertices`)
    pub normals: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.normals.clear();
        self.faces.clear();
    }

    /// Check the index and normal invariants.
    pub fn validate(&self) -> Result<()> {
        if self.normals.len() != self.vertices.len() {
            return Err(PbfError::InvalidConfig(format!(
                "mesh has {} normals for {} vertices",
                self.normals.len(),
                self.vertices.len()
            )));
        }
        let n = self.vertices.len() as u32;
        if let Some((i, face)) = self
            .faces
            .iter()
            .enumerate()
            .find(|(_, f)| f.iter().any(|&v| v >= n))
        {
            return Err(PbfError::InvalidConfig(format!(
                "face {} {:?} indexes past {} vertices",
                i, face, n
            )));
        }
        Ok(())
    }

    /// Axis-aligned bounds of the vertices.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))),
        )
    }

    /// Geometric normal of a face (not normalised, length = 2 * area).
    #[inline]
    pub fn face_normal(&self, face: [u32; 3]) -> Vec3 {
        let a = self.vertices[face[0] as usize];
        let b = self.vertices[face[1] as usize];
        let c = self.vertices[face[2] as usize];
        (b - a).cross(c - a)
    }

    pub fn surface_area(&self) -> f32 {
        self.faces
            .iter()
            .map(|&f| 0.5 * self.face_normal(f).length())
            .sum()
    }

    /// Replace the normals with area-weighted averages of the face normals.
    pub fn compute_area_weighted_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.vertices.len()];
        for &face in &self.faces {
            let n = self.face_normal(face);
            for &v in &face {
                acc[v as usize] += n;
            }
        }
        self.normals = acc.into_iter().map(|n| n.normalize_or_zero()).collect();
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Mesh {
        Mesh {
            vertices: vec![
                Vec3::ZERO,
                Vec3::X,
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::Y,
            ],
            normals: vec![Vec3::ZERO; 4],
            faces: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    #[test]
    fn test_area_and_normals() {
        let mut m = quad();
        assert!((m.surface_area() - 1.0).abs() < 1e-6);
        m.compute_area_weighted_normals();
        for n in &m.normals {
            assert!((*n - Vec3::Z).length() < 1e-6);
        }
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_index() {
        let mut m = quad();
        m.faces.push([0, 1, 4]);
        assert!(matches!(m.validate(), Err(PbfError::InvalidConfig(_))));
    }

    #[test]
    fn test_buffers_and_bounds() {
        let m = quad();
        assert_eq!(m.position_bytes().len(), 4 * 12);
        assert_eq!(m.index_bytes().len(), 2 * 12);
        let (lo, hi) = m.bounds().unwrap();
        assert_eq!(lo, Vec3::ZERO);
        assert_eq!(hi, Vec3::new(1.0, 1.0, 0.0));
        assert!(Mesh::new().bounds().is_none());
    }
}

//! Marching Cubes on analytic fields
//!
//! Both backends are checked against a sphere signed distance: vertices lie
//! on the sphere, faces face outward, the surface area scales with r^2, and
//! the two backends produce the same vertex set.

use glam::Vec3;
use pbf3d::{
    create_mesher, CpuMesher, LatticeSpec, Mesh, MeshExtractor, MesherBackend, ParallelMesher,
    PbfError, ScalarLattice,
};

const N: usize = 32;

/// `[-1, 1]^3` with `N` cells per axis
fn unit_lattice() -> LatticeSpec {
    LatticeSpec::new(Vec3::splat(-1.0), Vec3::splat(2.0 / N as f32), [N + 1; 3]).unwrap()
}

/// Positive inside a ball of `radius` at the origin.
fn ball(radius: f32) -> ScalarLattice {
    ScalarLattice::sample(unit_lattice(), &move |p: Vec3| radius - p.length()).unwrap()
}

fn sorted_vertices(mesh: &Mesh) -> Vec<[f32; 3]> {
    let mut v: Vec<[f32; 3]> = mesh.vertices.iter().map(|p| p.to_array()).collect();
    v.sort_by(|a, b| {
        a[0].total_cmp(&b[0])
            .then(a[1].total_cmp(&b[1]))
            .then(a[2].total_cmp(&b[2]))
    });
    v
}

fn check_sphere_mesh(mesh: &Mesh, radius: f32) {
    assert!(mesh.validate().is_ok());
    assert!(!mesh.is_empty());
    for v in &mesh.vertices {
        assert!((v.length() - radius).abs() < 0.01, "vertex {:?} off the sphere", v);
    }
    for &face in &mesh.faces {
        let n = mesh.face_normal(face);
        // Slivers from near-corner crossings carry no orientation
        if n.length() < 1e-7 {
            continue;
        }
        let centroid = face
            .iter()
            .map(|&i| mesh.vertices[i as usize])
            .sum::<Vec3>()
            / 3.0;
        assert!(n.dot(centroid) > 0.0, "face {:?} points inward", face);
    }
    for (v, n) in mesh.vertices.iter().zip(&mesh.normals) {
        assert!(n.dot(v.normalize()) > 0.9, "normal {:?} at {:?}", n, v);
    }
}

#[test]
fn test_cpu_sphere_on_surface() {
    let mesh = CpuMesher::new().create_mesh(&ball(0.6), 0.0).unwrap();
    check_sphere_mesh(&mesh, 0.6);
}

#[test]
fn test_parallel_sphere_on_surface() {
    let mesh = ParallelMesher::new(1 << 16).create_mesh(&ball(0.6), 0.0).unwrap();
    check_sphere_mesh(&mesh, 0.6);
}

#[test]
fn test_surface_area_matches_sphere() {
    let r = 0.6;
    let mesh = CpuMesher::new().create_mesh(&ball(r), 0.0).unwrap();
    let exact = 4.0 * std::f32::consts::PI * r * r;
    let area = mesh.surface_area();
    assert!((area - exact).abs() < 0.03 * exact, "area {} vs {}", area, exact);
}

#[test]
fn test_face_count_scales_with_area() {
    let mesher = CpuMesher::new();
    let small = mesher.create_mesh(&ball(0.4), 0.0).unwrap().face_count() as f32;
    let large = mesher.create_mesh(&ball(0.8), 0.0).unwrap().face_count() as f32;
    let ratio = large / small;
    assert!(ratio > 3.0 && ratio < 5.0, "face ratio {}", ratio);
}

#[test]
fn test_backends_agree() {
    let lattice = ball(0.55);
    let cpu = CpuMesher::new().create_mesh(&lattice, 0.0).unwrap();
    let par = ParallelMesher::new(1 << 16).create_mesh(&lattice, 0.0).unwrap();

    assert_eq!(cpu.vertex_count(), par.vertex_count());
    assert_eq!(cpu.face_count(), par.face_count());
    assert_eq!(sorted_vertices(&cpu), sorted_vertices(&par));
    assert!((cpu.surface_area() - par.surface_area()).abs() < 1e-4);
}

#[test]
fn test_meshing_is_deterministic() {
    let lattice = ball(0.45);
    for backend in [MesherBackend::Cpu, MesherBackend::Parallel] {
        let mesher = create_mesher(backend, 1 << 16);
        let a = mesher.create_mesh(&lattice, 0.0).unwrap();
        let b = mesher.create_mesh(&lattice, 0.0).unwrap();
        assert_eq!(a, b, "{} mesher is not repeatable", mesher.name());
    }
}

#[test]
fn test_threshold_outside_range_is_empty() {
    let lattice = ball(0.5);
    let (lo, hi) = lattice.min_max();
    for backend in [MesherBackend::Cpu, MesherBackend::Parallel] {
        let mesher = create_mesher(backend, 1 << 16);
        assert!(mesher.create_mesh(&lattice, hi + 1.0).unwrap().is_empty());
        assert!(mesher.create_mesh(&lattice, lo - 1.0).unwrap().is_empty());
    }
}

#[test]
fn test_capacity_overflow_reported() {
    let lattice = ball(0.6);
    let full = CpuMesher::new().create_mesh(&lattice, 0.0).unwrap();
    let mesher = create_mesher(MesherBackend::Parallel, 100);

    match mesher.create_mesh(&lattice, 0.0) {
        Err(PbfError::VertexCapacityExceeded { required, capacity }) => {
            assert_eq!(required, full.vertex_count());
            assert_eq!(capacity, 100);
        }
        other => panic!("expected capacity error, got {:?}", other.map(|m| m.vertex_count())),
    }

    let (mesh, report) = mesher.create_mesh_clipped(&lattice, 0.0).unwrap();
    assert!(report.truncated);
    assert_eq!(report.required, full.vertex_count());
    assert_eq!(mesh.vertex_count(), 100);
    assert!(mesh.face_count() < full.face_count());
    assert!(mesh.validate().is_ok());
}

#[test]
fn test_anisotropic_lattice() {
    // Cells twice as tall as they are wide
    let spec = LatticeSpec::new(Vec3::splat(-1.0), Vec3::new(0.05, 0.1, 0.05), [41, 21, 41]).unwrap();
    let lattice = ScalarLattice::sample(spec, &|p: Vec3| 0.7 - p.length()).unwrap();
    let mesh = CpuMesher::new().create_mesh(&lattice, 0.0).unwrap();
    assert!(mesh.validate().is_ok());
    for v in &mesh.vertices {
        assert!((v.length() - 0.7).abs() < 0.02, "vertex {:?}", v);
    }
}

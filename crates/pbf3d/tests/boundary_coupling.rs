//! Boundary particles: sampling, density contribution and reaction forces

use glam::Vec3;
use pbf3d::boundary;
use pbf3d::{DistanceField, Environment, PbfSolver, Solid, SphKernels};

fn coupled_env() -> Environment {
    Environment {
        domain_min: Vec3::new(-0.2, 0.0, -0.2),
        domain_max: Vec3::new(0.2, 0.4, 0.2),
        boundary_particles: true,
        ..Environment::default()
    }
}

#[test]
fn test_boundary_sampled_for_solids_and_domain() {
    let mut solver = PbfSolver::new(coupled_env()).unwrap();
    solver.add_solid(Solid::sphere(Vec3::new(0.0, 0.2, 0.0), 0.1));
    solver.init_boundary().unwrap();

    let b = solver.boundary();
    assert!(!b.is_empty());
    // Solid 0 is the sphere, the domain comes last
    assert!(b.solid_ids.iter().any(|&id| id == 0));
    assert!(b.solid_ids.iter().any(|&id| id == 1));
    assert!(b.volumes.iter().all(|&v| v > 0.0 && v.is_finite()));

    let r = solver.environment().particle_radius;
    for (p, &id) in b.positions.iter().zip(&b.solid_ids) {
        let solid = if id == 0 { &solver.solids()[0] } else { solver.domain() };
        let d = solid.distance(*p, 0.0).penetration;
        // Sampled half a spacing inside the solid
        assert!((d + r).abs() < 0.5 * r, "boundary particle {:?} at depth {}", p, d);
    }
}

#[test]
fn test_boundary_disabled_by_default() {
    let env = Environment {
        boundary_particles: false,
        ..coupled_env()
    };
    let mut solver = PbfSolver::new(env).unwrap();
    solver.init_boundary().unwrap();
    assert!(solver.boundary().is_empty());
}

#[test]
fn test_boundary_raises_wall_density() {
    let kernels = SphKernels::new(0.08);
    let floor = Solid::container(Vec3::new(-0.2, 0.0, -0.2), Vec3::new(0.2, 0.4, 0.2));
    let particles = boundary::generate(std::slice::from_ref(&floor), 0.02, &kernels).unwrap();

    // Density a fluid particle on the floor gains from the boundary alone
    let rho0 = 1000.0;
    let p = Vec3::new(0.0, 0.02, 0.0);
    let rho_b: f32 = particles
        .positions
        .iter()
        .zip(&particles.volumes)
        .map(|(b, v)| rho0 * v * kernels.poly6(p.distance_squared(*b)))
        .sum();
    assert!(rho_b > 0.1 * rho0 && rho_b < 0.9 * rho0, "boundary density {}", rho_b);
}

#[test]
fn test_fluid_presses_on_floor() {
    let mut solver = PbfSolver::new(coupled_env()).unwrap();
    let spacing = solver.environment().particle_spacing();
    solver.add_box(
        Vec3::new(-0.2, 0.0, -0.2),
        Vec3::new(0.2, 0.12, 0.2),
        spacing,
        Vec3::ZERO,
    );
    let n = solver.num_particles();

    let mut pushed_down = false;
    for _ in 0..20 {
        solver.step(0.005);
        // No solids were added, so the domain is id 0
        let force = solver.boundary().total_force(0);
        assert!(force.is_finite());
        pushed_down |= force.y < 0.0;
    }
    assert!(pushed_down, "floor never felt the fluid");
    assert_eq!(solver.num_particles(), n);
    assert!(solver.positions().iter().all(|p| p.y >= 0.02 - 1e-4));
}

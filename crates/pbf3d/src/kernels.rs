//! 3D SPH smoothing kernels (Poly6 for density, Spiky for gradients).

use glam::Vec3;
use std::f32::consts::PI;

/// Kernel set for a fixed smoothing length, with the normalisation
/// coefficients precomputed so the hot loops never call `powi`.
#[derive(Clone, Copy, Debug)]
pub struct SphKernels {
    /// Support radius
    pub h: f32,
    /// h * h
    pub h2: f32,
    poly6_coeff: f32,      // 315 / (64 pi h^9)
    spiky_grad_coeff: f32, // -45 / (pi h^6)
}

impl SphKernels {
    pub fn new(h: f32) -> Self {
        assert!(h > 0.0, "smoothing length must be positive, got {}", h);
        Self {
            h,
            h2: h * h,
            poly6_coeff: 315.0 / (64.0 * PI * h.powi(9)),
            spiky_grad_coeff: -45.0 / (PI * h.powi(6)),
        }
    }

    /// Poly6 kernel from the squared distance.
    #[inline(always)]
    pub fn poly6(&self, r2: f32) -> f32 {
        if r2 >= self.h2 {
            return 0.0;
        }
        let term = self.h2 - r2;
        self.poly6_coeff * term * term * term
    }

    /// Gradient of the Spiky kernel with respect to x_i, where
    /// `r_vec = x_i - x_j` and `r = |r_vec|`. Points from i towards j.
    #[inline(always)]
    pub fn spiky_gradient(&self, r_vec: Vec3, r: f32) -> Vec3 {
        if r >= self.h || r <= 1e-6 * self.h {
            return Vec3::ZERO;
        }
        let term = self.h - r;
        r_vec * (self.spiky_grad_coeff * term * term / r)
    }

    /// Lattice-free kernel sum at the origin of a cubic particle lattice with
    /// the given spacing (self term included). Used for mass calibration.
    pub fn lattice_sum(&self, spacing: f32) -> f32 {
        let n = (self.h / spacing).ceil() as i32;
        let mut sum = 0.0;
        for k in -n..=n {
            for j in -n..=n {
                for i in -n..=n {
                    let r = Vec3::new(i as f32, j as f32, k as f32) * spacing;
                    sum += self.poly6(r.length_squared());
                }
            }
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly6_zero_outside_support() {
        let k = SphKernels::new(0.1);
        assert_eq!(k.poly6(0.01), 0.0);
        assert_eq!(k.poly6(0.02), 0.0);
        assert!(k.poly6(0.0) > 0.0);
    }

    #[test]
    fn test_poly6_integrates_to_one() {
        // Midpoint rule over the support cube
        let h = 0.1;
        let k = SphKernels::new(h);
        let n = 60;
        let d = 2.0 * h / n as f32;
        let mut sum = 0.0f64;
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let p = Vec3::new(
                        -h + (x as f32 + 0.5) * d,
                        -h + (y as f32 + 0.5) * d,
                        -h + (z as f32 + 0.5) * d,
                    );
                    sum += (k.poly6(p.length_squared()) * d * d * d) as f64;
                }
            }
        }
        assert!((sum - 1.0).abs() < 0.01, "Poly6 integral = {}", sum);
    }

    #[test]
    fn test_spiky_gradient_points_towards_neighbor() {
        let k = SphKernels::new(1.0);
        let r_vec = Vec3::new(0.5, 0.0, 0.0); // x_i - x_j, neighbor on -X side
        let g = k.spiky_gradient(r_vec, 0.5);
        assert!(g.x < 0.0, "gradient should point towards j: {:?}", g);
        assert!(g.y.abs() < 1e-9 && g.z.abs() < 1e-9);
    }

    #[test]
    fn test_spiky_gradient_degenerate_distance() {
        let k = SphKernels::new(1.0);
        assert_eq!(k.spiky_gradient(Vec3::ZERO, 0.0), Vec3::ZERO);
        assert_eq!(k.spiky_gradient(Vec3::X * 2.0, 2.0), Vec3::ZERO);
    }

    #[test]
    fn test_lattice_sum_includes_self() {
        let k = SphKernels::new(0.1);
        // Spacing larger than h: only the self term remains
        assert!((k.lattice_sum(0.2) - k.poly6(0.0)).abs() < 1e-3 * k.poly6(0.0));
    }
}

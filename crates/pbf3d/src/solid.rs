//! Solid boundaries exposed through a signed distance contract.
//!
//! Sign convention for every shape: negative penetration means the probe
//! overlaps the solid (or has left a container), and the normal points from
//! the solid into free space.
//!
//! - Box: oriented box, either a solid object or a container wall
//! - OpenBox: open-top tank made of a floor slab and four walls
//! - Sphere: solid ball or spherical container

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Result of a distance query. Produced per query, never stored.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CollisionInfo {
    /// Signed clearance between probe and surface (negative = penetrating)
    pub penetration: f32,
    /// Unit normal pointing from the solid into free space
    pub normal: Vec3,
    /// Probe center position that just touches the surface
    pub contact: Vec3,
    /// Surface velocity at the contact
    pub velocity: Vec3,
}

impl CollisionInfo {
    #[inline]
    pub fn is_penetrating(&self) -> bool {
        self.penetration < 0.0
    }
}

/// Anything the solver can collide particles against.
pub trait DistanceField: Send + Sync {
    /// Signed distance between a sphere probe of `probe_radius` centred at
    /// `position` and the surface.
    fn distance(&self, position: Vec3, probe_radius: f32) -> CollisionInfo;

    /// Implicit function value used for meshing the solid.
    fn implicit(&self, position: Vec3) -> f32 {
        self.distance(position, 0.0).penetration
    }
}

/// Which side of the surface is solid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Containment {
    /// Fluid lives outside; the shape's interior is solid
    #[default]
    Object,
    /// Fluid lives inside; everything outside the shape is solid
    Container,
}

impl Containment {
    /// +1 for objects, -1 for containers
    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            Containment::Object => 1.0,
            Containment::Container => -1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolidShape {
    /// Box spanning `[-half_extents, half_extents]` in local space
    Box { half_extents: Vec3 },
    /// Open-top (+Y) tank. The cavity is `|x| < inner.x`, `|z| < inner.z`,
    /// `y > -inner.y`; the outer hull is `[-outer, outer]`.
    OpenBox { inner_half: Vec3, outer_half: Vec3 },
    Sphere { radius: f32 },
}

/// A rigid solid: shape plus transform, side and surface velocity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    pub shape: SolidShape,
    pub center: Vec3,
    pub rotation: Quat,
    pub containment: Containment,
    /// Linear velocity of the whole solid
    pub velocity: Vec3,
    /// Fixed solids ignore `velocity` when advancing
    pub fixed: bool,
    /// Added to the penetration when the solid is sampled as an implicit field
    pub offset: f32,
}

/// Inward normals of the six AABB faces (-x, +x, -y, +y, -z, +z).
const AABB_NORMALS: [Vec3; 6] = [
    Vec3::new(1.0, 0.0, 0.0),
    Vec3::new(-1.0, 0.0, 0.0),
    Vec3::new(0.0, 1.0, 0.0),
    Vec3::new(0.0, -1.0, 0.0),
    Vec3::new(0.0, 0.0, 1.0),
    Vec3::new(0.0, 0.0, -1.0),
];

/// Signed distance between a probe of radius `r` at local position `p` and
/// the box `[min, max]`. `sgn` is +1 when the inside of the box is free
/// space and -1 when it is solid. Returns (distance, normal).
///
/// A container shrinks the free box by `r`. A solid box is measured from
/// its surface and the radius is taken off afterwards, so the probe stops
/// at `r` outside every face, edge and corner.
pub fn aabb_point_distance(p: Vec3, r: f32, sgn: f32, min: Vec3, max: Vec3) -> (f32, Vec3) {
    if sgn < 0.0 {
        let (d, n) = aabb_clearance(p, 0.0, sgn, min, max);
        return (d - r, n);
    }
    aabb_clearance(p, r, sgn, min, max)
}

fn aabb_clearance(p: Vec3, r: f32, sgn: f32, min: Vec3, max: Vec3) -> (f32, Vec3) {
    let mut clearance = [0.0f32; 6];
    let mut violated = 0u32;
    let mut count = 0;
    let mut last = 0;

    for axis in 0..3 {
        let lo = 2 * axis;
        let hi = lo + 1;
        clearance[lo] = (p[axis] - r) - min[axis];
        clearance[hi] = max[axis] - (p[axis] + r);
        if clearance[lo] < 0.0 {
            violated |= 1 << lo;
            count += 1;
            last = lo;
        }
        if clearance[hi] < 0.0 {
            violated |= 1 << hi;
            count += 1;
            last = hi;
        }
    }

    if violated == 0 {
        // Inside on all axes: nearest face wins, later face on ties
        let mut min_d = f32::MAX;
        let mut face = 0;
        for (i, &d) in clearance.iter().enumerate() {
            if d <= min_d {
                min_d = d;
                face = i;
            }
        }
        return (sgn * min_d, sgn * AABB_NORMALS[face]);
    }

    if count == 1 {
        return (sgn * clearance[last], sgn * AABB_NORMALS[last]);
    }

    // Edge or corner region
    let mut x = Vec3::ZERO;
    for axis in 0..3 {
        if violated & (1 << (2 * axis)) != 0 {
            x[axis] = clearance[2 * axis];
        } else if violated & (1 << (2 * axis + 1)) != 0 {
            x[axis] = -clearance[2 * axis + 1];
        }
    }
    let len = x.length();
    let n = if len > 0.0 { -x / len } else { Vec3::ZERO };
    (-sgn * len, sgn * n)
}

impl Solid {
    fn with_shape(shape: SolidShape, center: Vec3, containment: Containment) -> Self {
        Self {
            shape,
            center,
            rotation: Quat::IDENTITY,
            containment,
            velocity: Vec3::ZERO,
            fixed: true,
            offset: 0.0,
        }
    }

    /// Solid box centred at `center`.
    pub fn cuboid(center: Vec3, half_extents: Vec3) -> Self {
        Self::with_shape(SolidShape::Box { half_extents }, center, Containment::Object)
    }

    /// Box container holding fluid in `[min, max]`.
    pub fn container(min: Vec3, max: Vec3) -> Self {
        Self::with_shape(
            SolidShape::Box {
                half_extents: 0.5 * (max - min),
            },
            0.5 * (min + max),
            Containment::Container,
        )
    }

    /// Open-top tank. `inner_half` spans the cavity, `outer_half` the hull.
    pub fn open_box(center: Vec3, inner_half: Vec3, outer_half: Vec3) -> Self {
        Self::with_shape(
            SolidShape::OpenBox {
                inner_half,
                outer_half,
            },
            center,
            Containment::Object,
        )
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self::with_shape(SolidShape::Sphere { radius }, center, Containment::Object)
    }

    /// Spherical container holding fluid inside.
    pub fn sphere_container(center: Vec3, radius: f32) -> Self {
        Self::with_shape(SolidShape::Sphere { radius }, center, Containment::Container)
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation.normalize();
        self
    }

    /// Give the solid a velocity and let it move.
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self.fixed = false;
        self
    }

    pub fn with_offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    /// World to local coordinates.
    #[inline]
    pub fn to_local(&self, p: Vec3) -> Vec3 {
        self.rotation.inverse() * (p - self.center)
    }

    /// Surface velocity at a point.
    #[inline]
    pub fn velocity_at(&self, _p: Vec3) -> Vec3 {
        if self.fixed {
            Vec3::ZERO
        } else {
            self.velocity
        }
    }

    /// Move a non-fixed solid with its velocity.
    pub fn advance(&mut self, dt: f32) {
        if !self.fixed {
            self.center += self.velocity * dt;
        }
    }

    /// World-space bounding box of the surface.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        let half = match &self.shape {
            SolidShape::Box { half_extents } => *half_extents,
            SolidShape::OpenBox { outer_half, .. } => *outer_half,
            SolidShape::Sphere { radius } => return (
                self.center - Vec3::splat(*radius),
                self.center + Vec3::splat(*radius),
            ),
        };
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { -half.x } else { half.x },
                if i & 2 == 0 { -half.y } else { half.y },
                if i & 4 == 0 { -half.z } else { half.z },
            );
            let p = self.center + self.rotation * corner;
            min = min.min(p);
            max = max.max(p);
        }
        (min, max)
    }

    /// Distance and normal in local coordinates.
    fn local_distance(&self, local: Vec3, r: f32) -> (f32, Vec3) {
        // The AABB routine takes sgn = +1 when the box interior is free space
        let sgn = -self.containment.sign();
        match &self.shape {
            SolidShape::Box { half_extents } => {
                aabb_point_distance(local, r, sgn, -*half_extents, *half_extents)
            }
            SolidShape::OpenBox {
                inner_half: inner,
                outer_half: outer,
            } => {
                let parts = [
                    // floor
                    (
                        -*outer,
                        Vec3::new(outer.x, -inner.y, outer.z),
                    ),
                    // -x wall
                    (
                        Vec3::new(-outer.x, -inner.y, -outer.z),
                        Vec3::new(-inner.x, outer.y, outer.z),
                    ),
                    // +x wall
                    (
                        Vec3::new(inner.x, -inner.y, -outer.z),
                        Vec3::new(outer.x, outer.y, outer.z),
                    ),
                    // -z wall
                    (
                        Vec3::new(-inner.x, -inner.y, -outer.z),
                        Vec3::new(inner.x, outer.y, -inner.z),
                    ),
                    // +z wall
                    (
                        Vec3::new(-inner.x, -inner.y, inner.z),
                        Vec3::new(inner.x, outer.y, outer.z),
                    ),
                ];
                let mut best = (f32::MAX, Vec3::ZERO);
                for (min, max) in parts {
                    let (d, n) = aabb_point_distance(local, r, sgn, min, max);
                    if d < best.0 {
                        best = (d, n);
                    }
                }
                best
            }
            SolidShape::Sphere { radius } => {
                let len = local.length();
                let dir = if len > 1e-12 { local / len } else { Vec3::Y };
                (-sgn * (len - radius) - r, -sgn * dir)
            }
        }
    }
}

impl DistanceField for Solid {
    fn distance(&self, position: Vec3, probe_radius: f32) -> CollisionInfo {
        let velocity = self.velocity_at(position);

        let (penetration, local_normal) = self.local_distance(self.to_local(position), probe_radius);
        let normal = self.rotation * local_normal;

        CollisionInfo {
            penetration,
            normal,
            contact: position - normal * penetration,
            velocity,
        }
    }

    fn implicit(&self, position: Vec3) -> f32 {
        self.distance(position, 0.0).penetration + self.offset
    }
}

// core/physics/helper.rs
//
// Unit and coordinate conversion between engine space and simulation space.
//
// Engine space: pixels, Y-up, rotations in clockwise degrees.
// Simulation space: meters (pixels / ptm), Y-up, counter-clockwise radians.

use glam::Vec2;
use rapier2d::parry::bounding_volume::Aabb;
use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in engine units, origin at the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Vec2,
    pub size: Vec2,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Vec2::new(x, y),
            size: Vec2::new(width, height),
        }
    }

    pub fn min(&self) -> Vec2 {
        self.origin.min(self.origin + self.size)
    }

    pub fn max(&self) -> Vec2 {
        self.origin.max(self.origin + self.size)
    }

    pub fn contains(&self, p: Vec2) -> bool {
        let (lo, hi) = (self.min(), self.max());
        p.x >= lo.x && p.x <= hi.x && p.y >= lo.y && p.y <= hi.y
    }
}

pub fn vec_to_physics(v: Vec2, ptm: f32) -> Vector<Real> {
    vector![v.x / ptm, v.y / ptm]
}

pub fn vec_from_physics(v: &Vector<Real>, ptm: f32) -> Vec2 {
    Vec2::new(v.x * ptm, v.y * ptm)
}

pub fn point_to_physics(p: Vec2, ptm: f32) -> Point<Real> {
    point![p.x / ptm, p.y / ptm]
}

pub fn point_from_physics(p: &Point<Real>, ptm: f32) -> Vec2 {
    Vec2::new(p.x * ptm, p.y * ptm)
}

pub fn length_to_physics(len: f32, ptm: f32) -> Real {
    len / ptm
}

pub fn length_from_physics(len: Real, ptm: f32) -> f32 {
    len * ptm
}

/// Torques and angular spring coefficients carry a squared length.
pub fn torque_to_physics(torque: f32, ptm: f32) -> Real {
    torque / (ptm * ptm)
}

pub fn torque_from_physics(torque: Real, ptm: f32) -> f32 {
    torque * ptm * ptm
}

/// Moment of inertia in engine units (mass × pixels²).
pub fn moment_from_physics(moment: Real, ptm: f32) -> f32 {
    moment * ptm * ptm
}

/// Clockwise engine degrees to counter-clockwise simulation radians.
pub fn degrees_to_physics_angle(degrees: f32) -> Real {
    -degrees.to_radians()
}

pub fn physics_angle_to_degrees(angle: Real) -> f32 {
    -angle.to_degrees()
}

pub fn rect_to_aabb(rect: Rect, ptm: f32) -> Aabb {
    Aabb::new(
        point_to_physics(rect.min(), ptm),
        point_to_physics(rect.max(), ptm),
    )
}

pub fn aabb_to_rect(aabb: &Aabb, ptm: f32) -> Rect {
    let min = point_from_physics(&aabb.mins, ptm);
    let max = point_from_physics(&aabb.maxs, ptm);
    Rect {
        origin: min,
        size: max - min,
    }
}

use std::f32::consts::PI;
use std::ops::Deref;

use glam::Vec2;
use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

use super::body::PhysicsBody;
use super::error::{PhysicsError, PhysicsResult};
use super::helper::{length_to_physics, point_from_physics, point_to_physics, vec_to_physics};
use super::simulation::Simulation;
use crate::api::types::{BodyId, ColliderId};

// ---------------------------------------------------------------------------
// Material
// ---------------------------------------------------------------------------

/// Surface material of a collider. Density is mass per square meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsMaterial {
    pub density: f32,
    pub restitution: f32,
    pub friction: f32,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self {
            density: 0.1,
            restitution: 0.5,
            friction: 0.5,
        }
    }
}

impl PhysicsMaterial {
    pub fn new(density: f32, restitution: f32, friction: f32) -> Self {
        Self {
            density,
            restitution,
            friction,
        }
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Collider geometry in engine units, relative to the body origin.
///
/// Edge kinds are hollow: each edge becomes one segment, or one capsule of
/// radius `border` when `border > 0`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Circle { radius: f32, offset: Vec2 },
    Box { size: Vec2, offset: Vec2 },
    /// Convex polygon. Points are reduced to their convex hull on creation.
    Polygon { points: Vec<Vec2> },
    EdgeSegment { a: Vec2, b: Vec2, border: f32 },
    EdgeBox { size: Vec2, offset: Vec2, border: f32 },
    /// Closed loop, one edge per point.
    EdgePolygon { points: Vec<Vec2>, border: f32 },
    /// Open chain, one edge per consecutive pair.
    EdgeChain { points: Vec<Vec2>, border: f32 },
}

impl ColliderShape {
    pub fn circle(radius: f32) -> Self {
        Self::Circle {
            radius,
            offset: Vec2::ZERO,
        }
    }

    pub fn rect(size: Vec2) -> Self {
        Self::Box {
            size,
            offset: Vec2::ZERO,
        }
    }

    pub fn polygon(points: impl Into<Vec<Vec2>>) -> Self {
        Self::Polygon {
            points: points.into(),
        }
    }

    pub fn segment(a: Vec2, b: Vec2) -> Self {
        Self::EdgeSegment { a, b, border: 0.0 }
    }

    pub fn edge_box(size: Vec2) -> Self {
        Self::EdgeBox {
            size,
            offset: Vec2::ZERO,
            border: 0.0,
        }
    }

    pub fn edge_polygon(points: impl Into<Vec<Vec2>>) -> Self {
        Self::EdgePolygon {
            points: points.into(),
            border: 0.0,
        }
    }

    pub fn edge_chain(points: impl Into<Vec<Vec2>>) -> Self {
        Self::EdgeChain {
            points: points.into(),
            border: 0.0,
        }
    }

    /// Edge kinds are only used on non-dynamic bodies.
    pub fn is_edge(&self) -> bool {
        matches!(
            self,
            Self::EdgeSegment { .. } | Self::EdgeBox { .. } | Self::EdgePolygon { .. } | Self::EdgeChain { .. }
        )
    }

    pub fn validate(&self) -> PhysicsResult<()> {
        let fail = |reason| Err(PhysicsError::InvalidGeometry { reason });
        match self {
            Self::Circle { radius, .. } if !(*radius > 0.0) => fail("circle radius must be positive"),
            Self::Box { size, .. } | Self::EdgeBox { size, .. } if size.x == 0.0 || size.y == 0.0 => {
                fail("box size must be non-zero")
            }
            Self::Polygon { points } if points.len() < 3 => fail("polygon needs at least 3 points"),
            Self::EdgeSegment { a, b, .. } if a == b => fail("segment end points coincide"),
            Self::EdgePolygon { points, .. } if points.len() < 3 => fail("edge polygon needs at least 3 points"),
            Self::EdgeChain { points, .. } if points.len() < 2 => fail("edge chain needs at least 2 points"),
            _ => Ok(()),
        }
    }

    /// Copy with every length multiplied by `scale`. Vertex winding is
    /// reversed when the scale mirrors the shape.
    pub fn scaled(&self, scale: Vec2) -> Self {
        let mirror = scale.x * scale.y < 0.0;
        let scale_points = |points: &[Vec2]| {
            let mut out: Vec<Vec2> = points.iter().map(|p| *p * scale).collect();
            if mirror {
                out.reverse();
            }
            out
        };
        match self {
            Self::Circle { radius, offset } => Self::Circle {
                radius: radius * scale.x.abs(),
                offset: *offset * scale,
            },
            Self::Box { size, offset } => Self::Box {
                size: *size * scale.abs(),
                offset: *offset * scale,
            },
            Self::Polygon { points } => Self::Polygon {
                points: scale_points(points),
            },
            Self::EdgeSegment { a, b, border } => Self::EdgeSegment {
                a: *a * scale,
                b: *b * scale,
                border: *border,
            },
            Self::EdgeBox { size, offset, border } => Self::EdgeBox {
                size: *size * scale.abs(),
                offset: *offset * scale,
                border: *border,
            },
            Self::EdgePolygon { points, border } => Self::EdgePolygon {
                points: scale_points(points),
                border: *border,
            },
            Self::EdgeChain { points, border } => Self::EdgeChain {
                points: scale_points(points),
                border: *border,
            },
        }
    }

    pub fn area(&self) -> f32 {
        match self {
            Self::Circle { radius, .. } => PI * radius * radius,
            Self::Box { size, .. } | Self::EdgeBox { size, .. } => (size.x * size.y).abs(),
            Self::Polygon { points } | Self::EdgePolygon { points, .. } => polygon_area(points),
            Self::EdgeSegment { .. } | Self::EdgeChain { .. } => 0.0,
        }
    }

    /// Geometric center relative to the body origin.
    pub fn center(&self) -> Vec2 {
        match self {
            Self::Circle { offset, .. } | Self::Box { offset, .. } | Self::EdgeBox { offset, .. } => *offset,
            Self::Polygon { points } | Self::EdgePolygon { points, .. } => polygon_centroid(points),
            Self::EdgeSegment { a, b, .. } => (*a + *b) * 0.5,
            Self::EdgeChain { points, .. } => average(points),
        }
    }

    /// Edge list for the hollow kinds.
    fn edges(&self) -> Vec<(Vec2, Vec2)> {
        let closed = |points: &[Vec2]| {
            (0..points.len())
                .map(|i| (points[i], points[(i + 1) % points.len()]))
                .collect::<Vec<_>>()
        };
        match self {
            Self::EdgeSegment { a, b, .. } => vec![(*a, *b)],
            Self::EdgeBox { size, offset, .. } => {
                let h = *size * 0.5;
                let corners = [
                    *offset + Vec2::new(-h.x, -h.y),
                    *offset + Vec2::new(h.x, -h.y),
                    *offset + Vec2::new(h.x, h.y),
                    *offset + Vec2::new(-h.x, h.y),
                ];
                closed(&corners)
            }
            Self::EdgePolygon { points, .. } => closed(points),
            Self::EdgeChain { points, .. } => points.windows(2).map(|w| (w[0], w[1])).collect(),
            _ => Vec::new(),
        }
    }

    /// Build the low-level shapes, each with its pose relative to the body.
    pub(crate) fn to_physics(&self, ptm: f32) -> PhysicsResult<Vec<(SharedShape, Isometry<Real>)>> {
        match self {
            Self::Circle { radius, offset } => Ok(vec![(
                SharedShape::ball(length_to_physics(*radius, ptm)),
                Isometry::translation(offset.x / ptm, offset.y / ptm),
            )]),
            Self::Box { size, offset } => {
                let half = vec_to_physics(size.abs() * 0.5, ptm);
                Ok(vec![(
                    SharedShape::cuboid(half.x, half.y),
                    Isometry::translation(offset.x / ptm, offset.y / ptm),
                )])
            }
            Self::Polygon { points } => {
                let pts: Vec<Point<Real>> = points.iter().map(|p| point_to_physics(*p, ptm)).collect();
                let shape = SharedShape::convex_hull(&pts).ok_or(PhysicsError::InvalidGeometry {
                    reason: "polygon points do not form a convex hull",
                })?;
                Ok(vec![(shape, Isometry::identity())])
            }
            Self::EdgeSegment { border, .. }
            | Self::EdgeBox { border, .. }
            | Self::EdgePolygon { border, .. }
            | Self::EdgeChain { border, .. } => {
                let radius = length_to_physics(*border, ptm);
                Ok(self
                    .edges()
                    .into_iter()
                    .map(|(a, b)| {
                        let (pa, pb) = (point_to_physics(a, ptm), point_to_physics(b, ptm));
                        let shape = if radius > 0.0 {
                            SharedShape::capsule(pa, pb, radius)
                        } else {
                            SharedShape::segment(pa, pb)
                        };
                        (shape, Isometry::identity())
                    })
                    .collect())
            }
        }
    }

    /// Replace polygon input points with their convex hull.
    fn into_hull(self, ptm: f32) -> PhysicsResult<Self> {
        let Self::Polygon { points } = &self else {
            return Ok(self);
        };
        let pts: Vec<Point<Real>> = points.iter().map(|p| point_to_physics(*p, ptm)).collect();
        let hull = SharedShape::convex_hull(&pts).ok_or(PhysicsError::InvalidGeometry {
            reason: "polygon points do not form a convex hull",
        })?;
        let polygon = hull.as_convex_polygon().ok_or(PhysicsError::InvalidGeometry {
            reason: "polygon points do not form a convex hull",
        })?;
        Ok(Self::Polygon {
            points: polygon.points().iter().map(|p| point_from_physics(p, ptm)).collect(),
        })
    }
}

/// Shoelace area, absolute.
pub fn polygon_area(points: &[Vec2]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f32 = (0..points.len())
        .map(|i| points[i].perp_dot(points[(i + 1) % points.len()]))
        .sum();
    twice.abs() * 0.5
}

/// Area-weighted centroid. Falls back to the vertex average for degenerate input.
pub fn polygon_centroid(points: &[Vec2]) -> Vec2 {
    let mut weighted = Vec2::ZERO;
    let mut cross_sum = 0.0;
    for i in 0..points.len() {
        let (p, q) = (points[i], points[(i + 1) % points.len()]);
        let cross = p.perp_dot(q);
        weighted += (p + q) * cross;
        cross_sum += cross;
    }
    if cross_sum.abs() <= f32::EPSILON {
        return average(points);
    }
    weighted / (3.0 * cross_sum)
}

/// Translate points so their centroid sits at the origin.
pub fn recenter_points(points: &[Vec2], center: Option<Vec2>) -> Vec<Vec2> {
    let c = center.unwrap_or_else(|| polygon_centroid(points));
    points.iter().map(|p| *p - c).collect()
}

fn average(points: &[Vec2]) -> Vec2 {
    if points.is_empty() {
        return Vec2::ZERO;
    }
    points.iter().copied().sum::<Vec2>() / points.len() as f32
}

// ---------------------------------------------------------------------------
// PhysicsCollider
// ---------------------------------------------------------------------------

/// One or more low-level shapes on a body, with material and filter data.
#[derive(Debug, Clone)]
pub struct PhysicsCollider {
    pub(crate) id: ColliderId,
    pub(crate) body: Option<BodyId>,
    pub(crate) handles: Vec<ColliderHandle>,
    shape: ColliderShape,
    scale: Vec2,
    material: PhysicsMaterial,
    area: f32,
    sensor: bool,
    tag: i32,
    pub(crate) category_bitmask: u32,
    pub(crate) collision_bitmask: u32,
    pub(crate) contact_test_bitmask: u32,
    pub(crate) group: i32,
}

impl PhysicsCollider {
    /// Validate the geometry and reduce polygons to their hull.
    /// The collider has no low-level shapes until [`attach`](Self::attach).
    pub(crate) fn new(
        id: ColliderId,
        shape: ColliderShape,
        material: PhysicsMaterial,
        ptm: f32,
    ) -> PhysicsResult<Self> {
        shape.validate()?;
        let shape = shape.into_hull(ptm)?;
        let area = shape.area();
        Ok(Self {
            id,
            body: None,
            handles: Vec::new(),
            shape,
            scale: Vec2::ONE,
            material,
            area,
            sensor: false,
            tag: 0,
            category_bitmask: u32::MAX,
            collision_bitmask: u32::MAX,
            contact_test_bitmask: 0,
            group: 0,
        })
    }

    /// Create the low-level shapes on `parent`.
    pub(crate) fn attach(
        &mut self,
        body: BodyId,
        parent: RigidBodyHandle,
        sim: &mut Simulation,
        ptm: f32,
    ) -> PhysicsResult<()> {
        let parts = self.geometry().to_physics(ptm)?;
        for (shape, pose) in parts {
            let collider = ColliderBuilder::new(shape)
                .position(pose)
                .density(self.material.density)
                .restitution(self.material.restitution)
                .friction(self.material.friction)
                .sensor(self.sensor)
                .user_data(self.id.0 as u128)
                .active_hooks(
                    ActiveHooks::FILTER_CONTACT_PAIRS
                        | ActiveHooks::FILTER_INTERSECTION_PAIR
                        | ActiveHooks::MODIFY_SOLVER_CONTACTS,
                )
                .active_events(ActiveEvents::COLLISION_EVENTS)
                .build();
            self.handles.push(sim.insert_collider(collider, parent));
        }
        self.body = Some(body);
        Ok(())
    }

    /// Destroy every low-level shape. Idempotent.
    pub(crate) fn release(&mut self, sim: &mut Simulation) {
        for handle in self.handles.drain(..) {
            sim.remove_collider(handle);
        }
        self.body = None;
    }

    pub fn id(&self) -> ColliderId {
        self.id
    }

    pub fn body(&self) -> Option<BodyId> {
        self.body
    }

    /// Unscaled geometry as created.
    pub fn shape(&self) -> &ColliderShape {
        &self.shape
    }

    /// Current geometry, with the scale applied.
    pub fn geometry(&self) -> ColliderShape {
        self.shape.scaled(self.scale)
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    pub fn material(&self) -> PhysicsMaterial {
        self.material
    }

    pub fn density(&self) -> f32 {
        self.material.density
    }

    pub fn restitution(&self) -> f32 {
        self.material.restitution
    }

    pub fn friction(&self) -> f32 {
        self.material.friction
    }

    pub fn area(&self) -> f32 {
        self.area
    }

    /// Center of the current geometry in body space.
    pub fn center(&self) -> Vec2 {
        self.geometry().center()
    }

    pub fn offset(&self) -> Vec2 {
        self.center()
    }

    pub fn radius(&self) -> Option<f32> {
        match self.geometry() {
            ColliderShape::Circle { radius, .. } => Some(radius),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<Vec2> {
        match self.geometry() {
            ColliderShape::Box { size, .. } | ColliderShape::EdgeBox { size, .. } => Some(size),
            _ => None,
        }
    }

    pub fn points(&self) -> Option<Vec<Vec2>> {
        match self.geometry() {
            ColliderShape::Polygon { points }
            | ColliderShape::EdgePolygon { points, .. }
            | ColliderShape::EdgeChain { points, .. } => Some(points),
            ColliderShape::EdgeSegment { a, b, .. } => Some(vec![a, b]),
            _ => None,
        }
    }

    pub fn point_a(&self) -> Option<Vec2> {
        match self.geometry() {
            ColliderShape::EdgeSegment { a, .. } => Some(a),
            _ => None,
        }
    }

    pub fn point_b(&self) -> Option<Vec2> {
        match self.geometry() {
            ColliderShape::EdgeSegment { b, .. } => Some(b),
            _ => None,
        }
    }

    pub fn is_sensor(&self) -> bool {
        self.sensor
    }

    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.tag = tag;
    }

    pub fn group(&self) -> i32 {
        self.group
    }

    /// 0 = no grouping, positive = same group always collides,
    /// negative = same group never collides.
    pub fn set_group(&mut self, group: i32) {
        self.group = group;
    }

    pub fn category_bitmask(&self) -> u32 {
        self.category_bitmask
    }

    pub fn set_category_bitmask(&mut self, mask: u32) {
        self.category_bitmask = mask;
    }

    pub fn collision_bitmask(&self) -> u32 {
        self.collision_bitmask
    }

    pub fn set_collision_bitmask(&mut self, mask: u32) {
        self.collision_bitmask = mask;
    }

    pub fn contact_test_bitmask(&self) -> u32 {
        self.contact_test_bitmask
    }

    pub fn set_contact_test_bitmask(&mut self, mask: u32) {
        self.contact_test_bitmask = mask;
    }

    /// True if any owned shape contains the world-space point.
    pub(crate) fn contains_point(&self, sim: &Simulation, point: Vec2, ptm: f32) -> bool {
        let p = point_to_physics(point, ptm);
        self.handles.iter().any(|h| {
            sim.collider_pose(*h)
                .zip(sim.colliders.get(*h))
                .is_some_and(|(pose, co)| co.shape().contains_point(&pose, &p))
        })
    }

    fn rebuild(&mut self, sim: &mut Simulation, ptm: f32) -> PhysicsResult<()> {
        let parts = self.geometry().to_physics(ptm)?;
        for (handle, (shape, pose)) in self.handles.iter().zip(parts) {
            if let Some(co) = sim.colliders.get_mut(*handle) {
                co.set_shape(shape);
                co.set_position_wrt_parent(pose);
            }
        }
        Ok(())
    }

    fn apply_material(&mut self, sim: &mut Simulation) {
        for handle in &self.handles {
            if let Some(co) = sim.colliders.get_mut(*handle) {
                co.set_density(self.material.density);
                co.set_restitution(self.material.restitution);
                co.set_friction(self.material.friction);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Read access to a collider together with the simulation it lives in.
pub struct ColliderRef<'a> {
    pub(crate) collider: &'a PhysicsCollider,
    pub(crate) sim: &'a Simulation,
    pub(crate) ptm: f32,
}

impl Deref for ColliderRef<'_> {
    type Target = PhysicsCollider;

    fn deref(&self) -> &PhysicsCollider {
        self.collider
    }
}

impl ColliderRef<'_> {
    /// `point` is in world engine units.
    pub fn contains_point(&self, point: Vec2) -> bool {
        self.collider.contains_point(self.sim, point, self.ptm)
    }
}

/// Mutable access to a collider, its owning body and the simulation.
pub struct ColliderMut<'a> {
    pub(crate) collider: &'a mut PhysicsCollider,
    pub(crate) body: Option<&'a mut PhysicsBody>,
    pub(crate) sim: &'a mut Simulation,
    pub(crate) ptm: f32,
}

impl Deref for ColliderMut<'_> {
    type Target = PhysicsCollider;

    fn deref(&self) -> &PhysicsCollider {
        self.collider
    }
}

impl ColliderMut<'_> {
    pub fn contains_point(&self, point: Vec2) -> bool {
        self.collider.contains_point(&*self.sim, point, self.ptm)
    }

    pub fn set_material(&mut self, material: PhysicsMaterial) {
        self.collider.material = material;
        self.apply_material();
    }

    /// Negative densities are ignored.
    pub fn set_density(&mut self, density: f32) {
        if density < 0.0 {
            log::warn!("collider {}: ignoring negative density {density}", self.collider.id.0);
            return;
        }
        self.collider.material.density = density;
        self.apply_material();
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.collider.material.restitution = restitution;
        self.apply_material();
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.collider.material.friction = friction;
        self.apply_material();
    }

    pub fn set_sensor(&mut self, sensor: bool) {
        self.collider.sensor = sensor;
        for handle in &self.collider.handles {
            if let Some(co) = self.sim.colliders.get_mut(*handle) {
                co.set_sensor(sensor);
            }
        }
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.collider.set_tag(tag);
    }

    pub fn set_group(&mut self, group: i32) {
        self.collider.set_group(group);
    }

    pub fn set_category_bitmask(&mut self, mask: u32) {
        self.collider.set_category_bitmask(mask);
    }

    pub fn set_collision_bitmask(&mut self, mask: u32) {
        self.collider.set_collision_bitmask(mask);
    }

    pub fn set_contact_test_bitmask(&mut self, mask: u32) {
        self.collider.set_contact_test_bitmask(mask);
    }

    /// Rescale the geometry relative to its creation size.
    pub fn set_scale(&mut self, sx: f32, sy: f32) {
        let body_area = self.body.as_deref_mut().map(|b| &mut b.area);
        set_collider_scale(self.collider, body_area, self.sim, self.ptm, Vec2::new(sx, sy));
        if let Some(rb) = self.body.as_ref().and_then(|b| b.rigid_body) {
            self.sim.recompute_mass(rb);
        }
    }

    /// Destroy the low-level shapes and unlink from the body, removing this
    /// collider's area from the body total. Idempotent.
    pub fn detach_from_body(&mut self) {
        if let Some(body) = self.body.as_deref_mut() {
            if let Some(pos) = body.colliders.iter().position(|c| *c == self.collider.id) {
                body.colliders.remove(pos);
                body.area -= self.collider.area;
            }
        }
        let rb = self.body.as_ref().and_then(|b| b.rigid_body);
        self.collider.release(self.sim);
        if let Some(rb) = rb {
            self.sim.recompute_mass(rb);
        }
    }

    fn apply_material(&mut self) {
        self.collider.apply_material(self.sim);
        if let Some(rb) = self.body.as_ref().and_then(|b| b.rigid_body) {
            self.sim.recompute_mass(rb);
        }
    }
}

/// Shared by collider- and body-level scaling. Keeps the body's area total
/// in step when the collider is registered on it.
pub(crate) fn set_collider_scale(
    collider: &mut PhysicsCollider,
    body_area: Option<&mut f32>,
    sim: &mut Simulation,
    ptm: f32,
    scale: Vec2,
) {
    if matches!(collider.shape, ColliderShape::Circle { .. }) && scale.x != scale.y {
        log::warn!(
            "collider {}: circle scale must be uniform, got ({}, {})",
            collider.id.0,
            scale.x,
            scale.y
        );
        return;
    }
    if scale.x == 0.0 || scale.y == 0.0 {
        log::warn!("collider {}: zero scale is not supported", collider.id.0);
        return;
    }
    if (scale - collider.scale).abs().max_element() < f32::EPSILON {
        return;
    }

    let previous_scale = collider.scale;
    collider.scale = scale;
    if let Err(err) = collider.rebuild(sim, ptm) {
        log::error!("collider {}: rescale failed: {err}", collider.id.0);
        collider.scale = previous_scale;
        return;
    }

    let previous_area = collider.area;
    collider.area = collider.geometry().area();
    if let Some(area) = body_area {
        *area += collider.area - previous_area;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-3;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn square(half: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(-half, -half),
            Vec2::new(half, -half),
            Vec2::new(half, half),
            Vec2::new(-half, half),
        ]
    }

    #[test]
    fn area_per_kind() {
        assert!(approx_eq(ColliderShape::circle(2.0).area(), PI * 4.0));
        assert!(approx_eq(ColliderShape::rect(Vec2::new(3.0, -4.0)).area(), 12.0));
        assert!(approx_eq(ColliderShape::polygon(square(1.0)).area(), 4.0));
        assert!(approx_eq(ColliderShape::edge_box(Vec2::new(2.0, 5.0)).area(), 10.0));
        assert!(approx_eq(ColliderShape::edge_polygon(square(2.0)).area(), 16.0));
        assert_eq!(ColliderShape::segment(Vec2::ZERO, Vec2::X).area(), 0.0);
        assert_eq!(ColliderShape::edge_chain(square(1.0)).area(), 0.0);
    }

    #[test]
    fn centroid_of_offset_triangle() {
        let tri = [Vec2::new(0.0, 0.0), Vec2::new(3.0, 0.0), Vec2::new(0.0, 3.0)];
        let c = polygon_centroid(&tri);
        assert!((c - Vec2::new(1.0, 1.0)).length() < EPSILON, "got {c}");

        // Winding does not change the centroid.
        let mut reversed = tri;
        reversed.reverse();
        assert!((polygon_centroid(&reversed) - c).length() < EPSILON);
    }

    #[test]
    fn centroid_falls_back_to_average() {
        let line = [Vec2::ZERO, Vec2::new(2.0, 0.0), Vec2::new(4.0, 0.0)];
        assert!((polygon_centroid(&line) - Vec2::new(2.0, 0.0)).length() < EPSILON);
    }

    #[test]
    fn recenter_moves_centroid_to_origin() {
        let pts: Vec<Vec2> = square(1.0).into_iter().map(|p| p + Vec2::new(5.0, 5.0)).collect();
        let centered = recenter_points(&pts, None);
        assert!(polygon_centroid(&centered).length() < EPSILON);
    }

    #[test]
    fn mirrored_scale_reverses_winding() {
        let tri = ColliderShape::polygon(vec![Vec2::ZERO, Vec2::X, Vec2::Y]);
        let ColliderShape::Polygon { points } = tri.scaled(Vec2::new(-1.0, 1.0)) else {
            panic!("kind changed");
        };
        assert_eq!(points[0], Vec2::Y * Vec2::new(-1.0, 1.0));
        let signed: f32 = (0..3).map(|i| points[i].perp_dot(points[(i + 1) % 3])).sum();
        assert!(signed > 0.0, "mirrored polygon must stay counter-clockwise");
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        assert!(ColliderShape::circle(0.0).validate().is_err());
        assert!(ColliderShape::rect(Vec2::new(0.0, 1.0)).validate().is_err());
        assert!(ColliderShape::polygon(vec![Vec2::ZERO, Vec2::X]).validate().is_err());
        assert!(ColliderShape::segment(Vec2::X, Vec2::X).validate().is_err());
        assert!(ColliderShape::edge_chain(vec![Vec2::ZERO]).validate().is_err());
        assert!(ColliderShape::edge_polygon(vec![Vec2::ZERO, Vec2::X]).validate().is_err());
        assert!(ColliderShape::edge_chain(vec![Vec2::ZERO, Vec2::X]).validate().is_ok());
    }

    #[test]
    fn collinear_polygon_has_no_hull() {
        let result = PhysicsCollider::new(
            ColliderId(1),
            ColliderShape::polygon(vec![Vec2::ZERO, Vec2::X, Vec2::X * 2.0]),
            PhysicsMaterial::default(),
            10.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn polygon_is_reduced_to_hull() {
        let mut pts = square(10.0);
        pts.push(Vec2::ZERO);
        let collider = PhysicsCollider::new(
            ColliderId(1),
            ColliderShape::polygon(pts),
            PhysicsMaterial::default(),
            10.0,
        )
        .unwrap();
        assert_eq!(collider.points().map(|p| p.len()), Some(4));
        assert!(approx_eq(collider.area(), 400.0));
    }

    #[test]
    fn edge_kinds_produce_one_shape_per_edge() {
        let ptm = 10.0;
        assert_eq!(ColliderShape::edge_box(Vec2::splat(10.0)).to_physics(ptm).unwrap().len(), 4);
        assert_eq!(ColliderShape::edge_polygon(square(5.0)).to_physics(ptm).unwrap().len(), 4);
        assert_eq!(ColliderShape::edge_chain(square(5.0)).to_physics(ptm).unwrap().len(), 3);
    }

    #[test]
    fn default_material() {
        let m = PhysicsMaterial::default();
        assert_eq!((m.density, m.restitution, m.friction), (0.1, 0.5, 0.5));
        let parsed: PhysicsMaterial = serde_json::from_str(r#"{"density": 2.0}"#).unwrap();
        assert_eq!(parsed.density, 2.0);
        assert_eq!(parsed.friction, 0.5);
    }
}

// core/physics/world/query.rs
//
// Spatial queries over the colliders of in-world bodies, in engine units.
// Each query flushes pending body changes first so that it sees the world
// as the caller last left it.

use glam::Vec2;
use rapier2d::parry::bounding_volume::BoundingVolume;
use rapier2d::parry::query::Ray;

use super::PhysicsWorld;
use crate::api::types::ColliderId;
use crate::core::physics::collider::PhysicsCollider;
use crate::core::physics::helper::{point_to_physics, rect_to_aabb, vec_to_physics, Rect};

/// One ray hit, nearest point per collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayCastInfo {
    pub shape: ColliderId,
    pub start: Vec2,
    pub end: Vec2,
    pub contact: Vec2,
    /// Surface normal at the hit point.
    pub normal: Vec2,
    /// Position of the hit along the ray, in `[0, 1]`.
    pub fraction: f32,
}

impl PhysicsWorld {
    /// Report colliders crossed by the segment `start..end`, nearest first.
    /// The callback returns false to stop.
    pub fn ray_cast(&mut self, start: Vec2, end: Vec2, mut f: impl FnMut(&PhysicsWorld, &RayCastInfo) -> bool) {
        self.update_bodies();
        if (end - start).length_squared() < f32::EPSILON {
            return;
        }
        let ray = Ray::new(point_to_physics(start, self.ptm), vec_to_physics(end - start, self.ptm));

        let mut hits = Vec::new();
        for collider in self.world_colliders() {
            let mut nearest: Option<(f32, Vec2)> = None;
            for handle in &collider.handles {
                let (Some(co), Some(pose)) = (self.sim.colliders.get(*handle), self.sim.collider_pose(*handle)) else {
                    continue;
                };
                let Some(hit) = co.shape().cast_ray_and_get_normal(&pose, &ray, 1.0, true) else {
                    continue;
                };
                if nearest.map_or(true, |(toi, _)| hit.time_of_impact < toi) {
                    nearest = Some((hit.time_of_impact, Vec2::new(hit.normal.x, hit.normal.y)));
                }
            }
            if let Some((fraction, normal)) = nearest {
                hits.push(RayCastInfo {
                    shape: collider.id,
                    start,
                    end,
                    contact: start + (end - start) * fraction,
                    normal,
                    fraction,
                });
            }
        }
        hits.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));

        for hit in &hits {
            if !f(self, hit) {
                break;
            }
        }
    }

    /// Report colliders whose bounding box overlaps `rect`. The callback
    /// returns false to stop.
    pub fn query_rect(&mut self, rect: Rect, mut f: impl FnMut(&PhysicsWorld, ColliderId) -> bool) {
        self.update_bodies();
        let aabb = rect_to_aabb(rect, self.ptm);
        let found: Vec<ColliderId> = self
            .world_colliders()
            .into_iter()
            .filter(|collider| {
                collider.handles.iter().any(|handle| {
                    self.sim
                        .colliders
                        .get(*handle)
                        .zip(self.sim.collider_pose(*handle))
                        .is_some_and(|(co, pose)| co.shape().compute_aabb(&pose).intersects(&aabb))
                })
            })
            .map(|collider| collider.id)
            .collect();

        for id in found {
            if !f(self, id) {
                break;
            }
        }
    }

    /// Report colliders containing the world point. The callback returns
    /// false to stop.
    pub fn query_point(&mut self, point: Vec2, mut f: impl FnMut(&PhysicsWorld, ColliderId) -> bool) {
        self.update_bodies();
        let found: Vec<ColliderId> = self
            .world_colliders()
            .into_iter()
            .filter(|collider| collider.contains_point(&self.sim, point, self.ptm))
            .map(|collider| collider.id)
            .collect();

        for id in found {
            if !f(self, id) {
                break;
            }
        }
    }

    pub fn shapes_at(&mut self, point: Vec2) -> Vec<ColliderId> {
        let mut out = Vec::new();
        self.query_point(point, |_, id| {
            out.push(id);
            true
        });
        out
    }

    /// First collider, in creation order, containing the point.
    pub fn shape_at(&mut self, point: Vec2) -> Option<ColliderId> {
        let mut out = None;
        self.query_point(point, |_, id| {
            out = Some(id);
            false
        });
        out
    }

    /// Colliders of in-world bodies in creation order.
    fn world_colliders(&self) -> Vec<&PhysicsCollider> {
        let mut colliders: Vec<&PhysicsCollider> = self
            .collider_storage
            .values()
            .filter(|c| {
                c.body
                    .and_then(|b| self.body_storage.get(&b))
                    .is_some_and(|b| b.is_in_world())
            })
            .collect();
        colliders.sort_by_key(|c| c.id);
        colliders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::physics::body::BodyType;
    use crate::core::physics::collider::{ColliderShape, PhysicsMaterial};

    const EPSILON: f32 = 1e-2;

    /// Static 20x20 boxes centered at each x on the horizontal axis.
    fn row(xs: &[f32]) -> (PhysicsWorld, Vec<ColliderId>) {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let mut colliders = Vec::new();
        for &x in xs {
            let body = world.create_body(BodyType::Static);
            let collider = world
                .create_collider(body, ColliderShape::rect(Vec2::splat(20.0)), PhysicsMaterial::default())
                .unwrap();
            world.body_mut(body).unwrap().set_position(Vec2::new(x, 0.0));
            world.add_body(body);
            colliders.push(collider);
        }
        (world, colliders)
    }

    #[test]
    fn ray_hits_arrive_nearest_first() {
        let (mut world, colliders) = row(&[100.0, 50.0]);
        let mut hits = Vec::new();
        world.ray_cast(Vec2::ZERO, Vec2::new(200.0, 0.0), |_, info| {
            hits.push(*info);
            true
        });
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].shape, colliders[1]);
        assert!((hits[0].contact.x - 40.0).abs() < EPSILON, "got {}", hits[0].contact);
        assert!((hits[0].fraction - 0.2).abs() < 1e-3);
        assert!((hits[0].normal - Vec2::new(-1.0, 0.0)).length() < 1e-3);
        assert!(hits[0].fraction <= hits[1].fraction);
    }

    #[test]
    fn ray_callback_can_stop_early() {
        let (mut world, _) = row(&[50.0, 100.0, 150.0]);
        let mut count = 0;
        world.ray_cast(Vec2::ZERO, Vec2::new(200.0, 0.0), |_, _| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn zero_length_ray_reports_nothing() {
        let (mut world, _) = row(&[0.0]);
        let mut count = 0;
        world.ray_cast(Vec2::ZERO, Vec2::ZERO, |_, _| {
            count += 1;
            true
        });
        assert_eq!(count, 0);
    }

    #[test]
    fn rect_query_matches_bounding_boxes() {
        let (mut world, colliders) = row(&[0.0, 100.0]);
        let mut found = Vec::new();
        world.query_rect(Rect::new(-5.0, -5.0, 10.0, 10.0), |_, id| {
            found.push(id);
            true
        });
        assert_eq!(found, vec![colliders[0]]);
    }

    #[test]
    fn point_queries_skip_bodies_outside_the_world() {
        let (mut world, colliders) = row(&[0.0, 5.0]);
        assert_eq!(world.shapes_at(Vec2::new(2.0, 0.0)), colliders);
        assert_eq!(world.shape_at(Vec2::new(2.0, 0.0)), Some(colliders[0]));
        let body = world.collider(colliders[0]).unwrap().body().unwrap();
        world.remove_body(body);
        assert_eq!(world.shapes_at(Vec2::new(2.0, 0.0)), vec![colliders[1]]);
        assert_eq!(world.shape_at(Vec2::new(500.0, 0.0)), None);
    }
}

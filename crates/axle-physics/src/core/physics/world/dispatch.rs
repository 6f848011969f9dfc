// core/physics/world/dispatch.rs
//
// Turns the collision events recorded during a step into listener callbacks:
// Begin when two shapes first touch, PreSolve/PostSolve once per step while
// they touch, Separate when they part.

use glam::Vec2;
use rapier2d::prelude::{ColliderHandle, CollisionEvent};

use super::PhysicsWorld;
use crate::api::types::ColliderId;
use crate::core::physics::contact::{
    arbitrate, ActiveContact, ColliderPair, ContactData, ContactEventCode, ContactListener, ContactOverride,
    PhysicsContact, PhysicsContactPostSolve, PhysicsContactPreSolve, MAX_CONTACT_POINTS,
};
use crate::core::physics::helper::point_from_physics;

/// Manifold state of a collider pair read back from the narrow phase.
#[derive(Debug, Default)]
struct ManifoldSnapshot {
    data: ContactData,
    /// Sum of normal impulses, oriented from shape A to shape B.
    total_impulse: Vec2,
}

impl PhysicsWorld {
    pub(crate) fn dispatch_contacts(&mut self, events: Vec<CollisionEvent>) {
        let (started, stopped): (Vec<_>, Vec<_>) = events.into_iter().partition(|e| e.started());
        for event in started {
            self.contact_started(event.collider1(), event.collider2(), event.sensor());
        }
        self.solve_pass();
        for event in stopped {
            self.contact_stopped(event.collider1(), event.collider2());
        }
        self.separate_stale();
    }

    /// Run the begin checks and listeners for a new contact. Returns false
    /// if the contact must not be solved.
    pub fn collision_begin_callback(&mut self, contact: &mut PhysicsContact) -> bool {
        let suppressed = self.suppressed_pairs();
        let (Some(a), Some(b)) = (
            self.collider_storage.get(&contact.shape_a),
            self.collider_storage.get(&contact.shape_b),
        ) else {
            return false;
        };
        let verdict = arbitrate(a, b, &suppressed);
        if verdict.suppressed {
            return false;
        }

        contact.notification_enabled = verdict.notify;
        if verdict.notify {
            contact.event_code = ContactEventCode::Begin;
            self.for_each_listener(contact, |listener, contact, world| {
                if let Some(callback) = listener.on_begin.as_mut() {
                    let ret = callback(contact, world);
                    contact.result = contact.result && ret;
                }
            });
        }
        let result = contact.reset_result();
        verdict.accept && result
    }

    /// Returns false if any listener asked to skip the contact.
    pub fn collision_pre_solve_callback(
        &mut self,
        contact: &mut PhysicsContact,
        solve: &mut PhysicsContactPreSolve,
    ) -> bool {
        if !contact.notification_enabled {
            return true;
        }
        contact.event_code = ContactEventCode::PreSolve;
        self.for_each_listener(contact, |listener, contact, world| {
            if let Some(callback) = listener.on_pre_solve.as_mut() {
                let ret = callback(contact, solve, world);
                contact.result = contact.result && ret;
            }
        });
        contact.reset_result()
    }

    pub fn collision_post_solve_callback(&mut self, contact: &mut PhysicsContact, solve: &PhysicsContactPostSolve) {
        if !contact.notification_enabled {
            return;
        }
        contact.event_code = ContactEventCode::PostSolve;
        self.for_each_listener(contact, |listener, contact, world| {
            if let Some(callback) = listener.on_post_solve.as_mut() {
                callback(contact, solve, world);
            }
        });
    }

    pub fn collision_separate_callback(&mut self, contact: &mut PhysicsContact) {
        if !contact.notification_enabled {
            return;
        }
        contact.event_code = ContactEventCode::Separate;
        self.for_each_listener(contact, |listener, contact, world| {
            if let Some(callback) = listener.on_separate.as_mut() {
                callback(contact, world);
            }
        });
    }

    fn contact_started(&mut self, h1: ColliderHandle, h2: ColliderHandle, sensor: bool) {
        let (Some(&a), Some(&b)) = (self.handle_index.get(&h1), self.handle_index.get(&h2)) else {
            return;
        };
        if a == b {
            return;
        }
        let pair = ColliderPair::new(a, b);
        if let Some(active) = self.ledger.active.get_mut(&pair) {
            active.touching += 1;
            return;
        }

        let (Some(ca), Some(cb)) = (self.collider_storage.get(&a), self.collider_storage.get(&b)) else {
            return;
        };
        let (Some(body_a), Some(body_b)) = (ca.body, cb.body) else {
            return;
        };
        let mut contact = PhysicsContact::new(a, body_a, b, body_b);
        contact.sensor = sensor || ca.is_sensor() || cb.is_sensor();
        contact.data = self.manifold_snapshot(a, b).data;

        if !self.collision_begin_callback(&mut contact) {
            self.ledger.rejected.insert(pair);
        }
        contact.event_code = ContactEventCode::None;
        self.ledger.active.insert(pair, ActiveContact { contact, touching: 1 });
    }

    /// PreSolve then PostSolve for every notifying, solid, accepted contact.
    fn solve_pass(&mut self) {
        let mut pairs: Vec<ColliderPair> = self
            .ledger
            .active
            .iter()
            .filter(|(pair, active)| {
                active.contact.notification_enabled && !active.contact.sensor && !self.ledger.rejected.contains(pair)
            })
            .map(|(pair, _)| *pair)
            .collect();
        pairs.sort_by_key(|p| (p.0, p.1));

        for pair in pairs {
            let Some(active) = self.ledger.active.get(&pair) else {
                continue;
            };
            let mut contact = active.contact.clone();
            let snapshot = self.manifold_snapshot(contact.shape_a, contact.shape_b);
            contact.data = snapshot.data.clone();
            let (restitution, friction) = self.combined_material(contact.shape_a, contact.shape_b);

            if !self.ledger.ignored.contains(&pair) {
                let mut solve = match self.ledger.overrides.get(&pair) {
                    Some(o) => {
                        let mut solve = PhysicsContactPreSolve::new(o.restitution, o.friction);
                        solve.surface_velocity = o.surface_velocity;
                        solve
                    }
                    None => PhysicsContactPreSolve::new(restitution, friction),
                };
                let keep = self.collision_pre_solve_callback(&mut contact, &mut solve);
                if !keep || solve.ignored {
                    self.ledger.ignored.insert(pair);
                    self.ledger.overrides.remove(&pair);
                } else {
                    self.ledger.overrides.insert(
                        pair,
                        ContactOverride {
                            restitution: solve.restitution,
                            friction: solve.friction,
                            surface_velocity: solve.surface_velocity,
                        },
                    );
                }
            }

            if !self.ledger.ignored.contains(&pair) {
                let (restitution, friction) = self
                    .ledger
                    .overrides
                    .get(&pair)
                    .map_or((restitution, friction), |o| (o.restitution, o.friction));
                let solve = PhysicsContactPostSolve {
                    restitution,
                    friction,
                    total_impulse: snapshot.total_impulse,
                };
                self.collision_post_solve_callback(&mut contact, &solve);
            }

            if let Some(active) = self.ledger.active.get_mut(&pair) {
                active.contact.data = contact.data;
            }
        }
    }

    fn contact_stopped(&mut self, h1: ColliderHandle, h2: ColliderHandle) {
        let (Some(&a), Some(&b)) = (self.handle_index.get(&h1), self.handle_index.get(&h2)) else {
            return;
        };
        let pair = ColliderPair::new(a, b);
        let Some(active) = self.ledger.active.get_mut(&pair) else {
            return;
        };
        active.touching = active.touching.saturating_sub(1);
        if active.touching > 0 {
            return;
        }
        if let Some(active) = self.ledger.active.remove(&pair) {
            self.finish_contact(pair, active.contact);
        }
    }

    /// Contacts whose collider was destroyed or detached end here, even if
    /// the removal happened inside a callback.
    fn separate_stale(&mut self) {
        let storage = &self.collider_storage;
        let alive = |id: &ColliderId| storage.get(id).is_some_and(|c| c.body.is_some());
        let mut stale: Vec<ColliderPair> = self
            .ledger
            .active
            .keys()
            .filter(|pair| !alive(&pair.0) || !alive(&pair.1))
            .copied()
            .collect();
        stale.sort_by_key(|p| (p.0, p.1));

        for pair in stale {
            if let Some(active) = self.ledger.active.remove(&pair) {
                self.finish_contact(pair, active.contact);
            }
        }

        let storage = &self.collider_storage;
        let mut gone: Vec<ColliderId> = self
            .ledger
            .rejected
            .iter()
            .chain(self.ledger.ignored.iter())
            .chain(self.ledger.overrides.keys())
            .flat_map(|pair| [pair.0, pair.1])
            .filter(|id| !storage.contains_key(id))
            .collect();
        gone.sort();
        gone.dedup();
        for id in gone {
            self.ledger.forget_collider(id);
        }
    }

    fn finish_contact(&mut self, pair: ColliderPair, mut contact: PhysicsContact) {
        self.collision_separate_callback(&mut contact);
        self.ledger.forget(&pair);
    }

    /// Run `f` for every enabled listener whose filter matches. Listeners
    /// added during dispatch are kept but not called until the next event;
    /// listeners removed during dispatch are skipped immediately.
    fn for_each_listener(
        &mut self,
        contact: &mut PhysicsContact,
        mut f: impl FnMut(&mut ContactListener, &mut PhysicsContact, &mut PhysicsWorld),
    ) {
        let mut listeners = std::mem::take(&mut self.listeners);
        self.dispatch_depth += 1;
        for listener in listeners.iter_mut() {
            if !listener.is_enabled() || self.retired_listeners.contains(&listener.id) {
                continue;
            }
            let storage = &self.collider_storage;
            if !listener.hit_test(contact, |id| storage.get(&id).map(|c| c.group())) {
                continue;
            }
            f(listener, contact, self);
        }
        self.dispatch_depth -= 1;

        let added = std::mem::replace(&mut self.listeners, listeners);
        self.listeners.extend(added);
        if self.dispatch_depth == 0 {
            let retired = std::mem::take(&mut self.retired_listeners);
            self.listeners.retain(|l| !retired.contains(&l.id));
        }
    }

    /// Collect up to [`MAX_CONTACT_POINTS`] world points, the shared normal
    /// and the accumulated impulse over every shape pair of `a` and `b`.
    fn manifold_snapshot(&self, a: ColliderId, b: ColliderId) -> ManifoldSnapshot {
        let mut snapshot = ManifoldSnapshot::default();
        let (Some(ca), Some(cb)) = (self.collider_storage.get(&a), self.collider_storage.get(&b)) else {
            return snapshot;
        };

        for &ha in &ca.handles {
            for &hb in &cb.handles {
                let Some(pair) = self.sim.narrow_phase.contact_pair(ha, hb) else {
                    continue;
                };
                let Some(pose) = self.sim.collider_pose(pair.collider1) else {
                    continue;
                };
                let sign = if pair.collider1 == ha { 1.0 } else { -1.0 };
                for manifold in &pair.manifolds {
                    if manifold.points.is_empty() {
                        continue;
                    }
                    let normal = Vec2::new(manifold.data.normal.x, manifold.data.normal.y) * sign;
                    if snapshot.data.points.is_empty() {
                        snapshot.data.normal = normal;
                    }
                    for point in &manifold.points {
                        snapshot.total_impulse += normal * point.data.impulse * self.ptm;
                        if snapshot.data.points.len() < MAX_CONTACT_POINTS {
                            let world = pose * point.local_p1;
                            snapshot.data.points.push(point_from_physics(&world, self.ptm));
                        }
                    }
                }
            }
        }
        snapshot
    }

    /// Average restitution and friction of the two shapes.
    fn combined_material(&self, a: ColliderId, b: ColliderId) -> (f32, f32) {
        match (self.collider_storage.get(&a), self.collider_storage.get(&b)) {
            (Some(a), Some(b)) => (
                (a.restitution() + b.restitution()) * 0.5,
                (a.friction() + b.friction()) * 0.5,
            ),
            _ => (0.0, 0.0),
        }
    }
}

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use glam::Vec2;
use rapier2d::prelude::*;

use super::collider::PhysicsCollider;
use super::contact::{arbitrate, ColliderPair, ContactLedger};
use super::helper::vec_to_physics;
use crate::api::types::{BodyId, ColliderId};

// ---------------------------------------------------------------------------
// Simulation: the low-level rapier context
// ---------------------------------------------------------------------------

/// Every rapier structure a world steps, in simulation units (meters).
pub struct Simulation {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    pub(crate) islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    pub(crate) narrow_phase: NarrowPhase,
    pub(crate) bodies: RigidBodySet,
    pub(crate) colliders: ColliderSet,
    pub(crate) impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
}

impl Simulation {
    /// Gravity is in meters per second squared.
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity: vector![gravity.x, gravity.y],
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
        }
    }

    pub fn gravity(&self) -> Vec2 {
        Vec2::new(self.gravity.x, self.gravity.y)
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = vector![gravity.x, gravity.y];
    }

    /// Advance by `dt` seconds. `substeps` maps to solver iterations.
    pub(crate) fn step(&mut self, dt: f32, substeps: u32, hooks: &dyn PhysicsHooks, events: &dyn EventHandler) {
        self.integration_parameters.dt = dt;
        self.integration_parameters.num_solver_iterations =
            NonZeroUsize::new(substeps.max(1) as usize).unwrap_or(NonZeroUsize::MIN);
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            hooks,
            events,
        );
    }

    pub(crate) fn insert_body(&mut self, body: RigidBody) -> RigidBodyHandle {
        self.bodies.insert(body)
    }

    /// Remove a rigid body with everything attached to it.
    pub(crate) fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub(crate) fn insert_collider(&mut self, collider: Collider, parent: RigidBodyHandle) -> ColliderHandle {
        self.colliders.insert_with_parent(collider, parent, &mut self.bodies)
    }

    pub(crate) fn remove_collider(&mut self, handle: ColliderHandle) {
        self.colliders.remove(handle, &mut self.islands, &mut self.bodies, true);
    }

    pub(crate) fn insert_joint(
        &mut self,
        a: RigidBodyHandle,
        b: RigidBodyHandle,
        joint: GenericJoint,
    ) -> ImpulseJointHandle {
        self.impulse_joints.insert(a, b, joint, true)
    }

    pub(crate) fn remove_joint(&mut self, handle: ImpulseJointHandle) {
        self.impulse_joints.remove(handle, true);
    }

    /// Mass and inertia from the attached colliders' current shapes and densities.
    pub(crate) fn recompute_mass(&mut self, handle: RigidBodyHandle) {
        if let Some(rb) = self.bodies.get_mut(handle) {
            rb.recompute_mass_properties_from_colliders(&self.colliders);
        }
    }

    /// World pose of a collider derived from its parent's current position,
    /// so it is valid between steps too.
    pub(crate) fn collider_pose(&self, handle: ColliderHandle) -> Option<Isometry<Real>> {
        let co = self.colliders.get(handle)?;
        match (co.parent(), co.position_wrt_parent()) {
            (Some(parent), Some(local)) => self.bodies.get(parent).map(|rb| rb.position() * local),
            _ => Some(*co.position()),
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }
}

// ---------------------------------------------------------------------------
// ContactBridge: filter hooks and event collection for one step
// ---------------------------------------------------------------------------

/// Runs collider arbitration inside the rapier step and records collision
/// events for dispatch once the step returns.
pub(crate) struct ContactBridge<'a> {
    colliders: &'a HashMap<ColliderId, PhysicsCollider>,
    suppressed: &'a HashSet<(BodyId, BodyId)>,
    ledger: &'a ContactLedger,
    ptm: f32,
    events: Mutex<Vec<CollisionEvent>>,
}

impl<'a> ContactBridge<'a> {
    pub(crate) fn new(
        colliders: &'a HashMap<ColliderId, PhysicsCollider>,
        suppressed: &'a HashSet<(BodyId, BodyId)>,
        ledger: &'a ContactLedger,
        ptm: f32,
    ) -> Self {
        Self {
            colliders,
            suppressed,
            ledger,
            ptm,
            events: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn into_events(self) -> Vec<CollisionEvent> {
        self.events.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(
        &self,
        set: &ColliderSet,
        h1: ColliderHandle,
        h2: ColliderHandle,
    ) -> Option<(&'a PhysicsCollider, &'a PhysicsCollider)> {
        let id1 = ColliderId(set.get(h1)?.user_data as u32);
        let id2 = ColliderId(set.get(h2)?.user_data as u32);
        Some((self.colliders.get(&id1)?, self.colliders.get(&id2)?))
    }
}

impl PhysicsHooks for ContactBridge<'_> {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        let Some((a, b)) = self.lookup(context.colliders, context.collider1, context.collider2) else {
            return Some(SolverFlags::COMPUTE_IMPULSES);
        };
        let verdict = arbitrate(a, b, self.suppressed);
        if verdict.suppressed {
            return None;
        }
        if !verdict.accept || self.ledger.is_blocked(&ColliderPair::new(a.id, b.id)) {
            // Tracked for begin/separate events, never solved.
            return Some(SolverFlags::empty());
        }
        Some(SolverFlags::COMPUTE_IMPULSES)
    }

    fn filter_intersection_pair(&self, context: &PairFilterContext) -> bool {
        let Some((a, b)) = self.lookup(context.colliders, context.collider1, context.collider2) else {
            return true;
        };
        let verdict = arbitrate(a, b, self.suppressed);
        !verdict.suppressed && verdict.accept && !self.ledger.rejected.contains(&ColliderPair::new(a.id, b.id))
    }

    fn modify_solver_contacts(&self, context: &mut ContactModificationContext) {
        let Some((a, b)) = self.lookup(context.colliders, context.collider1, context.collider2) else {
            return;
        };
        let Some(o) = self.ledger.overrides.get(&ColliderPair::new(a.id, b.id)) else {
            return;
        };
        let tangent_velocity = vec_to_physics(o.surface_velocity, self.ptm);
        for contact in context.solver_contacts.iter_mut() {
            contact.friction = o.friction;
            contact.restitution = o.restitution;
            contact.tangent_velocity = tangent_velocity;
        }
    }
}

impl EventHandler for ContactBridge<'_> {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
        // Post-solve data is read from the narrow phase after the step.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHooks;
    impl PhysicsHooks for NoHooks {}

    #[test]
    fn gravity_pulls_dynamic_body_down() {
        let mut sim = Simulation::new(Vec2::new(0.0, -9.8));
        let handle = sim.insert_body(RigidBodyBuilder::dynamic().build());
        sim.insert_collider(ColliderBuilder::ball(0.5).build(), handle);
        for _ in 0..10 {
            sim.step(1.0 / 60.0, 1, &NoHooks, &());
        }
        let y = sim.bodies[handle].translation().y;
        assert!(y < 0.0, "body should fall, y={y}");
    }

    #[test]
    fn removing_body_removes_its_colliders() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let handle = sim.insert_body(RigidBodyBuilder::dynamic().build());
        sim.insert_collider(ColliderBuilder::ball(0.5).build(), handle);
        assert_eq!((sim.body_count(), sim.collider_count()), (1, 1));
        sim.remove_body(handle);
        assert_eq!((sim.body_count(), sim.collider_count()), (0, 0));
    }

    #[test]
    fn collider_pose_follows_teleported_parent() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let handle = sim.insert_body(RigidBodyBuilder::dynamic().build());
        let co = sim.insert_collider(
            ColliderBuilder::ball(0.5).translation(vector![1.0, 0.0]).build(),
            handle,
        );
        sim.bodies[handle].set_translation(vector![5.0, 2.0], true);
        let pose = sim.collider_pose(co).unwrap();
        assert!((pose.translation.x - 6.0).abs() < 1e-5);
        assert!((pose.translation.y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn recompute_mass_uses_density() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let handle = sim.insert_body(RigidBodyBuilder::dynamic().build());
        let co = sim.insert_collider(ColliderBuilder::cuboid(0.5, 0.5).density(1.0).build(), handle);
        sim.recompute_mass(handle);
        assert!((sim.bodies[handle].mass() - 1.0).abs() < 1e-4);
        sim.colliders[co].set_density(3.0);
        sim.recompute_mass(handle);
        assert!((sim.bodies[handle].mass() - 3.0).abs() < 1e-4);
    }
}

// core/physics/world/mod.rs
//
// PhysicsWorld owns the simulation and every body, collider and joint of
// one scene. Structural changes requested while the simulation is stepping
// are queued and applied at the next synchronization point.

mod dispatch;
mod query;
mod walk;

use std::collections::{HashMap, HashSet};

use glam::Vec2;
use rapier2d::prelude::ColliderHandle;

pub use query::RayCastInfo;

use super::body::{BodyMut, BodyRef, BodyType, PhysicsBody};
use super::collider::{ColliderMut, ColliderRef, ColliderShape, PhysicsCollider, PhysicsMaterial};
use super::contact::{body_pair, ContactLedger, ContactListener};
use super::error::{PhysicsError, PhysicsResult};
use super::joint::{JointDesc, JointMut, JointRef, JointState, PhysicsJoint};
use super::simulation::{ContactBridge, Simulation};
use crate::api::context::PhysicsConfig;
use crate::api::types::{BodyId, ColliderId, IdAllocator, JointId, ListenerId, NodeId};
use crate::core::scene::Scene;
use crate::core::time::FixedTimestep;

/// Solver iterations used when the caller drives the step directly.
const USER_STEP_SUBSTEPS: u32 = 4;

/// Whether the simulation is mid-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorldState {
    #[default]
    Unlocked,
    Locked,
}

/// Host callback run at the start or end of [`PhysicsWorld::update`].
pub type UpdateHook = Box<dyn FnMut(&mut PhysicsWorld)>;

pub struct PhysicsWorld {
    pub(crate) sim: Simulation,
    ptm: f32,
    speed: f32,
    update_rate: u32,
    update_rate_count: u32,
    update_time: f32,
    substeps: u32,
    fixed_update_rate: u32,
    fixed_timestep: Option<FixedTimestep>,
    max_fixed_steps: Option<u32>,
    auto_step: bool,
    state: WorldState,
    ids: IdAllocator,

    body_storage: HashMap<BodyId, PhysicsBody>,
    collider_storage: HashMap<ColliderId, PhysicsCollider>,
    joint_storage: HashMap<JointId, PhysicsJoint>,

    bodies: Vec<BodyId>,
    joints: Vec<JointId>,
    delay_add_bodies: Vec<BodyId>,
    delay_remove_bodies: Vec<BodyId>,
    delay_destroy_bodies: Vec<BodyId>,
    delay_add_joints: Vec<JointId>,
    delay_remove_joints: Vec<JointId>,

    listeners: Vec<ContactListener>,
    retired_listeners: Vec<ListenerId>,
    dispatch_depth: u32,
    ledger: ContactLedger,
    handle_index: HashMap<ColliderHandle, ColliderId>,

    pre_update_hook: Option<UpdateHook>,
    post_update_hook: Option<UpdateHook>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::from_config(&PhysicsConfig::default())
    }
}

impl PhysicsWorld {
    /// Gravity is in meters per second squared.
    pub fn new(gravity: Vec2) -> Self {
        Self::from_config(&PhysicsConfig {
            gravity,
            ..PhysicsConfig::default()
        })
    }

    pub fn from_config(config: &PhysicsConfig) -> Self {
        let mut world = Self {
            sim: Simulation::new(config.gravity),
            ptm: config.ptm_ratio,
            speed: config.speed,
            update_rate: config.update_rate.max(1),
            update_rate_count: 0,
            update_time: 0.0,
            substeps: config.substeps.max(1),
            fixed_update_rate: 0,
            fixed_timestep: None,
            max_fixed_steps: config.max_fixed_steps,
            auto_step: config.auto_step,
            state: WorldState::Unlocked,
            ids: IdAllocator::default(),
            body_storage: HashMap::new(),
            collider_storage: HashMap::new(),
            joint_storage: HashMap::new(),
            bodies: Vec::new(),
            joints: Vec::new(),
            delay_add_bodies: Vec::new(),
            delay_remove_bodies: Vec::new(),
            delay_destroy_bodies: Vec::new(),
            delay_add_joints: Vec::new(),
            delay_remove_joints: Vec::new(),
            listeners: Vec::new(),
            retired_listeners: Vec::new(),
            dispatch_depth: 0,
            ledger: ContactLedger::default(),
            handle_index: HashMap::new(),
            pre_update_hook: None,
            post_update_hook: None,
        };
        if config.substeps > 1 {
            world.update_rate = 1;
        }
        world.set_fixed_update_rate(config.fixed_update_rate);
        world
    }

    // -- Settings --

    pub fn gravity(&self) -> Vec2 {
        self.sim.gravity()
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.sim.set_gravity(gravity);
    }

    pub fn ptm_ratio(&self) -> f32 {
        self.ptm
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Time scale applied to every step.
    pub fn set_speed(&mut self, speed: f32) {
        if speed < 0.0 {
            log::warn!("negative world speed {speed} ignored");
            return;
        }
        self.speed = speed;
    }

    pub fn update_rate(&self) -> u32 {
        self.update_rate
    }

    /// Step once every `rate` frames in variable mode.
    pub fn set_update_rate(&mut self, rate: u32) {
        if rate == 0 {
            log::warn!("update rate must be at least 1");
            return;
        }
        self.update_rate = rate;
    }

    pub fn substeps(&self) -> u32 {
        self.substeps
    }

    /// More than one substep forces an update rate of 1.
    pub fn set_substeps(&mut self, substeps: u32) {
        if substeps == 0 {
            log::warn!("substeps must be at least 1");
            return;
        }
        self.substeps = substeps;
        if substeps > 1 {
            self.update_rate = 1;
        }
    }

    pub fn fixed_update_rate(&self) -> u32 {
        self.fixed_update_rate
    }

    /// Slices per second for fixed-rate mode; 0 selects variable mode.
    pub fn set_fixed_update_rate(&mut self, rate: u32) {
        self.fixed_update_rate = rate;
        self.fixed_timestep = (rate > 0).then(|| {
            let timestep = FixedTimestep::new(1.0 / rate as f32);
            match self.max_fixed_steps {
                Some(max) => timestep.with_max_steps(max),
                None => timestep,
            }
        });
        let fixed = rate > 0;
        for body in self.body_storage.values_mut() {
            body.fixed_update = fixed;
        }
    }

    pub fn is_auto_step(&self) -> bool {
        self.auto_step
    }

    pub fn set_auto_step(&mut self, auto_step: bool) {
        self.auto_step = auto_step;
    }

    pub fn state(&self) -> WorldState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == WorldState::Locked
    }

    pub fn set_pre_update_hook(&mut self, hook: impl FnMut(&mut PhysicsWorld) + 'static) {
        self.pre_update_hook = Some(Box::new(hook));
    }

    pub fn set_post_update_hook(&mut self, hook: impl FnMut(&mut PhysicsWorld) + 'static) {
        self.post_update_hook = Some(Box::new(hook));
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    // -- Factories --

    /// Create a body with no colliders. Its rigid body stays disabled until
    /// the body is added to the world.
    pub fn create_body(&mut self, body_type: BodyType) -> BodyId {
        let id = BodyId(self.ids.next());
        let mut body = PhysicsBody::new(id, body_type, &mut self.sim);
        body.fixed_update = self.fixed_update_rate > 0;
        self.body_storage.insert(id, body);
        log::debug!("body {} created ({body_type:?})", id.0);
        id
    }

    pub fn create_circle_body(&mut self, radius: f32, material: PhysicsMaterial, offset: Vec2) -> PhysicsResult<BodyId> {
        self.create_shape_body(BodyType::Dynamic, ColliderShape::Circle { radius, offset }, material)
    }

    pub fn create_box_body(&mut self, size: Vec2, material: PhysicsMaterial, offset: Vec2) -> PhysicsResult<BodyId> {
        self.create_shape_body(BodyType::Dynamic, ColliderShape::Box { size, offset }, material)
    }

    /// `offset` is added to every point.
    pub fn create_polygon_body(
        &mut self,
        points: &[Vec2],
        material: PhysicsMaterial,
        offset: Vec2,
    ) -> PhysicsResult<BodyId> {
        let points = points.iter().map(|p| *p + offset).collect::<Vec<_>>();
        self.create_shape_body(BodyType::Dynamic, ColliderShape::polygon(points), material)
    }

    pub fn create_edge_segment_body(
        &mut self,
        a: Vec2,
        b: Vec2,
        material: PhysicsMaterial,
        border: f32,
    ) -> PhysicsResult<BodyId> {
        self.create_shape_body(BodyType::Static, ColliderShape::EdgeSegment { a, b, border }, material)
    }

    pub fn create_edge_box_body(
        &mut self,
        size: Vec2,
        material: PhysicsMaterial,
        border: f32,
        offset: Vec2,
    ) -> PhysicsResult<BodyId> {
        self.create_shape_body(BodyType::Static, ColliderShape::EdgeBox { size, offset, border }, material)
    }

    pub fn create_edge_polygon_body(
        &mut self,
        points: &[Vec2],
        material: PhysicsMaterial,
        border: f32,
    ) -> PhysicsResult<BodyId> {
        let shape = ColliderShape::EdgePolygon {
            points: points.to_vec(),
            border,
        };
        self.create_shape_body(BodyType::Static, shape, material)
    }

    pub fn create_edge_chain_body(
        &mut self,
        points: &[Vec2],
        material: PhysicsMaterial,
        border: f32,
    ) -> PhysicsResult<BodyId> {
        let shape = ColliderShape::EdgeChain {
            points: points.to_vec(),
            border,
        };
        self.create_shape_body(BodyType::Static, shape, material)
    }

    fn create_shape_body(
        &mut self,
        body_type: BodyType,
        shape: ColliderShape,
        material: PhysicsMaterial,
    ) -> PhysicsResult<BodyId> {
        let body = self.create_body(body_type);
        if let Err(err) = self.create_collider(body, shape, material) {
            self.destroy_body(body);
            return Err(err);
        }
        Ok(body)
    }

    /// Create a collider on `body`, folding its area into the body's total.
    pub fn create_collider(
        &mut self,
        body: BodyId,
        shape: ColliderShape,
        material: PhysicsMaterial,
    ) -> PhysicsResult<ColliderId> {
        let owner = self.body_storage.get(&body).ok_or(PhysicsError::InvalidBody(body))?;
        if owner.rigid_body.is_none() {
            return Err(PhysicsError::BodyDetached(body));
        }
        let id = ColliderId(self.ids.next());
        let collider = PhysicsCollider::new(id, shape, material, self.ptm)?;
        self.collider_storage.insert(id, collider);
        let attached = match self.body_mut(body) {
            Some(mut owner) => owner.add_collider(id, true),
            None => Err(PhysicsError::InvalidBody(body)),
        };
        if let Err(err) = attached {
            self.collider_storage.remove(&id);
            return Err(err);
        }
        Ok(id)
    }

    /// Create a joint between two distinct bodies. The joint is linked into
    /// both bodies but does nothing until it is added to the world.
    pub fn create_joint(&mut self, a: BodyId, b: BodyId, desc: JointDesc) -> PhysicsResult<JointId> {
        debug_assert_ne!(a, b, "a joint needs two distinct bodies");
        if a == b {
            return Err(PhysicsError::SelfJoint(a));
        }
        for body in [a, b] {
            match self.body_storage.get(&body) {
                None => return Err(PhysicsError::InvalidBody(body)),
                Some(b) if b.rigid_body.is_none() => return Err(PhysicsError::BodyDetached(body)),
                Some(_) => {}
            }
        }
        let id = JointId(self.ids.next());
        self.joint_storage.insert(id, PhysicsJoint::new(id, a, b, desc));
        for body in [a, b] {
            if let Some(body) = self.body_storage.get_mut(&body) {
                body.joints.push(id);
            }
        }
        log::debug!("joint {} created between bodies {} and {}", id.0, a.0, b.0);
        Ok(id)
    }

    // -- Views --

    pub fn body(&self, id: BodyId) -> Option<BodyRef<'_>> {
        let body = self.body_storage.get(&id)?;
        Some(BodyRef {
            body,
            colliders: &self.collider_storage,
            sim: &self.sim,
            ptm: self.ptm,
        })
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<BodyMut<'_>> {
        let body = self.body_storage.get_mut(&id)?;
        Some(BodyMut {
            body,
            colliders: &mut self.collider_storage,
            sim: &mut self.sim,
            ptm: self.ptm,
        })
    }

    pub fn collider(&self, id: ColliderId) -> Option<ColliderRef<'_>> {
        let collider = self.collider_storage.get(&id)?;
        Some(ColliderRef {
            collider,
            sim: &self.sim,
            ptm: self.ptm,
        })
    }

    pub fn collider_mut(&mut self, id: ColliderId) -> Option<ColliderMut<'_>> {
        let collider = self.collider_storage.get_mut(&id)?;
        let body = collider.body.and_then(|b| self.body_storage.get_mut(&b));
        Some(ColliderMut {
            collider,
            body,
            sim: &mut self.sim,
            ptm: self.ptm,
        })
    }

    pub fn joint(&self, id: JointId) -> Option<JointRef<'_>> {
        let joint = self.joint_storage.get(&id)?;
        Some(JointRef {
            joint,
            sim: &self.sim,
            ptm: self.ptm,
        })
    }

    pub fn joint_mut(&mut self, id: JointId) -> Option<JointMut<'_>> {
        let joint = self.joint_storage.get_mut(&id)?;
        Some(JointMut {
            joint,
            sim: &mut self.sim,
            ptm: self.ptm,
        })
    }

    /// Bodies added to the world, in insertion order.
    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    /// Joints added to the world, in insertion order.
    pub fn joints(&self) -> &[JointId] {
        &self.joints
    }

    pub fn body_by_tag(&self, tag: i32) -> Option<BodyId> {
        self.bodies
            .iter()
            .copied()
            .find(|id| self.body_storage.get(id).is_some_and(|b| b.tag() == tag))
    }

    pub fn contains_body(&self, id: BodyId) -> bool {
        self.body_storage.contains_key(&id)
    }

    pub fn contains_collider(&self, id: ColliderId) -> bool {
        self.collider_storage.contains_key(&id)
    }

    pub fn contains_joint(&self, id: JointId) -> bool {
        self.joint_storage.contains_key(&id)
    }

    pub fn is_body_pending_add(&self, id: BodyId) -> bool {
        self.delay_add_bodies.contains(&id)
    }

    pub fn is_body_pending_remove(&self, id: BodyId) -> bool {
        self.delay_remove_bodies.contains(&id)
    }

    pub fn is_joint_pending_add(&self, id: JointId) -> bool {
        self.delay_add_joints.contains(&id)
    }

    pub fn is_joint_pending_remove(&self, id: JointId) -> bool {
        self.delay_remove_joints.contains(&id)
    }

    // -- Body lifecycle --

    /// Put a body into the simulation. Deferred while the world is locked.
    pub fn add_body(&mut self, id: BodyId) {
        let Some(body) = self.body_storage.get(&id) else {
            log::warn!("add_body: unknown body {}", id.0);
            return;
        };
        if body.rigid_body.is_none() {
            log::warn!("add_body: body {} was detached from the world", id.0);
            return;
        }
        let in_world = body.in_world;

        if let Some(pos) = self.delay_remove_bodies.iter().position(|b| *b == id) {
            self.delay_remove_bodies.remove(pos);
        } else if self.is_locked() {
            if !in_world && !self.delay_add_bodies.contains(&id) {
                self.delay_add_bodies.push(id);
            }
        } else if !in_world {
            self.do_add_body(id);
        }
        if !self.bodies.contains(&id) {
            self.bodies.push(id);
        }
    }

    /// Take a body out of the simulation, destroying its joints. The body
    /// keeps its colliders and can be added again. Deferred while locked.
    pub fn remove_body(&mut self, id: BodyId) {
        let Some(body) = self.body_storage.get(&id) else {
            log::warn!("remove_body: unknown body {}", id.0);
            return;
        };
        let in_world = body.in_world;
        for joint in body.joints.clone() {
            self.remove_joint(joint, true);
        }
        self.bodies.retain(|b| *b != id);

        if let Some(pos) = self.delay_add_bodies.iter().position(|b| *b == id) {
            self.delay_add_bodies.remove(pos);
        } else if self.is_locked() {
            if in_world && !self.delay_remove_bodies.contains(&id) {
                self.delay_remove_bodies.push(id);
            }
        } else if in_world {
            self.do_remove_body(id);
        }
    }

    pub fn remove_all_bodies(&mut self) {
        for id in self.bodies.clone() {
            self.remove_body(id);
        }
    }

    /// Remove a body, release everything it owns and forget its id.
    pub fn destroy_body(&mut self, id: BodyId) {
        if !self.body_storage.contains_key(&id) {
            log::warn!("destroy_body: unknown body {}", id.0);
            return;
        }
        self.remove_body(id);
        if self.is_locked() {
            if !self.delay_destroy_bodies.contains(&id) {
                self.delay_destroy_bodies.push(id);
            }
            return;
        }
        self.destroy_body_now(id);
    }

    /// Release a body's colliders, destroy its joints (unlinking them from
    /// the other body) and destroy its rigid body. The body stays in
    /// storage as an empty shell.
    pub fn detach_from_world(&mut self, id: BodyId) {
        if self.is_locked() {
            log::warn!("detach_from_world: body {} cannot be detached mid-step", id.0);
            return;
        }
        let Some(body) = self.body_storage.get_mut(&id) else {
            return;
        };
        let joints = std::mem::take(&mut body.joints);
        let colliders = std::mem::take(&mut body.colliders);
        let rigid_body = body.rigid_body.take();
        body.area = 0.0;
        body.in_world = false;

        for joint in joints {
            self.destroy_joint_now(joint);
        }
        for collider in colliders {
            if let Some(mut collider) = self.collider_storage.remove(&collider) {
                collider.release(&mut self.sim);
            }
        }
        if let Some(handle) = rigid_body {
            self.sim.remove_body(handle);
        }
        log::debug!("body {} detached from world", id.0);
    }

    fn destroy_body_now(&mut self, id: BodyId) {
        self.detach_from_world(id);
        self.body_storage.remove(&id);
        self.delay_add_bodies.retain(|b| *b != id);
        self.delay_remove_bodies.retain(|b| *b != id);
        log::debug!("body {} destroyed", id.0);
    }

    fn do_add_body(&mut self, id: BodyId) {
        let fixed = self.fixed_update_rate > 0;
        let Some(body) = self.body_storage.get_mut(&id) else {
            return;
        };
        if let Some(rb) = body.rigid_body.and_then(|h| self.sim.bodies.get_mut(h)) {
            rb.set_enabled(true);
            rb.wake_up(true);
        }
        body.in_world = true;
        body.fixed_update = fixed;
        log::debug!("body {} added to world", id.0);
    }

    fn do_remove_body(&mut self, id: BodyId) {
        let Some(body) = self.body_storage.get_mut(&id) else {
            return;
        };
        if let Some(rb) = body.rigid_body.and_then(|h| self.sim.bodies.get_mut(h)) {
            rb.set_enabled(false);
        }
        body.in_world = false;
        log::debug!("body {} removed from world", id.0);
    }

    /// Apply queued body adds, removes and destroys. No-op while locked.
    pub(crate) fn update_bodies(&mut self) {
        if self.is_locked() {
            return;
        }
        for id in std::mem::take(&mut self.delay_add_bodies) {
            self.do_add_body(id);
        }
        for id in std::mem::take(&mut self.delay_remove_bodies) {
            self.do_remove_body(id);
        }
        for id in std::mem::take(&mut self.delay_destroy_bodies) {
            self.destroy_body_now(id);
        }
    }

    // -- Component lifecycle --

    /// Bind a body to its owning node. The body's center sits at the middle
    /// of the node's content. A body on a running node joins the world.
    pub fn on_add(&mut self, body: BodyId, node: NodeId, scene: &mut Scene) -> PhysicsResult<()> {
        let owner = scene.get(node).ok_or(PhysicsError::InvalidNode(node))?;
        let center = owner.content_size * 0.5;
        let entry = self.body_storage.get_mut(&body).ok_or(PhysicsError::InvalidBody(body))?;
        if let Some(previous) = entry.owner.filter(|n| *n != node) {
            scene.set_body(previous, None);
        }
        entry.owner = Some(node);
        entry.owner_center_offset = center;
        scene.set_body(node, Some(body));

        let node_to_world = scene.node_to_world_transform(node);
        let (scale, rotation) = scene.world_scale_rotation(node);
        if let Some(mut view) = self.body_mut(body) {
            view.before_simulation(node_to_world, scale, rotation);
        }
        if scene.is_running(node) {
            self.on_enter(body);
        }
        Ok(())
    }

    /// Unbind a body from its node and take it out of the world.
    pub fn on_remove(&mut self, body: BodyId, scene: &mut Scene) {
        self.on_exit(body);
        if let Some(node) = self.body_storage.get_mut(&body).and_then(|b| b.owner.take()) {
            scene.set_body(node, None);
        }
    }

    /// The owning node entered the running scene.
    pub fn on_enter(&mut self, body: BodyId) {
        self.add_body(body);
    }

    /// The owning node left the running scene.
    pub fn on_exit(&mut self, body: BodyId) {
        if self.bodies.contains(&body) {
            self.remove_body(body);
        }
    }

    // -- Joint lifecycle --

    /// Request materialization of a joint at the next joint flush.
    pub fn add_joint(&mut self, id: JointId) {
        let Some(joint) = self.joint_storage.get_mut(&id) else {
            log::warn!("add_joint: unknown joint {}", id.0);
            return;
        };
        if matches!(joint.state, JointState::Detached) {
            log::warn!("add_joint: joint {} was destroyed", id.0);
            return;
        }
        joint.set_enabled_flag(true);
        joint.destroy_mark = false;

        if let Some(pos) = self.delay_remove_joints.iter().position(|j| *j == id) {
            self.delay_remove_joints.remove(pos);
        } else if !joint.is_live() && !self.delay_add_joints.contains(&id) {
            self.delay_add_joints.push(id);
        }
        if !self.joints.contains(&id) {
            self.joints.push(id);
        }
    }

    /// Take a joint out of the world. With `destroy` the joint is deleted
    /// at the next flush; otherwise it returns to pending and can be added
    /// again.
    pub fn remove_joint(&mut self, id: JointId, destroy: bool) {
        let Some(joint) = self.joint_storage.get_mut(&id) else {
            log::warn!("remove_joint: unknown joint {}", id.0);
            return;
        };
        joint.set_enabled_flag(false);
        joint.destroy_mark |= destroy;
        let destroy = joint.destroy_mark;
        let live = joint.is_live();
        self.joints.retain(|j| *j != id);

        let was_pending_add = match self.delay_add_joints.iter().position(|j| *j == id) {
            Some(pos) => {
                self.delay_add_joints.remove(pos);
                true
            }
            None => false,
        };
        if was_pending_add && !live {
            if destroy {
                if self.is_locked() {
                    self.delay_remove_joints.push(id);
                } else {
                    self.destroy_joint_now(id);
                }
            }
        } else if !self.delay_remove_joints.contains(&id) {
            self.delay_remove_joints.push(id);
        }
    }

    pub fn remove_all_joints(&mut self, destroy: bool) {
        for id in self.joints.clone() {
            self.remove_joint(id, destroy);
        }
    }

    /// Unlink a joint from both bodies and delete it. Deferred while locked.
    pub fn destroy_joint(&mut self, id: JointId) {
        if self.is_locked() {
            self.remove_joint(id, true);
        } else {
            self.destroy_joint_now(id);
        }
    }

    /// Enabled joints are in the world; disabled ones keep their settings.
    pub fn set_joint_enabled(&mut self, id: JointId, enabled: bool) {
        let Some(joint) = self.joint_storage.get(&id) else {
            log::warn!("set_joint_enabled: unknown joint {}", id.0);
            return;
        };
        if joint.is_enabled() == enabled {
            return;
        }
        if enabled {
            self.add_joint(id);
        } else {
            self.remove_joint(id, false);
        }
    }

    fn destroy_joint_now(&mut self, id: JointId) {
        let Some(mut joint) = self.joint_storage.remove(&id) else {
            return;
        };
        joint.detach(&mut self.sim);
        self.joints.retain(|j| *j != id);
        self.delay_add_joints.retain(|j| *j != id);
        self.delay_remove_joints.retain(|j| *j != id);
        for body in [joint.body_a, joint.body_b] {
            if let Some(body) = self.body_storage.get_mut(&body) {
                body.joints.retain(|j| *j != id);
            }
        }
        log::debug!("joint {} destroyed", id.0);
    }

    /// Materialize queued joints, apply queued removals, then replay the
    /// deferred writes of every live joint. No-op while locked.
    pub(crate) fn update_joints(&mut self) {
        if self.is_locked() {
            return;
        }
        let ptm = self.ptm;

        for id in std::mem::take(&mut self.delay_add_joints) {
            let Some(joint) = self.joint_storage.get(&id) else {
                continue;
            };
            let handles = (
                self.body_storage.get(&joint.body_a).and_then(|b| b.rigid_body),
                self.body_storage.get(&joint.body_b).and_then(|b| b.rigid_body),
            );
            let built = match (handles, self.joint_storage.get_mut(&id)) {
                ((Some(a), Some(b)), Some(joint)) => joint.materialize(&mut self.sim, a, b, ptm),
                _ => Err(PhysicsError::JointBuildFailed {
                    joint: id,
                    reason: "a body has no rigid body",
                }),
            };
            match built {
                Ok(()) => {
                    if let Some(joint) = self.joint_storage.get_mut(&id) {
                        joint.in_world = true;
                    }
                }
                Err(err) => {
                    log::error!("{err}; joint discarded");
                    self.destroy_joint_now(id);
                }
            }
        }

        for id in std::mem::take(&mut self.delay_remove_joints) {
            let Some(joint) = self.joint_storage.get_mut(&id) else {
                continue;
            };
            if joint.destroy_mark {
                self.destroy_joint_now(id);
            } else {
                joint.dematerialize(&mut self.sim, ptm);
                joint.in_world = false;
            }
        }

        for id in &self.joints {
            if let Some(joint) = self.joint_storage.get_mut(id) {
                if joint.has_pending_writes() {
                    joint.flush_delay_tasks(&mut self.sim, ptm);
                }
            }
        }
    }

    /// Body pairs linked by an in-world joint with collision disabled.
    pub(crate) fn suppressed_pairs(&self) -> HashSet<(BodyId, BodyId)> {
        self.joints
            .iter()
            .filter_map(|id| self.joint_storage.get(id))
            .filter(|j| !j.is_collision_enabled())
            .map(|j| body_pair(j.body_a, j.body_b))
            .collect()
    }

    // -- Contact listeners --

    pub fn add_contact_listener(&mut self, mut listener: ContactListener) -> ListenerId {
        let id = ListenerId(self.ids.next());
        listener.id = id;
        self.listeners.push(listener);
        id
    }

    pub fn remove_contact_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|l| l.id != id);
        if self.dispatch_depth > 0 {
            self.retired_listeners.push(id);
        }
    }

    pub fn contact_listener_mut(&mut self, id: ListenerId) -> Option<&mut ContactListener> {
        self.listeners.iter_mut().find(|l| l.id == id)
    }

    // -- Stepping --

    /// Advance one frame: flush queues, push node transforms, step, pull
    /// transforms back. `user_call` marks a step driven by [`step`](Self::step).
    pub fn update(&mut self, scene: &mut Scene, dt: f32, user_call: bool) {
        if let Some(mut hook) = self.pre_update_hook.take() {
            hook(self);
            self.pre_update_hook.get_or_insert(hook);
        }

        if !self.delay_add_bodies.is_empty() || !self.delay_remove_bodies.is_empty() || !self.delay_destroy_bodies.is_empty()
        {
            self.update_bodies();
        }

        self.before_simulation(scene);

        if !self.delay_add_joints.is_empty() || !self.delay_remove_joints.is_empty() {
            self.update_joints();
        }

        if dt < f32::EPSILON {
            return;
        }

        for id in &self.bodies {
            if let Some(body) = self.body_storage.get(id) {
                body.update(&mut self.sim, dt);
            }
        }

        if user_call {
            self.step_simulation(dt, USER_STEP_SUBSTEPS);
        } else if let Some((slices, slice)) = self.fixed_timestep.as_mut().map(|t| (t.accumulate(dt), t.dt())) {
            let step = slice * self.speed;
            for _ in 0..slices {
                for id in &self.bodies {
                    if let Some(body) = self.body_storage.get(id) {
                        body.fixed_update(&mut self.sim, step);
                    }
                }
                scene.fixed_update(step);
                self.step_simulation(step, 1);
            }
        } else {
            self.update_time += dt;
            self.update_rate_count += 1;
            if self.update_rate_count >= self.update_rate {
                self.step_simulation(self.update_time * self.speed, self.substeps);
                self.update_rate_count = 0;
            }
            self.update_time = 0.0;
        }

        self.after_simulation(scene);

        if let Some(mut hook) = self.post_update_hook.take() {
            hook(self);
            self.post_update_hook.get_or_insert(hook);
        }
    }

    /// Drive one frame manually. Only valid with auto-step turned off.
    pub fn step(&mut self, scene: &mut Scene, dt: f32) {
        if self.auto_step {
            log::warn!("step() is ignored while auto-step is on");
            return;
        }
        self.update(scene, dt, true);
    }

    /// One low-level step with contact bridging. The world is locked
    /// throughout, contact dispatch included.
    fn step_simulation(&mut self, dt: f32, substeps: u32) {
        if dt <= 0.0 {
            return;
        }
        self.state = WorldState::Locked;

        let suppressed = self.suppressed_pairs();
        for id in &self.joints {
            if let Some(joint) = self.joint_storage.get(id) {
                joint.drive(&mut self.sim);
            }
        }
        for collider in self.collider_storage.values() {
            for handle in &collider.handles {
                self.handle_index.insert(*handle, collider.id);
            }
        }

        let events = {
            let bridge = ContactBridge::new(&self.collider_storage, &suppressed, &self.ledger, self.ptm);
            self.sim.step(dt, substeps, &bridge, &bridge);
            bridge.into_events()
        };

        for id in &self.bodies {
            if let Some(body) = self.body_storage.get(id) {
                body.clamp_velocity(&mut self.sim, self.ptm);
            }
        }

        self.dispatch_contacts(events);

        let sim = &self.sim;
        self.handle_index.retain(|handle, _| sim.colliders.contains(*handle));
        self.state = WorldState::Unlocked;
    }
}

impl Drop for PhysicsWorld {
    fn drop(&mut self) {
        self.state = WorldState::Unlocked;
        let joints: Vec<JointId> = self.joint_storage.keys().copied().collect();
        for id in joints {
            self.destroy_joint_now(id);
        }
        let bodies: Vec<BodyId> = self.body_storage.keys().copied().collect();
        for id in bodies {
            self.destroy_body_now(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::components::node::Node;

    const EPSILON: f32 = 1e-3;

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(Vec2::new(0.0, -9.8))
    }

    #[test]
    fn created_body_is_outside_the_world() {
        let mut world = world();
        let body = world.create_circle_body(5.0, PhysicsMaterial::default(), Vec2::ZERO).unwrap();
        assert!(!world.body(body).unwrap().is_in_world());
        assert!(world.bodies().is_empty());
        world.add_body(body);
        assert!(world.body(body).unwrap().is_in_world());
        assert_eq!(world.bodies(), &[body]);
    }

    #[test]
    fn invalid_geometry_leaves_no_body() {
        let mut world = world();
        let err = world.create_circle_body(0.0, PhysicsMaterial::default(), Vec2::ZERO);
        assert!(matches!(err, Err(PhysicsError::InvalidGeometry { .. })));
        assert_eq!(world.simulation().body_count(), 0);
    }

    #[test]
    fn edge_bodies_are_static() {
        let mut world = world();
        let ground = world
            .create_edge_segment_body(Vec2::new(-100.0, 0.0), Vec2::new(100.0, 0.0), PhysicsMaterial::default(), 0.0)
            .unwrap();
        assert_eq!(world.body(ground).unwrap().body_type(), BodyType::Static);
    }

    #[test]
    fn locked_add_is_deferred_until_flush() {
        let mut world = world();
        let body = world.create_body(BodyType::Dynamic);
        world.state = WorldState::Locked;
        world.add_body(body);
        assert!(world.is_body_pending_add(body));
        assert!(!world.body(body).unwrap().is_in_world());
        world.update_bodies();
        assert!(world.is_body_pending_add(body), "flush is a no-op while locked");
        world.state = WorldState::Unlocked;
        world.update_bodies();
        assert!(world.body(body).unwrap().is_in_world());
    }

    #[test]
    fn locked_add_then_remove_is_a_no_op() {
        let mut world = world();
        let body = world.create_body(BodyType::Dynamic);
        world.state = WorldState::Locked;
        world.add_body(body);
        world.remove_body(body);
        assert!(!world.is_body_pending_add(body));
        assert!(!world.is_body_pending_remove(body));
        world.state = WorldState::Unlocked;
        world.update_bodies();
        assert!(!world.body(body).unwrap().is_in_world());
        assert!(world.bodies().is_empty());
    }

    #[test]
    fn locked_destroy_waits_for_unlock() {
        let mut world = world();
        let body = world.create_circle_body(5.0, PhysicsMaterial::default(), Vec2::ZERO).unwrap();
        world.add_body(body);
        world.state = WorldState::Locked;
        world.destroy_body(body);
        assert!(world.contains_body(body));
        world.state = WorldState::Unlocked;
        world.update_bodies();
        assert!(!world.contains_body(body));
        assert_eq!(world.simulation().collider_count(), 0);
    }

    #[test]
    fn joint_waits_for_flush() {
        let mut world = world();
        let a = world.create_body(BodyType::Dynamic);
        let b = world.create_body(BodyType::Dynamic);
        let joint = world.create_joint(a, b, JointDesc::Motor { rate: 1.0 }).unwrap();
        world.add_joint(joint);
        assert!(world.joint(joint).unwrap().is_pending());
        world.update_joints();
        assert!(world.joint(joint).unwrap().is_live());
        assert_eq!(world.simulation().joint_count(), 1);
    }

    #[test]
    fn disabled_joint_keeps_its_settings() {
        let mut world = world();
        let a = world.create_body(BodyType::Dynamic);
        let b = world.create_body(BodyType::Dynamic);
        let joint = world.create_joint(a, b, JointDesc::Motor { rate: 2.0 }).unwrap();
        world.add_joint(joint);
        world.update_joints();
        world.set_joint_enabled(joint, false);
        world.update_joints();
        let view = world.joint(joint).unwrap();
        assert!(view.is_pending());
        assert_eq!(view.rate(), Some(2.0));
        assert_eq!(world.simulation().joint_count(), 0);
        world.set_joint_enabled(joint, true);
        world.update_joints();
        assert!(world.joint(joint).unwrap().is_live());
    }

    #[test]
    fn distance_survives_disable_and_enable() {
        let mut world = world();
        let a = world.create_body(BodyType::Dynamic);
        let b = world.create_body(BodyType::Dynamic);
        let joint = world
            .create_joint(
                a,
                b,
                JointDesc::Distance {
                    anchor_a: Vec2::ZERO,
                    anchor_b: Vec2::new(15.0, 0.0),
                },
            )
            .unwrap();
        world.add_joint(joint);
        world.update_joints();
        world.joint_mut(joint).unwrap().set_distance(40.0);

        world.set_joint_enabled(joint, false);
        world.update_joints();
        assert_eq!(world.joint(joint).unwrap().distance(), Some(40.0));

        world.set_joint_enabled(joint, true);
        world.update_joints();
        let view = world.joint(joint).unwrap();
        assert!(view.is_live());
        assert!((view.distance().unwrap() - 40.0).abs() < EPSILON);
    }

    #[test]
    fn fixed_slices_are_scaled_by_speed() {
        let mut world = world();
        let mut scene = Scene::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        scene.set_fixed_update_hook(move |dt| sink.borrow_mut().push(dt));
        world.set_fixed_update_rate(64);
        world.set_speed(0.5);
        world.update(&mut scene, 2.0 / 64.0, false);
        assert_eq!(seen.borrow().as_slice(), &[1.0 / 128.0, 1.0 / 128.0]);
    }

    #[test]
    fn failed_materialization_discards_joint() {
        let mut world = world();
        let a = world.create_body(BodyType::Dynamic);
        let b = world.create_body(BodyType::Dynamic);
        let joint = world
            .create_joint(
                a,
                b,
                JointDesc::Groove {
                    groove_a: Vec2::ZERO,
                    groove_b: Vec2::ZERO,
                    anchor_b: Vec2::ZERO,
                },
            )
            .unwrap();
        world.add_joint(joint);
        world.update_joints();
        assert!(!world.contains_joint(joint));
        assert!(world.body(a).unwrap().joints().is_empty());
        assert!(world.joints().is_empty());
    }

    #[test]
    fn removing_body_destroys_its_joints() {
        let mut world = world();
        let a = world.create_body(BodyType::Dynamic);
        let b = world.create_body(BodyType::Dynamic);
        world.add_body(a);
        world.add_body(b);
        let joint = world.create_joint(a, b, JointDesc::Fixed { anchor: Vec2::ZERO }).unwrap();
        world.add_joint(joint);
        world.update_joints();
        world.remove_body(a);
        world.update_joints();
        assert!(!world.contains_joint(joint));
        assert!(world.body(b).unwrap().joints().is_empty());
    }

    #[test]
    fn substeps_force_update_rate_one() {
        let mut world = world();
        world.set_update_rate(3);
        world.set_substeps(4);
        assert_eq!(world.update_rate(), 1);
    }

    #[test]
    fn fixed_rate_flag_reaches_bodies() {
        let mut world = world();
        let body = world.create_body(BodyType::Dynamic);
        world.set_fixed_update_rate(60);
        assert!(world.body(body).unwrap().is_fixed_update());
        world.set_fixed_update_rate(0);
        assert!(!world.body(body).unwrap().is_fixed_update());
    }

    #[test]
    fn update_rate_skips_frames() {
        let mut world = world();
        let mut scene = Scene::new();
        world.set_update_rate(2);
        let body = world.create_circle_body(5.0, PhysicsMaterial::default(), Vec2::ZERO).unwrap();
        world.add_body(body);
        world.update(&mut scene, 1.0 / 60.0, false);
        assert_eq!(world.body(body).unwrap().velocity(), Vec2::ZERO);
        world.update(&mut scene, 1.0 / 60.0, false);
        assert!(world.body(body).unwrap().velocity().y < 0.0);
    }

    #[test]
    fn step_is_ignored_with_auto_step() {
        let mut world = world();
        let mut scene = Scene::new();
        let body = world.create_circle_body(5.0, PhysicsMaterial::default(), Vec2::ZERO).unwrap();
        world.add_body(body);
        world.step(&mut scene, 1.0 / 60.0);
        assert_eq!(world.body(body).unwrap().velocity(), Vec2::ZERO);
        world.set_auto_step(false);
        world.step(&mut scene, 1.0 / 60.0);
        assert!(world.body(body).unwrap().velocity().y < 0.0);
    }

    #[test]
    fn tiny_dt_pushes_transforms_without_stepping() {
        let mut world = world();
        let mut scene = Scene::new();
        let node = scene.spawn(Node::new().with_position(Vec2::new(40.0, 50.0)));
        scene.add_child(scene.root(), node);
        let body = world.create_circle_body(5.0, PhysicsMaterial::default(), Vec2::ZERO).unwrap();
        world.on_add(body, node, &mut scene).unwrap();
        scene.get_mut(node).unwrap().position = Vec2::new(70.0, 50.0);
        world.update(&mut scene, 0.0, false);
        let position = world.body(body).unwrap().position();
        assert!((position - Vec2::new(70.0, 50.0)).length() < EPSILON, "got {position}");
        assert_eq!(world.body(body).unwrap().velocity(), Vec2::ZERO);
    }

    #[test]
    fn hooks_run_around_update() {
        use std::cell::Cell;

        let mut world = world();
        let mut scene = Scene::new();
        let calls = Rc::new(Cell::new(0));
        let pre = Rc::clone(&calls);
        world.set_pre_update_hook(move |_| pre.set(pre.get() + 1));
        let post = Rc::clone(&calls);
        world.set_post_update_hook(move |_| post.set(post.get() + 10));
        world.update(&mut scene, 1.0 / 60.0, false);
        assert_eq!(calls.get(), 11);
    }

    #[test]
    fn body_by_tag_finds_world_bodies() {
        let mut world = world();
        let body = world.create_body(BodyType::Dynamic);
        world.body_mut(body).unwrap().set_tag(7);
        assert_eq!(world.body_by_tag(7), None);
        world.add_body(body);
        assert_eq!(world.body_by_tag(7), Some(body));
    }
}

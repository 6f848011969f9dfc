use std::cell::Cell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use glam::{Affine2, Vec2};
use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

use super::collider::{set_collider_scale, PhysicsCollider};
use super::error::{PhysicsError, PhysicsResult};
use super::helper::{
    degrees_to_physics_angle, moment_from_physics, physics_angle_to_degrees, point_from_physics, point_to_physics,
    torque_to_physics, vec_from_physics, vec_to_physics,
};
use super::simulation::Simulation;
use super::PHYSICS_INFINITY;
use crate::api::types::{BodyId, ColliderId, JointId, NodeId};

/// How a body takes part in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyType {
    #[default]
    Dynamic,
    /// Moved only by velocity or by the scene graph; pushes dynamic bodies.
    Kinematic,
    Static,
}

impl BodyType {
    fn to_rapier(self) -> RigidBodyType {
        match self {
            BodyType::Dynamic => RigidBodyType::Dynamic,
            BodyType::Kinematic => RigidBodyType::KinematicVelocityBased,
            BodyType::Static => RigidBodyType::Fixed,
        }
    }
}

/// Engine-side state of one rigid body. Simulation-backed properties are
/// reached through [`BodyRef`] and [`BodyMut`].
#[derive(Debug)]
pub struct PhysicsBody {
    pub(crate) id: BodyId,
    pub(crate) rigid_body: Option<RigidBodyHandle>,
    pub(crate) colliders: Vec<ColliderId>,
    pub(crate) joints: Vec<JointId>,
    pub(crate) owner: Option<NodeId>,
    pub(crate) in_world: bool,
    /// Content center of the owning node, in node space.
    pub(crate) owner_center_offset: Vec2,
    pub(crate) area: f32,
    pub(crate) fixed_update: bool,
    body_type: BodyType,
    rotation_enabled: bool,
    gravity_enabled: bool,
    velocity_limit: f32,
    angular_velocity_limit: f32,
    linear_damping: f32,
    angular_damping: f32,
    position_offset: Vec2,
    rotation_offset: f32,
    tag: i32,
    recorded_position: Vec2,
    recorded_rotation: f32,
    recorded_scale: Vec2,
    /// Last seen simulation angle and the engine rotation derived from it.
    rotation_cache: Cell<(Real, f32)>,
}

impl PhysicsBody {
    /// Create the engine body and its rigid body. The rigid body stays
    /// disabled until the body is added to a world.
    pub(crate) fn new(id: BodyId, body_type: BodyType, sim: &mut Simulation) -> Self {
        let rb = RigidBodyBuilder::new(body_type.to_rapier())
            .enabled(false)
            .user_data(id.0 as u128)
            .build();
        let handle = sim.insert_body(rb);
        Self {
            id,
            rigid_body: Some(handle),
            colliders: Vec::new(),
            joints: Vec::new(),
            owner: None,
            in_world: false,
            owner_center_offset: Vec2::ZERO,
            area: 0.0,
            fixed_update: false,
            body_type,
            rotation_enabled: true,
            gravity_enabled: true,
            velocity_limit: PHYSICS_INFINITY,
            angular_velocity_limit: PHYSICS_INFINITY,
            linear_damping: 0.0,
            angular_damping: 0.0,
            position_offset: Vec2::ZERO,
            rotation_offset: 0.0,
            tag: 0,
            recorded_position: Vec2::ZERO,
            recorded_rotation: 0.0,
            recorded_scale: Vec2::ONE,
            rotation_cache: Cell::new((0.0, 0.0)),
        }
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }

    pub fn is_rotation_enabled(&self) -> bool {
        self.rotation_enabled
    }

    pub fn is_gravity_enabled(&self) -> bool {
        self.gravity_enabled
    }

    /// Sum of the registered colliders' areas.
    pub fn area(&self) -> f32 {
        self.area
    }

    pub fn colliders(&self) -> &[ColliderId] {
        &self.colliders
    }

    pub fn joints(&self) -> &[JointId] {
        &self.joints
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// True while the body is registered with its world's simulation.
    pub fn is_in_world(&self) -> bool {
        self.in_world
    }

    pub fn velocity_limit(&self) -> f32 {
        self.velocity_limit
    }

    /// Engine units per second. Enforced after every simulation step.
    pub fn set_velocity_limit(&mut self, limit: f32) {
        self.velocity_limit = limit;
    }

    pub fn angular_velocity_limit(&self) -> f32 {
        self.angular_velocity_limit
    }

    pub fn set_angular_velocity_limit(&mut self, limit: f32) {
        self.angular_velocity_limit = limit;
    }

    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    pub fn set_linear_damping(&mut self, damping: f32) {
        self.linear_damping = damping;
    }

    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    pub fn set_angular_damping(&mut self, damping: f32) {
        self.angular_damping = damping;
    }

    pub fn position_offset(&self) -> Vec2 {
        self.position_offset
    }

    pub fn rotation_offset(&self) -> f32 {
        self.rotation_offset
    }

    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.tag = tag;
    }

    pub fn is_fixed_update(&self) -> bool {
        self.fixed_update
    }

    fn rb<'s>(&self, sim: &'s Simulation) -> Option<&'s RigidBody> {
        self.rigid_body.and_then(|h| sim.bodies.get(h))
    }

    fn rb_mut<'s>(&self, sim: &'s mut Simulation) -> Option<&'s mut RigidBody> {
        self.rigid_body.and_then(|h| sim.bodies.get_mut(h))
    }

    // -- Simulation-backed reads --

    fn position(&self, sim: &Simulation, ptm: f32) -> Vec2 {
        self.rb(sim)
            .map(|rb| vec_from_physics(rb.translation(), ptm) + self.position_offset)
            .unwrap_or(self.position_offset)
    }

    fn rotation(&self, sim: &Simulation) -> f32 {
        let angle = self.rb(sim).map(|rb| rb.rotation().angle()).unwrap_or(0.0);
        let (cached_angle, cached_rotation) = self.rotation_cache.get();
        if cached_angle == angle {
            return cached_rotation;
        }
        let rotation = physics_angle_to_degrees(angle) - self.rotation_offset;
        self.rotation_cache.set((angle, rotation));
        rotation
    }

    fn velocity(&self, sim: &Simulation, ptm: f32) -> Vec2 {
        self.rb(sim).map(|rb| vec_from_physics(rb.linvel(), ptm)).unwrap_or(Vec2::ZERO)
    }

    fn angular_velocity(&self, sim: &Simulation) -> f32 {
        self.rb(sim).map(|rb| rb.angvel()).unwrap_or(0.0)
    }

    fn mass(&self, sim: &Simulation) -> f32 {
        if !self.is_dynamic() {
            return PHYSICS_INFINITY;
        }
        self.rb(sim).map(|rb| rb.mass()).unwrap_or(0.0)
    }

    fn moment(&self, sim: &Simulation, ptm: f32) -> f32 {
        if !self.is_dynamic() || !self.rotation_enabled {
            return PHYSICS_INFINITY;
        }
        self.rb(sim)
            .map(|rb| moment_from_physics(rb.mass_properties().local_mprops.principal_inertia(), ptm))
            .unwrap_or(0.0)
    }

    fn is_resting(&self, sim: &Simulation) -> bool {
        self.rb(sim).is_some_and(|rb| rb.is_sleeping())
    }

    fn local_to_world(&self, sim: &Simulation, ptm: f32, point: Vec2) -> Vec2 {
        let p = point_to_physics(point, ptm);
        self.rb(sim)
            .map(|rb| point_from_physics(&(rb.position() * p), ptm))
            .unwrap_or(point)
    }

    fn world_to_local(&self, sim: &Simulation, ptm: f32, point: Vec2) -> Vec2 {
        let p = point_to_physics(point, ptm);
        self.rb(sim)
            .map(|rb| point_from_physics(&rb.position().inverse_transform_point(&p), ptm))
            .unwrap_or(point)
    }

    fn velocity_at_world_point(&self, sim: &Simulation, ptm: f32, point: Vec2) -> Vec2 {
        let p = point_to_physics(point, ptm);
        self.rb(sim)
            .map(|rb| vec_from_physics(&rb.velocity_at_point(&p), ptm))
            .unwrap_or(Vec2::ZERO)
    }

    // -- Per-step maintenance --

    fn apply_damping(&self, sim: &mut Simulation, dt: f32) {
        if !self.is_dynamic() || (self.linear_damping == 0.0 && self.angular_damping == 0.0) {
            return;
        }
        let Some(rb) = self.rb_mut(sim) else {
            return;
        };
        if rb.is_sleeping() {
            return;
        }
        if self.linear_damping != 0.0 {
            let factor = (1.0 - dt * self.linear_damping).clamp(0.0, 1.0);
            let v = *rb.linvel() * factor;
            rb.set_linvel(v, false);
        }
        if self.angular_damping != 0.0 {
            let factor = (1.0 - dt * self.angular_damping).clamp(0.0, 1.0);
            let w = rb.angvel() * factor;
            rb.set_angvel(w, false);
        }
    }

    /// Per-frame damping for bodies not driven by the fixed-rate loop.
    pub(crate) fn update(&self, sim: &mut Simulation, dt: f32) {
        if !self.fixed_update {
            self.apply_damping(sim, dt);
        }
    }

    /// Per-slice damping for bodies driven by the fixed-rate loop.
    pub(crate) fn fixed_update(&self, sim: &mut Simulation, dt: f32) {
        if self.fixed_update {
            self.apply_damping(sim, dt);
        }
    }

    /// Clamp the velocities to their limits after an integration step.
    pub(crate) fn clamp_velocity(&self, sim: &mut Simulation, ptm: f32) {
        let linear_limit = self.velocity_limit / ptm;
        let angular_limit = self.angular_velocity_limit;
        let Some(rb) = self.rb_mut(sim) else {
            return;
        };
        let v = *rb.linvel();
        let speed = v.norm();
        if speed > linear_limit {
            rb.set_linvel(v * (linear_limit / speed), false);
        }
        let w = rb.angvel();
        if w.abs() > angular_limit {
            rb.set_angvel(w.signum() * angular_limit, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Read access to a body and the simulation state behind it.
pub struct BodyRef<'a> {
    pub(crate) body: &'a PhysicsBody,
    pub(crate) colliders: &'a HashMap<ColliderId, PhysicsCollider>,
    pub(crate) sim: &'a Simulation,
    pub(crate) ptm: f32,
}

impl Deref for BodyRef<'_> {
    type Target = PhysicsBody;

    fn deref(&self) -> &PhysicsBody {
        self.body
    }
}

impl<'a> BodyRef<'a> {
    /// Engine position, including the position offset.
    pub fn position(&self) -> Vec2 {
        self.body.position(self.sim, self.ptm)
    }

    /// Engine rotation in clockwise degrees.
    pub fn rotation(&self) -> f32 {
        self.body.rotation(self.sim)
    }

    pub fn velocity(&self) -> Vec2 {
        self.body.velocity(self.sim, self.ptm)
    }

    /// Radians per second, counter-clockwise.
    pub fn angular_velocity(&self) -> f32 {
        self.body.angular_velocity(self.sim)
    }

    pub fn mass(&self) -> f32 {
        self.body.mass(self.sim)
    }

    /// Moment of inertia in engine units.
    pub fn moment(&self) -> f32 {
        self.body.moment(self.sim, self.ptm)
    }

    pub fn is_resting(&self) -> bool {
        self.body.is_resting(self.sim)
    }

    pub fn local_to_world(&self, point: Vec2) -> Vec2 {
        self.body.local_to_world(self.sim, self.ptm, point)
    }

    pub fn world_to_local(&self, point: Vec2) -> Vec2 {
        self.body.world_to_local(self.sim, self.ptm, point)
    }

    pub fn velocity_at_world_point(&self, point: Vec2) -> Vec2 {
        self.body.velocity_at_world_point(self.sim, self.ptm, point)
    }

    pub fn velocity_at_local_point(&self, point: Vec2) -> Vec2 {
        let world = self.local_to_world(point);
        self.velocity_at_world_point(world)
    }

    pub fn collider(&self, id: ColliderId) -> Option<&'a PhysicsCollider> {
        self.body.colliders.contains(&id).then(|| self.colliders.get(&id)).flatten()
    }

    pub fn collider_by_tag(&self, tag: i32) -> Option<ColliderId> {
        self.body
            .colliders
            .iter()
            .copied()
            .find(|id| self.colliders.get(id).is_some_and(|c| c.tag() == tag))
    }

    fn first_collider(&self) -> Option<&PhysicsCollider> {
        self.body.colliders.first().and_then(|id| self.colliders.get(id))
    }

    pub fn category_bitmask(&self) -> u32 {
        self.first_collider().map(|c| c.category_bitmask()).unwrap_or(u32::MAX)
    }

    pub fn collision_bitmask(&self) -> u32 {
        self.first_collider().map(|c| c.collision_bitmask()).unwrap_or(u32::MAX)
    }

    pub fn contact_test_bitmask(&self) -> u32 {
        self.first_collider().map(|c| c.contact_test_bitmask()).unwrap_or(0)
    }

    pub fn group(&self) -> i32 {
        self.first_collider().map(|c| c.group()).unwrap_or(0)
    }
}

/// Mutable access to a body, the colliders it owns and the simulation.
pub struct BodyMut<'a> {
    pub(crate) body: &'a mut PhysicsBody,
    pub(crate) colliders: &'a mut HashMap<ColliderId, PhysicsCollider>,
    pub(crate) sim: &'a mut Simulation,
    pub(crate) ptm: f32,
}

impl Deref for BodyMut<'_> {
    type Target = PhysicsBody;

    fn deref(&self) -> &PhysicsBody {
        self.body
    }
}

impl DerefMut for BodyMut<'_> {
    fn deref_mut(&mut self) -> &mut PhysicsBody {
        self.body
    }
}

impl BodyMut<'_> {
    pub fn view(&self) -> BodyRef<'_> {
        BodyRef {
            body: &*self.body,
            colliders: &*self.colliders,
            sim: &*self.sim,
            ptm: self.ptm,
        }
    }

    pub fn position(&self) -> Vec2 {
        self.body.position(&*self.sim, self.ptm)
    }

    pub fn rotation(&self) -> f32 {
        self.body.rotation(&*self.sim)
    }

    pub fn velocity(&self) -> Vec2 {
        self.body.velocity(&*self.sim, self.ptm)
    }

    pub fn angular_velocity(&self) -> f32 {
        self.body.angular_velocity(&*self.sim)
    }

    pub fn is_resting(&self) -> bool {
        self.body.is_resting(&*self.sim)
    }

    fn rb_mut(&mut self) -> Option<&mut RigidBody> {
        self.body.rigid_body.and_then(|h| self.sim.bodies.get_mut(h))
    }

    fn recompute_mass(&mut self) {
        if let Some(h) = self.body.rigid_body {
            self.sim.recompute_mass(h);
        }
    }

    // -- Colliders --

    /// Register a collider created for this body. A detached collider is
    /// re-created on this body. Adding twice is a no-op.
    pub fn add_collider(&mut self, id: ColliderId, add_mass: bool) -> PhysicsResult<ColliderId> {
        let body_id = self.body.id;
        let rigid_body = self.body.rigid_body.ok_or(PhysicsError::BodyDetached(body_id))?;
        let collider = self.colliders.get_mut(&id).ok_or(PhysicsError::InvalidCollider(id))?;

        match collider.body {
            Some(owner) if owner != body_id => {
                log::warn!("collider {} belongs to body {}, not {}", id.0, owner.0, body_id.0);
                return Err(PhysicsError::InvalidCollider(id));
            }
            Some(_) => {}
            None => collider.attach(body_id, rigid_body, self.sim, self.ptm)?,
        }

        if self.body.colliders.contains(&id) {
            return Ok(id);
        }
        self.body.colliders.push(id);
        if add_mass {
            self.body.area += collider.area();
        }
        self.recompute_mass();
        Ok(id)
    }

    /// Detach and delete a collider. With `reduce_mass` its area is taken
    /// out of the body total first.
    pub fn remove_collider(&mut self, id: ColliderId, reduce_mass: bool) {
        let Some(pos) = self.body.colliders.iter().position(|c| *c == id) else {
            log::warn!("collider {} is not on body {}", id.0, self.body.id.0);
            return;
        };
        self.body.colliders.remove(pos);
        if let Some(mut collider) = self.colliders.remove(&id) {
            if reduce_mass {
                self.body.area -= collider.area();
            }
            collider.release(self.sim);
        }
        self.recompute_mass();
    }

    pub fn remove_collider_by_tag(&mut self, tag: i32, reduce_mass: bool) {
        let found = self.view().collider_by_tag(tag);
        match found {
            Some(id) => self.remove_collider(id, reduce_mass),
            None => log::warn!("body {} has no collider tagged {tag}", self.body.id.0),
        }
    }

    pub fn remove_all_colliders(&mut self, reduce_mass: bool) {
        for id in self.body.colliders.clone() {
            self.remove_collider(id, reduce_mass);
        }
    }

    // -- Forces --

    /// `offset` is a point in body space, in engine units.
    pub fn apply_force(&mut self, force: Vec2, offset: Vec2) {
        if !self.can_be_pushed() {
            return;
        }
        let point = point_to_physics(self.view().local_to_world(offset), self.ptm);
        let f = vec_to_physics(force, self.ptm);
        if let Some(rb) = self.rb_mut() {
            rb.add_force_at_point(f, point, true);
        }
    }

    pub fn apply_impulse(&mut self, impulse: Vec2, offset: Vec2) {
        if !self.can_be_pushed() {
            return;
        }
        let point = point_to_physics(self.view().local_to_world(offset), self.ptm);
        let j = vec_to_physics(impulse, self.ptm);
        if let Some(rb) = self.rb_mut() {
            rb.apply_impulse_at_point(j, point, true);
        }
    }

    pub fn apply_torque(&mut self, torque: f32) {
        if !self.can_be_pushed() {
            return;
        }
        let t = torque_to_physics(torque, self.ptm);
        if let Some(rb) = self.rb_mut() {
            rb.add_torque(t, true);
        }
    }

    pub fn reset_forces(&mut self) {
        if let Some(rb) = self.rb_mut() {
            rb.reset_forces(true);
            rb.reset_torques(true);
        }
    }

    fn can_be_pushed(&self) -> bool {
        let mass = self.body.mass(&*self.sim);
        self.body.is_dynamic() && mass > 0.0 && mass < PHYSICS_INFINITY
    }

    // -- Velocity --

    pub fn set_velocity(&mut self, velocity: Vec2) {
        if self.body.body_type == BodyType::Static {
            log::warn!("body {}: static bodies cannot have a velocity", self.body.id.0);
            return;
        }
        let v = vec_to_physics(velocity, self.ptm);
        if let Some(rb) = self.rb_mut() {
            rb.set_linvel(v, true);
        }
    }

    pub fn set_angular_velocity(&mut self, velocity: f32) {
        if self.body.body_type == BodyType::Static {
            log::warn!("body {}: static bodies cannot have an angular velocity", self.body.id.0);
            return;
        }
        if let Some(rb) = self.rb_mut() {
            rb.set_angvel(velocity, true);
        }
    }

    // -- Classification --

    pub fn set_body_type(&mut self, body_type: BodyType) {
        if self.body.body_type == body_type {
            return;
        }
        self.body.body_type = body_type;
        if let Some(rb) = self.rb_mut() {
            rb.set_body_type(body_type.to_rapier(), true);
        }
        if body_type == BodyType::Dynamic {
            self.recompute_mass();
        }
    }

    /// `false` makes the body kinematic, not static.
    pub fn set_dynamic(&mut self, dynamic: bool) {
        self.set_body_type(if dynamic { BodyType::Dynamic } else { BodyType::Kinematic });
    }

    pub fn set_rotation_enable(&mut self, enable: bool) {
        self.body.rotation_enabled = enable;
        if let Some(rb) = self.rb_mut() {
            rb.lock_rotations(!enable, true);
        }
    }

    pub fn set_gravity_enable(&mut self, enable: bool) {
        self.body.gravity_enabled = enable;
        if let Some(rb) = self.rb_mut() {
            rb.set_gravity_scale(if enable { 1.0 } else { 0.0 }, true);
        }
    }

    pub fn set_resting(&mut self, resting: bool) {
        let Some(rb) = self.rb_mut() else {
            return;
        };
        if rb.is_sleeping() == resting {
            return;
        }
        if resting {
            rb.sleep();
        } else {
            rb.wake_up(true);
        }
    }

    // -- Transform --

    pub fn set_position(&mut self, position: Vec2) {
        let t = vec_to_physics(position - self.body.position_offset, self.ptm);
        if let Some(rb) = self.rb_mut() {
            rb.set_translation(t, true);
        }
    }

    /// Re-base the offset without moving the body on screen.
    pub fn set_position_offset(&mut self, offset: Vec2) {
        if self.body.position_offset == offset {
            return;
        }
        let position = self.position();
        self.body.position_offset = offset;
        self.set_position(position);
    }

    /// Clockwise degrees.
    pub fn set_rotation(&mut self, rotation: f32) {
        let angle = degrees_to_physics_angle(rotation + self.body.rotation_offset);
        if let Some(rb) = self.rb_mut() {
            rb.set_rotation(Rotation::new(angle), true);
        }
        let actual = self.body.rb(&*self.sim).map(|rb| rb.rotation().angle()).unwrap_or(angle);
        self.body.rotation_cache.set((actual, rotation));
    }

    /// Changes of half a degree or less are ignored.
    pub fn set_rotation_offset(&mut self, offset: f32) {
        if (self.body.rotation_offset - offset).abs() <= 0.5 {
            return;
        }
        let rotation = self.rotation();
        self.body.rotation_offset = offset;
        self.set_rotation(rotation);
    }

    /// Scale every collider, then recompute mass.
    pub fn set_scale(&mut self, sx: f32, sy: f32) {
        let scale = Vec2::new(sx, sy);
        for id in &self.body.colliders {
            if let Some(collider) = self.colliders.get_mut(id) {
                set_collider_scale(collider, Some(&mut self.body.area), self.sim, self.ptm, scale);
            }
        }
        self.recompute_mass();
    }

    // -- Collision filter, forwarded to every collider --

    fn for_each_collider(&mut self, mut f: impl FnMut(&mut PhysicsCollider)) {
        for id in &self.body.colliders {
            if let Some(collider) = self.colliders.get_mut(id) {
                f(collider);
            }
        }
    }

    pub fn set_category_bitmask(&mut self, mask: u32) {
        self.for_each_collider(|c| c.set_category_bitmask(mask));
    }

    pub fn set_collision_bitmask(&mut self, mask: u32) {
        self.for_each_collider(|c| c.set_collision_bitmask(mask));
    }

    pub fn set_contact_test_bitmask(&mut self, mask: u32) {
        self.for_each_collider(|c| c.set_contact_test_bitmask(mask));
    }

    pub fn set_group(&mut self, group: i32) {
        self.for_each_collider(|c| c.set_group(group));
    }

    // -- Transform bridge --

    /// Push the owning node's world transform into the simulation,
    /// touching only what changed since the last exchange.
    pub(crate) fn before_simulation(&mut self, node_to_world: Affine2, scale: Vec2, rotation: f32) {
        if scale != self.body.recorded_scale {
            self.body.recorded_scale = scale;
            self.set_scale(scale.x, scale.y);
        }

        if rotation != self.body.recorded_rotation {
            self.body.recorded_rotation = rotation;
            self.set_rotation(rotation);
        }

        let position = node_to_world.transform_point2(self.body.owner_center_offset);
        if (position - self.body.recorded_position).length() > 1e-3 {
            self.set_position(position);
        }
        self.body.recorded_position = position;
    }

    /// Pull the simulated transform. Returns the world position and, if it
    /// changed, the world rotation.
    pub(crate) fn after_simulation(&mut self) -> (Vec2, Option<f32>) {
        let position = self.position();
        self.body.recorded_position = position;
        let rotation = self.rotation();
        let changed = (rotation != self.body.recorded_rotation).then_some(rotation);
        self.body.recorded_rotation = rotation;
        (position, changed)
    }
}

// core/physics/mod.rs
//
// 2D rigid-body physics over rapier2d. Engine code works in pixels and
// clockwise degrees; the simulation works in meters and counter-clockwise
// radians. `helper` converts between the two.

pub mod body;
pub mod collider;
pub mod contact;
pub mod error;
pub mod helper;
pub mod joint;
pub mod simulation;
pub mod world;

/// Stand-in for an unbounded mass, moment, force or velocity limit.
pub const PHYSICS_INFINITY: f32 = 1.0e7;

pub use body::{BodyMut, BodyRef, BodyType, PhysicsBody};
pub use collider::{ColliderMut, ColliderRef, ColliderShape, PhysicsCollider, PhysicsMaterial};
pub use contact::{
    ContactData, ContactEventCode, ContactFilter, ContactListener, PhysicsContact, PhysicsContactPostSolve,
    PhysicsContactPreSolve,
};
pub use error::{PhysicsError, PhysicsResult};
pub use helper::Rect;
pub use joint::{JointDesc, JointKind, JointMut, JointProperty, JointRef, PhysicsJoint, PinAnchor};
pub use simulation::Simulation;
pub use world::{PhysicsWorld, RayCastInfo, UpdateHook, WorldState};

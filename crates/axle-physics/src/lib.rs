pub mod api;
pub mod components;
pub mod core;

// Re-export key types at crate root for convenience
pub use api::context::{EngineConfig, EngineContext, Game, PhysicsConfig};
pub use api::types::{BodyId, ColliderId, JointId, ListenerId, NodeId};
pub use components::node::Node;
pub use core::scene::Scene;
pub use core::time::FixedTimestep;

pub use core::physics::{
    BodyMut, BodyRef, BodyType, ColliderMut, ColliderRef, ColliderShape, ContactData, ContactEventCode,
    ContactFilter, ContactListener, JointDesc, JointKind, JointMut, JointProperty, JointRef, PhysicsBody,
    PhysicsCollider, PhysicsContact, PhysicsContactPostSolve, PhysicsContactPreSolve, PhysicsError,
    PhysicsJoint, PhysicsMaterial, PhysicsResult, PhysicsWorld, PinAnchor, RayCastInfo, Rect, WorldState,
    PHYSICS_INFINITY,
};

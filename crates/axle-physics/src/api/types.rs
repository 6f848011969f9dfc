/// Unique identifier for a node in a [`Scene`](crate::core::scene::Scene).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Identifier of a [`PhysicsBody`](crate::core::physics::body::PhysicsBody) owned by a world.
/// Ids are never reused, so a stale id simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

/// Identifier of a [`PhysicsCollider`](crate::core::physics::collider::PhysicsCollider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderId(pub u32);

/// Identifier of a [`PhysicsJoint`](crate::core::physics::joint::PhysicsJoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointId(pub u32);

/// Handle returned when registering a contact listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

/// Monotonic id allocator. Ids start at 1 and are never handed out twice.
#[derive(Debug, Clone)]
pub(crate) struct IdAllocator {
    next: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdAllocator {
    pub(crate) fn next(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

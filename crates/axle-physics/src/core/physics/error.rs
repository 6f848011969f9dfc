use std::fmt;

use crate::api::types::{BodyId, ColliderId, JointId, NodeId};

/// Errors returned by physics construction calls.
///
/// Invalid operations on live objects (a velocity on a static body, a
/// mismatched circle scale) are not errors: they log a warning and do
/// nothing. Only calls that would otherwise hand back a new object report
/// failure through this type.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicsError {
    /// The body id does not name a live body in this world.
    InvalidBody(BodyId),
    /// The collider id does not name a live collider.
    InvalidCollider(ColliderId),
    /// The joint id does not name a live joint.
    InvalidJoint(JointId),
    /// The node id does not name a node of the scene.
    InvalidNode(NodeId),
    /// Shape parameters cannot produce a low-level shape.
    InvalidGeometry {
        /// What was wrong with the geometry
        reason: &'static str,
    },
    /// A joint was asked to connect a body to itself.
    SelfJoint(BodyId),
    /// The body has no low-level rigid body (it was detached).
    BodyDetached(BodyId),
    /// Materialization of a joint failed; the joint has been discarded.
    JointBuildFailed {
        /// The discarded joint
        joint: JointId,
        /// Why the constraint could not be built
        reason: &'static str,
    },
    /// Invalid configuration value.
    Config(String),
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBody(id) => write!(f, "invalid body {}", id.0),
            Self::InvalidCollider(id) => write!(f, "invalid collider {}", id.0),
            Self::InvalidJoint(id) => write!(f, "invalid joint {}", id.0),
            Self::InvalidNode(id) => write!(f, "invalid node {}", id.0),
            Self::InvalidGeometry { reason } => write!(f, "invalid geometry: {reason}"),
            Self::SelfJoint(id) => write!(f, "body {} cannot be joined to itself", id.0),
            Self::BodyDetached(id) => write!(f, "body {} has no rigid body", id.0),
            Self::JointBuildFailed { joint, reason } => {
                write!(f, "joint {} failed to build: {reason}", joint.0)
            }
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for PhysicsError {}

pub type PhysicsResult<T> = Result<T, PhysicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_id() {
        let err = PhysicsError::SelfJoint(BodyId(7));
        assert_eq!(err.to_string(), "body 7 cannot be joined to itself");
        let err = PhysicsError::InvalidGeometry { reason: "radius must be positive" };
        assert!(err.to_string().contains("radius"), "got {err}");
    }
}

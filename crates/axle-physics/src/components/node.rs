use glam::{Affine2, Vec2};

use crate::api::types::{BodyId, NodeId};

/// Anchor point at the center of a node's content box.
pub const ANCHOR_MIDDLE: Vec2 = Vec2::new(0.5, 0.5);

/// Scene-graph node: a transform plus an optional physics body slot.
///
/// `position` is where the anchor point sits in the parent's space,
/// `rotation` is in degrees, clockwise-positive.
#[derive(Debug, Clone)]
pub struct Node {
    /// Assigned by [`Scene::spawn`](crate::core::scene::Scene::spawn).
    pub id: NodeId,
    /// String tag for finding nodes by name.
    pub tag: String,
    pub position: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
    /// Normalized anchor inside the content box (0,0 bottom-left, 1,1 top-right).
    pub anchor_point: Vec2,
    /// Untransformed content box size.
    pub content_size: Vec2,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) body: Option<BodyId>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    pub fn new() -> Self {
        Self {
            id: NodeId(0),
            tag: String::new(),
            position: Vec2::ZERO,
            rotation: 0.0,
            scale: Vec2::ONE,
            anchor_point: ANCHOR_MIDDLE,
            content_size: Vec2::ZERO,
            parent: None,
            children: Vec::new(),
            body: None,
        }
    }

    // -- Builder pattern --

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec2) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_anchor_point(mut self, anchor: Vec2) -> Self {
        self.anchor_point = anchor;
        self
    }

    pub fn with_content_size(mut self, size: Vec2) -> Self {
        self.content_size = size;
        self
    }

    // -- Accessors --

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The physics body attached to this node, if any.
    pub fn physics_body(&self) -> Option<BodyId> {
        self.body
    }

    pub fn anchor_point_in_points(&self) -> Vec2 {
        self.anchor_point * self.content_size
    }

    /// Node space → parent space.
    pub fn node_to_parent_transform(&self) -> Affine2 {
        Affine2::from_scale_angle_translation(self.scale, -self.rotation.to_radians(), self.position)
            * Affine2::from_translation(-self.anchor_point_in_points())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_anchor_maps_content_center_to_position() {
        let node = Node::new()
            .with_position(Vec2::new(100.0, 50.0))
            .with_content_size(Vec2::new(40.0, 20.0));
        let center = node.node_to_parent_transform().transform_point2(node.content_size * 0.5);
        assert!((center - Vec2::new(100.0, 50.0)).length() < 1e-4, "got {center}");
    }

    #[test]
    fn clockwise_rotation_turns_x_axis_down() {
        let node = Node::new().with_rotation(90.0);
        let p = node.node_to_parent_transform().transform_point2(Vec2::X);
        assert!((p - Vec2::new(0.0, -1.0)).length() < 1e-4, "got {p}");
    }

    #[test]
    fn builder_sets_fields() {
        let node = Node::new().with_tag("crate").with_scale(Vec2::splat(2.0));
        assert_eq!(node.tag, "crate");
        assert_eq!(node.scale, Vec2::splat(2.0));
        assert!(node.physics_body().is_none());
    }
}

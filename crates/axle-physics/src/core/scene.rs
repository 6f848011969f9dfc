use std::collections::HashMap;

use glam::{Affine2, Vec2};

use crate::api::types::{BodyId, NodeId};
use crate::components::node::Node;

/// Node tree rooted at a single scene node.
///
/// Nodes are spawned detached and join the running tree through
/// [`add_child`](Scene::add_child). Only nodes reachable from the root
/// take part in the physics transform walk.
pub struct Scene {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u32,
    fixed_update_hook: Option<Box<dyn FnMut(f32)>>,
    fixed_ticks: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let root = NodeId(1);
        let mut nodes = HashMap::new();
        let mut node = Node::new().with_tag("root");
        node.id = root;
        nodes.insert(root, node);
        Self {
            nodes,
            root,
            next_id: 2,
            fixed_update_hook: None,
            fixed_ticks: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Take ownership of a node and assign it an id. The node starts detached.
    pub fn spawn(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        node.id = id;
        node.parent = None;
        node.children.clear();
        node.body = None;
        self.nodes.insert(id, node);
        id
    }

    /// Attach `child` under `parent`, detaching it from any previous parent.
    /// Returns false if either node is unknown or the link would create a cycle.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.nodes.contains_key(&parent) || !self.nodes.contains_key(&child) {
            return false;
        }
        if self.is_ancestor(child, parent) {
            log::warn!("node {} is an ancestor of {}, refusing to reparent", child.0, parent.0);
            return false;
        }

        self.remove_from_parent(child);

        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if !parent_node.children.contains(&child) {
                parent_node.children.push(child);
            }
        }
        true
    }

    /// Unlink a node from its parent. The node and its subtree stay spawned.
    pub fn remove_from_parent(&mut self, child: NodeId) {
        let old_parent = self.nodes.get(&child).and_then(|n| n.parent);
        if let Some(old) = old_parent {
            if let Some(old_node) = self.nodes.get_mut(&old) {
                old_node.children.retain(|&c| c != child);
            }
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = None;
        }
    }

    /// Remove a node and its whole subtree. Returns the removed nodes in pre-order.
    pub fn despawn(&mut self, id: NodeId) -> Vec<Node> {
        if id == self.root {
            log::warn!("the scene root cannot be despawned");
            return Vec::new();
        }
        self.remove_from_parent(id);
        self.subtree(id)
            .into_iter()
            .filter_map(|n| self.nodes.remove(&n))
            .collect()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.tag == tag)
    }

    /// True if the node is attached (directly or indirectly) to the root.
    pub fn is_running(&self, id: NodeId) -> bool {
        id == self.root || self.is_ancestor(self.root, id)
    }

    /// Pre-order ids of `id` and all its descendants.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Pre-order walk of the running tree, parents before children.
    pub fn pre_order(&self) -> Vec<NodeId> {
        self.subtree(self.root)
    }

    /// Node space → world space, composed from the top-most ancestor down.
    pub fn node_to_world_transform(&self, id: NodeId) -> Affine2 {
        let mut transform = Affine2::IDENTITY;
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.nodes.get(&c)) {
            transform = node.node_to_parent_transform() * transform;
            current = node.parent;
        }
        transform
    }

    /// Parent space → world space for `id` (identity for a top-level node).
    pub fn parent_to_world_transform(&self, id: NodeId) -> Affine2 {
        self.nodes
            .get(&id)
            .and_then(|n| n.parent)
            .map(|p| self.node_to_world_transform(p))
            .unwrap_or(Affine2::IDENTITY)
    }

    /// World-space position of the node's anchor point.
    pub fn world_position(&self, id: NodeId) -> Vec2 {
        let position = self.nodes.get(&id).map(|n| n.position).unwrap_or(Vec2::ZERO);
        self.parent_to_world_transform(id).transform_point2(position)
    }

    /// Accumulated scale and clockwise rotation (degrees) from the root down.
    pub fn world_scale_rotation(&self, id: NodeId) -> (Vec2, f32) {
        let mut scale = Vec2::ONE;
        let mut rotation = 0.0;
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.nodes.get(&c)) {
            scale *= node.scale;
            rotation += node.rotation;
            current = node.parent;
        }
        (scale, rotation)
    }

    /// Register the callback run once per fixed physics slice.
    pub fn set_fixed_update_hook(&mut self, hook: impl FnMut(f32) + 'static) {
        self.fixed_update_hook = Some(Box::new(hook));
    }

    /// Called by the physics world once per fixed slice.
    pub fn fixed_update(&mut self, dt: f32) {
        self.fixed_ticks += 1;
        if let Some(hook) = self.fixed_update_hook.as_mut() {
            hook(dt);
        }
    }

    /// Number of fixed slices run so far.
    pub fn fixed_ticks(&self) -> u64 {
        self.fixed_ticks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn set_body(&mut self, id: NodeId, body: Option<BodyId>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.body = body;
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.nodes.get(&c).and_then(|n| n.parent);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_attach() {
        let mut scene = Scene::new();
        let a = scene.spawn(Node::new().with_tag("a"));
        assert!(!scene.is_running(a));
        assert!(scene.add_child(scene.root(), a));
        assert!(scene.is_running(a));
        assert_eq!(scene.find_by_tag("a").map(|n| n.id), Some(a));
    }

    #[test]
    fn reparent_moves_child() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(Node::new());
        let b = scene.spawn(Node::new());
        let c = scene.spawn(Node::new());
        scene.add_child(root, a);
        scene.add_child(root, b);
        scene.add_child(a, c);
        scene.add_child(b, c);
        assert!(scene.get(a).unwrap().children().is_empty());
        assert_eq!(scene.get(b).unwrap().children(), &[c]);
        assert_eq!(scene.get(c).unwrap().parent(), Some(b));
    }

    #[test]
    fn cycles_are_refused() {
        let mut scene = Scene::new();
        let a = scene.spawn(Node::new());
        let b = scene.spawn(Node::new());
        scene.add_child(a, b);
        assert!(!scene.add_child(b, a));
    }

    #[test]
    fn pre_order_visits_parents_first() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(Node::new());
        let b = scene.spawn(Node::new());
        let a1 = scene.spawn(Node::new());
        scene.add_child(root, a);
        scene.add_child(root, b);
        scene.add_child(a, a1);
        assert_eq!(scene.pre_order(), vec![root, a, a1, b]);
    }

    #[test]
    fn despawn_removes_subtree() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(Node::new());
        let a1 = scene.spawn(Node::new());
        scene.add_child(root, a);
        scene.add_child(a, a1);
        let removed = scene.despawn(a);
        assert_eq!(removed.len(), 2);
        assert!(scene.get(a1).is_none());
        assert!(scene.get(root).unwrap().children().is_empty());
    }

    #[test]
    fn world_position_composes_parents() {
        let mut scene = Scene::new();
        let root = scene.root();
        let parent = scene.spawn(Node::new().with_position(Vec2::new(100.0, 0.0)).with_scale(Vec2::splat(2.0)));
        let child = scene.spawn(Node::new().with_position(Vec2::new(10.0, 5.0)));
        scene.add_child(root, parent);
        scene.add_child(parent, child);
        let p = scene.world_position(child);
        assert!((p - Vec2::new(120.0, 10.0)).length() < 1e-4, "got {p}");
    }

    #[test]
    fn fixed_update_runs_hook() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut scene = Scene::new();
        let total = Rc::new(Cell::new(0.0));
        let seen = total.clone();
        scene.set_fixed_update_hook(move |dt| seen.set(seen.get() + dt));
        scene.fixed_update(0.5);
        scene.fixed_update(0.25);
        assert_eq!(scene.fixed_ticks(), 2);
        assert!((total.get() - 0.75).abs() < 1e-6);
    }
}

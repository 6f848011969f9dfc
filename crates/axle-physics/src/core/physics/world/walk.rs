// core/physics/world/walk.rs
//
// Transform exchange between the scene graph and the simulation. Both walks
// run parents before children and carry the accumulated parent transform
// down the stack, so each node's world transform is computed once.

use glam::{Affine2, Vec2};

use super::PhysicsWorld;
use crate::api::types::NodeId;
use crate::core::scene::Scene;

impl PhysicsWorld {
    /// Push every running node's world transform into its body.
    pub(crate) fn before_simulation(&mut self, scene: &Scene) {
        let mut stack: Vec<(NodeId, Affine2, Vec2, f32)> = vec![(scene.root(), Affine2::IDENTITY, Vec2::ONE, 0.0)];
        while let Some((id, parent_to_world, parent_scale, parent_rotation)) = stack.pop() {
            let Some(node) = scene.get(id) else {
                continue;
            };
            let node_to_world = parent_to_world * node.node_to_parent_transform();
            let scale = parent_scale * node.scale;
            let rotation = parent_rotation + node.rotation;

            if let Some(body) = node.physics_body() {
                if let Some(mut view) = self.body_mut(body).filter(|b| b.is_in_world()) {
                    view.before_simulation(node_to_world, scale, rotation);
                }
            }
            for child in node.children().iter().rev() {
                stack.push((*child, node_to_world, scale, rotation));
            }
        }
    }

    /// Pull simulated positions and rotations back into node-local space.
    pub(crate) fn after_simulation(&mut self, scene: &mut Scene) {
        let mut stack: Vec<(NodeId, Affine2, f32)> = vec![(scene.root(), Affine2::IDENTITY, 0.0)];
        while let Some((id, parent_to_world, parent_rotation)) = stack.pop() {
            let body = scene.get(id).and_then(|n| n.physics_body());
            let pulled = body.and_then(|body| {
                let mut view = self.body_mut(body).filter(|b| b.is_in_world())?;
                let center = view.owner_center_offset;
                let (position, rotation) = view.after_simulation();
                Some((center, position, rotation))
            });

            if let (Some((center, position, rotation)), Some(node)) = (pulled, scene.get_mut(id)) {
                if let Some(rotation) = rotation {
                    node.rotation = rotation - parent_rotation;
                }
                let local_center = node.node_to_parent_transform().transform_point2(center) - node.position;
                node.position = parent_to_world.inverse().transform_point2(position) - local_center;
            }

            let Some(node) = scene.get(id) else {
                continue;
            };
            let node_to_world = parent_to_world * node.node_to_parent_transform();
            let rotation = parent_rotation + node.rotation;
            for child in node.children().iter().rev() {
                stack.push((*child, node_to_world, rotation));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::node::Node;
    use crate::core::physics::collider::PhysicsMaterial;

    const EPSILON: f32 = 1e-2;

    /// root -> parent -> middle -> leaf, with a ball body on the leaf.
    fn three_levels(world: &mut PhysicsWorld, scene: &mut Scene, parent: Node) -> (NodeId, NodeId, NodeId) {
        let root = scene.root();
        let parent = scene.spawn(parent);
        let middle = scene.spawn(Node::new().with_position(Vec2::new(0.0, 50.0)));
        let leaf = scene.spawn(Node::new().with_position(Vec2::new(5.0, 5.0)));
        scene.add_child(root, parent);
        scene.add_child(parent, middle);
        scene.add_child(middle, leaf);
        let body = world.create_circle_body(4.0, PhysicsMaterial::default(), Vec2::ZERO).unwrap();
        world.on_add(body, leaf, scene).unwrap();
        (parent, middle, leaf)
    }

    #[test]
    fn push_uses_the_composed_world_transform() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let mut scene = Scene::new();
        let (_, _, leaf) = three_levels(
            &mut world,
            &mut scene,
            Node::new().with_position(Vec2::new(100.0, 0.0)).with_scale(Vec2::splat(2.0)),
        );
        world.before_simulation(&scene);
        let body = scene.get(leaf).unwrap().physics_body().unwrap();
        let position = world.body(body).unwrap().position();
        assert!((position - Vec2::new(110.0, 110.0)).length() < EPSILON, "got {position}");
    }

    #[test]
    fn pull_writes_back_into_leaf_local_space() {
        let mut world = PhysicsWorld::new(Vec2::new(0.0, -9.8));
        let mut scene = Scene::new();
        let (parent, middle, leaf) = three_levels(
            &mut world,
            &mut scene,
            Node::new().with_position(Vec2::new(100.0, 0.0)),
        );
        for _ in 0..10 {
            world.update(&mut scene, 1.0 / 60.0, false);
        }
        let body = scene.get(leaf).unwrap().physics_body().unwrap();
        let simulated = world.body(body).unwrap().position();
        let shown = scene.world_position(leaf);
        assert!((simulated - shown).length() < EPSILON, "{simulated} vs {shown}");
        assert!(scene.get(leaf).unwrap().position.y < 5.0);
        assert_eq!(scene.get(parent).unwrap().position, Vec2::new(100.0, 0.0));
        assert_eq!(scene.get(middle).unwrap().position, Vec2::new(0.0, 50.0));
    }

    #[test]
    fn pull_keeps_rotation_relative_to_parents() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let mut scene = Scene::new();
        let (_, _, leaf) = three_levels(&mut world, &mut scene, Node::new().with_rotation(30.0));
        let body = scene.get(leaf).unwrap().physics_body().unwrap();
        world.body_mut(body).unwrap().set_angular_velocity(90.0);
        world.update(&mut scene, 1.0 / 60.0, false);
        let world_rotation = world.body(body).unwrap().rotation();
        let local = scene.get(leaf).unwrap().rotation;
        assert!(world_rotation != 30.0);
        assert!((local + 30.0 - world_rotation).abs() < 1e-3, "{local} + 30 vs {world_rotation}");
    }

    #[test]
    fn detached_subtree_is_not_pushed() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let mut scene = Scene::new();
        let (parent, _, leaf) = three_levels(&mut world, &mut scene, Node::new());
        let body = scene.get(leaf).unwrap().physics_body().unwrap();
        let before = world.body(body).unwrap().position();
        scene.remove_from_parent(parent);
        scene.get_mut(leaf).unwrap().position = Vec2::new(300.0, 300.0);
        world.before_simulation(&scene);
        assert_eq!(world.body(body).unwrap().position(), before);
    }
}

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::api::types::{BodyId, NodeId};
use crate::core::physics::{PhysicsError, PhysicsResult, PhysicsWorld};
use crate::core::scene::Scene;

/// Physics settings, loadable from the `physics` section of a JSON config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Meters per second squared. Not scaled by the ptm ratio.
    pub gravity: Vec2,
    /// Pixels per meter.
    pub ptm_ratio: f32,
    /// Time scale applied to every step.
    pub speed: f32,
    /// Step once every `update_rate` frames (variable mode only).
    pub update_rate: u32,
    /// Solver iterations per step. More than 1 forces `update_rate` to 1.
    pub substeps: u32,
    /// Fixed slices per second; 0 selects variable mode.
    pub fixed_update_rate: u32,
    /// When false the host drives the world with [`PhysicsWorld::step`].
    pub auto_step: bool,
    /// Cap on fixed slices per frame. Unset drains the accumulator.
    pub max_fixed_steps: Option<u32>,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -9.8),
            ptm_ratio: 10.0,
            speed: 1.0,
            update_rate: 1,
            substeps: 1,
            fixed_update_rate: 0,
            auto_step: true,
            max_fixed_steps: None,
        }
    }
}

impl PhysicsConfig {
    pub fn validate(&self) -> PhysicsResult<()> {
        if !self.ptm_ratio.is_finite() || self.ptm_ratio <= 0.0 {
            return Err(PhysicsError::Config(format!("ptm_ratio must be positive, got {}", self.ptm_ratio)));
        }
        if self.speed < 0.0 {
            return Err(PhysicsError::Config(format!("speed must not be negative, got {}", self.speed)));
        }
        if self.update_rate == 0 || self.substeps == 0 {
            return Err(PhysicsError::Config("update_rate and substeps must be at least 1".into()));
        }
        Ok(())
    }
}

/// Engine configuration provided by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub physics: PhysicsConfig,
}

impl EngineConfig {
    /// Parse and validate a config from a JSON string.
    pub fn from_json(json: &str) -> PhysicsResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| PhysicsError::Config(e.to_string()))?;
        config.physics.validate()?;
        Ok(config)
    }
}

/// The contract a hosted game fulfills.
pub trait Game {
    fn config(&self) -> EngineConfig {
        EngineConfig::default()
    }

    /// Build the initial scene.
    fn init(&mut self, ctx: &mut EngineContext);

    /// Per-frame logic, run before physics.
    fn update(&mut self, ctx: &mut EngineContext, dt: f32);
}

/// A scene and the physics world attached to it. Scene edits made through
/// the context keep body membership in step with the running tree.
pub struct EngineContext {
    pub scene: Scene,
    pub physics: PhysicsWorld,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineContext {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            scene: Scene::new(),
            physics: PhysicsWorld::from_config(&config.physics),
        }
    }

    /// Create a context for `game` and let it build its scene.
    pub fn start<G: Game>(game: &mut G) -> Self {
        let mut ctx = Self::with_config(&game.config());
        game.init(&mut ctx);
        ctx
    }

    /// Run one frame: game logic, then physics.
    pub fn run_frame<G: Game>(&mut self, game: &mut G, dt: f32) {
        game.update(self, dt);
        self.tick(dt);
    }

    /// Advance physics by one frame when auto-step is on.
    pub fn tick(&mut self, dt: f32) {
        if self.physics.is_auto_step() {
            self.physics.update(&mut self.scene, dt, false);
        }
    }

    /// Attach a body to a node. A running node puts the body in the world.
    pub fn attach_body(&mut self, node: NodeId, body: BodyId) -> PhysicsResult<()> {
        self.physics.on_add(body, node, &mut self.scene)
    }

    /// Detach the node's body, taking it out of the world.
    pub fn detach_body(&mut self, node: NodeId) {
        if let Some(body) = self.scene.get(node).and_then(|n| n.physics_body()) {
            self.physics.on_remove(body, &mut self.scene);
        }
    }

    /// Attach `child` under `parent`. Bodies in a subtree that becomes
    /// running enter the world.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.scene.add_child(parent, child) {
            return false;
        }
        if self.scene.is_running(child) {
            for body in self.subtree_bodies(child) {
                self.physics.on_enter(body);
            }
        }
        true
    }

    /// Unlink a node. Bodies in its subtree leave the world but survive.
    pub fn remove_from_parent(&mut self, child: NodeId) {
        if self.scene.is_running(child) {
            for body in self.subtree_bodies(child) {
                self.physics.on_exit(body);
            }
        }
        self.scene.remove_from_parent(child);
    }

    /// Remove a node and its subtree, destroying every body they own.
    pub fn despawn(&mut self, node: NodeId) {
        for body in self.subtree_bodies(node) {
            self.physics.destroy_body(body);
        }
        self.scene.despawn(node);
    }

    fn subtree_bodies(&self, node: NodeId) -> Vec<BodyId> {
        self.scene
            .subtree(node)
            .into_iter()
            .filter_map(|id| self.scene.get(id).and_then(|n| n.physics_body()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::node::Node;
    use crate::core::physics::PhysicsMaterial;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config = EngineConfig::from_json(r#"{ "physics": { "ptm_ratio": 32.0 } }"#).unwrap();
        assert_eq!(config.physics.ptm_ratio, 32.0);
        assert_eq!(config.physics.gravity, Vec2::new(0.0, -9.8));
        assert!(config.physics.auto_step);
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn config_rejects_bad_values() {
        let err = EngineConfig::from_json(r#"{ "physics": { "ptm_ratio": 0.0 } }"#);
        assert!(matches!(err, Err(PhysicsError::Config(_))));
        let err = EngineConfig::from_json("not json");
        assert!(matches!(err, Err(PhysicsError::Config(_))));
    }

    #[test]
    fn world_follows_config() {
        let config = EngineConfig::from_json(
            r#"{ "physics": { "gravity": [0.0, -20.0], "substeps": 3, "update_rate": 4, "fixed_update_rate": 30 } }"#,
        )
        .unwrap();
        let ctx = EngineContext::with_config(&config);
        assert_eq!(ctx.physics.gravity(), Vec2::new(0.0, -20.0));
        assert_eq!(ctx.physics.substeps(), 3);
        assert_eq!(ctx.physics.update_rate(), 1);
        assert_eq!(ctx.physics.fixed_update_rate(), 30);
    }

    #[test]
    fn subtree_membership_follows_the_running_tree() {
        let mut ctx = EngineContext::new();
        let holder = ctx.scene.spawn(Node::new());
        let ball = ctx.scene.spawn(Node::new().with_position(Vec2::new(10.0, 10.0)));
        ctx.scene.add_child(holder, ball);
        let body = ctx
            .physics
            .create_circle_body(5.0, PhysicsMaterial::default(), Vec2::ZERO)
            .unwrap();
        ctx.attach_body(ball, body).unwrap();
        assert!(!ctx.physics.body(body).unwrap().is_in_world());

        let root = ctx.scene.root();
        assert!(ctx.add_child(root, holder));
        assert!(ctx.physics.body(body).unwrap().is_in_world());

        ctx.remove_from_parent(holder);
        assert!(!ctx.physics.body(body).unwrap().is_in_world());
        assert!(ctx.physics.contains_body(body));

        ctx.despawn(holder);
        assert!(!ctx.physics.contains_body(body));
    }

    #[test]
    fn detach_body_clears_the_node() {
        let mut ctx = EngineContext::new();
        let node = ctx.scene.spawn(Node::new());
        let root = ctx.scene.root();
        ctx.add_child(root, node);
        let body = ctx
            .physics
            .create_box_body(Vec2::splat(10.0), PhysicsMaterial::default(), Vec2::ZERO)
            .unwrap();
        ctx.attach_body(node, body).unwrap();
        assert_eq!(ctx.scene.get(node).unwrap().physics_body(), Some(body));
        ctx.detach_body(node);
        assert_eq!(ctx.scene.get(node).unwrap().physics_body(), None);
        assert!(!ctx.physics.body(body).unwrap().is_in_world());
    }

    struct Dropper {
        ball: Option<NodeId>,
        frames: u32,
    }

    impl Game for Dropper {
        fn init(&mut self, ctx: &mut EngineContext) {
            let node = ctx.scene.spawn(Node::new().with_position(Vec2::new(0.0, 100.0)));
            let root = ctx.scene.root();
            ctx.add_child(root, node);
            let body = ctx
                .physics
                .create_circle_body(5.0, PhysicsMaterial::default(), Vec2::ZERO)
                .unwrap();
            ctx.attach_body(node, body).unwrap();
            self.ball = Some(node);
        }

        fn update(&mut self, _ctx: &mut EngineContext, _dt: f32) {
            self.frames += 1;
        }
    }

    #[test]
    fn frames_run_game_then_physics() {
        let mut game = Dropper { ball: None, frames: 0 };
        let mut ctx = EngineContext::start(&mut game);
        for _ in 0..30 {
            ctx.run_frame(&mut game, 1.0 / 60.0);
        }
        assert_eq!(game.frames, 30);
        let ball = game.ball.unwrap();
        assert!(ctx.scene.get(ball).unwrap().position.y < 100.0);
    }
}

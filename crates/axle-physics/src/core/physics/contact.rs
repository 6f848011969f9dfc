use std::collections::{HashMap, HashSet};

use glam::Vec2;

use super::collider::PhysicsCollider;
use super::world::PhysicsWorld;
use crate::api::types::{BodyId, ColliderId, ListenerId};

/// Most points a single contact reports.
pub const MAX_CONTACT_POINTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactEventCode {
    #[default]
    None,
    Begin,
    PreSolve,
    PostSolve,
    Separate,
}

/// Contact manifold in world engine units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactData {
    /// Up to [`MAX_CONTACT_POINTS`] world-space points.
    pub points: Vec<Vec2>,
    /// Unit normal pointing from shape A towards shape B.
    pub normal: Vec2,
}

/// A touching pair of colliders as seen by contact listeners.
#[derive(Debug, Clone)]
pub struct PhysicsContact {
    pub(crate) shape_a: ColliderId,
    pub(crate) shape_b: ColliderId,
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) data: ContactData,
    pub(crate) event_code: ContactEventCode,
    pub(crate) notification_enabled: bool,
    pub(crate) result: bool,
    pub(crate) sensor: bool,
}

impl PhysicsContact {
    pub fn new(shape_a: ColliderId, body_a: BodyId, shape_b: ColliderId, body_b: BodyId) -> Self {
        Self {
            shape_a,
            shape_b,
            body_a,
            body_b,
            data: ContactData::default(),
            event_code: ContactEventCode::None,
            notification_enabled: true,
            result: true,
            sensor: false,
        }
    }

    pub fn shape_a(&self) -> ColliderId {
        self.shape_a
    }

    pub fn shape_b(&self) -> ColliderId {
        self.shape_b
    }

    pub fn body_a(&self) -> BodyId {
        self.body_a
    }

    pub fn body_b(&self) -> BodyId {
        self.body_b
    }

    pub fn data(&self) -> &ContactData {
        &self.data
    }

    pub fn event_code(&self) -> ContactEventCode {
        self.event_code
    }

    pub fn is_notification_enabled(&self) -> bool {
        self.notification_enabled
    }

    /// True when either shape is a sensor. Sensors only report begin and separate.
    pub fn is_sensor(&self) -> bool {
        self.sensor
    }

    /// Current accept/reject verdict. Listeners set it through their return value.
    pub fn result(&self) -> bool {
        self.result
    }

    /// Return the verdict and reset it to accepting.
    pub(crate) fn reset_result(&mut self) -> bool {
        std::mem::replace(&mut self.result, true)
    }

    pub(crate) fn pair(&self) -> ColliderPair {
        ColliderPair::new(self.shape_a, self.shape_b)
    }
}

/// Writable solver inputs handed to pre-solve listeners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsContactPreSolve {
    pub(crate) restitution: f32,
    pub(crate) friction: f32,
    pub(crate) surface_velocity: Vec2,
    pub(crate) ignored: bool,
}

impl PhysicsContactPreSolve {
    pub(crate) fn new(restitution: f32, friction: f32) -> Self {
        Self {
            restitution,
            friction,
            surface_velocity: Vec2::ZERO,
            ignored: false,
        }
    }

    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.restitution = restitution;
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.friction = friction;
    }

    /// Tangential surface velocity in engine units per second.
    pub fn surface_velocity(&self) -> Vec2 {
        self.surface_velocity
    }

    pub fn set_surface_velocity(&mut self, velocity: Vec2) {
        self.surface_velocity = velocity;
    }

    /// Stop solving this contact until the shapes separate.
    pub fn ignore(&mut self) {
        self.ignored = true;
    }
}

/// Solver results handed to post-solve listeners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsContactPostSolve {
    pub(crate) restitution: f32,
    pub(crate) friction: f32,
    pub(crate) total_impulse: Vec2,
}

impl PhysicsContactPostSolve {
    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    /// Sum of the normal impulses applied this step, in engine units.
    pub fn total_impulse(&self) -> Vec2 {
        self.total_impulse
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Which contacts a listener wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactFilter {
    Any,
    /// Only contacts between these two bodies, in either order.
    Bodies(BodyId, BodyId),
    /// Only contacts between these two shapes, in either order.
    Shapes(ColliderId, ColliderId),
    /// Contacts where either shape is in this group.
    Group(i32),
}

pub type BeginCallback = Box<dyn FnMut(&mut PhysicsContact, &mut PhysicsWorld) -> bool>;
pub type PreSolveCallback =
    Box<dyn FnMut(&mut PhysicsContact, &mut PhysicsContactPreSolve, &mut PhysicsWorld) -> bool>;
pub type PostSolveCallback = Box<dyn FnMut(&PhysicsContact, &PhysicsContactPostSolve, &mut PhysicsWorld)>;
pub type SeparateCallback = Box<dyn FnMut(&PhysicsContact, &mut PhysicsWorld)>;

/// A set of contact callbacks behind a [`ContactFilter`].
///
/// Callbacks receive the world, which is locked while they run: bodies and
/// joints added or removed from a callback are queued until the step ends.
pub struct ContactListener {
    pub(crate) id: ListenerId,
    filter: ContactFilter,
    enabled: bool,
    pub(crate) on_begin: Option<BeginCallback>,
    pub(crate) on_pre_solve: Option<PreSolveCallback>,
    pub(crate) on_post_solve: Option<PostSolveCallback>,
    pub(crate) on_separate: Option<SeparateCallback>,
}

impl ContactListener {
    pub fn new(filter: ContactFilter) -> Self {
        Self {
            id: ListenerId(0),
            filter,
            enabled: true,
            on_begin: None,
            on_pre_solve: None,
            on_post_solve: None,
            on_separate: None,
        }
    }

    /// Returning false rejects the contact until the shapes separate.
    pub fn on_begin(mut self, f: impl FnMut(&mut PhysicsContact, &mut PhysicsWorld) -> bool + 'static) -> Self {
        self.on_begin = Some(Box::new(f));
        self
    }

    /// Returning false ignores the contact until the shapes separate.
    pub fn on_pre_solve(
        mut self,
        f: impl FnMut(&mut PhysicsContact, &mut PhysicsContactPreSolve, &mut PhysicsWorld) -> bool + 'static,
    ) -> Self {
        self.on_pre_solve = Some(Box::new(f));
        self
    }

    pub fn on_post_solve(
        mut self,
        f: impl FnMut(&PhysicsContact, &PhysicsContactPostSolve, &mut PhysicsWorld) + 'static,
    ) -> Self {
        self.on_post_solve = Some(Box::new(f));
        self
    }

    pub fn on_separate(mut self, f: impl FnMut(&PhysicsContact, &mut PhysicsWorld) + 'static) -> Self {
        self.on_separate = Some(Box::new(f));
        self
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn filter(&self) -> ContactFilter {
        self.filter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// `group_of` resolves a collider's current group.
    pub(crate) fn hit_test(&self, contact: &PhysicsContact, group_of: impl Fn(ColliderId) -> Option<i32>) -> bool {
        match self.filter {
            ContactFilter::Any => true,
            ContactFilter::Bodies(a, b) => {
                (contact.body_a == a && contact.body_b == b) || (contact.body_a == b && contact.body_b == a)
            }
            ContactFilter::Shapes(a, b) => {
                (contact.shape_a == a && contact.shape_b == b) || (contact.shape_a == b && contact.shape_b == a)
            }
            ContactFilter::Group(group) => {
                group_of(contact.shape_a) == Some(group) || group_of(contact.shape_b) == Some(group)
            }
        }
    }
}

impl std::fmt::Debug for ContactListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactListener")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Arbitration
// ---------------------------------------------------------------------------

/// Order-independent key for a pair of colliders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ColliderPair(pub ColliderId, pub ColliderId);

impl ColliderPair {
    pub(crate) fn new(a: ColliderId, b: ColliderId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub(crate) fn involves(&self, id: ColliderId) -> bool {
        self.0 == id || self.1 == id
    }
}

/// Order-independent key for a pair of bodies.
pub(crate) fn body_pair(a: BodyId, b: BodyId) -> (BodyId, BodyId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Verdict of the filter checks run when two shapes first touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Arbitration {
    /// A collision-disabled joint links the two bodies. Nothing else applies.
    pub suppressed: bool,
    pub notify: bool,
    pub accept: bool,
}

/// Joint suppression first, then contact-test masks decide notification,
/// then groups (or category/collision masks) decide acceptance.
pub(crate) fn arbitrate(
    a: &PhysicsCollider,
    b: &PhysicsCollider,
    suppressed_pairs: &HashSet<(BodyId, BodyId)>,
) -> Arbitration {
    if let (Some(body_a), Some(body_b)) = (a.body, b.body) {
        if suppressed_pairs.contains(&body_pair(body_a, body_b)) {
            return Arbitration {
                suppressed: true,
                notify: false,
                accept: false,
            };
        }
    }

    let notify = (a.category_bitmask & b.contact_test_bitmask) != 0
        && (a.contact_test_bitmask & b.category_bitmask) != 0;

    let accept = if a.group != 0 && a.group == b.group {
        a.group > 0
    } else {
        (a.category_bitmask & b.collision_bitmask) != 0 && (b.category_bitmask & a.collision_bitmask) != 0
    };

    Arbitration {
        suppressed: false,
        notify,
        accept,
    }
}

/// Solver overrides written by pre-solve listeners, applied on later steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ContactOverride {
    pub restitution: f32,
    pub friction: f32,
    pub surface_velocity: Vec2,
}

/// A contact that has begun and not yet separated. A collider made of
/// several low-level shapes may touch through more than one of them.
#[derive(Debug, Clone)]
pub(crate) struct ActiveContact {
    pub contact: PhysicsContact,
    pub touching: u32,
}

/// Per-world contact bookkeeping across steps.
#[derive(Debug, Default)]
pub(crate) struct ContactLedger {
    pub active: HashMap<ColliderPair, ActiveContact>,
    /// Rejected by a begin listener.
    pub rejected: HashSet<ColliderPair>,
    /// Ignored by a pre-solve listener.
    pub ignored: HashSet<ColliderPair>,
    pub overrides: HashMap<ColliderPair, ContactOverride>,
}

impl ContactLedger {
    pub(crate) fn forget(&mut self, pair: &ColliderPair) {
        self.rejected.remove(pair);
        self.ignored.remove(pair);
        self.overrides.remove(pair);
    }

    /// Drop every entry involving `collider`.
    pub(crate) fn forget_collider(&mut self, collider: ColliderId) {
        self.active.retain(|pair, _| !pair.involves(collider));
        self.rejected.retain(|pair| !pair.involves(collider));
        self.ignored.retain(|pair| !pair.involves(collider));
        self.overrides.retain(|pair, _| !pair.involves(collider));
    }

    /// Pair is still tracked but must not be solved.
    pub(crate) fn is_blocked(&self, pair: &ColliderPair) -> bool {
        self.rejected.contains(pair) || self.ignored.contains(pair)
    }
}

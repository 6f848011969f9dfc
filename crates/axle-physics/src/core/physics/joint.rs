// core/physics/joint.rs
//
// Constraints between two bodies. A joint is created Pending: property
// writes land in a write-back cache and a FIFO of deferred writes. The
// world's joint flush builds the rapier constraint and replays the
// deferred writes in order; from then on writes go straight to rapier.

use std::fmt;

use glam::Vec2;
use rapier2d::prelude::*;

use super::error::{PhysicsError, PhysicsResult};
use super::helper::{
    length_from_physics, point_from_physics, point_to_physics, torque_to_physics, vec_from_physics, vec_to_physics,
};
use super::simulation::Simulation;
use crate::api::types::{BodyId, JointId};

/// Damping factor of the velocity motor behind [`JointDesc::Motor`].
const MOTOR_FACTOR: Real = 1.0;
/// Position motor gains used to approximate gear coupling.
const GEAR_STIFFNESS: Real = 1.0e3;
const GEAR_DAMPING: Real = 1.0e2;

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

/// Where a pin joint's pivot sits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PinAnchor {
    /// One world-space pivot shared by both bodies.
    World(Vec2),
    /// Separate pivots in each body's local space.
    Local { anchor_a: Vec2, anchor_b: Vec2 },
}

/// Joint kind with its creation parameters. Anchors are in body space
/// unless stated otherwise; angles are radians, counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointDesc {
    /// Welds the bodies in their current relative pose. `anchor` is world space.
    Fixed { anchor: Vec2 },
    Pin(PinAnchor),
    /// Keeps the anchor distance within `[min, max]`.
    Limit { anchor_a: Vec2, anchor_b: Vec2, min: f32, max: f32 },
    /// Keeps the anchor distance at its value when the joint is built.
    Distance { anchor_a: Vec2, anchor_b: Vec2 },
    /// Damped spring whose rest length is the anchor distance when built.
    /// `stiffness` is the spring frequency in hertz, `damping` the damping ratio.
    Spring { anchor_a: Vec2, anchor_b: Vec2, stiffness: f32, damping: f32 },
    /// `anchor_b` slides along the groove from `groove_a` to `groove_b` on body A.
    Groove { groove_a: Vec2, groove_b: Vec2, anchor_b: Vec2 },
    /// Angular spring. Same units as [`JointDesc::Spring`].
    RotarySpring { stiffness: f32, damping: f32 },
    RotaryLimit { min: f32, max: f32 },
    Ratchet { phase: f32, ratchet: f32 },
    /// Approximated with a position motor re-targeted before every step.
    Gear { phase: f32, ratio: f32 },
    Motor { rate: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointKind {
    Fixed,
    Pin,
    Limit,
    Distance,
    Spring,
    Groove,
    RotarySpring,
    RotaryLimit,
    Ratchet,
    Gear,
    Motor,
}

/// Properties reachable through the cached setters and getters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointProperty {
    AnchorA,
    AnchorB,
    GrooveA,
    GrooveB,
    Min,
    Max,
    Distance,
    RestLength,
    RestAngle,
    Stiffness,
    Damping,
    Angle,
    Phase,
    Ratchet,
    Ratio,
    Rate,
}

impl JointKind {
    pub fn supports(self, property: JointProperty) -> bool {
        use JointKind as K;
        use JointProperty as P;
        match property {
            P::AnchorA => matches!(self, K::Limit | K::Distance | K::Spring),
            P::AnchorB => matches!(self, K::Limit | K::Distance | K::Spring | K::Groove),
            P::GrooveA | P::GrooveB => self == K::Groove,
            P::Min | P::Max => matches!(self, K::Limit | K::RotaryLimit),
            P::Distance => self == K::Distance,
            P::RestLength => self == K::Spring,
            P::RestAngle => self == K::RotarySpring,
            P::Stiffness | P::Damping => matches!(self, K::Spring | K::RotarySpring),
            P::Angle | P::Ratchet => self == K::Ratchet,
            P::Phase => matches!(self, K::Ratchet | K::Gear),
            P::Ratio => self == K::Gear,
            P::Rate => self == K::Motor,
        }
    }
}

impl JointDesc {
    pub fn kind(&self) -> JointKind {
        match self {
            JointDesc::Fixed { .. } => JointKind::Fixed,
            JointDesc::Pin(_) => JointKind::Pin,
            JointDesc::Limit { .. } => JointKind::Limit,
            JointDesc::Distance { .. } => JointKind::Distance,
            JointDesc::Spring { .. } => JointKind::Spring,
            JointDesc::Groove { .. } => JointKind::Groove,
            JointDesc::RotarySpring { .. } => JointKind::RotarySpring,
            JointDesc::RotaryLimit { .. } => JointKind::RotaryLimit,
            JointDesc::Ratchet { .. } => JointKind::Ratchet,
            JointDesc::Gear { .. } => JointKind::Gear,
            JointDesc::Motor { .. } => JointKind::Motor,
        }
    }

    /// Build the rapier constraint from the bodies' current poses.
    fn build(&self, pose_a: &Isometry<Real>, pose_b: &Isometry<Real>, ptm: f32) -> PhysicsResult<GenericJoint> {
        let p = |v: Vec2| point_to_physics(v, ptm);
        let relative_angle = pose_b.rotation.angle() - pose_a.rotation.angle();
        let anchor_distance = |a: Vec2, b: Vec2| (pose_b * p(b) - pose_a * p(a)).norm();

        let data: GenericJoint = match *self {
            JointDesc::Fixed { anchor } => {
                let pivot = p(anchor);
                let frame = Isometry::translation(pivot.x, pivot.y);
                FixedJointBuilder::new()
                    .local_frame1(pose_a.inv_mul(&frame))
                    .local_frame2(pose_b.inv_mul(&frame))
                    .build()
                    .into()
            }
            JointDesc::Pin(anchor) => {
                let (a, b) = match anchor {
                    PinAnchor::World(pivot) => (
                        pose_a.inverse_transform_point(&p(pivot)),
                        pose_b.inverse_transform_point(&p(pivot)),
                    ),
                    PinAnchor::Local { anchor_a, anchor_b } => (p(anchor_a), p(anchor_b)),
                };
                RevoluteJointBuilder::new().local_anchor1(a).local_anchor2(b).build().into()
            }
            JointDesc::Limit { anchor_a, anchor_b, min, max } => GenericJointBuilder::new(JointAxesMask::empty())
                .coupled_axes(JointAxesMask::LIN_AXES)
                .limits(JointAxis::LinX, [min / ptm, max / ptm])
                .local_anchor1(p(anchor_a))
                .local_anchor2(p(anchor_b))
                .build(),
            JointDesc::Distance { anchor_a, anchor_b } => {
                let d = anchor_distance(anchor_a, anchor_b);
                GenericJointBuilder::new(JointAxesMask::empty())
                    .coupled_axes(JointAxesMask::LIN_AXES)
                    .limits(JointAxis::LinX, [d, d])
                    .local_anchor1(p(anchor_a))
                    .local_anchor2(p(anchor_b))
                    .build()
            }
            JointDesc::Spring { anchor_a, anchor_b, stiffness, damping } => {
                let rest = anchor_distance(anchor_a, anchor_b);
                let (k, c) = spring_gains(stiffness, damping);
                GenericJointBuilder::new(JointAxesMask::empty())
                    .coupled_axes(JointAxesMask::LIN_AXES)
                    .motor_position(JointAxis::LinX, rest, k, c)
                    .motor_model(JointAxis::LinX, MotorModel::AccelerationBased)
                    .local_anchor1(p(anchor_a))
                    .local_anchor2(p(anchor_b))
                    .build()
            }
            JointDesc::Groove { groove_a, groove_b, anchor_b } => {
                let frame = groove_frame(groove_a, groove_b, ptm).ok_or(PhysicsError::InvalidGeometry {
                    reason: "groove has zero length",
                })?;
                let mut data = GenericJointBuilder::new(JointAxesMask::LIN_Y)
                    .local_anchor2(p(anchor_b))
                    .limits(JointAxis::LinX, [0.0, frame.1])
                    .build();
                data.local_frame1 = frame.0;
                data
            }
            JointDesc::RotarySpring { stiffness, damping } => {
                let (k, c) = spring_gains(stiffness, damping);
                GenericJointBuilder::new(JointAxesMask::empty())
                    .motor_position(JointAxis::AngX, relative_angle, k, c)
                    .motor_model(JointAxis::AngX, MotorModel::AccelerationBased)
                    .build()
            }
            JointDesc::RotaryLimit { min, max } => GenericJointBuilder::new(JointAxesMask::empty())
                .limits(JointAxis::AngX, [min, max])
                .build(),
            JointDesc::Ratchet { phase, ratchet } => {
                let low = relative_angle + phase;
                GenericJointBuilder::new(JointAxesMask::empty())
                    .limits(JointAxis::AngX, [low, low + ratchet])
                    .build()
            }
            JointDesc::Gear { phase, ratio } => GenericJointBuilder::new(JointAxesMask::empty())
                .motor_position(
                    JointAxis::AngX,
                    gear_target(pose_a.rotation.angle(), phase, ratio).unwrap_or(relative_angle),
                    GEAR_STIFFNESS,
                    GEAR_DAMPING,
                )
                .build(),
            JointDesc::Motor { rate } => GenericJointBuilder::new(JointAxesMask::empty())
                .motor_velocity(JointAxis::AngX, rate, MOTOR_FACTOR)
                .build(),
        };
        Ok(data)
    }
}

/// Frame on body A whose X axis runs along the groove, plus the groove length.
fn groove_frame(groove_a: Vec2, groove_b: Vec2, ptm: f32) -> Option<(Isometry<Real>, Real)> {
    let axis = groove_b - groove_a;
    let length = axis.length();
    if length <= f32::EPSILON {
        return None;
    }
    let frame = Isometry::new(vec_to_physics(groove_a, ptm), axis.y.atan2(axis.x));
    Some((frame, length / ptm))
}

/// Acceleration-based motor gains for a spring of `hertz` and `damping_ratio`.
/// Both are unit-free, so the spring behaves the same at any ptm ratio.
fn spring_gains(hertz: f32, damping_ratio: f32) -> (Real, Real) {
    let omega = std::f32::consts::TAU * hertz;
    (omega * omega, 2.0 * damping_ratio * omega)
}

/// Relative angle that puts body B at `(angle_a + phase) / ratio`.
fn gear_target(angle_a: Real, phase: f32, ratio: f32) -> Option<Real> {
    if ratio == 0.0 {
        return None;
    }
    Some((angle_a + phase) / ratio - angle_a)
}

fn limits_of(data: &GenericJoint, axis: JointAxis) -> [Real; 2] {
    data.limits(axis)
        .map(|l| [l.min, l.max])
        .unwrap_or([-Real::MAX, Real::MAX])
}

fn motor_of(data: &GenericJoint, axis: JointAxis) -> JointMotor {
    data.motor(axis).copied().unwrap_or_default()
}

/// The motor axis a max force applies to, if the kind has one.
fn apply_max_force(data: &mut GenericJoint, kind: JointKind, max_force: f32, ptm: f32) {
    match kind {
        JointKind::Spring => {
            data.set_motor_max_force(JointAxis::LinX, max_force / ptm);
        }
        JointKind::RotarySpring | JointKind::Gear | JointKind::Motor => {
            data.set_motor_max_force(JointAxis::AngX, torque_to_physics(max_force, ptm));
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Property values written while the joint is pending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteCache {
    pub anchor_a: Option<Vec2>,
    pub anchor_b: Option<Vec2>,
    pub groove_a: Option<Vec2>,
    pub groove_b: Option<Vec2>,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub distance: Option<f32>,
    pub rest_length: Option<f32>,
    pub rest_angle: Option<f32>,
    pub stiffness: Option<f32>,
    pub damping: Option<f32>,
    pub angle: Option<f32>,
    pub phase: Option<f32>,
    pub ratchet: Option<f32>,
    pub ratio: Option<f32>,
    pub rate: Option<f32>,
}

impl WriteCache {
    /// Cache holding every value the description already fixes. Values that
    /// depend on the bodies' poses stay unset until written.
    fn seeded(desc: &JointDesc) -> Self {
        let mut cache = Self::default();
        match *desc {
            JointDesc::Limit { anchor_a, anchor_b, min, max } => {
                cache.anchor_a = Some(anchor_a);
                cache.anchor_b = Some(anchor_b);
                cache.min = Some(min);
                cache.max = Some(max);
            }
            JointDesc::Distance { anchor_a, anchor_b } => {
                cache.anchor_a = Some(anchor_a);
                cache.anchor_b = Some(anchor_b);
            }
            JointDesc::Spring { anchor_a, anchor_b, stiffness, damping } => {
                cache.anchor_a = Some(anchor_a);
                cache.anchor_b = Some(anchor_b);
                cache.stiffness = Some(stiffness);
                cache.damping = Some(damping);
            }
            JointDesc::Groove { groove_a, groove_b, anchor_b } => {
                cache.groove_a = Some(groove_a);
                cache.groove_b = Some(groove_b);
                cache.anchor_b = Some(anchor_b);
            }
            JointDesc::RotarySpring { stiffness, damping } => {
                cache.stiffness = Some(stiffness);
                cache.damping = Some(damping);
            }
            JointDesc::RotaryLimit { min, max } => {
                cache.min = Some(min);
                cache.max = Some(max);
            }
            JointDesc::Ratchet { phase, ratchet } => {
                cache.phase = Some(phase);
                cache.ratchet = Some(ratchet);
            }
            JointDesc::Gear { phase, ratio } => {
                cache.phase = Some(phase);
                cache.ratio = Some(ratio);
            }
            JointDesc::Motor { rate } => cache.rate = Some(rate),
            JointDesc::Fixed { .. } | JointDesc::Pin(_) => {}
        }
        cache
    }

    /// Record the live values a rebuild would re-derive from the bodies'
    /// poses, and return the writes that restore them.
    fn capture(&mut self, view: &LiveView<'_>) -> Vec<DeferredWrite> {
        let mut restore: Vec<DeferredWrite> = Vec::new();
        match view.desc {
            JointDesc::Distance { .. } => {
                if let Some(d) = view.distance() {
                    self.distance = Some(d);
                    restore.push(Box::new(move |live: &mut LiveJoint<'_>| live.set_distance(d)));
                }
            }
            JointDesc::Spring { .. } => {
                if let Some(rest) = view.rest_length() {
                    self.rest_length = Some(rest);
                    restore.push(Box::new(move |live: &mut LiveJoint<'_>| live.set_rest_length(rest)));
                }
            }
            JointDesc::RotarySpring { .. } => {
                if let Some(rest) = view.rest_angle() {
                    self.rest_angle = Some(rest);
                    restore.push(Box::new(move |live: &mut LiveJoint<'_>| live.set_rest_angle(rest)));
                }
            }
            JointDesc::Ratchet { .. } => {
                if let Some(angle) = view.angle() {
                    self.angle = Some(angle);
                    restore.push(Box::new(move |live: &mut LiveJoint<'_>| live.set_angle(angle)));
                }
            }
            _ => {}
        }
        restore
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JointState {
    /// No rapier constraint yet.
    Pending(WriteCache),
    Live(ImpulseJointHandle),
    /// Constraint destroyed. Terminal.
    Detached,
}

/// A property write waiting for the constraint to exist.
pub(crate) type DeferredWrite = Box<dyn FnOnce(&mut LiveJoint<'_>)>;

/// A live constraint during a write.
pub(crate) struct LiveJoint<'a> {
    data: &'a mut GenericJoint,
    desc: &'a mut JointDesc,
    ptm: f32,
}

impl LiveJoint<'_> {
    fn set_anchor_a(&mut self, v: Vec2) {
        self.data.set_local_anchor1(point_to_physics(v, self.ptm));
        if let JointDesc::Limit { anchor_a, .. } | JointDesc::Distance { anchor_a, .. } | JointDesc::Spring { anchor_a, .. } =
            self.desc
        {
            *anchor_a = v;
        }
    }

    fn set_anchor_b(&mut self, v: Vec2) {
        self.data.set_local_anchor2(point_to_physics(v, self.ptm));
        if let JointDesc::Limit { anchor_b, .. }
        | JointDesc::Distance { anchor_b, .. }
        | JointDesc::Spring { anchor_b, .. }
        | JointDesc::Groove { anchor_b, .. } = self.desc
        {
            *anchor_b = v;
        }
    }

    fn set_groove_a(&mut self, v: Vec2) {
        if let JointDesc::Groove { groove_a, .. } = self.desc {
            *groove_a = v;
        }
        self.reframe_groove();
    }

    fn set_groove_b(&mut self, v: Vec2) {
        if let JointDesc::Groove { groove_b, .. } = self.desc {
            *groove_b = v;
        }
        self.reframe_groove();
    }

    fn reframe_groove(&mut self) {
        let JointDesc::Groove { groove_a, groove_b, .. } = *self.desc else {
            return;
        };
        match groove_frame(groove_a, groove_b, self.ptm) {
            Some((frame, length)) => {
                self.data.local_frame1 = frame;
                self.data.set_limits(JointAxis::LinX, [0.0, length]);
            }
            None => log::warn!("groove end points coincide, keeping the previous groove"),
        }
    }

    fn set_min(&mut self, v: f32) {
        match self.desc {
            JointDesc::Limit { min, .. } => {
                *min = v;
                let [_, hi] = limits_of(self.data, JointAxis::LinX);
                self.data.set_limits(JointAxis::LinX, [v / self.ptm, hi]);
            }
            JointDesc::RotaryLimit { min, .. } => {
                *min = v;
                let [_, hi] = limits_of(self.data, JointAxis::AngX);
                self.data.set_limits(JointAxis::AngX, [v, hi]);
            }
            _ => {}
        }
    }

    fn set_max(&mut self, v: f32) {
        match self.desc {
            JointDesc::Limit { max, .. } => {
                *max = v;
                let [lo, _] = limits_of(self.data, JointAxis::LinX);
                self.data.set_limits(JointAxis::LinX, [lo, v / self.ptm]);
            }
            JointDesc::RotaryLimit { max, .. } => {
                *max = v;
                let [lo, _] = limits_of(self.data, JointAxis::AngX);
                self.data.set_limits(JointAxis::AngX, [lo, v]);
            }
            _ => {}
        }
    }

    fn set_distance(&mut self, v: f32) {
        let d = v / self.ptm;
        self.data.set_limits(JointAxis::LinX, [d, d]);
    }

    fn set_rest_length(&mut self, v: f32) {
        let m = motor_of(self.data, JointAxis::LinX);
        self.data
            .set_motor_position(JointAxis::LinX, v / self.ptm, m.stiffness, m.damping);
    }

    fn set_rest_angle(&mut self, v: f32) {
        let m = motor_of(self.data, JointAxis::AngX);
        self.data.set_motor_position(JointAxis::AngX, v, m.stiffness, m.damping);
    }

    fn set_stiffness(&mut self, v: f32) {
        if let JointDesc::Spring { stiffness, .. } | JointDesc::RotarySpring { stiffness, .. } = self.desc {
            *stiffness = v;
        }
        self.retune_spring();
    }

    fn set_damping(&mut self, v: f32) {
        if let JointDesc::Spring { damping, .. } | JointDesc::RotarySpring { damping, .. } = self.desc {
            *damping = v;
        }
        self.retune_spring();
    }

    /// Both gains depend on the frequency, so any change rewrites the pair.
    fn retune_spring(&mut self) {
        let (axis, stiffness, damping) = match *self.desc {
            JointDesc::Spring { stiffness, damping, .. } => (JointAxis::LinX, stiffness, damping),
            JointDesc::RotarySpring { stiffness, damping } => (JointAxis::AngX, stiffness, damping),
            _ => return,
        };
        let (k, c) = spring_gains(stiffness, damping);
        let target = motor_of(self.data, axis).target_pos;
        self.data.set_motor_position(axis, target, k, c);
    }

    fn set_angle(&mut self, v: f32) {
        if let JointDesc::Ratchet { phase, ratchet } = *self.desc {
            self.data
                .set_limits(JointAxis::AngX, [phase + v, phase + v + ratchet]);
        }
    }

    fn set_phase(&mut self, v: f32) {
        match self.desc {
            JointDesc::Ratchet { phase, ratchet } => {
                let [lo, _] = limits_of(self.data, JointAxis::AngX);
                let angle = lo - *phase;
                *phase = v;
                self.data
                    .set_limits(JointAxis::AngX, [v + angle, v + angle + *ratchet]);
            }
            JointDesc::Gear { phase, .. } => *phase = v,
            _ => {}
        }
    }

    fn set_ratchet(&mut self, v: f32) {
        if let JointDesc::Ratchet { ratchet, .. } = self.desc {
            *ratchet = v;
            let [lo, _] = limits_of(self.data, JointAxis::AngX);
            self.data.set_limits(JointAxis::AngX, [lo, lo + v]);
        }
    }

    fn set_ratio(&mut self, v: f32) {
        if let JointDesc::Gear { ratio, .. } = self.desc {
            *ratio = v;
        }
    }

    fn set_rate(&mut self, v: f32) {
        if let JointDesc::Motor { rate } = self.desc {
            *rate = v;
        }
        self.data.set_motor_velocity(JointAxis::AngX, v, MOTOR_FACTOR);
    }
}

/// A live constraint during a read.
struct LiveView<'a> {
    data: &'a GenericJoint,
    desc: &'a JointDesc,
    ptm: f32,
}

impl LiveView<'_> {
    fn anchor_a(&self) -> Option<Vec2> {
        Some(point_from_physics(&self.data.local_anchor1(), self.ptm))
    }

    fn anchor_b(&self) -> Option<Vec2> {
        Some(point_from_physics(&self.data.local_anchor2(), self.ptm))
    }

    fn groove_a(&self) -> Option<Vec2> {
        Some(vec_from_physics(&self.data.local_frame1.translation.vector, self.ptm))
    }

    fn groove_b(&self) -> Option<Vec2> {
        let frame = &self.data.local_frame1;
        let [_, length] = limits_of(self.data, JointAxis::LinX);
        let end = frame * Point::new(length, 0.0);
        Some(point_from_physics(&end, self.ptm))
    }

    fn min(&self) -> Option<f32> {
        match self.desc {
            JointDesc::Limit { .. } => Some(length_from_physics(limits_of(self.data, JointAxis::LinX)[0], self.ptm)),
            JointDesc::RotaryLimit { .. } => Some(limits_of(self.data, JointAxis::AngX)[0]),
            _ => None,
        }
    }

    fn max(&self) -> Option<f32> {
        match self.desc {
            JointDesc::Limit { .. } => Some(length_from_physics(limits_of(self.data, JointAxis::LinX)[1], self.ptm)),
            JointDesc::RotaryLimit { .. } => Some(limits_of(self.data, JointAxis::AngX)[1]),
            _ => None,
        }
    }

    fn distance(&self) -> Option<f32> {
        Some(length_from_physics(limits_of(self.data, JointAxis::LinX)[1], self.ptm))
    }

    fn rest_length(&self) -> Option<f32> {
        Some(length_from_physics(motor_of(self.data, JointAxis::LinX).target_pos, self.ptm))
    }

    fn rest_angle(&self) -> Option<f32> {
        Some(motor_of(self.data, JointAxis::AngX).target_pos)
    }

    fn stiffness(&self) -> Option<f32> {
        match *self.desc {
            JointDesc::Spring { stiffness, .. } | JointDesc::RotarySpring { stiffness, .. } => Some(stiffness),
            _ => None,
        }
    }

    fn damping(&self) -> Option<f32> {
        match *self.desc {
            JointDesc::Spring { damping, .. } | JointDesc::RotarySpring { damping, .. } => Some(damping),
            _ => None,
        }
    }

    fn angle(&self) -> Option<f32> {
        let JointDesc::Ratchet { phase, .. } = *self.desc else {
            return None;
        };
        Some(limits_of(self.data, JointAxis::AngX)[0] - phase)
    }

    fn phase(&self) -> Option<f32> {
        match *self.desc {
            JointDesc::Ratchet { phase, .. } | JointDesc::Gear { phase, .. } => Some(phase),
            _ => None,
        }
    }

    fn ratchet(&self) -> Option<f32> {
        let [lo, hi] = limits_of(self.data, JointAxis::AngX);
        Some(hi - lo)
    }

    fn ratio(&self) -> Option<f32> {
        match *self.desc {
            JointDesc::Gear { ratio, .. } => Some(ratio),
            _ => None,
        }
    }

    fn rate(&self) -> Option<f32> {
        Some(motor_of(self.data, JointAxis::AngX).target_vel)
    }
}

// ---------------------------------------------------------------------------
// PhysicsJoint
// ---------------------------------------------------------------------------

/// A constraint between two distinct bodies, owned by a world.
pub struct PhysicsJoint {
    pub(crate) id: JointId,
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) desc: JointDesc,
    pub(crate) state: JointState,
    pub(crate) tasks: Vec<DeferredWrite>,
    pub(crate) in_world: bool,
    pub(crate) destroy_mark: bool,
    enabled: bool,
    collision_enabled: bool,
    tag: i32,
    max_force: f32,
}

impl fmt::Debug for PhysicsJoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsJoint")
            .field("id", &self.id)
            .field("body_a", &self.body_a)
            .field("body_b", &self.body_b)
            .field("desc", &self.desc)
            .field("state", &self.state)
            .field("pending_writes", &self.tasks.len())
            .field("enabled", &self.enabled)
            .field("collision_enabled", &self.collision_enabled)
            .finish()
    }
}

impl PhysicsJoint {
    pub(crate) fn new(id: JointId, body_a: BodyId, body_b: BodyId, desc: JointDesc) -> Self {
        Self {
            id,
            body_a,
            body_b,
            state: JointState::Pending(WriteCache::seeded(&desc)),
            desc,
            tasks: Vec::new(),
            in_world: false,
            destroy_mark: false,
            enabled: false,
            collision_enabled: !matches!(desc.kind(), JointKind::Fixed),
            tag: 0,
            max_force: super::PHYSICS_INFINITY,
        }
    }

    pub fn id(&self) -> JointId {
        self.id
    }

    pub fn body_a(&self) -> BodyId {
        self.body_a
    }

    pub fn body_b(&self) -> BodyId {
        self.body_b
    }

    /// The other end of the joint, if `body` is one of its ends.
    pub fn other_body(&self, body: BodyId) -> Option<BodyId> {
        if body == self.body_a {
            Some(self.body_b)
        } else if body == self.body_b {
            Some(self.body_a)
        } else {
            None
        }
    }

    pub fn desc(&self) -> &JointDesc {
        &self.desc
    }

    pub fn kind(&self) -> JointKind {
        self.desc.kind()
    }

    pub fn state(&self) -> &JointState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, JointState::Pending(_))
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, JointState::Live(_))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled_flag(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_collision_enabled(&self) -> bool {
        self.collision_enabled
    }

    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.tag = tag;
    }

    pub fn max_force(&self) -> f32 {
        self.max_force
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Build the rapier constraint and apply the max force. Deferred writes
    /// stay queued for [`flush_delay_tasks`](Self::flush_delay_tasks).
    pub(crate) fn materialize(
        &mut self,
        sim: &mut Simulation,
        rb_a: RigidBodyHandle,
        rb_b: RigidBodyHandle,
        ptm: f32,
    ) -> PhysicsResult<()> {
        if !self.is_pending() {
            return Ok(());
        }
        let fail = |reason| PhysicsError::JointBuildFailed {
            joint: self.id,
            reason,
        };
        let pose_a = *sim.bodies.get(rb_a).ok_or_else(|| fail("body A has no rigid body"))?.position();
        let pose_b = *sim.bodies.get(rb_b).ok_or_else(|| fail("body B has no rigid body"))?.position();

        let mut data = self.desc.build(&pose_a, &pose_b, ptm).map_err(|err| match err {
            PhysicsError::InvalidGeometry { reason } => fail(reason),
            other => other,
        })?;
        data.set_contacts_enabled(self.collision_enabled);
        apply_max_force(&mut data, self.kind(), self.max_force, ptm);

        let handle = sim.insert_joint(rb_a, rb_b, data);
        self.state = JointState::Live(handle);
        log::debug!("joint {} materialized as {:?}", self.id.0, self.kind());
        Ok(())
    }

    /// Replay deferred writes in the order they were made.
    pub(crate) fn flush_delay_tasks(&mut self, sim: &mut Simulation, ptm: f32) {
        let JointState::Live(handle) = self.state else {
            return;
        };
        let Some(joint) = sim.impulse_joints.get_mut(handle, true) else {
            return;
        };
        let mut live = LiveJoint {
            data: &mut joint.data,
            desc: &mut self.desc,
            ptm,
        };
        for task in self.tasks.drain(..) {
            task(&mut live);
        }
    }

    /// Drop the constraint but keep the joint reusable: back to Pending with
    /// every current value cached and queued for the next build.
    pub(crate) fn dematerialize(&mut self, sim: &mut Simulation, ptm: f32) {
        let JointState::Live(handle) = self.state else {
            return;
        };
        let mut cache = WriteCache::seeded(&self.desc);
        if let Some(joint) = sim.impulse_joints.get(handle) {
            let view = LiveView {
                data: &joint.data,
                desc: &self.desc,
                ptm,
            };
            let mut restore = cache.capture(&view);
            restore.append(&mut self.tasks);
            self.tasks = restore;
        }
        sim.remove_joint(handle);
        self.state = JointState::Pending(cache);
    }

    /// Destroy the constraint and the cache. Terminal.
    pub(crate) fn detach(&mut self, sim: &mut Simulation) {
        if let JointState::Live(handle) = self.state {
            sim.remove_joint(handle);
        }
        self.state = JointState::Detached;
        self.tasks.clear();
        self.in_world = false;
    }

    /// Re-target the gear approximation from body A's current angle.
    pub(crate) fn drive(&self, sim: &mut Simulation) {
        let (JointDesc::Gear { phase, ratio }, JointState::Live(handle)) = (self.desc, &self.state) else {
            return;
        };
        let Some(body1) = sim.impulse_joints.get(*handle).map(|j| j.body1) else {
            return;
        };
        let Some(angle_a) = sim.bodies.get(body1).map(|rb| rb.rotation().angle()) else {
            return;
        };
        let Some(target) = gear_target(angle_a, phase, ratio) else {
            return;
        };
        if let Some(joint) = sim.impulse_joints.get_mut(*handle, false) {
            joint
                .data
                .set_motor_position(JointAxis::AngX, target, GEAR_STIFFNESS, GEAR_DAMPING);
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Read access to a joint. Pending joints answer from their write-back cache.
pub struct JointRef<'a> {
    pub(crate) joint: &'a PhysicsJoint,
    pub(crate) sim: &'a Simulation,
    pub(crate) ptm: f32,
}

impl std::ops::Deref for JointRef<'_> {
    type Target = PhysicsJoint;

    fn deref(&self) -> &PhysicsJoint {
        self.joint
    }
}

impl JointRef<'_> {
    fn read<T: Copy>(
        &self,
        property: JointProperty,
        cached: fn(&WriteCache) -> Option<T>,
        live: fn(&LiveView<'_>) -> Option<T>,
    ) -> Option<T> {
        if !self.joint.kind().supports(property) {
            return None;
        }
        match &self.joint.state {
            JointState::Pending(cache) => {
                let value = cached(cache);
                debug_assert!(value.is_some(), "joint {}: {property:?} read before it was set", self.joint.id.0);
                if value.is_none() {
                    log::error!("joint {}: {property:?} read before it was set", self.joint.id.0);
                }
                value
            }
            JointState::Live(handle) => {
                let joint = self.sim.impulse_joints.get(*handle)?;
                live(&LiveView {
                    data: &joint.data,
                    desc: &self.joint.desc,
                    ptm: self.ptm,
                })
            }
            JointState::Detached => None,
        }
    }

    pub fn anchor_a(&self) -> Option<Vec2> {
        self.read(JointProperty::AnchorA, |c| c.anchor_a, |v| v.anchor_a())
    }

    pub fn anchor_b(&self) -> Option<Vec2> {
        self.read(JointProperty::AnchorB, |c| c.anchor_b, |v| v.anchor_b())
    }

    pub fn groove_a(&self) -> Option<Vec2> {
        self.read(JointProperty::GrooveA, |c| c.groove_a, |v| v.groove_a())
    }

    pub fn groove_b(&self) -> Option<Vec2> {
        self.read(JointProperty::GrooveB, |c| c.groove_b, |v| v.groove_b())
    }

    pub fn min(&self) -> Option<f32> {
        self.read(JointProperty::Min, |c| c.min, |v| v.min())
    }

    pub fn max(&self) -> Option<f32> {
        self.read(JointProperty::Max, |c| c.max, |v| v.max())
    }

    pub fn distance(&self) -> Option<f32> {
        self.read(JointProperty::Distance, |c| c.distance, |v| v.distance())
    }

    pub fn rest_length(&self) -> Option<f32> {
        self.read(JointProperty::RestLength, |c| c.rest_length, |v| v.rest_length())
    }

    pub fn rest_angle(&self) -> Option<f32> {
        self.read(JointProperty::RestAngle, |c| c.rest_angle, |v| v.rest_angle())
    }

    pub fn stiffness(&self) -> Option<f32> {
        self.read(JointProperty::Stiffness, |c| c.stiffness, |v| v.stiffness())
    }

    pub fn damping(&self) -> Option<f32> {
        self.read(JointProperty::Damping, |c| c.damping, |v| v.damping())
    }

    pub fn angle(&self) -> Option<f32> {
        self.read(JointProperty::Angle, |c| c.angle, |v| v.angle())
    }

    pub fn phase(&self) -> Option<f32> {
        self.read(JointProperty::Phase, |c| c.phase, |v| v.phase())
    }

    pub fn ratchet(&self) -> Option<f32> {
        self.read(JointProperty::Ratchet, |c| c.ratchet, |v| v.ratchet())
    }

    pub fn ratio(&self) -> Option<f32> {
        self.read(JointProperty::Ratio, |c| c.ratio, |v| v.ratio())
    }

    pub fn rate(&self) -> Option<f32> {
        self.read(JointProperty::Rate, |c| c.rate, |v| v.rate())
    }
}

/// Write access to a joint. Writes to a pending joint are cached and
/// replayed in order once it is built.
pub struct JointMut<'a> {
    pub(crate) joint: &'a mut PhysicsJoint,
    pub(crate) sim: &'a mut Simulation,
    pub(crate) ptm: f32,
}

impl std::ops::Deref for JointMut<'_> {
    type Target = PhysicsJoint;

    fn deref(&self) -> &PhysicsJoint {
        self.joint
    }
}

impl JointMut<'_> {
    pub fn view(&self) -> JointRef<'_> {
        JointRef {
            joint: &*self.joint,
            sim: &*self.sim,
            ptm: self.ptm,
        }
    }

    fn write<T: Copy + 'static>(
        &mut self,
        property: JointProperty,
        slot: fn(&mut WriteCache) -> &mut Option<T>,
        value: T,
        apply: fn(&mut LiveJoint<'_>, T),
    ) {
        if !self.joint.kind().supports(property) {
            log::warn!(
                "joint {}: {:?} joints have no {property:?}",
                self.joint.id.0,
                self.joint.kind()
            );
            return;
        }
        match &mut self.joint.state {
            JointState::Pending(cache) => {
                *slot(cache) = Some(value);
                self.joint
                    .tasks
                    .push(Box::new(move |live: &mut LiveJoint<'_>| apply(live, value)));
            }
            JointState::Live(handle) => {
                let handle = *handle;
                if let Some(joint) = self.sim.impulse_joints.get_mut(handle, true) {
                    let mut live = LiveJoint {
                        data: &mut joint.data,
                        desc: &mut self.joint.desc,
                        ptm: self.ptm,
                    };
                    apply(&mut live, value);
                }
            }
            JointState::Detached => {
                log::warn!("joint {}: {property:?} written after detach", self.joint.id.0);
            }
        }
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.joint.set_tag(tag);
    }

    /// Whether the two bodies keep colliding with each other.
    pub fn set_collision_enabled(&mut self, enabled: bool) {
        self.joint.collision_enabled = enabled;
        if let JointState::Live(handle) = self.joint.state {
            if let Some(joint) = self.sim.impulse_joints.get_mut(handle, true) {
                joint.data.set_contacts_enabled(enabled);
            }
        }
    }

    pub fn set_max_force(&mut self, max_force: f32) {
        self.joint.max_force = max_force;
        if let JointState::Live(handle) = self.joint.state {
            let kind = self.joint.kind();
            if let Some(joint) = self.sim.impulse_joints.get_mut(handle, true) {
                apply_max_force(&mut joint.data, kind, max_force, self.ptm);
            }
        }
    }

    pub fn set_anchor_a(&mut self, v: Vec2) {
        self.write(JointProperty::AnchorA, |c| &mut c.anchor_a, v, |live, v| live.set_anchor_a(v));
    }

    pub fn set_anchor_b(&mut self, v: Vec2) {
        self.write(JointProperty::AnchorB, |c| &mut c.anchor_b, v, |live, v| live.set_anchor_b(v));
    }

    pub fn set_groove_a(&mut self, v: Vec2) {
        self.write(JointProperty::GrooveA, |c| &mut c.groove_a, v, |live, v| live.set_groove_a(v));
    }

    pub fn set_groove_b(&mut self, v: Vec2) {
        self.write(JointProperty::GrooveB, |c| &mut c.groove_b, v, |live, v| live.set_groove_b(v));
    }

    pub fn set_min(&mut self, v: f32) {
        self.write(JointProperty::Min, |c| &mut c.min, v, |live, v| live.set_min(v));
    }

    pub fn set_max(&mut self, v: f32) {
        self.write(JointProperty::Max, |c| &mut c.max, v, |live, v| live.set_max(v));
    }

    pub fn set_distance(&mut self, v: f32) {
        self.write(JointProperty::Distance, |c| &mut c.distance, v, |live, v| live.set_distance(v));
    }

    pub fn set_rest_length(&mut self, v: f32) {
        self.write(JointProperty::RestLength, |c| &mut c.rest_length, v, |live, v| live.set_rest_length(v));
    }

    pub fn set_rest_angle(&mut self, v: f32) {
        self.write(JointProperty::RestAngle, |c| &mut c.rest_angle, v, |live, v| live.set_rest_angle(v));
    }

    pub fn set_stiffness(&mut self, v: f32) {
        self.write(JointProperty::Stiffness, |c| &mut c.stiffness, v, |live, v| live.set_stiffness(v));
    }

    pub fn set_damping(&mut self, v: f32) {
        self.write(JointProperty::Damping, |c| &mut c.damping, v, |live, v| live.set_damping(v));
    }

    pub fn set_angle(&mut self, v: f32) {
        self.write(JointProperty::Angle, |c| &mut c.angle, v, |live, v| live.set_angle(v));
    }

    pub fn set_phase(&mut self, v: f32) {
        self.write(JointProperty::Phase, |c| &mut c.phase, v, |live, v| live.set_phase(v));
    }

    pub fn set_ratchet(&mut self, v: f32) {
        self.write(JointProperty::Ratchet, |c| &mut c.ratchet, v, |live, v| live.set_ratchet(v));
    }

    pub fn set_ratio(&mut self, v: f32) {
        if v == 0.0 {
            log::warn!("joint {}: gear ratio must be non-zero", self.joint.id.0);
            return;
        }
        self.write(JointProperty::Ratio, |c| &mut c.ratio, v, |live, v| live.set_ratio(v));
    }

    pub fn set_rate(&mut self, v: f32) {
        self.write(JointProperty::Rate, |c| &mut c.rate, v, |live, v| live.set_rate(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn two_bodies(sim: &mut Simulation, a: Vec2, b: Vec2) -> (RigidBodyHandle, RigidBodyHandle) {
        let ha = sim.insert_body(RigidBodyBuilder::dynamic().translation(vector![a.x, a.y]).build());
        let hb = sim.insert_body(RigidBodyBuilder::dynamic().translation(vector![b.x, b.y]).build());
        (ha, hb)
    }

    fn spring() -> JointDesc {
        JointDesc::Spring {
            anchor_a: Vec2::ZERO,
            anchor_b: Vec2::ZERO,
            stiffness: 1.0,
            damping: 0.1,
        }
    }

    #[test]
    fn kind_support_table() {
        assert!(JointKind::Spring.supports(JointProperty::RestLength));
        assert!(JointKind::Groove.supports(JointProperty::AnchorB));
        assert!(!JointKind::Groove.supports(JointProperty::AnchorA));
        assert!(JointKind::Gear.supports(JointProperty::Phase));
        assert!(!JointKind::Fixed.supports(JointProperty::Min));
    }

    #[test]
    fn pending_writes_replay_in_order() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(1.0, 0.0));
        let mut joint = PhysicsJoint::new(JointId(1), BodyId(1), BodyId(2), spring());
        {
            let mut j = JointMut {
                joint: &mut joint,
                sim: &mut sim,
                ptm: 10.0,
            };
            j.set_stiffness(5.0);
            j.set_stiffness(10.0);
            assert_eq!(j.view().stiffness(), Some(10.0));
        }
        assert_eq!(joint.tasks.len(), 2);

        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        joint.flush_delay_tasks(&mut sim, 10.0);
        assert!(joint.tasks.is_empty());
        let j = JointRef {
            joint: &joint,
            sim: &sim,
            ptm: 10.0,
        };
        assert_eq!(j.stiffness(), Some(10.0));
        assert_eq!(j.damping(), Some(0.1));
    }

    #[test]
    fn distance_is_initial_separation() {
        let mut sim = Simulation::new(Vec2::ZERO);
        // 1 meter apart at 10 pixels per meter.
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(1.0, 0.0));
        let mut joint = PhysicsJoint::new(
            JointId(1),
            BodyId(1),
            BodyId(2),
            JointDesc::Distance {
                anchor_a: Vec2::ZERO,
                anchor_b: Vec2::ZERO,
            },
        );
        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        let d = JointRef {
            joint: &joint,
            sim: &sim,
            ptm: 10.0,
        }
        .distance()
        .unwrap();
        assert!((d - 10.0).abs() < EPSILON, "distance {d}");
    }

    #[test]
    fn kind_mismatch_is_ignored() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let mut joint = PhysicsJoint::new(JointId(1), BodyId(1), BodyId(2), JointDesc::Motor { rate: 1.0 });
        let mut j = JointMut {
            joint: &mut joint,
            sim: &mut sim,
            ptm: 10.0,
        };
        j.set_stiffness(3.0);
        assert!(!j.has_pending_writes());
        assert_eq!(j.view().stiffness(), None);
        assert_eq!(j.view().rate(), Some(1.0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "read before it was set")]
    fn unset_cached_read_asserts() {
        let sim = Simulation::new(Vec2::ZERO);
        let joint = PhysicsJoint::new(
            JointId(1),
            BodyId(1),
            BodyId(2),
            JointDesc::Distance {
                anchor_a: Vec2::ZERO,
                anchor_b: Vec2::ZERO,
            },
        );
        let _ = JointRef {
            joint: &joint,
            sim: &sim,
            ptm: 10.0,
        }
        .distance();
    }

    #[test]
    fn live_limits_round_trip() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(2.0, 0.0));
        let mut joint = PhysicsJoint::new(
            JointId(1),
            BodyId(1),
            BodyId(2),
            JointDesc::Limit {
                anchor_a: Vec2::ZERO,
                anchor_b: Vec2::ZERO,
                min: 5.0,
                max: 30.0,
            },
        );
        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        let mut j = JointMut {
            joint: &mut joint,
            sim: &mut sim,
            ptm: 10.0,
        };
        j.set_max(40.0);
        let view = j.view();
        assert!((view.min().unwrap() - 5.0).abs() < EPSILON);
        assert!((view.max().unwrap() - 40.0).abs() < EPSILON);
    }

    #[test]
    fn zero_length_groove_fails_to_build() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(2.0, 0.0));
        let mut joint = PhysicsJoint::new(
            JointId(7),
            BodyId(1),
            BodyId(2),
            JointDesc::Groove {
                groove_a: Vec2::ONE,
                groove_b: Vec2::ONE,
                anchor_b: Vec2::ZERO,
            },
        );
        let err = joint.materialize(&mut sim, ha, hb, 10.0).unwrap_err();
        assert!(matches!(err, PhysicsError::JointBuildFailed { joint: JointId(7), .. }));
        assert!(joint.is_pending());
    }

    #[test]
    fn groove_end_points_read_back() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(2.0, 0.0));
        let mut joint = PhysicsJoint::new(
            JointId(1),
            BodyId(1),
            BodyId(2),
            JointDesc::Groove {
                groove_a: Vec2::new(0.0, 10.0),
                groove_b: Vec2::new(30.0, 10.0),
                anchor_b: Vec2::ZERO,
            },
        );
        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        let view = JointRef {
            joint: &joint,
            sim: &sim,
            ptm: 10.0,
        };
        assert!((view.groove_a().unwrap() - Vec2::new(0.0, 10.0)).length() < 1e-3);
        assert!((view.groove_b().unwrap() - Vec2::new(30.0, 10.0)).length() < 1e-3);
    }

    #[test]
    fn ratchet_phase_shifts_window() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(2.0, 0.0));
        let mut joint = PhysicsJoint::new(
            JointId(1),
            BodyId(1),
            BodyId(2),
            JointDesc::Ratchet {
                phase: 0.0,
                ratchet: 0.5,
            },
        );
        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        let mut j = JointMut {
            joint: &mut joint,
            sim: &mut sim,
            ptm: 10.0,
        };
        j.set_phase(0.25);
        let view = j.view();
        assert!((view.phase().unwrap() - 0.25).abs() < EPSILON);
        assert!(view.angle().unwrap().abs() < EPSILON);
        assert!((view.ratchet().unwrap() - 0.5).abs() < EPSILON);
    }

    #[test]
    fn dematerialize_returns_to_pending() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(1.0, 0.0));
        let mut joint = PhysicsJoint::new(JointId(1), BodyId(1), BodyId(2), spring());
        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        assert_eq!(sim.joint_count(), 1);
        joint.dematerialize(&mut sim, 10.0);
        assert!(joint.is_pending());
        assert_eq!(sim.joint_count(), 0);
        joint.detach(&mut sim);
        joint.dematerialize(&mut sim, 10.0);
        assert_eq!(joint.state, JointState::Detached);
    }

    #[test]
    fn dematerialized_distance_survives_rebuild() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(1.5, 0.0));
        let mut joint = PhysicsJoint::new(
            JointId(1),
            BodyId(1),
            BodyId(2),
            JointDesc::Distance {
                anchor_a: Vec2::ZERO,
                anchor_b: Vec2::ZERO,
            },
        );
        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        JointMut {
            joint: &mut joint,
            sim: &mut sim,
            ptm: 10.0,
        }
        .set_distance(40.0);

        joint.dematerialize(&mut sim, 10.0);
        let cached = JointRef {
            joint: &joint,
            sim: &sim,
            ptm: 10.0,
        }
        .distance();
        assert_eq!(cached, Some(40.0));

        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        joint.flush_delay_tasks(&mut sim, 10.0);
        let d = JointRef {
            joint: &joint,
            sim: &sim,
            ptm: 10.0,
        }
        .distance()
        .unwrap();
        assert!((d - 40.0).abs() < EPSILON, "distance {d}");
    }

    #[test]
    fn dematerialized_rest_angle_is_cached() {
        let mut sim = Simulation::new(Vec2::ZERO);
        let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(1.0, 0.0));
        let mut joint = PhysicsJoint::new(
            JointId(1),
            BodyId(1),
            BodyId(2),
            JointDesc::RotarySpring {
                stiffness: 2.0,
                damping: 0.5,
            },
        );
        joint.materialize(&mut sim, ha, hb, 10.0).unwrap();
        JointMut {
            joint: &mut joint,
            sim: &mut sim,
            ptm: 10.0,
        }
        .set_rest_angle(0.75);
        joint.dematerialize(&mut sim, 10.0);
        let view = JointRef {
            joint: &joint,
            sim: &sim,
            ptm: 10.0,
        };
        assert_eq!(view.rest_angle(), Some(0.75));
        assert_eq!(view.stiffness(), Some(2.0));
    }

    #[test]
    fn spring_gains_do_not_depend_on_ptm() {
        let gains = |ptm: f32| {
            let mut sim = Simulation::new(Vec2::ZERO);
            let (ha, hb) = two_bodies(&mut sim, Vec2::ZERO, Vec2::new(1.0, 0.0));
            let mut joint = PhysicsJoint::new(
                JointId(1),
                BodyId(1),
                BodyId(2),
                JointDesc::Spring {
                    anchor_a: Vec2::ZERO,
                    anchor_b: Vec2::ZERO,
                    stiffness: 2.0,
                    damping: 0.3,
                },
            );
            joint.materialize(&mut sim, ha, hb, ptm).unwrap();
            let JointState::Live(handle) = joint.state else {
                panic!("joint not built");
            };
            let m = motor_of(&sim.impulse_joints.get(handle).unwrap().data, JointAxis::LinX);
            (m.stiffness, m.damping)
        };
        let (k10, c10) = gains(10.0);
        let (k50, c50) = gains(50.0);
        assert!((k10 - k50).abs() < EPSILON && (c10 - c50).abs() < EPSILON);
        let omega = std::f32::consts::TAU * 2.0;
        assert!((k10 - omega * omega).abs() < 1e-2, "stiffness gain {k10}");
        assert!((c10 - 0.6 * omega).abs() < 1e-3, "damping gain {c10}");
    }

    #[test]
    fn only_fixed_joints_start_without_collision() {
        let fixed = PhysicsJoint::new(JointId(1), BodyId(1), BodyId(2), JointDesc::Fixed { anchor: Vec2::ZERO });
        assert!(!fixed.is_collision_enabled());
        for desc in [
            JointDesc::Pin(PinAnchor::World(Vec2::ZERO)),
            spring(),
            JointDesc::Motor { rate: 1.0 },
            JointDesc::RotaryLimit { min: -1.0, max: 1.0 },
        ] {
            let joint = PhysicsJoint::new(JointId(2), BodyId(1), BodyId(2), desc);
            assert!(joint.is_collision_enabled(), "{:?} should collide", desc.kind());
        }
    }

    #[test]
    fn gear_target_follows_ratio() {
        assert_eq!(gear_target(1.0, 0.0, 0.0), None);
        let t = gear_target(1.0, 0.0, 2.0).unwrap();
        assert!((t + 0.5).abs() < EPSILON, "B sits at 0.5 rad, 0.5 behind A");
    }
}

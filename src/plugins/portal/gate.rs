use bevy::{prelude::*, utils::HashMap};

use super::{
    endpoint::{EndpointId, PortalEndpoint},
    geometry::{portal_to_portal, RigidTransform},
};

/// Which side of a portal surface a point lies on. The front is where the surface normal points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn of(surface: &RigidTransform, point: Vec3) -> Side {
        if surface.forward().dot(point - surface.position) > 0. {
            Side::Front
        } else {
            Side::Back
        }
    }
}

/// Kinematic state of a body going through a portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl BodyState {
    pub fn new(position: Vec3, linear_velocity: Vec3) -> BodyState {
        BodyState {
            position,
            orientation: Quat::IDENTITY,
            linear_velocity,
            angular_velocity: Vec3::ZERO,
        }
    }
}

/// Alignment of a velocity with the surface normal, in `[-1, 1]`. Zero for a body at rest.
pub fn forward_alignment(surface: &RigidTransform, velocity: Vec3) -> f32 {
    velocity.normalize_or_zero().dot(surface.forward())
}

/// Carry a body that crossed `entered` to the matching placement at `exited`, pushed out of the
/// exit frame by its depth.
pub fn teleport_body(entered: &PortalEndpoint, exited: &PortalEndpoint, body: &BodyState) -> BodyState {
    let t = portal_to_portal(&entered.transform, &exited.transform);
    BodyState {
        position: t.transform_point(body.position) + exited.normal() * exited.frame_depth,
        orientation: (t.orientation * body.orientation).normalize(),
        linear_velocity: t.transform_direction(body.linear_velocity),
        angular_velocity: t.transform_direction(body.angular_velocity),
    }
}

/// Trigger volume bookkeeping and crossing detection of one endpoint.
///
/// A body is `inside` while it has an entry in `tracked`, along with the side of the surface it
/// was last seen on.
#[derive(Debug, Clone)]
pub struct TeleportGate {
    pub owner: EndpointId,
    pub paired: EndpointId,
    pub crossing_threshold: f32,
    tracked: HashMap<Entity, Side>,
}

impl TeleportGate {
    pub fn new(owner: EndpointId, paired: EndpointId, crossing_threshold: f32) -> TeleportGate {
        TeleportGate {
            owner,
            paired,
            crossing_threshold,
            tracked: HashMap::new(),
        }
    }

    /// The body entered the trigger volume at `position`. Bodies already tracked keep their side.
    pub fn enter(&mut self, body: Entity, position: Vec3, surface: &RigidTransform) {
        self.tracked
            .entry(body)
            .or_insert_with(|| Side::of(surface, position));
    }

    /// Start tracking a body on a known side, used for bodies arriving through the paired gate.
    pub fn track(&mut self, body: Entity, side: Side) {
        self.tracked.insert(body, side);
    }

    /// Per-tick check of a body inside the volume. Returns whether it crossed; a crossing body
    /// stops being tracked by this gate.
    pub fn tick(&mut self, body: Entity, state: &BodyState, surface: &RigidTransform) -> bool {
        let last_side = match self.tracked.get(&body) {
            Some(side) => *side,
            None => return false,
        };
        let side = Side::of(surface, state.position);
        if side == last_side {
            return false;
        }
        // Only back to front crossings fire, other flips just follow the body.
        let crossed_forward = last_side == Side::Back && side == Side::Front;
        if crossed_forward
            && forward_alignment(surface, state.linear_velocity) >= self.crossing_threshold
        {
            self.tracked.remove(&body);
            true
        } else {
            self.tracked.insert(body, side);
            false
        }
    }

    /// The body left the trigger volume. A body that crossed in the same tick still counts.
    pub fn exit(&mut self, body: Entity, state: &BodyState, surface: &RigidTransform) -> bool {
        let crossed = self.tick(body, state, surface);
        self.tracked.remove(&body);
        crossed
    }

    pub fn forget(&mut self, body: Entity) -> bool {
        self.tracked.remove(&body).is_some()
    }

    pub fn side_of(&self, body: Entity) -> Option<Side> {
        self.tracked.get(&body).copied()
    }

    pub fn is_tracking(&self, body: Entity) -> bool {
        self.tracked.contains_key(&body)
    }

    pub fn tracked_bodies(&self) -> impl Iterator<Item = Entity> + '_ {
        self.tracked.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use super::*;
    use crate::plugins::portal::endpoint::ChannelId;

    const THRESHOLD: f32 = 0.1;

    fn endpoint(id: u64, transform: RigidTransform, frame_depth: f32) -> PortalEndpoint {
        PortalEndpoint {
            id: EndpointId(id),
            channel: ChannelId(7),
            transform,
            frame_depth,
            ..default()
        }
    }

    /// A at the origin facing +Z, B at (100, 0, 0) facing -X.
    fn channel_7() -> (PortalEndpoint, PortalEndpoint) {
        (
            endpoint(
                1,
                RigidTransform::new(Vec3::ZERO, Quat::from_rotation_y(PI)),
                0.1,
            ),
            endpoint(
                2,
                RigidTransform::new(Vec3::new(100., 0., 0.), Quat::from_rotation_y(FRAC_PI_2)),
                0.1,
            ),
        )
    }

    fn gate() -> TeleportGate {
        TeleportGate::new(EndpointId(1), EndpointId(2), THRESHOLD)
    }

    #[test]
    fn sides_follow_the_normal() {
        let (a, _) = channel_7();
        assert_eq!(Side::of(&a.transform, Vec3::new(0., 0., 1.)), Side::Front);
        assert_eq!(Side::of(&a.transform, Vec3::new(0., 0., -1.)), Side::Back);
        assert_eq!(Side::of(&a.transform, Vec3::ZERO), Side::Back);
    }

    #[test]
    fn forward_crossing_fires_once() {
        let (a, _) = channel_7();
        let body = Entity::from_raw(1);
        let mut gate = gate();
        gate.enter(body, Vec3::new(0., 0., -0.2), &a.transform);
        assert_eq!(gate.side_of(body), Some(Side::Back));

        let approaching = BodyState::new(Vec3::new(0., 0., -0.1), Vec3::new(0., 0., 5.));
        assert!(!gate.tick(body, &approaching, &a.transform));

        let crossed = BodyState::new(Vec3::new(0., 0., 0.1), Vec3::new(0., 0., 5.));
        assert!(gate.tick(body, &crossed, &a.transform));
        assert!(!gate.is_tracking(body));
        assert!(!gate.tick(body, &crossed, &a.transform));
    }

    #[test]
    fn crossing_threshold_boundary() {
        let (a, _) = channel_7();
        let body = Entity::from_raw(1);
        let epsilon = 1e-3;
        for (alignment, fires) in [(THRESHOLD - epsilon, false), (THRESHOLD + epsilon, true)] {
            // Velocity making `alignment` with the normal (+Z), the rest along +X.
            let velocity = Vec3::new((1. - alignment * alignment).sqrt(), 0., alignment) * 3.;
            assert!((forward_alignment(&a.transform, velocity) - alignment).abs() < 1e-5);

            let mut gate = gate();
            gate.enter(body, Vec3::new(0., 0., -0.05), &a.transform);
            let state = BodyState::new(Vec3::new(0.3, 0., 0.05), velocity);
            assert_eq!(gate.tick(body, &state, &a.transform), fires);
        }
    }

    #[test]
    fn grazing_bodies_do_not_teleport() {
        let (a, _) = channel_7();
        let body = Entity::from_raw(4);
        let mut gate = gate();
        gate.enter(body, Vec3::new(-1., 0., -1e-4), &a.transform);
        // Sliding along the surface, the side flips because of noise.
        let state = BodyState::new(Vec3::new(1., 0., 1e-4), Vec3::new(4., 0., 1e-4));
        assert!(!gate.tick(body, &state, &a.transform));
        assert_eq!(gate.side_of(body), Some(Side::Front));
    }

    #[test]
    fn backing_out_clears_tracking() {
        let (a, _) = channel_7();
        let body = Entity::from_raw(2);
        let mut gate = gate();
        gate.enter(body, Vec3::new(0., 0., -0.3), &a.transform);
        let retreating = BodyState::new(Vec3::new(0., 0., -0.8), Vec3::new(0., 0., -1.));
        assert!(!gate.exit(body, &retreating, &a.transform));
        assert!(!gate.is_tracking(body));
    }

    #[test]
    fn backward_crossings_do_not_teleport() {
        let (a, _) = channel_7();
        let body = Entity::from_raw(2);
        let mut gate = gate();
        gate.enter(body, Vec3::new(0., 0., 0.3), &a.transform);
        let state = BodyState::new(Vec3::new(0., 0., -0.3), Vec3::new(0., 0., -2.));
        assert!(!gate.tick(body, &state, &a.transform));
    }

    #[test]
    fn reversing_across_the_surface_does_not_teleport() {
        let (a, _) = channel_7();
        let body = Entity::from_raw(5);
        let mut gate = gate();
        gate.enter(body, Vec3::new(0., 0., 0.3), &a.transform);
        // Backed through the surface, but already moving forward again when the tick runs.
        let reversed = BodyState::new(Vec3::new(0., 0., -0.3), Vec3::new(0., 0., 2.));
        assert!(!gate.tick(body, &reversed, &a.transform));
        assert_eq!(gate.side_of(body), Some(Side::Back));

        // Coming back out through the front is a regular crossing.
        let out = BodyState::new(Vec3::new(0., 0., 0.1), Vec3::new(0., 0., 2.));
        assert!(gate.tick(body, &out, &a.transform));
    }

    #[test]
    fn crossing_and_leaving_in_one_tick_still_fires() {
        let (a, _) = channel_7();
        let body = Entity::from_raw(3);
        let mut gate = gate();
        gate.enter(body, Vec3::new(0., 0., -0.5), &a.transform);
        let gone = BodyState::new(Vec3::new(0., 0., 2.), Vec3::new(0., 0., 40.));
        assert!(gate.exit(body, &gone, &a.transform));
        assert!(!gate.is_tracking(body));
    }

    #[test]
    fn arriving_bodies_keep_their_exit_side() {
        let (_, b) = channel_7();
        let body = Entity::from_raw(6);
        let mut gate = gate();
        gate.track(body, Side::Front);
        // The physics step reports the overlap late, from behind the surface.
        gate.enter(body, Vec3::new(100.5, 0., 0.), &b.transform);
        assert_eq!(gate.side_of(body), Some(Side::Front));
    }

    #[test]
    fn untracked_bodies_are_ignored() {
        let (a, _) = channel_7();
        let mut gate = gate();
        let state = BodyState::new(Vec3::new(0., 0., 1.), Vec3::Z);
        assert!(!gate.tick(Entity::from_raw(9), &state, &a.transform));
        assert!(!gate.forget(Entity::from_raw(9)));
    }

    #[test]
    fn example_teleport_lands_at_the_paired_surface() {
        let (a, b) = channel_7();
        let body = BodyState::new(Vec3::ZERO, Vec3::new(0., 0., 5.));
        let out = teleport_body(&a, &b, &body);
        assert!(out.position.abs_diff_eq(Vec3::new(100. - b.frame_depth, 0., 0.), 1e-4));
        assert!(out.linear_velocity.abs_diff_eq(Vec3::new(-5., 0., 0.), 1e-4));
        assert!(out.orientation.is_normalized());
    }

    #[test]
    fn teleport_maps_forward_motion_for_any_placement() {
        let placements = [
            RigidTransform::new(Vec3::new(3., -1., 8.), Quat::from_euler(EulerRot::YXZ, 0.4, 1.1, 0.2)),
            RigidTransform::new(Vec3::new(-50., 20., 0.), Quat::from_rotation_x(-FRAC_PI_2)),
            RigidTransform::new(Vec3::new(0., 0., 0.), Quat::from_rotation_z(2.5)),
        ];
        for s in &placements {
            for d in &placements {
                let entered = endpoint(1, *s, 0.);
                let exited = endpoint(2, *d, 0.);
                let body = BodyState::new(s.position, s.forward() * 7.);
                let out = teleport_body(&entered, &exited, &body);
                assert!(out.position.abs_diff_eq(d.position, 1e-4));
                assert!(out.linear_velocity.abs_diff_eq(d.forward() * 7., 1e-4));
                assert!((out.linear_velocity.length() - 7.).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn teleport_rotates_orientation_and_spin() {
        let (a, b) = channel_7();
        let body = BodyState {
            position: Vec3::new(0.5, 1., 0.),
            orientation: Quat::from_rotation_y(PI),
            linear_velocity: Vec3::Z,
            angular_velocity: Vec3::Z,
        };
        let out = teleport_body(&a, &b, &body);
        // The body faced along A's normal, it now faces along B's.
        assert!((out.orientation * Vec3::NEG_Z).abs_diff_eq(b.normal(), 1e-5));
        assert!(out.angular_velocity.abs_diff_eq(Vec3::NEG_X, 1e-5));
    }
}

use std::ops::Mul;

use bevy::{prelude::*, reflect::FromReflect};

/// Position and orientation of a rigid body or surface, without scale.
///
/// The orientation is kept normalized by every constructor and operation, so chains of
/// compositions don't drift away from a valid rotation.
#[derive(Debug, Clone, Copy, PartialEq, Reflect, FromReflect)]
pub struct RigidTransform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for RigidTransform {
    fn default() -> Self {
        RigidTransform::IDENTITY
    }
}

impl RigidTransform {
    pub const IDENTITY: RigidTransform = RigidTransform {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> RigidTransform {
        RigidTransform {
            position,
            orientation: orientation.normalize(),
        }
    }

    pub fn from_position(position: Vec3) -> RigidTransform {
        RigidTransform {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Placement at `position` whose forward axis (-Z) points along `normal`.
    pub fn facing(position: Vec3, normal: Vec3) -> RigidTransform {
        RigidTransform::new(
            position,
            Quat::from_rotation_arc(Vec3::NEG_Z, normal.normalize()),
        )
    }

    /// `self ∘ rhs`: the transform that applies `rhs` first, then `self`.
    pub fn compose(&self, rhs: &RigidTransform) -> RigidTransform {
        RigidTransform::new(
            self.position + self.orientation * rhs.position,
            self.orientation * rhs.orientation,
        )
    }

    pub fn inverse(&self) -> RigidTransform {
        let orientation = self.orientation.inverse();
        RigidTransform::new(-(orientation * self.position), orientation)
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.orientation * point
    }

    pub fn transform_direction(&self, direction: Vec3) -> Vec3 {
        self.orientation * direction
    }

    /// The local forward axis. For portal surfaces this is the surface normal.
    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn compute_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }

    /// Whether this transform describes a usable placement. A zero or non-finite orientation has
    /// no surface normal.
    pub fn is_valid(&self) -> bool {
        self.position.is_finite()
            && self.orientation.is_finite()
            && self.orientation.length_squared() > f32::EPSILON
    }

    /// Compare with a positional tolerance and an angular tolerance in radians.
    pub fn abs_diff_eq(&self, other: &RigidTransform, max_distance: f32, max_angle: f32) -> bool {
        self.position.distance(other.position) <= max_distance
            && self.orientation.angle_between(other.orientation) <= max_angle
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        self.compose(&rhs)
    }
}

impl From<Transform> for RigidTransform {
    fn from(transform: Transform) -> Self {
        RigidTransform::new(transform.translation, transform.rotation)
    }
}

impl From<&GlobalTransform> for RigidTransform {
    fn from(transform: &GlobalTransform) -> Self {
        transform.compute_transform().into()
    }
}

impl From<RigidTransform> for Transform {
    fn from(transform: RigidTransform) -> Self {
        Transform::from_translation(transform.position).with_rotation(transform.orientation)
    }
}

/// The transform carrying anything expressed relative to the `entered` surface to the same
/// relative placement at the `exited` surface.
pub fn portal_to_portal(entered: &RigidTransform, exited: &RigidTransform) -> RigidTransform {
    exited.compose(&entered.inverse())
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_3, PI};

    use super::*;

    fn sample_transforms() -> Vec<RigidTransform> {
        vec![
            RigidTransform::IDENTITY,
            RigidTransform::new(Vec3::new(100., 0., 0.), Quat::from_rotation_y(FRAC_PI_2)),
            RigidTransform::new(
                Vec3::new(-3.5, 12., 0.25),
                Quat::from_euler(EulerRot::YXZ, 0.3, -1.2, FRAC_PI_3),
            ),
            RigidTransform::new(Vec3::new(0., -40., 7.), Quat::from_rotation_x(PI)),
        ]
    }

    #[test]
    fn inverse_composes_to_identity() {
        for s in sample_transforms() {
            let round_trip = s.inverse().compose(&s);
            assert!(
                round_trip.abs_diff_eq(&RigidTransform::IDENTITY, 1e-5, 1e-4),
                "{:?} round trip gave {:?}",
                s,
                round_trip
            );
            // Here the position goes through the rotation twice, its error grows with it.
            let other_way = s.compose(&s.inverse());
            let tolerance = 1e-5 * s.position.length().max(1.);
            assert!(other_way.abs_diff_eq(&RigidTransform::IDENTITY, tolerance, 1e-4));
        }
    }

    #[test]
    fn compose_applies_right_hand_side_first() {
        let translate = RigidTransform::from_position(Vec3::X);
        let rotate = RigidTransform::new(Vec3::ZERO, Quat::from_rotation_z(FRAC_PI_2));
        // Rotating X by 90° around Z gives Y, then translating by X.
        let p = (translate * rotate).transform_point(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(1., 1., 0.), 1e-6));
        // Translating first, then rotating (2, 0, 0).
        let p = (rotate * translate).transform_point(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(0., 2., 0.), 1e-6));
    }

    #[test]
    fn directions_ignore_translation() {
        let t = RigidTransform::new(Vec3::splat(50.), Quat::from_rotation_y(PI));
        assert!(t.transform_direction(Vec3::Z).abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!(t.forward().abs_diff_eq(Vec3::Z, 1e-6));
    }

    #[test]
    fn orientation_stays_normalized() {
        let t = RigidTransform::new(Vec3::ZERO, Quat::from_xyzw(0., 2., 0., 2.));
        assert!(t.orientation.is_normalized());
        let mut chained = t;
        for _ in 0..1000 {
            chained = chained * t;
        }
        assert!(chained.orientation.is_normalized());
    }

    #[test]
    fn facing_points_forward_along_normal() {
        for normal in [Vec3::Z, Vec3::NEG_X, Vec3::new(1., 1., 0.)] {
            let t = RigidTransform::facing(Vec3::ONE, normal);
            assert!(t.forward().abs_diff_eq(normal.normalize(), 1e-5));
        }
    }

    #[test]
    fn portal_to_portal_maps_surface_frames() {
        let transforms = sample_transforms();
        for s in &transforms {
            for d in &transforms {
                let t = portal_to_portal(s, d);
                assert!(t.transform_point(s.position).abs_diff_eq(d.position, 1e-4));
                assert!(t.transform_direction(s.forward()).abs_diff_eq(d.forward(), 1e-5));
            }
        }
    }

    #[test]
    fn invalid_placements_are_detected() {
        assert!(RigidTransform::IDENTITY.is_valid());
        let nan = RigidTransform {
            position: Vec3::new(f32::NAN, 0., 0.),
            orientation: Quat::IDENTITY,
        };
        assert!(!nan.is_valid());
        let degenerate = RigidTransform {
            position: Vec3::ZERO,
            orientation: Quat::from_xyzw(0., 0., 0., 0.),
        };
        assert!(!degenerate.is_valid());
    }

    #[test]
    fn converts_from_bevy_transforms() {
        let transform = Transform::from_xyz(1., 2., 3.)
            .with_rotation(Quat::from_rotation_y(0.5))
            .with_scale(Vec3::splat(4.));
        let rigid = RigidTransform::from(transform);
        assert_eq!(rigid.position, Vec3::new(1., 2., 3.));
        let back = Transform::from(rigid);
        assert_eq!(back.scale, Vec3::ONE);
        assert!(back.rotation.abs_diff_eq(transform.rotation, 1e-6));
    }
}

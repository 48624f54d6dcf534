use bevy::{prelude::*, reflect::FromReflect};

use super::{
    camera_projection::{base_projection, inverse_projection_params, oblique_projection},
    endpoint::{EndpointId, PortalEndpoint},
    geometry::RigidTransform,
    settings::PortalSettings,
};

/// Visual parameters a virtual viewpoint applies on top of its camera. Copied by value from the
/// endpoint when the channel pairs.
#[derive(Debug, Clone, PartialEq, Reflect, FromReflect)]
pub struct ViewpointStyle {
    /// Color handed to the edge/outline pass and to the portal surface rim.
    pub edge_color: Color,
    /// Clear color of the virtual camera, `None` to keep the main camera's.
    pub clear_color: Option<Color>,
}

impl Default for ViewpointStyle {
    fn default() -> Self {
        PortalSettings::default().shared_style()
    }
}

/// Edge color currently active on the main viewpoint, for HUD and post-process collaborators.
#[derive(Debug, Clone, Resource, Reflect)]
pub struct MainViewpointStyle {
    pub edge_color: Color,
}

/// Snapshot of the main camera for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MainViewpoint {
    pub transform: RigidTransform,
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl MainViewpoint {
    pub fn new(transform: &GlobalTransform, perspective: &PerspectiveProjection) -> MainViewpoint {
        MainViewpoint {
            transform: transform.into(),
            fov: perspective.fov,
            aspect_ratio: perspective.aspect_ratio,
            near: perspective.near,
            far: perspective.far,
        }
    }

    pub fn perspective(&self) -> PerspectiveProjection {
        PerspectiveProjection {
            fov: self.fov,
            aspect_ratio: self.aspect_ratio,
            near: self.near,
            far: self.far,
        }
    }
}

/// How far the clip plane is pulled towards the paired surface as the main viewpoint gets far
/// from the portal. Hides the slices floating point error opens along the portal edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeewayRamp {
    pub max_leeway: f32,
    pub distance: f32,
}

impl From<&PortalSettings> for LeewayRamp {
    fn from(settings: &PortalSettings) -> Self {
        LeewayRamp {
            max_leeway: settings.max_clip_leeway,
            distance: settings.leeway_distance,
        }
    }
}

impl LeewayRamp {
    pub fn leeway(&self, distance: f32) -> f32 {
        if self.distance <= 0. {
            return self.max_leeway;
        }
        self.max_leeway * (distance / self.distance).clamp(0., 1.)
    }
}

/// Pose of the camera looking through `owner` as seen from the paired surface.
///
/// The main viewpoint is first pulled back along the owner's normal by the frame depth, so the
/// inside of the frame stays in view.
pub fn mirrored_pose(
    main: &RigidTransform,
    owner: &PortalEndpoint,
    paired: &RigidTransform,
) -> RigidTransform {
    let pulled_back = RigidTransform::new(
        main.position - owner.normal() * owner.frame_depth,
        main.orientation,
    );
    let local = owner.transform.inverse().compose(&pulled_back);
    paired.compose(&local)
}

/// Distance between the paired surface and the clip plane, along the paired normal. Never
/// negative: the plane may only approach the surface from the far side.
pub fn clip_plane_offset(frame_depth: f32, leeway: f32) -> f32 {
    (frame_depth - leeway).max(0.)
}

/// World space clip plane `(n, -n·o)` of the paired surface. The visible side is along the
/// paired normal.
pub fn paired_clip_plane(paired: &PortalEndpoint, leeway: f32) -> Vec4 {
    let normal = paired.normal();
    let origin =
        paired.transform.position + normal * clip_plane_offset(paired.frame_depth, leeway);
    normal.extend(-normal.dot(origin))
}

/// Express a world space plane in the view space of a camera placed at `camera`.
pub fn world_plane_to_view(plane: Vec4, camera: &RigidTransform) -> Vec4 {
    // Inverse transpose of the view matrix = inverse inverse transpose of camera matrix = transpose
    camera.compute_matrix().transpose() * plane
}

/// Virtual camera of one endpoint: renders what lies beyond the paired endpoint.
#[derive(Debug, Clone)]
pub struct VirtualViewpoint {
    pub owner: EndpointId,
    pub paired: EndpointId,
    pub pose: RigidTransform,
    pub projection: Mat4,
    /// Depth linearization parameters matching `projection`.
    pub inverse_projection: Vec4,
    pub style: ViewpointStyle,
    /// Camera entity rendering this viewpoint, once spawned.
    pub camera: Option<Entity>,
}

impl VirtualViewpoint {
    pub fn new(owner: EndpointId, paired: EndpointId, style: ViewpointStyle) -> VirtualViewpoint {
        let projection = Mat4::IDENTITY;
        VirtualViewpoint {
            owner,
            paired,
            pose: RigidTransform::IDENTITY,
            projection,
            inverse_projection: inverse_projection_params(&projection),
            style,
            camera: None,
        }
    }

    /// Recompute pose and projection from this frame's main viewpoint. Returns whether the clip
    /// plane was degenerate.
    pub fn update(
        &mut self,
        main: &MainViewpoint,
        owner: &PortalEndpoint,
        paired: &PortalEndpoint,
        leeway: &LeewayRamp,
    ) -> bool {
        debug_assert_eq!(owner.id, self.owner);
        debug_assert_eq!(paired.id, self.paired);

        self.pose = mirrored_pose(&main.transform, owner, &paired.transform);

        let distance = owner.transform.position.distance(main.transform.position);
        let clip_plane = world_plane_to_view(
            paired_clip_plane(paired, leeway.leeway(distance)),
            &self.pose,
        );
        let oblique = oblique_projection(
            base_projection(main.fov, main.aspect_ratio, main.near),
            clip_plane,
        );
        self.projection = oblique.matrix;
        self.inverse_projection = inverse_projection_params(&self.projection);
        oblique.degenerate
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    use bevy::math::Vec4Swizzles;

    use super::*;
    use crate::plugins::portal::endpoint::ChannelId;

    fn endpoint(id: u64, transform: RigidTransform, frame_depth: f32) -> PortalEndpoint {
        PortalEndpoint {
            id: EndpointId(id),
            channel: ChannelId(7),
            transform,
            frame_depth,
            ..default()
        }
    }

    fn main_viewpoint(transform: RigidTransform) -> MainViewpoint {
        MainViewpoint {
            transform,
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.1,
            far: 1000.,
        }
    }

    fn scenario() -> (PortalEndpoint, PortalEndpoint) {
        (
            endpoint(
                1,
                RigidTransform::new(Vec3::ZERO, Quat::from_rotation_y(PI)),
                0.,
            ),
            endpoint(
                2,
                RigidTransform::new(Vec3::new(100., 0., 0.), Quat::from_rotation_y(FRAC_PI_2)),
                0.,
            ),
        )
    }

    const RAMP: LeewayRamp = LeewayRamp {
        max_leeway: 1.,
        distance: 100.,
    };

    #[test]
    fn pose_through_coincident_portals_is_the_main_pose() {
        let surface = RigidTransform::new(Vec3::new(3., 1., -2.), Quat::from_rotation_y(0.7));
        let owner = endpoint(1, surface, 0.);
        let main = RigidTransform::new(Vec3::new(1., 2., 3.), Quat::from_rotation_x(0.3));
        let pose = mirrored_pose(&main, &owner, &surface);
        assert!(pose.abs_diff_eq(&main, 1e-5, 1e-4));
    }

    #[test]
    fn pose_keeps_the_relative_placement() {
        let owner = endpoint(
            1,
            RigidTransform::new(
                Vec3::new(-4., 2., 9.),
                Quat::from_euler(EulerRot::YXZ, 0.4, 0.2, -0.1),
            ),
            0.3,
        );
        let paired = RigidTransform::new(Vec3::new(60., -5., 2.), Quat::from_rotation_z(1.1));
        let main = RigidTransform::new(Vec3::new(-2., 3., 4.), Quat::from_rotation_y(2.));

        let pose = mirrored_pose(&main, &owner, &paired);
        let pulled_back = RigidTransform::new(
            main.position - owner.normal() * owner.frame_depth,
            main.orientation,
        );
        let relative_to_owner = owner.transform.inverse() * pulled_back;
        let relative_to_paired = paired.inverse() * pose;
        assert!(relative_to_owner.abs_diff_eq(&relative_to_paired, 1e-4, 1e-4));
    }

    #[test]
    fn pose_in_the_example_channel() {
        let (a, b) = scenario();
        // Standing 5 units behind A, looking through it.
        let main = RigidTransform::new(Vec3::new(0., 0., -5.), Quat::from_rotation_y(PI));
        let pose = mirrored_pose(&main, &a, &b.transform);
        assert!(pose.position.abs_diff_eq(Vec3::new(105., 0., 0.), 1e-4));
        assert!(pose.forward().abs_diff_eq(Vec3::NEG_X, 1e-5));
    }

    #[test]
    fn frame_depth_pulls_the_camera_back() {
        let (mut a, b) = scenario();
        a.frame_depth = 0.5;
        let main = RigidTransform::new(Vec3::new(0., 0., -5.), Quat::from_rotation_y(PI));
        let pose = mirrored_pose(&main, &a, &b.transform);
        assert!(pose.position.abs_diff_eq(Vec3::new(105.5, 0., 0.), 1e-4));
    }

    #[test]
    fn leeway_ramps_over_distance() {
        assert_eq!(RAMP.leeway(0.), 0.);
        assert!((RAMP.leeway(50.) - 0.5).abs() < 1e-6);
        assert_eq!(RAMP.leeway(100.), 1.);
        assert_eq!(RAMP.leeway(1000.), 1.);
        let flat = LeewayRamp {
            max_leeway: 0.25,
            distance: 0.,
        };
        assert_eq!(flat.leeway(3.), 0.25);
    }

    #[test]
    fn clip_plane_never_crosses_the_paired_surface() {
        for frame_depth in [0., 0.1, 0.6, 2.] {
            let paired = endpoint(
                2,
                RigidTransform::new(Vec3::new(100., 0., 0.), Quat::from_rotation_y(FRAC_PI_2)),
                frame_depth,
            );
            let mut previous = f32::INFINITY;
            for step in 0..=30 {
                let leeway = RAMP.leeway(step as f32 * 5.);
                let plane = paired_clip_plane(&paired, leeway);
                // Signed distance of the paired origin to the plane: the plane sits at or beyond
                // the surface along its normal.
                let offset = -plane.dot(paired.transform.position.extend(1.));
                assert!(offset >= 0., "plane moved to the near side: {}", offset);
                assert!(offset <= previous + 1e-6);
                previous = offset;
            }
        }
    }

    #[test]
    fn update_clips_at_the_paired_surface() {
        let (a, b) = scenario();
        let main = main_viewpoint(RigidTransform::new(
            Vec3::new(0., 0., -5.),
            Quat::from_rotation_y(PI),
        ));
        let mut viewpoint = VirtualViewpoint::new(a.id, b.id, ViewpointStyle::default());
        let degenerate = viewpoint.update(&main, &a, &b, &RAMP);
        assert!(!degenerate);

        let view_projection = viewpoint.projection * viewpoint.pose.compute_matrix().inverse();
        let depth = |p: Vec3| {
            let clip = view_projection * p.extend(1.);
            clip.z / clip.w
        };
        // Leeway 0.05 at 5 units, frame depth 0: the plane sits on the surface.
        assert!((depth(b.transform.position) - 1.).abs() < 1e-3);
        // Geometry between the virtual camera and B is clipped, geometry beyond is kept.
        assert!(depth(Vec3::new(102., 0., 0.)) > 1.);
        let beyond = depth(Vec3::new(90., 0.5, 0.));
        assert!(beyond > 0. && beyond < 1.);
        assert_eq!(
            viewpoint.inverse_projection,
            inverse_projection_params(&viewpoint.projection)
        );
    }

    #[test]
    fn update_flags_cameras_past_the_surface() {
        let (a, b) = scenario();
        // In front of A and looking back at it: the mirrored camera ends up beyond B.
        let main = main_viewpoint(RigidTransform::new(Vec3::new(0., 0., 5.), Quat::IDENTITY));
        let mut viewpoint = VirtualViewpoint::new(a.id, b.id, ViewpointStyle::default());
        assert!(viewpoint.update(&main, &a, &b, &RAMP));
        assert!(viewpoint.projection.is_finite());
    }

    #[test]
    fn plane_moves_into_view_space() {
        let camera = RigidTransform::new(Vec3::new(0., 0., 10.), Quat::IDENTITY);
        // Plane z = 0 facing -Z, camera looking down -Z at distance 10.
        let plane = world_plane_to_view(Vec4::new(0., 0., -1., 0.), &camera);
        assert!(plane.xyz().abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!((plane.w + 10.).abs() < 1e-5);
    }
}

use std::f32::consts::FRAC_PI_4;

use bevy::{math::Vec4Swizzles, prelude::*, render::camera::CameraProjection};

/// Smallest distance kept between a virtual camera and its oblique clip plane.
pub const OBLIQUE_PLANE_EPSILON: f32 = 1e-3;

/// Camera projection which allows for an oblique near clipping plane, used for rendering portal
/// virtual cameras.
///
/// `matrix` is written every frame by the viewpoint sync; the other fields describe the base
/// (non-oblique) perspective it is derived from.
#[derive(Debug, Component, Clone, Reflect)]
#[reflect(Component)]
pub struct PortalCameraProjection {
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
    pub matrix: Mat4,
}

impl Default for PortalCameraProjection {
    fn default() -> Self {
        PortalCameraProjection::from_perspective(&PerspectiveProjection {
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.1,
            far: 1000.,
        })
    }
}

impl PortalCameraProjection {
    pub fn from_perspective(perspective: &PerspectiveProjection) -> PortalCameraProjection {
        PortalCameraProjection {
            fov: perspective.fov,
            aspect_ratio: perspective.aspect_ratio,
            near: perspective.near,
            far: perspective.far,
            matrix: base_projection(perspective.fov, perspective.aspect_ratio, perspective.near),
        }
    }
}

impl CameraProjection for PortalCameraProjection {
    fn get_projection_matrix(&self) -> Mat4 {
        self.matrix
    }

    fn update(&mut self, width: f32, height: f32) {
        self.aspect_ratio = width / height;
    }

    fn far(&self) -> f32 {
        self.far
    }
}

/// Same perspective Bevy uses for its own cameras: infinite far plane, reversed depth.
pub fn base_projection(fov: f32, aspect_ratio: f32, near: f32) -> Mat4 {
    Mat4::perspective_infinite_reverse_rh(fov, aspect_ratio, near)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObliqueProjection {
    pub matrix: Mat4,
    /// Set when the clip plane had to be clamped or dropped.
    pub degenerate: bool,
}

/// Replace the near plane of `base` with `clip_plane`.
///
/// `clip_plane` is in view space, with the visible half-space on its positive side. The camera
/// must lie on the negative side; when it doesn't, the plane is moved to
/// [`OBLIQUE_PLANE_EPSILON`] behind the camera and the result is flagged degenerate.
///
/// Math taken from https://www.terathon.com/lengyel/Lengyel-Oblique.pdf, adapted to reversed
/// depth: the near plane is `row4 - row3`, so row 3 becomes `row4 - a * C` and `a` is chosen to
/// keep the far corner of the frustum opposite to the plane on the far plane.
pub fn oblique_projection(base: Mat4, clip_plane: Vec4) -> ObliqueProjection {
    let length = clip_plane.xyz().length();
    if !clip_plane.is_finite() || length <= f32::EPSILON {
        return ObliqueProjection {
            matrix: base,
            degenerate: true,
        };
    }

    let mut c = clip_plane / length;
    let mut degenerate = false;
    if c.w > -OBLIQUE_PLANE_EPSILON {
        c.w = -OBLIQUE_PLANE_EPSILON;
        degenerate = true;
    }

    let m4 = base.row(3);
    let q = base.inverse() * Vec4::new(c.x.signum(), c.y.signum(), 0., 1.);
    let denominator = c.dot(q);
    if denominator <= f32::EPSILON {
        return ObliqueProjection {
            matrix: base,
            degenerate: true,
        };
    }
    let a = m4.dot(q) / denominator;
    let new_m3 = m4 - a * c;

    let mut oblique = base;
    oblique.x_axis.z = new_m3.x;
    oblique.y_axis.z = new_m3.y;
    oblique.z_axis.z = new_m3.z;
    oblique.w_axis.z = new_m3.w;
    ObliqueProjection {
        matrix: oblique,
        degenerate,
    }
}

/// Parameters for linearizing depth under `projection`, oblique or not.
///
/// With `p = (x, y, z, w)` the returned vector, a fragment at NDC `(u, v)` with depth `d` lies at
/// view distance `w / (d + z - x * u - y * v)`.
pub fn inverse_projection_params(projection: &Mat4) -> Vec4 {
    Vec4::new(
        projection.x_axis.z / projection.x_axis.x,
        projection.y_axis.z / projection.y_axis.y,
        projection.z_axis.z,
        projection.w_axis.z,
    )
}

#[cfg(test)]
mod tests {
    use bevy::math::Vec3Swizzles;

    use super::*;

    fn base() -> Mat4 {
        base_projection(FRAC_PI_4, 16. / 9., 0.1)
    }

    fn ndc(projection: &Mat4, point: Vec3) -> Vec3 {
        let clip = *projection * point.extend(1.);
        clip.xyz() / clip.w
    }

    #[test]
    fn actual_near_plane_keeps_the_base_projection() {
        let near_plane = Vec4::new(0., 0., -1., -0.1);
        let oblique = oblique_projection(base(), near_plane);
        assert!(!oblique.degenerate);
        assert!(oblique.matrix.abs_diff_eq(base(), 1e-5));
    }

    #[test]
    fn points_on_the_plane_land_on_the_near_plane() {
        let plane = Vec4::new(0., 0.3, -1., -2.);
        let oblique = oblique_projection(base(), plane);
        assert!(!oblique.degenerate);

        let on_plane = Vec3::new(0., 0., -2.);
        assert!((ndc(&oblique.matrix, on_plane).z - 1.).abs() < 1e-5);

        let beyond = ndc(&oblique.matrix, Vec3::new(0., 0., -4.)).z;
        assert!(beyond > 0. && beyond < 1.);

        let between = ndc(&oblique.matrix, Vec3::new(0., 0., -1.)).z;
        assert!(between > 1.);
    }

    #[test]
    fn oblique_plane_keeps_screen_coordinates() {
        let oblique = oblique_projection(base(), Vec4::new(0.2, -0.4, -1., -3.));
        let point = Vec3::new(1.5, -0.7, -12.);
        let a = ndc(&base(), point);
        let b = ndc(&oblique.matrix, point);
        assert!(a.xy().abs_diff_eq(b.xy(), 1e-5));
    }

    #[test]
    fn plane_behind_the_camera_is_clamped() {
        // Camera on the visible side of the plane.
        let oblique = oblique_projection(base(), Vec4::new(0., 0., -1., 5.));
        assert!(oblique.degenerate);
        assert!(oblique.matrix.is_finite());

        let flat = oblique_projection(base(), Vec4::new(0., 0., 0., -1.));
        assert!(flat.degenerate);
        assert_eq!(flat.matrix, base());
    }

    #[test]
    fn depth_params_linearize_depth() {
        for plane in [Vec4::new(0., 0., -1., -0.1), Vec4::new(0.3, 0.1, -1., -4.)] {
            let projection = oblique_projection(base(), plane).matrix;
            let params = inverse_projection_params(&projection);
            for point in [Vec3::new(0.5, 0.25, -9.), Vec3::new(-2., 1., -30.)] {
                let p = ndc(&projection, point);
                let distance = params.w / (p.z + params.z - params.x * p.x - params.y * p.y);
                assert!(
                    (distance + point.z).abs() < 1e-2,
                    "expected {} got {}",
                    -point.z,
                    distance
                );
            }
        }
    }

    #[test]
    fn update_tracks_aspect_ratio() {
        let mut projection = PortalCameraProjection::default();
        projection.update(800., 400.);
        assert_eq!(projection.aspect_ratio, 2.);
        assert_eq!(projection.far(), 1000.);
    }
}

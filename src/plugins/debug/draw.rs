use bevy::{math::Vec4Swizzles, prelude::*};
use bevy_prototype_debug_lines::DebugLines;

/// Length of the drawn frustum edges past the near plane. The far plane of portal projections is
/// at infinity.
const EDGE_LENGTH: f32 = 5.;

/// Corners of the near plane of `projection` seen from a camera at `camera`, in world space.
/// The near plane of an oblique projection is the portal clip plane.
pub fn near_plane_corners(camera: &Mat4, projection: &Mat4) -> [Vec3; 4] {
    let inverse_view_projection = (*projection * camera.inverse()).inverse();
    [
        Vec4::new(-1., -1., 1., 1.),
        Vec4::new(1., -1., 1., 1.),
        Vec4::new(1., 1., 1., 1.),
        Vec4::new(-1., 1., 1., 1.),
    ]
    .map(|ndc| {
        let world = inverse_view_projection * ndc;
        world.xyz() / world.w
    })
}

pub fn draw_camera_frustum(camera: &Mat4, projection: &Mat4, lines: &mut DebugLines) {
    const NEAR_COLOR: Color = Color::BLACK;
    const FAR_COLOR: Color = Color::WHITE;

    let origin = camera.w_axis.xyz();
    let near = near_plane_corners(camera, projection);
    for (i, corner) in near.iter().enumerate() {
        // Near plane
        lines.line_colored(*corner, near[(i + 1) % 4], 0., NEAR_COLOR);
        // Depth lines
        let direction = (*corner - origin).normalize_or_zero();
        lines.line_gradient(*corner, *corner + direction * EDGE_LENGTH, 0., NEAR_COLOR, FAR_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::portal::camera_projection::{base_projection, oblique_projection};

    #[test]
    fn near_corners_lie_on_the_clip_plane() {
        let camera = Mat4::from_translation(Vec3::new(0., 1., 5.));
        // Plane z = 2 in view space, i.e. world z = 3, facing away from the camera.
        let plane = Vec4::new(0., 0., -1., -2.);
        let projection = oblique_projection(base_projection(0.8, 1.5, 0.1), plane).matrix;
        for corner in near_plane_corners(&camera, &projection) {
            assert!((corner.z - 3.).abs() < 1e-3, "corner {:?} off the plane", corner);
        }
    }
}

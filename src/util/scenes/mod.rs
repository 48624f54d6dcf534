use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::plugins::{physics::*, portal::OwningScene, portal::SceneId};

/// Setup a test room in a square flat arena format of specified size, owned by `scene`.
/// 5 cubes for the walls and floor, plus a ceiling, with physics colliders.
pub fn make_test_arena(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
    length: f32,
    height: f32,
    scene: SceneId,
) -> Entity {
    const WALL_THICKNESS: f32 = 1.;

    let walls_materials = [
        materials.add(StandardMaterial::from(Color::rgb(0.55, 0.2, 0.2))),
        materials.add(StandardMaterial::from(Color::rgb(0.2, 0.5, 0.25))),
        materials.add(StandardMaterial::from(Color::rgb(0.2, 0.3, 0.6))),
        materials.add(StandardMaterial::from(Color::ANTIQUE_WHITE)),
    ];
    let ground_material = materials.add(StandardMaterial::from(Color::DARK_GRAY));

    let half_len = length / 2.;
    let wall_mesh = meshes.add(
        shape::Box::new(length, height, WALL_THICKNESS).into(),
    );
    let slab_mesh = meshes.add(
        shape::Box::new(length * 1.1, WALL_THICKNESS, length * 1.1).into(),
    );
    let slab_collider = Collider::cuboid(half_len * 1.1, WALL_THICKNESS / 2., half_len * 1.1);

    let mut ground = commands.spawn(PbrBundle {
        mesh: slab_mesh.clone(),
        material: ground_material.clone(),
        transform: Transform::from_xyz(0., -WALL_THICKNESS / 2., 0.),
        ..default()
    });
    ground.insert((
        Name::from("Ground"),
        OwningScene(scene),
        RigidBody::Fixed,
        slab_collider.clone(),
        CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
    ));

    ground.with_children(|parent| {
        for (i, mat) in walls_materials.into_iter().enumerate() {
            let mut transform = Transform::from_xyz(
                0.,
                (height + WALL_THICKNESS) / 2.,
                -(half_len + WALL_THICKNESS / 2.),
            );
            transform.rotate_around(Vec3::ZERO, Quat::from_rotation_y(i as f32 * FRAC_PI_2));
            parent.spawn((
                PbrBundle {
                    mesh: wall_mesh.clone(),
                    material: mat,
                    transform,
                    ..default()
                },
                Name::from(format!("Wall_{}", i)),
                RigidBody::Fixed,
                Collider::cuboid(half_len, height / 2., WALL_THICKNESS / 2.),
                CollisionGroups::new(WALLS_GROUP, ALL_GROUPS),
            ));
        }
        parent.spawn((
            PbrBundle {
                mesh: slab_mesh,
                material: ground_material,
                transform: Transform::from_translation(Vec3::Y * (height + WALL_THICKNESS)),
                ..default()
            },
            Name::from("Ceiling"),
            RigidBody::Fixed,
            slab_collider,
            CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
        ));
    });
    ground.id()
}

/// Two posts and a lintel around a portal surface of `half_size` placed at `surface`. The frame
/// belongs to the walls group, so bodies inside the portal volume pass through it.
pub fn spawn_doorway(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    material: Handle<StandardMaterial>,
    surface: Transform,
    half_size: Vec2,
) -> Entity {
    const POST_WIDTH: f32 = 0.2;
    const DEPTH: f32 = 0.2;

    let post_mesh = meshes.add(shape::Box::new(POST_WIDTH, half_size.y * 2., DEPTH).into());
    let lintel_width = half_size.x * 2. + POST_WIDTH * 2.;
    let lintel_mesh = meshes.add(shape::Box::new(lintel_width, POST_WIDTH, DEPTH).into());
    let pieces = [
        (
            post_mesh.clone(),
            Vec3::new(-(half_size.x + POST_WIDTH / 2.), 0., 0.),
            Vec3::new(POST_WIDTH, half_size.y * 2., DEPTH) / 2.,
        ),
        (
            post_mesh,
            Vec3::new(half_size.x + POST_WIDTH / 2., 0., 0.),
            Vec3::new(POST_WIDTH, half_size.y * 2., DEPTH) / 2.,
        ),
        (
            lintel_mesh,
            Vec3::new(0., half_size.y + POST_WIDTH / 2., 0.),
            Vec3::new(lintel_width, POST_WIDTH, DEPTH) / 2.,
        ),
    ];

    commands
        .spawn((SpatialBundle::from(surface), Name::from("Doorway")))
        .with_children(|parent| {
            for (mesh, offset, half_extents) in pieces {
                parent.spawn((
                    PbrBundle {
                        mesh,
                        material: material.clone(),
                        transform: Transform::from_translation(offset),
                        ..default()
                    },
                    RigidBody::Fixed,
                    Collider::cuboid(half_extents.x, half_extents.y, half_extents.z),
                    CollisionGroups::new(WALLS_GROUP, ALL_GROUPS),
                ));
            }
        })
        .id()
}

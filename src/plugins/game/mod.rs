use std::f32::consts::*;

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use iyes_loopless::prelude::*;

use crate::{
    plugins::{
        first_person_controller::{FirstPersonControllerBundle, FirstPersonControllerPlugin},
        input::InputPlugin,
        physics::*,
        portal::*,
    },
    util::scenes::{make_test_arena, spawn_doorway},
};

/// Scene holding the demo arena and its portals.
pub const DEMO_SCENE: SceneId = SceneId(0);

const ARENA_LENGTH: f32 = 240.;
const ARENA_HEIGHT: f32 = 8.;
const SURFACE_HALF_SIZE: Vec2 = Vec2::new(1., 1.25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameState {
    /// The arena is being spawned, its portals are not registered yet.
    Loading,
    Playing,
}

#[derive(Debug)]
/// Main game plugin, responsible for loading the other game plugins and bootstrapping the game.
pub struct GamePlugin;

impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            window: WindowDescriptor {
                title: "Portal Link".to_string(),
                width: 1280.,
                height: 720.,
                ..default()
            },
            ..default()
        }));

        #[cfg(feature = "devel")]
        {
            app.add_plugins(super::debug::DeveloperPlugins);
        }

        app.add_plugin(RapierPhysicsPlugin::<NoUserData>::default())
            .add_plugin(super::physics::PhysicsPlugin)
            .add_plugin(InputPlugin)
            .add_plugin(FirstPersonControllerPlugin)
            .add_plugin(PortalPlugin);

        app.add_loopless_state(GameState::Loading)
            .add_startup_system(setup)
            .add_system(finish_loading.run_in_state(GameState::Loading))
            .add_enter_system(GameState::Playing, announce_scene_ready)
            .add_system(relaunch_prop.run_in_state(GameState::Playing))
            .add_system(log_teleports);
    }
}

/// Ball kept bouncing through channel 7.
#[derive(Debug, Component)]
pub struct DemoProp {
    /// Where the prop is thrown from and towards.
    pub launch_from: Vec3,
    pub target: Vec3,
}

fn endpoint(id: u64, channel: u32, position: Vec3, yaw: f32) -> PortalEndpoint {
    PortalEndpoint {
        id: EndpointId(id),
        channel: ChannelId(channel),
        transform: RigidTransform::new(position, Quat::from_rotation_y(yaw)),
        ..default()
    }
}

/// Perform game initialization
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut surface_materials: ResMut<Assets<PortalSurfaceMaterial>>,
    settings: Res<PortalSettings>,
) {
    make_test_arena(
        &mut commands,
        &mut meshes,
        &mut materials,
        ARENA_LENGTH,
        ARENA_HEIGHT,
        DEMO_SCENE,
    );

    // Light
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            color: Color::ANTIQUE_WHITE,
            illuminance: 20_000.,
            shadows_enabled: true,
            ..default()
        },
        transform: Transform {
            translation: Vec3::Y * 5.,
            rotation: Quat::from_euler(EulerRot::YXZ, FRAC_PI_4, -FRAC_PI_4, 0.),
            scale: Vec3::ONE,
        },
        ..default()
    });

    let surface_mesh = meshes.add(
        shape::Quad {
            size: SURFACE_HALF_SIZE * 2.,
            flip: false,
        }
        .into(),
    );
    let frame_material = materials.add(StandardMaterial::from(Color::DARK_GRAY));
    let closed_color = settings.shared_style().edge_color;

    // Channel 7: A faces +Z at the origin, B faces -X a hundred units away.
    // Channel 3: freestanding doorways at different heights and yaws.
    let endpoints = [
        endpoint(1, 7, Vec3::new(0., SURFACE_HALF_SIZE.y, 0.), PI),
        endpoint(2, 7, Vec3::new(100., SURFACE_HALF_SIZE.y, 0.), FRAC_PI_2),
        endpoint(3, 3, Vec3::new(-30., SURFACE_HALF_SIZE.y, 40.), 0.6),
        PortalEndpoint {
            visual_override_color: Some(Color::LIME_GREEN),
            ..endpoint(4, 3, Vec3::new(40., 3., -50.), -2.1)
        },
    ];
    for endpoint in endpoints {
        let name = format!("Portal {} (channel {})", endpoint.id, endpoint.channel);
        let placement = endpoint.transform;
        commands.spawn((
            PortalSurfaceBundle::new(
                endpoint,
                SURFACE_HALF_SIZE,
                surface_mesh.clone(),
                surface_materials.add(PortalSurfaceMaterial::closed(closed_color)),
            ),
            OwningScene(DEMO_SCENE),
            Name::from(name),
        ));
        spawn_doorway(
            &mut commands,
            &mut meshes,
            frame_material.clone(),
            placement.into(),
            SURFACE_HALF_SIZE,
        );
    }

    // Player, behind A and facing it.
    commands.spawn(FirstPersonControllerBundle {
        spatial: SpatialBundle::from(
            Transform::from_xyz(0., 1., -6.).with_rotation(Quat::from_rotation_y(PI)),
        ),
        ..default()
    });

    let launch_from = Vec3::new(2., 1., -8.);
    commands.spawn((
        PbrBundle {
            mesh: meshes.add(
                shape::UVSphere {
                    radius: 0.3,
                    sectors: 16,
                    stacks: 16,
                }
                .into(),
            ),
            material: materials.add(StandardMaterial::from(Color::ORANGE_RED)),
            transform: Transform::from_translation(launch_from),
            ..default()
        },
        RigidBody::Dynamic,
        Collider::ball(0.3),
        Velocity::zero(),
        Ccd::enabled(),
        CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
        PortalTeleport,
        DemoProp {
            launch_from,
            target: Vec3::new(0., SURFACE_HALF_SIZE.y, 0.),
        },
        Name::from("Prop"),
    ));
}

fn finish_loading(mut commands: Commands, endpoints: Query<&OwningScene, With<PortalEndpoint>>) {
    if endpoints.iter().any(|scene| scene.0 == DEMO_SCENE) {
        info!("Demo arena spawned");
        commands.insert_resource(NextState(GameState::Playing));
    }
}

fn announce_scene_ready(mut ready: EventWriter<SceneContentReady>) {
    ready.send(SceneContentReady(DEMO_SCENE));
}

/// Throw the prop at its target again once it comes to rest.
fn relaunch_prop(mut props: Query<(&DemoProp, &mut Transform, &mut Velocity)>) {
    const REST_SPEED: f32 = 0.05;
    const LAUNCH_SPEED: f32 = 8.;

    for (prop, mut transform, mut velocity) in &mut props {
        if velocity.linvel.length() > REST_SPEED {
            continue;
        }
        transform.translation = prop.launch_from;
        let direction = (prop.target - prop.launch_from).normalize_or_zero();
        velocity.linvel = (direction + Vec3::Y * 0.2) * LAUNCH_SPEED;
        velocity.angvel = Vec3::ZERO;
    }
}

fn log_teleports(mut teleported: EventReader<PortalTeleported>, names: Query<&Name>) {
    for event in teleported.iter() {
        let name = names
            .get(event.body)
            .map_or_else(|_| format!("{:?}", event.body), |name| name.to_string());
        debug!(
            "{} went through channel {} ({} -> {})",
            name, event.channel, event.entered_surface, event.exited_surface
        );
    }
}

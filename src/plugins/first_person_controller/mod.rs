//! First person controller driving the main viewpoint.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use bevy::{prelude::*, reflect::FromReflect, render::camera::Projection};
use bevy_rapier3d::prelude::*;
use euclid::Angle;
use leafwing_input_manager::prelude::*;

use crate::plugins::{
    input::{default_input_map, Actions},
    physics::*,
    portal::{MainViewpointBody, MainViewpointCamera, PortalTeleport},
};

#[derive(Debug)]
/// First person controller plugin, which registers the required systems to use the first person
/// controller also provided by this module.
pub struct FirstPersonControllerPlugin;

impl Plugin for FirstPersonControllerPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<FirstPersonCamera>()
            .register_type::<FirstPersonControllerSpawner>()
            .add_system(spawn_controller.label(FirstPersonLabels::SpawnControllers))
            .add_system(
                process_controller_inputs
                    .label(FirstPersonLabels::ProcessInputs)
                    .after(FirstPersonLabels::SpawnControllers),
            );
    }
}

#[derive(Debug, SystemLabel)]
/// Labels for the first person controller systems.
pub enum FirstPersonLabels {
    SpawnControllers,
    ProcessInputs,
}

#[derive(Debug, Component)]
/// First person controller component.
pub struct FirstPersonController {
    pub phi: Angle<f32>,
    pub camera_anchor: Entity,
}

#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
/// Marker for first person cameras
pub struct FirstPersonCamera;

/// Turned into a full controller, carrying the main viewpoint, on the next update.
#[derive(Debug, Component, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct FirstPersonControllerSpawner;

#[derive(Debug, Bundle, Default)]
pub struct FirstPersonControllerBundle {
    #[bundle]
    pub spatial: SpatialBundle,
    pub spawner: FirstPersonControllerSpawner,
}

const PLAYER_HEIGHT: f32 = 1.8;
const PLAYER_RADIUS: f32 = 0.4;
const EYE_HEIGHT: f32 = 1.25;

/// Physics and portal components carried by the controller's root entity.
fn controller_body() -> impl Bundle {
    (
        RigidBody::Dynamic,
        Collider::capsule_y(PLAYER_HEIGHT / 2. - PLAYER_RADIUS, PLAYER_RADIUS),
        LockedAxes::ROTATION_LOCKED_X | LockedAxes::ROTATION_LOCKED_Z,
        Velocity::default(),
        Ccd::enabled(),
        CollisionGroups::new(PLAYER_GROUP, ALL_GROUPS),
        PortalTeleport,
        MainViewpointBody,
    )
}

fn spawn_controller(
    mut commands: Commands,
    spawners_query: Query<Entity, With<FirstPersonControllerSpawner>>,
) {
    let eye_offset = Vec3::Y * (EYE_HEIGHT - PLAYER_HEIGHT / 2.);

    for player in &spawners_query {
        let mut camera_anchor = None;
        commands
            .entity(player)
            .remove::<FirstPersonControllerSpawner>()
            .insert((
                InputManagerBundle {
                    action_state: ActionState::<Actions>::default(),
                    input_map: default_input_map(),
                },
                controller_body(),
                Name::from("Player"),
            ))
            .with_children(|player| {
                let anchor = player
                    .spawn((
                        SpatialBundle::from(Transform::from_translation(eye_offset)),
                        Name::from("Camera anchor"),
                    ))
                    .with_children(|anchor| {
                        anchor.spawn((
                            Camera3dBundle {
                                projection: Projection::Perspective(PerspectiveProjection {
                                    fov: FRAC_PI_4,
                                    near: 0.1,
                                    far: 1000.,
                                    ..default()
                                }),
                                ..default()
                            },
                            Name::from("Player camera"),
                            FirstPersonCamera,
                            MainViewpointCamera,
                        ));
                    })
                    .id();
                camera_anchor = Some(anchor);
            });

        if let Some(camera_anchor) = camera_anchor {
            commands.entity(player).insert(FirstPersonController {
                phi: Angle::zero(),
                camera_anchor,
            });
        }
    }
}

const PLAYER_SPEED: f32 = 3.;
const JUMP_SPEED: f32 = 4.;
const MOUSE_SENSITIVITY: f32 = 0.004;
const MOUSE_ANGVEL_MULTIPLIER: f32 = -75.;
const SPRINT_MULTIPLIER: f32 = 2.;

/// Horizontal velocity requested by the movement actions, in the body's frame.
fn movement_input(forward: bool, backwards: bool, left: bool, right: bool, sprint: bool) -> Vec2 {
    let axis = |positive: bool, negative: bool| match (positive, negative) {
        (true, false) => 1.,
        (false, true) => -1.,
        _ => 0.,
    };
    let k = if sprint { SPRINT_MULTIPLIER } else { 1. };
    Vec2::new(axis(right, left), axis(forward, backwards)) * PLAYER_SPEED * k
}

fn process_controller_inputs(
    mut player_query: Query<(
        Entity,
        &ActionState<Actions>,
        &mut FirstPersonController,
        &mut Velocity,
        &Transform,
    )>,
    mut camera_query: Query<&mut Transform, Without<FirstPersonController>>,
    rapier: Res<RapierContext>,
) {
    for (entity, input_state, mut controller, mut velocity, transform) in &mut player_query {
        let input = movement_input(
            input_state.pressed(Actions::Forward),
            input_state.pressed(Actions::Backwards),
            input_state.pressed(Actions::StrafeLeft),
            input_state.pressed(Actions::StrafeRight),
            input_state.pressed(Actions::Sprint),
        );
        let planar = transform.forward() * input.y + transform.right() * input.x;
        velocity.linvel.x = planar.x;
        velocity.linvel.z = planar.z;

        // Vertical velocity is left to gravity, except for jumps off the ground.
        let grounded = rapier
            .cast_ray(
                transform.translation,
                Vec3::NEG_Y,
                PLAYER_HEIGHT / 2. + 0.1,
                true,
                QueryFilter::only_fixed()
                    .exclude_sensors()
                    .exclude_rigid_body(entity),
            )
            .is_some();
        if grounded && input_state.just_pressed(Actions::Jump) {
            velocity.linvel.y = JUMP_SPEED;
        }

        // Yaw goes through the body's angular velocity so portal crossings rotate it along.
        // Pitch stays on the camera anchor, the root is kept upright.
        if let Some(mouse_movement) = input_state.axis_pair(Actions::Aim) {
            controller.phi += Angle::radians(mouse_movement.y() * MOUSE_SENSITIVITY);
            controller.phi.radians = controller.phi.radians.clamp(-FRAC_PI_2, FRAC_PI_2);

            let v_rotation = Quat::from_axis_angle(Vec3::X, -controller.phi.radians);
            velocity.angvel.y = mouse_movement.x() * MOUSE_SENSITIVITY * MOUSE_ANGVEL_MULTIPLIER;

            if let Ok(mut camera_transform) = camera_query.get_mut(controller.camera_anchor) {
                camera_transform.rotation = v_rotation;
            }
        } else {
            velocity.angvel.y = 0.;
        }
    }
}

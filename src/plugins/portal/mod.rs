//! Linked portal surfaces: each endpoint renders what lies beyond its paired endpoint, and bodies
//! crossing one endpoint come out of the other.

use bevy::{
    core_pipeline::clear_color::ClearColorConfig,
    prelude::*,
    reflect::FromReflect,
    render::{
        camera::{CameraProjectionPlugin, CameraUpdateSystem, Projection},
        view::{update_frusta, RenderLayers, VisibilitySystems},
    },
    transform::TransformSystem,
    utils::HashSet,
    window::{WindowId, WindowResized},
};
use bevy_rapier3d::prelude::*;

pub mod camera_projection;
pub mod endpoint;
pub mod error;
pub mod framebuffer;
pub mod gate;
pub mod geometry;
pub mod material;
pub mod registry;
pub mod settings;
pub mod viewpoint;

pub use camera_projection::PortalCameraProjection;
pub use endpoint::*;
pub use error::PortalError;
pub use geometry::RigidTransform;
pub use material::PortalSurfaceMaterial;
pub use registry::{ChannelPair, ChannelRegistry, PortalTeleported, Registration};
pub use settings::PortalSettings;
pub use viewpoint::{MainViewpointStyle, ViewpointStyle};

use gate::BodyState;
use viewpoint::{LeewayRamp, MainViewpoint};

use super::physics::*;

#[derive(Debug)]
pub struct PortalPlugin;

#[derive(Debug, SystemLabel)]
pub enum PortalLabels {
    TrackScenes,
    UnloadScenes,
    RegisterEndpoints,
    UpdateMainCamera,
    TeleportEntities,
    UnregisterEndpoints,
    SyncPairings,
    SyncPlacements,
    SyncViewpoints,
}

/// Bodies that can go through portals. They need a `Velocity` and `CollisionGroups`.
#[derive(Debug, Component, Clone, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct PortalTeleport;

/// The body carrying the main viewpoint. Its crossings swap the edge style.
#[derive(Debug, Component, Clone, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct MainViewpointBody;

/// The camera the portals are looked at through.
#[derive(Debug, Component, Clone, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct MainViewpointCamera;

/// Camera rendering the virtual viewpoint of `owner`.
#[derive(Debug, Component, Clone, Copy)]
pub struct VirtualCamera {
    pub channel: ChannelId,
    pub owner: EndpointId,
}

/// Physical size of the primary window, which every portal framebuffer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Resource)]
pub struct OutputResolution {
    pub width: u32,
    pub height: u32,
}

impl OutputResolution {
    pub fn aspect_ratio(&self) -> Option<f32> {
        (self.width > 0 && self.height > 0).then(|| self.width as f32 / self.height as f32)
    }
}

impl From<&PortalSettings> for OutputResolution {
    fn from(settings: &PortalSettings) -> Self {
        OutputResolution {
            width: settings.fallback_width,
            height: settings.fallback_height,
        }
    }
}

#[derive(Bundle)]
pub struct PortalSurfaceBundle {
    #[bundle]
    pub mesh_bundle: MaterialMeshBundle<PortalSurfaceMaterial>,
    pub render_layers: RenderLayers,
    pub endpoint: PortalEndpoint,
    pub collider: Collider,
    pub active_events: ActiveEvents,
    pub sensor: Sensor,
    pub collision_groups: CollisionGroups,
}

impl Default for PortalSurfaceBundle {
    fn default() -> Self {
        PortalSurfaceBundle {
            mesh_bundle: MaterialMeshBundle::default(),
            render_layers: RenderLayers::layer(1),
            endpoint: PortalEndpoint::default(),
            collider: Collider::cuboid(1., 1., 0.5),
            active_events: ActiveEvents::COLLISION_EVENTS,
            sensor: Sensor,
            collision_groups: CollisionGroups::new(PORTAL_GROUP, TELEPORTABLE_GROUPS),
        }
    }
}

impl PortalSurfaceBundle {
    /// Surface of `half_size` placed at the endpoint's transform. The trigger volume extends
    /// half a unit past the frame on both sides.
    pub fn new(
        endpoint: PortalEndpoint,
        half_size: Vec2,
        mesh: Handle<Mesh>,
        material: Handle<PortalSurfaceMaterial>,
    ) -> PortalSurfaceBundle {
        PortalSurfaceBundle {
            mesh_bundle: MaterialMeshBundle {
                mesh,
                material,
                transform: endpoint.transform.into(),
                ..default()
            },
            collider: Collider::cuboid(half_size.x, half_size.y, endpoint.frame_depth + 0.5),
            endpoint,
            ..default()
        }
    }
}

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        let settings = app
            .world
            .get_resource::<PortalSettings>()
            .cloned()
            .unwrap_or_default();

        app.add_plugin(MaterialPlugin::<PortalSurfaceMaterial>::default())
            .add_plugin(CameraProjectionPlugin::<PortalCameraProjection>::default())
            .register_type::<PortalEndpoint>()
            .register_type::<RigidTransform>()
            .register_type::<OwningScene>()
            .register_type::<RegisteredEndpoint>()
            .register_type::<RejectedEndpoint>()
            .register_type::<PortalSurfaceMaterial>()
            .register_type::<PortalTeleport>()
            .register_type::<MainViewpointBody>()
            .register_type::<MainViewpointCamera>()
            .register_type::<PortalSettings>()
            .register_type::<MainViewpointStyle>()
            .add_event::<SceneContentReady>()
            .add_event::<SceneUnloading>()
            .add_event::<PortalTeleported>()
            .insert_resource(ChannelRegistry::new(&settings))
            .insert_resource(MainViewpointStyle {
                edge_color: settings.main_edge_color(),
            })
            .insert_resource(OutputResolution::from(&settings))
            .init_resource::<EndpointDirectory>()
            .init_resource::<LoadedScenes>()
            .insert_resource(settings)
            .add_system(track_scene_readiness.label(PortalLabels::TrackScenes))
            .add_system(
                unregister_unloaded_endpoints
                    .label(PortalLabels::UnloadScenes)
                    .after(PortalLabels::TrackScenes),
            )
            .add_system(
                register_ready_endpoints
                    .label(PortalLabels::RegisterEndpoints)
                    .after(PortalLabels::UnloadScenes),
            )
            .add_system(update_main_camera.label(PortalLabels::UpdateMainCamera))
            .add_system(track_output_resolution)
            .add_system(
                run_teleport_gates
                    .label(PortalLabels::TeleportEntities)
                    .after(PortalLabels::RegisterEndpoints),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                unregister_removed_endpoints.label(PortalLabels::UnregisterEndpoints),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                sync_pairings
                    .label(PortalLabels::SyncPairings)
                    .after(PortalLabels::UnregisterEndpoints),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                sync_endpoint_placements
                    .label(PortalLabels::SyncPlacements)
                    .after(TransformSystem::TransformPropagate),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                update_virtual_viewpoints
                    .label(PortalLabels::SyncViewpoints)
                    .after(PortalLabels::SyncPlacements)
                    .after(PortalLabels::SyncPairings)
                    .before(CameraUpdateSystem),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                update_frusta::<PortalCameraProjection>
                    .after(PortalLabels::SyncViewpoints)
                    .after(TransformSystem::TransformPropagate)
                    .before(VisibilitySystems::CheckVisibility),
            );
    }
}

fn track_scene_readiness(
    mut ready_events: EventReader<SceneContentReady>,
    mut unloading_events: EventReader<SceneUnloading>,
    mut scenes: ResMut<LoadedScenes>,
) {
    for SceneContentReady(scene) in ready_events.iter() {
        if scenes.mark_ready(*scene) {
            debug!("Scene {:?} is ready, registering its portals", scene);
        }
    }
    for SceneUnloading(scene) in unloading_events.iter() {
        if scenes.unload(*scene) {
            debug!("Scene {:?} is unloading, unregistering its portals", scene);
        }
    }
}

/// Drop the registration of `entity`, if any, and close its surface.
fn release_endpoint(
    entity: Entity,
    registry: &mut ChannelRegistry,
    directory: &mut EndpointDirectory,
    surface: Option<&Handle<PortalSurfaceMaterial>>,
    materials: &mut Assets<PortalSurfaceMaterial>,
) {
    if let Some(material) = surface.and_then(|handle| materials.get_mut(handle)) {
        material.close();
    }
    if let Some((channel, id)) = directory.remove_entity(entity) {
        if !registry.unregister(channel, id) {
            error!(
                "Portal endpoint {} was in the directory but not on channel {}",
                id, channel
            );
            debug_assert!(false, "endpoint directory out of sync with the registry");
        }
    }
}

/// Unregister endpoints of scenes that are no longer ready. They register again with the scene.
fn unregister_unloaded_endpoints(
    mut commands: Commands,
    scenes: Res<LoadedScenes>,
    mut registry: ResMut<ChannelRegistry>,
    mut directory: ResMut<EndpointDirectory>,
    endpoints: Query<
        (Entity, &OwningScene, Option<&Handle<PortalSurfaceMaterial>>),
        With<RegisteredEndpoint>,
    >,
    mut materials: ResMut<Assets<PortalSurfaceMaterial>>,
) {
    if !scenes.is_changed() {
        return;
    }
    for (entity, scene, surface) in &endpoints {
        if scenes.is_ready(Some(scene.0)) {
            continue;
        }
        release_endpoint(entity, &mut registry, &mut directory, surface, &mut materials);
        commands.entity(entity).remove::<RegisteredEndpoint>();
    }
}

/// Register endpoints whose scene is ready. Refused endpoints are marked and never retried.
fn register_ready_endpoints(
    mut commands: Commands,
    mut registry: ResMut<ChannelRegistry>,
    mut directory: ResMut<EndpointDirectory>,
    scenes: Res<LoadedScenes>,
    endpoints: Query<
        (Entity, &PortalEndpoint, Option<&OwningScene>),
        (Without<RegisteredEndpoint>, Without<RejectedEndpoint>),
    >,
) {
    for (entity, endpoint, scene) in &endpoints {
        if !scenes.is_ready(scene.map(|scene| scene.0)) {
            continue;
        }
        match registry.register(endpoint) {
            Ok(registration) => {
                debug!(
                    "Registered portal endpoint {} ({:?}) on channel {}: {:?}",
                    endpoint.id, entity, endpoint.channel, registration
                );
                directory.insert(entity, endpoint.channel, endpoint.id);
                commands.entity(entity).insert(RegisteredEndpoint);
            }
            Err(err) => {
                warn!("Disabling portal endpoint {:?}: {}", entity, err);
                commands.entity(entity).insert(RejectedEndpoint);
            }
        }
    }
}

/// Unregister endpoints whose component went away. Entities that are still alive lose their
/// registration markers and their surface closes, so the endpoint registers again if it comes
/// back.
fn unregister_removed_endpoints(
    mut commands: Commands,
    removed: RemovedComponents<PortalEndpoint>,
    mut registry: ResMut<ChannelRegistry>,
    mut directory: ResMut<EndpointDirectory>,
    surfaces: Query<&Handle<PortalSurfaceMaterial>>,
    mut materials: ResMut<Assets<PortalSurfaceMaterial>>,
) {
    for entity in removed.iter() {
        if let Some(mut endpoint) = commands.get_entity(entity) {
            endpoint.remove::<(RegisteredEndpoint, RejectedEndpoint)>();
        }
        release_endpoint(
            entity,
            &mut registry,
            &mut directory,
            surfaces.get(entity).ok(),
            &mut materials,
        );
    }
}

/// Spawn virtual cameras for new pairs, despawn those of torn down pairs.
fn sync_pairings(
    mut commands: Commands,
    mut registry: ResMut<ChannelRegistry>,
    directory: Res<EndpointDirectory>,
    surfaces: Query<&Handle<PortalSurfaceMaterial>>,
    mut materials: ResMut<Assets<PortalSurfaceMaterial>>,
) {
    let released: Vec<_> = registry.drain_released().collect();
    for pair in released {
        for camera in pair.viewpoints.iter().filter_map(|viewpoint| viewpoint.camera) {
            if let Some(camera) = commands.get_entity(camera) {
                camera.despawn_recursive();
            }
        }
        for entity in pair.endpoints.iter().filter_map(|id| directory.entity(*id)) {
            if let Some(material) = surfaces
                .get(entity)
                .ok()
                .and_then(|handle| materials.get_mut(handle))
            {
                material.close();
            }
        }
    }

    for pair in registry.pairs_mut() {
        let channel = pair.channel;
        for (index, viewpoint) in pair.viewpoints.iter_mut().enumerate() {
            if viewpoint.camera.is_some() {
                continue;
            }
            let camera = commands
                .spawn(Camera3dBundle {
                    camera: Camera {
                        // Render before the main camera, which samples the result.
                        priority: -1 - 2 * channel.0 as isize - index as isize,
                        is_active: false,
                        ..default()
                    },
                    ..default()
                })
                .remove::<Projection>()
                .insert((
                    PortalCameraProjection::default(),
                    VirtualCamera {
                        channel,
                        owner: viewpoint.owner,
                    },
                    // Portal surfaces live on layer 1 and are not seen by virtual cameras.
                    RenderLayers::layer(0),
                    Name::from(format!("Portal camera {}", viewpoint.owner)),
                ))
                .id();
            viewpoint.camera = Some(camera);
        }
    }
}

/// Let the main camera see portal surfaces.
fn update_main_camera(
    mut commands: Commands,
    cameras: Query<Entity, (With<MainViewpointCamera>, Without<RenderLayers>)>,
) {
    for entity in &cameras {
        info!("Using camera {:?} as the main viewpoint", entity);
        commands
            .entity(entity)
            .insert(RenderLayers::layer(0).with(1));
    }
}

fn track_output_resolution(
    mut resized: EventReader<WindowResized>,
    windows: Res<Windows>,
    mut resolution: ResMut<OutputResolution>,
    mut initialized: Local<bool>,
) {
    let mut update = |window: &Window| {
        let size = OutputResolution {
            width: window.physical_width(),
            height: window.physical_height(),
        };
        if *resolution != size {
            debug!("Portal framebuffers resized to {}x{}", size.width, size.height);
            *resolution = size;
        }
    };

    if !*initialized {
        if let Some(window) = windows.get_primary() {
            update(window);
            *initialized = true;
        }
    }
    for event in resized.iter() {
        if event.id == WindowId::primary() {
            if let Some(window) = windows.get(event.id) {
                update(window);
            }
        }
    }
}

/// Refresh endpoint placements from the propagated transforms.
fn sync_endpoint_placements(
    mut endpoints: Query<(&GlobalTransform, &mut PortalEndpoint), Changed<GlobalTransform>>,
) {
    for (transform, mut endpoint) in &mut endpoints {
        let placement = RigidTransform::from(transform);
        if placement.is_valid() && endpoint.transform != placement {
            endpoint.transform = placement;
        }
    }
}

/// Place the virtual cameras, size their framebuffers and point the surfaces at them.
fn update_virtual_viewpoints(
    mut registry: ResMut<ChannelRegistry>,
    directory: Res<EndpointDirectory>,
    settings: Res<PortalSettings>,
    resolution: Res<OutputResolution>,
    mut images: ResMut<Assets<Image>>,
    mut materials: ResMut<Assets<PortalSurfaceMaterial>>,
    main_camera: Query<(&GlobalTransform, &Projection), With<MainViewpointCamera>>,
    endpoints: Query<(&PortalEndpoint, Option<&Handle<PortalSurfaceMaterial>>)>,
    mut cameras: Query<
        (
            &mut Transform,
            &mut GlobalTransform,
            &mut Camera,
            &mut Camera3d,
            &mut PortalCameraProjection,
        ),
        (With<VirtualCamera>, Without<MainViewpointCamera>),
    >,
) {
    let main = match main_camera.get_single() {
        Ok((transform, Projection::Perspective(perspective))) => {
            let mut main = MainViewpoint::new(transform, perspective);
            if let Some(aspect_ratio) = resolution.aspect_ratio() {
                main.aspect_ratio = aspect_ratio;
            }
            main
        }
        _ => {
            // Nothing to look through.
            for (_, _, mut camera, _, _) in &mut cameras {
                if camera.is_active {
                    camera.is_active = false;
                }
            }
            return;
        }
    };
    let leeway = LeewayRamp::from(&*settings);

    for pair in registry.pairs_mut() {
        let lookup = |id: EndpointId| {
            directory
                .entity(id)
                .and_then(|entity| endpoints.get(entity).ok())
        };
        let (a, b) = match (lookup(pair.endpoints[0]), lookup(pair.endpoints[1])) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                error!("Channel {} is paired with a missing endpoint", pair.channel);
                debug_assert!(false, "paired endpoint missing from the world");
                continue;
            }
        };
        pair.update_viewpoints(&main, [a.0, b.0], &leeway);

        for (index, surface) in [a.1, b.1].into_iter().enumerate() {
            let framebuffer = &mut pair.framebuffers[index];
            if framebuffer.ensure_size(resolution.width, resolution.height, &mut *images) {
                debug!(
                    "Allocated {}x{} framebuffer for portal endpoint {}",
                    resolution.width, resolution.height, pair.endpoints[index]
                );
            }
            let viewpoint = &pair.viewpoints[index];

            let camera = match viewpoint.camera {
                Some(camera) => cameras.get_mut(camera).ok(),
                None => None,
            };
            if let Some((mut transform, mut global, mut camera, mut camera_3d, mut projection)) =
                camera
            {
                *transform = viewpoint.pose.into();
                // Propagation already ran this frame.
                *global = GlobalTransform::from(*transform);

                projection.fov = main.fov;
                projection.aspect_ratio = main.aspect_ratio;
                projection.near = main.near;
                projection.far = main.far;
                projection.matrix = viewpoint.projection;

                match framebuffer.bind() {
                    Some(target) => {
                        if camera.target != target {
                            camera.target = target;
                        }
                        camera.is_active = true;
                    }
                    None => camera.is_active = false,
                }
                camera_3d.clear_color = match viewpoint.style.clear_color {
                    Some(color) => ClearColorConfig::Custom(color),
                    None => ClearColorConfig::Default,
                };
            }

            let texture = framebuffer.as_texture();
            if let Some(handle) = surface {
                let stale = materials
                    .get(handle)
                    .map_or(false, |material| !material.shows(viewpoint, &texture));
                if stale {
                    if let Some(material) = materials.get_mut(handle) {
                        material.show(viewpoint, texture);
                    }
                }
            }
        }
    }
}

/// Feed trigger volume events to the gates, tick every tracked body and teleport the ones that
/// crossed.
fn run_teleport_gates(
    mut collisions: EventReader<CollisionEvent>,
    mut registry: ResMut<ChannelRegistry>,
    directory: Res<EndpointDirectory>,
    endpoints: Query<&PortalEndpoint, With<RegisteredEndpoint>>,
    mut bodies: Query<
        (
            &mut Transform,
            &mut Velocity,
            &mut CollisionGroups,
            Option<&MainViewpointBody>,
        ),
        With<PortalTeleport>,
    >,
    mut main_style: ResMut<MainViewpointStyle>,
    mut teleported: EventWriter<PortalTeleported>,
    mut passing: Local<HashSet<Entity>>,
    time: Res<Time>,
) {
    let lookup = |id: EndpointId| {
        directory
            .entity(id)
            .and_then(|entity| endpoints.get(entity).ok())
    };
    let body_state = |transform: &Transform, velocity: &Velocity| BodyState {
        position: transform.translation,
        orientation: transform.rotation,
        linear_velocity: velocity.linvel,
        angular_velocity: velocity.angvel,
    };
    let mut crossings = Vec::new();

    for collision in collisions.iter() {
        let (first, second, started) = match collision {
            CollisionEvent::Started(first, second, _) => (*first, *second, true),
            CollisionEvent::Stopped(first, second, _) => (*first, *second, false),
        };
        let (surface, body) = if directory.endpoint(first).is_some() {
            (first, second)
        } else if directory.endpoint(second).is_some() {
            (second, first)
        } else {
            continue;
        };
        let (channel, id) = match directory.endpoint(surface) {
            Some(endpoint) => endpoint,
            None => continue,
        };
        let (pair, endpoint) = match (registry.pair_mut(channel), lookup(id)) {
            (Some(pair), Some(endpoint)) => (pair, endpoint),
            // Unpaired gates do nothing.
            _ => continue,
        };
        let index = match pair.index_of(id) {
            Some(index) => index,
            None => continue,
        };
        let (transform, velocity, mut groups, _) = match bodies.get_mut(body) {
            Ok(body) => body,
            Err(_) => continue,
        };

        if started {
            let entry = transform.translation - velocity.linvel * time.delta_seconds();
            pair.gates[index].enter(body, entry, &endpoint.transform);
            // Let the body through the surface the portal sits on.
            if passing.insert(body) {
                groups.filters.remove(WALLS_GROUP);
            }
        } else if pair.gates[index].exit(body, &body_state(&*transform, &*velocity), &endpoint.transform)
        {
            crossings.push((channel, index, body));
        }
    }

    for pair in registry.pairs_mut() {
        let placements = match (lookup(pair.endpoints[0]), lookup(pair.endpoints[1])) {
            (Some(a), Some(b)) => [a.transform, b.transform],
            _ => continue,
        };
        for index in 0..2 {
            let tracked: Vec<_> = pair.gates[index].tracked_bodies().collect();
            for body in tracked {
                match bodies.get(body) {
                    Ok((transform, velocity, _, _)) => {
                        let state = body_state(transform, velocity);
                        if pair.gates[index].tick(body, &state, &placements[index]) {
                            crossings.push((pair.channel, index, body));
                        }
                    }
                    Err(_) => pair.forget_body(body),
                }
            }
        }
    }

    for (channel, entered, body) in crossings {
        let pair = match registry.pair_mut(channel) {
            Some(pair) => pair,
            None => continue,
        };
        let (a, b) = match (lookup(pair.endpoints[0]), lookup(pair.endpoints[1])) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        let (mut transform, mut velocity, _, main_body) = match bodies.get_mut(body) {
            Ok(body) => body,
            Err(_) => continue,
        };
        let style = if main_body.is_some() {
            Some(&mut *main_style)
        } else {
            None
        };
        let state = body_state(&*transform, &*velocity);
        let (moved, event) = pair.complete_crossing(entered, body, &state, [a, b], style);

        transform.translation = moved.position;
        transform.rotation = moved.orientation;
        velocity.linvel = moved.linear_velocity;
        velocity.angvel = moved.angular_velocity;
        info!(
            "Teleported {:?} from endpoint {} to endpoint {}",
            body, event.entered_surface, event.exited_surface
        );
        teleported.send(event);
    }

    // Bodies out of every gate collide with walls again.
    passing.retain(|body| {
        let inside = registry
            .pairs()
            .any(|pair| pair.gates.iter().any(|gate| gate.is_tracking(*body)));
        if !inside {
            if let Ok((_, _, mut groups, _)) = bodies.get_mut(*body) {
                groups.filters.insert(WALLS_GROUP);
            }
        }
        inside
    });
}

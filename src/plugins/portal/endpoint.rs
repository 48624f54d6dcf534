use std::fmt;

use bevy::{
    prelude::*,
    reflect::FromReflect,
    utils::{HashMap, HashSet},
};

use super::{error::PortalError, geometry::RigidTransform, viewpoint::ViewpointStyle};

/// Stable identifier of a portal surface, unique across scenes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Reflect, FromReflect)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical link identifier. A channel pairs at most two endpoints.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Reflect, FromReflect)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scene a portal surface belongs to. Endpoints carrying one wait for that scene's
/// [`SceneContentReady`] before registering.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Reflect, FromReflect)]
pub struct SceneId(pub u32);

/// One physical portal surface.
///
/// The surface normal is the placement's local forward axis: a body crossing the surface along
/// its normal travels through the portal, and comes out of the paired surface along that one's
/// normal.
#[derive(Debug, Clone, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct PortalEndpoint {
    pub id: EndpointId,
    pub channel: ChannelId,
    /// Live placement of the surface, refreshed from the entity's `GlobalTransform`.
    pub transform: RigidTransform,
    /// Thickness of the portal frame. Used to push the virtual camera back, to offset the clip
    /// plane and to offset bodies coming out of the paired surface.
    pub frame_depth: f32,
    pub uses_shared_visual_style: bool,
    pub visual_override_color: Option<Color>,
}

impl Default for PortalEndpoint {
    fn default() -> Self {
        PortalEndpoint {
            id: EndpointId::default(),
            channel: ChannelId::default(),
            transform: RigidTransform::IDENTITY,
            frame_depth: 0.1,
            uses_shared_visual_style: true,
            visual_override_color: None,
        }
    }
}

impl PortalEndpoint {
    pub fn normal(&self) -> Vec3 {
        self.transform.forward()
    }

    pub fn validate(&self) -> Result<(), PortalError> {
        if !self.transform.is_valid() || !self.frame_depth.is_finite() || self.frame_depth < 0. {
            return Err(PortalError::MissingGeometry(self.id));
        }
        Ok(())
    }

    /// Visual parameters the virtual viewpoint of this endpoint applies. The override color wins
    /// over the shared style.
    pub fn viewpoint_style(&self, shared: &ViewpointStyle) -> ViewpointStyle {
        let mut style = shared.clone();
        if let Some(color) = self.visual_override_color {
            style.edge_color = color;
        } else if !self.uses_shared_visual_style {
            style.edge_color = Color::NONE;
        }
        style
    }
}

/// Marker put on endpoints whose registration was refused, so they are not retried each frame.
#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct RejectedEndpoint;

/// Marker put on endpoints the registry accepted.
#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct RegisteredEndpoint;

#[derive(Debug, Default, Clone, Copy, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct OwningScene(pub SceneId);

/// Sent by the scene loader once a scene's content is fully spawned.
#[derive(Debug, Clone, Copy)]
pub struct SceneContentReady(pub SceneId);

/// Sent by the scene loader before a scene's content goes away. Its endpoints are unregistered
/// until the next [`SceneContentReady`].
#[derive(Debug, Clone, Copy)]
pub struct SceneUnloading(pub SceneId);

/// Scenes whose content is ready. Fed by [`SceneContentReady`] and [`SceneUnloading`] events.
#[derive(Debug, Default, Resource)]
pub struct LoadedScenes {
    scenes: HashSet<SceneId>,
}

impl LoadedScenes {
    pub fn mark_ready(&mut self, scene: SceneId) -> bool {
        self.scenes.insert(scene)
    }

    pub fn unload(&mut self, scene: SceneId) -> bool {
        self.scenes.remove(&scene)
    }

    pub fn is_ready(&self, scene: Option<SceneId>) -> bool {
        scene.map_or(true, |scene| self.scenes.contains(&scene))
    }
}

/// Cross-scene lookup from stable endpoint identifiers to the entities carrying them.
#[derive(Debug, Default, Resource)]
pub struct EndpointDirectory {
    entities: HashMap<EndpointId, Entity>,
    endpoints: HashMap<Entity, (ChannelId, EndpointId)>,
}

impl EndpointDirectory {
    pub fn insert(&mut self, entity: Entity, channel: ChannelId, id: EndpointId) {
        self.entities.insert(id, entity);
        self.endpoints.insert(entity, (channel, id));
    }

    pub fn remove_entity(&mut self, entity: Entity) -> Option<(ChannelId, EndpointId)> {
        let (channel, id) = self.endpoints.remove(&entity)?;
        self.entities.remove(&id);
        Some((channel, id))
    }

    pub fn entity(&self, id: EndpointId) -> Option<Entity> {
        self.entities.get(&id).copied()
    }

    pub fn endpoint(&self, entity: Entity) -> Option<(ChannelId, EndpointId)> {
        self.endpoints.get(&entity).copied()
    }
}

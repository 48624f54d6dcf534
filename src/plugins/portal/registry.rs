use bevy::{prelude::*, utils::HashMap};

use super::{
    endpoint::{ChannelId, EndpointId, PortalEndpoint},
    error::PortalError,
    framebuffer::PortalFramebuffer,
    gate::{teleport_body, BodyState, Side, TeleportGate},
    settings::PortalSettings,
    viewpoint::{LeewayRamp, MainViewpoint, MainViewpointStyle, VirtualViewpoint, ViewpointStyle},
};

/// Sent when a body went through a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalTeleported {
    pub channel: ChannelId,
    pub entered_surface: EndpointId,
    pub exited_surface: EndpointId,
    pub body: Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First endpoint of its channel, nothing to render or teleport to yet.
    AwaitingPair,
    /// Second endpoint: the channel's derived state was just created.
    Paired,
}

#[derive(Debug, Clone)]
struct EndpointSlot {
    id: EndpointId,
    style: ViewpointStyle,
    shares_style: bool,
}

#[derive(Debug, Default)]
struct Channel {
    endpoints: Vec<EndpointSlot>,
    pair: Option<ChannelPair>,
}

/// Everything derived from two linked endpoints. Index `i` of every array belongs to
/// `endpoints[i]` and references `endpoints[1 - i]` as its pair.
#[derive(Debug)]
pub struct ChannelPair {
    pub channel: ChannelId,
    pub endpoints: [EndpointId; 2],
    pub viewpoints: [VirtualViewpoint; 2],
    pub framebuffers: [PortalFramebuffer; 2],
    pub gates: [TeleportGate; 2],
    shares_style: [bool; 2],
    degenerate_warned: bool,
}

impl ChannelPair {
    fn new(
        channel: ChannelId,
        a: &EndpointSlot,
        b: &EndpointSlot,
        crossing_threshold: f32,
    ) -> ChannelPair {
        ChannelPair {
            channel,
            endpoints: [a.id, b.id],
            viewpoints: [
                VirtualViewpoint::new(a.id, b.id, a.style.clone()),
                VirtualViewpoint::new(b.id, a.id, b.style.clone()),
            ],
            framebuffers: default(),
            gates: [
                TeleportGate::new(a.id, b.id, crossing_threshold),
                TeleportGate::new(b.id, a.id, crossing_threshold),
            ],
            shares_style: [a.shares_style, b.shares_style],
            degenerate_warned: false,
        }
    }

    pub fn index_of(&self, id: EndpointId) -> Option<usize> {
        self.endpoints.iter().position(|endpoint| *endpoint == id)
    }

    /// Recompute both virtual viewpoints for this frame. `endpoints` follows the pair's order.
    /// Returns true the first time a degenerate clip plane shows up on this channel.
    pub fn update_viewpoints(
        &mut self,
        main: &MainViewpoint,
        endpoints: [&PortalEndpoint; 2],
        leeway: &LeewayRamp,
    ) -> bool {
        let mut degenerate = false;
        for (i, viewpoint) in self.viewpoints.iter_mut().enumerate() {
            degenerate |= viewpoint.update(main, endpoints[i], endpoints[1 - i], leeway);
        }
        if degenerate && !self.degenerate_warned {
            warn!(
                "Degenerate portal clip plane on channel {}, clamping it to the camera",
                self.channel
            );
            self.degenerate_warned = true;
            return true;
        }
        false
    }

    /// Move a body that crossed the surface of `endpoints[entered]` to the paired surface.
    ///
    /// The exit gate starts tracking the body on the side it comes out of, so it doesn't cross
    /// back on the next tick. When the body carries the main viewpoint, the edge style is
    /// swapped as well.
    pub fn complete_crossing(
        &mut self,
        entered: usize,
        body: Entity,
        state: &BodyState,
        endpoints: [&PortalEndpoint; 2],
        main_style: Option<&mut MainViewpointStyle>,
    ) -> (BodyState, PortalTeleported) {
        let exited = 1 - entered;
        let moved = teleport_body(endpoints[entered], endpoints[exited], state);

        self.gates[entered].forget(body);
        self.gates[exited].track(body, Side::of(&endpoints[exited].transform, moved.position));
        if let Some(main_style) = main_style {
            self.swap_edge_style(entered, main_style);
        }

        let event = PortalTeleported {
            channel: self.channel,
            entered_surface: self.endpoints[entered],
            exited_surface: self.endpoints[exited],
            body,
        };
        (moved, event)
    }

    /// The main viewpoint takes the edge color it saw through the entered portal, viewpoints
    /// using the shared style take the one it left behind.
    pub fn swap_edge_style(&mut self, entered: usize, main_style: &mut MainViewpointStyle) {
        let seen_through = self.viewpoints[entered].style.edge_color;
        let left_behind = std::mem::replace(&mut main_style.edge_color, seen_through);
        for (viewpoint, shared) in self.viewpoints.iter_mut().zip(self.shares_style) {
            if shared {
                viewpoint.style.edge_color = left_behind;
            }
        }
    }

    pub fn forget_body(&mut self, body: Entity) {
        for gate in &mut self.gates {
            gate.forget(body);
        }
    }
}

/// Pairs portal endpoints by channel and owns the state derived from each pair.
#[derive(Debug, Resource)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelId, Channel>,
    released: Vec<ChannelPair>,
    crossing_threshold: f32,
    shared_style: ViewpointStyle,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        ChannelRegistry::new(&PortalSettings::default())
    }
}

impl ChannelRegistry {
    pub fn new(settings: &PortalSettings) -> ChannelRegistry {
        ChannelRegistry {
            channels: HashMap::new(),
            released: Vec::new(),
            crossing_threshold: settings.crossing_threshold,
            shared_style: settings.shared_style(),
        }
    }

    /// Add an endpoint to its channel. The second endpoint of a channel sets up the pair.
    pub fn register(&mut self, endpoint: &PortalEndpoint) -> Result<Registration, PortalError> {
        endpoint.validate()?;
        if self.contains(endpoint.id) {
            return Err(PortalError::AlreadyRegistered(endpoint.id));
        }

        let slot = EndpointSlot {
            id: endpoint.id,
            style: endpoint.viewpoint_style(&self.shared_style),
            shares_style: endpoint.uses_shared_visual_style
                && endpoint.visual_override_color.is_none(),
        };
        let crossing_threshold = self.crossing_threshold;
        let channel = self.channels.entry(endpoint.channel).or_default();
        if channel.endpoints.len() >= 2 {
            return Err(PortalError::ChannelFull {
                channel: endpoint.channel,
                rejected: endpoint.id,
            });
        }

        channel.endpoints.push(slot);
        if let [a, b] = channel.endpoints.as_slice() {
            info!("Linking endpoints {} and {} on channel {}", a.id, b.id, endpoint.channel);
            channel.pair = Some(ChannelPair::new(endpoint.channel, a, b, crossing_threshold));
            Ok(Registration::Paired)
        } else {
            Ok(Registration::AwaitingPair)
        }
    }

    /// Remove an endpoint from its channel, tearing the pair down. Returns whether the endpoint
    /// was registered there.
    pub fn unregister(&mut self, channel_id: ChannelId, endpoint: EndpointId) -> bool {
        let channel = match self.channels.get_mut(&channel_id) {
            Some(channel) => channel,
            None => return false,
        };
        let index = match channel.endpoints.iter().position(|slot| slot.id == endpoint) {
            Some(index) => index,
            None => return false,
        };

        channel.endpoints.remove(index);
        if let Some(pair) = channel.pair.take() {
            info!("Unlinking channel {} after endpoint {} left", channel_id, endpoint);
            self.released.push(pair);
        }
        if channel.endpoints.is_empty() {
            self.channels.remove(&channel_id);
        }
        true
    }

    /// Pairs torn down since the last call, for the render side to release.
    pub fn drain_released(&mut self) -> impl Iterator<Item = ChannelPair> + '_ {
        self.released.drain(..)
    }

    pub fn contains(&self, endpoint: EndpointId) -> bool {
        self.channel_of(endpoint).is_some()
    }

    pub fn channel_of(&self, endpoint: EndpointId) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|(_, channel)| channel.endpoints.iter().any(|slot| slot.id == endpoint))
            .map(|(id, _)| *id)
    }

    /// The endpoint linked to `endpoint`, `None` while its channel waits for a second one.
    pub fn paired_endpoint(&self, endpoint: EndpointId) -> Result<Option<EndpointId>, PortalError> {
        let channel = self
            .channel_of(endpoint)
            .ok_or(PortalError::UnknownEndpoint(endpoint))?;
        Ok(self.pair(channel).and_then(|pair| {
            let index = pair.index_of(endpoint)?;
            Some(pair.endpoints[1 - index])
        }))
    }

    pub fn endpoint_count(&self, channel: ChannelId) -> usize {
        self.channels
            .get(&channel)
            .map_or(0, |channel| channel.endpoints.len())
    }

    pub fn endpoints(&self, channel: ChannelId) -> Vec<EndpointId> {
        self.channels.get(&channel).map_or_else(Vec::new, |channel| {
            channel.endpoints.iter().map(|slot| slot.id).collect()
        })
    }

    pub fn pair(&self, channel: ChannelId) -> Option<&ChannelPair> {
        self.channels.get(&channel)?.pair.as_ref()
    }

    pub fn pair_mut(&mut self, channel: ChannelId) -> Option<&mut ChannelPair> {
        self.channels.get_mut(&channel)?.pair.as_mut()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &ChannelPair> {
        self.channels.values().filter_map(|channel| channel.pair.as_ref())
    }

    pub fn pairs_mut(&mut self) -> impl Iterator<Item = &mut ChannelPair> {
        self.channels
            .values_mut()
            .filter_map(|channel| channel.pair.as_mut())
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }
}

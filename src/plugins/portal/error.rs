use std::fmt;

use super::endpoint::{ChannelId, EndpointId};

/// Errors raised by the portal subsystem. All of them are recoverable at the endpoint or channel
/// level: the offending portal disables itself and the rest keeps running.
#[derive(Debug)]
pub enum PortalError {
    /// The channel already links two endpoints.
    ChannelFull {
        channel: ChannelId,
        rejected: EndpointId,
    },
    AlreadyRegistered(EndpointId),
    /// The endpoint has no usable surface placement or frame depth.
    MissingGeometry(EndpointId),
    UnknownEndpoint(EndpointId),
    InvalidSettings(serde_json::Error),
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalError::ChannelFull { channel, rejected } => write!(
                f,
                "channel {} already links two endpoints, rejecting endpoint {}",
                channel, rejected
            ),
            PortalError::AlreadyRegistered(id) => write!(f, "endpoint {} is already registered", id),
            PortalError::MissingGeometry(id) => {
                write!(f, "endpoint {} has no usable surface placement", id)
            }
            PortalError::UnknownEndpoint(id) => write!(f, "endpoint {} is not registered", id),
            PortalError::InvalidSettings(err) => write!(f, "invalid portal settings: {}", err),
        }
    }
}

impl std::error::Error for PortalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PortalError::InvalidSettings(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::InvalidSettings(err)
    }
}

use bevy::prelude::*;
use serde::Deserialize;

use super::{error::PortalError, viewpoint::ViewpointStyle};

/// Tunables of the portal subsystem. Every field has a default, so a settings file only needs to
/// list what it overrides.
#[derive(Debug, Clone, Resource, Reflect, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    /// Minimum alignment between a body's velocity direction and the surface normal for a side
    /// flip to count as a crossing.
    pub crossing_threshold: f32,
    /// Clip plane leeway reached at `leeway_distance` from the portal.
    pub max_clip_leeway: f32,
    pub leeway_distance: f32,
    /// Edge color applied by virtual viewpoints of endpoints using the shared style.
    pub shared_edge_color: [f32; 4],
    /// Edge color initially active on the main viewpoint.
    pub main_edge_color: [f32; 4],
    /// Framebuffer size used until a window reports its resolution.
    pub fallback_width: u32,
    pub fallback_height: u32,
}

impl Default for PortalSettings {
    fn default() -> Self {
        PortalSettings {
            crossing_threshold: 0.1,
            max_clip_leeway: 1.,
            leeway_distance: 100.,
            shared_edge_color: [0.2, 0.6, 1., 1.],
            main_edge_color: [1., 0.55, 0.1, 1.],
            fallback_width: 1280,
            fallback_height: 720,
        }
    }
}

impl PortalSettings {
    pub fn from_json(json: &str) -> Result<PortalSettings, PortalError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn shared_style(&self) -> ViewpointStyle {
        ViewpointStyle {
            edge_color: color_from_array(self.shared_edge_color),
            clear_color: None,
        }
    }

    pub fn main_edge_color(&self) -> Color {
        color_from_array(self.main_edge_color)
    }
}

fn color_from_array([r, g, b, a]: [f32; 4]) -> Color {
    Color::rgba(r, g, b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let settings = PortalSettings::from_json(r#"{ "crossing_threshold": 0.25 }"#).unwrap();
        assert_eq!(settings.crossing_threshold, 0.25);
        assert_eq!(settings.leeway_distance, 100.);
        assert_eq!(settings.fallback_width, 1280);
    }

    #[test]
    fn malformed_files_are_rejected() {
        let err = PortalSettings::from_json(r#"{ "crossing_threshold": "high" }"#).unwrap_err();
        assert!(matches!(err, PortalError::InvalidSettings(_)));
        assert!(err.to_string().starts_with("invalid portal settings"));
    }

    #[test]
    fn colors_come_from_rgba_arrays() {
        let settings = PortalSettings {
            shared_edge_color: [0., 1., 0., 0.5],
            ..default()
        };
        assert_eq!(settings.shared_style().edge_color, Color::rgba(0., 1., 0., 0.5));
        assert_eq!(settings.shared_style().clear_color, None);
    }
}

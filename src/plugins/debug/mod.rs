pub mod draw;

use bevy::{app::PluginGroupBuilder, prelude::*};
use bevy_prototype_debug_lines::{DebugLines, DebugLinesPlugin};

use super::portal::{PortalCameraProjection, VirtualCamera};

#[derive(Debug)]
/// Development plugins intended for debug builds use.
pub struct DeveloperPlugins;

impl PluginGroup for DeveloperPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::start::<Self>()
            .add(bevy_editor_pls::prelude::EditorPlugin)
            .add(DebugOverlayPlugin)
    }
}

/// Draws every active virtual viewpoint frustum. F3 toggles it.
#[derive(Debug)]
pub struct DebugOverlayPlugin;

#[derive(Debug, Resource)]
pub struct DebugOverlay {
    pub draw_frusta: bool,
}

impl Plugin for DebugOverlayPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(DebugLinesPlugin::default())
            .insert_resource(DebugOverlay { draw_frusta: true })
            .add_system(toggle_overlay)
            .add_system(draw_virtual_frusta);
    }
}

fn toggle_overlay(keys: Res<Input<KeyCode>>, mut overlay: ResMut<DebugOverlay>) {
    if keys.just_pressed(KeyCode::F3) {
        overlay.draw_frusta = !overlay.draw_frusta;
    }
}

fn draw_virtual_frusta(
    overlay: Res<DebugOverlay>,
    cameras: Query<(&GlobalTransform, &PortalCameraProjection, &Camera), With<VirtualCamera>>,
    mut lines: ResMut<DebugLines>,
) {
    if !overlay.draw_frusta {
        return;
    }
    for (transform, projection, camera) in &cameras {
        if camera.is_active {
            draw::draw_camera_frustum(&transform.compute_matrix(), &projection.matrix, &mut lines);
        }
    }
}

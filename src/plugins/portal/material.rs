use bevy::{
    prelude::*,
    reflect::TypeUuid,
    render::render_resource::{AsBindGroup, ShaderRef},
};

use super::viewpoint::VirtualViewpoint;

/// Material of a portal surface: samples the owning viewpoint's framebuffer in screen space, with
/// a rim in the viewpoint's edge color.
#[derive(AsBindGroup, Debug, Clone, TypeUuid, Reflect)]
#[uuid = "6c1d9b3e-52f7-4a0e-9d61-3f2b8e7a4c15"]
pub struct PortalSurfaceMaterial {
    /// Framebuffer of the virtual viewpoint, `None` while the channel is unpaired.
    #[texture(0)]
    #[sampler(1)]
    pub texture: Option<Handle<Image>>,
    #[uniform(2)]
    pub edge_color: Color,
    /// Depth linearization parameters of the virtual viewpoint's projection. The surface shader
    /// doesn't read them: they are bound for shaders that replace it and need view-space depth
    /// behind the surface.
    #[uniform(3)]
    pub depth_params: Vec4,
    /// 1 when `texture` holds a rendered view, 0 otherwise.
    #[uniform(4)]
    pub view_ready: u32,
}

impl Default for PortalSurfaceMaterial {
    fn default() -> Self {
        PortalSurfaceMaterial {
            texture: None,
            edge_color: Color::NONE,
            depth_params: Vec4::ZERO,
            view_ready: 0,
        }
    }
}

impl PortalSurfaceMaterial {
    pub fn closed(edge_color: Color) -> PortalSurfaceMaterial {
        PortalSurfaceMaterial {
            edge_color,
            ..default()
        }
    }

    /// Point the material at this frame's output of `viewpoint`.
    pub fn show(&mut self, viewpoint: &VirtualViewpoint, texture: Option<Handle<Image>>) {
        self.view_ready = texture.is_some() as u32;
        self.texture = texture;
        self.edge_color = viewpoint.style.edge_color;
        self.depth_params = viewpoint.inverse_projection;
    }

    /// Whether the material already shows `viewpoint` through `texture`.
    pub fn shows(&self, viewpoint: &VirtualViewpoint, texture: &Option<Handle<Image>>) -> bool {
        self.texture == *texture
            && self.edge_color == viewpoint.style.edge_color
            && self.depth_params == viewpoint.inverse_projection
    }

    /// Drop the framebuffer once the channel is torn down.
    pub fn close(&mut self) {
        self.texture = None;
        self.view_ready = 0;
        self.depth_params = Vec4::ZERO;
    }

    pub fn is_open(&self) -> bool {
        self.view_ready != 0
    }
}

impl Material for PortalSurfaceMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/portal_surface.wgsl".into()
    }

    fn specialize(
        _pipeline: &bevy::pbr::MaterialPipeline<Self>,
        descriptor: &mut bevy::render::render_resource::RenderPipelineDescriptor,
        _layout: &bevy::render::mesh::MeshVertexBufferLayout,
        _key: bevy::pbr::MaterialPipelineKey<Self>,
    ) -> Result<(), bevy::render::render_resource::SpecializedMeshPipelineError> {
        // Surfaces are visible from both sides.
        descriptor.primitive.cull_mode = None;
        Ok(())
    }
}

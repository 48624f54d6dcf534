use bevy::{
    prelude::*,
    render::{
        camera::RenderTarget,
        render_resource::{
            Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
        },
    },
};

/// Creates the color targets portal framebuffers render into.
pub trait RenderTargetAllocator {
    fn allocate(&mut self, width: u32, height: u32) -> Handle<Image>;
}

impl RenderTargetAllocator for Assets<Image> {
    fn allocate(&mut self, width: u32, height: u32) -> Handle<Image> {
        let size = Extent3d {
            width,
            height,
            ..default()
        };
        let mut image = Image {
            texture_descriptor: TextureDescriptor {
                label: Some("portal_framebuffer"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::Bgra8UnormSrgb,
                usage: TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_DST
                    | TextureUsages::RENDER_ATTACHMENT,
            },
            ..default()
        };
        // Zero-filled storage of the right size.
        image.resize(size);
        self.add(image)
    }
}

/// Off-screen color target of one virtual viewpoint.
///
/// The target is a strong handle: releasing it (or dropping the framebuffer) frees the image
/// once the camera and the surface material let go of their clones.
#[derive(Debug, Default, Clone)]
pub struct PortalFramebuffer {
    width: u32,
    height: u32,
    color_target: Option<Handle<Image>>,
}

impl PortalFramebuffer {
    /// Make sure the color target matches `width`×`height`, recreating it if needed. Returns
    /// whether a new target was allocated. A zero-sized request releases the target.
    pub fn ensure_size<A>(&mut self, width: u32, height: u32, allocator: &mut A) -> bool
    where
        A: RenderTargetAllocator + ?Sized,
    {
        if self.color_target.is_some() && self.width == width && self.height == height {
            return false;
        }
        self.release();
        if width == 0 || height == 0 {
            return false;
        }
        self.color_target = Some(allocator.allocate(width, height));
        self.width = width;
        self.height = height;
        true
    }

    /// Render target for the owning viewpoint's camera, if the color target exists.
    pub fn bind(&self) -> Option<RenderTarget> {
        self.color_target.clone().map(RenderTarget::Image)
    }

    /// Texture for the portal surface material.
    pub fn as_texture(&self) -> Option<Handle<Image>> {
        self.color_target.clone()
    }

    pub fn release(&mut self) -> Option<Handle<Image>> {
        self.width = 0;
        self.height = 0;
        self.color_target.take()
    }

    pub fn size(&self) -> Option<UVec2> {
        self.color_target
            .as_ref()
            .map(|_| UVec2::new(self.width, self.height))
    }

    pub fn is_ready(&self) -> bool {
        self.color_target.is_some()
    }
}

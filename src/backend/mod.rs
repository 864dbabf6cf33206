//! The seam between the scene core and whatever puts pixels on screen.
//!
//! The core only ever talks to a [`RenderBackend`]: it uploads vertex data and
//! textures once, gets opaque handles back, and each tick submits one
//! [`DrawCall`] per geometry buffer between `begin_frame` and `end_frame`.
//! [`crate::context::Context`] implements this on wgpu, [`headless`] records
//! everything in memory.

use cgmath::{Matrix4, SquareMatrix};

use crate::{
    data_structures::geometry::{Material, ModelVertex},
    error::Result,
    math,
};

pub mod headless;

/// Backend-side vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Backend-side texture with its sampler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Decoded RGBA8 pixels ready for upload.
#[derive(Clone, Debug)]
pub struct TextureSource {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Which colour input the fragment stage uses for a draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadingMode {
    VertexColor,
    Material,
    Texture,
}

impl ShadingMode {
    fn as_uniform(self) -> f32 {
        match self {
            ShadingMode::VertexColor => 0.0,
            ShadingMode::Material => 1.0,
            ShadingMode::Texture => 2.0,
        }
    }
}

/// Per-frame uniforms, shared by every draw of a tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameUniforms {
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniformsRaw {
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
}

impl FrameUniforms {
    pub fn identity() -> Self {
        Self {
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
        }
    }

    pub fn to_raw(&self) -> FrameUniformsRaw {
        FrameUniformsRaw {
            view: math::to_columns(self.view),
            projection: math::to_columns(self.projection),
        }
    }
}

/// One triangle-list draw of one geometry buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub buffer: BufferHandle,
    pub vertex_count: u32,
    pub model: Matrix4<f32>,
    pub shading: ShadingMode,
    pub texture: Option<TextureHandle>,
    pub material: Option<Material>,
    pub tint: [f32; 4],
}

/**
 * The per-draw uniform block as the shader sees it.
 *
 * `params` packs shininess, opacity and the shading mode. Padded to 16 byte
 * rows so it can sit in a dynamic-offset uniform buffer.
 */
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniformRaw {
    model: [[f32; 4]; 4],
    tint: [f32; 4],
    ambient: [f32; 4],
    diffuse: [f32; 4],
    specular: [f32; 4],
    params: [f32; 4],
}

impl DrawCall {
    pub fn to_raw(&self) -> DrawUniformRaw {
        let material = self.material.clone().unwrap_or_default();
        let rgb = |c: [f32; 3]| [c[0], c[1], c[2], 1.0];
        DrawUniformRaw {
            model: math::to_columns(self.model),
            tint: self.tint,
            ambient: rgb(material.ambient),
            diffuse: rgb(material.diffuse),
            specular: rgb(material.specular),
            params: [
                material.shininess,
                material.opacity,
                self.shading.as_uniform(),
                0.0,
            ],
        }
    }
}

pub trait RenderBackend {
    fn upload_geometry(&mut self, label: &str, vertices: &[ModelVertex]) -> Result<BufferHandle>;

    /// Frees a vertex buffer. Releasing an unknown handle is logged, not fatal.
    fn release_geometry(&mut self, handle: BufferHandle);

    fn upload_texture(&mut self, source: &TextureSource) -> Result<TextureHandle>;

    fn release_texture(&mut self, handle: TextureHandle);

    fn begin_frame(&mut self, uniforms: &FrameUniforms) -> Result<()>;

    fn draw(&mut self, call: DrawCall) -> Result<()>;

    fn end_frame(&mut self) -> Result<()>;

    /// Drops whatever was recorded since `begin_frame` without presenting.
    fn abort_frame(&mut self);
}

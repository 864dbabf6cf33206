//! GPU textures: the depth target and sampled colour textures.
//!
//! [`Texture`] wraps a wgpu texture with its view and an optional sampler.
//! Colour textures are built from a decoded [`TextureSource`]; when a draw has
//! no texture override the pipeline binds [`Texture::white`] instead so the
//! bind group layout never changes.

use crate::{
    backend::TextureSource,
    error::{Error, Result},
};

#[derive(Debug)]
pub struct Texture {
    #[allow(unused)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: Option<wgpu::Sampler>,
}

impl Texture {
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Depth attachment matching a surface of `size` pixels. Zero sizes are
    /// clamped to one so minimised windows keep a valid target.
    pub fn create_depth_texture(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        let size = wgpu::Extent3d {
            width: size[0].max(1),
            height: size[1].max(1),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            sampler: None,
        }
    }

    /// A 1x1 opaque white texture, bound whenever a draw has no override.
    pub fn white(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let source = TextureSource {
            label: "default white".to_string(),
            width: 1,
            height: 1,
            rgba: vec![255; 4],
        };
        Self::upload(device, queue, &source)
    }

    /// Uploads decoded RGBA8 pixels as an sRGB texture with a repeating
    /// linear sampler.
    pub fn from_source(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &TextureSource,
    ) -> Result<Self> {
        if source.width == 0 || source.height == 0 {
            return Err(Error::Backend(format!("texture {} is empty", source.label)));
        }
        let expected = source.width as usize * source.height as usize * 4;
        if source.rgba.len() != expected {
            return Err(Error::Backend(format!(
                "texture {} has {} bytes, expected {expected}",
                source.label,
                source.rgba.len()
            )));
        }
        Ok(Self::upload(device, queue, source))
    }

    fn upload(device: &wgpu::Device, queue: &wgpu::Queue, source: &TextureSource) -> Self {
        let size = wgpu::Extent3d {
            width: source.width,
            height: source.height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(source.label.as_str()),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            &source.rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * source.width),
                rows_per_image: Some(source.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            sampler: Some(create_default_sampler(device)),
        }
    }

    /// Bind group for the texture slot of the basic pipeline.
    pub fn bind_group(&self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        let fallback;
        let sampler = match &self.sampler {
            Some(sampler) => sampler,
            None => {
                fallback = create_default_sampler(device);
                &fallback
            }
        };
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }
}

pub fn create_default_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}

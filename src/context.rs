//! The wgpu side of rendering.
//!
//! [`Context`] owns the window surface, device and queue together with the one
//! mesh pipeline, and implements [`RenderBackend`] on top of them. Draws of a
//! frame are collected between `begin_frame` and `end_frame`; `end_frame`
//! writes every draw's uniforms into a dynamic-offset buffer and records a
//! single render pass.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context as _;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::{
    backend::{
        BufferHandle, DrawCall, DrawUniformRaw, FrameUniforms, RenderBackend, TextureHandle,
        TextureSource,
    },
    data_structures::{geometry::ModelVertex, texture::Texture},
    error::{Error, Result},
    pipelines::basic::{MeshLayouts, mk_basic_pipeline},
};

/// Room for this many draws before the draw uniform buffer grows.
const INITIAL_DRAW_SLOTS: u64 = 64;

struct GpuTexture {
    #[allow(unused)]
    texture: Texture,
    bind_group: wgpu::BindGroup,
}

struct GpuGeometry {
    buffer: wgpu::Buffer,
    vertex_count: u32,
}

pub struct Context {
    pub(crate) window: Arc<Window>,
    depth_texture: Texture,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    layouts: MeshLayouts,
    pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    draw_slots: u64,
    draw_stride: u64,
    white: GpuTexture,
    geometry: HashMap<BufferHandle, GpuGeometry>,
    textures: HashMap<TextureHandle, GpuTexture>,
    next_id: u64,
    clear_colour: wgpu::Color,
    pending: Option<Vec<DrawCall>>,
}

impl Context {
    pub async fn new(window: Arc<Window>, clear_colour: [f64; 4]) -> anyhow::Result<Self> {
        let size = window.inner_size();

        log::info!("wgpu setup");
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;
        log::info!("using adapter {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("mesh-stage device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                experimental_features: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        // the shader writes linear colour and relies on an sRGB target
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface supports no formats")?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        device.on_uncaptured_error(Arc::new(|e: wgpu::Error| log::error!("wgpu: {e}")));

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let layouts = MeshLayouts::new(&device);
        let pipeline = mk_basic_pipeline(&device, &config, &layouts);
        if let Some(e) = device.pop_error_scope().await {
            let error = anyhow::Error::new(Error::Backend(e.to_string()));
            return Err(error.context("failed to build the mesh pipeline"));
        }

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Uniform Buffer"),
            contents: bytemuck::cast_slice(&[FrameUniforms::identity().to_raw()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &layouts.frame,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
            label: Some("frame_bind_group"),
        });

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let draw_stride = (std::mem::size_of::<DrawUniformRaw>() as u64).div_ceil(alignment) * alignment;
        let (draw_buffer, draw_bind_group) =
            create_draw_buffer(&device, &layouts, INITIAL_DRAW_SLOTS, draw_stride);

        let white = Texture::white(&device, &queue);
        let white = GpuTexture {
            bind_group: white.bind_group(&device, &layouts.texture),
            texture: white,
        };

        let depth_texture =
            Texture::create_depth_texture(&device, [config.width, config.height], "depth_texture");

        Ok(Self {
            window,
            depth_texture,
            surface,
            device,
            queue,
            config,
            layouts,
            pipeline,
            frame_buffer,
            frame_bind_group,
            draw_buffer,
            draw_bind_group,
            draw_slots: INITIAL_DRAW_SLOTS,
            draw_stride,
            white,
            geometry: HashMap::new(),
            textures: HashMap::new(),
            next_id: 0,
            clear_colour: wgpu::Color {
                r: clear_colour[0],
                g: clear_colour[1],
                b: clear_colour[2],
                a: clear_colour[3],
            },
            pending: None,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Reconfigures the surface and depth target. Zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth_texture =
            Texture::create_depth_texture(&self.device, [width, height], "depth_texture");
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_draw_slots(&mut self, needed: u64) {
        if needed <= self.draw_slots {
            return;
        }
        let slots = needed.next_power_of_two();
        log::debug!("growing draw uniforms to {slots} slots");
        let (buffer, bind_group) =
            create_draw_buffer(&self.device, &self.layouts, slots, self.draw_stride);
        self.draw_buffer = buffer;
        self.draw_bind_group = bind_group;
        self.draw_slots = slots;
    }

    fn acquire(&mut self) -> Result<wgpu::SurfaceTexture> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|e| Error::Backend(format!("surface lost: {e}")))
            }
            Err(e) => Err(Error::Backend(format!("could not acquire frame: {e}"))),
        }
    }
}

fn create_draw_buffer(
    device: &wgpu::Device,
    layouts: &MeshLayouts,
    slots: u64,
    stride: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Draw Uniform Buffer"),
        size: slots * stride,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout: &layouts.draw,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniformRaw>() as u64),
            }),
        }],
        label: Some("draw_bind_group"),
    });
    (buffer, bind_group)
}

/// Runs `create` inside a validation error scope. An error wgpu reports for
/// it comes back as [`Error::Backend`] carrying wgpu's message.
pub(crate) fn validated<T>(device: &wgpu::Device, create: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match futures::executor::block_on(device.pop_error_scope()) {
        Some(e) => Err(Error::Backend(e.to_string())),
        None => Ok(value),
    }
}

impl RenderBackend for Context {
    fn upload_geometry(&mut self, label: &str, vertices: &[ModelVertex]) -> Result<BufferHandle> {
        if vertices.is_empty() {
            return Err(Error::Backend(format!("{label} has no vertices")));
        }
        let buffer = validated(&self.device, || {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                })
        })?;
        let handle = BufferHandle(self.next_id());
        self.geometry.insert(
            handle,
            GpuGeometry {
                buffer,
                vertex_count: vertices.len() as u32,
            },
        );
        Ok(handle)
    }

    fn release_geometry(&mut self, handle: BufferHandle) {
        match self.geometry.remove(&handle) {
            Some(geometry) => geometry.buffer.destroy(),
            None => log::warn!("release of unknown vertex buffer {handle:?}"),
        }
    }

    fn upload_texture(&mut self, source: &TextureSource) -> Result<TextureHandle> {
        let (texture, bind_group) = validated(&self.device, || {
            let texture = Texture::from_source(&self.device, &self.queue, source)?;
            let bind_group = texture.bind_group(&self.device, &self.layouts.texture);
            Ok::<_, Error>((texture, bind_group))
        })??;
        let handle = TextureHandle(self.next_id());
        self.textures
            .insert(handle, GpuTexture { texture, bind_group });
        Ok(handle)
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        if self.textures.remove(&handle).is_none() {
            log::warn!("release of unknown texture {handle:?}");
        }
    }

    fn begin_frame(&mut self, uniforms: &FrameUniforms) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::Backend("frame already in progress".to_string()));
        }
        self.queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::cast_slice(&[uniforms.to_raw()]));
        self.pending = Some(Vec::new());
        Ok(())
    }

    fn draw(&mut self, call: DrawCall) -> Result<()> {
        if !self.geometry.contains_key(&call.buffer) {
            return Err(Error::Backend(format!("draw references released buffer {:?}", call.buffer)));
        }
        if let Some(texture) = call.texture {
            if !self.textures.contains_key(&texture) {
                return Err(Error::Backend(format!("draw references released texture {texture:?}")));
            }
        }
        self.pending
            .as_mut()
            .ok_or_else(|| Error::Backend("draw outside of a frame".to_string()))?
            .push(call);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        let draws = self
            .pending
            .take()
            .ok_or_else(|| Error::Backend("end_frame without begin_frame".to_string()))?;

        self.ensure_draw_slots(draws.len() as u64);
        if !draws.is_empty() {
            let stride = self.draw_stride as usize;
            let mut staging = vec![0u8; draws.len() * stride];
            for (slot, call) in staging.chunks_exact_mut(stride).zip(&draws) {
                let raw = call.to_raw();
                let bytes = bytemuck::bytes_of(&raw);
                slot[..bytes.len()].copy_from_slice(bytes);
            }
            self.queue.write_buffer(&self.draw_buffer, 0, &staging);
        }

        let output = self.acquire()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mesh Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.frame_bind_group, &[]);
            for (i, call) in draws.iter().enumerate() {
                let Some(geometry) = self.geometry.get(&call.buffer) else {
                    continue;
                };
                let offset = (i as u64 * self.draw_stride) as wgpu::DynamicOffset;
                let texture = call
                    .texture
                    .and_then(|t| self.textures.get(&t))
                    .unwrap_or(&self.white);
                render_pass.set_bind_group(1, &self.draw_bind_group, &[offset]);
                render_pass.set_bind_group(2, &texture.bind_group, &[]);
                render_pass.set_vertex_buffer(0, geometry.buffer.slice(..));
                render_pass.draw(0..call.vertex_count.min(geometry.vertex_count), 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> (wgpu::Device, wgpu::Queue) {
        wgpu::Device::noop(&wgpu::DeviceDescriptor::default())
    }

    #[test]
    fn valid_creation_passes_through() {
        let (device, _queue) = device();
        let buffer = validated(&device, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("ok"),
                size: 64,
                usage: wgpu::BufferUsages::VERTEX,
                mapped_at_creation: false,
            })
        });
        assert_eq!(buffer.unwrap().size(), 64);
    }

    #[test]
    fn validation_error_is_returned_with_its_message() {
        let (device, _queue) = device();
        let result = validated(&device, || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("empty"),
                size: wgpu::Extent3d {
                    width: 0,
                    height: 4,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        });
        match result {
            Err(Error::Backend(message)) => assert!(!message.is_empty()),
            other => panic!("expected a backend error, got {other:?}"),
        }
    }

    #[test]
    fn errors_after_a_scope_are_not_attributed_to_it() {
        let (device, _queue) = device();
        assert!(validated(&device, || ()).is_ok());
        assert!(validated(&device, || ()).is_ok());
    }
}

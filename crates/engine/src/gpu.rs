//! wgpu implementation of the paint backend.
//!
//! Draw calls recorded between `begin_frame` and `end_frame` are replayed
//! into a single render pass at presentation time. Each photo texture keeps
//! its own bind group; quad placement travels in a small per-draw uniform
//! buffer.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use collageconfig::Color;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::util::{BufferInitDescriptor, DeviceExt, TextureDataOrder};

use crate::paint::{DrawError, PaintBackend};
use crate::types::{DecodedImage, QuadParams, TextureHandle};

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct QuadUniforms {
    rect: [f32; 4],
    /// offset_x, offset_y (in quad sizes), x_scale, alpha.
    placement: [f32; 4],
    tint: [f32; 4],
}

unsafe impl Zeroable for QuadUniforms {}
unsafe impl Pod for QuadUniforms {}

impl QuadUniforms {
    fn photo(quad: QuadParams) -> Self {
        Self {
            rect: [quad.rect.x, quad.rect.y, quad.rect.w, quad.rect.h],
            placement: [quad.offset.0, quad.offset.1, quad.x_scale, quad.alpha],
            tint: [1.0, 1.0, 1.0, 1.0],
        }
    }

    fn fill(color: Color, quad: QuadParams) -> Self {
        Self {
            tint: [color.r, color.g, color.b, color.a],
            ..Self::photo(quad)
        }
    }
}

struct PhotoTexture {
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

enum DrawCommand {
    Photo {
        texture: u64,
        uniforms: QuadUniforms,
    },
    Fill {
        uniforms: QuadUniforms,
    },
}

struct FrameRecording {
    clear: wgpu::Color,
    draws: Vec<DrawCommand>,
}

pub struct WgpuBackend {
    _instance: wgpu::Instance,
    limits: wgpu::Limits,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    quad_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    photo_pipeline: wgpu::RenderPipeline,
    fill_pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
    textures: HashMap<u64, PhotoTexture>,
    next_handle: u64,
    frame: Option<FrameRecording>,
}

impl WgpuBackend {
    pub fn new<T>(target: &T, width: u32, height: u32) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = wgpu::Instance::default();
        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let limits = adapter.limits();
        let max_dimension = limits.max_texture_dimension_2d;
        let requested_width = width.max(1);
        let requested_height = height.max(1);
        if requested_width > max_dimension || requested_height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested surface is \
                 {requested_width}x{requested_height}"
            );
        }

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| format.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("photoflux device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: requested_width,
            height: requested_height,
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let quad_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quad uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("photo texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/quad.wgsl").into()),
        });

        let photo_pipeline = build_pipeline(
            &device,
            &module,
            surface_format,
            "photo pipeline",
            "fs_photo",
            &[&quad_layout, &texture_layout],
        );
        let fill_pipeline = build_pipeline(
            &device,
            &module,
            surface_format,
            "fill pipeline",
            "fs_fill",
            &[&quad_layout],
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        tracing::info!(
            ?surface_format,
            width = requested_width,
            height = requested_height,
            "GPU backend ready"
        );

        Ok(Self {
            _instance: instance,
            limits,
            surface,
            device,
            queue,
            config,
            quad_layout,
            texture_layout,
            photo_pipeline,
            fill_pipeline,
            sampler,
            textures: HashMap::new(),
            next_handle: 0,
            frame: None,
        })
    }

    fn quad_bind_group(&self, uniforms: &QuadUniforms) -> wgpu::BindGroup {
        let buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("quad uniforms"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quad bind group"),
            layout: &self.quad_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }
}

impl PaintBackend for WgpuBackend {
    fn configure_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let max_dimension = self.limits.max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            tracing::warn!(
                width,
                height,
                max_dimension,
                "requested surface size exceeds GPU limits; keeping previous size"
            );
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    fn create_texture(&mut self, image: &DecodedImage, label: &str) -> Result<TextureHandle> {
        if image.width == 0 || image.height == 0 {
            anyhow::bail!("photo '{label}' has zero extent");
        }
        let max_dimension = self.limits.max_texture_dimension_2d;
        if image.width > max_dimension || image.height > max_dimension {
            anyhow::bail!(
                "photo '{label}' is {width}x{height}, above the GPU limit of {max_dimension}",
                width = image.width,
                height = image.height
            );
        }
        let texture = self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: image.width,
                    height: image.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &image.rgba,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.next_handle += 1;
        self.textures.insert(
            self.next_handle,
            PhotoTexture {
                _texture: texture,
                bind_group,
            },
        );
        Ok(TextureHandle(self.next_handle))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if self.textures.remove(&handle.0).is_none() {
            tracing::warn!(handle = handle.0, "destroying unknown texture handle");
        }
    }

    fn begin_frame(&mut self, clear: Color) -> Result<(), DrawError> {
        self.frame = Some(FrameRecording {
            clear: wgpu::Color {
                r: clear.r as f64,
                g: clear.g as f64,
                b: clear.b as f64,
                a: clear.a as f64,
            },
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw_photo(&mut self, texture: TextureHandle, quad: QuadParams) {
        let Some(frame) = self.frame.as_mut() else {
            tracing::warn!("draw_photo outside a frame");
            return;
        };
        frame.draws.push(DrawCommand::Photo {
            texture: texture.0,
            uniforms: QuadUniforms::photo(quad),
        });
    }

    fn draw_fill(&mut self, color: Color, quad: QuadParams) {
        let Some(frame) = self.frame.as_mut() else {
            tracing::warn!("draw_fill outside a frame");
            return;
        };
        frame.draws.push(DrawCommand::Fill {
            uniforms: QuadUniforms::fill(color, quad),
        });
    }

    fn end_frame(&mut self) -> Result<(), DrawError> {
        let recording = self
            .frame
            .take()
            .ok_or_else(|| DrawError::Other(anyhow!("end_frame without begin_frame")))?;

        let frame = self
            .surface
            .get_current_texture()
            .map_err(map_surface_error)?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Bind groups keep their uniform buffers alive until submission.
        let prepared: Vec<(Option<u64>, wgpu::BindGroup)> = recording
            .draws
            .iter()
            .map(|command| match command {
                DrawCommand::Photo { texture, uniforms } => {
                    (Some(*texture), self.quad_bind_group(uniforms))
                }
                DrawCommand::Fill { uniforms } => (None, self.quad_bind_group(uniforms)),
            })
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("collage encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("collage pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(recording.clear),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            for (texture, quad_group) in &prepared {
                match texture {
                    Some(id) => {
                        let Some(photo) = self.textures.get(id) else {
                            tracing::warn!(handle = id, "skipping draw of missing texture");
                            continue;
                        };
                        pass.set_pipeline(&self.photo_pipeline);
                        pass.set_bind_group(0, quad_group, &[]);
                        pass.set_bind_group(1, &photo.bind_group, &[]);
                    }
                    None => {
                        pass.set_pipeline(&self.fill_pipeline);
                        pass.set_bind_group(0, quad_group, &[]);
                    }
                }
                pass.draw(0..4, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    surface_format: wgpu::TextureFormat,
    label: &str,
    fragment_entry: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

fn map_surface_error(error: wgpu::SurfaceError) -> DrawError {
    match error {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => DrawError::SurfaceLost,
        wgpu::SurfaceError::Timeout => DrawError::Timeout,
        wgpu::SurfaceError::OutOfMemory => DrawError::OutOfMemory,
        wgpu::SurfaceError::Other => DrawError::Other(anyhow!("unspecified surface error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use std::mem::{align_of, size_of};

    #[test]
    fn quad_uniforms_follow_std140_layout() {
        let uniforms = QuadUniforms::photo(QuadParams::still(Rect::FULLSCREEN));
        let base = &uniforms as *const _ as usize;

        assert_eq!(align_of::<QuadUniforms>(), 16);
        assert_eq!(size_of::<QuadUniforms>(), 48);
        assert_eq!((&uniforms.rect as *const _ as usize) - base, 0);
        assert_eq!((&uniforms.placement as *const _ as usize) - base, 16);
        assert_eq!((&uniforms.tint as *const _ as usize) - base, 32);
    }

    #[test]
    fn photo_uniforms_carry_placement() {
        let quad = QuadParams {
            rect: Rect::new(-1.0, 0.0, 1.0, 1.0),
            offset: (0.25, 0.0),
            x_scale: 0.5,
            alpha: 0.75,
        };
        let uniforms = QuadUniforms::photo(quad);
        assert_eq!(uniforms.rect, [-1.0, 0.0, 1.0, 1.0]);
        assert_eq!(uniforms.placement, [0.25, 0.0, 0.5, 0.75]);
        assert_eq!(uniforms.tint, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn fill_uniforms_carry_the_color() {
        let color = Color::rgba(0.1, 0.2, 0.3, 0.5);
        let uniforms = QuadUniforms::fill(color, QuadParams::still(Rect::FULLSCREEN));
        assert_eq!(uniforms.tint, [0.1, 0.2, 0.3, 0.5]);
    }
}

//! Single-pass wgpu renderer.
//!
//! Column averages are uploaded as a one-row `R32Float` texture and the
//! palette as a `1 x levels` RGBA texture. A full-viewport quad colors each
//! pixel by its column's intensity and fades it towards the top and bottom
//! edges, so the draw cost does not depend on the column count.

use std::sync::{mpsc, Arc};

use bytemuck::{Pod, Zeroable};
use palette::Srgba;
use tracing::{debug, info};

use super::{Renderer, Style};
use crate::config::Viewport;
use crate::error::{Error, Result};
use crate::storage::ReducedFrame;

/// Device and queue the renderer submits to.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Open an adapter without a presentation surface.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| Error::BackendUnavailable("no compatible GPU adapter".to_string()))?;

        let adapter_info = adapter.get_info();
        info!(
            "Using GPU adapter {} ({:?})",
            adapter_info.name, adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Scrollwave device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Uniforms {
    viewport: [f32; 4],
    columns: [f32; 4],
}

impl Uniforms {
    pub fn new(viewport: Viewport, columns: usize, levels: usize) -> Self {
        Self {
            viewport: [
                viewport.left as f32,
                viewport.top as f32,
                viewport.width as f32,
                viewport.height as f32,
            ],
            columns: [columns as f32, levels as f32, 0.0, 0.0],
        }
    }
}

/// Column averages mapped from `[-1, 1]` to texture intensities in `[0, 1]`.
pub fn intensity_texels(frame: &ReducedFrame) -> Vec<f32> {
    frame
        .averages
        .iter()
        .map(|&average| (average * 0.5 + 0.5).clamp(0.0, 1.0))
        .collect()
}

/// Brightness factor the fragment stage applies at normalized height `v`.
pub fn falloff(v: f32) -> f32 {
    (1.0 - (0.5 - v).abs() * 2.0).max(0.0).powf(1.5)
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn clear_color(background: Option<Srgba>) -> wgpu::Color {
    match background {
        Some(color) => wgpu::Color {
            r: color.red as f64,
            g: color.green as f64,
            b: color.blue as f64,
            a: color.alpha as f64,
        },
        None => wgpu::Color::BLACK,
    }
}

pub struct GpuRenderer {
    context: GpuContext,
    format: wgpu::TextureFormat,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    data_texture: wgpu::Texture,
    data_capacity: u32,
    palette_texture: wgpu::Texture,
    palette_sampler: wgpu::Sampler,
    bind_group: wgpu::BindGroup,
    palette_cache: Vec<u8>,
    uniform_cache: Option<Uniforms>,
    viewport: Viewport,
    disposed: bool,
}

impl GpuRenderer {
    /// Build a renderer drawing into its own `format` target sized for `viewport`.
    pub fn new(context: GpuContext, format: wgpu::TextureFormat, viewport: Viewport) -> Result<Self> {
        viewport.validate()?;
        let device = &context.device;
        check_viewport(viewport, device.limits().max_texture_dimension_2d)?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Waveform shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/waveform.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Waveform bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Waveform pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Waveform pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Waveform uniform buffer"),
            size: std::mem::size_of::<Uniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let target = create_target_texture(device, format, viewport);
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let data_capacity = viewport.width;
        let data_texture = create_data_texture(device, data_capacity);
        let palette_texture = create_palette_texture(device, 1);
        let palette_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Waveform palette sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group = create_bind_group(
            device,
            &bind_group_layout,
            &uniform_buffer,
            &data_texture,
            &palette_texture,
            &palette_sampler,
        );

        Ok(Self {
            context,
            format,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            target,
            target_view,
            data_texture,
            data_capacity,
            palette_texture,
            palette_sampler,
            bind_group,
            palette_cache: Vec::new(),
            uniform_cache: None,
            viewport,
            disposed: false,
        })
    }

    pub fn target(&self) -> &wgpu::Texture {
        &self.target
    }

    pub fn target_view(&self) -> &wgpu::TextureView {
        &self.target_view
    }

    fn rebuild_bind_group(&mut self) {
        self.bind_group = create_bind_group(
            &self.context.device,
            &self.bind_group_layout,
            &self.uniform_buffer,
            &self.data_texture,
            &self.palette_texture,
            &self.palette_sampler,
        );
    }

    fn texture_limit(&self) -> u32 {
        self.context.device.limits().max_texture_dimension_2d
    }

    fn ensure_data_capacity(&mut self, columns: u32) {
        if columns <= self.data_capacity {
            return;
        }

        debug!(
            "Growing waveform data texture from {} to {} columns",
            self.data_capacity, columns
        );
        let old = std::mem::replace(
            &mut self.data_texture,
            create_data_texture(&self.context.device, columns),
        );
        old.destroy();
        self.data_capacity = columns;
        self.rebuild_bind_group();
    }

    /// Re-upload the palette only when its colormap changed.
    fn write_palette(&mut self, style: &Style) -> Result<()> {
        let texels = style.palette.colormap_rgba8();
        if texels == self.palette_cache {
            return Ok(());
        }

        check_texture_dimension(style.palette.levels() as u64, self.texture_limit())?;
        let levels = style.palette.levels() as u32;
        if self.palette_cache.len() != texels.len() {
            let old = std::mem::replace(
                &mut self.palette_texture,
                create_palette_texture(&self.context.device, levels),
            );
            old.destroy();
            self.rebuild_bind_group();
        }

        self.context.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.palette_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &texels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(levels),
            },
            wgpu::Extent3d {
                width: 1,
                height: levels,
                depth_or_array_layers: 1,
            },
        );
        self.palette_cache = texels;
        Ok(())
    }

    fn write_data(&mut self, texels: &[f32]) {
        if texels.is_empty() {
            return;
        }

        self.context.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.data_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(texels.len() as u32 * std::mem::size_of::<f32>() as u32),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: texels.len() as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Copy the target back to host memory as tightly packed RGBA8 rows.
    pub fn read_pixels(&self) -> Result<(u32, u32, Vec<u8>)> {
        if !matches!(
            self.format,
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb
        ) {
            return Err(Error::Render(format!(
                "cannot read back {:?} targets",
                self.format
            )));
        }

        let device = &self.context.device;
        let size = self.target.size();
        let (width, height) = (size.width, size.height);
        let padded = padded_bytes_per_row(width);

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Waveform readback buffer"),
            size: padded as wgpu::BufferAddress * height as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Waveform readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            size,
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| Error::Render(e.to_string()))?
            .map_err(|e| Error::Render(e.to_string()))?;

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..(width * 4) as usize]);
            }
        }
        buffer.unmap();

        Ok((width, height, pixels))
    }
}

impl Renderer for GpuRenderer {
    fn draw(&mut self, frame: &ReducedFrame, style: &Style) -> Result<()> {
        if self.disposed {
            return Err(Error::BackendUnavailable(
                "GPU renderer has been disposed".to_string(),
            ));
        }

        self.write_palette(style)?;

        let texels = intensity_texels(frame);
        check_texture_dimension(texels.len() as u64, self.texture_limit())?;
        self.ensure_data_capacity(texels.len() as u32);
        self.write_data(&texels);

        let uniforms = Uniforms::new(self.viewport, texels.len(), style.palette.levels());
        if self.uniform_cache != Some(uniforms) {
            self.context
                .queue
                .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
            self.uniform_cache = Some(uniforms);
        }

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Waveform draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Waveform pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_color(style.palette.background())),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if !texels.is_empty() {
                let Viewport {
                    left,
                    top,
                    width,
                    height,
                } = self.viewport;
                pass.set_viewport(
                    left as f32,
                    top as f32,
                    width as f32,
                    height as f32,
                    0.0,
                    1.0,
                );
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &self.bind_group, &[]);
                pass.draw(0..6, 0..1);
            }
        }
        self.context.queue.submit(Some(encoder.finish()));

        Ok(())
    }

    fn resize(&mut self, viewport: Viewport) -> Result<()> {
        viewport.validate()?;
        check_viewport(viewport, self.texture_limit())?;
        let size = self.target.size();
        if viewport.right() > size.width || viewport.bottom() > size.height {
            let old = std::mem::replace(
                &mut self.target,
                create_target_texture(&self.context.device, self.format, viewport),
            );
            old.destroy();
            self.target_view = self
                .target
                .create_view(&wgpu::TextureViewDescriptor::default());
        }
        self.ensure_data_capacity(viewport.width);
        self.viewport = viewport;
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.target.destroy();
        self.data_texture.destroy();
        self.palette_texture.destroy();
        self.uniform_buffer.destroy();
        self.disposed = true;
    }
}

/// Reject a texture edge the device cannot allocate.
fn check_texture_dimension(size: u64, limit: u32) -> Result<()> {
    if size > limit as u64 {
        return Err(Error::TextureTooLarge { size, limit });
    }
    Ok(())
}

/// The target spans `right x bottom`; the data texture spans `width`.
fn check_viewport(viewport: Viewport, limit: u32) -> Result<()> {
    check_texture_dimension(viewport.right() as u64, limit)?;
    check_texture_dimension(viewport.bottom() as u64, limit)
}

fn create_target_texture(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    viewport: Viewport,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Waveform target"),
        size: wgpu::Extent3d {
            width: viewport.right().max(1),
            height: viewport.bottom().max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

fn create_data_texture(device: &wgpu::Device, columns: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Waveform data texture"),
        size: wgpu::Extent3d {
            width: columns.max(1),
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::R32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn create_palette_texture(device: &wgpu::Device, levels: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Waveform palette texture"),
        size: wgpu::Extent3d {
            width: 1,
            height: levels.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniform_buffer: &wgpu::Buffer,
    data_texture: &wgpu::Texture,
    palette_texture: &wgpu::Texture,
    palette_sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    let data_view = data_texture.create_view(&wgpu::TextureViewDescriptor::default());
    let palette_view = palette_texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Waveform bind group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&data_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&palette_view),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(palette_sampler),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ColumnStats;

    #[test]
    fn averages_map_to_unit_intensity() {
        let mut frame = ReducedFrame::with_capacity(3, 0.0, 4.0);
        frame.push(ColumnStats::point(-1.0));
        frame.push(ColumnStats::ZERO);
        frame.push(ColumnStats::point(1.0));
        assert_eq!(intensity_texels(&frame), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn falloff_peaks_at_center_and_vanishes_at_edges() {
        assert_eq!(falloff(0.5), 1.0);
        assert_eq!(falloff(0.0), 0.0);
        assert_eq!(falloff(1.0), 0.0);
        assert!((falloff(0.25) - 0.5f32.powf(1.5)).abs() < 1e-6);
        assert_eq!(falloff(0.25), falloff(0.75));
    }

    #[test]
    fn uniforms_pack_viewport_and_columns() {
        let uniforms = Uniforms::new(Viewport::new(2, 4, 300, 100), 300, 16);
        assert_eq!(uniforms.viewport, [2.0, 4.0, 300.0, 100.0]);
        assert_eq!(uniforms.columns, [300.0, 16.0, 0.0, 0.0]);
        assert_eq!(bytemuck::bytes_of(&uniforms).len(), 32);
    }

    #[test]
    fn readback_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn texture_edges_respect_device_limit() {
        assert_eq!(check_texture_dimension(8192, 8192), Ok(()));
        assert_eq!(
            check_texture_dimension(20000, 8192),
            Err(Error::TextureTooLarge {
                size: 20000,
                limit: 8192
            })
        );

        assert!(check_viewport(Viewport::new(0, 0, 8192, 64), 8192).is_ok());
        assert!(check_viewport(Viewport::new(0, 0, 20000, 64), 8192).is_err());
        assert!(check_viewport(Viewport::new(100, 0, 8100, 64), 8192).is_err());
        assert!(check_viewport(Viewport::new(0, 8000, 64, 400), 8192).is_err());
    }

    #[test]
    fn background_defaults_to_black() {
        assert_eq!(clear_color(None), wgpu::Color::BLACK);
    }
}

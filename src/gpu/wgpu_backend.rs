//! wgpu implementation of the warp backend
//!
//! - Sampling texture and render target are `Rgba8Unorm`
//! - Transfer slots are `MAP_WRITE | COPY_SRC` buffers with rows padded to
//!   `COPY_BYTES_PER_ROW_ALIGNMENT`; consuming a slot is a buffer-to-texture copy
//! - Readback copies the target into a `MAP_READ` buffer and waits on the map
//!
//! Without off-screen support the target is still a texture, sized to the
//! window's back buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::{
    padded_bytes_per_row, BackendError, Capabilities, GpuContext, ReadbackImage, RowOrder,
    TexturePixels, WarpBackend, SLOT_COUNT,
};
use crate::video::PixelLayout;
use crate::warp::{RenderTarget, UvPolicy, WarpGeometry, WarpVertex};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A texture and its default view
struct TextureResource {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// Two transfer buffers shared by the double-buffered upload
struct SlotBuffers {
    buffers: Vec<wgpu::Buffer>,
    width: u32,
    height: u32,
    bytes_per_row: u32,
}

/// Render target plus the buffer it is read back through
struct TargetResource {
    color: TextureResource,
    readback: wgpu::Buffer,
    bytes_per_row: u32,
}

/// Uploaded vertex/index data
struct GeometryBuffers {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

/// GPU warp backend
pub struct WgpuBackend {
    context: GpuContext,
    capabilities: Capabilities,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: Option<wgpu::Sampler>,
    bind_group: Option<wgpu::BindGroup>,
    texture: Option<TextureResource>,
    slots: Option<SlotBuffers>,
    target: Option<TargetResource>,
    geometry: Option<GeometryBuffers>,
}

impl WgpuBackend {
    /// Create the backend and probe the optional accelerations
    ///
    /// `allowed` carries the settings overrides; off-screen targets further
    /// require the output size to fit the device's texture limit.
    pub fn new(context: GpuContext, allowed: Capabilities, output_size: (u32, u32)) -> Self {
        let max_dimension = context.max_texture_dimension();
        let capabilities = Capabilities {
            staged_upload: allowed.staged_upload,
            offscreen_target: allowed.offscreen_target
                && output_size.0 <= max_dimension
                && output_size.1 <= max_dimension,
        };
        tracing::info!(
            "GPU capabilities: staged upload {}, off-screen target {} (max texture {})",
            capabilities.staged_upload,
            capabilities.offscreen_target,
            max_dimension
        );

        let device = &context.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Warp Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(crate::shaders::load_warp_mesh_shader().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Warp Bind Group Layout"),
            entries: &[
                // Source texture
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
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Warp Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Warp Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[WarpVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
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
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            context,
            capabilities,
            pipeline,
            bind_group_layout,
            sampler: None,
            bind_group: None,
            texture: None,
            slots: None,
            target: None,
            geometry: None,
        }
    }

    fn create_texture(&self, label: &str, width: u32, height: u32, usage: wgpu::TextureUsages) -> TextureResource {
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        TextureResource {
            texture,
            view,
            width,
            height,
        }
    }

    /// Rebuild the bind group once both texture and sampler exist
    fn rebuild_bind_group(&mut self) {
        self.bind_group = match (&self.texture, &self.sampler) {
            (Some(texture), Some(sampler)) => {
                Some(self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Warp Bind Group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&texture.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        },
                    ],
                }))
            }
            _ => None,
        };
    }

    /// Map a buffer and block until the mapping resolves
    fn map_blocking(&self, buffer: &wgpu::Buffer, mode: wgpu::MapMode) -> bool {
        let mapped = Arc::new(AtomicBool::new(false));
        let flag = mapped.clone();
        buffer.slice(..).map_async(mode, move |result| {
            flag.store(result.is_ok(), Ordering::SeqCst);
        });
        let _ = self.context.device.poll(wgpu::Maintain::Wait);
        mapped.load(Ordering::SeqCst)
    }

    fn check_size(expected: (u32, u32), pixels: &TexturePixels) -> Result<(), BackendError> {
        if (pixels.width, pixels.height) != expected {
            return Err(BackendError::SizeMismatch {
                width: expected.0,
                height: expected.1,
                got_width: pixels.width,
                got_height: pixels.height,
            });
        }
        Ok(())
    }
}

impl WarpBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn allocate_texture(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.texture = Some(self.create_texture(
            "Warp Source Texture",
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        ));
        self.rebuild_bind_group();
        Ok(())
    }

    fn write_texture(&mut self, pixels: &TexturePixels) -> Result<(), BackendError> {
        let texture = self.texture.as_ref().ok_or(BackendError::NotAllocated("sampling texture"))?;
        Self::check_size((texture.width, texture.height), pixels)?;

        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(pixels.width * 4),
                rows_per_image: Some(pixels.height),
            },
            wgpu::Extent3d {
                width: pixels.width,
                height: pixels.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn allocate_slots(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        let bytes_per_row = padded_bytes_per_row(width, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffers = (0..SLOT_COUNT)
            .map(|i| {
                self.context.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Warp Upload Slot {}", i)),
                    size: bytes_per_row as u64 * height as u64,
                    usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .collect();
        self.slots = Some(SlotBuffers {
            buffers,
            width,
            height,
            bytes_per_row,
        });
        Ok(())
    }

    fn write_slot(&mut self, slot: usize, pixels: &TexturePixels) -> Result<(), BackendError> {
        let slots = self.slots.as_ref().ok_or(BackendError::NotAllocated("transfer slots"))?;
        Self::check_size((slots.width, slots.height), pixels)?;
        let buffer = slots.buffers.get(slot).ok_or(BackendError::MapFailed { slot })?;

        if !self.map_blocking(buffer, wgpu::MapMode::Write) {
            return Err(BackendError::MapFailed { slot });
        }

        {
            let mut view = buffer.slice(..).get_mapped_range_mut();
            let padded = slots.bytes_per_row as usize;
            for (src, dst) in pixels
                .data
                .chunks_exact(pixels.stride())
                .zip(view.chunks_exact_mut(padded))
            {
                dst[..src.len()].copy_from_slice(src);
            }
        }
        buffer.unmap();
        Ok(())
    }

    fn consume_slot(&mut self, slot: usize) -> Result<(), BackendError> {
        let slots = self.slots.as_ref().ok_or(BackendError::NotAllocated("transfer slots"))?;
        let texture = self.texture.as_ref().ok_or(BackendError::NotAllocated("sampling texture"))?;
        let buffer = slots.buffers.get(slot).ok_or(BackendError::MapFailed { slot })?;

        let mut encoder = self.context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Warp Slot Upload"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(slots.bytes_per_row),
                    rows_per_image: Some(slots.height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: slots.width.min(texture.width),
                height: slots.height.min(texture.height),
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn allocate_target(&mut self, target: RenderTarget) -> Result<(), BackendError> {
        let (width, height) = target.size();
        let color = self.create_texture(
            "Warp Render Target",
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let bytes_per_row = padded_bytes_per_row(width, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Warp Readback Buffer"),
            size: bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        self.target = Some(TargetResource {
            color,
            readback,
            bytes_per_row,
        });
        Ok(())
    }

    fn set_geometry(&mut self, geometry: &WarpGeometry, policy: UvPolicy) -> Result<(), BackendError> {
        let device = &self.context.device;
        // Keep buffers non-empty; a fully blanked mesh simply draws nothing
        let indices: &[u32] = if geometry.indices.is_empty() { &[0, 0, 0] } else { &geometry.indices };
        let vertices: &[WarpVertex] = if geometry.vertices.is_empty() {
            &[WarpVertex {
                position: [0.0; 2],
                uv: [0.0; 2],
                intensity: 0.0,
            }]
        } else {
            &geometry.vertices
        };

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Warp Vertex Buffer"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Warp Index Buffer"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.geometry = Some(GeometryBuffers {
            vertex_buffer,
            index_buffer,
            index_count: geometry.indices.len() as u32,
        });

        let address_mode = match policy {
            UvPolicy::Repeat => wgpu::AddressMode::Repeat,
            UvPolicy::Clamp | UvPolicy::Reject => wgpu::AddressMode::ClampToEdge,
        };
        self.sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Warp Sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }));
        self.rebuild_bind_group();
        Ok(())
    }

    fn draw(&mut self) -> Result<(), BackendError> {
        let target = self.target.as_ref().ok_or(BackendError::NotAllocated("render target"))?;
        let geometry = self.geometry.as_ref().ok_or(BackendError::NotAllocated("geometry"))?;
        let bind_group = self.bind_group.as_ref().ok_or(BackendError::NotAllocated("sampling texture"))?;

        let mut encoder = self.context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Warp Render Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Warp Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if geometry.index_count > 0 {
                render_pass.set_pipeline(&self.pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.set_vertex_buffer(0, geometry.vertex_buffer.slice(..));
                render_pass.set_index_buffer(geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..geometry.index_count, 0, 0..1);
            }
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_target(&mut self) -> Result<ReadbackImage, BackendError> {
        let target = self.target.as_ref().ok_or(BackendError::NotAllocated("render target"))?;
        let (width, height) = (target.color.width, target.color.height);

        let mut encoder = self.context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Warp Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.color.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));

        if !self.map_blocking(&target.readback, wgpu::MapMode::Read) {
            return Err(BackendError::Readback("failed to map readback buffer".into()));
        }
        let data = target.readback.slice(..).get_mapped_range().to_vec();
        target.readback.unmap();

        Ok(ReadbackImage {
            data,
            width,
            height,
            stride: target.bytes_per_row as usize,
            layout: PixelLayout::Rgba8,
            row_order: RowOrder::TopDown,
        })
    }

    fn release_slots(&mut self) {
        if let Some(slots) = self.slots.take() {
            for buffer in &slots.buffers {
                buffer.destroy();
            }
        }
    }

    fn release_texture(&mut self) {
        self.bind_group = None;
        if let Some(texture) = self.texture.take() {
            texture.texture.destroy();
        }
    }

    fn release_geometry(&mut self) {
        self.bind_group = None;
        self.sampler = None;
        if let Some(geometry) = self.geometry.take() {
            geometry.vertex_buffer.destroy();
            geometry.index_buffer.destroy();
        }
    }

    fn release_target(&mut self) {
        if let Some(target) = self.target.take() {
            target.color.texture.destroy();
            target.readback.destroy();
        }
    }
}

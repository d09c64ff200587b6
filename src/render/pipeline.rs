use std::mem::size_of;

use iced_wgpu::wgpu::{self, util::DeviceExt};

#[allow(unused_imports)]
use log::{debug, info, trace, warn};

use crate::atlas::Texture;
use crate::lod::LodCache;
use crate::render::batch::Batch;
use crate::render::camera::{Camera, CameraUniform};
use crate::render::shader::{self, FIRST_ATLAS_BINDING, LOD_BINDING};

pub const ATLAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const QUAD_VERTICES: u32 = 6;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BatchUniform {
    first_texture: f32,
    transition: f32,
    _padding: [f32; 2],
}

const SELECTOR_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32];
const SIZE_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32];
const OFFSET_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];
const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![3 => Float32x3];
const TARGET_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![4 => Float32x3];
const COLOR_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![5 => Float32x3];

/// One instance-rate buffer per attribute, in shader location order.
pub fn instance_layouts() -> [wgpu::VertexBufferLayout<'static>; 6] {
    fn layout(stride: usize, attributes: &'static [wgpu::VertexAttribute]) -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: stride as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes,
        }
    }
    [
        layout(size_of::<f32>(), &SELECTOR_ATTRIBUTES),
        layout(size_of::<f32>(), &SIZE_ATTRIBUTES),
        layout(size_of::<[f32; 2]>(), &OFFSET_ATTRIBUTES),
        layout(size_of::<[f32; 3]>(), &POSITION_ATTRIBUTES),
        layout(size_of::<[f32; 3]>(), &TARGET_ATTRIBUTES),
        layout(size_of::<[f32; 3]>(), &COLOR_ATTRIBUTES),
    ]
}

/// GPU side of one draw call.
#[derive(Debug)]
struct GpuBatch {
    selectors: wgpu::Buffer,
    sizes: wgpu::Buffer,
    offsets: wgpu::Buffer,
    positions: wgpu::Buffer,
    targets: wgpu::Buffer,
    colors: wgpu::Buffer,
    uniform: wgpu::Buffer,
    bind_group: Option<wgpu::BindGroup>,
    /// Texture range the bind group was built for.
    bound: Option<(usize, usize)>,
    instances: u32,
}

impl GpuBatch {
    fn new(device: &wgpu::Device, batch: &Batch) -> Self {
        let attribute = |label: &str, contents: &[u8]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            })
        };
        Self {
            selectors: attribute("Selector Buffer", bytemuck::cast_slice(&batch.selectors)),
            sizes: attribute("Size Buffer", bytemuck::cast_slice(&batch.sizes)),
            offsets: attribute("Offset Buffer", bytemuck::cast_slice(&batch.offsets)),
            positions: attribute("Position Buffer", bytemuck::cast_slice(&batch.positions)),
            targets: attribute("Target Buffer", bytemuck::cast_slice(&batch.targets)),
            colors: attribute("Color Buffer", bytemuck::cast_slice(&batch.colors)),
            uniform: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Batch Uniform Buffer"),
                size: size_of::<BatchUniform>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            bind_group: None,
            bound: None,
            instances: batch.len() as u32,
        }
    }

    /// Writes only the attributes that changed since the last frame.
    fn sync(&self, queue: &wgpu::Queue, batch: &mut Batch) {
        for i in batch.take_dirty_cells() {
            queue.write_buffer(&self.selectors, (i * size_of::<f32>()) as u64, bytemuck::bytes_of(&batch.selectors[i]));
            queue.write_buffer(&self.sizes, (i * size_of::<f32>()) as u64, bytemuck::bytes_of(&batch.sizes[i]));
            queue.write_buffer(&self.offsets, (i * size_of::<[f32; 2]>()) as u64, bytemuck::bytes_of(&batch.offsets[i]));
        }
        if batch.take_positions_dirty() {
            queue.write_buffer(&self.positions, 0, bytemuck::cast_slice(&batch.positions));
        }
        if batch.take_targets_dirty() {
            queue.write_buffer(&self.targets, 0, bytemuck::cast_slice(&batch.targets));
        }
    }
}

/// Main point-cloud pass: pipelines, shared bind groups, textures and per-batch buffers.
pub struct Renderer {
    pipeline: wgpu::RenderPipeline,
    pipeline_layout: wgpu::PipelineLayout,
    batch_layout: wgpu::BindGroupLayout,
    global_bind_group: wgpu::BindGroup,
    camera_buffer: wgpu::Buffer,
    texture_units: u32,
    placeholder: wgpu::TextureView,
    textures: Vec<Option<wgpu::TextureView>>,
    lod_texture: wgpu::Texture,
    lod_view: wgpu::TextureView,
    lod_edge: u32,
    batches: Vec<GpuBatch>,
}

impl Renderer {
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        texture_units: u32,
        texture_count: usize,
        lod_edge: u32,
        batches: &[Batch],
    ) -> Self {
        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Camera Uniform Buffer"),
            size: size_of::<CameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let global_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Global Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
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
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let global_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Global Bind Group"),
            layout: &global_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let mut batch_entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            texture_entry(LOD_BINDING),
        ];
        batch_entries.extend((0..texture_units).map(|unit| texture_entry(FIRST_ATLAS_BINDING + unit)));

        let batch_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Batch Bind Group Layout"),
            entries: &batch_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Point Cloud Pipeline Layout"),
            bind_group_layouts: &[&global_layout, &batch_layout],
            push_constant_ranges: &[],
        });

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Point Cloud Shader"),
            source: wgpu::ShaderSource::Wgsl(shader::main_shader(texture_units).into()),
        });
        let pipeline = create_pipeline(
            device,
            &pipeline_layout,
            &module,
            format,
            Some(wgpu::BlendState::ALPHA_BLENDING),
            "Point Cloud Pipeline",
        );

        let placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Placeholder Texture"),
                size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: ATLAS_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        let lod_texture = create_texture(device, "LOD Texture", lod_edge);
        let lod_view = lod_texture.create_view(&wgpu::TextureViewDescriptor::default());

        info!(
            "Renderer: {} atlas units, {} textures, {} draw calls, LOD {}px",
            texture_units,
            texture_count,
            batches.len(),
            lod_edge
        );

        Self {
            pipeline,
            pipeline_layout,
            batch_layout,
            global_bind_group,
            camera_buffer,
            texture_units,
            placeholder,
            textures: (0..texture_count).map(|_| None).collect(),
            lod_texture,
            lod_view,
            lod_edge,
            batches: batches.iter().map(|b| GpuBatch::new(device, b)).collect(),
        }
    }

    pub fn pipeline_layout(&self) -> &wgpu::PipelineLayout {
        &self.pipeline_layout
    }

    /// Uploads everything that changed on the CPU side this tick.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera,
        point_scale: f32,
        transition: f32,
        textures: &mut [Texture],
        lod: &mut LodCache,
        batches: &mut [Batch],
    ) {
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera.uniform(point_scale)));

        let mut textures_changed = false;
        for texture in textures.iter_mut() {
            let id = texture.id;
            let Some(pixels) = texture.take_upload() else {
                continue;
            };
            let gpu = create_texture(device, "Atlas Texture", pixels.width());
            write_region(queue, &gpu, pixels.as_raw(), pixels.width(), (0, 0), pixels.width());
            debug!("Uploaded texture {} ({}px)", id, pixels.width());
            if let Some(slot) = self.textures.get_mut(id) {
                *slot = Some(gpu.create_view(&wgpu::TextureViewDescriptor::default()));
                textures_changed = true;
            }
        }

        let dirty_slots = lod.take_dirty_slots();
        let slot_edge = lod.slot_edge();
        for (_, origin) in &dirty_slots {
            write_region(queue, &self.lod_texture, lod.pixels().as_raw(), self.lod_edge, *origin, slot_edge);
        }

        for (i, batch) in batches.iter_mut().enumerate().take(self.batches.len()) {
            let range = batch.bound_range().map(|(first, last)| {
                let max_last = first + self.texture_units as usize - 1;
                if last > max_last {
                    warn!(
                        "Draw call {} spans textures {}..={}, only {} can be bound",
                        batch.id, first, last, self.texture_units
                    );
                }
                (first, last.min(max_last))
            });

            let stale = self.batches[i].bind_group.is_none() || textures_changed || range != self.batches[i].bound;
            if stale {
                let bind_group = self.create_batch_bind_group(device, &self.batches[i].uniform, range);
                self.batches[i].bind_group = Some(bind_group);
                self.batches[i].bound = range;
            }

            let gpu = &self.batches[i];
            gpu.sync(queue, batch);
            let uniform = BatchUniform {
                first_texture: range.map_or(0, |(first, _)| first) as f32,
                transition,
                _padding: [0.0; 2],
            };
            queue.write_buffer(&gpu.uniform, 0, bytemuck::bytes_of(&uniform));
        }
    }

    fn create_batch_bind_group(
        &self,
        device: &wgpu::Device,
        uniform: &wgpu::Buffer,
        range: Option<(usize, usize)>,
    ) -> wgpu::BindGroup {
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: LOD_BINDING,
                resource: wgpu::BindingResource::TextureView(&self.lod_view),
            },
        ];
        for unit in 0..self.texture_units {
            let view = range
                .and_then(|(first, last)| {
                    let id = first + unit as usize;
                    (id <= last).then_some(id)
                })
                .and_then(|id| self.textures.get(id))
                .and_then(Option::as_ref)
                .unwrap_or(&self.placeholder);
            entries.push(wgpu::BindGroupEntry {
                binding: FIRST_ATLAS_BINDING + unit,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Batch Bind Group"),
            layout: &self.batch_layout,
            entries: &entries,
        })
    }

    /// Records every batch into `pass` with whatever pipeline is set.
    pub fn draw_batches<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        pass.set_bind_group(0, &self.global_bind_group, &[]);
        for gpu in &self.batches {
            let Some(bind_group) = &gpu.bind_group else {
                continue;
            };
            pass.set_bind_group(1, bind_group, &[]);
            for (slot, buffer) in [
                &gpu.selectors,
                &gpu.sizes,
                &gpu.offsets,
                &gpu.positions,
                &gpu.targets,
                &gpu.colors,
            ]
            .into_iter()
            .enumerate()
            {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.draw(0..QUAD_VERTICES, 0..gpu.instances);
        }
    }

    pub fn render(&self, target: &wgpu::TextureView, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Point Cloud Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: 0.07,
                        g: 0.07,
                        b: 0.08,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        self.draw_batches(&mut pass);
    }
}

pub fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            buffers: &instance_layouts(),
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
    })
}

fn create_texture(device: &wgpu::Device, label: &str, edge: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: edge,
            height: edge,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: ATLAS_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

/// Writes a square `region` of an RGBA8 image whose rows are `image_width` pixels wide.
fn write_region(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    rgba: &[u8],
    image_width: u32,
    origin: (u32, u32),
    region: u32,
) {
    let (x, y) = origin;
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::ImageDataLayout {
            offset: ((y as u64 * image_width as u64) + x as u64) * 4,
            bytes_per_row: Some(4 * image_width),
            rows_per_image: Some(region),
        },
        wgpu::Extent3d {
            width: region,
            height: region,
            depth_or_array_layers: 1,
        },
    );
}

use iced_wgpu::wgpu;

#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::picking;
use crate::render::pipeline::{create_pipeline, Renderer};
use crate::render::shader;

pub const PICKING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Off-screen color-id pass: the batches are drawn with their id colors and the one
/// pixel under the pointer is read back.
pub struct PickingPass {
    pipeline: wgpu::RenderPipeline,
    target: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
}

impl PickingPass {
    pub fn new(device: &wgpu::Device, renderer: &Renderer, width: u32, height: u32) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Picking Shader"),
            source: wgpu::ShaderSource::Wgsl(shader::picking_shader().into()),
        });
        let pipeline = create_pipeline(
            device,
            renderer.pipeline_layout(),
            &module,
            PICKING_FORMAT,
            Some(wgpu::BlendState::REPLACE),
            "Picking Pipeline",
        );
        let (target, view) = Self::create_target(device, width, height);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Picking Readback Buffer"),
            size: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            target,
            view,
            readback,
            width: width.max(1),
            height: height.max(1),
        }
    }

    fn create_target(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Picking Target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICKING_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        (target, view)
    }

    /// Follows the surface size; called after the debounced resize settles.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if (width.max(1), height.max(1)) == (self.width, self.height) {
            return;
        }
        let (target, view) = Self::create_target(device, width, height);
        self.target = target;
        self.view = view;
        self.width = width.max(1);
        self.height = height.max(1);
        debug!("Picking target resized to {}x{}", self.width, self.height);
    }

    /// Renders the id pass and returns the cell under `(x, y)`, or None for background.
    ///
    /// Blocks on the readback; picks only happen on click.
    pub fn pick(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        renderer: &Renderer,
        x: u32,
        y: u32,
        cell_count: usize,
    ) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Picking Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Picking Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            renderer.draw_batches(&mut pass);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Picking readback failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!("Picking readback channel closed");
                return None;
            }
        }

        let rgb = {
            let data = slice.get_mapped_range();
            [data[0], data[1], data[2]]
        };
        self.readback.unmap();

        let picked = picking::resolve(rgb, cell_count);
        trace!("Pick at ({}, {}) read {:?} -> {:?}", x, y, rgb, picked);
        picked
    }
}

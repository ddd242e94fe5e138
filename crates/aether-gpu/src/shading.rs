//! Atmosphere shading pass: pipeline, uniform buffer and table bindings.
//!
//! The bind group is cached per (program, table generation) pair. It is
//! rebuilt only after the program was recompiled or a regeneration published
//! new tables, never on an ordinary frame.

use aether_runtime::{PreparedFrame, ShadingUniform};
use log::debug;

use crate::executor::GpuTable;
use crate::shader::{ShaderError, ShaderLibrary};

/// HDR colour target the pass blends into.
pub const SHADING_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BindingKey {
    program: u64,
    tables: u64,
}

pub struct ShadingPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    target_format: wgpu::TextureFormat,
    program_generation: u64,
    bind_group: Option<(BindingKey, wgpu::BindGroup)>,
    rebinds: u64,
    visible: bool,
}

fn table_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    bind_group_layout: &wgpu::BindGroupLayout,
    target_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("atmosphere-pipeline-layout"),
        bind_group_layouts: &[bind_group_layout],
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("atmosphere-pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
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
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

impl ShadingPass {
    pub fn new(
        device: &wgpu::Device,
        shaders: &mut ShaderLibrary,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self, ShaderError> {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("atmosphere-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<ShadingUniform>() as u64,
                        ),
                    },
                    count: None,
                },
                table_entry(1, wgpu::TextureViewDimension::D2),
                table_entry(2, wgpu::TextureViewDimension::D2),
                table_entry(3, wgpu::TextureViewDimension::D3),
            ],
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("atmosphere-uniform"),
            size: std::mem::size_of::<ShadingUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let module = shaders.load_shading(device)?;
        let pipeline = create_pipeline(device, &module, &bind_group_layout, target_format);

        Ok(Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
            target_format,
            program_generation: 1,
            bind_group: None,
            rebinds: 0,
            visible: false,
        })
    }

    /// Recompile the shading program. The table bindings are rebuilt on the
    /// next [`ShadingPass::prepare`].
    pub fn rebuild(&mut self, device: &wgpu::Device, shaders: &mut ShaderLibrary) -> Result<(), ShaderError> {
        let module = shaders.load_shading(device)?;
        self.pipeline = create_pipeline(device, &module, &self.bind_group_layout, self.target_format);
        self.program_generation += 1;
        Ok(())
    }

    /// Upload this frame's uniform and make sure the tables it pins are
    /// bound. Returns whether the pass will draw.
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame: &PreparedFrame<GpuTable>) -> bool {
        self.visible = !frame.culled;
        if !self.visible {
            return false;
        }
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&frame.uniform));

        let key = BindingKey {
            program: self.program_generation,
            tables: frame.tables.generation,
        };
        if self.bind_group.as_ref().map(|(k, _)| *k) != Some(key) {
            let tables = &frame.tables.tables;
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("atmosphere-bind-group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(tables.transmittance.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(tables.irradiance.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(tables.inscatter.view()),
                    },
                ],
            });
            debug!(
                "Bound atmosphere tables (program {}, tables {})",
                key.program, key.tables
            );
            self.bind_group = Some((key, bind_group));
            self.rebinds += 1;
        }
        true
    }

    /// Draw the full-screen atmosphere, unless the last prepared frame was
    /// culled.
    pub fn draw<'a>(&'a self, render_pass: &mut wgpu::RenderPass<'a>) {
        if !self.visible {
            return;
        }
        if let Some((_, bind_group)) = &self.bind_group {
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
    }

    /// How many times the table bind group has been built.
    pub fn rebinds(&self) -> u64 {
        self.rebinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{GpuContext, init_gpu_context_blocking};
    use crate::executor::GpuExecutor;
    use aether_config::Config;
    use aether_runtime::{Atmosphere, AtmosphereSettings, Camera, Ephemeris, FrameInput};
    use glam::{DMat4, DVec3};

    struct NoBodies;

    impl Ephemeris for NoBodies {
        fn position(&self, _body: &str, _frame: &str, _time: f64) -> Option<(DVec3, f64)> {
            None
        }

        fn radius(&self, _body: &str) -> Option<f64> {
            None
        }

        fn scale(&self, _body: &str) -> Option<f64> {
            None
        }
    }

    fn settings() -> AtmosphereSettings {
        let mut config = Config::default();
        config.tables.texture_scale = 0.25;
        config.tables.scattering_orders = 2;
        AtmosphereSettings::from_config(&config).unwrap()
    }

    fn frame(dir: DVec3) -> FrameInput {
        let eye = DVec3::new(0.0, 0.0, 3.0e7);
        FrameInput {
            camera: Camera {
                position: eye,
                view: DMat4::look_to_rh(eye, dir, DVec3::Y),
                projection: DMat4::perspective_rh(1.0, 1.0, 10.0, 1.0e10),
            },
            model: DMat4::IDENTITY,
            time: 0.0,
            light_source: Some(DVec3::new(1.5e11, 0.0, 0.0)),
        }
    }

    fn render(context: &GpuContext, pass: &ShadingPass) {
        let target = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("atmosphere-test-target"),
            size: wgpu::Extent3d {
                width: 32,
                height: 32,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHADING_TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("atmosphere-test"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.draw(&mut render_pass);
        }
        context.queue.submit(Some(encoder.finish()));
        let _ = context.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
    }

    #[test]
    fn test_bind_group_rebuilt_only_on_program_or_table_change() {
        let Ok(context) = init_gpu_context_blocking() else {
            return;
        };
        let mut exec = GpuExecutor::new(&context);
        let mut atmosphere = Atmosphere::new(settings());
        atmosphere.generate(&mut exec).unwrap();

        let mut shaders = ShaderLibrary::new();
        let mut pass = ShadingPass::new(&context.device, &mut shaders, SHADING_TARGET_FORMAT).unwrap();

        for _ in 0..3 {
            let prepared = atmosphere.prepare_frame(&frame(DVec3::NEG_Z), &NoBodies).unwrap();
            assert!(pass.prepare(&context.device, &context.queue, &prepared));
            render(&context, &pass);
        }
        assert_eq!(pass.rebinds(), 1);

        pass.rebuild(&context.device, &mut shaders).unwrap();
        let prepared = atmosphere.prepare_frame(&frame(DVec3::NEG_Z), &NoBodies).unwrap();
        pass.prepare(&context.device, &context.queue, &prepared);
        assert_eq!(pass.rebinds(), 2);

        atmosphere.generate(&mut exec).unwrap();
        let prepared = atmosphere.prepare_frame(&frame(DVec3::NEG_Z), &NoBodies).unwrap();
        pass.prepare(&context.device, &context.queue, &prepared);
        assert_eq!(pass.rebinds(), 3);
    }

    #[test]
    fn test_culled_frame_skips_binding() {
        let Ok(context) = init_gpu_context_blocking() else {
            return;
        };
        let mut exec = GpuExecutor::new(&context);
        let mut atmosphere = Atmosphere::new(settings());
        atmosphere.generate(&mut exec).unwrap();

        let mut shaders = ShaderLibrary::new();
        let mut pass = ShadingPass::new(&context.device, &mut shaders, SHADING_TARGET_FORMAT).unwrap();
        let prepared = atmosphere.prepare_frame(&frame(DVec3::Z), &NoBodies).unwrap();
        assert!(prepared.culled);
        assert!(!pass.prepare(&context.device, &context.queue, &prepared));
        assert_eq!(pass.rebinds(), 0);
        render(&context, &pass);
    }
}

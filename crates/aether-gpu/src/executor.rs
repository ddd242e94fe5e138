//! [`GridExecutor`] on wgpu compute passes.
//!
//! Tables are `Rgba32Float` textures usable both as sampled inputs and as
//! write-only storage outputs. Each `run` uploads the parameter block and
//! submits one dispatch, so passes observe each other's writes in issue
//! order. Additive passes read the previous target contents from a scratch
//! copy, because a texture cannot be sampled and stored in the same pass.

use std::collections::HashMap;
use std::sync::mpsc;

use aether_scatter::{
    Blend, Extent, GenerationSettings, GridExecutor, Kernel, LayerGeometry, Pass, ScatteringRef,
    Table,
};
use glam::Vec4;
use log::{debug, trace};

use crate::context::GpuContext;
use crate::params::KernelParams;
use crate::shader::{ShaderError, ShaderLibrary};

const TABLE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const TEXEL_BYTES: u32 = 16;
const WORKGROUP_SIZE: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error("run() called before begin()")]
    NotStarted,

    #[error("{kernel} program was not prepared")]
    NotPrepared { kernel: Kernel },

    #[error("{kernel} pass is missing its {input} input")]
    MissingInput { kernel: Kernel, input: &'static str },

    #[error("{kernel} pass writes {expected} tables, got {actual}")]
    TargetCount {
        kernel: Kernel,
        expected: usize,
        actual: usize,
    },

    #[error("{kernel} pass needs a layer inside 0..{depth}, got {layer:?}")]
    Layer {
        kernel: Kernel,
        layer: Option<u32>,
        depth: u32,
    },

    #[error("{kernel} pass cannot run with {blend:?} blending")]
    Blend { kernel: Kernel, blend: Blend },

    #[error("table {label} of {extent:?} exceeds the device limit of {limit}")]
    TableTooLarge {
        label: String,
        extent: Extent,
        limit: u32,
    },

    #[error("table readback failed: {0}")]
    Readback(String),
}

/// A table resident on the GPU.
#[derive(Debug)]
pub struct GpuTable {
    label: String,
    extent: Extent,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl GpuTable {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

fn view_dimension(extent: Extent) -> wgpu::TextureViewDimension {
    if extent.is_3d() {
        wgpu::TextureViewDimension::D3
    } else {
        wgpu::TextureViewDimension::D2
    }
}

/// Table shapes bound by one kernel, in binding order after the parameters.
struct KernelLayout {
    inputs: &'static [wgpu::TextureViewDimension],
    outputs: &'static [wgpu::TextureViewDimension],
}

fn kernel_layout(kernel: Kernel) -> KernelLayout {
    use wgpu::TextureViewDimension::{D2, D3};
    let (inputs, outputs): (&'static [_], &'static [_]) = match kernel {
        Kernel::Transmittance => (&[], &[D2]),
        Kernel::DirectIrradiance => (&[D2], &[D2]),
        Kernel::SingleScattering => (&[D2], &[D3, D3]),
        Kernel::CopyIrradiance => (&[D2], &[D2]),
        Kernel::CopyInscatter => (&[D3, D3], &[D3]),
        Kernel::ScatteringDensity => (&[D2, D2, D3, D3], &[D3]),
        Kernel::IndirectIrradiance => (&[D3, D3], &[D2]),
        Kernel::MultipleScattering => (&[D2, D3], &[D3]),
        // The last input is the scratch copy of the target.
        Kernel::AccumulateIrradiance => (&[D2, D2], &[D2]),
        Kernel::AccumulateInscatter => (&[D3, D3], &[D3]),
    };
    KernelLayout { inputs, outputs }
}

/// Whether the kernel adds onto what the target already holds.
fn accumulates(kernel: Kernel) -> bool {
    matches!(
        kernel,
        Kernel::AccumulateIrradiance | Kernel::AccumulateInscatter
    )
}

fn require<T>(value: Option<T>, kernel: Kernel, input: &'static str) -> Result<T, GpuError> {
    value.ok_or(GpuError::MissingInput { kernel, input })
}

/// Rayleigh and Mie slots of a scattering source. Later orders bind the same
/// table twice.
fn scattering_pair<'a>(source: ScatteringRef<'a, GpuTable>) -> (&'a GpuTable, &'a GpuTable, bool) {
    match source {
        ScatteringRef::Single { rayleigh, mie } => (rayleigh, mie, true),
        ScatteringRef::Multiple(table) => (table, table, false),
    }
}

/// Input tables in binding order, and whether the source is first order.
fn resolve_inputs<'a>(pass: &Pass<'a, GpuTable>) -> Result<(Vec<&'a GpuTable>, bool), GpuError> {
    let kernel = pass.kernel;
    let inputs = &pass.inputs;
    let transmittance = || require(inputs.transmittance, kernel, "transmittance");
    let delta_e = || require(inputs.delta_e, kernel, "delta E");
    let delta_s = || require(inputs.delta_s, kernel, "delta S");

    Ok(match kernel {
        Kernel::Transmittance => (vec![], false),
        Kernel::DirectIrradiance | Kernel::SingleScattering => (vec![transmittance()?], false),
        Kernel::CopyIrradiance | Kernel::AccumulateIrradiance => (vec![delta_e()?], false),
        Kernel::CopyInscatter => match inputs.delta_s {
            Some(ScatteringRef::Single { rayleigh, mie }) => (vec![rayleigh, mie], true),
            _ => {
                return Err(GpuError::MissingInput {
                    kernel,
                    input: "single scattering",
                });
            }
        },
        Kernel::ScatteringDensity => {
            let (rayleigh, mie, first) = scattering_pair(delta_s()?);
            (vec![transmittance()?, delta_e()?, rayleigh, mie], first)
        }
        Kernel::IndirectIrradiance => {
            let (rayleigh, mie, first) = scattering_pair(delta_s()?);
            (vec![rayleigh, mie], first)
        }
        Kernel::MultipleScattering => (
            vec![
                transmittance()?,
                require(inputs.delta_j, kernel, "delta J")?,
            ],
            false,
        ),
        Kernel::AccumulateInscatter => match inputs.delta_s {
            Some(ScatteringRef::Multiple(delta_s)) => (vec![delta_s], false),
            _ => {
                return Err(GpuError::MissingInput {
                    kernel,
                    input: "multiple scattering",
                });
            }
        },
    })
}

struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

fn create_kernel_pipeline(device: &wgpu::Device, kernel: Kernel, module: &wgpu::ShaderModule) -> KernelPipeline {
    let layout = kernel_layout(kernel);
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<KernelParams>() as u64),
        },
        count: None,
    }];
    for &view_dimension in layout.inputs {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: entries.len() as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension,
                multisampled: false,
            },
            count: None,
        });
    }
    for &view_dimension in layout.outputs {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: entries.len() as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: TABLE_FORMAT,
                view_dimension,
            },
            count: None,
        });
    }

    let label = kernel.name();
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bind_group_layout],
        immediate_size: 0,
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some(label),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    KernelPipeline {
        pipeline,
        bind_group_layout,
    }
}

fn texel_copy(texture: &wgpu::Texture, z: u32) -> wgpu::TexelCopyTextureInfo<'_> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d { x: 0, y: 0, z },
        aspect: wgpu::TextureAspect::All,
    }
}

/// Generation backend running the WGSL kernels.
pub struct GpuExecutor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shaders: ShaderLibrary,
    pipelines: HashMap<Kernel, KernelPipeline>,
    params_buffer: wgpu::Buffer,
    /// Previous-contents copies for additive passes, one per extent.
    scratch: HashMap<Extent, GpuTable>,
    settings: Option<GenerationSettings>,
}

impl GpuExecutor {
    pub fn new(context: &GpuContext) -> Self {
        Self::with_shaders(context, ShaderLibrary::new())
    }

    /// Use a preconfigured library, e.g. one reading WGSL from disk.
    pub fn with_shaders(context: &GpuContext, shaders: ShaderLibrary) -> Self {
        let params_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aether-kernel-params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            shaders,
            pipelines: HashMap::new(),
            params_buffer,
            scratch: HashMap::new(),
            settings: None,
        }
    }

    fn create_table(&self, label: &str, extent: Extent) -> Result<GpuTable, GpuError> {
        let limits = self.device.limits();
        let limit = if extent.is_3d() {
            limits.max_texture_dimension_3d
        } else {
            limits.max_texture_dimension_2d
        };
        if extent.width.max(extent.height).max(extent.depth) > limit {
            return Err(GpuError::TableTooLarge {
                label: label.to_string(),
                extent,
                limit,
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: extent.depth,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: if extent.is_3d() {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format: TABLE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(view_dimension(extent)),
            ..Default::default()
        });
        Ok(GpuTable {
            label: label.to_string(),
            extent,
            texture,
            view,
        })
    }

    fn ensure_scratch(&mut self, extent: Extent) -> Result<(), GpuError> {
        if !self.scratch.contains_key(&extent) {
            let table = self.create_table("aether-scratch", extent)?;
            self.scratch.insert(extent, table);
        }
        Ok(())
    }

    fn check_targets(
        pass: &Pass<'_, GpuTable>,
        targets: &[&mut GpuTable],
        layer: Option<&LayerGeometry>,
    ) -> Result<Extent, GpuError> {
        let kernel = pass.kernel;
        if targets.len() != kernel.target_count() {
            return Err(GpuError::TargetCount {
                kernel,
                expected: kernel.target_count(),
                actual: targets.len(),
            });
        }
        let extent = targets[0].extent;
        if kernel.is_layered() {
            match layer {
                Some(geometry) if geometry.index < extent.depth => {}
                _ => {
                    return Err(GpuError::Layer {
                        kernel,
                        layer: layer.map(|g| g.index),
                        depth: extent.depth,
                    });
                }
            }
        }
        if accumulates(kernel) != (pass.blend == Blend::Additive) {
            return Err(GpuError::Blend {
                kernel,
                blend: pass.blend,
            });
        }
        Ok(extent)
    }
}

impl GridExecutor for GpuExecutor {
    type Table = GpuTable;
    type Error = GpuError;

    fn begin(&mut self, settings: &GenerationSettings) -> Result<(), GpuError> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn prepare(&mut self, kernel: Kernel) -> Result<(), GpuError> {
        if self.pipelines.contains_key(&kernel) {
            return Ok(());
        }
        let module = self.shaders.load_kernel(&self.device, kernel)?;
        let pipeline = create_kernel_pipeline(&self.device, kernel, &module);
        debug!("Built {} pipeline", kernel);
        self.pipelines.insert(kernel, pipeline);
        Ok(())
    }

    fn allocate(&mut self, label: &str, extent: Extent) -> Result<GpuTable, GpuError> {
        self.create_table(label, extent)
    }

    fn run(
        &mut self,
        pass: &Pass<'_, GpuTable>,
        targets: &mut [&mut GpuTable],
        layer: Option<&LayerGeometry>,
    ) -> Result<(), GpuError> {
        let kernel = pass.kernel;
        let extent = Self::check_targets(pass, targets, layer)?;
        let layer = if kernel.is_layered() { layer } else { None };
        let (mut inputs, first_order) = resolve_inputs(pass)?;
        let settings = self.settings.as_ref().ok_or(GpuError::NotStarted)?;
        let params = KernelParams::new(settings, layer, first_order);

        if accumulates(kernel) {
            self.ensure_scratch(extent)?;
        }
        let pipeline = self
            .pipelines
            .get(&kernel)
            .ok_or(GpuError::NotPrepared { kernel })?;

        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.name()),
            });

        let scratch = if accumulates(kernel) {
            self.scratch.get(&extent)
        } else {
            None
        };
        if let Some(scratch) = scratch {
            let z = layer.map_or(0, |g| g.index);
            encoder.copy_texture_to_texture(
                texel_copy(&targets[0].texture, z),
                texel_copy(&scratch.texture, z),
                wgpu::Extent3d {
                    width: extent.width,
                    height: extent.height,
                    depth_or_array_layers: if kernel.is_layered() { 1 } else { extent.depth },
                },
            );
            inputs.push(scratch);
        }

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.params_buffer.as_entire_binding(),
        }];
        for table in inputs.iter().copied().chain(targets.iter().map(|t| &**t)) {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: wgpu::BindingResource::TextureView(&table.view),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name()),
            layout: &pipeline.bind_group_layout,
            entries: &entries,
        });

        {
            let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            compute.set_pipeline(&pipeline.pipeline);
            compute.set_bind_group(0, &bind_group, &[]);
            compute.dispatch_workgroups(
                extent.width.div_ceil(WORKGROUP_SIZE),
                extent.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.queue.submit(Some(encoder.finish()));
        trace!("{} dispatched (layer {:?})", kernel, layer.map(|g| g.index));
        Ok(())
    }

    fn read_back(&mut self, table: &GpuTable) -> Result<Table, GpuError> {
        let extent = table.extent;
        let unpadded_row = extent.width * TEXEL_BYTES;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = unpadded_row.div_ceil(align) * align;
        let rows = extent.height * extent.depth;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aether-readback"),
            size: padded_row as u64 * rows as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("aether-readback"),
            });
        encoder.copy_texture_to_buffer(
            texel_copy(&table.texture, 0),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(extent.height),
                },
            },
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: extent.depth,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let mut texels = Vec::with_capacity(extent.len());
        {
            let mapped = buffer_slice.get_mapped_range();
            for row in mapped.chunks(padded_row as usize) {
                let row: Vec<[f32; 4]> = bytemuck::pod_collect_to_vec(&row[..unpadded_row as usize]);
                texels.extend(row.into_iter().map(Vec4::from_array));
            }
        }
        buffer.unmap();

        Table::from_texels(table.label.clone(), extent, texels).ok_or_else(|| {
            GpuError::Readback(format!("{} returned the wrong number of texels", table.label))
        })
    }

    fn finish(&mut self) -> Result<(), GpuError> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_scatter::{CpuExecutor, PhysicalParameters, TableGenerator};

    fn gpu() -> Option<GpuContext> {
        crate::context::init_gpu_context_blocking().ok()
    }

    fn settings() -> GenerationSettings {
        GenerationSettings::new(PhysicalParameters::earth(), 0.25, 2).unwrap()
    }

    fn max_difference(a: &Table, b: &Table) -> f32 {
        a.texels()
            .iter()
            .zip(b.texels())
            .map(|(x, y)| (*x - *y).truncate().abs().max_element())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_kernel_layouts_match_target_counts() {
        for kernel in Kernel::ALL {
            assert_eq!(
                kernel_layout(kernel).outputs.len(),
                kernel.target_count(),
                "{kernel}"
            );
        }
        assert!(accumulates(Kernel::AccumulateInscatter));
        assert!(!accumulates(Kernel::CopyInscatter));
    }

    #[test]
    fn test_run_before_begin_rejected() {
        let Some(context) = gpu() else {
            return;
        };
        let mut exec = GpuExecutor::new(&context);
        exec.prepare(Kernel::Transmittance).unwrap();
        let mut table = exec.allocate("t", Extent::new_2d(16, 8)).unwrap();
        let err = exec
            .run(
                &Pass::new(Kernel::Transmittance, Default::default()),
                &mut [&mut table],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GpuError::NotStarted));
    }

    #[test]
    fn test_fresh_table_reads_back_zero() {
        let Some(context) = gpu() else {
            return;
        };
        let mut exec = GpuExecutor::new(&context);
        let table = exec.allocate("zero", Extent::new_3d(5, 3, 2)).unwrap();
        let host = exec.read_back(&table).unwrap();
        assert_eq!(host.extent(), Extent::new_3d(5, 3, 2));
        assert!(host.texels().iter().all(|t| *t == Vec4::ZERO));
    }

    #[test]
    fn test_transmittance_matches_cpu() {
        let Some(context) = gpu() else {
            return;
        };
        let settings = settings();
        let c = settings.counts;
        let extent = Extent::new_2d(c.transmittance_width, c.transmittance_height);

        let mut exec = GpuExecutor::new(&context);
        exec.begin(&settings).unwrap();
        exec.prepare(Kernel::Transmittance).unwrap();
        let mut table = exec.allocate("transmittance", extent).unwrap();
        exec.run(
            &Pass::new(Kernel::Transmittance, Default::default()),
            &mut [&mut table],
            None,
        )
        .unwrap();
        let gpu_table = exec.read_back(&table).unwrap();

        let mut cpu = CpuExecutor::new();
        cpu.begin(&settings).unwrap();
        let mut expected = cpu.allocate("transmittance", extent).unwrap();
        cpu.run(
            &Pass::new(Kernel::Transmittance, Default::default()),
            &mut [&mut expected],
            None,
        )
        .unwrap();

        let diff = max_difference(&gpu_table, &expected);
        assert!(diff < 1e-3, "GPU transmittance differs by {diff}");
    }

    #[test]
    fn test_full_generation_close_to_cpu() {
        let Some(context) = gpu() else {
            return;
        };
        let generator = TableGenerator::new(settings()).unwrap();

        let mut exec = GpuExecutor::new(&context);
        let tables = generator.generate(&mut exec).unwrap();
        let gpu_irradiance = exec.read_back(&tables.irradiance).unwrap();
        let gpu_inscatter = exec.read_back(&tables.inscatter).unwrap();

        let cpu = generator.generate(&mut CpuExecutor::new()).unwrap();
        let (_, peak) = cpu.inscatter.rgb_range();
        let diff = max_difference(&gpu_inscatter, &cpu.inscatter);
        assert!(diff <= peak * 0.02 + 1e-4, "inscatter differs by {diff} (peak {peak})");

        let (_, peak) = cpu.irradiance.rgb_range();
        let diff = max_difference(&gpu_irradiance, &cpu.irradiance);
        assert!(diff <= peak * 0.02 + 1e-4, "irradiance differs by {diff} (peak {peak})");
    }

    #[test]
    fn test_accumulate_requires_additive_blend() {
        let Some(context) = gpu() else {
            return;
        };
        let settings = settings();
        let mut exec = GpuExecutor::new(&context);
        exec.begin(&settings).unwrap();
        exec.prepare(Kernel::AccumulateIrradiance).unwrap();
        let delta = exec.allocate("delta", Extent::new_2d(8, 8)).unwrap();
        let mut target = exec.allocate("target", Extent::new_2d(8, 8)).unwrap();
        let pass = Pass::new(
            Kernel::AccumulateIrradiance,
            aether_scatter::Inputs {
                delta_e: Some(&delta),
                ..Default::default()
            },
        );
        let err = exec.run(&pass, &mut [&mut target], None).unwrap_err();
        assert!(matches!(err, GpuError::Blend { .. }));
    }
}

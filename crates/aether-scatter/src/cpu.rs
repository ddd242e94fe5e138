//! Multi-threaded CPU backend.
//!
//! Rows of each output layer are spread over the rayon thread pool. Every
//! texel is computed independently, so results do not depend on scheduling.

use glam::Vec4;
use rayon::prelude::*;
use tracing::trace;

use crate::executor::{Blend, GridExecutor, Pass};
use crate::kernels::{self, Kernel, ScatteringRef};
use crate::params::GenerationSettings;
use crate::remap::LayerGeometry;
use crate::table::{Extent, Table};

/// Misuse of the CPU backend. These indicate a bug in the caller, not bad data.
#[derive(Debug, thiserror::Error)]
pub enum CpuError {
    #[error("run() called before begin()")]
    NotStarted,

    #[error("{kernel} pass is missing its {input} input")]
    MissingInput { kernel: Kernel, input: &'static str },

    #[error("{kernel} pass writes {expected} tables, got {actual}")]
    TargetCount {
        kernel: Kernel,
        expected: usize,
        actual: usize,
    },

    #[error("{kernel} pass targets have different extents")]
    ExtentMismatch { kernel: Kernel },

    #[error("{kernel} pass needs a layer inside 0..{depth}, got {layer:?}")]
    Layer {
        kernel: Kernel,
        layer: Option<u32>,
        depth: u32,
    },
}

/// [`GridExecutor`] that evaluates kernels with the shared Rust math.
#[derive(Debug, Default)]
pub struct CpuExecutor {
    settings: Option<GenerationSettings>,
}

impl CpuExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A pass with its inputs resolved.
enum Job<'a> {
    Transmittance,
    DirectIrradiance {
        transmittance: &'a Table,
    },
    SingleScattering {
        transmittance: &'a Table,
        geometry: LayerGeometry,
    },
    CopyIrradiance {
        delta_e: &'a Table,
    },
    CopyInscatter {
        rayleigh: &'a Table,
        mie: &'a Table,
        layer: u32,
    },
    ScatteringDensity {
        transmittance: &'a Table,
        delta_e: &'a Table,
        source: ScatteringRef<'a, Table>,
        geometry: LayerGeometry,
    },
    IndirectIrradiance {
        source: ScatteringRef<'a, Table>,
    },
    MultipleScattering {
        transmittance: &'a Table,
        delta_j: &'a Table,
        geometry: LayerGeometry,
    },
    AccumulateIrradiance {
        delta_e: &'a Table,
    },
    AccumulateInscatter {
        delta_s: &'a Table,
        geometry: LayerGeometry,
    },
}

fn require<T>(value: Option<T>, kernel: Kernel, input: &'static str) -> Result<T, CpuError> {
    value.ok_or(CpuError::MissingInput { kernel, input })
}

impl<'a> Job<'a> {
    fn resolve(pass: &Pass<'a, Table>, layer: Option<&LayerGeometry>) -> Result<Self, CpuError> {
        let kernel = pass.kernel;
        let inputs = &pass.inputs;
        let geometry = || {
            layer.copied().ok_or(CpuError::Layer {
                kernel,
                layer: None,
                depth: 0,
            })
        };

        Ok(match kernel {
            Kernel::Transmittance => Job::Transmittance,
            Kernel::DirectIrradiance => Job::DirectIrradiance {
                transmittance: require(inputs.transmittance, kernel, "transmittance")?,
            },
            Kernel::SingleScattering => Job::SingleScattering {
                transmittance: require(inputs.transmittance, kernel, "transmittance")?,
                geometry: geometry()?,
            },
            Kernel::CopyIrradiance => Job::CopyIrradiance {
                delta_e: require(inputs.delta_e, kernel, "delta E")?,
            },
            Kernel::CopyInscatter => match inputs.delta_s {
                Some(ScatteringRef::Single { rayleigh, mie }) => Job::CopyInscatter {
                    rayleigh,
                    mie,
                    layer: geometry()?.index,
                },
                _ => {
                    return Err(CpuError::MissingInput {
                        kernel,
                        input: "single scattering",
                    });
                }
            },
            Kernel::ScatteringDensity => Job::ScatteringDensity {
                transmittance: require(inputs.transmittance, kernel, "transmittance")?,
                delta_e: require(inputs.delta_e, kernel, "delta E")?,
                source: require(inputs.delta_s, kernel, "delta S")?,
                geometry: geometry()?,
            },
            Kernel::IndirectIrradiance => Job::IndirectIrradiance {
                source: require(inputs.delta_s, kernel, "delta S")?,
            },
            Kernel::MultipleScattering => Job::MultipleScattering {
                transmittance: require(inputs.transmittance, kernel, "transmittance")?,
                delta_j: require(inputs.delta_j, kernel, "delta J")?,
                geometry: geometry()?,
            },
            Kernel::AccumulateIrradiance => Job::AccumulateIrradiance {
                delta_e: require(inputs.delta_e, kernel, "delta E")?,
            },
            Kernel::AccumulateInscatter => match inputs.delta_s {
                Some(ScatteringRef::Multiple(delta_s)) => Job::AccumulateInscatter {
                    delta_s,
                    geometry: geometry()?,
                },
                _ => {
                    return Err(CpuError::MissingInput {
                        kernel,
                        input: "multiple scattering",
                    });
                }
            },
        })
    }

    fn texel(&self, settings: &GenerationSettings, x: u32, y: u32) -> [Vec4; 2] {
        let one = |v: Vec4| [v, Vec4::ZERO];
        match self {
            Job::Transmittance => one(kernels::transmittance_texel(settings, x, y)),
            Job::DirectIrradiance { transmittance } => {
                one(kernels::direct_irradiance_texel(settings, transmittance, x, y))
            }
            Job::SingleScattering {
                transmittance,
                geometry,
            } => {
                let (rayleigh, mie) =
                    kernels::single_scattering_texel(settings, transmittance, geometry, x, y);
                [rayleigh, mie]
            }
            Job::CopyIrradiance { delta_e } | Job::AccumulateIrradiance { delta_e } => {
                one(delta_e.get(x, y, 0))
            }
            Job::CopyInscatter {
                rayleigh,
                mie,
                layer,
            } => one(kernels::copy_inscatter_texel(
                rayleigh.get(x, y, *layer),
                mie.get(x, y, *layer),
            )),
            Job::ScatteringDensity {
                transmittance,
                delta_e,
                source,
                geometry,
            } => one(kernels::scattering_density_texel(
                settings,
                transmittance,
                delta_e,
                *source,
                geometry,
                x,
                y,
            )),
            Job::IndirectIrradiance { source } => {
                one(kernels::indirect_irradiance_texel(settings, *source, x, y))
            }
            Job::MultipleScattering {
                transmittance,
                delta_j,
                geometry,
            } => one(kernels::multiple_scattering_texel(
                settings,
                transmittance,
                delta_j,
                geometry,
                x,
                y,
            )),
            Job::AccumulateInscatter { delta_s, geometry } => {
                one(kernels::accumulate_inscatter_texel(
                    settings,
                    delta_s.get(x, y, geometry.index),
                    geometry,
                    x,
                    y,
                ))
            }
        }
    }
}

fn write(dst: &mut Vec4, value: Vec4, blend: Blend) {
    match blend {
        Blend::Replace => *dst = value,
        Blend::Additive => *dst += value,
    }
}

impl GridExecutor for CpuExecutor {
    type Table = Table;
    type Error = CpuError;

    fn begin(&mut self, settings: &GenerationSettings) -> Result<(), CpuError> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn prepare(&mut self, kernel: Kernel) -> Result<(), CpuError> {
        trace!(%kernel, "cpu kernel ready");
        Ok(())
    }

    fn allocate(&mut self, label: &str, extent: Extent) -> Result<Table, CpuError> {
        Ok(Table::new(label, extent))
    }

    fn run(
        &mut self,
        pass: &Pass<'_, Table>,
        targets: &mut [&mut Table],
        layer: Option<&LayerGeometry>,
    ) -> Result<(), CpuError> {
        let settings = self.settings.as_ref().ok_or(CpuError::NotStarted)?;
        let kernel = pass.kernel;

        if targets.len() != kernel.target_count() {
            return Err(CpuError::TargetCount {
                kernel,
                expected: kernel.target_count(),
                actual: targets.len(),
            });
        }
        let extent = targets[0].extent();
        if targets.iter().any(|t| t.extent() != extent) {
            return Err(CpuError::ExtentMismatch { kernel });
        }

        let z = if kernel.is_layered() {
            match layer {
                Some(g) if g.index < extent.depth => g.index,
                _ => {
                    return Err(CpuError::Layer {
                        kernel,
                        layer: layer.map(|g| g.index),
                        depth: extent.depth,
                    });
                }
            }
        } else {
            0
        };

        let job = Job::resolve(pass, layer)?;
        let blend = pass.blend;
        let width = extent.width as usize;

        match targets {
            [a] => a
                .layer_mut(z)
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, dst) in row.iter_mut().enumerate() {
                        let [v, _] = job.texel(settings, x as u32, y as u32);
                        write(dst, v, blend);
                    }
                }),
            [a, b] => a
                .layer_mut(z)
                .par_chunks_mut(width)
                .zip(b.layer_mut(z).par_chunks_mut(width))
                .enumerate()
                .for_each(|(y, (row_a, row_b))| {
                    for (x, (da, db)) in row_a.iter_mut().zip(row_b.iter_mut()).enumerate() {
                        let [va, vb] = job.texel(settings, x as u32, y as u32);
                        write(da, va, blend);
                        write(db, vb, blend);
                    }
                }),
            _ => {
                return Err(CpuError::TargetCount {
                    kernel,
                    expected: kernel.target_count(),
                    actual: targets.len(),
                });
            }
        }
        Ok(())
    }

    fn read_back(&mut self, table: &Table) -> Result<Table, CpuError> {
        Ok(table.clone())
    }
}

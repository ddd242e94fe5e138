//! Table generation: the fixed chain of passes that turns a parameter set
//! into transmittance, irradiance and inscattering tables.
//!
//! Working tables (delta E, delta S Rayleigh/Mie, delta J) live only inside
//! [`TableGenerator::generate`]. Each pass names its inputs and targets
//! explicitly, so the dependency order is visible in the code rather than in
//! draw order.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::executor::{GridExecutor, Inputs, Pass};
use crate::kernels::{Kernel, ScatteringRef};
use crate::params::{GenerationSettings, ParameterError};
use crate::ppm::{PpmFormat, save_ppm};
use crate::remap::{LayerGeometry, layer_to_height};
use crate::store::GeneratedTables;
use crate::table::Extent;

/// Errors that abort generation. None of them leave usable tables behind.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError<E> {
    #[error("invalid generation settings: {0}")]
    Parameters(#[from] ParameterError),

    #[error("failed to build {kernel} program: {source}")]
    Build {
        kernel: Kernel,
        #[source]
        source: E,
    },

    #[error("{kernel} pass failed: {source}")]
    Pass {
        kernel: Kernel,
        #[source]
        source: E,
    },

    #[error("backend error: {0}")]
    Backend(#[source] E),
}

/// Where and how to dump intermediate tables.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpOptions {
    pub dir: PathBuf,
    pub format: PpmFormat,
}

/// Per-order scratch tables, overwritten every scattering order.
struct WorkingTables<T> {
    delta_e: T,
    delta_s_rayleigh: T,
    delta_s_mie: T,
    delta_j: T,
}

/// Drives a [`GridExecutor`] through the generation passes.
#[derive(Debug, Clone)]
pub struct TableGenerator {
    settings: GenerationSettings,
    dump: Option<DumpOptions>,
}

impl TableGenerator {
    /// Validates `settings` up front so a bad parameter set never reaches a
    /// backend.
    pub fn new(settings: GenerationSettings) -> Result<Self, ParameterError> {
        settings.validate()?;
        Ok(Self {
            settings,
            dump: None,
        })
    }

    /// Dump tables as PPM images while generating.
    pub fn with_dump(mut self, dump: Option<DumpOptions>) -> Self {
        self.dump = dump;
        self
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Kernels a run with this order count needs.
    pub fn kernels(&self) -> &'static [Kernel] {
        if self.settings.scattering_orders > 1 {
            &Kernel::ALL
        } else {
            &Kernel::ALL[..5]
        }
    }

    /// Run every pass and return the persistent tables.
    ///
    /// Every program is built before the first pass runs, so a build failure
    /// aborts before any table is written.
    pub fn generate<E: GridExecutor>(
        &self,
        exec: &mut E,
    ) -> Result<GeneratedTables<E::Table>, GenerateError<E::Error>> {
        let started = Instant::now();
        let settings = &self.settings;
        let counts = settings.counts;
        let params = &settings.params;
        info!(
            orders = settings.scattering_orders,
            transmittance = ?(counts.transmittance_width, counts.transmittance_height),
            inscatter = ?(counts.scattering_width(), counts.mu, counts.r),
            "generating atmosphere tables"
        );

        exec.begin(settings).map_err(GenerateError::Backend)?;
        for &kernel in self.kernels() {
            exec.prepare(kernel)
                .map_err(|source| GenerateError::Build { kernel, source })?;
        }

        let transmittance_extent =
            Extent::new_2d(counts.transmittance_width, counts.transmittance_height);
        let irradiance_extent = Extent::new_2d(counts.irradiance_width, counts.irradiance_height);
        let scattering_extent = Extent::new_3d(counts.scattering_width(), counts.mu, counts.r);

        let mut alloc = |label: &str, extent| exec.allocate(label, extent);
        let mut transmittance = alloc("transmittance", transmittance_extent)
            .map_err(GenerateError::Backend)?;
        let mut irradiance = alloc("irradiance", irradiance_extent).map_err(GenerateError::Backend)?;
        let mut inscatter = alloc("inscatter", scattering_extent).map_err(GenerateError::Backend)?;
        let mut work = WorkingTables {
            delta_e: alloc("delta-e", irradiance_extent).map_err(GenerateError::Backend)?,
            delta_s_rayleigh: alloc("delta-s-rayleigh", scattering_extent)
                .map_err(GenerateError::Backend)?,
            delta_s_mie: alloc("delta-s-mie", scattering_extent).map_err(GenerateError::Backend)?,
            delta_j: alloc("delta-j", scattering_extent).map_err(GenerateError::Backend)?,
        };

        let layers: Vec<LayerGeometry> = (0..counts.r)
            .map(|layer| {
                layer_to_height(layer, counts.r, params.planet_radius, params.atmosphere_radius)
            })
            .collect();

        execute(
            exec,
            &layers,
            Pass::new(Kernel::Transmittance, Inputs::default()),
            &mut [&mut transmittance],
        )?;
        self.dump_table(exec, &transmittance, "transmittance");

        execute(
            exec,
            &layers,
            Pass::new(
                Kernel::DirectIrradiance,
                Inputs {
                    transmittance: Some(&transmittance),
                    ..Inputs::default()
                },
            ),
            &mut [&mut work.delta_e],
        )?;
        self.dump_table(exec, &work.delta_e, "delta-e-order-1");

        execute(
            exec,
            &layers,
            Pass::new(
                Kernel::SingleScattering,
                Inputs {
                    transmittance: Some(&transmittance),
                    ..Inputs::default()
                },
            ),
            &mut [&mut work.delta_s_rayleigh, &mut work.delta_s_mie],
        )?;

        execute(
            exec,
            &layers,
            Pass::new(
                Kernel::CopyIrradiance,
                Inputs {
                    delta_e: Some(&work.delta_e),
                    ..Inputs::default()
                },
            ),
            &mut [&mut irradiance],
        )?;

        execute(
            exec,
            &layers,
            Pass::new(
                Kernel::CopyInscatter,
                Inputs {
                    delta_s: Some(ScatteringRef::Single {
                        rayleigh: &work.delta_s_rayleigh,
                        mie: &work.delta_s_mie,
                    }),
                    ..Inputs::default()
                },
            ),
            &mut [&mut inscatter],
        )?;

        for order in 2..=settings.scattering_orders {
            debug!(order, "scattering order");
            let previous = if order == 2 {
                ScatteringRef::Single {
                    rayleigh: &work.delta_s_rayleigh,
                    mie: &work.delta_s_mie,
                }
            } else {
                ScatteringRef::Multiple(&work.delta_s_rayleigh)
            };

            execute(
                exec,
                &layers,
                Pass::new(
                    Kernel::ScatteringDensity,
                    Inputs {
                        transmittance: Some(&transmittance),
                        delta_e: Some(&work.delta_e),
                        delta_s: Some(previous),
                        ..Inputs::default()
                    },
                ),
                &mut [&mut work.delta_j],
            )?;

            execute(
                exec,
                &layers,
                Pass::new(
                    Kernel::IndirectIrradiance,
                    Inputs {
                        delta_s: Some(previous),
                        ..Inputs::default()
                    },
                ),
                &mut [&mut work.delta_e],
            )?;

            execute(
                exec,
                &layers,
                Pass::new(
                    Kernel::MultipleScattering,
                    Inputs {
                        transmittance: Some(&transmittance),
                        delta_j: Some(&work.delta_j),
                        ..Inputs::default()
                    },
                ),
                &mut [&mut work.delta_s_rayleigh],
            )?;

            execute(
                exec,
                &layers,
                Pass::new(
                    Kernel::AccumulateIrradiance,
                    Inputs {
                        delta_e: Some(&work.delta_e),
                        ..Inputs::default()
                    },
                )
                .additive(),
                &mut [&mut irradiance],
            )?;

            execute(
                exec,
                &layers,
                Pass::new(
                    Kernel::AccumulateInscatter,
                    Inputs {
                        delta_s: Some(ScatteringRef::Multiple(&work.delta_s_rayleigh)),
                        ..Inputs::default()
                    },
                )
                .additive(),
                &mut [&mut inscatter],
            )?;

            self.dump_table(exec, &work.delta_e, &format!("delta-e-order-{order}"));
        }

        exec.finish().map_err(GenerateError::Backend)?;
        self.dump_table(exec, &irradiance, "irradiance");
        self.dump_table(exec, &inscatter, "inscatter");

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "atmosphere tables generated"
        );
        Ok(GeneratedTables {
            transmittance,
            irradiance,
            inscatter,
        })
    }

    /// Best-effort PPM dump. 3D tables dump their ground layer. Failures are
    /// logged and otherwise ignored.
    fn dump_table<E: GridExecutor>(&self, exec: &mut E, table: &E::Table, name: &str) {
        let Some(dump) = &self.dump else {
            return;
        };
        let host = match exec.read_back(table) {
            Ok(host) => host,
            Err(e) => {
                warn!(table = name, error = %e, "table readback for dump failed");
                return;
            }
        };
        let path = dump.dir.join(format!("{name}.ppm"));
        match save_ppm(&path, &host, 0, dump.format) {
            Ok(()) => debug!(path = %path.display(), "dumped table"),
            Err(e) => warn!(error = %e, "table dump failed"),
        }
    }
}

/// Issue one pass, looping over layers for 3D passes.
fn execute<E: GridExecutor>(
    exec: &mut E,
    layers: &[LayerGeometry],
    pass: Pass<'_, E::Table>,
    targets: &mut [&mut E::Table],
) -> Result<(), GenerateError<E::Error>> {
    let kernel = pass.kernel;
    debug!(%kernel, blend = ?pass.blend, "pass");
    let wrap = |source| GenerateError::Pass { kernel, source };

    if kernel.is_layered() {
        for geometry in layers {
            exec.run(&pass, targets, Some(geometry)).map_err(wrap)?;
        }
        Ok(())
    } else {
        exec.run(&pass, targets, None).map_err(wrap)
    }
}

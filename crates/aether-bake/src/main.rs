//! Offline table baker.
//!
//! Loads `config.ron`, applies CLI overrides, generates the atmosphere tables
//! on the configured backend and reports their ranges. With `--save-tables`
//! every table layer is written as a PPM image.
//!
//! Run with `cargo run -p aether-bake -- --texture-scale 0.5 --backend gpu`.

use std::process::ExitCode;

use aether_config::{Backend, CliArgs, Config, default_config_dir};
use aether_gpu::{GpuExecutor, init_gpu_context_blocking};
use aether_runtime::AtmosphereSettings;
use aether_scatter::{CpuExecutor, GridExecutor, TableGenerator};
use clap::Parser;
use tracing::{error, info, warn};

fn bake<E: GridExecutor>(generator: &TableGenerator, exec: &mut E) -> Result<(), String> {
    let tables = generator.generate(exec).map_err(|e| e.to_string())?;
    for table in [&tables.transmittance, &tables.irradiance, &tables.inscatter] {
        let table = exec.read_back(table).map_err(|e| e.to_string())?;
        let (min, max) = table.rgb_range();
        info!(
            table = table.label(),
            extent = ?table.extent(),
            min,
            max,
            "table baked"
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    aether_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let settings = match AtmosphereSettings::from_config(&config) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "invalid atmosphere configuration");
            return ExitCode::FAILURE;
        }
    };
    let generator = match TableGenerator::new(settings.generation.clone()) {
        Ok(generator) => generator.with_dump(settings.dump.clone()),
        Err(e) => {
            error!(error = %e, "invalid generation settings");
            return ExitCode::FAILURE;
        }
    };
    if let Some(dump) = &settings.dump {
        info!(dir = %dump.dir.display(), "dumping tables");
    }

    let result = match config.tables.backend {
        Backend::Cpu => bake(&generator, &mut CpuExecutor::new()),
        Backend::Gpu => match init_gpu_context_blocking() {
            Ok(context) => bake(&generator, &mut GpuExecutor::new(&context)),
            Err(e) => {
                warn!(error = %e, "GPU unavailable, generating on the CPU");
                bake(&generator, &mut CpuExecutor::new())
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "table generation failed");
            ExitCode::FAILURE
        }
    }
}

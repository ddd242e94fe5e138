//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::{Backend, Config};

/// Aether command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "aether-bake", about = "Precompute atmospheric scattering tables")]
pub struct CliArgs {
    /// Global texture/step scale factor.
    #[arg(long)]
    pub texture_scale: Option<f32>,

    /// Number of scattering orders to accumulate.
    #[arg(long)]
    pub orders: Option<u32>,

    /// Generation backend (cpu or gpu).
    #[arg(long, value_parser = parse_backend)]
    pub backend: Option<Backend>,

    /// Dump generated tables as PPM images.
    #[arg(long)]
    pub save_tables: Option<bool>,

    /// Output directory for table dumps.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Use hard (flat) eclipse shadows.
    #[arg(long)]
    pub hard_shadows: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_backend(s: &str) -> Result<Backend, String> {
    match s.to_ascii_lowercase().as_str() {
        "cpu" => Ok(Backend::Cpu),
        "gpu" => Ok(Backend::Gpu),
        other => Err(format!("unknown backend '{other}', expected cpu or gpu")),
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(scale) = args.texture_scale {
            self.tables.texture_scale = scale;
        }
        if let Some(orders) = args.orders {
            self.tables.scattering_orders = orders;
        }
        if let Some(backend) = args.backend {
            self.tables.backend = backend;
        }
        if let Some(save) = args.save_tables {
            self.tables.save_tables = save;
        }
        if let Some(ref dir) = args.output {
            self.tables.output_dir = dir.clone();
        }
        if let Some(hard) = args.hard_shadows {
            self.shadows.hard_shadows = hard;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            texture_scale: Some(0.5),
            orders: Some(2),
            backend: Some(Backend::Gpu),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.tables.texture_scale, 0.5);
        assert_eq!(config.tables.scattering_orders, 2);
        assert_eq!(config.tables.backend, Backend::Gpu);
        // Non-overridden fields retain defaults
        assert!(!config.tables.save_tables);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "aether-bake",
            "--backend",
            "GPU",
            "--orders",
            "3",
            "--save-tables",
            "true",
            "--output",
            "/tmp/out",
        ]);
        assert_eq!(args.backend, Some(Backend::Gpu));
        assert_eq!(args.orders, Some(3));
        assert_eq!(args.save_tables, Some(true));
        assert_eq!(args.output, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_cli_rejects_unknown_backend() {
        let result = CliArgs::try_parse_from(["aether-bake", "--backend", "tpu"]);
        assert!(result.is_err());
    }
}

//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_NAME: &str = "aether";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Physical description of the planet and its atmosphere.
    pub atmosphere: AtmosphereConfig,
    /// Lookup-table resolution and generation settings.
    pub tables: TablesConfig,
    /// Eclipse shadow casters.
    pub shadows: ShadowsConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Planet and atmosphere constants. Lengths are in kilometres, coefficients
/// in inverse kilometres.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtmosphereConfig {
    /// Ground radius `Rg`.
    pub planet_radius_km: f32,
    /// Outer atmosphere radius `Rt`.
    pub atmosphere_radius_km: f32,
    /// Average ground albedo used for the ground bounce term.
    pub average_ground_reflectance: f32,
    /// Radiance emitted by the ground itself (night side glow).
    pub ground_radiance_emission: f32,
    pub rayleigh: RayleighConfig,
    pub mie: MieConfig,
    pub ozone: OzoneConfig,
    pub sun: SunConfig,
    /// Final blend factor of the atmosphere over the scene (0.0 - 1.0).
    pub opacity: f32,
}

/// Rayleigh (molecular) scattering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RayleighConfig {
    pub height_scale_km: f32,
    pub scattering: [f32; 3],
}

/// Mie (aerosol) scattering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MieConfig {
    pub height_scale_km: f32,
    pub scattering: [f32; 3],
    pub extinction: [f32; 3],
    /// Cornette-Shanks asymmetry constant `g`, strictly inside (-1, 1).
    pub phase_constant: f32,
}

/// Ozone absorption layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OzoneConfig {
    pub enabled: bool,
    pub height_scale_km: f32,
    pub extinction: [f32; 3],
}

/// Sun as seen from the planet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SunConfig {
    /// Radiance intensity multiplier.
    pub radiance: f32,
    /// Apparent angular diameter in degrees.
    pub angular_size_deg: f32,
    /// Lock the sun direction to the camera direction (inspection mode).
    pub following_camera: bool,
}

/// Which backend executes table generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Backend {
    /// Multi-threaded CPU loop.
    #[default]
    Cpu,
    /// wgpu compute passes.
    Gpu,
}

/// Lookup-table settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TablesConfig {
    /// Global multiplier on every table resolution and integration step count.
    pub texture_scale: f32,
    /// Highest scattering order to accumulate (1 = single scattering only).
    pub scattering_orders: u32,
    pub backend: Backend,
    /// Dump every generated table as a PPM image.
    pub save_tables: bool,
    /// Write float triplets instead of 0-255 integers in PPM dumps.
    pub float_output: bool,
    /// Directory that receives PPM dumps.
    pub output_dir: PathBuf,
}

/// Eclipse shadow settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowsConfig {
    /// Use flat 0.5 attenuation instead of the soft falloff.
    pub hard_shadows: bool,
    /// Caster pairs in priority order.
    pub casters: Vec<ShadowCasterConfig>,
}

/// One (light source, shadow caster) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowCasterConfig {
    pub source: String,
    pub source_radius_km: f64,
    pub caster: String,
    pub caster_radius_km: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for AtmosphereConfig {
    fn default() -> Self {
        Self {
            planet_radius_km: 6371.0,
            atmosphere_radius_km: 6471.0,
            average_ground_reflectance: 0.1,
            ground_radiance_emission: 0.0,
            rayleigh: RayleighConfig::default(),
            mie: MieConfig::default(),
            ozone: OzoneConfig::default(),
            sun: SunConfig::default(),
            opacity: 1.0,
        }
    }
}

impl Default for RayleighConfig {
    fn default() -> Self {
        Self {
            height_scale_km: 8.0,
            scattering: [5.8e-3, 1.35e-2, 3.31e-2],
        }
    }
}

impl Default for MieConfig {
    fn default() -> Self {
        Self {
            height_scale_km: 1.2,
            scattering: [4.0e-3, 4.0e-3, 4.0e-3],
            extinction: [4.44e-3, 4.44e-3, 4.44e-3],
            phase_constant: 0.76,
        }
    }
}

impl Default for OzoneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            height_scale_km: 8.0,
            extinction: [3.426e-4, 8.298e-4, 0.356e-4],
        }
    }
}

impl Default for SunConfig {
    fn default() -> Self {
        Self {
            radiance: 50.0,
            angular_size_deg: 0.3,
            following_camera: false,
        }
    }
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            texture_scale: 1.0,
            scattering_orders: 4,
            backend: Backend::Cpu,
            save_tables: false,
            float_output: false,
            output_dir: PathBuf::from("tables"),
        }
    }
}

impl Default for ShadowCasterConfig {
    fn default() -> Self {
        Self {
            source: "SUN".to_string(),
            source_radius_km: 696_300.0,
            caster: "MOON".to_string(),
            caster_radius_km: 1737.4,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Platform configuration directory for Aether (`<config_dir>/aether`), if the
/// OS exposes one.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(4)
            .separate_tuple_members(false)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Re-read `config.ron`. Returns `Some(new_config)` if anything changed.
    ///
    /// A changed `atmosphere` or `tables` section means the lookup tables must
    /// be regenerated; see [`Config::requires_regeneration`].
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Whether switching from `self` to `other` invalidates generated tables.
    ///
    /// Opacity, sun following and shadow settings are applied per frame and
    /// never force a regeneration.
    pub fn requires_regeneration(&self, other: &Config) -> bool {
        let mut a = self.atmosphere.clone();
        let mut b = other.atmosphere.clone();
        a.opacity = 0.0;
        b.opacity = 0.0;
        a.sun.following_camera = false;
        b.sun.following_camera = false;
        a != b
            || self.tables.texture_scale != other.tables.texture_scale
            || self.tables.scattering_orders != other.tables.scattering_orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(4))
                .unwrap();
        assert!(!ron_str.is_empty());
        assert!(ron_str.contains("planet_radius_km: 6371.0"));
        assert!(ron_str.contains("scattering_orders: 4"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.shadows.casters.push(ShadowCasterConfig::default());
        config.tables.backend = Backend::Gpu;
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_field_uses_default() {
        // Config missing the `tables` section entirely
        let ron_str = "(atmosphere: (), shadows: (), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.tables, TablesConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let ron_str = "(atmosphere: (mie: (phase_constant: 0.8)))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.atmosphere.mie.phase_constant, 0.8);
        assert_eq!(config.atmosphere.mie.height_scale_km, 1.2);
        assert_eq!(config.atmosphere.planet_radius_km, 6371.0);
    }

    #[test]
    fn test_extra_field_ignored() {
        let ron_str = "(future_setting: true)";
        let result: Result<Config, _> = ron::from_str(ron_str);
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.atmosphere.atmosphere_radius_km = 6420.0;
        config.tables.texture_scale = 0.5;
        config.shadows.casters.push(ShadowCasterConfig {
            source: "SUN".to_string(),
            source_radius_km: 696_300.0,
            caster: "EARTH".to_string(),
            caster_radius_km: 6371.0,
        });

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.tables.scattering_orders = 2;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().tables.scattering_orders, 2);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_regeneration_only_for_table_inputs() {
        let base = Config::default();

        let mut cosmetic = base.clone();
        cosmetic.atmosphere.opacity = 0.5;
        cosmetic.atmosphere.sun.following_camera = true;
        cosmetic.shadows.hard_shadows = true;
        cosmetic.tables.save_tables = true;
        assert!(!base.requires_regeneration(&cosmetic));

        let mut physical = base.clone();
        physical.atmosphere.rayleigh.height_scale_km = 7.0;
        assert!(base.requires_regeneration(&physical));

        let mut resolution = base.clone();
        resolution.tables.texture_scale = 2.0;
        assert!(base.requires_regeneration(&resolution));
    }
}

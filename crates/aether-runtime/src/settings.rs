//! Conversion of the on-disk configuration into validated domain settings.

use aether_config::{AtmosphereConfig, Config};
use aether_scatter::{DumpOptions, GenerationSettings, ParameterError, PhysicalParameters, PpmFormat};
use glam::Vec3;

use crate::shadow::{ShadowCasterConfiguration, ShadowMode};
use crate::uniforms::MAX_SHADOW_CASTERS;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Parameters(#[from] ParameterError),

    #[error("opacity must lie in [0, 1], got {0}")]
    Opacity(f32),

    #[error("{count} shadow casters configured, at most {max} are supported")]
    TooManyCasters { count: usize, max: usize },

    #[error("shadow caster entry {index} has an empty body name")]
    EmptyBody { index: usize },
}

/// Everything an atmosphere instance is configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphereSettings {
    pub generation: GenerationSettings,
    pub opacity: f32,
    pub sun_following_camera: bool,
    pub shadow_mode: ShadowMode,
    /// Caster list in priority order.
    pub casters: Vec<ShadowCasterConfiguration>,
    /// PPM dumps during generation, when enabled.
    pub dump: Option<DumpOptions>,
}

/// Physical parameters from the `atmosphere` section. Angles become radians.
pub fn physical_parameters(config: &AtmosphereConfig) -> PhysicalParameters {
    PhysicalParameters {
        planet_radius: config.planet_radius_km,
        atmosphere_radius: config.atmosphere_radius_km,
        rayleigh_height_scale: config.rayleigh.height_scale_km,
        rayleigh_scattering: Vec3::from_array(config.rayleigh.scattering),
        mie_height_scale: config.mie.height_scale_km,
        mie_scattering: Vec3::from_array(config.mie.scattering),
        mie_extinction: Vec3::from_array(config.mie.extinction),
        mie_phase_constant: config.mie.phase_constant,
        ozone_enabled: config.ozone.enabled,
        ozone_height_scale: config.ozone.height_scale_km,
        ozone_extinction: Vec3::from_array(config.ozone.extinction),
        average_ground_reflectance: config.average_ground_reflectance,
        ground_radiance_emission: config.ground_radiance_emission,
        sun_radiance: config.sun.radiance,
        sun_angular_size: config.sun.angular_size_deg.to_radians(),
    }
}

impl AtmosphereSettings {
    pub fn from_config(config: &Config) -> Result<Self, SettingsError> {
        let generation = GenerationSettings::new(
            physical_parameters(&config.atmosphere),
            config.tables.texture_scale,
            config.tables.scattering_orders,
        )?;

        let opacity = config.atmosphere.opacity;
        if !(0.0..=1.0).contains(&opacity) {
            return Err(SettingsError::Opacity(opacity));
        }

        let casters = &config.shadows.casters;
        if casters.len() > MAX_SHADOW_CASTERS {
            return Err(SettingsError::TooManyCasters {
                count: casters.len(),
                max: MAX_SHADOW_CASTERS,
            });
        }
        let casters = casters
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                if entry.source.trim().is_empty() || entry.caster.trim().is_empty() {
                    return Err(SettingsError::EmptyBody { index });
                }
                Ok(ShadowCasterConfiguration {
                    source: entry.source.clone(),
                    source_radius_km: entry.source_radius_km,
                    caster: entry.caster.clone(),
                    caster_radius_km: entry.caster_radius_km,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dump = config.tables.save_tables.then(|| DumpOptions {
            dir: config.tables.output_dir.clone(),
            format: if config.tables.float_output {
                PpmFormat::Float
            } else {
                PpmFormat::Integer
            },
        });

        Ok(Self {
            generation,
            opacity,
            sun_following_camera: config.atmosphere.sun.following_camera,
            shadow_mode: ShadowMode::from_hard_flag(config.shadows.hard_shadows),
            casters,
            dump,
        })
    }

    /// Whether switching to `other` invalidates the generated tables.
    pub fn requires_regeneration(&self, other: &AtmosphereSettings) -> bool {
        self.generation != other.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_config::ShadowCasterConfig;

    #[test]
    fn test_default_config_converts() {
        let settings = AtmosphereSettings::from_config(&Config::default()).unwrap();
        assert_eq!(settings.generation.params.planet_radius, 6371.0);
        assert_eq!(settings.generation.scattering_orders, 4);
        assert_eq!(settings.shadow_mode, ShadowMode::Soft);
        assert!(settings.casters.is_empty());
        assert!(settings.dump.is_none());
    }

    #[test]
    fn test_sun_size_converted_to_radians() {
        let mut config = Config::default();
        config.atmosphere.sun.angular_size_deg = 180.0;
        let settings = AtmosphereSettings::from_config(&config).unwrap();
        let size = settings.generation.params.sun_angular_size;
        assert!((size - std::f32::consts::PI).abs() < 1e-6, "got {size}");
    }

    #[test]
    fn test_inverted_radii_rejected() {
        let mut config = Config::default();
        config.atmosphere.atmosphere_radius_km = 6000.0;
        let err = AtmosphereSettings::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Parameters(ParameterError::InvertedRadii { .. })
        ));
    }

    #[test]
    fn test_zero_orders_rejected() {
        let mut config = Config::default();
        config.tables.scattering_orders = 0;
        assert!(AtmosphereSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_too_many_casters_rejected() {
        let mut config = Config::default();
        config.shadows.casters = vec![ShadowCasterConfig::default(); MAX_SHADOW_CASTERS + 1];
        assert_eq!(
            AtmosphereSettings::from_config(&config).unwrap_err(),
            SettingsError::TooManyCasters {
                count: MAX_SHADOW_CASTERS + 1,
                max: MAX_SHADOW_CASTERS,
            }
        );
    }

    #[test]
    fn test_empty_body_name_rejected() {
        let mut config = Config::default();
        config.shadows.casters = vec![
            ShadowCasterConfig::default(),
            ShadowCasterConfig {
                caster: " ".into(),
                ..ShadowCasterConfig::default()
            },
        ];
        assert_eq!(
            AtmosphereSettings::from_config(&config).unwrap_err(),
            SettingsError::EmptyBody { index: 1 }
        );
    }

    #[test]
    fn test_save_tables_enables_dump() {
        let mut config = Config::default();
        config.tables.save_tables = true;
        config.tables.float_output = true;
        config.tables.output_dir = "out".into();
        let dump = AtmosphereSettings::from_config(&config).unwrap().dump.unwrap();
        assert_eq!(dump.dir, std::path::PathBuf::from("out"));
        assert_eq!(dump.format, PpmFormat::Float);
    }

    #[test]
    fn test_runtime_only_changes_keep_tables() {
        let base = AtmosphereSettings::from_config(&Config::default()).unwrap();

        let mut config = Config::default();
        config.atmosphere.opacity = 0.5;
        config.shadows.hard_shadows = true;
        let runtime_only = AtmosphereSettings::from_config(&config).unwrap();
        assert!(!base.requires_regeneration(&runtime_only));

        config.atmosphere.mie.phase_constant = 0.5;
        let physical = AtmosphereSettings::from_config(&config).unwrap();
        assert!(base.requires_regeneration(&physical));
    }
}

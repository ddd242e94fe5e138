//! Physical parameter set and sample-count configuration.
//!
//! Lengths are in kilometres and coefficients in inverse kilometres, matching
//! the units the lookup tables are generated in.

use glam::Vec3;

/// Errors raised when a parameter set or sample-count configuration is invalid.
///
/// Invalid values are rejected, never clamped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    /// Planet radius must be strictly positive.
    #[error("planet radius must be > 0, got {0}")]
    PlanetRadius(f32),

    /// The atmosphere must extend above the ground.
    #[error("atmosphere radius {atmosphere} must exceed planet radius {planet}")]
    InvertedRadii { planet: f32, atmosphere: f32 },

    /// A density profile scale height is zero, negative or not finite.
    #[error("{name} scale height must be > 0, got {value}")]
    ScaleHeight { name: &'static str, value: f32 },

    /// A scattering or extinction coefficient is negative or not finite.
    #[error("{name} coefficient must be non-negative, got {value:?}")]
    Coefficient { name: &'static str, value: [f32; 3] },

    /// Cornette-Shanks `g` outside the open interval (-1, 1).
    #[error("mie phase constant must lie in (-1, 1), got {0}")]
    PhaseConstant(f32),

    /// A scalar that must be non-negative is not.
    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f32 },

    /// Every table axis needs at least two samples to interpolate.
    #[error("{axis} sample count must be >= 2, got {value}")]
    SampleCount { axis: &'static str, value: u32 },

    /// The view-angle axis is split in two halves of at least two samples.
    #[error("mu sample count must be even and >= 4, got {0}")]
    MuSamples(u32),

    /// Texture scale factor must be finite and strictly positive.
    #[error("texture scale must be > 0, got {0}")]
    TextureScale(f32),

    /// At least single scattering has to be generated.
    #[error("scattering order count must be >= 1, got {0}")]
    ScatteringOrders(u32),
}

/// Planet and atmosphere constants.
///
/// Built once from configuration and left untouched until a parameter change
/// triggers a full table regeneration.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalParameters {
    /// Ground radius `Rg`.
    pub planet_radius: f32,
    /// Top-of-atmosphere radius `Rt`.
    pub atmosphere_radius: f32,
    /// Rayleigh scale height `HR`.
    pub rayleigh_height_scale: f32,
    pub rayleigh_scattering: Vec3,
    /// Mie scale height `HM`.
    pub mie_height_scale: f32,
    pub mie_scattering: Vec3,
    pub mie_extinction: Vec3,
    /// Cornette-Shanks asymmetry `g`.
    pub mie_phase_constant: f32,
    pub ozone_enabled: bool,
    /// Ozone scale height `HO`, only checked when ozone is enabled.
    pub ozone_height_scale: f32,
    pub ozone_extinction: Vec3,
    pub average_ground_reflectance: f32,
    pub ground_radiance_emission: f32,
    pub sun_radiance: f32,
    /// Apparent sun diameter in radians.
    pub sun_angular_size: f32,
}

impl PhysicalParameters {
    /// Earth-like preset: Rayleigh and Mie scattering, no ozone.
    pub fn earth() -> Self {
        Self {
            planet_radius: 6371.0,
            atmosphere_radius: 6471.0,
            rayleigh_height_scale: 8.0,
            rayleigh_scattering: Vec3::new(5.8e-3, 1.35e-2, 3.31e-2),
            mie_height_scale: 1.2,
            mie_scattering: Vec3::splat(4.0e-3),
            mie_extinction: Vec3::splat(4.0e-3 / 0.9),
            mie_phase_constant: 0.76,
            ozone_enabled: false,
            ozone_height_scale: 8.0,
            ozone_extinction: Vec3::new(3.426e-4, 8.298e-4, 0.356e-4),
            average_ground_reflectance: 0.1,
            ground_radiance_emission: 0.0,
            sun_radiance: 50.0,
            sun_angular_size: 0.3_f32.to_radians(),
        }
    }

    /// Reject values outside the physically meaningful domain.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !(self.planet_radius > 0.0) || !self.planet_radius.is_finite() {
            return Err(ParameterError::PlanetRadius(self.planet_radius));
        }
        if !(self.atmosphere_radius > self.planet_radius) || !self.atmosphere_radius.is_finite() {
            return Err(ParameterError::InvertedRadii {
                planet: self.planet_radius,
                atmosphere: self.atmosphere_radius,
            });
        }

        check_height("rayleigh", self.rayleigh_height_scale)?;
        check_height("mie", self.mie_height_scale)?;
        if self.ozone_enabled {
            check_height("ozone", self.ozone_height_scale)?;
        }

        check_coefficient("rayleigh scattering", self.rayleigh_scattering)?;
        check_coefficient("mie scattering", self.mie_scattering)?;
        check_coefficient("mie extinction", self.mie_extinction)?;
        check_coefficient("ozone extinction", self.ozone_extinction)?;

        if !(self.mie_phase_constant > -1.0 && self.mie_phase_constant < 1.0) {
            return Err(ParameterError::PhaseConstant(self.mie_phase_constant));
        }

        for (name, value) in [
            ("average ground reflectance", self.average_ground_reflectance),
            ("ground radiance emission", self.ground_radiance_emission),
            ("sun radiance", self.sun_radiance),
            ("sun angular size", self.sun_angular_size),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ParameterError::Negative { name, value });
            }
        }
        Ok(())
    }

    /// Ozone extinction if the layer is enabled, zero otherwise.
    pub fn effective_ozone_extinction(&self) -> Vec3 {
        if self.ozone_enabled {
            self.ozone_extinction
        } else {
            Vec3::ZERO
        }
    }
}

fn check_height(name: &'static str, value: f32) -> Result<(), ParameterError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ParameterError::ScaleHeight { name, value })
    }
}

fn check_coefficient(name: &'static str, value: Vec3) -> Result<(), ParameterError> {
    if value.is_finite() && value.min_element() >= 0.0 {
        Ok(())
    } else {
        Err(ParameterError::Coefficient {
            name,
            value: value.to_array(),
        })
    }
}

/// Nominal table resolutions at texture scale 1.
pub const TRANSMITTANCE_SIZE: (u32, u32) = (256, 64);
pub const IRRADIANCE_SIZE: (u32, u32) = (64, 16);
pub const SAMPLES_R: u32 = 32;
pub const SAMPLES_MU: u32 = 128;
pub const SAMPLES_MU_S: u32 = 32;
pub const SAMPLES_NU: u32 = 8;

/// Integer resolutions of every table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCounts {
    pub transmittance_width: u32,
    pub transmittance_height: u32,
    pub irradiance_width: u32,
    pub irradiance_height: u32,
    /// Altitude samples: depth of the 3D tables.
    pub r: u32,
    /// View-angle samples: height of the 3D tables.
    pub mu: u32,
    /// Sun-angle samples per `nu` slab.
    pub mu_s: u32,
    /// Number of `nu` slabs packed along the 3D table width.
    pub nu: u32,
}

impl Default for SampleCounts {
    fn default() -> Self {
        Self {
            transmittance_width: TRANSMITTANCE_SIZE.0,
            transmittance_height: TRANSMITTANCE_SIZE.1,
            irradiance_width: IRRADIANCE_SIZE.0,
            irradiance_height: IRRADIANCE_SIZE.1,
            r: SAMPLES_R,
            mu: SAMPLES_MU,
            mu_s: SAMPLES_MU_S,
            nu: SAMPLES_NU,
        }
    }
}

impl SampleCounts {
    /// Nominal resolutions multiplied by `scale`. The `mu` axis is rounded to
    /// an even count.
    pub fn scaled(scale: f32) -> Result<Self, ParameterError> {
        check_scale(scale)?;
        let s = |base: u32| (base as f32 * scale).round() as u32;
        let counts = Self {
            transmittance_width: s(TRANSMITTANCE_SIZE.0),
            transmittance_height: s(TRANSMITTANCE_SIZE.1),
            irradiance_width: s(IRRADIANCE_SIZE.0),
            irradiance_height: s(IRRADIANCE_SIZE.1),
            r: s(SAMPLES_R),
            mu: 2 * (SAMPLES_MU as f32 * scale * 0.5).round() as u32,
            mu_s: s(SAMPLES_MU_S),
            nu: s(SAMPLES_NU),
        };
        counts.validate()?;
        Ok(counts)
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        for (axis, value) in [
            ("transmittance width", self.transmittance_width),
            ("transmittance height", self.transmittance_height),
            ("irradiance width", self.irradiance_width),
            ("irradiance height", self.irradiance_height),
            ("r", self.r),
            ("mu_s", self.mu_s),
            ("nu", self.nu),
        ] {
            if value < 2 {
                return Err(ParameterError::SampleCount { axis, value });
            }
        }
        if self.mu < 4 || self.mu % 2 != 0 {
            return Err(ParameterError::MuSamples(self.mu));
        }
        Ok(())
    }

    /// Width of the 3D tables: one `mu_s` run per `nu` slab.
    pub fn scattering_width(&self) -> u32 {
        self.mu_s * self.nu
    }
}

/// Fixed integration step counts, scaled with the texture scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrationSteps {
    /// Trapezoid steps for optical depth.
    pub optical_depth: u32,
    /// Trapezoid steps along eye rays for the inscattering passes.
    pub inscatter: u32,
    /// Polar samples of the sphere integral in the scattering density pass.
    pub spherical: u32,
    /// Polar samples of the hemisphere integral in the irradiance pass.
    pub irradiance: u32,
}

impl Default for IntegrationSteps {
    fn default() -> Self {
        Self {
            optical_depth: 500,
            inscatter: 50,
            spherical: 16,
            irradiance: 32,
        }
    }
}

impl IntegrationSteps {
    /// Step counts multiplied by `scale`, with per-integral minimums.
    pub fn scaled(scale: f32) -> Result<Self, ParameterError> {
        check_scale(scale)?;
        let base = Self::default();
        let s = |n: u32, min: u32| ((n as f32 * scale).round() as u32).max(min);
        Ok(Self {
            optical_depth: s(base.optical_depth, 32),
            inscatter: s(base.inscatter, 8),
            spherical: s(base.spherical, 4),
            // Hemisphere loop runs over half of this count.
            irradiance: s(base.irradiance, 8) & !1,
        })
    }
}

fn check_scale(scale: f32) -> Result<(), ParameterError> {
    if scale > 0.0 && scale.is_finite() {
        Ok(())
    } else {
        Err(ParameterError::TextureScale(scale))
    }
}

/// Default number of scattering orders folded into the persistent tables.
pub const DEFAULT_SCATTERING_ORDERS: u32 = 4;

/// Everything a generation run depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub params: PhysicalParameters,
    pub counts: SampleCounts,
    pub steps: IntegrationSteps,
    /// Last scattering order generated, inclusive.
    pub scattering_orders: u32,
}

impl GenerationSettings {
    /// Settings at the given texture scale and order count.
    pub fn new(
        params: PhysicalParameters,
        texture_scale: f32,
        scattering_orders: u32,
    ) -> Result<Self, ParameterError> {
        let settings = Self {
            params,
            counts: SampleCounts::scaled(texture_scale)?,
            steps: IntegrationSteps::scaled(texture_scale)?,
            scattering_orders,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        self.params.validate()?;
        self.counts.validate()?;
        if self.scattering_orders < 1 {
            return Err(ParameterError::ScatteringOrders(self.scattering_orders));
        }
        Ok(())
    }
}

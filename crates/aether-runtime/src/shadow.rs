//! Eclipse shadows cast onto the planet by other bodies.
//!
//! Each configured (source, caster) pair is resolved against the ephemeris
//! once per frame into a [`ShadowDescription`]. All lengths here are meters in
//! world space; the ephemeris reports kilometers.

use glam::DVec3;
use tracing::error;

/// Ephemeris positions are in kilometers.
const KM_TO_M: f64 = 1000.0;

/// Frame used for all ephemeris position queries.
pub const DEFAULT_REFERENCE_FRAME: &str = "GALACTIC";

/// Scene and ephemeris lookups the resolver needs.
pub trait Ephemeris {
    /// Position of `body` in `frame` at `time` (km) and the light travel time
    /// (s). `None` when the body is unknown.
    fn position(&self, body: &str, frame: &str, time: f64) -> Option<(DVec3, f64)>;

    /// Physical radius of `body` (km).
    fn radius(&self, body: &str) -> Option<f64>;

    /// Rendered scale of `body`. Missing scales count as 1.
    fn scale(&self, body: &str) -> Option<f64>;
}

/// One configured light source / shadow caster pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowCasterConfiguration {
    pub source: String,
    /// Zero or less means "ask the ephemeris".
    pub source_radius_km: f64,
    pub caster: String,
    pub caster_radius_km: f64,
}

/// How the shading pass darkens shadowed points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowMode {
    /// Butterworth falloff in the umbra, linear ramp in the penumbra.
    #[default]
    Soft,
    /// Constant 0.5 anywhere inside the penumbra cone.
    Hard,
}

impl ShadowMode {
    pub fn from_hard_flag(hard: bool) -> Self {
        if hard { ShadowMode::Hard } else { ShadowMode::Soft }
    }
}

/// Per-frame shadow state of one configured pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShadowDescription {
    pub is_shadowing: bool,
    /// Distance behind the caster to the penumbra cone apex (m).
    pub penumbra: f64,
    /// Length of the umbra cone behind the caster (m). Infinite when the
    /// caster is at least as large as the source.
    pub umbra: f64,
    /// Scaled caster radius (m).
    pub caster_radius: f64,
    /// Unit vector from source to caster.
    pub source_to_caster: DVec3,
    /// World position of the caster (m).
    pub caster_position: DVec3,
}

/// Planet-side inputs of one resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowScene {
    /// Ephemeris time.
    pub time: f64,
    /// World position of the receiving planet (m).
    pub planet_position: DVec3,
    /// Radius of the receiving planet (m).
    pub planet_radius: f64,
    /// World position of the light that lights the atmosphere (m).
    pub sun_position: DVec3,
}

/// A resolved body: world position and scaled radius, both in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: DVec3,
    pub radius: f64,
}

/// Classify one source/caster pair against the planet.
///
/// The planet is shadowed when its distance to the source-caster axis, less
/// the penumbra radius at the planet, is under the planet radius, and the
/// caster is nearer the sun than the planet.
pub fn classify(source: Body, caster: Body, scene: &ShadowScene) -> ShadowDescription {
    let not_shadowing = ShadowDescription::default();
    let source_caster = caster.position - source.position;
    let sc_length = source_caster.length();
    if sc_length <= 0.0 || source.radius + caster.radius <= 0.0 {
        return not_shadowing;
    }

    let planet_caster = caster.position - scene.planet_position;
    let projection = planet_caster.dot(source_caster) / (sc_length * sc_length) * source_caster;
    let d_test = (planet_caster - projection).length();
    let xp_test = caster.radius * sc_length / (source.radius + caster.radius);
    let rp_test = caster.radius * (projection.length() + xp_test) / xp_test;

    let caster_sun = caster.position.distance(scene.sun_position);
    let planet_sun = scene.planet_position.distance(scene.sun_position);
    if d_test - rp_test >= scene.planet_radius || caster_sun >= planet_sun {
        return not_shadowing;
    }

    let umbra = if source.radius > caster.radius {
        caster.radius * sc_length / (source.radius - caster.radius)
    } else {
        f64::INFINITY
    };
    ShadowDescription {
        is_shadowing: true,
        penumbra: xp_test,
        umbra,
        caster_radius: caster.radius,
        source_to_caster: source_caster / sc_length,
        caster_position: caster.position,
    }
}

#[derive(Debug)]
struct CasterEntry {
    config: ShadowCasterConfiguration,
    reported_source: bool,
    reported_caster: bool,
}

/// Turns the configured caster list into per-frame shadow descriptions.
#[derive(Debug)]
pub struct ShadowResolver {
    entries: Vec<CasterEntry>,
    reference_frame: String,
}

impl ShadowResolver {
    pub fn new(casters: Vec<ShadowCasterConfiguration>) -> Self {
        Self {
            entries: casters
                .into_iter()
                .map(|config| CasterEntry {
                    config,
                    reported_source: false,
                    reported_caster: false,
                })
                .collect(),
            reference_frame: DEFAULT_REFERENCE_FRAME.to_string(),
        }
    }

    pub fn with_reference_frame(mut self, frame: impl Into<String>) -> Self {
        self.reference_frame = frame.into();
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One description per configured pair, in configuration order.
    ///
    /// A pair whose bodies cannot be resolved yields a non-shadowing entry;
    /// the failure is logged the first time only.
    pub fn resolve(&mut self, ephemeris: &dyn Ephemeris, scene: &ShadowScene) -> Vec<ShadowDescription> {
        let frame = self.reference_frame.as_str();
        self.entries
            .iter_mut()
            .enumerate()
            .map(|(index, entry)| {
                let config = &entry.config;
                let source = resolve_body(ephemeris, &config.source, config.source_radius_km, frame, scene.time);
                let caster = resolve_body(ephemeris, &config.caster, config.caster_radius_km, frame, scene.time);

                let Some(source) = source else {
                    if !entry.reported_source {
                        error!(entry = index, body = %config.source, "cannot resolve shadow source body");
                        entry.reported_source = true;
                    }
                    return ShadowDescription::default();
                };
                let Some(caster) = caster else {
                    if !entry.reported_caster {
                        error!(entry = index, body = %config.caster, "cannot resolve shadow caster body");
                        entry.reported_caster = true;
                    }
                    return ShadowDescription::default();
                };
                classify(source, caster, scene)
            })
            .collect()
    }
}

fn resolve_body(ephemeris: &dyn Ephemeris, body: &str, radius_km: f64, frame: &str, time: f64) -> Option<Body> {
    let (position, _light_time) = ephemeris.position(body, frame, time)?;
    let radius_km = if radius_km > 0.0 {
        radius_km
    } else {
        ephemeris.radius(body)?
    };
    let scale = ephemeris.scale(body).unwrap_or(1.0).max(1.0);
    Some(Body {
        position: position * KM_TO_M,
        radius: radius_km * KM_TO_M * scale,
    })
}

fn umbra_falloff(radius_umbra: f64, distance: f64) -> f64 {
    (radius_umbra / (radius_umbra + distance.powi(4))).sqrt()
}

/// Light fraction reaching `position` (world, m) under the first shadowing
/// entry of `shadows`. Only one caster is considered; overlapping eclipses are
/// not combined.
///
/// Soft mode uses `sqrt(ru / (ru + d^4))` inside the umbra radius `ru`, then
/// a linear ramp from the umbra-edge value up to 1 at the penumbra radius.
pub fn eclipse_shadow(shadows: &[ShadowDescription], position: DVec3, mode: ShadowMode) -> f64 {
    let Some(shadow) = shadows.iter().find(|s| s.is_shadowing) else {
        return 1.0;
    };

    let position_to_caster = shadow.caster_position - position;
    let along = position_to_caster.dot(shadow.source_to_caster);
    if along > 0.0 {
        // Between the source and the caster.
        return 1.0;
    }
    let caster_shadow = along * shadow.source_to_caster;
    let distance = (position_to_caster - caster_shadow).length();
    let shadow_length = caster_shadow.length();

    let rc = shadow.caster_radius;
    let radius_penumbra = rc * (shadow_length + shadow.penumbra) / shadow.penumbra;
    let radius_umbra = if shadow.umbra.is_finite() {
        rc * (shadow.umbra - shadow_length) / shadow.umbra
    } else {
        rc
    };

    if distance < radius_umbra {
        match mode {
            ShadowMode::Hard => 0.5,
            ShadowMode::Soft => umbra_falloff(radius_umbra, distance),
        }
    } else if distance < radius_penumbra {
        match mode {
            ShadowMode::Hard => 0.5,
            ShadowMode::Soft => {
                let inner = radius_umbra.max(0.0);
                let edge = if radius_umbra > 0.0 {
                    umbra_falloff(radius_umbra, inner)
                } else {
                    0.0
                };
                let t = (distance - inner) / (radius_penumbra - inner);
                edge + (1.0 - edge) * t
            }
        }
    } else {
        1.0
    }
}

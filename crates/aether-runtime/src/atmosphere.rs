//! One atmosphere instance: table lifecycle plus per-frame preparation.

use std::sync::Arc;

use aether_scatter::{GridExecutor, PublishedTables, TableGenerator, TableStore};
use glam::DVec3;
use tracing::{debug, error, info};

use crate::frame::{FrameInput, FrameTransforms};
use crate::frustum::{ShellBounds, cull_atmosphere};
use crate::settings::{AtmosphereSettings, SettingsError};
use crate::shadow::{Ephemeris, ShadowDescription, ShadowResolver, ShadowScene, eclipse_shadow};
use crate::uniforms::{FrameShading, ShadingUniform};

const KM_TO_M: f64 = 1000.0;

#[derive(Debug, thiserror::Error)]
pub enum AtmosphereError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Generation aborted; the instance exposes no tables until the next
    /// successful generation.
    #[error("atmosphere table generation failed: {0}")]
    Generation(String),

    #[error("atmosphere tables have not been generated")]
    NotInitialized,
}

/// What the shading pass needs for one frame.
#[derive(Debug)]
pub struct PreparedFrame<T> {
    /// Tables pinned for the duration of the frame.
    pub tables: Arc<PublishedTables<T>>,
    pub uniform: ShadingUniform,
    /// The shading pass can be skipped entirely.
    pub culled: bool,
}

pub struct Atmosphere<T> {
    settings: AtmosphereSettings,
    store: Arc<TableStore<T>>,
    resolver: ShadowResolver,
    shadows: Vec<ShadowDescription>,
}

impl<T> Atmosphere<T> {
    pub fn new(settings: AtmosphereSettings) -> Self {
        let resolver = ShadowResolver::new(settings.casters.clone());
        Self {
            settings,
            store: Arc::new(TableStore::new()),
            resolver,
            shadows: Vec::new(),
        }
    }

    pub fn settings(&self) -> &AtmosphereSettings {
        &self.settings
    }

    /// Shared handle to the published tables.
    pub fn store(&self) -> &Arc<TableStore<T>> {
        &self.store
    }

    pub fn is_ready(&self) -> bool {
        self.store.snapshot().is_some()
    }

    /// Generate a fresh table set and publish it. Returns the new
    /// generation number.
    ///
    /// On failure the previous tables are withdrawn as well, so the
    /// instance never shows tables that disagree with its settings.
    pub fn generate<E>(&mut self, exec: &mut E) -> Result<u64, AtmosphereError>
    where
        E: GridExecutor<Table = T>,
    {
        let generator = TableGenerator::new(self.settings.generation.clone())
            .map_err(SettingsError::from)?
            .with_dump(self.settings.dump.clone());

        match generator.generate(exec) {
            Ok(tables) => {
                let generation = self
                    .store
                    .publish(tables, self.settings.generation.clone());
                info!(generation, "atmosphere ready");
                Ok(generation)
            }
            Err(e) => {
                self.store.withdraw();
                error!(error = %e, "atmosphere disabled");
                Err(AtmosphereError::Generation(e.to_string()))
            }
        }
    }

    /// Apply new settings, regenerating only when the tables depend on what
    /// changed. Returns whether a regeneration ran.
    pub fn reconfigure<E>(&mut self, settings: AtmosphereSettings, exec: &mut E) -> Result<bool, AtmosphereError>
    where
        E: GridExecutor<Table = T>,
    {
        let regenerate = self.settings.requires_regeneration(&settings) || !self.is_ready();
        if settings.casters != self.settings.casters {
            self.resolver = ShadowResolver::new(settings.casters.clone());
            self.shadows.clear();
        }
        self.settings = settings;

        if regenerate {
            self.generate(exec)?;
        } else {
            debug!("atmosphere settings changed without affecting tables");
        }
        Ok(regenerate)
    }

    /// Cull test, shadow resolution and uniform assembly for one frame.
    pub fn prepare_frame(&mut self, frame: &FrameInput, ephemeris: &dyn Ephemeris) -> Result<PreparedFrame<T>, AtmosphereError> {
        let tables = self.store.snapshot().ok_or(AtmosphereError::NotInitialized)?;
        let params = &tables.settings.params;

        let planet_position = frame.planet_position();
        let shell = ShellBounds::from_model(&frame.model, params.atmosphere_radius as f64);
        let culled = cull_atmosphere(
            &frame.camera.view_projection(),
            frame.camera.position,
            &shell,
        );

        self.shadows = self.resolver.resolve(
            ephemeris,
            &ShadowScene {
                time: frame.time,
                planet_position,
                planet_radius: params.planet_radius as f64 * KM_TO_M,
                sun_position: frame.sun_position(),
            },
        );

        let transforms = FrameTransforms::new(frame, self.settings.sun_following_camera);
        let uniform = ShadingUniform::new(
            &tables.settings,
            &FrameShading {
                transforms: &transforms,
                planet_position,
                opacity: self.settings.opacity,
                shadow_mode: self.settings.shadow_mode,
                culled,
                shadows: &self.shadows,
            },
        );

        Ok(PreparedFrame {
            tables,
            uniform,
            culled,
        })
    }

    /// Shadows resolved by the last [`Atmosphere::prepare_frame`].
    pub fn shadows(&self) -> &[ShadowDescription] {
        &self.shadows
    }

    /// Light fraction at `world_position` under the current eclipse, using
    /// the same approximation as the shading pass.
    pub fn eclipse_shadow(&self, world_position: DVec3) -> f64 {
        eclipse_shadow(&self.shadows, world_position, self.settings.shadow_mode)
    }
}

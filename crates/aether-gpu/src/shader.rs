//! WGSL program assembly, validation and caching.
//!
//! Every program is the shared remap module followed by either the kernel
//! prelude and one kernel file, or the shading module. Sources are embedded;
//! a shader directory can override them while iterating on the WGSL.

use aether_scatter::Kernel;
use log::{debug, info};
use std::{borrow::Cow, collections::HashMap, path::PathBuf, sync::Arc};
use thiserror::Error;
use wgpu::{ShaderModuleDescriptor, ShaderSource};

/// Error types for shader loading operations.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader '{name}' failed to compile: {message}")]
    CompilationFailed { name: String, message: String },

    #[error("shader file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read shader file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("shader '{name}' not found in library")]
    NotLoaded { name: String },
}

const REMAP: &str = include_str!("shaders/remap.wgsl");
const KERNEL_COMMON: &str = include_str!("shaders/kernel_common.wgsl");
const SHADING: &str = include_str!("shaders/shading.wgsl");

/// Module name of the shading program.
pub const SHADING_PROGRAM: &str = "shading";

fn kernel_file(kernel: Kernel) -> &'static str {
    match kernel {
        Kernel::Transmittance => include_str!("shaders/transmittance.wgsl"),
        Kernel::DirectIrradiance => include_str!("shaders/direct_irradiance.wgsl"),
        Kernel::SingleScattering => include_str!("shaders/single_scattering.wgsl"),
        Kernel::CopyIrradiance => include_str!("shaders/copy_irradiance.wgsl"),
        Kernel::CopyInscatter => include_str!("shaders/copy_inscatter.wgsl"),
        Kernel::ScatteringDensity => include_str!("shaders/scattering_density.wgsl"),
        Kernel::IndirectIrradiance => include_str!("shaders/indirect_irradiance.wgsl"),
        Kernel::MultipleScattering => include_str!("shaders/multiple_scattering.wgsl"),
        Kernel::AccumulateIrradiance => include_str!("shaders/accumulate_irradiance.wgsl"),
        Kernel::AccumulateInscatter => include_str!("shaders/accumulate_inscatter.wgsl"),
    }
}

/// Embedded source of a generation kernel.
pub fn kernel_source(kernel: Kernel) -> String {
    [REMAP, KERNEL_COMMON, kernel_file(kernel)].join("\n")
}

/// Embedded source of the shading program.
pub fn shading_source() -> String {
    [REMAP, SHADING].join("\n")
}

/// Parse and validate WGSL with naga, so a broken program is reported as an
/// error instead of surfacing later as a device validation panic.
pub fn validate_wgsl(name: &str, source: &str) -> Result<naga::Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::CompilationFailed {
        name: name.to_string(),
        message: e.emit_to_string(source),
    })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| ShaderError::CompilationFailed {
        name: name.to_string(),
        message: e.into_inner().to_string(),
    })?;
    Ok(module)
}

/// Registry of compiled atmosphere programs.
pub struct ShaderLibrary {
    modules: HashMap<String, Arc<wgpu::ShaderModule>>,
    shader_dir: Option<PathBuf>,
}

impl ShaderLibrary {
    /// Create a new empty shader library.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            shader_dir: None,
        }
    }

    /// Read .wgsl files from `dir` instead of the embedded sources.
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    /// Validate and compile a WGSL source string.
    pub fn load_from_source(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        source: &str,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        debug!("Loading shader '{}' from source", name);
        validate_wgsl(name, source)?;

        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(name),
            source: ShaderSource::Wgsl(source.into()),
        });

        let arc_module = Arc::new(module);
        let replaced = self
            .modules
            .insert(name.to_string(), arc_module.clone())
            .is_some();

        if replaced {
            info!("Replaced shader '{}'", name);
        } else {
            info!("Loaded shader '{}'", name);
        }

        Ok(arc_module)
    }

    /// Compile the program behind a generation kernel.
    pub fn load_kernel(
        &mut self,
        device: &wgpu::Device,
        kernel: Kernel,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        let source = [
            self.part("remap.wgsl", REMAP)?,
            self.part("kernel_common.wgsl", KERNEL_COMMON)?,
            self.part(&format!("{}.wgsl", kernel.name()), kernel_file(kernel))?,
        ]
        .join("\n");
        self.load_from_source(device, kernel.name(), &source)
    }

    /// Compile the shading program.
    pub fn load_shading(&mut self, device: &wgpu::Device) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        let source = [
            self.part("remap.wgsl", REMAP)?,
            self.part("shading.wgsl", SHADING)?,
        ]
        .join("\n");
        self.load_from_source(device, SHADING_PROGRAM, &source)
    }

    fn part(&self, filename: &str, embedded: &'static str) -> Result<Cow<'static, str>, ShaderError> {
        let Some(dir) = &self.shader_dir else {
            return Ok(Cow::Borrowed(embedded));
        };
        let path = dir.join(filename);
        debug!("Loading shader part from file: {:?}", path);
        if !path.exists() {
            return Err(ShaderError::FileNotFound { path });
        }
        Ok(Cow::Owned(std::fs::read_to_string(&path)?))
    }

    /// Get a previously loaded program by name.
    pub fn get(&self, name: &str) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| ShaderError::NotLoaded {
                name: name.to_string(),
            })
    }

    /// Drop every compiled program, e.g. after the device changed.
    pub fn clear(&mut self) {
        self.modules.clear();
    }

    /// Number of loaded programs.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the shader library is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

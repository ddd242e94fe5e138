//! The "execute a kernel over a grid" capability the generator is written
//! against. Backends differ only in where the tables live and how the
//! per-texel math is run.

use crate::kernels::{Kernel, ScatteringRef};
use crate::params::GenerationSettings;
use crate::remap::LayerGeometry;
use crate::table::{Extent, Table};

/// How a pass combines its output with what the target already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    Replace,
    Additive,
}

/// Tables a pass reads. Unused slots stay `None`.
pub struct Inputs<'a, T> {
    pub transmittance: Option<&'a T>,
    pub delta_e: Option<&'a T>,
    pub delta_s: Option<ScatteringRef<'a, T>>,
    pub delta_j: Option<&'a T>,
}

impl<T> Default for Inputs<'_, T> {
    fn default() -> Self {
        Self {
            transmittance: None,
            delta_e: None,
            delta_s: None,
            delta_j: None,
        }
    }
}

/// One kernel invocation: what to run, what it reads, how it writes.
pub struct Pass<'a, T> {
    pub kernel: Kernel,
    pub inputs: Inputs<'a, T>,
    pub blend: Blend,
}

impl<'a, T> Pass<'a, T> {
    pub fn new(kernel: Kernel, inputs: Inputs<'a, T>) -> Self {
        Self {
            kernel,
            inputs,
            blend: Blend::Replace,
        }
    }

    pub fn additive(mut self) -> Self {
        self.blend = Blend::Additive;
        self
    }
}

/// Runs generation kernels over 2D tables or single layers of 3D tables.
///
/// Passes are issued in dependency order; a backend must make the output of
/// one `run` visible to the next `run` that reads it.
pub trait GridExecutor {
    /// Backend table handle.
    type Table;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Called once before any pass with the settings of this generation run.
    fn begin(&mut self, settings: &GenerationSettings) -> Result<(), Self::Error>;

    /// Build whatever program backs `kernel`. Fails if the program does not
    /// compile.
    fn prepare(&mut self, kernel: Kernel) -> Result<(), Self::Error>;

    /// Fresh zero-initialised table.
    fn allocate(&mut self, label: &str, extent: Extent) -> Result<Self::Table, Self::Error>;

    /// Run `pass` over every texel of `targets`, or over the texels of one
    /// layer when `layer` is given.
    fn run(
        &mut self,
        pass: &Pass<'_, Self::Table>,
        targets: &mut [&mut Self::Table],
        layer: Option<&LayerGeometry>,
    ) -> Result<(), Self::Error>;

    /// Copy a table back into host memory.
    fn read_back(&mut self, table: &Self::Table) -> Result<Table, Self::Error>;

    /// Wait until every issued pass has completed.
    fn finish(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

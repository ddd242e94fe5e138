//! Plain-text PPM (P3) dumps of generated tables, for eyeballing only.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::table::Table;

/// Texel encoding in the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PpmFormat {
    /// Components clamped to [0, 1] and scaled to 0-255.
    #[default]
    Integer,
    /// Raw float components.
    Float,
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("table {label} has no layer {layer}")]
    Layer { label: String, layer: u32 },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Write layer `layer` of `table` as P3: three header lines (tag, size, max
/// value) followed by one line of RGB triplets per table row.
pub fn write_ppm<W: Write>(out: &mut W, table: &Table, layer: u32, format: PpmFormat) -> io::Result<()> {
    let extent = table.extent();
    writeln!(out, "P3")?;
    writeln!(out, "{} {}", extent.width, extent.height)?;
    writeln!(out, "255")?;

    let texels = table.layer(layer);
    for row in texels.chunks(extent.width as usize) {
        let mut first = true;
        for texel in row {
            if !first {
                write!(out, " ")?;
            }
            first = false;
            match format {
                PpmFormat::Integer => {
                    let [r, g, b] = texel.truncate().to_array().map(to_byte);
                    write!(out, "{r} {g} {b}")?;
                }
                PpmFormat::Float => write!(out, "{} {} {}", texel.x, texel.y, texel.z)?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Write `table` (one layer of it for 3D tables) to `path`.
pub fn save_ppm(path: &Path, table: &Table, layer: u32, format: PpmFormat) -> Result<(), DumpError> {
    if layer >= table.extent().depth {
        return Err(DumpError::Layer {
            label: table.label().to_string(),
            layer,
        });
    }

    let io_err = |source| DumpError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = std::fs::File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    write_ppm(&mut out, table, layer, format).map_err(io_err)?;
    out.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Extent;
    use glam::Vec4;

    fn small() -> Table {
        let mut table = Table::new("small", Extent::new_2d(2, 2));
        table.set(0, 0, 0, Vec4::new(1.0, 0.0, 0.5, 1.0));
        table.set(1, 0, 0, Vec4::new(2.0, -1.0, 0.25, 0.0));
        table
    }

    #[test]
    fn test_integer_dump_layout() {
        let mut out = Vec::new();
        write_ppm(&mut out, &small(), 0, PpmFormat::Integer).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "P3");
        assert_eq!(lines[1], "2 2");
        assert_eq!(lines[2], "255");
        assert_eq!(lines[3], "255 0 128 255 0 64");
        assert_eq!(lines[4], "0 0 0 0 0 0");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_float_dump_keeps_values() {
        let mut out = Vec::new();
        write_ppm(&mut out, &small(), 0, PpmFormat::Float).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().nth(3).unwrap().starts_with("1 0 0.5 2 -1 0.25"));
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("t.ppm");
        save_ppm(&path, &small(), 0, PpmFormat::Integer).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_missing_layer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = save_ppm(&dir.path().join("t.ppm"), &small(), 1, PpmFormat::Integer);
        assert!(matches!(result, Err(DumpError::Layer { layer: 1, .. })));
    }
}

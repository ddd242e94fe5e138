//! CPU-resident lookup tables with manual bilinear/trilinear filtering.

use glam::Vec4;

/// Size of a table. 2D tables have `depth == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    pub fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn is_3d(&self) -> bool {
        self.depth > 1
    }

    /// Texels in one layer.
    pub fn layer_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn len(&self) -> usize {
        self.layer_len() * self.depth as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RGBA float table stored row-major, layer after layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    label: String,
    extent: Extent,
    data: Vec<Vec4>,
}

impl Table {
    /// Zero-filled table.
    pub fn new(label: impl Into<String>, extent: Extent) -> Self {
        Self {
            label: label.into(),
            extent,
            data: vec![Vec4::ZERO; extent.len()],
        }
    }

    /// Wrap existing texels. Returns `None` if the length does not match.
    pub fn from_texels(label: impl Into<String>, extent: Extent, data: Vec<Vec4>) -> Option<Self> {
        (data.len() == extent.len()).then(|| Self {
            label: label.into(),
            extent,
            data,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn texels(&self) -> &[Vec4] {
        &self.data
    }

    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.extent.height as usize + y as usize) * self.extent.width as usize
            + x as usize
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> Vec4 {
        self.data[self.index(x, y, z)]
    }

    pub fn set(&mut self, x: u32, y: u32, z: u32, value: Vec4) {
        let i = self.index(x, y, z);
        self.data[i] = value;
    }

    pub fn layer(&self, z: u32) -> &[Vec4] {
        let len = self.extent.layer_len();
        let start = z as usize * len;
        &self.data[start..start + len]
    }

    pub fn layer_mut(&mut self, z: u32) -> &mut [Vec4] {
        let len = self.extent.layer_len();
        let start = z as usize * len;
        &mut self.data[start..start + len]
    }

    /// Bilinear sample of layer `z` at fractional texel position `(x, y)`.
    /// Positions outside the table clamp to the border texels.
    pub fn sample_2d(&self, x: f32, y: f32, z: u32) -> Vec4 {
        let (x0, x1, fx) = split(x, self.extent.width);
        let (y0, y1, fy) = split(y, self.extent.height);
        let top = self.get(x0, y0, z).lerp(self.get(x1, y0, z), fx);
        let bottom = self.get(x0, y1, z).lerp(self.get(x1, y1, z), fx);
        top.lerp(bottom, fy)
    }

    /// Trilinear sample at fractional texel position `(x, y, z)`.
    pub fn sample_3d(&self, x: f32, y: f32, z: f32) -> Vec4 {
        let (z0, z1, fz) = split(z, self.extent.depth);
        self.sample_2d(x, y, z0).lerp(self.sample_2d(x, y, z1), fz)
    }

    /// Smallest and largest component over all texels, ignoring alpha.
    pub fn rgb_range(&self) -> (f32, f32) {
        self.data.iter().fold((f32::MAX, f32::MIN), |(lo, hi), t| {
            let rgb = t.truncate();
            (lo.min(rgb.min_element()), hi.max(rgb.max_element()))
        })
    }
}

/// Clamp a fractional texel coordinate and split it into neighbours + weight.
fn split(coord: f32, size: u32) -> (u32, u32, f32) {
    let max = (size - 1) as f32;
    let c = if coord.is_nan() { 0.0 } else { coord.clamp(0.0, max) };
    let lo = c.floor();
    let hi = (lo + 1.0).min(max);
    (lo as u32, hi as u32, c - lo)
}

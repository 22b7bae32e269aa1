//! Ellipsometry PNG images
//!
//! DataStudio exports every per-pixel quantity (Delta, Psi, fitted thickness,
//! ...) as a grey-level PNG. [ImageData] holds one of these images as an
//! `f64` array with transparent pixels flagged as missing (`NaN`).

use ndarray::Array2;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to decode image {0:?}")]
    Decode(PathBuf, #[source] image::ImageError),
    #[error("image data do not match the image size")]
    Shape(#[from] ndarray::ShapeError),
    #[cfg(feature = "plot")]
    #[error("failed to plot the image")]
    Plot(#[from] crate::plot::PlotError),
}
type Result<T> = std::result::Result<T, ImageError>;

/// Linear mapping from the raw grey levels to physical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageScale {
    pub offset: f64,
    pub gain: f64,
}
impl Default for ImageScale {
    fn default() -> Self {
        Self {
            offset: 0f64,
            gain: 1f64,
        }
    }
}
impl ImageScale {
    pub fn new(offset: f64, gain: f64) -> Self {
        Self { offset, gain }
    }
    /// Maps the grey levels `[0, levels]` onto `[min, max]`
    pub fn from_range(min: f64, max: f64, levels: f64) -> Self {
        Self {
            offset: min,
            gain: (max - min) / levels,
        }
    }
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        self.offset + self.gain * raw
    }
}

/// Reads the 16 bits grey levels of a PNG image into a `height x width` array
///
/// Fully transparent pixels are set to `NaN`
pub fn imread<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    imread_scaled(path, ImageScale::default())
}

/// Reads a PNG image applying `scale` to the grey levels
pub fn imread_scaled<P: AsRef<Path>>(path: P, scale: ImageScale) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|e| ImageError::Decode(path.to_path_buf(), e))?;
    // 8 bits and colour images are widened to 16 bits grey levels
    let buf = img.to_luma_alpha16();
    let (width, height) = buf.dimensions();
    let pixels: Vec<(f64, bool)> = buf.pixels().map(|p| (p[0] as f64, p[1] > 0)).collect();
    let data = pixels
        .into_iter()
        .map(|(v, opaque)| if opaque { scale.apply(v) } else { f64::NAN })
        .collect();
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        data,
    )?)
}

/// Returns the `(width, height)` of an image in pixels
pub fn image_dimensions<P: AsRef<Path>>(path: P) -> Result<(usize, usize)> {
    let path = path.as_ref();
    let (width, height) =
        image::image_dimensions(path).map_err(|e| ImageError::Decode(path.to_path_buf(), e))?;
    Ok((width as usize, height as usize))
}

/// An image exported by a DataStudio fit at a given time of the measurement
#[derive(Debug, Clone)]
pub struct ImageData {
    path: PathBuf,
    /// time into the measurement [minutes]
    time: u32,
    array: Array2<f64>,
}
impl ImageData {
    pub fn load<P: AsRef<Path>>(path: P, time: u32) -> Result<Self> {
        Self::load_scaled(path, time, ImageScale::default())
    }
    pub fn load_scaled<P: AsRef<Path>>(path: P, time: u32, scale: ImageScale) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("Loading {:?}...", path);
        let array = imread_scaled(&path, scale)?;
        Ok(Self { path, time, array })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn time(&self) -> u32 {
        self.time
    }
    pub fn array(&self) -> &Array2<f64> {
        &self.array
    }
    pub fn width(&self) -> usize {
        self.array.ncols()
    }
    pub fn height(&self) -> usize {
        self.array.nrows()
    }
    /// Range of the non-missing values
    pub fn range(&self) -> Option<(f64, f64)> {
        self.array
            .iter()
            .filter(|x| x.is_finite())
            .fold(None, |r, &x| match r {
                None => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            })
    }
    fn default_title(&self) -> String {
        format!("Thickness plot after time = {} units", self.time)
    }
}
#[cfg(feature = "plot")]
impl ImageData {
    /// Plots the image as a heatmap into the PNG file `path`
    ///
    /// The default title is used if `title` is empty
    pub fn plot<P: AsRef<Path>>(&self, title: &str, path: P) -> Result<()> {
        let title = if title.is_empty() {
            self.default_title()
        } else {
            title.to_string()
        };
        crate::plot::Heatmap::new(path).title(title).draw(&self.array)?;
        Ok(())
    }
    /// Draws the heatmap into an existing drawing area
    pub fn draw_on<DB>(
        &self,
        area: &plotters::drawing::DrawingArea<DB, plotters::coord::Shift>,
        title: Option<&str>,
    ) -> Result<()>
    where
        DB: plotters::prelude::DrawingBackend,
    {
        let title = title.map_or_else(|| self.default_title(), |t| t.to_string());
        crate::plot::Heatmap::default()
            .title(title)
            .draw_on(area, &self.array)?;
        Ok(())
    }
}

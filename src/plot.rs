//! Heatmaps
//!
//! Renders 2D maps (thickness, standard error, raw images) with a colour bar.
//! Missing values (`NaN`) are left blank.

use ndarray::Array2;
use plotters::{coord::Shift, prelude::*};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("failed to draw heatmap: {0}")]
    Drawing(String),
    #[error("nothing to plot, the map is empty")]
    Empty,
}
type Result<T> = std::result::Result<T, PlotError>;

fn drawing<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Drawing(e.to_string())
}

/// Colour bar width [px]
const COLORBAR_WIDTH: u32 = 110;

/// Heatmap of a 2D array
pub struct Heatmap {
    path: PathBuf,
    title: String,
    gradient: colorous::Gradient,
    range: Option<(f64, f64)>,
    pixel_size: u32,
}
impl Default for Heatmap {
    fn default() -> Self {
        Self {
            path: PathBuf::from("heatmap.png"),
            title: String::new(),
            gradient: colorous::INFERNO,
            range: None,
            pixel_size: 2,
        }
    }
}
impl Heatmap {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
    pub fn title(self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self
        }
    }
    pub fn gradient(self, gradient: colorous::Gradient) -> Self {
        Self { gradient, ..self }
    }
    /// Fixes the colour scale range instead of using the data range
    pub fn range(self, lo: f64, hi: f64) -> Self {
        Self {
            range: Some((lo, hi)),
            ..self
        }
    }
    /// Sets the number of screen pixels per map pixel
    pub fn pixel_size(self, pixel_size: u32) -> Self {
        Self {
            pixel_size: pixel_size.max(1),
            ..self
        }
    }
    fn value_range(&self, data: &Array2<f64>) -> (f64, f64) {
        if let Some(range) = self.range {
            return range;
        }
        let (lo, hi) = data
            .iter()
            .filter(|x| x.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        match (lo.is_finite(), hi > lo) {
            (false, _) => (0f64, 1f64),
            (true, false) => (lo - 0.5, hi + 0.5),
            (true, true) => (lo, hi),
        }
    }
    fn color(&self, value: f64, (lo, hi): (f64, f64)) -> RGBColor {
        let t = ((value - lo) / (hi - lo)).clamp(0f64, 1f64);
        let c = self.gradient.eval_continuous(t);
        RGBColor(c.r, c.g, c.b)
    }
    /// Draws the heatmap into the PNG file
    pub fn draw(&self, data: &Array2<f64>) -> Result<()> {
        let (height, width) = data.dim();
        if height * width == 0 {
            return Err(PlotError::Empty);
        }
        let size = (
            width as u32 * self.pixel_size + COLORBAR_WIDTH + 80,
            height as u32 * self.pixel_size + 80,
        );
        let root = BitMapBackend::new(&self.path, size).into_drawing_area();
        self.draw_on(&root, data)?;
        root.present().map_err(drawing)?;
        log::info!("Heatmap written to {:?}", self.path);
        Ok(())
    }
    /// Draws the heatmap and its colour bar into `area`
    pub fn draw_on<DB: DrawingBackend>(
        &self,
        area: &DrawingArea<DB, Shift>,
        data: &Array2<f64>,
    ) -> Result<()> {
        let (height, width) = data.dim();
        if height * width == 0 {
            return Err(PlotError::Empty);
        }
        let range = self.value_range(data);
        area.fill(&WHITE).map_err(drawing)?;
        let (area_width, _) = area.dim_in_pixel();
        let (map_area, bar_area) =
            area.split_horizontally((area_width as i32 - COLORBAR_WIDTH as i32).max(0));

        let mut chart = ChartBuilder::on(&map_area)
            .caption(&self.title, ("sans-serif", 18))
            .margin(10)
            .set_label_area_size(LabelAreaPosition::Left, 40)
            .set_label_area_size(LabelAreaPosition::Bottom, 30)
            .build_cartesian_2d(0f64..width as f64, 0f64..height as f64)
            .map_err(drawing)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .y_label_formatter(&|y| format!("{:.0}", height as f64 - y))
            .draw()
            .map_err(drawing)?;
        // row 0 is at the top of the image
        chart
            .draw_series(data.indexed_iter().filter(|(_, v)| v.is_finite()).map(
                |((i, j), &v)| {
                    let y = (height - i) as f64;
                    Rectangle::new(
                        [(j as f64, y), (j as f64 + 1f64, y - 1f64)],
                        self.color(v, range).filled(),
                    )
                },
            ))
            .map_err(drawing)?;

        let (lo, hi) = range;
        let n = 128;
        let step = (hi - lo) / n as f64;
        let mut bar = ChartBuilder::on(&bar_area)
            .margin_top(38)
            .margin_bottom(40)
            .margin_right(50)
            .set_label_area_size(LabelAreaPosition::Right, 50)
            .build_cartesian_2d(0f64..1f64, lo..hi)
            .map_err(drawing)?;
        bar.configure_mesh()
            .disable_mesh()
            .disable_x_axis()
            .draw()
            .map_err(drawing)?;
        bar.draw_series((0..n).map(|k| {
            let y0 = lo + k as f64 * step;
            Rectangle::new(
                [(0f64, y0), (1f64, y0 + step)],
                self.color(y0 + 0.5 * step, range).filled(),
            )
        }))
        .map_err(drawing)?;
        Ok(())
    }
}

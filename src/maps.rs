//! Thickness maps
//!
//! The pixel fits reshaped into `height x width` maps and saved as Python
//! pickles, one set of files per timepoint:
//!  - `thickness_arr_{t}min.pkl`, `stderr_arr_{t}min.pkl`: flat row-major lists
//!  - `thickness_arr_png_{t}min.pkl`, `stderr_arr_png_{t}min.pkl`: lists of rows
//!  - `status_arr_png_{t}min.pkl`: lists of rows of [PixelFit] status codes

use crate::fit::PixelFit;
use glob::{glob, Pattern};
use ndarray::Array2;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_pickle as pickle;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum MapsError {
    #[error("{len} values can't be reshaped into {height}x{width}")]
    ShapeMismatch {
        len: usize,
        width: usize,
        height: usize,
    },
    #[error("failed to open {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to (de)serialize {0:?}")]
    Pickle(PathBuf, #[source] pickle::Error),
    #[error("{0:?} is not a rectangular map")]
    Ragged(PathBuf),
    #[error("invalid glob pattern")]
    Pattern(#[from] glob::PatternError),
    #[error("invalid regular expression")]
    Regex(#[from] regex::Error),
    #[cfg(feature = "plot")]
    #[error("failed to render the maps")]
    Plot(#[from] crate::plot::PlotError),
}
type Result<T> = std::result::Result<T, MapsError>;

/// Reshapes a flat row-major sequence into a `height x width` array
pub fn data_arr_to_2d<T: Clone>(values: &[T], width: usize, height: usize) -> Result<Array2<T>> {
    Array2::from_shape_vec((height, width), values.to_vec()).map_err(|_| {
        MapsError::ShapeMismatch {
            len: values.len(),
            width,
            height,
        }
    })
}

fn rows<T: Clone>(map: &Array2<T>) -> Vec<Vec<T>> {
    map.rows().into_iter().map(|row| row.to_vec()).collect()
}

fn from_rows<T: Clone>(path: &Path, rows: Vec<Vec<T>>) -> Result<Array2<T>> {
    let height = rows.len();
    let width = rows.first().map_or(0, |row| row.len());
    if rows.iter().any(|row| row.len() != width) {
        return Err(MapsError::Ragged(path.to_path_buf()));
    }
    let values: Vec<T> = rows.into_iter().flatten().collect();
    data_arr_to_2d(&values, width, height)
}

fn dump<T: Serialize>(path: PathBuf, value: &T) -> Result<PathBuf> {
    let file = File::create(&path).map_err(|e| MapsError::Io(path.clone(), e))?;
    let mut buf = BufWriter::new(file);
    pickle::to_writer(&mut buf, value, Default::default())
        .map_err(|e| MapsError::Pickle(path.clone(), e))?;
    buf.flush().map_err(|e| MapsError::Io(path.clone(), e))?;
    Ok(path)
}

fn load<T: DeserializeOwned>(path: PathBuf) -> Result<T> {
    let file = File::open(&path).map_err(|e| MapsError::Io(path.clone(), e))?;
    pickle::from_reader(BufReader::new(file), Default::default())
        .map_err(|e| MapsError::Pickle(path, e))
}

/// The pixel fits of a measurement
#[derive(Debug, Clone)]
pub struct FitMaps {
    width: usize,
    height: usize,
    fits: Vec<PixelFit>,
}
impl FitMaps {
    /// Creates the maps from the row-major pixel fits
    pub fn new(width: usize, height: usize, fits: Vec<PixelFit>) -> Result<Self> {
        if fits.len() != width * height {
            return Err(MapsError::ShapeMismatch {
                len: fits.len(),
                width,
                height,
            });
        }
        Ok(Self {
            width,
            height,
            fits,
        })
    }
    pub fn width(&self) -> usize {
        self.width
    }
    pub fn height(&self) -> usize {
        self.height
    }
    pub fn fits(&self) -> &[PixelFit] {
        &self.fits
    }
    /// Flat thickness, `NaN` where the fit did not converge
    pub fn thickness(&self) -> Vec<f64> {
        self.fits.iter().map(PixelFit::thickness).collect()
    }
    /// Flat thickness standard error, `NaN` where the fit did not converge
    pub fn stderr(&self) -> Vec<f64> {
        self.fits.iter().map(PixelFit::stderr).collect()
    }
    /// Flat [PixelFit] status codes
    pub fn status(&self) -> Vec<u8> {
        self.fits.iter().map(PixelFit::status).collect()
    }
    /// The number of converged, failed and empty pixels
    pub fn counts(&self) -> (usize, usize, usize) {
        self.fits
            .iter()
            .fold((0, 0, 0), |(c, f, n), fit| match fit.status() {
                PixelFit::CONVERGED => (c + 1, f, n),
                PixelFit::FAILED => (c, f + 1, n),
                _ => (c, f, n + 1),
            })
    }
    /// Returns the 2D maps
    pub fn maps(&self) -> Maps {
        // lengths are checked at construction
        let reshape = |v: Vec<f64>| {
            Array2::from_shape_vec((self.height, self.width), v).unwrap_or_default()
        };
        Maps {
            thickness: reshape(self.thickness()),
            stderr: reshape(self.stderr()),
            status: Array2::from_shape_vec((self.height, self.width), self.status())
                .unwrap_or_default(),
        }
    }
    /// Prints a summary of the fits
    pub fn summary(&self) {
        let (converged, failed, no_data) = self.counts();
        println!("SUMMARY:");
        println!(" - map size: {}x{}", self.height, self.width);
        println!(
            " - pixels: {} converged, {} failed, {} without data",
            converged, failed, no_data
        );
        let stats = |x: Vec<f64>| {
            let x: Vec<f64> = x.into_iter().filter(|x| x.is_finite()).collect();
            let n = x.len() as f64;
            let mean = x.iter().sum::<f64>() / n;
            let std = (x.iter().map(|x| x - mean).fold(0f64, |s, x| s + x * x) / n).sqrt();
            let min = x.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            (mean, std, min, max)
        };
        if converged > 0 {
            println!(
                "    {:^12}: ({:^12}, {:^12})  ({:^12}, {:^12})",
                "", "MEAN", "STD", "MIN", "MAX"
            );
            let (mean, std, min, max) = stats(self.thickness());
            println!(
                "  - {:12}: ({:>12.3}, {:>12.3})  ({:>12.3}, {:>12.3})",
                "thickness", mean, std, min, max
            );
            let (mean, std, min, max) = stats(self.stderr());
            println!(
                "  - {:12}: ({:>12.3}, {:>12.3})  ({:>12.3}, {:>12.3})",
                "stderr", mean, std, min, max
            );
        }
    }
    /// Writes the flat and 2D pickles of timepoint `minutes` into `dir`
    pub fn save<P: AsRef<Path>>(&self, dir: P, minutes: u32) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let mut paths = vec![
            dump(dir.join(format!("thickness_arr_{minutes}min.pkl")), &self.thickness())?,
            dump(dir.join(format!("stderr_arr_{minutes}min.pkl")), &self.stderr())?,
        ];
        paths.extend(self.maps().save(dir, minutes)?);
        Ok(paths)
    }
}

/// Thickness, standard error and status `height x width` maps
#[derive(Debug, Clone, PartialEq)]
pub struct Maps {
    pub thickness: Array2<f64>,
    pub stderr: Array2<f64>,
    pub status: Array2<u8>,
}
impl Maps {
    /// Writes the 2D pickles of timepoint `minutes` into `dir`
    pub fn save<P: AsRef<Path>>(&self, dir: P, minutes: u32) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let paths = vec![
            dump(
                dir.join(format!("thickness_arr_png_{minutes}min.pkl")),
                &rows(&self.thickness),
            )?,
            dump(
                dir.join(format!("stderr_arr_png_{minutes}min.pkl")),
                &rows(&self.stderr),
            )?,
            dump(
                dir.join(format!("status_arr_png_{minutes}min.pkl")),
                &rows(&self.status),
            )?,
        ];
        log::info!("Maps of timepoint {minutes}min saved to {:?}", dir);
        Ok(paths)
    }
    /// Loads the 2D pickles of timepoint `minutes` from `dir`
    pub fn load<P: AsRef<Path>>(dir: P, minutes: u32) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(format!("thickness_arr_png_{minutes}min.pkl"));
        let thickness = from_rows(&path, load(path.clone())?)?;
        let path = dir.join(format!("stderr_arr_png_{minutes}min.pkl"));
        let stderr = from_rows(&path, load(path.clone())?)?;
        let path = dir.join(format!("status_arr_png_{minutes}min.pkl"));
        let status = from_rows(&path, load(path.clone())?)?;
        Ok(Self {
            thickness,
            stderr,
            status,
        })
    }
    /// Returns the timepoints [minutes] of the maps saved in `dir`
    pub fn timepoints<P: AsRef<Path>>(dir: P) -> Result<Vec<u32>> {
        let re = Regex::new(r"thickness_arr_png_(\d+)min\.pkl$")?;
        let pattern = Path::new(&Pattern::escape(&dir.as_ref().to_string_lossy()))
            .join("thickness_arr_png_*min.pkl");
        let mut minutes: Vec<u32> = glob(&pattern.to_string_lossy())?
            .filter_map(|p| p.ok())
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?.to_string();
                re.captures(&name)?.get(1)?.as_str().parse().ok()
            })
            .collect();
        minutes.sort_unstable();
        Ok(minutes)
    }
    /// Renders the thickness and standard error heatmaps
    #[cfg(feature = "plot")]
    pub fn render<P: AsRef<Path>>(&self, dir: P, minutes: u32) -> Result<Vec<PathBuf>> {
        use crate::plot::Heatmap;
        let dir = dir.as_ref();
        let thickness = dir.join(format!("fitted_thickness_{minutes}min.png"));
        Heatmap::new(&thickness)
            .title(format!("Thickness [Å] after {minutes}min"))
            .draw(&self.thickness)?;
        let stderr = dir.join(format!("fitted_stderr_{minutes}min.png"));
        Heatmap::new(&stderr)
            .title(format!("Thickness standard error [Å] after {minutes}min"))
            .draw(&self.stderr)?;
        Ok(vec![thickness, stderr])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{Estimate, FitError};
    use assert_fs::TempDir;

    #[test]
    fn reshape() {
        for (width, height) in [(1, 1), (3, 2), (2, 3), (7, 1), (1, 5)] {
            let values: Vec<usize> = (0..width * height).collect();
            let map = data_arr_to_2d(&values, width, height).unwrap();
            assert_eq!(map.dim(), (height, width));
            assert_eq!(map.iter().cloned().collect::<Vec<_>>(), values);
            for i in 0..height {
                for j in 0..width {
                    assert_eq!(map[[i, j]], i * width + j);
                }
            }
        }
    }

    #[test]
    fn reshape_mismatch() {
        assert!(matches!(
            data_arr_to_2d(&[1f64; 5], 2, 3),
            Err(MapsError::ShapeMismatch {
                len: 5,
                width: 2,
                height: 3
            })
        ));
    }

    fn fit_maps() -> FitMaps {
        FitMaps::new(
            3,
            2,
            vec![
                PixelFit::Converged(Estimate::new(10., 1.)),
                PixelFit::Converged(Estimate::new(0., 0.5)),
                PixelFit::Failed(FitError::NonFinite),
                PixelFit::NoData,
                PixelFit::Converged(Estimate::new(30., 2.)),
                PixelFit::Converged(Estimate::new(40., 3.)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn maps() {
        let maps = fit_maps().maps();
        assert_eq!(maps.thickness.dim(), (2, 3));
        assert_eq!(maps.thickness[[0, 1]], 0.);
        assert!(maps.thickness[[0, 2]].is_nan());
        assert_eq!(maps.stderr[[1, 2]], 3.);
        assert_eq!(
            maps.status,
            Array2::from_shape_vec((2, 3), vec![0u8, 0, 1, 2, 0, 0]).unwrap()
        );
        assert_eq!(fit_maps().counts(), (4, 1, 1));
    }

    #[test]
    fn save_and_load() {
        let temp = TempDir::new().unwrap();
        let fit_maps = fit_maps();
        let paths = fit_maps.save(temp.path(), 30).unwrap();
        assert_eq!(paths.len(), 5);
        assert!(paths.iter().all(|p| p.is_file()));

        let flat: Vec<f64> = load(temp.path().join("thickness_arr_30min.pkl")).unwrap();
        assert_eq!(flat.len(), 6);
        assert_eq!(flat[4], 30.);
        let maps = Maps::load(temp.path(), 30).unwrap();
        let expected = fit_maps.maps();
        assert_eq!(maps.status, expected.status);
        assert_eq!(maps.stderr[[1, 1]], 2.);
        assert!(maps.thickness[[1, 0]].is_nan());

        fit_maps.save(temp.path(), 0).unwrap();
        assert_eq!(Maps::timepoints(temp.path()).unwrap(), vec![0, 30]);
    }

    #[test]
    fn timepoints_in_bracketed_folder() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("fits[120C]");
        std::fs::create_dir_all(&dir).unwrap();
        fit_maps().save(&dir, 60).unwrap();
        assert_eq!(Maps::timepoints(&dir).unwrap(), vec![60]);
    }

    #[test]
    fn wrong_size() {
        assert!(matches!(
            FitMaps::new(2, 2, vec![PixelFit::NoData; 3]),
            Err(MapsError::ShapeMismatch { len: 3, .. })
        ));
    }
}

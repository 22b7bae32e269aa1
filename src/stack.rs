//! Image stacks
//!
//! The Delta and Psi images of a measurement file stacked along the
//! measurement axis, with the wavelength and angle of incidence broadcast to
//! the same `(N, height, width)` shape.

use crate::{
    fit::PixelSample,
    imaging::{imread_scaled, ImageError, ImageScale},
    metadata::Metadata,
};
use ndarray::{s, Array3, Axis};
use rayon::prelude::*;
use std::{path::PathBuf, time::Instant};

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("failed to load image")]
    Image(#[from] ImageError),
    #[error("{path:?} is {found:?} (height, width), expected {expected:?}")]
    Dimensions {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("failed to stack the images")]
    Shape(#[from] ndarray::ShapeError),
    #[error("{found} values for a stack of {expected} measurements")]
    Length { expected: usize, found: usize },
}
type Result<T> = std::result::Result<T, StackError>;

/// Co-registered `(N, height, width)` arrays of a measurement
#[derive(Debug, Clone)]
pub struct ImageStack {
    pub lambda: Array3<f64>,
    pub aoi: Array3<f64>,
    pub psi: Array3<f64>,
    pub delta: Array3<f64>,
}
impl ImageStack {
    /// Loads all the Delta and Psi images of a measurement file
    pub fn load(metadata: &Metadata) -> Result<Self> {
        Self::load_scaled(metadata, ImageScale::default(), ImageScale::default())
    }
    /// Loads the images applying a grey level scale to Psi and Delta
    pub fn load_scaled(
        metadata: &Metadata,
        psi_scale: ImageScale,
        delta_scale: ImageScale,
    ) -> Result<Self> {
        let now = Instant::now();
        log::info!("Loading {} images pairs...", metadata.len());
        let delta = stack(metadata.iter().map(|m| m.delta.clone()).collect(), delta_scale)?;
        let psi = stack(metadata.iter().map(|m| m.psi.clone()).collect(), psi_scale)?;
        if delta.dim() != psi.dim() {
            let (_, h, w) = delta.dim();
            let (_, ph, pw) = psi.dim();
            return Err(StackError::Dimensions {
                path: metadata.iter().next().map(|m| m.psi.clone()).unwrap_or_default(),
                expected: (h, w),
                found: (ph, pw),
            });
        }
        let lambda = broadcast(&metadata.lambda(), delta.dim());
        let aoi = broadcast(&metadata.aoi(), delta.dim());
        log::info!("... loaded in {}ms", now.elapsed().as_millis());
        Ok(Self {
            lambda,
            aoi,
            psi,
            delta,
        })
    }
    /// Builds a stack from the measurements angles and the image arrays
    pub fn from_arrays(
        lambda: &[f64],
        aoi: &[f64],
        psi: Array3<f64>,
        delta: Array3<f64>,
    ) -> Result<Self> {
        let dim = delta.dim();
        if psi.dim() != dim {
            return Err(StackError::Dimensions {
                path: PathBuf::new(),
                expected: (dim.1, dim.2),
                found: (psi.dim().1, psi.dim().2),
            });
        }
        if let Some(found) = [lambda.len(), aoi.len(), psi.dim().0]
            .into_iter()
            .find(|&n| n != dim.0)
        {
            return Err(StackError::Length {
                expected: dim.0,
                found,
            });
        }
        Ok(Self {
            lambda: broadcast(lambda, dim),
            aoi: broadcast(aoi, dim),
            psi,
            delta,
        })
    }
    /// Number of measurements
    pub fn len(&self) -> usize {
        self.delta.len_of(Axis(0))
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn height(&self) -> usize {
        self.delta.len_of(Axis(1))
    }
    pub fn width(&self) -> usize {
        self.delta.len_of(Axis(2))
    }
    /// Returns the measurements of pixel `(i, j)`
    ///
    /// Measurements with any missing value are dropped
    pub fn pixel(&self, i: usize, j: usize) -> PixelSample {
        let column = |a: &Array3<f64>| a.slice(s![.., i, j]).to_vec();
        PixelSample::new(
            column(&self.lambda),
            column(&self.aoi),
            column(&self.psi),
            column(&self.delta),
        )
        .dropna()
    }
}

fn stack(paths: Vec<PathBuf>, scale: ImageScale) -> Result<Array3<f64>> {
    let images = paths
        .par_iter()
        .map(|path| imread_scaled(path, scale))
        .collect::<std::result::Result<Vec<_>, ImageError>>()?;
    let (height, width) = images.first().map_or((0, 0), |image| image.dim());
    if let Some((path, image)) = paths
        .iter()
        .zip(&images)
        .find(|(_, image)| image.dim() != (height, width))
    {
        return Err(StackError::Dimensions {
            path: path.clone(),
            expected: (height, width),
            found: image.dim(),
        });
    }
    let views: Vec<_> = images.iter().map(|image| image.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

fn broadcast(values: &[f64], (n, height, width): (usize, usize, usize)) -> Array3<f64> {
    Array3::from_shape_fn((n, height, width), |(k, _, _)| values[k])
}

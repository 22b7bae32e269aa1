//! Pixel by pixel thickness fit
//!
//! Every pixel of an [ImageStack] is fitted independently by a [PixelFitter],
//! the optical model and optimizer of the oxide layer. The fits run in
//! parallel on a rayon thread pool; a fit that fails, or panics, only affects
//! its own pixel.

use crate::{
    maps::{FitMaps, MapsError},
    stack::ImageStack,
};
use indicatif::{ParallelProgressIterator, ProgressBar};
use itertools::iproduct;
use rayon::prelude::*;
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

/// Per-pixel fit failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("{samples} samples are not enough to fit {parameters} parameter(s)")]
    Underdetermined { samples: usize, parameters: usize },
    #[error("no model value for lambda={lambda}nm, AOI={aoi}deg")]
    Unmatched { lambda: f64, aoi: f64 },
    #[error("the fit did not converge: {0}")]
    Diverged(String),
    #[error("the fit returned a non-finite estimate")]
    NonFinite,
    #[error("the fit panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to build the fit thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to assemble the fit maps")]
    Maps(#[from] MapsError),
}

/// The measurements of a single pixel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelSample {
    pub lambda: Vec<f64>,
    pub aoi: Vec<f64>,
    pub psi: Vec<f64>,
    pub delta: Vec<f64>,
}
impl PixelSample {
    pub fn new(lambda: Vec<f64>, aoi: Vec<f64>, psi: Vec<f64>, delta: Vec<f64>) -> Self {
        Self {
            lambda,
            aoi,
            psi,
            delta,
        }
    }
    pub fn len(&self) -> usize {
        self.delta.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Iterator over the `(lambda, aoi, psi, delta)` measurements
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, f64, f64)> + '_ {
        self.lambda
            .iter()
            .zip(&self.aoi)
            .zip(&self.psi)
            .zip(&self.delta)
            .map(|(((&l, &a), &p), &d)| (l, a, p, d))
    }
    /// Removes the measurements with any missing value
    pub fn dropna(self) -> Self {
        self.iter()
            .filter(|(l, a, p, d)| [l, a, p, d].iter().all(|x| !x.is_nan()))
            .fold(Self::default(), |mut s, (l, a, p, d)| {
                s.lambda.push(l);
                s.aoi.push(a);
                s.psi.push(p);
                s.delta.push(d);
                s
            })
    }
}

/// A fitted thickness and its standard error
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub thickness: f64,
    pub stderr: f64,
}
impl Estimate {
    pub fn new(thickness: f64, stderr: f64) -> Self {
        Self { thickness, stderr }
    }
}

/// The outcome of a pixel fit
#[derive(Debug, Clone, PartialEq)]
pub enum PixelFit {
    Converged(Estimate),
    Failed(FitError),
    /// every measurement of the pixel is missing
    NoData,
}
impl PixelFit {
    pub const CONVERGED: u8 = 0;
    pub const FAILED: u8 = 1;
    pub const NO_DATA: u8 = 2;

    /// Fitted thickness, `NaN` if the fit did not converge
    pub fn thickness(&self) -> f64 {
        match self {
            PixelFit::Converged(e) => e.thickness,
            _ => f64::NAN,
        }
    }
    /// Thickness standard error, `NaN` if the fit did not converge
    pub fn stderr(&self) -> f64 {
        match self {
            PixelFit::Converged(e) => e.stderr,
            _ => f64::NAN,
        }
    }
    pub fn status(&self) -> u8 {
        match self {
            PixelFit::Converged(_) => Self::CONVERGED,
            PixelFit::Failed(_) => Self::FAILED,
            PixelFit::NoData => Self::NO_DATA,
        }
    }
    pub fn is_converged(&self) -> bool {
        matches!(self, PixelFit::Converged(_))
    }
}
impl fmt::Display for PixelFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFit::Converged(e) => write!(f, "{:.3}+/-{:.3}", e.thickness, e.stderr),
            PixelFit::Failed(e) => write!(f, "failed ({e})"),
            PixelFit::NoData => write!(f, "no data"),
        }
    }
}

/// A bounded free parameter of the layer model
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct Parameter {
    /// initial value
    #[serde(rename = "initial")]
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}
impl Parameter {
    pub fn new(value: f64, lower: f64, upper: f64) -> Self {
        Self {
            value,
            lower,
            upper,
        }
    }
    /// The oxide layer thickness: 50Å, bounded to [0, 1000]Å
    pub fn thickness() -> Self {
        Self::new(50f64, 0f64, 1000f64)
    }
    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }
    pub fn is_valid(&self) -> bool {
        self.lower < self.upper && self.contains(self.value)
    }
}
impl Default for Parameter {
    fn default() -> Self {
        Self::thickness()
    }
}

/// Optical model and optimizer fitting the thickness of a single pixel
pub trait PixelFitter: Sync {
    fn fit(&self, sample: &PixelSample) -> Result<Estimate, FitError>;
}
impl<F: PixelFitter + ?Sized> PixelFitter for &F {
    fn fit(&self, sample: &PixelSample) -> Result<Estimate, FitError> {
        (**self).fit(sample)
    }
}
impl<F: PixelFitter + ?Sized> PixelFitter for Box<F> {
    fn fit(&self, sample: &PixelSample) -> Result<Estimate, FitError> {
        (**self).fit(sample)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Fits a single pixel, catching any failure
pub fn fit_pixel<F: PixelFitter + ?Sized>(fitter: &F, sample: &PixelSample) -> PixelFit {
    if sample.is_empty() {
        return PixelFit::NoData;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| fitter.fit(sample))) {
        Ok(Ok(estimate)) if estimate.thickness.is_finite() => PixelFit::Converged(estimate),
        Ok(Ok(_)) => PixelFit::Failed(FitError::NonFinite),
        Ok(Err(e)) => PixelFit::Failed(e),
        Err(payload) => PixelFit::Failed(FitError::Panicked(panic_message(payload))),
    }
}

/// Parallel pixel fits
#[derive(Debug, Clone, Default)]
pub struct FitDriver {
    threads: Option<usize>,
    progress: bool,
}
impl FitDriver {
    pub fn new() -> Self {
        Default::default()
    }
    /// Sets the number of worker threads, defaults to the number of CPU cores
    pub fn threads(self, threads: usize) -> Self {
        Self {
            threads: Some(threads),
            ..self
        }
    }
    /// Shows a progress bar while fitting
    pub fn progress(self, progress: bool) -> Self {
        Self { progress, ..self }
    }
    /// Fits every pixel of the stack
    pub fn run<F: PixelFitter + ?Sized>(
        &self,
        stack: &ImageStack,
        fitter: &F,
    ) -> Result<FitMaps, DriverError> {
        let (height, width) = (stack.height(), stack.width());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads.unwrap_or(0))
            .build()?;
        let n_thread = pool.current_num_threads();
        let pixels: Vec<(usize, usize)> = iproduct!(0..height, 0..width).collect();
        log::info!("Fitting {} pixels on {} threads...", pixels.len(), n_thread);
        let now = Instant::now();
        let fits: Vec<PixelFit> = pool.install(|| {
            let fits = pixels
                .par_iter()
                .map(|&(i, j)| fit_pixel(fitter, &stack.pixel(i, j)));
            if self.progress {
                fits.progress_with(ProgressBar::new(pixels.len() as u64))
                    .collect()
            } else {
                fits.collect()
            }
        });
        log::info!(
            "Time taken for {} fits using {} threads = {:.3}s",
            fits.len(),
            n_thread,
            now.elapsed().as_secs_f64()
        );
        let maps = FitMaps::new(width, height, fits)?;
        let (converged, failed, no_data) = maps.counts();
        if failed > 0 || no_data > 0 {
            log::warn!(
                "{} pixels converged, {} failed, {} without data",
                converged,
                failed,
                no_data
            );
        }
        Ok(maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// Returns the mean of Delta, failing for negative values
    struct MeanDelta;
    impl PixelFitter for MeanDelta {
        fn fit(&self, sample: &PixelSample) -> Result<Estimate, FitError> {
            let n = sample.len() as f64;
            let mean = sample.delta.iter().sum::<f64>() / n;
            if mean < 0f64 {
                return Err(FitError::Diverged("negative thickness".into()));
            }
            if mean > 1e3 {
                panic!("out of bounds");
            }
            Ok(Estimate::new(mean, n))
        }
    }

    fn stack() -> ImageStack {
        let delta = Array3::from_shape_fn((2, 2, 3), |(k, i, j)| match (i, j) {
            (0, 1) => -1f64,
            (1, 0) => 5e3,
            (1, 2) => f64::NAN,
            (0, 2) if k == 0 => f64::NAN,
            _ => (10 * i + j + k) as f64,
        });
        let psi = Array3::zeros((2, 2, 3));
        ImageStack::from_arrays(&[400., 500.], &[50., 60.], psi, delta).unwrap()
    }

    #[test]
    fn dropna() {
        let sample = PixelSample::new(
            vec![400., 450., 500.],
            vec![50.; 3],
            vec![1., f64::NAN, 3.],
            vec![10., 20., 30.],
        );
        let sample = sample.dropna();
        assert_eq!(sample.lambda, vec![400., 500.]);
        assert_eq!(sample.delta, vec![10., 30.]);
        assert!(PixelSample::default().dropna().is_empty());
    }

    #[test]
    fn pixel_failures_are_isolated() {
        let maps = FitDriver::new().threads(2).run(&stack(), &MeanDelta).unwrap();
        let fits = maps.fits();
        assert_eq!(fits.len(), 6);
        assert_eq!(fits[0], PixelFit::Converged(Estimate::new(0.5, 2.)));
        assert!(matches!(fits[1], PixelFit::Failed(FitError::Diverged(_))));
        // a single valid measurement left
        assert_eq!(fits[2], PixelFit::Converged(Estimate::new(3., 1.)));
        assert!(matches!(&fits[3], PixelFit::Failed(FitError::Panicked(msg)) if msg == "out of bounds"));
        assert_eq!(fits[4], PixelFit::Converged(Estimate::new(11.5, 2.)));
        assert_eq!(fits[5], PixelFit::NoData);
        assert_eq!(maps.counts(), (3, 2, 1));
    }

    #[test]
    fn flattened_values() {
        let fit = PixelFit::Failed(FitError::NonFinite);
        assert!(fit.thickness().is_nan() && fit.stderr().is_nan());
        assert_eq!(fit.status(), PixelFit::FAILED);
        assert_eq!(PixelFit::NoData.status(), PixelFit::NO_DATA);
        let fit = PixelFit::Converged(Estimate::new(0., 0.));
        assert_eq!((fit.thickness(), fit.stderr(), fit.status()), (0., 0., 0));
    }

    #[test]
    fn non_finite() {
        struct Nan;
        impl PixelFitter for Nan {
            fn fit(&self, _: &PixelSample) -> Result<Estimate, FitError> {
                Ok(Estimate::new(f64::NAN, 0.))
            }
        }
        let sample = PixelSample::new(vec![1.], vec![1.], vec![1.], vec![1.]);
        assert_eq!(fit_pixel(&Nan, &sample), PixelFit::Failed(FitError::NonFinite));
    }

    #[test]
    fn thickness_parameter() {
        let p = Parameter::thickness();
        assert!(p.is_valid());
        assert!(p.contains(0.) && p.contains(1000.) && !p.contains(1000.1));
        assert!(!Parameter::new(10., 20., 5.).is_valid());
    }
}

//! Tabulated layer model
//!
//! The ambient/oxide/substrate reflectance model (e.g. air | CuO | Cu) is
//! evaluated beforehand by the optics software and exported as a CSV table
//! with the columns `thickness, lambda, aoi, psi, delta`. [ModelTable] fits a
//! pixel by scanning the χ² of the tabulated thicknesses within the parameter
//! bounds and refining the minimum with a least-squares parabola.

use crate::fit::{Estimate, FitError, Parameter, PixelFitter, PixelSample};
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read the model table {0:?}")]
    Csv(PathBuf, #[source] csv::Error),
    #[error("the model table has {0} thickness value(s), at least 3 are required")]
    Sparse(usize),
    #[error("invalid thickness bounds [{0}, {1}]")]
    Bounds(f64, f64),
    #[error("non-finite model table row: {0:?}")]
    NonFinite(ModelPoint),
}
type Result<T> = std::result::Result<T, ModelError>;

/// Number of thickness nodes of the parabolic refinement
const WINDOW: usize = 5;

/// A row of the model table
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ModelPoint {
    pub thickness: f64,
    pub lambda: f64,
    pub aoi: f64,
    pub psi: f64,
    pub delta: f64,
}

/// Matching tolerance between measurement and table `(lambda, aoi)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// wavelength [nm]
    pub lambda: f64,
    /// angle of incidence [degree]
    pub aoi: f64,
}
impl Default for Tolerance {
    fn default() -> Self {
        Self {
            lambda: 0.5,
            aoi: 0.05,
        }
    }
}

/// Model `(psi, delta)` tabulated against thickness and `(lambda, aoi)`
#[derive(Debug, Clone)]
pub struct ModelTable {
    thickness: Vec<f64>,
    nodes: Vec<(f64, f64)>,
    /// `values[thickness][node]`
    values: Vec<Vec<Option<(f64, f64)>>>,
    parameter: Parameter,
    tolerance: Tolerance,
}
impl ModelTable {
    /// Loads the model table from a CSV file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("Loading {:?}...", path);
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| ModelError::Csv(path.clone(), e))?;
        let points = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<ModelPoint>, csv::Error>>()
            .map_err(|e| ModelError::Csv(path.clone(), e))?;
        Self::from_points(points)
    }
    /// Builds the table from model points
    pub fn from_points<I: IntoIterator<Item = ModelPoint>>(points: I) -> Result<Self> {
        let points: Vec<ModelPoint> = points.into_iter().collect();
        if let Some(p) = points.iter().find(|p| {
            ![p.thickness, p.lambda, p.aoi, p.psi, p.delta]
                .iter()
                .all(|x| x.is_finite())
        }) {
            return Err(ModelError::NonFinite(*p));
        }
        let mut thickness: Vec<f64> = points.iter().map(|p| p.thickness).collect();
        thickness.sort_by(|a, b| a.total_cmp(b));
        thickness.dedup();
        if thickness.len() < 3 {
            return Err(ModelError::Sparse(thickness.len()));
        }
        let mut nodes: Vec<(f64, f64)> = points.iter().map(|p| (p.lambda, p.aoi)).collect();
        nodes.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        nodes.dedup();
        let mut values = vec![vec![None; nodes.len()]; thickness.len()];
        for p in &points {
            let t = thickness.partition_point(|&t| t < p.thickness);
            let n = nodes.partition_point(|&(l, a)| (l, a) < (p.lambda, p.aoi));
            values[t][n] = Some((p.psi, p.delta));
        }
        log::info!(
            "... {} thickness values x {} (lambda,aoi) nodes",
            thickness.len(),
            nodes.len()
        );
        Ok(Self {
            thickness,
            nodes,
            values,
            parameter: Parameter::thickness(),
            tolerance: Tolerance::default(),
        })
    }
    /// Sets the free parameter bounds
    pub fn parameter(self, parameter: Parameter) -> Result<Self> {
        if !(parameter.lower < parameter.upper) {
            return Err(ModelError::Bounds(parameter.lower, parameter.upper));
        }
        Ok(Self { parameter, ..self })
    }
    pub fn tolerance(self, tolerance: Tolerance) -> Self {
        Self { tolerance, ..self }
    }
    /// Returns the thickness values of the table within the bounds
    pub fn thickness(&self) -> impl Iterator<Item = f64> + '_ {
        self.thickness
            .iter()
            .cloned()
            .filter(|&t| self.parameter.contains(t))
    }
    /// Index of the table node nearest to `(lambda, aoi)` within tolerance
    fn node(&self, lambda: f64, aoi: f64) -> Option<usize> {
        let Tolerance {
            lambda: l_tol,
            aoi: a_tol,
        } = self.tolerance;
        self.nodes
            .iter()
            .enumerate()
            .filter(|&(_, &(l, a))| (l - lambda).abs() <= l_tol && (a - aoi).abs() <= a_tol)
            .map(|(k, &(l, a))| (k, ((l - lambda) / l_tol).powi(2) + ((a - aoi) / a_tol).powi(2)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k)
    }
    /// χ² of the sample against thickness index `t`
    fn chi2(&self, t: usize, sample: &PixelSample, nodes: &[usize]) -> Option<f64> {
        sample
            .iter()
            .zip(nodes)
            .map(|((_, _, psi, delta), &n)| {
                self.values[t][n].map(|(psi_m, delta_m)| (psi - psi_m).powi(2) + (delta - delta_m).powi(2))
            })
            .sum()
    }
}
impl PixelFitter for ModelTable {
    fn fit(&self, sample: &PixelSample) -> std::result::Result<Estimate, FitError> {
        let n_residual = 2 * sample.len();
        if n_residual <= 1 {
            return Err(FitError::Underdetermined {
                samples: sample.len(),
                parameters: 1,
            });
        }
        let nodes = sample
            .iter()
            .map(|(lambda, aoi, _, _)| self.node(lambda, aoi).ok_or(FitError::Unmatched { lambda, aoi }))
            .collect::<std::result::Result<Vec<usize>, FitError>>()?;

        let scan: Vec<(f64, f64)> = (0..self.thickness.len())
            .filter(|&t| self.parameter.contains(self.thickness[t]))
            .filter_map(|t| self.chi2(t, sample, &nodes).map(|chi2| (self.thickness[t], chi2)))
            .collect();
        if scan.len() < 3 {
            return Err(FitError::Diverged(format!(
                "{} tabulated thickness value(s) within bounds",
                scan.len()
            )));
        }
        let (k_min, &(t_min, chi2_min)) = scan
            .iter()
            .enumerate()
            .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .ok_or_else(|| FitError::Diverged("empty scan".into()))?;

        // least-squares parabola around the minimum, centered on it
        let half = WINDOW / 2;
        let first = k_min.saturating_sub(half).min(scan.len().saturating_sub(WINDOW));
        let window = &scan[first..(first + WINDOW).min(scan.len())];
        let x = DMatrix::from_fn(window.len(), 3, |r, c| (window[r].0 - t_min).powi(c as i32));
        let y = DVector::from_iterator(window.len(), window.iter().map(|w| w.1));
        let beta = x
            .svd(true, true)
            .solve(&y, 1e-12)
            .map_err(|e| FitError::Diverged(e.to_string()))?;
        let (c0, c1, c2) = (beta[0], beta[1], beta[2]);
        if !(c2 > 0f64) && (k_min == 0 || k_min == scan.len() - 1) {
            // minimum pinned at a bound, no curvature to estimate the error from
            return Ok(Estimate::new(t_min, f64::NAN));
        }
        if !(c2 > 0f64) {
            return Err(FitError::Diverged(format!(
                "non-positive χ² curvature ({c2:e}) at {t_min}"
            )));
        }
        let (lo, hi) = (
            window[0].0.max(self.parameter.lower),
            window[window.len() - 1].0.min(self.parameter.upper),
        );
        let u = (-c1 / (2f64 * c2)).clamp(lo - t_min, hi - t_min);
        let thickness = t_min + u;
        let chi2 = (c0 + c1 * u + c2 * u * u).clamp(0f64, chi2_min);
        let s2 = chi2 / (n_residual - 1) as f64;
        Ok(Estimate::new(thickness, (s2 / c2).sqrt()))
    }
}

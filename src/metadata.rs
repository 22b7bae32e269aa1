//! Measurement file
//!
//! A DataStudio `.ds.dat` file is a tab separated table with one row per
//! acquisition. The first line holds the column names, the second one the
//! units. Only the wavelength, the angle of incidence and the paths to the
//! Delta and Psi images are used, the other columns (`Bandwidth`,
//! `ExposureTime`, `Zone`, `X_pos`, ...) are ignored.

use glob::{glob, Pattern};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to read the measurement file {0:?}")]
    Csv(PathBuf, #[source] csv::Error),
    #[error("the measurement file {0:?} has no measurement")]
    Empty(PathBuf),
    #[error("invalid glob pattern")]
    Pattern(#[from] glob::PatternError),
    #[error("no measurement file found in {0:?}")]
    NotFound(PathBuf),
    #[error("failed to read the image size")]
    Image(#[from] crate::imaging::ImageError),
}
type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Deserialize, Debug)]
struct Record {
    #[serde(rename = "#Lambda")]
    lambda: f64,
    #[serde(rename = "AOI")]
    aoi: f64,
    #[serde(rename = "Delta")]
    delta: String,
    #[serde(rename = "Psi")]
    psi: String,
}

/// One acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// wavelength [nm]
    pub lambda: f64,
    /// angle of incidence [degree]
    pub aoi: f64,
    /// path to the Delta image
    pub delta: PathBuf,
    /// path to the Psi image
    pub psi: PathBuf,
}

/// The acquisitions of a measurement file
#[derive(Debug, Clone)]
pub struct Metadata {
    path: PathBuf,
    measurements: Vec<Measurement>,
}
impl Metadata {
    /// Loads a `.ds.dat` file, resolving image paths against its folder
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("Loading {:?}...", path);
        let csv_error = |e| MetadataError::Csv(path.clone(), e);
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(csv_error)?;
        let headers = rdr.headers().map_err(csv_error)?.clone();
        let mut measurements = vec![];
        // the line after the header holds the units
        for result in rdr.records().skip(1) {
            let record: Record = result
                .and_then(|r| r.deserialize(Some(&headers)))
                .map_err(csv_error)?;
            measurements.push(Measurement {
                lambda: record.lambda,
                aoi: record.aoi,
                delta: dir.join(record.delta),
                psi: dir.join(record.psi),
            });
        }
        if measurements.is_empty() {
            return Err(MetadataError::Empty(path));
        }
        log::info!("... {} measurements", measurements.len());
        Ok(Self { path, measurements })
    }
    /// Finds the `.ds.dat` file in a timepoint folder
    pub fn find<P: AsRef<Path>>(folder: P) -> Result<PathBuf> {
        let folder = folder.as_ref();
        // folder names may hold glob metacharacters, e.g. `run[1]`
        let pattern = Path::new(&Pattern::escape(&folder.to_string_lossy())).join("*.ds.dat");
        glob(&pattern.to_string_lossy())?
            .filter_map(|p| p.ok())
            .next()
            .ok_or_else(|| MetadataError::NotFound(folder.to_path_buf()))
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn len(&self) -> usize {
        self.measurements.len()
    }
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter()
    }
    pub fn lambda(&self) -> Vec<f64> {
        self.iter().map(|m| m.lambda).collect()
    }
    pub fn aoi(&self) -> Vec<f64> {
        self.iter().map(|m| m.aoi).collect()
    }
    /// Returns the `(width, height)` of the images, from the first Delta image
    pub fn image_dimensions(&self) -> Result<(usize, usize)> {
        Ok(crate::imaging::image_dimensions(&self.measurements[0].delta)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_fs::{prelude::*, TempDir};

    pub(crate) const HEADER: &str = "#Lambda\tAOI\tBandwidth\tExposureTime\tAcquisitionFrameRate\tZone\tTime\tX_pos\tY_pos\tDelta\tPsi\n\
[nm]\t[deg]\t[nm]\t[ms]\t[Hz]\t\t[s]\t[mm]\t[mm]\t[deg]\t[deg]\n";

    pub(crate) fn row(lambda: f64, aoi: f64, k: usize) -> String {
        format!("{lambda}\t{aoi}\t10\t25.5\t30\t1\t{k}\t0\t0\tdelta_{k:03}.png\tpsi_{k:03}.png\n")
    }

    #[test]
    fn load() {
        let temp = TempDir::new().unwrap();
        let dat = temp.child("map.ds.dat");
        let body: String = (0..3).map(|k| row(400. + 50. * k as f64, 50., k)).collect();
        dat.write_str(&format!("{HEADER}{body}")).unwrap();
        let metadata = Metadata::from_path(dat.path()).unwrap();
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.lambda(), vec![400., 450., 500.]);
        assert_eq!(metadata.aoi(), vec![50.; 3]);
        let last = metadata.iter().last().unwrap();
        assert_eq!(last.delta, temp.path().join("delta_002.png"));
        assert_eq!(last.psi, temp.path().join("psi_002.png"));
        assert_eq!(Metadata::find(temp.path()).unwrap(), dat.path());
    }

    #[test]
    fn empty() {
        let temp = TempDir::new().unwrap();
        let dat = temp.child("map.ds.dat");
        dat.write_str(HEADER).unwrap();
        assert!(matches!(
            Metadata::from_path(dat.path()),
            Err(MetadataError::Empty(_))
        ));
        assert!(matches!(
            Metadata::find(temp.path().join("nowhere")),
            Err(MetadataError::NotFound(_))
        ));
    }

    #[test]
    fn find_in_bracketed_folder() {
        let temp = TempDir::new().unwrap();
        let folder = temp.child("Cu_120C[1]");
        folder.create_dir_all().unwrap();
        let dat = folder.child("map.ds.dat");
        dat.write_str(HEADER).unwrap();
        assert_eq!(Metadata::find(folder.path()).unwrap(), dat.path());
    }

    #[test]
    fn malformed() {
        let temp = TempDir::new().unwrap();
        let dat = temp.child("map.ds.dat");
        dat.write_str(&format!("{HEADER}abc\t50\t10\t25\t30\t1\t0\t0\t0\td.png\tp.png\n"))
            .unwrap();
        assert!(matches!(
            Metadata::from_path(dat.path()),
            Err(MetadataError::Csv(..))
        ));
    }
}

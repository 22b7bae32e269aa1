//! Experiment configuration
//!
//! A TOML file describing the folders of an experiment and the stages to run:
//!
//! ```toml
//! maps = "/data/2023_01_25_Cu_120C/maps"
//! template = "measurement_{time}min_120C"
//!
//! [timepoints]
//! count = 13
//! interval = 30
//!
//! [split]
//! dat = "Cu_Tile_120C_map_20230125-131101.ds.dat"
//! assets = ["Cu_Tile_120C_map_20230125-131101.ds.png"]
//! rows = 20
//!
//! [fit]
//! model = "/data/models/air_cuo_cu.csv"
//! psi_scale = { min = 0.0, max = 90.0, levels = 65535 }
//! delta_scale = { min = 0.0, max = 360.0, levels = 65535 }
//! ```
//!
//! Relative paths are resolved against `maps`.

use crate::{
    collect::{Collector, ImageSeries},
    fit::{FitDriver, Parameter},
    imaging::ImageScale,
    model::{ModelError, ModelTable, Tolerance},
    split::Splitter,
    timepoint::{FolderTemplate, Timepoint, TimepointError, Timepoints},
};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read the configuration file {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse the configuration")]
    Toml(#[from] toml::de::Error),
    #[error("invalid timepoints")]
    Timepoint(#[from] TimepointError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
type Result<T> = std::result::Result<T, ConfigError>;

fn split_maps() -> PathBuf {
    PathBuf::from("split_maps")
}
fn header_lines() -> usize {
    2
}
fn width() -> usize {
    3
}
fn extension() -> String {
    "png".into()
}
fn fits() -> PathBuf {
    PathBuf::from("fits")
}

/// `[split]` section
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SplitSection {
    /// multi-timepoint measurement file
    pub dat: PathBuf,
    /// files copied into every timepoint folder
    #[serde(default)]
    pub assets: Vec<PathBuf>,
    /// body lines per timepoint
    pub rows: usize,
    #[serde(default = "header_lines")]
    pub header_lines: usize,
}

/// `[collect]` section
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CollectSection {
    /// folder of the numbered images, defaults to `maps`
    pub base: Option<PathBuf>,
    pub prefix: String,
    /// images per timepoint
    pub files: usize,
    #[serde(default = "width")]
    pub width: usize,
    #[serde(default = "extension")]
    pub extension: String,
}

/// Grey levels to degrees mapping of the Psi or Delta images
///
/// Either `{ offset, gain }` or `{ min, max, levels }`
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum GreyScale {
    Linear { offset: f64, gain: f64 },
    Range { min: f64, max: f64, levels: f64 },
}
impl From<GreyScale> for ImageScale {
    fn from(scale: GreyScale) -> Self {
        match scale {
            GreyScale::Linear { offset, gain } => ImageScale::new(offset, gain),
            GreyScale::Range { min, max, levels } => ImageScale::from_range(min, max, levels),
        }
    }
}

/// `[fit]` section
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FitSection {
    /// measurement file name in the timepoint folders, found by extension if absent
    pub dat: Option<String>,
    /// model table CSV
    pub model: PathBuf,
    /// output folder of the pickles and heatmaps
    #[serde(default = "fits")]
    pub out: PathBuf,
    /// defaults to the number of CPU cores
    pub threads: Option<usize>,
    #[serde(default)]
    pub thickness: Parameter,
    /// `(lambda, aoi)` matching tolerance [nm, degree]
    pub tolerance: Option<(f64, f64)>,
    /// Psi images grey levels mapping, raw grey levels if absent
    pub psi_scale: Option<GreyScale>,
    /// Delta images grey levels mapping, raw grey levels if absent
    pub delta_scale: Option<GreyScale>,
    #[serde(default)]
    pub plot: bool,
}

/// An oxidation experiment
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Experiment {
    /// root folder of the experiment
    pub maps: PathBuf,
    /// timepoint folders root
    #[serde(default = "split_maps")]
    pub dest: PathBuf,
    pub template: FolderTemplate,
    #[serde(default)]
    pub timepoints: Timepoints,
    pub split: Option<SplitSection>,
    pub collect: Option<CollectSection>,
    pub fit: Option<FitSection>,
}
impl FromStr for Experiment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let experiment: Experiment = toml::from_str(s)?;
        experiment.validate()?;
        Ok(experiment)
    }
}
impl Experiment {
    /// Loads and validates the configuration file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading {:?}...", path);
        fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?
            .parse()
    }
    pub fn validate(&self) -> Result<()> {
        self.timepoints.validate()?;
        if let Some(split) = &self.split {
            if split.rows == 0 {
                return Err(ConfigError::Invalid("split.rows must be greater than zero".into()));
            }
        }
        if let Some(collect) = &self.collect {
            if collect.files == 0 {
                return Err(ConfigError::Invalid("collect.files must be greater than zero".into()));
            }
        }
        if let Some(fit) = &self.fit {
            if !fit.thickness.is_valid() {
                let Parameter {
                    value,
                    lower,
                    upper,
                } = fit.thickness;
                return Err(ConfigError::Invalid(format!(
                    "fit.thickness: {value} must be within ordered bounds [{lower}, {upper}]"
                )));
            }
            for (name, scale) in [("psi_scale", fit.psi_scale), ("delta_scale", fit.delta_scale)] {
                if let Some(GreyScale::Range { levels, .. }) = scale {
                    if !(levels > 0f64) {
                        return Err(ConfigError::Invalid(format!(
                            "fit.{name}: levels must be greater than zero"
                        )));
                    }
                }
            }
            if fit.threads == Some(0) {
                return Err(ConfigError::Invalid("fit.threads must be greater than zero".into()));
            }
        }
        Ok(())
    }
    /// Resolves `path` against the experiment root
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.maps.join(path)
    }
    /// The timepoint folders root
    pub fn destination(&self) -> PathBuf {
        self.resolve(&self.dest)
    }
    /// The timepoints and their folders
    pub fn folders(&self) -> Vec<(Timepoint, PathBuf)> {
        let dest = self.destination();
        self.timepoints
            .iter()
            .map(|t| (t, self.template.folder(&dest, &t)))
            .collect()
    }
    /// The configured splitter, if any
    pub fn splitter(&self) -> Option<Splitter> {
        self.split.as_ref().map(|split| {
            Splitter::new(self.resolve(&split.dat), self.template.clone())
                .assets(split.assets.iter().map(|asset| self.resolve(asset)))
                .destination(self.destination())
                .timepoints(self.timepoints)
                .rows(split.rows)
                .header_lines(split.header_lines)
        })
    }
    /// The configured image collector, if any
    pub fn collector(&self) -> Option<Collector> {
        self.collect.as_ref().map(|collect| {
            let base = collect
                .base
                .as_ref()
                .map_or_else(|| self.maps.clone(), |base| self.resolve(base));
            let series = ImageSeries::new(collect.prefix.as_str())
                .extension(collect.extension.as_str())
                .width(collect.width);
            Collector::new(base, series, self.template.clone())
                .destination(self.destination())
                .timepoints(self.timepoints)
                .files(collect.files)
        })
    }
}
impl FitSection {
    /// Loads the model table bounded by the thickness parameter
    pub fn model(&self, experiment: &Experiment) -> std::result::Result<ModelTable, ModelError> {
        let table = ModelTable::from_path(experiment.resolve(&self.model))?.parameter(self.thickness)?;
        Ok(match self.tolerance {
            Some((lambda, aoi)) => table.tolerance(Tolerance { lambda, aoi }),
            None => table,
        })
    }
    /// The `(psi, delta)` images grey levels mappings
    pub fn scales(&self) -> (ImageScale, ImageScale) {
        (
            self.psi_scale.map(ImageScale::from).unwrap_or_default(),
            self.delta_scale.map(ImageScale::from).unwrap_or_default(),
        )
    }
    pub fn driver(&self) -> FitDriver {
        let driver = FitDriver::new().progress(true);
        match self.threads {
            Some(threads) => driver.threads(threads),
            None => driver,
        }
    }
    /// The output folder
    pub fn out(&self, experiment: &Experiment) -> PathBuf {
        experiment.resolve(&self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
maps = "/data/2023_01_25_Cu_120C/maps"
template = "measurement_{time}min_120C"

[timepoints]
count = 3
interval = 30

[split]
dat = "Cu_Tile_120C_map_20230125-131101.ds.dat"
assets = ["Cu_Tile_120C_map_20230125-131101.ds.png", "Cu_Tile_120C_map_20230125-131101.dsinfo.xml"]
rows = 20

[collect]
prefix = "Cu-Gr_115C_sample2_20230130-171219_"
files = 40

[fit]
model = "/data/models/air_cuo_cu.csv"
threads = 8
thickness = { initial = 50.0, lower = 0.0, upper = 500.0 }
psi_scale = { min = 0.0, max = 90.0, levels = 65535 }
delta_scale = { offset = -180.0, gain = 0.01 }
"#;

    #[test]
    fn parse() {
        let experiment: Experiment = CONFIG.parse().unwrap();
        assert_eq!(experiment.dest, PathBuf::from("split_maps"));
        assert_eq!(experiment.timepoints, Timepoints::new(3, 30));
        let split = experiment.split.as_ref().unwrap();
        assert_eq!(split.header_lines, 2);
        assert_eq!(split.assets.len(), 2);
        let collect = experiment.collect.as_ref().unwrap();
        assert_eq!((collect.width, collect.extension.as_str()), (3, "png"));
        let fit = experiment.fit.as_ref().unwrap();
        assert_eq!(fit.thickness, Parameter::new(50., 0., 500.));
        assert_eq!(fit.out(&experiment), PathBuf::from("/data/2023_01_25_Cu_120C/maps/fits"));
        assert!(!fit.plot);
        let (psi, delta) = fit.scales();
        assert_eq!(psi, ImageScale::from_range(0., 90., 65535.));
        assert!((psi.apply(65535.) - 90.).abs() < 1e-9);
        assert_eq!(delta, ImageScale::new(-180., 0.01));
    }

    #[test]
    fn folders() {
        let experiment: Experiment = CONFIG.parse().unwrap();
        let folders = experiment.folders();
        assert_eq!(folders.len(), 3);
        assert_eq!(folders[2].0.minutes, 60);
        assert_eq!(
            folders[2].1,
            PathBuf::from("/data/2023_01_25_Cu_120C/maps/split_maps/measurement_60min_120C")
        );
        assert!(experiment.splitter().is_some());
        assert!(experiment.collector().is_some());
    }

    #[test]
    fn optional_sections() {
        let experiment: Experiment = "maps = \"maps\"\ntemplate = \"t{time}\"".parse().unwrap();
        assert_eq!(experiment.timepoints, Timepoints::default());
        assert!(experiment.splitter().is_none());
        assert!(experiment.collector().is_none());
        assert!(experiment.fit.is_none());
    }

    #[test]
    fn raw_grey_levels_by_default() {
        let experiment: Experiment = "maps = \"maps\"\ntemplate = \"t{time}\"\n[fit]\nmodel = \"m.csv\""
            .parse()
            .unwrap();
        let (psi, delta) = experiment.fit.unwrap().scales();
        assert_eq!((psi, delta), (ImageScale::default(), ImageScale::default()));
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            "maps = \"maps\"\ntemplate = \"measurement\"".parse::<Experiment>(),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            "maps = \"maps\"\ntemplate = \"t{time}\"\n[timepoints]\ncount = 0\ninterval = 30"
                .parse::<Experiment>(),
            Err(ConfigError::Timepoint(TimepointError::Empty))
        ));
        assert!(matches!(
            "maps = \"maps\"\ntemplate = \"t{time}\"\n[split]\ndat = \"a.ds.dat\"\nrows = 0"
                .parse::<Experiment>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "maps = \"maps\"\ntemplate = \"t{time}\"\n[fit]\nmodel = \"m.csv\"\nthickness = { initial = 50.0, lower = 100.0, upper = 0.0 }"
                .parse::<Experiment>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "maps = \"maps\"\ntemplate = \"t{time}\"\n[fit]\nmodel = \"m.csv\"\npsi_scale = { min = 0.0, max = 90.0, levels = 0 }"
                .parse::<Experiment>(),
            Err(ConfigError::Invalid(_))
        ));
    }
}

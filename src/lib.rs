//! Copper oxidation imaging ellipsometry
//!
//! Tools to prepare and fit the per-pixel maps of an imaging ellipsometer
//! recording the oxidation of a copper sample over time:
//!  - [Splitter] cuts a multi-timepoint measurement file into timepoint folders,
//!  - [Collector] copies the numbered camera images into the same folders,
//!  - [ImageStack] loads the Delta and Psi images of a measurement file,
//!  - [FitDriver] fits the oxide thickness of every pixel in parallel,
//!  - [FitMaps] saves the thickness maps as Python pickles.
//!
//! ```no_run
//! use ellipso_maps::{FitDriver, ImageStack, Metadata, ModelTable};
//!
//! # fn main() -> ellipso_maps::Result<()> {
//! let metadata = Metadata::from_path("measurement_0min_120C/map.ds.dat")?;
//! let stack = ImageStack::load(&metadata)?;
//! let model = ModelTable::from_path("air_cuo_cu.csv")?;
//! let maps = FitDriver::new().run(&stack, &model)?;
//! maps.summary();
//! maps.save("fits", 0)?;
//! # Ok(())
//! # }
//! ```

pub mod collect;
pub mod config;
pub mod error;
pub mod fit;
pub mod imaging;
pub mod maps;
pub mod metadata;
pub mod model;
#[cfg(feature = "plot")]
pub mod plot;
pub mod split;
pub mod stack;
pub mod timepoint;

pub use collect::{Collector, ImageSeries};
pub use config::Experiment;
pub use error::{Error, Result};
pub use fit::{fit_pixel, Estimate, FitDriver, FitError, Parameter, PixelFit, PixelFitter, PixelSample};
pub use imaging::{image_dimensions, imread, ImageData, ImageScale};
pub use maps::{data_arr_to_2d, FitMaps, Maps};
pub use metadata::Metadata;
pub use model::{ModelTable, Tolerance};
pub use split::Splitter;
pub use stack::ImageStack;
pub use timepoint::{FolderTemplate, Timepoint, Timepoints};

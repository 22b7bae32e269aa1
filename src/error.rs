use crate::{
    collect::CollectError, config::ConfigError, fit::DriverError, imaging::ImageError,
    maps::MapsError, metadata::MetadataError, model::ModelError, split::SplitError,
    stack::StackError, timepoint::TimepointError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `split` module")]
    Split(#[from] SplitError),
    #[error("Error in the `collect` module")]
    Collect(#[from] CollectError),
    #[error("Error in the `timepoint` module")]
    Timepoint(#[from] TimepointError),
    #[error("Error in the `imaging` module")]
    Image(#[from] ImageError),
    #[error("Error in the `metadata` module")]
    Metadata(#[from] MetadataError),
    #[error("Error in the `stack` module")]
    Stack(#[from] StackError),
    #[error("Error in the `fit` module")]
    Fit(#[from] DriverError),
    #[error("Error in the `model` module")]
    Model(#[from] ModelError),
    #[error("Error in the `maps` module")]
    Maps(#[from] MapsError),
    #[error("Error in the `config` module")]
    Config(#[from] ConfigError),
    #[cfg(feature = "plot")]
    #[error("Error in the `plot` module")]
    Plot(#[from] crate::plot::PlotError),
}
pub type Result<T> = std::result::Result<T, Error>;

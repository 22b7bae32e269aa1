//! Image file collector
//!
//! The camera writes one numbered image per acquisition
//! (`<prefix>001.png`, `<prefix>002.png`, ...). [Collector] copies them into
//! the timepoint folders, `files` images per timepoint.

use crate::timepoint::{FolderTemplate, Timepoint, Timepoints};
use std::{
    fs,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    time::Instant,
};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("failed to copy {0:?}")]
    Copy(PathBuf, #[source] std::io::Error),
    #[error("failed to create folder {0:?}")]
    Folder(PathBuf, #[source] std::io::Error),
}
type Result<T> = std::result::Result<T, CollectError>;

/// Numbered image file names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSeries {
    prefix: String,
    extension: String,
    width: usize,
}
impl ImageSeries {
    /// Creates a series of zero-padded 3 digits PNG files
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: "png".to_string(),
            width: 3,
        }
    }
    pub fn extension(self, extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..self
        }
    }
    /// Sets the number of digits of the file number
    pub fn width(self, width: usize) -> Self {
        Self { width, ..self }
    }
    /// Returns the name of the file with number `index`
    pub fn file_name(&self, index: usize) -> String {
        format!(
            "{}{:0width$}.{}",
            self.prefix,
            index,
            self.extension,
            width = self.width
        )
    }
}

/// Copies numbered images into timepoint folders
#[derive(Debug, Clone)]
pub struct Collector {
    base: PathBuf,
    dest: PathBuf,
    series: ImageSeries,
    template: FolderTemplate,
    timepoints: Timepoints,
    files: usize,
}
impl Collector {
    /// Creates a collector of the images in `base`, writing into `<base>/split_maps`
    pub fn new<P: AsRef<Path>>(base: P, series: ImageSeries, template: FolderTemplate) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            dest: base.join("split_maps"),
            base,
            series,
            template,
            timepoints: Timepoints::default(),
            files: 40,
        }
    }
    pub fn destination<P: AsRef<Path>>(self, dest: P) -> Self {
        Self {
            dest: dest.as_ref().to_path_buf(),
            ..self
        }
    }
    pub fn timepoints(self, timepoints: Timepoints) -> Self {
        Self { timepoints, ..self }
    }
    /// Sets the number of images per timepoint
    pub fn files(self, files: usize) -> Self {
        Self { files, ..self }
    }
    /// Returns the file numbers belonging to a timepoint
    pub fn indices(&self, timepoint: &Timepoint) -> RangeInclusive<usize> {
        let first = timepoint.index * self.files + 1;
        first..=timepoint.index * self.files + self.files
    }
    /// Copies the images and returns the timepoint folders
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        let now = Instant::now();
        if !self.dest.exists() {
            fs::create_dir_all(&self.dest).map_err(|e| CollectError::Folder(self.dest.clone(), e))?;
        }
        log::info!("Collecting images from {:?} into {:?}...", self.base, self.dest);
        let mut folders = vec![];
        for timepoint in self.timepoints.iter() {
            let folder = self.template.folder(&self.dest, &timepoint);
            if !folder.exists() {
                fs::create_dir_all(&folder).map_err(|e| CollectError::Folder(folder.clone(), e))?;
            }
            for index in self.indices(&timepoint) {
                let name = self.series.file_name(index);
                let from = self.base.join(&name);
                log::debug!("{timepoint}: {name}");
                fs::copy(&from, folder.join(&name)).map_err(|e| CollectError::Copy(from, e))?;
            }
            folders.push(folder);
        }
        log::info!(
            "... {} images copied in {}ms",
            self.timepoints.count * self.files,
            now.elapsed().as_millis()
        );
        Ok(folders)
    }
}

//! Measurement file splitter
//!
//! A DataStudio map export holds every timepoint in a single `.ds.dat` file.
//! [Splitter] cuts its body in equal slices, one per timepoint, and writes
//! each slice, preceded by the original header, into the timepoint folder
//! together with a copy of the shared assets (`.ds.png`, `.dsinfo.xml`).

use crate::timepoint::{FolderTemplate, Timepoints};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Instant,
};

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("failed to read {0:?}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("failed to write {0:?}")]
    Write(PathBuf, #[source] std::io::Error),
    #[error("{path:?} has {found} body lines, expected at least {expected}")]
    ShortBody {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("{path:?} has {found} lines, less than the {expected} header lines")]
    ShortHeader {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("{0:?} has no file name")]
    FileName(PathBuf),
    #[error("the number of body lines per timepoint must be greater than zero")]
    ZeroRows,
}
type Result<T> = std::result::Result<T, SplitError>;

/// Splits a multi-timepoint measurement file into timepoint folders
#[derive(Debug, Clone)]
pub struct Splitter {
    dat: PathBuf,
    assets: Vec<PathBuf>,
    dest: PathBuf,
    template: FolderTemplate,
    timepoints: Timepoints,
    rows: usize,
    header_lines: usize,
}
impl Splitter {
    /// Creates a splitter for `dat`, writing into `<dat folder>/split_maps`
    pub fn new<P: AsRef<Path>>(dat: P, template: FolderTemplate) -> Self {
        let dat = dat.as_ref().to_path_buf();
        let dest = dat
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("split_maps");
        Self {
            dat,
            assets: vec![],
            dest,
            template,
            timepoints: Timepoints::default(),
            rows: 20,
            header_lines: 2,
        }
    }
    /// Adds a file copied as is into every timepoint folder
    pub fn asset<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.assets.push(path.as_ref().to_path_buf());
        self
    }
    pub fn assets<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().fold(self, |this, p| this.asset(p))
    }
    /// Sets the root folder of the timepoint folders
    pub fn destination<P: AsRef<Path>>(self, dest: P) -> Self {
        Self {
            dest: dest.as_ref().to_path_buf(),
            ..self
        }
    }
    pub fn timepoints(self, timepoints: Timepoints) -> Self {
        Self { timepoints, ..self }
    }
    /// Sets the number of body lines per timepoint
    pub fn rows(self, rows: usize) -> Self {
        Self { rows, ..self }
    }
    /// Sets the number of header lines replicated into every split file
    pub fn header_lines(self, header_lines: usize) -> Self {
        Self {
            header_lines,
            ..self
        }
    }
    /// Writes the split files and returns the timepoint folders
    pub fn split(&self) -> Result<Vec<PathBuf>> {
        if self.rows == 0 {
            return Err(SplitError::ZeroRows);
        }
        let now = Instant::now();
        log::info!("Splitting {:?}...", self.dat);
        let contents =
            fs::read_to_string(&self.dat).map_err(|e| SplitError::Read(self.dat.clone(), e))?;
        let lines: Vec<&str> = contents.split_inclusive('\n').collect();
        if lines.len() < self.header_lines {
            return Err(SplitError::ShortHeader {
                path: self.dat.clone(),
                expected: self.header_lines,
                found: lines.len(),
            });
        }
        let (header, body) = lines.split_at(self.header_lines);
        let expected = self.timepoints.count * self.rows;
        if body.len() < expected {
            return Err(SplitError::ShortBody {
                path: self.dat.clone(),
                expected,
                found: body.len(),
            });
        }
        let dat_name = self
            .dat
            .file_name()
            .ok_or_else(|| SplitError::FileName(self.dat.clone()))?;

        create_dir(&self.dest)?;
        let mut folders = vec![];
        for (timepoint, slice) in self.timepoints.iter().zip(body.chunks(self.rows)) {
            let folder = self.template.folder(&self.dest, &timepoint);
            create_dir(&folder)?;
            for asset in &self.assets {
                let name = asset
                    .file_name()
                    .ok_or_else(|| SplitError::FileName(asset.clone()))?;
                let to = folder.join(name);
                log::debug!("{:?} -> {:?}", asset, to);
                fs::copy(asset, &to).map_err(|e| SplitError::Read(asset.clone(), e))?;
            }
            let path = folder.join(dat_name);
            let mut file =
                fs::File::create(&path).map_err(|e| SplitError::Write(path.clone(), e))?;
            header
                .iter()
                .chain(slice)
                .try_for_each(|line| file.write_all(line.as_bytes()))
                .map_err(|e| SplitError::Write(path.clone(), e))?;
            log::debug!("{timepoint}: {} lines written to {:?}", slice.len(), path);
            folders.push(folder);
        }
        log::info!(
            "... {} timepoints written in {}ms",
            folders.len(),
            now.elapsed().as_millis()
        );
        Ok(folders)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| SplitError::Write(path.to_path_buf(), e))?;
    }
    Ok(())
}

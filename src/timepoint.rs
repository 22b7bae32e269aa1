//! Timepoint schedule
//!
//! A run is made of `count` measurement epochs taken every `interval` minutes,
//! each one stored in its own folder named after a template like
//! `measurement_{time}min_120C`.

use serde::Deserialize;
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Placeholder substituted with the timepoint minutes
pub const TIME_PLACEHOLDER: &str = "{time}";

#[derive(Debug, thiserror::Error)]
pub enum TimepointError {
    #[error("folder template {0:?} is missing the `{{time}}` placeholder")]
    Template(String),
    #[error("the number of timepoints must be greater than zero")]
    Empty,
}

/// A single measurement epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timepoint {
    pub index: usize,
    pub minutes: u32,
}
impl fmt::Display for Timepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.minutes)
    }
}

/// Evenly spaced measurement epochs
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timepoints {
    pub count: usize,
    /// Time between two epochs [minutes]
    pub interval: u32,
}
impl Default for Timepoints {
    fn default() -> Self {
        Self {
            count: 13,
            interval: 30,
        }
    }
}
impl Timepoints {
    pub fn new(count: usize, interval: u32) -> Self {
        Self { count, interval }
    }
    pub fn validate(&self) -> Result<(), TimepointError> {
        if self.count == 0 {
            return Err(TimepointError::Empty);
        }
        Ok(())
    }
    pub fn iter(&self) -> impl Iterator<Item = Timepoint> + '_ {
        (0..self.count).map(move |index| Timepoint {
            index,
            minutes: index as u32 * self.interval,
        })
    }
    /// Returns the minutes of every epoch
    pub fn minutes(&self) -> Vec<u32> {
        self.iter().map(|t| t.minutes).collect()
    }
}

/// Folder name template
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct FolderTemplate(String);
impl FolderTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, TimepointError> {
        let template = template.into();
        if !template.contains(TIME_PLACEHOLDER) {
            return Err(TimepointError::Template(template));
        }
        Ok(Self(template))
    }
    pub fn render(&self, timepoint: &Timepoint) -> String {
        self.0
            .replace(TIME_PLACEHOLDER, &timepoint.minutes.to_string())
    }
    /// Returns the folder of a timepoint within `root`
    pub fn folder<P: AsRef<Path>>(&self, root: P, timepoint: &Timepoint) -> PathBuf {
        root.as_ref().join(self.render(timepoint))
    }
}
impl TryFrom<String> for FolderTemplate {
    type Error = TimepointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl fmt::Display for FolderTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

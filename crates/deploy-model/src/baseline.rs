use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Baseline profile files that apply to devices with an API level in
/// `min_api..=max_api`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineProfile {
    min_api: u32,
    max_api: u32,
    paths: Vec<PathBuf>,
}

impl BaselineProfile {
    pub fn new(min_api: u32, max_api: u32, paths: Vec<PathBuf>) -> Result<Self, ModelError> {
        if min_api > max_api {
            return Err(ModelError::InvalidApiRange { min_api, max_api });
        }
        Ok(Self {
            min_api,
            max_api,
            paths,
        })
    }

    /// A profile that applies regardless of API level.
    pub fn any_api(paths: Vec<PathBuf>) -> Self {
        Self {
            min_api: 0,
            max_api: u32::MAX,
            paths,
        }
    }

    pub fn min_api(&self) -> u32 {
        self.min_api
    }

    pub fn max_api(&self) -> u32 {
        self.max_api
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn contains(&self, api_level: u32) -> bool {
        (self.min_api..=self.max_api).contains(&api_level)
    }

    pub fn overlaps(&self, other: &BaselineProfile) -> bool {
        self.min_api <= other.max_api && other.min_api <= self.max_api
    }
}

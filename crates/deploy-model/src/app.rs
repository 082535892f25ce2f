use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Apk, BaselineProfile, ModelError};

const APK_EXTENSION: &str = "apk";
const DEX_METADATA_EXTENSION: &str = "dm";

/// An application identity together with the APKs that make it up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    app_id: String,
    apks: Vec<Apk>,
    baseline_profiles: Vec<BaselineProfile>,
}

impl App {
    /// Profiles are ordered by `min_api`; when ranges overlap the first one
    /// in that order wins lookups.
    pub fn new(
        app_id: impl Into<String>,
        apks: Vec<Apk>,
        mut baseline_profiles: Vec<BaselineProfile>,
    ) -> Self {
        let app_id = app_id.into();
        baseline_profiles.sort_by_key(BaselineProfile::min_api);
        for pair in baseline_profiles.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                tracing::warn!(
                    target: crate::TRACE_TARGET,
                    app_id = %app_id,
                    first = ?(pair[0].min_api(), pair[0].max_api()),
                    second = ?(pair[1].min_api(), pair[1].max_api()),
                    "overlapping baseline profile ranges; the lower range wins"
                );
            }
        }
        Self {
            app_id,
            apks,
            baseline_profiles,
        }
    }

    pub fn from_apks(app_id: impl Into<String>, apks: Vec<Apk>) -> Self {
        Self::new(app_id, apks, Vec::new())
    }

    /// Classifies `paths` by extension: `.apk` files become [`Apk`]s named
    /// after the file, `.dm` files are gathered into a single profile that
    /// applies to every API level.
    pub fn from_paths<I, P>(app_id: impl Into<String>, paths: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut apks = Vec::new();
        let mut profile_files = Vec::new();

        for path in paths {
            let path = path.as_ref();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(APK_EXTENSION) => apks.push(apk_for_path(path)),
                Some(DEX_METADATA_EXTENSION) => profile_files.push(path.to_path_buf()),
                _ => return Err(ModelError::UnknownFileType(path.to_path_buf())),
            }
        }

        let profiles = if profile_files.is_empty() {
            Vec::new()
        } else {
            vec![BaselineProfile::any_api(profile_files)]
        };
        Ok(Self::new(app_id, apks, profiles))
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn apks(&self) -> &[Apk] {
        &self.apks
    }

    pub fn baseline_profiles(&self) -> &[BaselineProfile] {
        &self.baseline_profiles
    }

    /// Profile files for a device at `api_level`; empty when no range matches.
    pub fn baseline_profile(&self, api_level: u32) -> &[PathBuf] {
        self.baseline_profiles
            .iter()
            .find(|profile| profile.contains(api_level))
            .map(BaselineProfile::paths)
            .unwrap_or_default()
    }
}

fn apk_for_path(path: &Path) -> Apk {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Apk::builder().name(name).path(path).build()
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A zip entry of an APK, identified by name and content checksum.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApkEntry {
    pub name: String,
    pub checksum: u64,
}

impl ApkEntry {
    pub fn new(name: impl Into<String>, checksum: u64) -> Self {
        Self {
            name: name.into(),
            checksum,
        }
    }
}

/// An entry together with the APK that contains it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApkEntryRef<'a> {
    apk: &'a Apk,
    entry: &'a ApkEntry,
}

impl<'a> ApkEntryRef<'a> {
    pub fn apk(&self) -> &'a Apk {
        self.apk
    }

    pub fn entry(&self) -> &'a ApkEntry {
        self.entry
    }

    pub fn name(&self) -> &'a str {
        &self.entry.name
    }

    pub fn checksum(&self) -> u64 {
        self.entry.checksum
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntentFilter {
    pub actions: Vec<String>,
    pub categories: Vec<String>,
}

/// An activity, service or receiver declared in the manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestComponent {
    pub qualified_name: String,
    pub permissions: Vec<String>,
    pub intent_filters: Vec<IntentFilter>,
    /// Only meaningful for services.
    pub isolated_process: bool,
}

impl ManifestComponent {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            ..Self::default()
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.intent_filters
            .iter()
            .any(|filter| filter.actions.iter().any(|a| a == action))
    }
}

/// An installable package file.
///
/// Component inventories come from the parsed manifest and are only kept for
/// the lifetime of the current process; they are not serialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apk {
    name: String,
    checksum: String,
    path: PathBuf,
    package_name: String,
    library_abis: Vec<String>,
    target_packages: Vec<String>,
    #[serde(skip)]
    activities: Vec<ManifestComponent>,
    #[serde(skip)]
    services: Vec<ManifestComponent>,
    #[serde(skip)]
    receivers: Vec<ManifestComponent>,
    entries: BTreeMap<String, ApkEntry>,
    sdk_libraries: Vec<String>,
}

impl Apk {
    pub fn builder() -> ApkBuilder {
        ApkBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn library_abis(&self) -> &[String] {
        &self.library_abis
    }

    /// Packages instrumented by this APK; empty unless it is a test APK.
    pub fn target_packages(&self) -> &[String] {
        &self.target_packages
    }

    pub fn activities(&self) -> &[ManifestComponent] {
        &self.activities
    }

    pub fn services(&self) -> &[ManifestComponent] {
        &self.services
    }

    pub fn receivers(&self) -> &[ManifestComponent] {
        &self.receivers
    }

    pub fn sdk_libraries(&self) -> &[String] {
        &self.sdk_libraries
    }

    pub fn entry(&self, name: &str) -> Option<ApkEntryRef<'_>> {
        self.entries
            .get(name)
            .map(|entry| ApkEntryRef { apk: self, entry })
    }

    /// Entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = ApkEntryRef<'_>> + '_ {
        self.entries
            .values()
            .map(move |entry| ApkEntryRef { apk: self, entry })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Accumulates the fields of an [`Apk`]. Unset fields default to empty.
#[derive(Debug, Default)]
pub struct ApkBuilder {
    apk: Apk,
}

impl ApkBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.apk.name = name.into();
        self
    }

    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.apk.checksum = checksum.into();
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.apk.path = path.into();
        self
    }

    pub fn package_name(mut self, package_name: impl Into<String>) -> Self {
        self.apk.package_name = package_name.into();
        self
    }

    pub fn library_abis<I, S>(mut self, abis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apk.library_abis = abis.into_iter().map(Into::into).collect();
        self
    }

    pub fn target_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apk.target_packages = packages.into_iter().map(Into::into).collect();
        self
    }

    pub fn activities(mut self, activities: Vec<ManifestComponent>) -> Self {
        self.apk.activities = activities;
        self
    }

    pub fn services(mut self, services: Vec<ManifestComponent>) -> Self {
        self.apk.services = services;
        self
    }

    pub fn receivers(mut self, receivers: Vec<ManifestComponent>) -> Self {
        self.apk.receivers = receivers;
        self
    }

    /// Adds an entry, replacing any previous entry with the same name.
    pub fn entry(mut self, name: impl Into<String>, checksum: u64) -> Self {
        let entry = ApkEntry::new(name, checksum);
        self.apk.entries.insert(entry.name.clone(), entry);
        self
    }

    pub fn sdk_libraries<I, S>(mut self, libraries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apk.sdk_libraries = libraries.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Apk {
        self.apk
    }
}

//! Static description of what gets installed: an [`App`], the [`Apk`]s it is
//! made of and the [`BaselineProfile`]s that apply per API level.
//!
//! Everything here is plain data. Construction is the only point where
//! values are validated; after that the types are read-only.

mod apk;
mod app;
mod baseline;

use std::path::PathBuf;

pub use apk::{Apk, ApkBuilder, ApkEntry, ApkEntryRef, IntentFilter, ManifestComponent};
pub use app::App;
pub use baseline::BaselineProfile;

pub const TRACE_TARGET: &str = "deploy.model";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown file type '{}': expected an .apk or .dm file", .0.display())]
    UnknownFileType(PathBuf),
    #[error("invalid baseline profile range: min api {min_api} is greater than max api {max_api}")]
    InvalidApiRange { min_api: u32, max_api: u32 },
}

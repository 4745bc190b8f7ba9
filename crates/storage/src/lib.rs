//! Storage backends holding backup artifacts.
//!
//! A backend is a flat-ish namespace of relative paths: artifacts live at the
//! top level, snapshot directories contain further files. The same
//! [`StorageBackend`] interface serves the local backup directory and the
//! remote copy, so retention runs identically against both.

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::{FileInfo, TopLevelEntry};
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;

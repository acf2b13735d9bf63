//! Resumable model downloads for easel.
//!
//! [`RegistryClient`] speaks the remote model registry's metadata and
//! file-resolution protocol; [`DownloadEngine`] runs multi-file downloads
//! with byte-range resume, live progress, and cancellation.

pub mod engine;
pub mod error;
pub mod progress;
pub mod registry;

pub use engine::{DownloadEngine, DownloadView};
pub use error::DownloadError;
pub use registry::{RegistryClient, RepoFile, RepoMetadata};

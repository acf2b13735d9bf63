//! Engine lifecycle management for easel.
//!
//! Owns everything between a model descriptor and a working inference
//! endpoint: the process registry (§process bookkeeping), the model manager
//! (spawn, readiness, stop), the typed HTTP client for `server`-mode
//! engines, and the argv builder + runner for `cli`-mode engines.

pub mod cli;
pub mod config;
pub mod error;
pub mod logs;
pub mod manager;
pub mod registry;
pub mod server_api;

pub use config::{ModelDescriptor, ModelsConfig};
pub use error::EngineError;
pub use manager::ModelManager;
pub use registry::{ProcessRecord, ProcessRegistry};

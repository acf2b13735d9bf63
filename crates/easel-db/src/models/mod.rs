//! Row models and DTOs, one module per entity.

pub mod download;
pub mod image;
pub mod job;
pub mod model;
pub mod process;

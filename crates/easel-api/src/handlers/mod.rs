//! Request handlers, grouped by resource.

pub mod downloads;
pub mod generations;
pub mod images;
pub mod jobs;
pub mod models;

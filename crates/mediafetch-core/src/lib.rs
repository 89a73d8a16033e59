//! mediafetch core - resilient download engine
//!
//! This crate scrapes media URLs from a page and downloads each one,
//! resuming interrupted transfers and waiting out network outages.

pub mod batch;
pub mod config;
pub mod engine;
mod error;
pub mod lister;

#[cfg(test)]
mod testing;

pub use batch::BatchRunner;
pub use engine::*;
pub use error::*;

//! Download Engine - the heart of mediafetch
//!
//! This module implements a resilient single-file download engine with:
//! - One attempt in flight at a time, awaited through a channel
//! - Byte-range resume from in-memory tokens
//! - Connectivity-gated, unbounded retry
//! - In-place progress reporting

mod connectivity;
mod download_engine;
mod http_transport;
mod job;
mod progress;
mod transport;

pub use connectivity::*;
pub use download_engine::*;
pub use http_transport::*;
pub use job::*;
pub use progress::*;
pub use transport::*;

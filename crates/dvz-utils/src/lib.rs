// A set of helper structs shared by every layer of the rendering protocol
pub mod timing;
#[macro_use]
pub mod logging;
pub mod log;

extern crate anyhow;
pub use anyhow::{anyhow, Context, Error, Result};

/// Reads the `NUM_THREADS` environment variable described in the protocol's
/// external interfaces: an explicit positive integer caps parallelism for
/// CPU-side data massaging (e.g. staging buffer packing), 0 or unset means
/// half of the available CPU cores.
pub fn num_worker_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    match std::env::var("NUM_THREADS").ok().and_then(|v| v.parse().ok()) {
        Some(0) | None => (cores / 2).max(1),
        Some(n) => n,
    }
}

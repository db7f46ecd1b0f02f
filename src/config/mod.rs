//! Configuration for the sentiment server
//!
//! Settings come from CLI flags and environment variables; every struct also
//! deserializes from JSON with per-field defaults.

mod artifacts;
mod batcher;
mod server;

pub use artifacts::{ArtifactPaths, DATA_DIR_ENV, DEFAULT_MODEL_REPO};
pub use batcher::BatcherConfig;
pub use server::ServerConfig;

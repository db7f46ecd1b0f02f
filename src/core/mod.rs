pub mod error;
pub mod timing;

pub use error::{DecodeInvariantError, InferenceError, ModelLoadError};
pub use timing::{duration_to_ms, TimingReport};

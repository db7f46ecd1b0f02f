//! Millisecond latency bookkeeping for a single inference call.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Per-phase latency of one `infer` call, in whole milliseconds.
///
/// `model_load_ms` is measured once when the engine is built and repeated
/// unchanged on every report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingReport {
    pub tokenize_ms: u64,
    pub inference_ms: u64,
    pub total_ms: u64,
    pub model_load_ms: u64,
}

/// Round a duration to the nearest millisecond.
pub fn duration_to_ms(duration: Duration) -> u64 {
    (duration.as_secs_f64() * 1000.0).round() as u64
}

/// Checkpoints recorded while an inference call progresses.
#[derive(Debug)]
pub(crate) struct PhaseClock {
    start: Instant,
    tokenized: Option<Instant>,
}

impl PhaseClock {
    pub(crate) fn start() -> Self {
        Self {
            start: Instant::now(),
            tokenized: None,
        }
    }

    pub(crate) fn mark_tokenized(&mut self) {
        self.tokenized = Some(Instant::now());
    }

    /// Close the clock after the forward pass.
    pub(crate) fn finish(self, model_load_ms: u64) -> TimingReport {
        let end = Instant::now();
        let tokenized = self.tokenized.unwrap_or(end);

        TimingReport {
            tokenize_ms: duration_to_ms(tokenized - self.start),
            inference_ms: duration_to_ms(end - tokenized),
            total_ms: duration_to_ms(end - self.start),
            model_load_ms,
        }
    }
}

//! Sentiment analysis pipeline: the inference engine behind the HTTP service.
//!
//! Loads a sequence-classification model and its tokenizer once, then turns a
//! batch of raw strings into one of five fixed sentiment labels per string,
//! reporting how long tokenization and the forward pass took.
//!
//! ## Main Types
//!
//! - [`SentimentAnalysisPipeline`] - owns model + tokenizer, exposes `infer`
//! - [`SentimentAnalysisPipelineBuilder`] - loads the pipeline from local artifacts
//! - [`SentimentAnalysisModel`] - trait for classifier implementations
//! - [`SentimentLabel`] - the fixed label set
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use sentiment_serve::pipelines::sentiment_analysis_pipeline::*;
//! use sentiment_serve::pipelines::utils::DeviceSelectable;
//!
//! # fn run() -> anyhow::Result<()> {
//! let pipeline = SentimentAnalysisPipelineBuilder::bert(
//!     "data/model_sentiment.pt",
//!     "data/tokenizer_sentiment.pt",
//! )
//! .cpu()
//! .build()?;
//!
//! let result = pipeline.infer(&["Hello, how are you doing today?"])?;
//! println!("{} in {} ms", result.predictions[0], result.timings.total_ms);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod labels;
pub mod model;
pub mod pipeline;

pub use builder::SentimentAnalysisPipelineBuilder;
pub use labels::{decode_logits, SentimentLabel};
pub use model::SentimentAnalysisModel;
pub use pipeline::{EncodedBatch, InferenceResult, SentimentAnalysisPipeline};

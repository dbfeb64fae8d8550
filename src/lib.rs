//! tokenlens: byte-level BPE tokenization and cached next-token sampling.
//!
//! This crate implements the pipeline behind an interactive next-token
//! explorer:
//! - GPT-2-style byte-level BPE encoding with source offsets
//! - Temperature softmax with top-k and nucleus (top-p) filtering
//! - An LRU cache of sampling-ready results keyed by prompt and parameters
//! - An async single-outstanding-request protocol to a backend worker

pub mod config;
pub mod error;

pub mod backend;
pub mod cache;
pub mod engine;
pub mod sampling;
pub mod tokenizer;

pub use backend::{BackendLoader, ExecutionMode, InferenceBackend, NamedTensors, RunResult};
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use config::{BackendConfig, EngineConfig, SamplingMode, SamplingParams};
pub use engine::{Engine, InferenceClient, InitReport};
pub use error::{Error, Result};
pub use sampling::{
    nucleus_top_p_filter, sample_from_probs, stable_softmax, top_k_filter, Sampler,
};
pub use tokenizer::{BpeTokenizer, SpecialTokens, TokenWithOffset, TokenizerResources};

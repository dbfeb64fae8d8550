//! Generation engine.
//!
//! [`Engine`] wires the pieces together into the single user-facing call
//! path:
//!
//! ```text
//! generate_next_token(text, params)
//!     │
//!     ▼ tokenizer  (text → ids + display tokens)
//!     ▼ cache      (hit → straight to the draw)
//!     ▼ client     (dispatch → worker → backend → filtered probs)
//!     ▼ sampler    (one uniform draw)
//! token id
//! ```
//!
//! A cache hit never touches the worker, but still consumes a fresh random
//! draw, so repeated calls over a cached prompt keep producing varied
//! tokens.

pub mod client;
pub mod tracker;
pub mod worker;

pub use client::{InferenceClient, InitReport};
pub use tracker::{RequestId, RequestTracker};
pub use worker::{WorkerChannels, WorkerRequest, WorkerResponse};

use tracing::{debug, info};

use crate::backend::{BackendLoader, RunResult};
use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::config::{BackendConfig, EngineConfig, SamplingParams};
use crate::error::{Error, Result};
use crate::sampling::Sampler;
use crate::tokenizer::BpeTokenizer;

/// End-to-end next-token generation over a tokenizer, a cached result store,
/// and a backend worker.
pub struct Engine {
    tokenizer: BpeTokenizer,
    cache: ResultCache,
    client: InferenceClient,
    sampler: Sampler,
    model_version: Option<String>,
    last_result: Option<RunResult>,
}

impl Engine {
    /// Build an engine around a tokenizer and a backend loader.
    ///
    /// Spawns the worker task on the current tokio runtime; the backend
    /// itself is not loaded until [`Engine::load_model`].
    pub fn new(
        tokenizer: BpeTokenizer,
        loader: Box<dyn BackendLoader>,
        config: &EngineConfig,
    ) -> Self {
        let channels = worker::spawn(loader);
        Self {
            tokenizer,
            cache: ResultCache::new(config.cache_capacity),
            client: InferenceClient::new(channels, config.request_timeout),
            sampler: Sampler::new(),
            model_version: None,
            last_result: None,
        }
    }

    /// Same as [`Engine::new`] but with a seeded sampler, for reproducible
    /// draws.
    pub fn with_seed(
        tokenizer: BpeTokenizer,
        loader: Box<dyn BackendLoader>,
        config: &EngineConfig,
        seed: u64,
    ) -> Self {
        let mut engine = Self::new(tokenizer, loader, config);
        engine.sampler = Sampler::with_seed(seed);
        engine
    }

    /// Load (or reload) the backend described by `config`.
    ///
    /// On success the engine adopts the config's model version and drops
    /// every cached result computed under a different one.
    pub async fn load_model(&mut self, config: BackendConfig) -> Result<InitReport> {
        let version = config.model_version.clone();
        let report = self.client.init(config).await?;
        info!(
            version,
            mode = report.execution_mode.as_str(),
            load_time_ms = report.load_time_ms,
            "model loaded"
        );
        self.cache.invalidate_for_version(&version);
        self.model_version = Some(version);
        Ok(report)
    }

    /// Generate the next token id for `text`.
    ///
    /// Encodes the prompt, consults the cache, runs the backend on a miss,
    /// and draws one token from the filtered distribution.
    pub async fn generate_next_token(
        &mut self,
        text: &str,
        params: &SamplingParams,
    ) -> Result<u32> {
        if params.temperature <= 0.0 || !params.temperature.is_finite() {
            return Err(Error::InvalidSamplingParameter(format!(
                "temperature must be positive, got {}",
                params.temperature
            )));
        }
        let Some(version) = self.model_version.clone() else {
            return Err(Error::BackendUnavailable);
        };

        let input_ids = self.tokenizer.encode(text);
        if input_ids.is_empty() {
            return Err(Error::Execution(
                "prompt encodes to no tokens".to_string(),
            ));
        }
        let tokens = self.tokenizer.tokenize_with_offsets(text);

        let key = CacheKey::new(&input_ids, params, &version);
        let result = match self.cache.get(&key) {
            Some(cached) => {
                debug!(tokens = input_ids.len(), "cache hit");
                cached
            }
            None => {
                debug!(tokens = input_ids.len(), "cache miss, running backend");
                let result = self.client.run(input_ids, tokens, params.clone()).await?;
                self.cache.set(key, result.clone());
                result
            }
        };

        let token = self.sampler.sample_probs(&result.probs) as u32;
        self.last_result = Some(result);
        Ok(token)
    }

    /// The most recent run result, cached or fresh.
    ///
    /// Carries the filtered distribution and any activation tensors the
    /// backend exported.
    pub fn last_result(&self) -> Option<&RunResult> {
        self.last_result.as_ref()
    }

    /// The tokenizer this engine encodes with.
    pub fn tokenizer(&self) -> &BpeTokenizer {
        &self.tokenizer
    }

    /// Cache occupancy and hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

//! Configuration types for tokenlens.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which filtering stage runs between softmax and the categorical draw.
///
/// Exactly one of top-k / top-p is active per generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingMode {
    /// Keep the k most probable tokens.
    TopK,
    /// Keep the smallest probability-ranked prefix with cumulative mass >= p.
    TopP,
}

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature for scaling logits. Must be positive.
    pub temperature: f32,
    /// Active filtering stage.
    pub mode: SamplingMode,
    /// Top-k value (used when `mode` is `TopK`).
    pub top_k: usize,
    /// Top-p value (used when `mode` is `TopP`).
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            mode: SamplingMode::TopK,
            top_k: 40,
            top_p: 0.9,
        }
    }
}

/// Backend configuration sent with the init message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Location of the model artifact, opaque to the protocol.
    pub model_url: String,
    /// Ask the loader for an accelerated execution mode when available.
    pub prefer_acceleration: bool,
    /// Opaque version tag used to invalidate cached results.
    pub model_version: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model_url: "models/gpt2/model.onnx".to_string(),
            prefer_acceleration: true,
            model_version: "1.0.0".to_string(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of cached inference results.
    pub cache_capacity: usize,
    /// Bound on how long a dispatched request may stay unanswered.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 20,
            request_timeout: Duration::from_secs(30),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

//! Opaque inference backend contract.
//!
//! The engine never sees how tensors are produced: a backend takes named
//! input tensors (at least the integer id sequence) and returns named output
//! tensors (a logits tensor of rank 1 to 3, plus optional per-layer
//! activation tensors following the `layer_<i>_<kind>` naming convention).
//! Activation tensors are passed through untouched for downstream display.

use std::collections::HashMap;

use candle_core::Tensor;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Name of the token id input tensor.
pub const INPUT_IDS: &str = "input_ids";
/// Name of the logits output tensor.
pub const LOGITS: &str = "logits";

/// Named tensor bundle crossing the backend boundary.
pub type NamedTensors = HashMap<String, Tensor>;

/// Execution mode a backend ended up running with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Hardware-accelerated path.
    Accelerated,
    /// Portable fallback path.
    Fallback,
}

impl ExecutionMode {
    /// Get the mode name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::Fallback => "fallback",
        }
    }
}

/// A loaded model that can run one forward pass.
pub trait InferenceBackend: Send {
    /// Run the model over the named inputs and return its named outputs.
    fn run(&mut self, inputs: &NamedTensors) -> Result<NamedTensors>;

    /// The execution mode this backend runs with.
    fn execution_mode(&self) -> ExecutionMode;
}

/// Loads a backend from its configuration.
///
/// A loader asked for acceleration it cannot provide returns
/// [`Error::CapabilityUnsupported`] so the caller can retry with
/// `prefer_acceleration` off.
pub trait BackendLoader: Send {
    /// Load a backend for the given configuration.
    fn load(&self, config: &BackendConfig) -> Result<Box<dyn InferenceBackend>>;
}

impl<F> BackendLoader for F
where
    F: Fn(&BackendConfig) -> Result<Box<dyn InferenceBackend>> + Send,
{
    fn load(&self, config: &BackendConfig) -> Result<Box<dyn InferenceBackend>> {
        self(config)
    }
}

/// Activation tensors captured from a single layer.
#[derive(Debug, Clone, Default)]
pub struct LayerActivations {
    /// Layer index parsed from the tensor name.
    pub layer_index: usize,
    /// Attention probabilities.
    pub attn_probs: Option<Tensor>,
    /// MLP block output.
    pub mlp_output: Option<Tensor>,
    /// Concatenated query/key/value projection.
    pub qkv: Option<Tensor>,
    /// Separate query projection.
    pub q: Option<Tensor>,
    /// Separate key projection.
    pub k: Option<Tensor>,
    /// Separate value projection.
    pub v: Option<Tensor>,
}

/// All activation tensors returned by one forward pass.
#[derive(Debug, Clone, Default)]
pub struct ActivationTensors {
    /// Embedding-sum tensor, when the model exports it.
    pub embedding: Option<Tensor>,
    /// Per-layer activations, ordered by layer index.
    pub layers: Vec<LayerActivations>,
}

/// Everything one boundary run produces, ready for a draw.
///
/// `probs` is already softmaxed and filtered, so a cached result can be
/// sampled without touching the backend again.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Token ids the model was run over.
    pub input_ids: Vec<u32>,
    /// Display tokens for the input, with source offsets.
    pub tokens: Vec<crate::tokenizer::TokenWithOffset>,
    /// Final-position logits.
    pub logits: Vec<f32>,
    /// Filtered probability distribution.
    pub probs: Vec<f32>,
    /// Activation tensors, passed through opaquely.
    pub activations: ActivationTensors,
    /// Execution mode the backend ran with.
    pub execution_mode: ExecutionMode,
    /// Version tag of the model that produced this result.
    pub model_version: String,
    /// Forward-pass wall time in milliseconds.
    pub infer_ms: u64,
}

/// Extract the final-position logits as a score vector.
///
/// Supported ranks: 1-D `[vocab]`, 2-D `[seq_len, vocab]`, and 3-D
/// `[batch, seq_len, vocab]`; the last sequence position (of the last batch
/// row) is always taken.
pub fn extract_last_logits(logits: &Tensor) -> Result<Vec<f32>> {
    let dims = logits.dims();
    let scores = match *dims {
        [_vocab] => logits.to_vec1::<f32>()?,
        [seq_len, _vocab] => logits
            .narrow(0, seq_len - 1, 1)?
            .squeeze(0)?
            .to_vec1::<f32>()?,
        [batch, seq_len, _vocab] => logits
            .narrow(0, batch - 1, 1)?
            .squeeze(0)?
            .narrow(0, seq_len - 1, 1)?
            .squeeze(0)?
            .to_vec1::<f32>()?,
        _ => {
            return Err(Error::Execution(format!(
                "unexpected logits shape {dims:?}, expected rank 1-3"
            )))
        }
    };
    Ok(scores)
}

/// Collect `layer_<i>_<kind>` tensors into per-layer activation bundles.
///
/// Unrecognized names are ignored; the logits tensor is not an activation.
pub fn unpack_activations(outputs: &NamedTensors) -> ActivationTensors {
    let mut layers: HashMap<usize, LayerActivations> = HashMap::new();

    for (name, tensor) in outputs {
        let Some((index, kind)) = parse_layer_name(name) else {
            continue;
        };
        let layer = layers.entry(index).or_insert_with(|| LayerActivations {
            layer_index: index,
            ..LayerActivations::default()
        });
        match kind {
            "attn_probs" => layer.attn_probs = Some(tensor.clone()),
            "mlp_output" => layer.mlp_output = Some(tensor.clone()),
            "qkv" => layer.qkv = Some(tensor.clone()),
            "q" => layer.q = Some(tensor.clone()),
            "k" => layer.k = Some(tensor.clone()),
            "v" => layer.v = Some(tensor.clone()),
            _ => {}
        }
    }

    let mut layers: Vec<LayerActivations> = layers.into_values().collect();
    layers.sort_by_key(|layer| layer.layer_index);

    ActivationTensors {
        embedding: outputs.get("embedding_sum").cloned(),
        layers,
    }
}

/// Split a `layer_<i>_<kind>` tensor name into its index and kind.
fn parse_layer_name(name: &str) -> Option<(usize, &str)> {
    let rest = name.strip_prefix("layer_")?;
    let underscore = rest.find('_')?;
    let index: usize = rest[..underscore].parse().ok()?;
    Some((index, &rest[underscore + 1..]))
}

/// Build the named input bundle for a forward pass.
pub fn input_tensors(input_ids: &[u32]) -> Result<NamedTensors> {
    let ids: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
    let seq_len = ids.len();
    let tensor = Tensor::from_vec(ids, (1, seq_len), &candle_core::Device::Cpu)?;
    Ok(HashMap::from([(INPUT_IDS.to_string(), tensor)]))
}

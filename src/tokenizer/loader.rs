//! Tokenizer resource loading.
//!
//! The tokenizer is constructed from a previously fetched vocabulary and
//! ordered merge list, either as a `vocab.json` + `merges.txt` pair or a
//! HuggingFace `tokenizer.json` (flat or with a nested `model` object).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::Value;

use super::SpecialTokens;
use crate::error::{Error, Result};

/// Raw resources a [`BpeTokenizer`](super::BpeTokenizer) is built from.
#[derive(Debug, Clone, Default)]
pub struct TokenizerResources {
    /// Token string to id.
    pub vocab: HashMap<String, u32>,
    /// Merge lines, position = priority (lower index merges first).
    pub merges: Vec<String>,
    /// Optional special-token bindings.
    pub special_tokens: SpecialTokens,
}

/// Load resources from a `vocab.json` and a `merges.txt` file.
///
/// Blank merge lines and `#` comment lines (including the `#version` header)
/// are skipped.
pub fn load_vocab_and_merges(
    vocab_path: impl AsRef<Path>,
    merges_path: impl AsRef<Path>,
) -> Result<TokenizerResources> {
    let vocab: HashMap<String, u32> = serde_json::from_str(&fs::read_to_string(vocab_path)?)?;
    let merges = fs::read_to_string(merges_path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    Ok(TokenizerResources {
        vocab,
        merges,
        special_tokens: SpecialTokens::default(),
    })
}

/// Load resources from a HuggingFace `tokenizer.json` file.
pub fn load_tokenizer_json(path: impl AsRef<Path>) -> Result<TokenizerResources> {
    let data: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    parse_tokenizer_json(&data)
}

fn parse_tokenizer_json(data: &Value) -> Result<TokenizerResources> {
    let model = if data.get("vocab").is_some() && data.get("merges").is_some() {
        data
    } else if let Some(model) = data.get("model") {
        model
    } else {
        return Err(Error::TokenizerConfig(
            "tokenizer.json has neither top-level nor model vocab/merges".to_string(),
        ));
    };

    let vocab_value = model
        .get("vocab")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::TokenizerConfig("missing vocab object".to_string()))?;
    let mut vocab = HashMap::with_capacity(vocab_value.len());
    for (token, id) in vocab_value {
        let id = id
            .as_u64()
            .ok_or_else(|| Error::TokenizerConfig(format!("non-integer id for {token:?}")))?;
        vocab.insert(token.clone(), id as u32);
    }

    let merges_value = model
        .get("merges")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::TokenizerConfig("missing merges array".to_string()))?;
    let mut merges = Vec::with_capacity(merges_value.len());
    for entry in merges_value {
        match entry {
            Value::String(line) => merges.push(line.clone()),
            // Newer dumps store merges as ["a", "b"] pairs.
            Value::Array(pair) if pair.len() == 2 => {
                let (Some(first), Some(second)) = (pair[0].as_str(), pair[1].as_str()) else {
                    return Err(Error::TokenizerConfig(
                        "merge pair entries must be strings".to_string(),
                    ));
                };
                merges.push(format!("{first} {second}"));
            }
            _ => {
                return Err(Error::TokenizerConfig(format!(
                    "unrecognized merge entry: {entry}"
                )))
            }
        }
    }

    Ok(TokenizerResources {
        vocab,
        merges,
        special_tokens: parse_added_tokens(data),
    })
}

fn parse_added_tokens(data: &Value) -> SpecialTokens {
    let mut special = SpecialTokens::default();
    let Some(added) = data.get("added_tokens").and_then(Value::as_array) else {
        return special;
    };
    for token in added {
        if token.get("special").and_then(Value::as_bool) != Some(true) {
            continue;
        }
        let Some(content) = token.get("content").and_then(Value::as_str) else {
            continue;
        };
        match content {
            // GPT-2 uses the same token for both sequence ends.
            "<|endoftext|>" => {
                special.bos = Some(content.to_string());
                special.eos = Some(content.to_string());
            }
            "<|unk|>" => special.unk = Some(content.to_string()),
            "<|pad|>" => special.pad = Some(content.to_string()),
            _ => {}
        }
    }
    special
}

//! Byte-level BPE tokenizer.
//!
//! Converts text to and from token id sequences using a fixed vocabulary and
//! a ranked merge table, following the GPT-2 byte-level scheme:
//!
//! ```text
//! text
//!   │ segment into whitespace / non-whitespace runs
//!   ▼
//! words
//!   │ map bytes through the byte↔unicode table
//!   ▼
//! symbol sequences
//!   │ merge the lowest-ranked adjacent pair until none remains
//!   ▼
//! symbols ──vocab──▶ token ids
//! ```
//!
//! Whitespace runs are words too: they participate in merges exactly like any
//! other symbol and are never discarded.

pub mod bytes;
pub mod loader;

use std::collections::HashMap;

use crate::error::{Error, Result};

pub use bytes::byte_map;
pub use loader::{load_tokenizer_json, load_vocab_and_merges, TokenizerResources};

/// Named special-token roles, each optionally bound to a vocabulary entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Beginning-of-sequence token.
    pub bos: Option<String>,
    /// End-of-sequence token.
    pub eos: Option<String>,
    /// Unknown-symbol fallback token.
    pub unk: Option<String>,
    /// Padding token.
    pub pad: Option<String>,
}

impl SpecialTokens {
    fn bindings(&self) -> impl Iterator<Item = &String> {
        [&self.bos, &self.eos, &self.unk, &self.pad]
            .into_iter()
            .flatten()
    }
}

/// A decoded token plus its half-open character span in the source text.
///
/// Produced only for display; the sampling path never consumes offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWithOffset {
    /// Token id.
    pub id: u32,
    /// Decoded token text (the covered slice of the source).
    pub text: String,
    /// First covered character index.
    pub start: usize,
    /// One past the last covered character index.
    pub end: usize,
}

/// Byte-level BPE tokenizer.
///
/// Vocabulary, merge ranks, and special-token bindings are validated at
/// construction and immutable afterwards.
#[derive(Debug)]
pub struct BpeTokenizer {
    vocab: HashMap<String, u32>,
    reverse_vocab: HashMap<u32, String>,
    merge_ranks: HashMap<(String, String), usize>,
    special: SpecialTokens,
    unk_id: Option<u32>,
}

impl BpeTokenizer {
    /// Build a tokenizer from loaded resources.
    ///
    /// # Errors
    ///
    /// Fails fast on an empty vocabulary, a malformed merge line, a merge
    /// whose product is not a vocabulary entry, or a special-token binding
    /// that names a token outside the vocabulary.
    pub fn new(resources: TokenizerResources) -> Result<Self> {
        let TokenizerResources {
            vocab,
            merges,
            special_tokens,
        } = resources;

        if vocab.is_empty() {
            return Err(Error::TokenizerConfig("empty vocabulary".to_string()));
        }

        let mut merge_ranks = HashMap::with_capacity(merges.len());
        for (rank, merge) in merges.iter().enumerate() {
            let line = merge.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (first, second) = match (parts.next(), parts.next(), parts.next()) {
                (Some(first), Some(second), None) => (first, second),
                _ => {
                    return Err(Error::TokenizerConfig(format!(
                        "malformed merge entry at rank {rank}: {line:?}"
                    )))
                }
            };
            let merged = format!("{first}{second}");
            if !vocab.contains_key(&merged) {
                return Err(Error::TokenizerConfig(format!(
                    "merge {line:?} produces {merged:?} which is not in the vocabulary"
                )));
            }
            merge_ranks.insert((first.to_string(), second.to_string()), rank);
        }

        for token in special_tokens.bindings() {
            if !vocab.contains_key(token) {
                return Err(Error::TokenizerConfig(format!(
                    "special token {token:?} is not in the vocabulary"
                )));
            }
        }
        let unk_id = special_tokens
            .unk
            .as_ref()
            .and_then(|token| vocab.get(token).copied());

        let reverse_vocab = vocab
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();

        Ok(Self {
            vocab,
            reverse_vocab,
            merge_ranks,
            special: special_tokens,
            unk_id,
        })
    }

    /// Number of vocabulary entries.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Id bound to a token string, if present.
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.get(token).copied()
    }

    /// Special-token bindings.
    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    /// Encode text to token ids.
    ///
    /// Never fails on well-formed input. Symbols without a vocabulary entry
    /// resolve to the `unk` binding when one is configured; otherwise they
    /// are silently dropped (a known lossy edge of the reference scheme).
    pub fn encode(&self, text: &str) -> Vec<u32> {
        if let Some(id) = self.exact_special_id(text) {
            return vec![id];
        }

        let mut ids = Vec::new();
        for (word, _) in segment(text) {
            for symbol in self.apply_merges(word) {
                if let Some(id) = self.vocab.get(&symbol).copied().or(self.unk_id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Decode token ids back to text.
    ///
    /// Best-effort inverse of [`encode`](Self::encode): ids without a
    /// vocabulary entry are skipped, and every decoded character is pushed
    /// back through the byte table to recover its original byte.
    pub fn decode(&self, ids: &[u32]) -> String {
        let map = byte_map();
        let mut bytes = Vec::new();
        for id in ids {
            let Some(token) = self.reverse_vocab.get(id) else {
                continue;
            };
            for ch in token.chars() {
                match map.decode_char(ch) {
                    Some(byte) => bytes.push(byte),
                    None => {
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Decode a single token id for display.
    pub fn decode_token(&self, id: u32) -> String {
        match self.reverse_vocab.get(&id) {
            Some(token) => self.decode_symbol(token),
            None => self
                .special
                .unk
                .clone()
                .unwrap_or_else(|| "<unk>".to_string()),
        }
    }

    /// Tokenize text, attaching each token's half-open character span in the
    /// source. Non-destructive; used only for display.
    ///
    /// Spans are recorded while walking the source segmentation, so a symbol
    /// dropped for lack of a vocabulary entry skips its own span instead of
    /// shifting every later token.
    pub fn tokenize_with_offsets(&self, text: &str) -> Vec<TokenWithOffset> {
        if let Some(id) = self.exact_special_id(text) {
            let len = text.chars().count();
            return vec![TokenWithOffset {
                id,
                text: text.to_string(),
                start: 0,
                end: len,
            }];
        }

        let mut tokens = Vec::new();
        for (word, word_start) in segment(text) {
            let mut cursor = word_start;
            for symbol in self.apply_merges(word) {
                // One symbol character per source character, preserved by
                // merging, so the span length is the symbol's char count.
                let span = symbol.chars().count();
                let (start, end) = (cursor, cursor + span);
                cursor = end;
                if let Some(id) = self.vocab.get(&symbol).copied().or(self.unk_id) {
                    tokens.push(TokenWithOffset {
                        id,
                        text: self.decode_symbol(&symbol),
                        start,
                        end,
                    });
                }
            }
        }
        tokens
    }

    fn exact_special_id(&self, text: &str) -> Option<u32> {
        self.special
            .bindings()
            .find(|token| token.as_str() == text)
            .and_then(|token| self.vocab.get(token).copied())
    }

    /// Run the merge loop over one word, returning its final symbols.
    fn apply_merges(&self, word: &str) -> Vec<String> {
        // A word already present verbatim is a single symbol.
        if self.vocab.contains_key(word) {
            return vec![word.to_string()];
        }

        let map = byte_map();
        let mut symbols: Vec<String> = word
            .chars()
            .map(|ch| {
                if (ch as u32) < 256 {
                    map.encode_byte(ch as u32 as u8).to_string()
                } else {
                    ch.to_string()
                }
            })
            .collect();

        while symbols.len() > 1 {
            let best = symbols
                .windows(2)
                .filter_map(|pair| {
                    self.merge_ranks
                        .get(&(pair[0].clone(), pair[1].clone()))
                        .map(|&rank| (rank, pair[0].clone(), pair[1].clone()))
                })
                .min_by_key(|(rank, _, _)| *rank);

            let Some((_, first, second)) = best else {
                break;
            };

            // Merge every non-overlapping left-to-right occurrence of the
            // winning pair in one pass, then search for the next rank.
            let mut merged = Vec::with_capacity(symbols.len());
            let mut i = 0;
            while i < symbols.len() {
                if i + 1 < symbols.len() && symbols[i] == first && symbols[i + 1] == second {
                    merged.push(format!("{first}{second}"));
                    i += 2;
                } else {
                    merged.push(symbols[i].clone());
                    i += 1;
                }
            }
            symbols = merged;
        }

        symbols
    }

    /// Reverse the byte mapping over a symbol for display.
    fn decode_symbol(&self, symbol: &str) -> String {
        let map = byte_map();
        let mut bytes = Vec::with_capacity(symbol.len());
        for ch in symbol.chars() {
            match map.decode_char(ch) {
                Some(byte) => bytes.push(byte),
                None => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Split text into maximal whitespace / non-whitespace runs with their
/// starting character index. Whitespace is kept: it merges like any symbol.
fn segment(text: &str) -> Vec<(&str, usize)> {
    let mut words = Vec::new();
    let mut run_start_byte = 0;
    let mut run_start_char = 0;
    let mut run_is_ws: Option<bool> = None;
    let mut char_index = 0;

    for (byte_index, ch) in text.char_indices() {
        let is_ws = ch.is_whitespace();
        match run_is_ws {
            Some(current) if current == is_ws => {}
            Some(_) => {
                words.push((&text[run_start_byte..byte_index], run_start_char));
                run_start_byte = byte_index;
                run_start_char = char_index;
                run_is_ws = Some(is_ws);
            }
            None => {
                run_is_ws = Some(is_ws);
            }
        }
        char_index += 1;
    }
    if run_is_ws.is_some() {
        words.push((&text[run_start_byte..], run_start_char));
    }
    words
}

//! Integration tests for the byte-level BPE tokenizer.

use std::collections::HashMap;

use tokenlens::tokenizer::{byte_map, TokenizerResources};
use tokenlens::{BpeTokenizer, SpecialTokens};

/// Vocabulary over byte-mapped symbols, ids assigned in listing order.
fn vocab(symbols: &[&str]) -> HashMap<String, u32> {
    symbols
        .iter()
        .enumerate()
        .map(|(id, s)| (s.to_string(), id as u32))
        .collect()
}

fn tokenizer(symbols: &[&str], merges: &[&str]) -> BpeTokenizer {
    BpeTokenizer::new(TokenizerResources {
        vocab: vocab(symbols),
        merges: merges.iter().map(|s| s.to_string()).collect(),
        special_tokens: SpecialTokens::default(),
    })
    .unwrap()
}

#[test]
fn test_space_maps_through_byte_table() {
    // 0x20 is outside the printable identity range, so it gets a
    // substitute character and decodes back to itself.
    let mapped = byte_map().encode_byte(b' ');
    assert_ne!(mapped, ' ');
    assert_eq!(byte_map().decode_char(mapped), Some(b' '));
}

#[test]
fn test_encode_decode_round_trip_with_spaces() {
    let space = byte_map().encode_byte(b' ').to_string();
    let tok = tokenizer(&["h", "i", &space, "hi"], &["h i"]);

    let ids = tok.encode("hi hi");
    let decoded = tok.decode(&ids);
    assert_eq!(decoded, "hi hi");
}

#[test]
fn test_whitespace_is_its_own_token() {
    let space = byte_map().encode_byte(b' ').to_string();
    let tok = tokenizer(&["a", "b", &space, "ab"], &["a b"]);

    let tokens = tok.tokenize_with_offsets("a ab");
    let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["a", " ", "ab"]);
}

#[test]
fn test_offsets_cover_source_spans() {
    let space = byte_map().encode_byte(b' ').to_string();
    let tok = tokenizer(&["a", "b", &space, "ab"], &["a b"]);

    let tokens = tok.tokenize_with_offsets("a ab");
    let spans: Vec<(usize, usize)> = tokens.iter().map(|t| (t.start, t.end)).collect();
    assert_eq!(spans, vec![(0, 1), (1, 2), (2, 4)]);
}

#[test]
fn test_dropped_symbol_skips_its_span() {
    // "z" has no vocabulary entry and no unk binding: it vanishes from the
    // output but later tokens keep their own source positions.
    let space = byte_map().encode_byte(b' ').to_string();
    let tok = tokenizer(&["a", &space], &[]);

    let tokens = tok.tokenize_with_offsets("az a");
    let spans: Vec<(u32, usize, usize)> =
        tokens.iter().map(|t| (t.id, t.start, t.end)).collect();
    assert_eq!(spans, vec![(0, 0, 1), (1, 2, 3), (0, 3, 4)]);
}

#[test]
fn test_multibyte_characters_count_as_single_positions() {
    let tok = tokenizer(&["é", "a"], &[]);

    let tokens = tok.tokenize_with_offsets("éa");
    // Spans are character indices, not byte indices.
    assert_eq!(tokens[0].start, 0);
    assert_eq!(tokens[0].end, 1);
    assert_eq!(tokens[1].start, 1);
    assert_eq!(tokens[1].end, 2);
}

#[test]
fn test_special_token_binding_survives_construction() {
    let tok = BpeTokenizer::new(TokenizerResources {
        vocab: vocab(&["a", "<|endoftext|>"]),
        merges: vec![],
        special_tokens: SpecialTokens {
            eos: Some("<|endoftext|>".to_string()),
            ..SpecialTokens::default()
        },
    })
    .unwrap();

    assert_eq!(tok.special_tokens().eos.as_deref(), Some("<|endoftext|>"));
    assert_eq!(tok.encode("<|endoftext|>"), vec![1]);
}

#[test]
fn test_decode_token_restores_display_text() {
    let space = byte_map().encode_byte(b' ').to_string();
    let spaced_word = format!("{space}hi");
    let tok = tokenizer(&["h", "i", &spaced_word], &[]);

    assert_eq!(tok.decode_token(2), " hi");
}

#[test]
fn test_vocab_size_and_lookup() {
    let tok = tokenizer(&["a", "b", "ab"], &["a b"]);
    assert_eq!(tok.vocab_size(), 3);
    assert_eq!(tok.token_to_id("ab"), Some(2));
    assert_eq!(tok.token_to_id("zz"), None);
}

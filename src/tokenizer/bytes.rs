//! Byte to unicode mapping for byte-level BPE.
//!
//! Arbitrary byte sequences must be representable as mergeable symbol
//! sequences, so every one of the 256 byte values is assigned a printable
//! unicode character. Printable bytes map to themselves; the rest are shifted
//! past U+00FF. The mapping is a fixed bijection shared by the whole process.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Bijection between raw byte values and printable unicode characters.
#[derive(Debug)]
pub struct ByteUnicodeMap {
    encode: [char; 256],
    decode: HashMap<char, u8>,
}

impl ByteUnicodeMap {
    fn build() -> Self {
        let mut encode = ['\0'; 256];
        let mut decode = HashMap::with_capacity(256);
        let mut shifted = 0u32;

        for byte in 0u32..256 {
            let printable = (0x21..=0x7E).contains(&byte)
                || (0xA1..=0xAC).contains(&byte)
                || (0xAE..=0xFF).contains(&byte);
            let ch = if printable {
                char::from_u32(byte).unwrap_or('\u{FFFD}')
            } else {
                let ch = char::from_u32(0x100 + shifted).unwrap_or('\u{FFFD}');
                shifted += 1;
                ch
            };
            encode[byte as usize] = ch;
            decode.insert(ch, byte as u8);
        }

        Self { encode, decode }
    }

    /// Map a raw byte value to its symbol character.
    pub fn encode_byte(&self, byte: u8) -> char {
        self.encode[byte as usize]
    }

    /// Map a symbol character back to its byte value, if it is in the table.
    pub fn decode_char(&self, ch: char) -> Option<u8> {
        self.decode.get(&ch).copied()
    }
}

/// Process-wide byte mapping, built on first use.
pub fn byte_map() -> &'static ByteUnicodeMap {
    static MAP: OnceLock<ByteUnicodeMap> = OnceLock::new();
    MAP.get_or_init(ByteUnicodeMap::build)
}

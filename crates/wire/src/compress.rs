//! Dictionary-growing string codec.
//!
//! LZ78-family, single pass, streaming. The dictionary is rebuilt on
//! every call and seeded with three reserved codes: `0` announces an
//! 8-bit literal, `1` a 16-bit literal, `2` is end-of-stream. Every
//! consumed code synthesizes one new entry as
//! `previous_entry + first_unit_of(current_entry)`; each time the
//! dictionary crosses the next power-of-two boundary the code width
//! grows by one bit.
//!
//! Output is restricted to a 64-symbol printable alphabet packed six
//! bits per symbol; the 65th symbol is reserved as an explicit
//! end-of-stream marker and never appears in normal output (the in-band
//! code `2` terminates decoding first).
//!
//! The codec operates on UTF-16 code units so dictionary entries may
//! hold unpaired surrogates mid-stream; only the final output is
//! converted back to a string.
//!
//! The decompressor tolerates anything: truncation before the
//! end-of-stream code yields `Some("")`, a reference to a dictionary
//! code that does not exist yet yields `None`. It never panics.

use ahash::AHashMap;

const ALPHABET: &[u8; 65] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-$";

const CODE_LITERAL_8: u32 = 0;
const CODE_LITERAL_16: u32 = 1;
const CODE_END_OF_STREAM: u32 = 2;
const RESERVED_CODES: u32 = 3;
const BITS_PER_SYMBOL: u32 = 6;

// Reverse table covers the 64 data symbols only; the reserved marker
// and every other byte read as invalid, which the reader reports as
// exhaustion.
const fn build_reverse() -> [u8; 256] {
    let mut table = [255u8; 256];
    let mut i = 0;
    while i < 64 {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

const REVERSE: [u8; 256] = build_reverse();

/// Bit packer: values enter least-significant bit first and fill each
/// 6-bit output symbol from its most significant bit down.
struct SymbolWriter {
    out: String,
    buffer: u32,
    filled: u32,
}

impl SymbolWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            buffer: 0,
            filled: 0,
        }
    }

    fn push_bits(&mut self, value: u32, count: u32) {
        let mut value = value;
        for _ in 0..count {
            self.buffer = (self.buffer << 1) | (value & 1);
            self.filled += 1;
            if self.filled == BITS_PER_SYMBOL {
                self.out.push(ALPHABET[self.buffer as usize] as char);
                self.buffer = 0;
                self.filled = 0;
            }
            value >>= 1;
        }
    }

    fn finish(mut self) -> String {
        if self.filled > 0 {
            self.buffer <<= BITS_PER_SYMBOL - self.filled;
            self.out.push(ALPHABET[self.buffer as usize] as char);
        }
        self.out
    }
}

/// Mirror of [`SymbolWriter`]: unpacks 6-bit symbols, hands bits back
/// least-significant first. `None` means the input ran out (or hit a
/// byte outside the data alphabet, which is the same thing).
struct SymbolReader<'a> {
    data: &'a [u8],
    position: usize,
    buffer: u32,
    remaining: u32,
}

impl<'a> SymbolReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            buffer: 0,
            remaining: 0,
        }
    }

    fn read_bits(&mut self, count: u32) -> Option<u32> {
        let mut result = 0u32;
        for bit_index in 0..count {
            if self.remaining == 0 {
                let byte = *self.data.get(self.position)?;
                self.position += 1;
                let symbol = REVERSE[byte as usize];
                if symbol == 255 {
                    return None;
                }
                self.buffer = u32::from(symbol);
                self.remaining = BITS_PER_SYMBOL;
            }
            let bit = (self.buffer >> (self.remaining - 1)) & 1;
            self.remaining -= 1;
            result |= bit << bit_index;
        }
        Some(result)
    }
}

/// Compress a string into the printable-symbol encoding.
///
/// `None` compresses to the empty string. The output always carries an
/// in-band end-of-stream code, so even `Some("")` produces one symbol
/// and survives the round trip.
pub fn compress(input: Option<&str>) -> String {
    let input = match input {
        Some(input) => input,
        None => return String::new(),
    };
    let units: Vec<u16> = input.encode_utf16().collect();

    let mut dictionary: AHashMap<Vec<u16>, u32> = AHashMap::new();
    let mut pending_literals: AHashMap<Vec<u16>, ()> = AHashMap::new();
    let mut dict_size: u32 = RESERVED_CODES;
    let mut enlarge_in: u32 = 2;
    let mut num_bits: u32 = 2;
    let mut writer = SymbolWriter::new();
    let mut w: Vec<u16> = Vec::new();

    for &unit in &units {
        let single = vec![unit];
        if !dictionary.contains_key(&single) {
            dictionary.insert(single.clone(), dict_size);
            dict_size += 1;
            pending_literals.insert(single.clone(), ());
        }

        let mut wc = w.clone();
        wc.push(unit);
        if dictionary.contains_key(&wc) {
            w = wc;
        } else {
            emit_sequence(
                &w,
                &dictionary,
                &mut pending_literals,
                &mut enlarge_in,
                &mut num_bits,
                &mut writer,
            );
            dictionary.insert(wc, dict_size);
            dict_size += 1;
            w = single;
        }
    }

    if !w.is_empty() {
        emit_sequence(
            &w,
            &dictionary,
            &mut pending_literals,
            &mut enlarge_in,
            &mut num_bits,
            &mut writer,
        );
    }

    writer.push_bits(CODE_END_OF_STREAM, num_bits);
    writer.finish()
}

fn emit_sequence(
    w: &[u16],
    dictionary: &AHashMap<Vec<u16>, u32>,
    pending_literals: &mut AHashMap<Vec<u16>, ()>,
    enlarge_in: &mut u32,
    num_bits: &mut u32,
    writer: &mut SymbolWriter,
) {
    if pending_literals.remove(w).is_some() {
        // First time this unit is seen: ship it as a raw literal.
        let unit = u32::from(w[0]);
        if unit < 256 {
            writer.push_bits(CODE_LITERAL_8, *num_bits);
            writer.push_bits(unit, 8);
        } else {
            writer.push_bits(CODE_LITERAL_16, *num_bits);
            writer.push_bits(unit, 16);
        }
        *enlarge_in -= 1;
        if *enlarge_in == 0 {
            *enlarge_in = 1 << *num_bits;
            *num_bits += 1;
        }
    } else if let Some(&code) = dictionary.get(w) {
        writer.push_bits(code, *num_bits);
    }
    *enlarge_in -= 1;
    if *enlarge_in == 0 {
        *enlarge_in = 1 << *num_bits;
        *num_bits += 1;
    }
}

/// Decompress a printable-symbol string.
///
/// Edge contract, exactly:
/// - `None` → `Some("")`
/// - `Some("")` → `None`
/// - input exhausted before the end-of-stream code → `Some("")`
/// - reference to a not-yet-existing dictionary code → `None`
pub fn decompress(input: Option<&str>) -> Option<String> {
    let input = match input {
        Some(input) => input,
        None => return Some(String::new()),
    };
    if input.is_empty() {
        return None;
    }

    let mut reader = SymbolReader::new(input.as_bytes());
    // Codes 0..2 are reserved; their slots are never dereferenced.
    let mut dictionary: Vec<Vec<u16>> = vec![Vec::new(), Vec::new(), Vec::new()];
    let mut enlarge_in: u32 = 4;
    let mut num_bits: u32 = 3;

    let first = match reader.read_bits(2) {
        Some(code) => code,
        None => return Some(String::new()),
    };
    let seed: Vec<u16> = match first {
        CODE_LITERAL_8 => match reader.read_bits(8) {
            Some(unit) => vec![unit as u16],
            None => return Some(String::new()),
        },
        CODE_LITERAL_16 => match reader.read_bits(16) {
            Some(unit) => vec![unit as u16],
            None => return Some(String::new()),
        },
        CODE_END_OF_STREAM => return Some(String::new()),
        _ => return None,
    };
    dictionary.push(seed.clone());
    let mut result: Vec<u16> = seed.clone();
    let mut w = seed;

    loop {
        let mut code = match reader.read_bits(num_bits) {
            Some(code) => code,
            None => return Some(String::new()),
        };
        match code {
            CODE_LITERAL_8 | CODE_LITERAL_16 => {
                let width = if code == CODE_LITERAL_8 { 8 } else { 16 };
                let unit = match reader.read_bits(width) {
                    Some(unit) => unit,
                    None => return Some(String::new()),
                };
                dictionary.push(vec![unit as u16]);
                code = dictionary.len() as u32 - 1;
                enlarge_in -= 1;
            }
            CODE_END_OF_STREAM => return Some(String::from_utf16_lossy(&result)),
            _ => {}
        }
        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }

        let entry: Vec<u16> = if (code as usize) < dictionary.len() {
            dictionary[code as usize].clone()
        } else if code as usize == dictionary.len() {
            // The one legal forward reference: w + first unit of w.
            let mut synthesized = w.clone();
            synthesized.push(w[0]);
            synthesized
        } else {
            return None;
        };
        result.extend_from_slice(&entry);

        let mut grown = w.clone();
        grown.push(entry[0]);
        dictionary.push(grown);
        enlarge_in -= 1;
        w = entry;

        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(s: &str) {
        let packed = compress(Some(s));
        assert!(packed.bytes().all(|b| REVERSE[b as usize] != 255 || b == b'$'));
        assert_eq!(decompress(Some(&packed)).as_deref(), Some(s), "input {s:?}");
    }

    #[test]
    fn test_round_trip_basic() {
        round_trip("hello world");
        round_trip("a");
        round_trip("");
        round_trip("[[1,4,0,0,\"div\",\"id=a\"],[2,4,1,0]]");
    }

    #[test]
    fn test_round_trip_repetitive_input() {
        round_trip("aaaaaaaaaa");
        round_trip(&"abcab".repeat(200));
        round_trip(&"the quick brown fox ".repeat(50));
    }

    #[test]
    fn test_round_trip_non_ascii() {
        round_trip("héllo wörld — ◕‿◕ — 終わり");
        round_trip("🦀🦀🦀 surrogate pairs 🦀");
    }

    #[test]
    fn test_documented_edges() {
        assert_eq!(compress(None), "");
        assert_eq!(decompress(None).as_deref(), Some(""));
        assert_eq!(decompress(Some("")), None);
    }

    #[test]
    fn test_truncated_input_is_empty_not_fatal() {
        let packed = compress(Some("the quick brown fox jumps over the lazy dog"));
        let truncated = &packed[..packed.len() / 2];
        assert_eq!(decompress(Some(truncated)).as_deref(), Some(""));
    }

    #[test]
    fn test_garbage_input_never_panics() {
        for garbage in ["!!!", "µµµ", "A", "ZZZZZZZZ", "$", "@#%^&"] {
            let _ = decompress(Some(garbage));
        }
    }

    #[test]
    fn test_repeated_run_grows_dictionary_past_threshold() {
        // Ten identical units force exactly one width transition once
        // the dictionary passes four entries.
        let packed = compress(Some("aaaaaaaaaa"));
        assert_eq!(decompress(Some(&packed)).as_deref(), Some("aaaaaaaaaa"));
        // 2-bit selector + 8-bit literal + three 3-bit codes + 3-bit
        // terminator = 22 bits = four 6-bit symbols.
        assert_eq!(packed.len(), 4);
    }

    #[test]
    fn test_compression_shrinks_repetitive_json() {
        let batch = "[\"class=row\",\"class=row\",\"class=row\",\"class=row\"]".repeat(20);
        let packed = compress(Some(&batch));
        assert!(packed.len() < batch.len());
    }

    #[test]
    fn test_output_alphabet_is_printable() {
        let packed = compress(Some(&"x=1&y=2;".repeat(40)));
        assert!(packed.bytes().all(|b| b.is_ascii_graphic()));
        assert!(!packed.contains('$'));
    }
}

//! Dictionary lookup and the input tokenizer (spec §4.4, scenario E5).
//!
//! A story's dictionary can be sorted (binary search) or unsorted (linear
//! scan); the sign of the entry-count header word tells us which.

use crate::error::VmResult;
use crate::memory::Memory;
use crate::text::ascii_to_zchar;

/// Number of Z-characters (and therefore encoded words) packed per dictionary
/// entry key: 2 words (6 Z-chars) for V1-3, 3 words (9 Z-chars) for V4+.
fn key_zchar_count(version: u8) -> usize {
    if version <= 3 {
        6
    } else {
        9
    }
}

fn key_byte_len(version: u8) -> usize {
    key_zchar_count(version) / 3 * 2
}

pub struct DictionaryHeader {
    pub separators: Vec<u8>,
    pub entry_length: u8,
    /// Signed per the Standard: negative means unsorted (linear scan only).
    pub num_entries: i16,
    pub entries_addr: u32,
}

pub fn parse_header(memory: &Memory) -> VmResult<DictionaryHeader> {
    parse_header_at(memory, memory.header.dictionary as u32)
}

/// Parse the dictionary header at an explicit address (spec §4.6
/// `tokenise`'s optional third operand overrides the story's default
/// dictionary, e.g. to look words up in a parser's temporary dictionary).
pub fn parse_header_at(memory: &Memory, base: u32) -> VmResult<DictionaryHeader> {
    let num_sep = memory.get_byte(base)?;
    let separators = memory.get_bytes(base + 1, num_sep as usize)?.to_vec();
    let entry_length_addr = base + 1 + num_sep as u32;
    let entry_length = memory.get_byte(entry_length_addr)?;
    let num_entries = memory.get_word(entry_length_addr + 1)? as i16;
    let entries_addr = entry_length_addr + 3;
    Ok(DictionaryHeader {
        separators,
        entry_length,
        num_entries,
        entries_addr,
    })
}

/// Encode a token's letters into the packed dictionary key (spec §4.4):
/// truncate/pad to the version's Z-char count, filling unused slots with
/// Z-char 5 (an A2 shift that never appears in a real word), then pack into
/// 16-bit words with the terminator bit set on the last one.
pub fn encode_key(word: &str, version: u8) -> Vec<u8> {
    let n = key_zchar_count(version);
    let mut zchars: Vec<u8> = word.chars().map(ascii_to_zchar).collect();
    zchars.resize(n, 5);
    zchars.truncate(n);

    let mut out = Vec::with_capacity(key_byte_len(version));
    for chunk in zchars.chunks(3) {
        let word16 = ((chunk[0] as u16) << 10) | ((chunk[1] as u16) << 5) | chunk[2] as u16;
        out.extend_from_slice(&word16.to_be_bytes());
    }
    let last = out.len() - 2;
    out[last] |= 0x80;
    out
}

/// Look up `word` in the dictionary, returning its byte address or 0 if
/// absent. Dispatches to binary search (sorted dictionaries, the common
/// case) or linear scan (negative entry count).
pub fn lookup(memory: &Memory, word: &str) -> VmResult<u16> {
    lookup_in(memory, word, &parse_header(memory)?)
}

/// As [`lookup`], against an already-parsed (possibly non-default)
/// dictionary header.
pub fn lookup_in(memory: &Memory, word: &str, header: &DictionaryHeader) -> VmResult<u16> {
    let key = encode_key(word, memory.header.version);
    let key_len = key.len();
    let count = header.num_entries.unsigned_abs() as usize;
    let entry_len = header.entry_length as usize;

    if header.num_entries >= 0 {
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let addr = header.entries_addr + (mid * entry_len) as u32;
            let entry_key = memory.get_bytes(addr, key_len)?;
            match entry_key.cmp(key.as_slice()) {
                std::cmp::Ordering::Equal => return Ok(addr as u16),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Ok(0)
    } else {
        for i in 0..count {
            let addr = header.entries_addr + (i * entry_len) as u32;
            let entry_key = memory.get_bytes(addr, key_len)?;
            if entry_key == key.as_slice() {
                return Ok(addr as u16);
            }
        }
        Ok(0)
    }
}

/// One tokenized word: its text, 1-based start position within the input
/// line, and its length in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub len: usize,
}

/// Split an input line into tokens on whitespace and dictionary separator
/// characters, each separator becoming its own single-character token (spec
/// §4.4 / E5), unlike a plain whitespace split.
pub fn tokenize(line: &str, separators: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_start = 0usize;
    let chars: Vec<char> = line.chars().collect();

    let is_separator = |c: char| separators.iter().any(|&s| s as char == c);

    let flush = |current: &mut String, current_start: usize, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token {
                len: current.len(),
                text: std::mem::take(current),
                start: current_start,
            });
        }
    };

    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            flush(&mut current, current_start, &mut tokens);
        } else if is_separator(c) {
            flush(&mut current, current_start, &mut tokens);
            tokens.push(Token {
                text: c.to_string(),
                start: i,
                len: 1,
            });
        } else {
            if current.is_empty() {
                current_start = i;
            }
            current.push(c);
        }
    }
    flush(&mut current, current_start, &mut tokens);
    tokens
}

/// Read the raw input line out of the text buffer (spec §4.4): V1-4 stores a
/// NUL-terminated string starting at offset 1; V5+ stores a length byte at
/// offset 1 followed by that many characters (no terminator).
pub fn read_text_buffer(memory: &Memory, text_buffer_addr: u32) -> VmResult<String> {
    if memory.header.version <= 4 {
        let max_len = memory.get_byte(text_buffer_addr)? as usize;
        let mut s = String::new();
        for i in 0..max_len {
            let b = memory.get_byte(text_buffer_addr + 1 + i as u32)?;
            if b == 0 {
                break;
            }
            s.push(b as char);
        }
        Ok(s)
    } else {
        let len = memory.get_byte(text_buffer_addr + 1)? as usize;
        let bytes = memory.get_bytes(text_buffer_addr + 2, len)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Write the tokenized parse buffer (spec §4.4): byte 0 is the max token
/// count the buffer was declared with (left untouched), byte 1 receives the
/// actual token count, followed by one 4-byte entry per token: dictionary
/// address (word, 0 if unrecognized), length, start position.
///
/// `header` is the dictionary to look words up in (`tokenise`'s optional
/// third operand overrides the story's default dictionary). When `skip_unrecognized`
/// is set (the fourth operand's flag), entries whose *looked-up* dictionary
/// address comes back 0 are left untouched rather than overwritten, so a
/// caller can re-tokenise just the newly typed words of a line while keeping
/// an earlier pass's unrecognized-word markers intact.
pub fn write_parse_buffer(
    memory: &mut Memory,
    parse_buffer_addr: u32,
    tokens: &[Token],
    header: &DictionaryHeader,
    skip_unrecognized: bool,
) -> VmResult<()> {
    let max_tokens = memory.get_byte(parse_buffer_addr)? as usize;
    let n = tokens.len().min(max_tokens);
    if !skip_unrecognized {
        memory.set_byte(parse_buffer_addr + 1, n as u8)?;
    }
    for (i, token) in tokens.iter().take(n).enumerate() {
        let entry_addr = parse_buffer_addr + 2 + (i * 4) as u32;
        let dict_addr = lookup_in(memory, &token.text, header)?;
        if skip_unrecognized && dict_addr == 0 {
            continue;
        }
        memory.set_word(entry_addr, dict_addr)?;
        memory.set_byte(entry_addr + 2, token.len as u8)?;
        memory.set_byte(entry_addr + 3, token.start as u8)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WritePolicy;

    fn story_with_dictionary() -> Memory {
        let mut bytes = vec![0u8; 512];
        bytes[0] = 3;
        bytes[0x0E..0x10].copy_from_slice(&400u16.to_be_bytes());
        let dict_addr: u16 = 0x40;
        bytes[0x08..0x0A].copy_from_slice(&dict_addr.to_be_bytes());

        let base = dict_addr as usize;
        bytes[base] = 1; // one separator
        bytes[base + 1] = b'.';
        bytes[base + 2] = 4; // entry length (key only, for this test)
        let entries_addr = base + 3 + 2;
        bytes[base + 3..base + 5].copy_from_slice(&2i16.to_be_bytes());

        let north = encode_key("north", 3);
        bytes[entries_addr..entries_addr + 4].copy_from_slice(&north);
        let key_2 = encode_key("south", 3);
        bytes[entries_addr + 4..entries_addr + 8].copy_from_slice(&key_2);

        Memory::new(bytes, WritePolicy::Fatal).unwrap()
    }

    #[test]
    fn tokenizes_separators_as_own_tokens() {
        let tokens = tokenize("go north.", &[b'.']);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].text, "go");
        assert_eq!(tokens[1].text, "north");
        assert_eq!(tokens[2].text, ".");
        assert_eq!(tokens[2].start, 8);
    }

    #[test]
    fn finds_known_word_via_binary_search() {
        let mem = story_with_dictionary();
        let addr = lookup(&mem, "north").unwrap();
        assert_ne!(addr, 0);
    }

    #[test]
    fn unknown_word_returns_zero() {
        let mem = story_with_dictionary();
        assert_eq!(lookup(&mem, "xyzzy").unwrap(), 0);
    }
}

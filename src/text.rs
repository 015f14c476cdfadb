//! Z-string codec (spec §4.2): packed 5-bit Z-characters, alphabet shifting,
//! abbreviation expansion, and the 10-bit ZSCII escape.

use log::{trace, warn};

pub const ALPHABET_A0: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
pub const ALPHABET_A1: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const ALPHABET_A2_V3: &[u8] = b" \n0123456789.,!?_#'\"/\\-:()";
/// V1 has a slightly different A2 slot layout (no newline escape, a literal
/// space in its place) per the original Standard before it was amended for V2+.
pub const ALPHABET_A2_V1: &[u8] = b" 0123456789.,!?_#'\"/\\<-:()";

pub struct Alphabets {
    pub a0: [u8; 26],
    pub a1: [u8; 26],
    pub a2: [u8; 26],
}

impl Alphabets {
    /// Build the alphabet table for a story, honoring a custom alphabet
    /// table (header word at 0x34, V5+) if the story supplies one, and the
    /// V1 A2 layout otherwise.
    pub fn for_story(memory: &[u8], version: u8, alphabet_table_addr: u16) -> Alphabets {
        if version >= 5 && alphabet_table_addr != 0 {
            let base = alphabet_table_addr as usize;
            if base + 78 <= memory.len() {
                let mut a0 = [0u8; 26];
                let mut a1 = [0u8; 26];
                let mut a2 = [0u8; 26];
                a0.copy_from_slice(&memory[base..base + 26]);
                a1.copy_from_slice(&memory[base + 26..base + 52]);
                a2.copy_from_slice(&memory[base + 52..base + 78]);
                return Alphabets { a0, a1, a2 };
            }
        }
        let mut a0 = [0u8; 26];
        let mut a1 = [0u8; 26];
        let mut a2 = [0u8; 26];
        a0.copy_from_slice(ALPHABET_A0);
        a1.copy_from_slice(ALPHABET_A1);
        if version == 1 {
            a2.copy_from_slice(ALPHABET_A2_V1);
        } else {
            a2.copy_from_slice(ALPHABET_A2_V3);
        }
        Alphabets { a0, a1, a2 }
    }
}

/// Decode a Z-string starting at `addr`. Returns the decoded text and the
/// number of bytes consumed from `memory` (not counting any abbreviation
/// strings, which live elsewhere in memory).
///
/// Abbreviation expansion is not recursive: an abbreviation string that
/// itself contains an abbreviation reference has that reference ignored
/// (rendered as nothing), matching the Standard's prohibition on nested
/// abbreviations.
pub fn decode_string(
    memory: &[u8],
    addr: usize,
    abbrev_table_addr: usize,
    alphabets: &Alphabets,
) -> Result<(String, usize), String> {
    decode_string_inner(memory, addr, abbrev_table_addr, alphabets, false)
}

fn decode_string_inner(
    memory: &[u8],
    addr: usize,
    abbrev_table_addr: usize,
    alphabets: &Alphabets,
    is_abbreviation: bool,
) -> Result<(String, usize), String> {
    let mut result = String::new();
    let mut offset = addr;
    // Wmax (1000 words, §4.1) worth of Z-chars; beyond this an unterminated
    // or runaway string is truncated rather than read indefinitely.
    const MAX_STRING_LEN: usize = 1000 * 3;

    let mut all_zchars = Vec::new();
    let mut is_end = false;
    while !is_end && offset + 1 < memory.len() && all_zchars.len() < MAX_STRING_LEN {
        let word = ((memory[offset] as u16) << 8) | (memory[offset + 1] as u16);
        offset += 2;
        is_end = (word & 0x8000) != 0;
        all_zchars.push(((word >> 10) & 0x1F) as u8);
        all_zchars.push(((word >> 5) & 0x1F) as u8);
        all_zchars.push((word & 0x1F) as u8);
    }
    if !is_end {
        warn!("unterminated z-string at {addr:#06x}, returning partial decode");
    }

    let mut abbrev_shift = 0u8;
    let mut current_alphabet = 0u8;
    let mut i = 0;
    while i < all_zchars.len() {
        let zc = all_zchars[i];
        i += 1;

        if abbrev_shift > 0 {
            let abbrev_num = (abbrev_shift - 1) as usize * 32 + zc as usize;
            abbrev_shift = 0;
            if is_abbreviation {
                // Non-recursive: abbreviation text is never itself expanded.
                continue;
            }
            match expand_abbreviation(memory, abbrev_table_addr, abbrev_num, alphabets) {
                Ok(text) => result.push_str(&text),
                Err(e) => warn!("skipping unresolvable abbreviation {abbrev_num}: {e}"),
            }
            continue;
        }

        match zc {
            0 => result.push(' '),
            1..=3 => abbrev_shift = zc,
            4 => current_alphabet = 1,
            5 => current_alphabet = 2,
            6..=31 => {
                let ch = match current_alphabet {
                    0 => alphabets.a0[(zc - 6) as usize] as char,
                    1 => alphabets.a1[(zc - 6) as usize] as char,
                    2 => {
                        if zc == 6 {
                            if i + 1 < all_zchars.len() {
                                let high = all_zchars[i];
                                let low = all_zchars[i + 1];
                                i += 2;
                                let code = ((high as u16) << 5) | low as u16;
                                zscii_to_char(code)
                            } else {
                                warn!("zscii escape truncated at end of string");
                                '?'
                            }
                        } else {
                            alphabets.a2[(zc - 6) as usize] as char
                        }
                    }
                    _ => unreachable!(),
                };
                result.push(ch);
                current_alphabet = 0;
            }
            _ => unreachable!(),
        }
    }

    trace!("decoded {} bytes at {addr:#06x}: {result:?}", offset - addr);
    Ok((result, offset - addr))
}

fn expand_abbreviation(
    memory: &[u8],
    abbrev_table_addr: usize,
    abbrev_num: usize,
    alphabets: &Alphabets,
) -> Result<String, String> {
    let entry_addr = abbrev_table_addr + abbrev_num * 2;
    if entry_addr + 1 >= memory.len() {
        return Err("abbreviation table entry out of bounds".to_string());
    }
    let word_addr = ((memory[entry_addr] as u16) << 8) | memory[entry_addr + 1] as u16;
    let byte_addr = (word_addr as usize) * 2;
    if byte_addr == 0 || byte_addr + 1 >= memory.len() {
        return Err(format!("invalid abbreviation address {byte_addr:#06x}"));
    }
    decode_string_inner(memory, byte_addr, abbrev_table_addr, alphabets, true).map(|(s, _)| s)
}

/// ZSCII code to Unicode (spec §4.1 `zscii_to_unicode`). ZSCII 9 is tab, 11
/// is a sentence space, 13 is newline; 155-251 are the accented-character
/// extension range mapped onto Latin-1 in ascending order per the Standard's
/// default table.
pub fn zscii_to_char(code: u16) -> char {
    match code {
        9 => '\t',
        11 => ' ',
        13 => '\n',
        32..=126 => code as u8 as char,
        155..=251 => {
            const EXTRA: &str = "äöüÄÖÜßÁÉÍÓÚÝáéíóúýÀÈÌÒÙàèìòùÂÊÎÔÛâêîôûÅåÆæÇçÞþÐðÑñŒœ¡¿";
            EXTRA
                .chars()
                .nth((code - 155) as usize)
                .unwrap_or('?')
        }
        _ => '?',
    }
}

/// Z-char code for lowercase ascii letters/space used by the dictionary
/// encoder (spec §4.4); anything else maps to space (5), matching how real
/// story files pad non-alphabetic search words.
pub fn ascii_to_zchar(ch: char) -> u8 {
    match ch.to_ascii_lowercase() {
        'a'..='z' => ch.to_ascii_lowercase() as u8 - b'a' + 6,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_alphabets(version: u8) -> Alphabets {
        Alphabets::for_story(&[], version, 0)
    }

    #[test]
    fn decodes_simple_word() {
        let mut memory = vec![0u8; 100];
        memory[10] = 0x72;
        memory[11] = 0xE4;
        memory[12] = 0x95;
        memory[13] = 0x45;
        let (text, len) = decode_string(&memory, 10, 0, &default_alphabets(3)).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(len, 4);
    }

    #[test]
    fn decodes_with_space() {
        let mut memory = vec![0u8; 100];
        memory[20] = 0xB4;
        memory[21] = 0x0E;
        let (text, _) = decode_string(&memory, 20, 0, &default_alphabets(3)).unwrap();
        assert_eq!(text, "a b");
    }

    #[test]
    fn abbreviation_is_not_recursively_expanded() {
        // Abbreviation target string itself contains an abbreviation
        // reference (zc=1, zc=0); per spec this must not be expanded again.
        let mut memory = vec![0u8; 200];
        // Abbreviation table at 0, one entry pointing to word-address 20 (byte 40).
        memory[0] = 0x00;
        memory[1] = 20;
        // Main string at byte 10: zc=1 (abbrev shift), zc=0 (abbrev #0), end.
        // word = 00001 00000 00000 with end bit -> 0x8400
        memory[10] = 0x84;
        memory[11] = 0x00;
        // Abbreviation text at byte 40: itself starts with an abbrev reference
        // (zc=1, zc=0) followed by 'h' (zc=14) terminator.
        // zchars: 1, 0, 14 -> 00001 00000 01110, end bit set.
        memory[40] = 0x84;
        memory[41] = 0x0E;
        let (text, _) = decode_string(&memory, 10, 0, &default_alphabets(3)).unwrap();
        // The nested abbrev reference inside the abbreviation is dropped,
        // leaving only the literal 'h'.
        assert_eq!(text, "h");
    }

    #[test]
    fn zscii_printable_roundtrip() {
        assert_eq!(zscii_to_char(65), 'A');
        assert_eq!(zscii_to_char(13), '\n');
    }
}

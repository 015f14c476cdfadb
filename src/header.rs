//! Story file header (spec §6.1): the fixed 64-byte prologue every Z-Machine
//! story file carries, plus the negotiation performed at load/restart/restore.

use std::fmt;

/// Byte offsets into the header, named per the Z-Machine Standard.
mod offset {
    pub const VERSION: usize = 0x00;
    pub const FLAGS1: usize = 0x01;
    pub const RELEASE: usize = 0x02;
    pub const HIGH_MEM_BASE: usize = 0x04;
    pub const INITIAL_PC: usize = 0x06;
    pub const DICTIONARY: usize = 0x08;
    pub const OBJECT_TABLE: usize = 0x0A;
    pub const GLOBAL_VARIABLES: usize = 0x0C;
    pub const STATIC_MEM_BASE: usize = 0x0E;
    pub const FLAGS2: usize = 0x10;
    pub const SERIAL: usize = 0x12; // 6 bytes
    pub const ABBREV_TABLE: usize = 0x18;
    pub const FILE_LENGTH: usize = 0x1A;
    pub const CHECKSUM: usize = 0x1C;
    pub const INTERPRETER_NUMBER: usize = 0x1E;
    pub const INTERPRETER_VERSION: usize = 0x1F;
    pub const SCREEN_ROWS: usize = 0x20;
    pub const SCREEN_COLS: usize = 0x21;
    pub const SCREEN_WIDTH_UNITS: usize = 0x22;
    pub const SCREEN_HEIGHT_UNITS: usize = 0x24;
    pub const FONT_WIDTH: usize = 0x26;
    pub const FONT_HEIGHT: usize = 0x27;
    pub const ROUTINES_OFFSET: usize = 0x28;
    pub const STRINGS_OFFSET: usize = 0x2A;
    pub const DEFAULT_BACKGROUND: usize = 0x2C;
    pub const DEFAULT_FOREGROUND: usize = 0x2D;
    pub const TERMINATING_TABLE: usize = 0x2E;
    pub const STANDARD_REVISION: usize = 0x32;
    pub const ALPHABET_TABLE: usize = 0x34;
    pub const HEADER_EXT_TABLE: usize = 0x36;
}

fn word(bytes: &[u8], addr: usize) -> u16 {
    ((bytes[addr] as u16) << 8) | (bytes[addr + 1] as u16)
}

/// Flags1 bit names; their meaning is version-dependent (spec §6.1 / §4.11).
pub mod flags1 {
    pub const STATUS_LINE_UNAVAILABLE: u8 = 1 << 4; // V3, interpreter->game
    pub const SCREEN_SPLITTING_AVAILABLE: u8 = 1 << 5; // V3, interpreter->game
    pub const COLOURS_AVAILABLE: u8 = 1 << 0; // V5+, interpreter->game
    pub const BOLD_AVAILABLE: u8 = 1 << 2; // V4+
    pub const ITALIC_AVAILABLE: u8 = 1 << 3; // V4+
    pub const FIXED_SPACE_AVAILABLE: u8 = 1 << 4; // V4+
    pub const TIMED_INPUT_AVAILABLE: u8 = 1 << 7; // V4+
}

/// Flags2 bits (spec §4.11): game->interpreter feature requests, negotiated
/// down to whatever the Screen collaborator can actually honor.
pub mod flags2 {
    pub const USE_MOUSE: u16 = 1 << 5;
    pub const USE_COLOURS: u16 = 1 << 6;
}

#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub flags1: u8,
    pub release: u16,
    pub high_mem_base: u16,
    pub initial_pc: u16,
    pub dictionary: u16,
    pub object_table_addr: u16,
    pub global_variables: u16,
    pub static_mem_base: u16,
    pub flags2: u16,
    pub serial: String,
    pub abbrev_table: u16,
    pub file_length: usize,
    pub checksum: u16,
    pub interpreter_number: u8,
    pub interpreter_version: u8,
    pub screen_rows: u8,
    pub screen_cols: u8,
    pub screen_width_units: u16,
    pub screen_height_units: u16,
    pub font_width_units: u8,
    pub font_height_units: u8,
    pub routines_offset: u16,
    pub strings_offset: u16,
    pub default_background: u8,
    pub default_foreground: u8,
    pub terminating_chars_table: u16,
    pub standard_revision: u16,
    pub alphabet_table: u16,
    pub header_ext_table: u16,
}

impl Header {
    pub const SIZE: usize = 64;

    pub fn parse(bytes: &[u8]) -> Result<Header, String> {
        if bytes.len() < Header::SIZE {
            return Err(format!(
                "story file too small for header: {} bytes, need at least {}",
                bytes.len(),
                Header::SIZE
            ));
        }
        let version = bytes[offset::VERSION];
        if !(1..=8).contains(&version) {
            return Err(format!("unsupported Z-Machine version: {version}"));
        }

        let serial = bytes[offset::SERIAL..offset::SERIAL + 6]
            .iter()
            .map(|&b| b as char)
            .collect();

        // file_length is stored as a division factor that is itself
        // version-dependent, same family as packed addresses.
        let raw_len = word(bytes, offset::FILE_LENGTH) as usize;
        let file_length = match version {
            1..=3 => raw_len * 2,
            _ => raw_len * 4,
        };

        Ok(Header {
            version,
            flags1: bytes[offset::FLAGS1],
            release: word(bytes, offset::RELEASE),
            high_mem_base: word(bytes, offset::HIGH_MEM_BASE),
            initial_pc: word(bytes, offset::INITIAL_PC),
            dictionary: word(bytes, offset::DICTIONARY),
            object_table_addr: word(bytes, offset::OBJECT_TABLE),
            global_variables: word(bytes, offset::GLOBAL_VARIABLES),
            static_mem_base: word(bytes, offset::STATIC_MEM_BASE),
            flags2: word(bytes, offset::FLAGS2),
            serial,
            abbrev_table: word(bytes, offset::ABBREV_TABLE),
            file_length,
            checksum: word(bytes, offset::CHECKSUM),
            interpreter_number: bytes[offset::INTERPRETER_NUMBER],
            interpreter_version: bytes[offset::INTERPRETER_VERSION],
            screen_rows: bytes[offset::SCREEN_ROWS],
            screen_cols: bytes[offset::SCREEN_COLS],
            screen_width_units: word(bytes, offset::SCREEN_WIDTH_UNITS),
            screen_height_units: word(bytes, offset::SCREEN_HEIGHT_UNITS),
            font_width_units: bytes[offset::FONT_WIDTH],
            font_height_units: bytes[offset::FONT_HEIGHT],
            routines_offset: word(bytes, offset::ROUTINES_OFFSET),
            strings_offset: word(bytes, offset::STRINGS_OFFSET),
            default_background: bytes[offset::DEFAULT_BACKGROUND],
            default_foreground: bytes[offset::DEFAULT_FOREGROUND],
            terminating_chars_table: word(bytes, offset::TERMINATING_TABLE),
            standard_revision: word(bytes, offset::STANDARD_REVISION),
            alphabet_table: word(bytes, offset::ALPHABET_TABLE),
            header_ext_table: word(bytes, offset::HEADER_EXT_TABLE),
        })
    }

    /// Rewrite the negotiable fields of a live story image's header (spec
    /// §4.11), performed at load, restart, and successful restore. `memory`
    /// is the full writable story image (the header lives in dynamic memory
    /// so this is always permitted, regardless of the static-write policy).
    pub fn negotiate(memory: &mut [u8], version: u8, rows: u8, cols: u8, caps: ScreenCaps) {
        memory[offset::INTERPRETER_NUMBER] = 6; // "generic" per the Standard's interpreter table
        memory[offset::INTERPRETER_VERSION] = b'Z';
        memory[offset::SCREEN_ROWS] = rows;
        memory[offset::SCREEN_COLS] = cols;
        if version >= 5 {
            let width_units = cols as u16;
            let height_units = rows as u16;
            memory[offset::SCREEN_WIDTH_UNITS..offset::SCREEN_WIDTH_UNITS + 2]
                .copy_from_slice(&width_units.to_be_bytes());
            memory[offset::SCREEN_HEIGHT_UNITS..offset::SCREEN_HEIGHT_UNITS + 2]
                .copy_from_slice(&height_units.to_be_bytes());
            memory[offset::FONT_WIDTH] = 1;
            memory[offset::FONT_HEIGHT] = 1;
        }

        let mut flags1 = memory[offset::FLAGS1];
        if version <= 3 {
            flags1 &= !(flags1::STATUS_LINE_UNAVAILABLE | flags1::SCREEN_SPLITTING_AVAILABLE);
            if caps.splitting {
                flags1 |= flags1::SCREEN_SPLITTING_AVAILABLE;
            } else {
                flags1 |= flags1::STATUS_LINE_UNAVAILABLE;
            }
        } else {
            flags1 &= !(flags1::BOLD_AVAILABLE
                | flags1::ITALIC_AVAILABLE
                | flags1::FIXED_SPACE_AVAILABLE
                | flags1::TIMED_INPUT_AVAILABLE
                | flags1::COLOURS_AVAILABLE);
            if caps.bold {
                flags1 |= flags1::BOLD_AVAILABLE;
            }
            if caps.italic {
                flags1 |= flags1::ITALIC_AVAILABLE;
            }
            if caps.fixed_space {
                flags1 |= flags1::FIXED_SPACE_AVAILABLE;
            }
            if caps.timed_input {
                flags1 |= flags1::TIMED_INPUT_AVAILABLE;
            }
            if caps.colours {
                flags1 |= flags1::COLOURS_AVAILABLE;
            }
        }
        memory[offset::FLAGS1] = flags1;

        // Reset Flags2 feature-request bits the screen collaborator cannot
        // honor; leave the rest (e.g. the undo-available bit) as the game
        // originally requested.
        let mut flags2 = word(memory, offset::FLAGS2);
        if !caps.colours {
            flags2 &= !flags2::USE_COLOURS;
        }
        if !caps.mouse {
            flags2 &= !flags2::USE_MOUSE;
        }
        memory[offset::FLAGS2..offset::FLAGS2 + 2].copy_from_slice(&flags2.to_be_bytes());
    }

    pub fn object_entry_size(&self) -> usize {
        if self.version <= 3 {
            9
        } else {
            14
        }
    }

    pub fn property_defaults_count(&self) -> usize {
        if self.version <= 3 {
            31
        } else {
            63
        }
    }

    pub fn max_objects(&self) -> u16 {
        if self.version <= 3 {
            255
        } else {
            65535
        }
    }

    pub fn max_attributes(&self) -> u8 {
        if self.version <= 3 {
            31
        } else {
            47
        }
    }

    /// Pack/unpack factor for routine and string addresses (spec §3.1).
    /// V6/V7 routines and strings use distinct offsets on top of the ×4
    /// multiplier; every other version ignores `routines_offset`/`strings_offset`.
    pub fn unpack_routine(&self, packed: u16) -> u32 {
        match self.version {
            1..=3 => packed as u32 * 2,
            4..=5 => packed as u32 * 4,
            6..=7 => packed as u32 * 4 + 8 * self.routines_offset as u32,
            8 => packed as u32 * 8,
            _ => packed as u32 * 2,
        }
    }

    pub fn unpack_string(&self, packed: u16) -> u32 {
        match self.version {
            1..=3 => packed as u32 * 2,
            4..=5 => packed as u32 * 4,
            6..=7 => packed as u32 * 4 + 8 * self.strings_offset as u32,
            8 => packed as u32 * 8,
            _ => packed as u32 * 2,
        }
    }
}

/// Screen capability descriptor, supplied by the Screen collaborator and
/// folded back into Flags1/Flags2 by [`Header::negotiate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenCaps {
    pub splitting: bool,
    pub bold: bool,
    pub italic: bool,
    pub fixed_space: bool,
    pub timed_input: bool,
    pub colours: bool,
    pub mouse: bool,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Z-code version:           {}\n\
             Release number:           {}\n\
             Serial number:            {}\n\
             Start PC:                 {:#06x}\n\
             Dictionary address:       {:#06x}\n\
             Object table address:     {:#06x}\n\
             Global variables address: {:#06x}\n\
             Size of dynamic memory:   {:#06x}\n\
             Size of high memory:      {:#06x}\n\
             Abbreviations address:    {:#06x}\n\
             File size:                {:#06x}\n\
             Checksum:                 {:#06x}\n\
             Standard revision:        {}.{}\n",
            self.version,
            self.release,
            self.serial,
            self.initial_pc,
            self.dictionary,
            self.object_table_addr,
            self.global_variables,
            self.static_mem_base,
            self.high_mem_base,
            self.abbrev_table,
            self.file_length,
            self.checksum,
            self.standard_revision >> 8,
            self.standard_revision & 0xFF,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_v3(initial_pc: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        bytes[offset::VERSION] = 3;
        bytes[offset::INITIAL_PC..offset::INITIAL_PC + 2]
            .copy_from_slice(&initial_pc.to_be_bytes());
        bytes[offset::STATIC_MEM_BASE..offset::STATIC_MEM_BASE + 2]
            .copy_from_slice(&64u16.to_be_bytes());
        bytes[offset::SERIAL..offset::SERIAL + 6].copy_from_slice(b"123456");
        bytes
    }

    #[test]
    fn parses_fixed_fields() {
        let bytes = minimal_v3(0x4000);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.initial_pc, 0x4000);
        assert_eq!(header.serial, "123456");
    }

    #[test]
    fn rejects_undersized_image() {
        let bytes = vec![3u8; 10];
        assert!(Header::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = minimal_v3(0x4000);
        bytes[offset::VERSION] = 0;
        assert!(Header::parse(&bytes).is_err());
    }

    #[test]
    fn negotiate_sets_interpreter_and_dimensions() {
        let mut bytes = minimal_v3(0x4000);
        Header::negotiate(&mut bytes, 3, 25, 80, ScreenCaps::default());
        assert_eq!(bytes[offset::SCREEN_ROWS], 25);
        assert_eq!(bytes[offset::SCREEN_COLS], 80);
        assert_eq!(
            bytes[offset::FLAGS1] & flags1::STATUS_LINE_UNAVAILABLE,
            flags1::STATUS_LINE_UNAVAILABLE
        );
    }

    #[test]
    fn packed_address_v3_vs_v5() {
        let mut bytes = minimal_v3(0x4000);
        let h3 = Header::parse(&bytes).unwrap();
        assert_eq!(h3.unpack_routine(0x1000), 0x2000);
        bytes[offset::VERSION] = 5;
        let h5 = Header::parse(&bytes).unwrap();
        assert_eq!(h5.unpack_routine(0x1000), 0x4000);
    }
}

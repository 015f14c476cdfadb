//! The story's three-region memory map (spec §3.1 / §4.1): dynamic (writable),
//! static (read-only by convention, policy-configurable), and high (read-only,
//! holds packed routine/string targets). All multi-byte values are big-endian.

use log::warn;

use crate::config::WritePolicy;
use crate::error::{VmError, VmResult};
use crate::header::Header;
use crate::text::{self, Alphabets};

pub struct Memory {
    bytes: Vec<u8>,
    pub header: Header,
    static_write_policy: WritePolicy,
    alphabets: Alphabets,
}

impl Memory {
    pub fn new(bytes: Vec<u8>, static_write_policy: WritePolicy) -> VmResult<Memory> {
        let header = Header::parse(&bytes).map_err(VmError::MalformedStory)?;
        let alphabets = Alphabets::for_story(&bytes, header.version, header.alphabet_table);
        Ok(Memory {
            bytes,
            header,
            static_write_policy,
            alphabets,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    pub fn dynamic_memory(&self) -> &[u8] {
        &self.bytes[..self.header.static_mem_base as usize]
    }

    /// Overwrite dynamic memory (used when restoring a snapshot). The slice
    /// must be no longer than the current dynamic region.
    pub fn restore_dynamic_memory(&mut self, data: &[u8]) {
        let limit = self.header.static_mem_base as usize;
        let n = data.len().min(limit);
        self.bytes[..n].copy_from_slice(&data[..n]);
    }

    pub fn get_byte(&self, addr: u32) -> VmResult<u8> {
        self.bytes
            .get(addr as usize)
            .copied()
            .ok_or(VmError::InvalidAddress {
                addr,
                size: self.bytes.len(),
            })
    }

    pub fn get_word(&self, addr: u32) -> VmResult<u16> {
        let hi = self.get_byte(addr)? as u16;
        let lo = self.get_byte(addr + 1)? as u16;
        Ok((hi << 8) | lo)
    }

    pub fn get_bytes(&self, addr: u32, len: usize) -> VmResult<&[u8]> {
        let start = addr as usize;
        let end = start + len;
        self.bytes
            .get(start..end)
            .ok_or(VmError::InvalidAddress {
                addr,
                size: self.bytes.len(),
            })
    }

    /// True if `addr` lies in dynamic memory (writable without policy checks).
    fn is_dynamic(&self, addr: u32) -> bool {
        addr < self.header.static_mem_base as u32
    }

    /// True if `addr` lies in static memory: between the dynamic/static
    /// boundary and high memory. High memory itself is never a valid write
    /// target, dynamic policy notwithstanding.
    fn is_static(&self, addr: u32) -> bool {
        addr >= self.header.static_mem_base as u32 && addr < self.header.high_mem_base as u32
    }

    pub fn set_byte(&mut self, addr: u32, value: u8) -> VmResult<()> {
        if !self.is_dynamic(addr) {
            if self.is_static(addr) && self.static_write_policy == WritePolicy::WarnAndAllow {
                warn!("write to static memory at {addr:#06x} (warn-and-allow policy)");
            } else {
                return Err(VmError::NonDynamicWrite { addr });
            }
        }
        let slot = self
            .bytes
            .get_mut(addr as usize)
            .ok_or(VmError::InvalidAddress {
                addr,
                size: self.bytes.len(),
            })?;
        *slot = value;
        Ok(())
    }

    pub fn set_word(&mut self, addr: u32, value: u16) -> VmResult<()> {
        self.set_byte(addr, (value >> 8) as u8)?;
        self.set_byte(addr + 1, (value & 0xFF) as u8)
    }

    pub fn set_bytes(&mut self, addr: u32, data: &[u8]) -> VmResult<()> {
        for (i, &b) in data.iter().enumerate() {
            self.set_byte(addr + i as u32, b)?;
        }
        Ok(())
    }

    /// `copy_table`'s forward-copy semantics (spec §9 Open Question): always
    /// copies low-to-high regardless of overlap direction, even when the
    /// opcode's `size` operand was negative (the negative-size "don't zero
    /// the tail" variant still implies a forward copy here, not a zero-fill).
    pub fn copy_block(&mut self, src: u32, dst: u32, len: usize) -> VmResult<()> {
        if len == 0 {
            return Ok(());
        }
        let data: Vec<u8> = (0..len as u32)
            .map(|i| self.get_byte(src + i))
            .collect::<VmResult<Vec<u8>>>()?;
        self.set_bytes(dst, &data)
    }

    pub fn compare_block(&self, a: u32, b: u32, len: usize) -> VmResult<bool> {
        for i in 0..len as u32 {
            if self.get_byte(a + i)? != self.get_byte(b + i)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_zstring(&self, addr: u32) -> VmResult<(String, usize)> {
        text::decode_string(
            &self.bytes,
            addr as usize,
            self.header.abbrev_table as usize,
            &self.alphabets,
        )
        .map_err(|e| VmError::DecodeError { pc: addr, reason: e })
    }

    pub fn unpack_routine(&self, packed: u16) -> u32 {
        self.header.unpack_routine(packed)
    }

    pub fn unpack_string(&self, packed: u16) -> u32 {
        self.header.unpack_string(packed)
    }

    pub fn zscii_to_unicode(&self, code: u16) -> char {
        text::zscii_to_char(code)
    }

    /// A routine address is valid when it falls within the story image and,
    /// for the purposes of the `call` family, in high or dynamic memory
    /// (never past end of file).
    pub fn is_valid_routine(&self, byte_addr: u32) -> bool {
        (byte_addr as usize) < self.bytes.len()
    }

    /// Routines must start on an even address (every version packs routine
    /// addresses as a multiple of at least 2).
    pub fn check_alignment(&self, byte_addr: u32) -> bool {
        byte_addr % 2 == 0
    }

    /// Validate a routine header: first byte is the local-variable count
    /// (0-15); for V1-4 that many words of initial local values follow.
    pub fn validate_routine_header(&self, byte_addr: u32) -> VmResult<u8> {
        let num_locals = self.get_byte(byte_addr)?;
        if num_locals > 15 {
            return Err(VmError::MalformedStory(format!(
                "routine at {byte_addr:#06x} declares {num_locals} locals (max 15)"
            )));
        }
        Ok(num_locals)
    }

    /// Rewrite the header's negotiable fields in place (spec §4.11) and
    /// re-parse `self.header` from the result. Performed at load, restart,
    /// and successful restore, since a restored image carries whatever
    /// header bytes were live when the snapshot was taken.
    pub fn negotiate_header(&mut self, rows: u8, cols: u8, caps: crate::header::ScreenCaps) {
        let version = self.header.version;
        Header::negotiate(&mut self.bytes, version, rows, cols, caps);
        self.header = Header::parse(&self.bytes).expect("header was valid before negotiation");
    }

    /// 16-bit sum of bytes `[64, file_length)`, used by the `verify` opcode
    /// (spec §8 testable property #9): flips to false after any single byte
    /// in that range changes.
    pub fn verify_checksum(&self) -> u16 {
        let end = self.header.file_length.min(self.bytes.len());
        self.bytes[64.min(end)..end]
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(static_base: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 256];
        bytes[0] = 3;
        bytes[0x0E..0x10].copy_from_slice(&static_base.to_be_bytes());
        bytes
    }

    #[test]
    fn dynamic_write_always_allowed() {
        let mut mem = Memory::new(story(0x40), WritePolicy::Fatal).unwrap();
        mem.set_byte(0x10, 42).unwrap();
        assert_eq!(mem.get_byte(0x10).unwrap(), 42);
    }

    #[test]
    fn static_write_fatal_policy_rejects() {
        let mut mem = Memory::new(story(0x40), WritePolicy::Fatal).unwrap();
        assert!(mem.set_byte(0x50, 1).is_err());
    }

    #[test]
    fn static_write_warn_policy_allows() {
        let mut mem = Memory::new(story(0x40), WritePolicy::WarnAndAllow).unwrap();
        assert!(mem.set_byte(0x50, 1).is_ok());
    }

    #[test]
    fn loadw_style_wraparound_is_caller_responsibility() {
        // Memory itself just bounds-checks; address wraparound (E7) is
        // performed by the opcode dispatcher before calling get_word.
        let mem = Memory::new(story(0x40), WritePolicy::Fatal).unwrap();
        assert!(mem.get_word(0xFFFE).is_err());
    }

    #[test]
    fn checksum_changes_on_single_byte_edit() {
        let mut mem = Memory::new(story(0x40), WritePolicy::WarnAndAllow).unwrap();
        let before = mem.verify_checksum();
        mem.set_byte(0x50, mem.get_byte(0x50).unwrap().wrapping_add(1))
            .unwrap();
        assert_ne!(before, mem.verify_checksum());
    }
}

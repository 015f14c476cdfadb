//! Error taxonomy for the Z-Machine core.
//!
//! Every fatal condition the executor can hit is a distinct `VmError`
//! variant so callers can match on it instead of parsing a message string.
//! Recoverable conditions (static-memory writes, malformed Z-strings,
//! unknown opcodes in permissive mode) are *not* represented here: they are
//! handled in place and logged via `log::warn!`.

use thiserror::Error;

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("malformed story file: {0}")]
    MalformedStory(String),

    #[error("invalid memory address {addr:#06x} (file size {size:#06x})")]
    InvalidAddress { addr: u32, size: usize },

    #[error("write to non-dynamic memory at {addr:#06x}")]
    NonDynamicWrite { addr: u32 },

    #[error("division by zero at pc {pc:#06x}")]
    DivideByZero { pc: u32 },

    #[error("invalid throw frame: target depth {target} exceeds current depth {depth}")]
    InvalidThrowFrame { target: u16, depth: u16 },

    #[error("unknown or unimplemented opcode {mnemonic} ({opcode:#04x}) at pc {pc:#06x}")]
    UnknownOpcode {
        pc: u32,
        opcode: u8,
        mnemonic: &'static str,
    },

    #[error("stack underflow at pc {pc:#06x}")]
    StackUnderflow { pc: u32 },

    #[error("stack overflow at pc {pc:#06x}")]
    StackOverflow { pc: u32 },

    #[error("no active call frame for local variable access")]
    NoActiveFrame,

    #[error("invalid object number {obj} (maximum {max})")]
    InvalidObject { obj: u16, max: u16 },

    #[error("storage backend failed: {0}")]
    StorageFailed(String),

    #[error("decode error at pc {pc:#06x}: {reason}")]
    DecodeError { pc: u32, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

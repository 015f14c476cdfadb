//! Runtime configuration for the interpreter core.
//!
//! `Config` is constructed by a front-end (the bundled CLI, or any embedder)
//! either from defaults or from a TOML file, and handed to [`crate::machine::Machine`]
//! at load time. None of these knobs affect the on-disk story format.

use serde::{Deserialize, Serialize};

/// What to do when an opcode writes outside dynamic memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    /// Log a warning and perform the write anyway (default; matches how most
    /// widely deployed interpreters tolerate a class of story files that
    /// technically violate the Standard).
    WarnAndAllow,
    /// Treat the write as a fatal error.
    Fatal,
}

/// What to do when the decoder encounters an opcode this crate doesn't
/// implement (e.g. a V6 windowing opcode run against a non-V6 story, or a
/// genuinely unrecognized byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpcodePolicy {
    /// Halt with [`crate::error::VmError::UnknownOpcode`].
    Fatal,
    /// Treat the opcode as a no-op: if it stores a result, store 0; if it
    /// branches, don't take the branch.
    PermissiveNoOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub undo_capacity: usize,
    pub static_write_policy: WritePolicy,
    pub unknown_opcode_policy: OpcodePolicy,
    pub rows: u16,
    pub cols: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            undo_capacity: 10,
            static_write_policy: WritePolicy::WarnAndAllow,
            unknown_opcode_policy: OpcodePolicy::Fatal,
            rows: 24,
            cols: 80,
        }
    }
}

impl Config {
    pub fn strict() -> Self {
        Config {
            static_write_policy: WritePolicy::Fatal,
            unknown_opcode_policy: OpcodePolicy::Fatal,
            ..Config::default()
        }
    }

    pub fn permissive() -> Self {
        Config {
            static_write_policy: WritePolicy::WarnAndAllow,
            unknown_opcode_policy: OpcodePolicy::PermissiveNoOp,
            ..Config::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

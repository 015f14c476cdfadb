//! Storage collaborator (spec §6.2): where Quetzal save images and the
//! `save_aux`/`restore_aux` auxiliary blobs (V5+ `save_undo`'s bigger
//! sibling, the out-of-band "save to a slot" opcodes) actually live. The
//! executor only ever hands this trait opaque bytes; it never touches a
//! filesystem directly.

use crate::error::VmResult;

/// What `save_info` reports about a named slot without reading it (spec
/// §6.2): whether it exists, where/what it is, and when it was last written.
/// `format`/`description` are free-form since the core doesn't mandate a
/// save format; a collaborator that can't answer part of this just leaves it
/// `None`.
#[derive(Debug, Clone, Default)]
pub struct SaveInfo {
    pub exists: bool,
    pub path: Option<String>,
    pub format: Option<String>,
    pub description: Option<String>,
    pub last_modified: Option<String>,
}

pub trait Storage {
    fn save(&mut self, name: &str, data: &[u8]) -> VmResult<()>;
    fn restore(&mut self, name: &str) -> VmResult<Vec<u8>>;

    fn save_aux(&mut self, name: &str, data: &[u8]) -> VmResult<()>;
    fn restore_aux(&mut self, name: &str) -> VmResult<Vec<u8>>;

    /// Describe a slot without restoring it, e.g. for a pre-save-overwrite
    /// prompt or a pre-restore sanity check. Defaults to reporting nothing
    /// known, since not every collaborator can answer this cheaply.
    fn save_info(&self, _name: &str) -> VmResult<SaveInfo> {
        Ok(SaveInfo::default())
    }
}

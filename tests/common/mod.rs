//! Shared test collaborators and story-byte builders for the integration
//! suite. Not a test binary itself (cargo skips `tests/common/` because it's
//! a `mod.rs`).

use std::collections::HashMap;

use zmvm::error::VmResult;
use zmvm::header::ScreenCaps;
use zmvm::input::{Input, InputEvent, InputRequest};
use zmvm::screen::Screen;
use zmvm::storage::Storage;

/// A `Screen` that never touches a real terminal; it just accumulates
/// everything printed, for assertions on story output.
#[derive(Default)]
pub struct RecordingScreen {
    pub output: String,
}

impl Screen for RecordingScreen {
    fn clear_screen(&mut self) -> VmResult<()> {
        Ok(())
    }
    fn split_window(&mut self, _lines: u16) -> VmResult<()> {
        Ok(())
    }
    fn set_window(&mut self, _window: u8) -> VmResult<()> {
        Ok(())
    }
    fn set_cursor(&mut self, _line: u16, _column: u16) -> VmResult<()> {
        Ok(())
    }
    fn get_cursor(&mut self) -> VmResult<(u16, u16)> {
        Ok((1, 1))
    }
    fn print(&mut self, text: &str) -> VmResult<()> {
        self.output.push_str(text);
        Ok(())
    }
    fn print_char(&mut self, ch: char) -> VmResult<()> {
        self.output.push(ch);
        Ok(())
    }
    fn erase_window(&mut self, _window: i16) -> VmResult<()> {
        Ok(())
    }
    fn erase_line(&mut self) -> VmResult<()> {
        Ok(())
    }
    fn set_buffer_mode(&mut self, _buffered: bool) -> VmResult<()> {
        Ok(())
    }
    fn set_text_style(&mut self, _style: u16) -> VmResult<()> {
        Ok(())
    }
    fn set_colour(&mut self, _foreground: u16, _background: u16) -> VmResult<()> {
        Ok(())
    }
    fn show_status(&mut self, _location: &str, _score: i16, _moves: u16) -> VmResult<()> {
        Ok(())
    }
    fn terminal_size(&self) -> (u16, u16) {
        (24, 80)
    }
    fn capabilities(&self) -> ScreenCaps {
        ScreenCaps::default()
    }
}

/// A `Storage` backed by an in-process map, standing in for the CLI's
/// file-backed `FileStorage` in tests that exercise `save`/`restore`.
#[derive(Default)]
pub struct MapStorage {
    slots: HashMap<String, Vec<u8>>,
    aux_slots: HashMap<String, Vec<u8>>,
}

impl Storage for MapStorage {
    fn save(&mut self, name: &str, data: &[u8]) -> VmResult<()> {
        self.slots.insert(name.to_string(), data.to_vec());
        Ok(())
    }
    fn restore(&mut self, name: &str) -> VmResult<Vec<u8>> {
        self.slots
            .get(name)
            .cloned()
            .ok_or_else(|| zmvm::error::VmError::StorageFailed(format!("no save named {name}")))
    }
    fn save_aux(&mut self, name: &str, data: &[u8]) -> VmResult<()> {
        self.aux_slots.insert(name.to_string(), data.to_vec());
        Ok(())
    }
    fn restore_aux(&mut self, name: &str) -> VmResult<Vec<u8>> {
        self.aux_slots
            .get(name)
            .cloned()
            .ok_or_else(|| zmvm::error::VmError::StorageFailed(format!("no aux save named {name}")))
    }
}

/// An `Input` that never answers anything; every scenario test drives the
/// machine directly via `zmvm::executor::step` and never suspends.
pub struct NeverInput;

impl Input for NeverInput {
    fn request(&mut self, _request: &InputRequest) -> VmResult<InputEvent> {
        Err(zmvm::error::VmError::StorageFailed("unexpected input request in a non-interactive test".into()))
    }
}

/// A bare V3 story image, `size` bytes long, with dynamic memory ending at
/// `static_base` and globals based at `globals_base`. Callers patch in
/// whatever object table / dictionary / code bytes the scenario needs.
pub fn bare_story(version: u8, size: usize, globals_base: u16, static_base: u16, initial_pc: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    bytes[0x00] = version;
    bytes[0x0C..0x0E].copy_from_slice(&globals_base.to_be_bytes());
    bytes[0x0E..0x10].copy_from_slice(&static_base.to_be_bytes());
    bytes[0x06..0x08].copy_from_slice(&initial_pc.to_be_bytes());
    bytes
}

//! Screen collaborator: the display surface the executor talks to. Trimmed
//! of multi-pane windowing extras this crate doesn't need, and folded into
//! the `VmResult` error type used throughout the rest of the crate.

use crate::error::VmResult;
use crate::header::ScreenCaps;

pub trait Screen {
    fn clear_screen(&mut self) -> VmResult<()>;

    /// Split the screen into upper/lower windows (V3 status line, V4+
    /// multi-line upper window). `lines` is the upper window's height.
    fn split_window(&mut self, lines: u16) -> VmResult<()>;

    /// Select the current output window (0 = lower/main, 1 = upper).
    fn set_window(&mut self, window: u8) -> VmResult<()>;

    /// 1-based cursor position; only meaningful in the upper window for V3.
    fn set_cursor(&mut self, line: u16, column: u16) -> VmResult<()>;

    fn get_cursor(&mut self) -> VmResult<(u16, u16)>;

    fn print(&mut self, text: &str) -> VmResult<()>;

    fn print_char(&mut self, ch: char) -> VmResult<()>;

    /// -1 = whole screen, 0 = lower window, 1 = upper window.
    fn erase_window(&mut self, window: i16) -> VmResult<()>;

    fn erase_line(&mut self) -> VmResult<()>;

    fn set_buffer_mode(&mut self, buffered: bool) -> VmResult<()>;

    /// Bitwise style flags: 1 reverse, 2 bold, 4 italic, 8 fixed-pitch.
    fn set_text_style(&mut self, style: u16) -> VmResult<()>;

    fn set_colour(&mut self, foreground: u16, background: u16) -> VmResult<()>;

    /// V3's automatic status line (location/score/moves), a no-op for V4+.
    fn show_status(&mut self, location: &str, score: i16, moves: u16) -> VmResult<()>;

    fn terminal_size(&self) -> (u16, u16);

    /// What this collaborator can actually honor, folded back into the
    /// story's header by `Header::negotiate` at load time.
    fn capabilities(&self) -> ScreenCaps;
}

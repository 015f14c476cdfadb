//! Terminal front end for the bundled CLI: a `Screen`, `Input`, and
//! `Storage` collaborator built on `crossterm`, a single plain-terminal
//! implementation sized to what the core actually needs (print, cursor,
//! split window, line/char input with timeouts, file-backed save/restore).

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::cursor;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::style::{Attribute, SetAttribute};
use crossterm::terminal::{self, ClearType};
use crossterm::{execute, queue};
use log::debug;

use zmvm::error::{VmError, VmResult};
use zmvm::header::ScreenCaps;
use zmvm::input::{Input, InputEvent, InputRequest};
use zmvm::screen::Screen;
use zmvm::storage::{SaveInfo, Storage};

/// Plain-terminal `Screen`: the lower window scrolls normally; the upper
/// window (V3 status line, V4+ split window) is drawn at fixed rows at the
/// top and restored on return to the lower window.
pub struct TerminalScreen {
    rows: u16,
    cols: u16,
    upper_height: u16,
    active_window: u8,
    buffered: bool,
}

impl TerminalScreen {
    pub fn new(rows: u16, cols: u16) -> TerminalScreen {
        TerminalScreen {
            rows,
            cols,
            upper_height: 0,
            active_window: 0,
            buffered: true,
        }
    }
}

impl Screen for TerminalScreen {
    fn clear_screen(&mut self) -> VmResult<()> {
        execute!(io::stdout(), terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
        Ok(())
    }

    fn split_window(&mut self, lines: u16) -> VmResult<()> {
        self.upper_height = lines;
        Ok(())
    }

    fn set_window(&mut self, window: u8) -> VmResult<()> {
        self.active_window = window;
        if window == 1 {
            execute!(io::stdout(), cursor::MoveTo(0, 0))?;
        }
        Ok(())
    }

    fn set_cursor(&mut self, line: u16, column: u16) -> VmResult<()> {
        execute!(io::stdout(), cursor::MoveTo(column.saturating_sub(1), line.saturating_sub(1)))?;
        Ok(())
    }

    fn get_cursor(&mut self) -> VmResult<(u16, u16)> {
        let (col, row) = cursor::position()?;
        Ok((row + 1, col + 1))
    }

    fn print(&mut self, text: &str) -> VmResult<()> {
        let mut stdout = io::stdout();
        for line in text.split_inclusive('\n') {
            queue!(stdout, crossterm::style::Print(line.replace('\n', "\r\n")))?;
        }
        if !self.buffered {
            stdout.flush()?;
        }
        Ok(())
    }

    fn print_char(&mut self, ch: char) -> VmResult<()> {
        let out = if ch == '\n' { "\r\n".to_string() } else { ch.to_string() };
        execute!(io::stdout(), crossterm::style::Print(out))?;
        Ok(())
    }

    fn erase_window(&mut self, window: i16) -> VmResult<()> {
        match window {
            -1 => self.clear_screen(),
            _ => {
                execute!(io::stdout(), terminal::Clear(ClearType::CurrentLine))?;
                Ok(())
            }
        }
    }

    fn erase_line(&mut self) -> VmResult<()> {
        execute!(io::stdout(), terminal::Clear(ClearType::UntilNewLine))?;
        Ok(())
    }

    fn set_buffer_mode(&mut self, buffered: bool) -> VmResult<()> {
        self.buffered = buffered;
        Ok(())
    }

    fn set_text_style(&mut self, style: u16) -> VmResult<()> {
        let mut stdout = io::stdout();
        if style == 0 {
            queue!(stdout, SetAttribute(Attribute::Reset))?;
        } else {
            if style & 1 != 0 {
                queue!(stdout, SetAttribute(Attribute::Reverse))?;
            }
            if style & 2 != 0 {
                queue!(stdout, SetAttribute(Attribute::Bold))?;
            }
            if style & 4 != 0 {
                queue!(stdout, SetAttribute(Attribute::Italic))?;
            }
        }
        stdout.flush()?;
        Ok(())
    }

    fn set_colour(&mut self, _foreground: u16, _background: u16) -> VmResult<()> {
        Ok(())
    }

    fn show_status(&mut self, location: &str, score: i16, moves: u16) -> VmResult<()> {
        let mut stdout = io::stdout();
        let (col, row) = cursor::position()?;
        let status = format!(" {location}  Score: {score}  Moves: {moves} ");
        queue!(
            stdout,
            cursor::MoveTo(0, 0),
            SetAttribute(Attribute::Reverse),
            crossterm::style::Print(format!("{status:<width$}", width = self.cols as usize)),
            SetAttribute(Attribute::Reset),
            cursor::MoveTo(col, row)
        )?;
        stdout.flush()?;
        Ok(())
    }

    fn terminal_size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    fn capabilities(&self) -> ScreenCaps {
        ScreenCaps {
            splitting: true,
            bold: true,
            italic: true,
            fixed_space: false,
            timed_input: true,
            colours: false,
            mouse: false,
        }
    }
}

/// Raw-mode keyboard `Input`: reads a line (with local echo and backspace
/// handling) or a single keystroke, polling in `timeout_tenths`-sized slices
/// so a timer routine can fire without the read blocking forever.
pub struct TerminalInput;

impl TerminalInput {
    pub fn new() -> TerminalInput {
        TerminalInput
    }

    fn poll_key(deadline: Option<Instant>) -> VmResult<Option<KeyCode>> {
        loop {
            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(None);
                    }
                    d - now
                }
                None => Duration::from_millis(250),
            };
            if event::poll(wait)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        return Ok(Some(key.code));
                    }
                }
            } else if deadline.is_none() {
                continue;
            } else {
                return Ok(None);
            }
        }
    }
}

impl Default for TerminalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl Input for TerminalInput {
    fn request(&mut self, request: &InputRequest) -> VmResult<InputEvent> {
        terminal::enable_raw_mode()?;
        let result = match request {
            InputRequest::Line {
                max_len,
                preloaded,
                timeout_tenths,
                ..
            } => read_line(*max_len, preloaded, *timeout_tenths),
            InputRequest::Char { timeout_tenths, .. } => read_char(*timeout_tenths),
        };
        terminal::disable_raw_mode()?;
        result
    }
}

fn read_line(max_len: usize, preloaded: &str, timeout_tenths: u16) -> VmResult<InputEvent> {
    let deadline = (timeout_tenths > 0).then(|| Instant::now() + Duration::from_millis(timeout_tenths as u64 * 100));
    let mut line = preloaded.to_string();
    print_echo(&line)?;
    loop {
        let Some(code) = TerminalInput::poll_key(deadline)? else {
            debug!("line input timed out after {timeout_tenths} tenths of a second");
            return Ok(InputEvent::TimedOut);
        };
        match code {
            KeyCode::Enter => {
                execute!(io::stdout(), crossterm::style::Print("\r\n"))?;
                return Ok(InputEvent::Line(line));
            }
            KeyCode::Backspace => {
                if line.pop().is_some() {
                    execute!(io::stdout(), cursor::MoveLeft(1), crossterm::style::Print(" "), cursor::MoveLeft(1))?;
                }
            }
            KeyCode::Char(c) if line.chars().count() < max_len.saturating_sub(1).max(1) => {
                line.push(c);
                print_echo(&c.to_string())?;
            }
            _ => {}
        }
    }
}

fn read_char(timeout_tenths: u16) -> VmResult<InputEvent> {
    let deadline = (timeout_tenths > 0).then(|| Instant::now() + Duration::from_millis(timeout_tenths as u64 * 100));
    match TerminalInput::poll_key(deadline)? {
        Some(KeyCode::Enter) => Ok(InputEvent::Char('\r')),
        Some(KeyCode::Char(c)) => Ok(InputEvent::Char(c)),
        Some(_) | None => Ok(InputEvent::TimedOut),
    }
}

fn print_echo(text: &str) -> VmResult<()> {
    execute!(io::stdout(), crossterm::style::Print(text))?;
    Ok(())
}

/// Wraps another `Screen` and mirrors everything printed to a transcript
/// file (spec §4.11/§6.3 `--transcript`), independent of the story's own
/// Flags2 transcript-bit request. A thin pass-through: every other method
/// just delegates.
pub struct TranscriptScreen<S: Screen> {
    inner: S,
    file: fs::File,
}

impl<S: Screen> TranscriptScreen<S> {
    pub fn new(inner: S, path: &std::path::Path) -> VmResult<TranscriptScreen<S>> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(TranscriptScreen { inner, file })
    }
}

impl<S: Screen> Screen for TranscriptScreen<S> {
    fn clear_screen(&mut self) -> VmResult<()> {
        self.inner.clear_screen()
    }

    fn split_window(&mut self, lines: u16) -> VmResult<()> {
        self.inner.split_window(lines)
    }

    fn set_window(&mut self, window: u8) -> VmResult<()> {
        self.inner.set_window(window)
    }

    fn set_cursor(&mut self, line: u16, column: u16) -> VmResult<()> {
        self.inner.set_cursor(line, column)
    }

    fn get_cursor(&mut self) -> VmResult<(u16, u16)> {
        self.inner.get_cursor()
    }

    fn print(&mut self, text: &str) -> VmResult<()> {
        self.file.write_all(text.as_bytes())?;
        self.inner.print(text)
    }

    fn print_char(&mut self, ch: char) -> VmResult<()> {
        let mut buf = [0u8; 4];
        self.file.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
        self.inner.print_char(ch)
    }

    fn erase_window(&mut self, window: i16) -> VmResult<()> {
        self.inner.erase_window(window)
    }

    fn erase_line(&mut self) -> VmResult<()> {
        self.inner.erase_line()
    }

    fn set_buffer_mode(&mut self, buffered: bool) -> VmResult<()> {
        self.inner.set_buffer_mode(buffered)
    }

    fn set_text_style(&mut self, style: u16) -> VmResult<()> {
        self.inner.set_text_style(style)
    }

    fn set_colour(&mut self, foreground: u16, background: u16) -> VmResult<()> {
        self.inner.set_colour(foreground, background)
    }

    fn show_status(&mut self, location: &str, score: i16, moves: u16) -> VmResult<()> {
        self.inner.show_status(location, score, moves)
    }

    fn terminal_size(&self) -> (u16, u16) {
        self.inner.terminal_size()
    }

    fn capabilities(&self) -> ScreenCaps {
        self.inner.capabilities()
    }
}

/// File-backed `Storage`: `save`/`restore` persist the Quetzal-style
/// snapshot under `<save_dir>/<name>.qzl`; `save_aux`/`restore_aux` use a
/// `.aux` sibling for the V5+ auxiliary-memory variant.
pub struct FileStorage {
    save_dir: PathBuf,
}

impl FileStorage {
    pub fn new(save_dir: PathBuf) -> VmResult<FileStorage> {
        fs::create_dir_all(&save_dir)?;
        Ok(FileStorage { save_dir })
    }

    fn path_for(&self, name: &str, ext: &str) -> PathBuf {
        self.save_dir.join(format!("{name}.{ext}"))
    }
}

impl Storage for FileStorage {
    fn save(&mut self, name: &str, data: &[u8]) -> VmResult<()> {
        fs::write(self.path_for(name, "qzl"), data)?;
        Ok(())
    }

    fn restore(&mut self, name: &str) -> VmResult<Vec<u8>> {
        fs::read(self.path_for(name, "qzl")).map_err(VmError::Io)
    }

    fn save_aux(&mut self, name: &str, data: &[u8]) -> VmResult<()> {
        fs::write(self.path_for(name, "aux"), data)?;
        Ok(())
    }

    fn restore_aux(&mut self, name: &str) -> VmResult<Vec<u8>> {
        fs::read(self.path_for(name, "aux")).map_err(VmError::Io)
    }

    fn save_info(&self, name: &str) -> VmResult<SaveInfo> {
        let path = self.path_for(name, "qzl");
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(_) => return Ok(SaveInfo::default()),
        };
        let last_modified = metadata
            .modified()
            .ok()
            .map(|time| format!("{:?}", time));
        Ok(SaveInfo {
            exists: true,
            path: Some(path.display().to_string()),
            format: Some("quetzal".to_string()),
            description: None,
            last_modified,
        })
    }
}

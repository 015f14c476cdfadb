//! The machine façade (spec §2, §3.2, §4.8): owns memory, the CPU, the
//! random source, and the undo ring, and exposes the `Running` /
//! `Suspended` / `Halted` lifecycle the rest of the crate dispatches
//! against. This is the thing an embedder actually constructs and drives;
//! [`crate::executor`] is the behavior, this is the state.

use log::info;

use crate::config::Config;
use crate::cpu::Cpu;
use crate::error::{VmError, VmResult};
use crate::executor::{self, StepOutcome};
use crate::header::ScreenCaps;
use crate::input::{Input, InputEvent};
use crate::memory::Memory;
use crate::screen::Screen;
use crate::snapshot::UndoRing;
use crate::storage::Storage;
use crate::zrand::ZRand;

/// What the executor is waiting on while `Machine::state` is `Suspended`.
/// Mirrors `InputRequest` but keeps the bookkeeping (destination addresses,
/// result variable) the executor needs to complete the opcode once an
/// answer arrives.
#[derive(Debug, Clone)]
pub enum PendingInput {
    Line {
        text_buffer_addr: u32,
        parse_buffer_addr: u32,
        max_len: usize,
        preloaded: String,
        timeout_tenths: u16,
        timeout_routine: u16,
        result_var: Option<u8>,
    },
    Char {
        timeout_tenths: u16,
        timeout_routine: u16,
        result_var: Option<u8>,
    },
}

#[derive(Debug, Clone)]
pub enum MachineState {
    Running,
    Suspended(PendingInput),
    Halted,
}

/// Owns every piece of live story state (spec §3.2). `original_image` is
/// kept around untouched so `restart` can reload dynamic memory without
/// re-reading the story file.
pub struct Machine {
    pub memory: Memory,
    pub cpu: Cpu,
    pub rng: ZRand,
    pub undo: UndoRing,
    pub config: Config,
    pub state: MachineState,
    original_image: Vec<u8>,
    screen_caps: ScreenCaps,
}

impl Machine {
    /// Load a story image: parse the header, negotiate it against the
    /// screen collaborator's capabilities, and set the PC to the header's
    /// initial value (or, for V6, the packed routine it names).
    pub fn new(story_bytes: Vec<u8>, config: Config, screen_caps: ScreenCaps) -> VmResult<Machine> {
        let original_image = story_bytes.clone();
        let mut memory = Memory::new(story_bytes, config.static_write_policy)?;
        memory.negotiate_header(config.rows as u8, config.cols as u8, screen_caps);

        let version = memory.header.version;
        let initial_pc = if version == 6 {
            memory.unpack_routine(memory.header.initial_pc)
        } else {
            memory.header.initial_pc as u32
        };
        let cpu = Cpu::new(initial_pc, memory.header.global_variables);

        Ok(Machine {
            memory,
            cpu,
            rng: ZRand::new_uniform(),
            undo: UndoRing::new(config.undo_capacity),
            config,
            state: MachineState::Running,
            original_image,
            screen_caps,
        })
    }

    /// `restart` (spec §4.8/§4.10): reload dynamic memory from the original
    /// story bytes, clear the stacks, reset the PC, and re-negotiate the
    /// header so screen-dependent flags stay consistent.
    pub fn restart(&mut self) {
        info!("restarting story");
        self.memory.restore_dynamic_memory(&self.original_image);
        self.memory
            .negotiate_header(self.config.rows as u8, self.config.cols as u8, self.screen_caps);

        let version = self.memory.header.version;
        let initial_pc = if version == 6 {
            self.memory.unpack_routine(self.memory.header.initial_pc)
        } else {
            self.memory.header.initial_pc as u32
        };
        self.cpu.reset(initial_pc);
        self.state = MachineState::Running;
    }

    /// Run a single fetch/decode/dispatch cycle and, if it suspends, block
    /// on `input` for the answer and resume immediately. A simple
    /// synchronous front end (the bundled CLI) drives the whole story this
    /// way; an async or GUI embedder instead calls `step`/`resume` from
    /// `executor` directly and keeps `pending_request` in hand between
    /// calls.
    pub fn run(
        &mut self,
        screen: &mut dyn Screen,
        input: &mut dyn Input,
        storage: &mut dyn Storage,
    ) -> VmResult<()> {
        loop {
            match &self.state {
                MachineState::Halted => return Ok(()),
                MachineState::Suspended(_) => {
                    self.answer_pending(screen, input, storage)?;
                }
                MachineState::Running => match executor::step(self, screen, storage)? {
                    StepOutcome::Continue => {}
                    StepOutcome::Halted => self.state = MachineState::Halted,
                    StepOutcome::Suspended => {
                        self.answer_pending(screen, input, storage)?;
                    }
                },
            }
        }
    }

    fn answer_pending(
        &mut self,
        screen: &mut dyn Screen,
        input: &mut dyn Input,
        storage: &mut dyn Storage,
    ) -> VmResult<()> {
        let Some(request) = executor::pending_request(self) else {
            return Err(VmError::DecodeError {
                pc: self.cpu.pc,
                reason: "answer_pending called while not suspended".to_string(),
            });
        };
        let event = input.request(&request)?;
        if matches!(event, InputEvent::TimedOut) {
            self.fire_timeout(screen, storage)?;
        } else {
            executor::resume(self, event)?;
        }
        Ok(())
    }

    /// A deci-second timer expired while suspended on `sread`/`read_char`
    /// (spec §4.9/§5). If a timeout routine was given, run it to
    /// completion with its result discarded from the game's point of view
    /// but observed here: a non-zero return cancels the pending input
    /// (delivered as an empty line or a zero key code); a zero return
    /// leaves the original request outstanding.
    fn fire_timeout(&mut self, screen: &mut dyn Screen, storage: &mut dyn Storage) -> VmResult<()> {
        let routine = match &self.state {
            MachineState::Suspended(PendingInput::Line { timeout_routine, .. })
            | MachineState::Suspended(PendingInput::Char { timeout_routine, .. }) => *timeout_routine,
            _ => {
                return Err(VmError::DecodeError {
                    pc: self.cpu.pc,
                    reason: "fire_timeout called while not suspended".to_string(),
                })
            }
        };
        if routine == 0 {
            return Ok(());
        }

        let cancel = self.call_timeout_routine(routine, screen, storage)?;
        if cancel {
            executor::resume(self, InputEvent::TimedOut)?;
        }
        Ok(())
    }

    /// Call `routine` with no arguments, running the machine until that one
    /// frame returns, and report whether it returned non-zero. The return
    /// value is captured by pushing it onto the evaluation stack (variable
    /// 0) rather than a real destination, then popped back off once the
    /// frame unwinds.
    fn call_timeout_routine(
        &mut self,
        routine: u16,
        screen: &mut dyn Screen,
        storage: &mut dyn Storage,
    ) -> VmResult<bool> {
        let byte_addr = self.memory.unpack_routine(routine);
        if !self.memory.is_valid_routine(byte_addr) {
            return Err(VmError::InvalidAddress {
                addr: byte_addr,
                size: self.memory.len(),
            });
        }
        let num_locals = self.memory.validate_routine_header(byte_addr)?;
        let mut locals = [0u16; crate::cpu::MAX_LOCALS];
        let mut code_start = byte_addr + 1;
        if self.memory.header.version <= 4 {
            for slot in locals.iter_mut().take(num_locals as usize) {
                *slot = self.memory.get_word(code_start)?;
                code_start += 2;
            }
        }

        let target_depth = self.cpu.call_depth();
        let saved_pc = self.cpu.pc;
        self.cpu.push_frame(saved_pc, Some(0), num_locals, locals, 0);
        self.cpu.pc = code_start;

        let previous_state = std::mem::replace(&mut self.state, MachineState::Running);
        loop {
            match executor::step(self, screen, storage)? {
                StepOutcome::Continue => {
                    if self.cpu.call_depth() <= target_depth {
                        break;
                    }
                }
                StepOutcome::Halted => {
                    self.state = MachineState::Halted;
                    return Ok(false);
                }
                StepOutcome::Suspended => {
                    return Err(VmError::DecodeError {
                        pc: self.cpu.pc,
                        reason: "timeout routine attempted to read input".to_string(),
                    });
                }
            }
        }
        self.state = previous_state;

        let result = self.cpu.pop()?;
        Ok(result != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn minimal_story() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x200];
        bytes[0x00] = 3;
        bytes[0x0C..0x0E].copy_from_slice(&0x100u16.to_be_bytes()); // globals
        bytes[0x0E..0x10].copy_from_slice(&0x180u16.to_be_bytes()); // static base
        bytes[0x06..0x08].copy_from_slice(&0x190u16.to_be_bytes()); // initial pc
        // The initial PC names an instruction directly (not a routine header
        // with a locals-count byte), so the entry byte must itself decode.
        bytes[0x190] = 0xB0; // rtrue (short form, 0OP)
        bytes
    }

    #[test]
    fn new_sets_pc_from_header() {
        let machine = Machine::new(minimal_story(), Config::default(), ScreenCaps::default()).unwrap();
        assert_eq!(machine.cpu.pc, 0x190);
        assert!(matches!(machine.state, MachineState::Running));
    }

    #[test]
    fn restart_reloads_dynamic_memory_and_resets_pc() {
        let mut machine = Machine::new(minimal_story(), Config::default(), ScreenCaps::default()).unwrap();
        machine.memory.set_byte(0x50, 0xFF).unwrap();
        machine.cpu.pc = 0x1000;
        machine.state = MachineState::Halted;

        machine.restart();

        assert_eq!(machine.memory.get_byte(0x50).unwrap(), 0);
        assert_eq!(machine.cpu.pc, 0x190);
        assert!(matches!(machine.state, MachineState::Running));
    }

    #[test]
    fn negotiate_runs_at_load() {
        let machine = Machine::new(minimal_story(), Config::default(), ScreenCaps::default()).unwrap();
        assert_eq!(machine.memory.header.screen_rows, 24);
        assert_eq!(machine.memory.header.screen_cols, 80);
    }
}

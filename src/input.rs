//! Input collaborator and the suspend/resume contract: a non-blocking
//! alternative to reading a line or keystroke directly inline.
//!
//! The executor never blocks waiting on a human: when it needs a line of
//! text, a single keystroke, or a save/restore payload, it returns
//! [`crate::executor::ExecState::Suspended`] describing what it needs. The
//! front end collects that externally (terminal read, GUI widget, network
//! round trip) and calls [`crate::executor::Executor::resume`] with the
//! answer. `Input` is the synchronous convenience a simple front end (like
//! the bundled CLI) uses to actually gather that answer; it is not consulted
//! by the executor itself.

use crate::error::VmResult;

/// What the executor is pausing for.
#[derive(Debug, Clone)]
pub enum InputRequest {
    /// `sread`/`aread`: a full line, optionally with a countdown timer that
    /// fires a routine call if it expires before input arrives.
    Line {
        max_len: usize,
        preloaded: String,
        timeout_tenths: u16,
        timeout_routine: u16,
    },
    /// `read_char` (V4+): a single keystroke, with the same optional timer.
    Char {
        timeout_tenths: u16,
        timeout_routine: u16,
    },
}

/// What the front end hands back to `Executor::resume`.
#[derive(Debug, Clone)]
pub enum InputEvent {
    Line(String),
    Char(char),
    /// The timeout fired before the human answered.
    TimedOut,
}

pub trait Input {
    fn request(&mut self, request: &InputRequest) -> VmResult<InputEvent>;

    /// The host gives up on the pending request without an answer arriving.
    /// Per the suspend/resume contract, the caller still drives the VM
    /// forward by handing `resume` an event — cancellation doesn't short
    /// out of the protocol, it just supplies an empty line / zero key code
    /// as that event. Collaborators that have nothing to clean up can accept
    /// the default no-op.
    fn cancel_input(&mut self) -> VmResult<()> {
        Ok(())
    }
}

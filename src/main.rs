mod terminal;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use terminal::{FileStorage, TerminalInput, TerminalScreen, TranscriptScreen};
use zmvm::config::Config;
use zmvm::disassemble::disassemble_range;
use zmvm::error::VmError;
use zmvm::machine::Machine;
use zmvm::screen::Screen;

/// A Z-Machine (Infocom interactive fiction) interpreter.
#[derive(Parser, Debug)]
#[command(name = "zmvm", about = "Run an Infocom-era Z-Machine story file")]
struct Cli {
    /// Path to the story file (.z1-.z8 / .dat)
    #[arg(long)]
    story: PathBuf,

    /// Directory for save files and the undo ring's aux blobs
    #[arg(long, default_value = "saves")]
    save_dir: PathBuf,

    /// trace, debug, info, warn, or error
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[arg(long, default_value_t = 24)]
    rows: u16,

    #[arg(long, default_value_t = 80)]
    cols: u16,

    /// Mirror all output to this file as well as the terminal
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Override the undo ring's capacity (default: 10)
    #[arg(long)]
    undo_capacity: Option<usize>,

    /// Treat unimplemented opcodes as no-ops instead of halting
    #[arg(long, conflicts_with = "strict")]
    permissive: bool,

    /// Fatal on any static-memory write or unimplemented opcode
    #[arg(long, conflicts_with = "permissive")]
    strict: bool,

    /// Dump a disassembly of the story's initial routine and exit, instead
    /// of running it
    #[arg(long)]
    disassemble: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    match run(cli) {
        Ok(()) => ExitCode::from(0),
        Err(Outcome::MalformedStory(msg)) => {
            eprintln!("malformed story file: {msg}");
            ExitCode::from(2)
        }
        Err(Outcome::Io(msg)) => {
            eprintln!("I/O error: {msg}");
            ExitCode::from(3)
        }
        Err(Outcome::Runtime(msg)) => {
            eprintln!("runtime error: {msg}");
            ExitCode::from(1)
        }
    }
}

enum Outcome {
    MalformedStory(String),
    Io(String),
    Runtime(String),
}

fn run(cli: Cli) -> Result<(), Outcome> {
    let story_bytes = fs::read(&cli.story).map_err(|e| Outcome::Io(e.to_string()))?;

    let mut config = if cli.strict {
        Config::strict()
    } else if cli.permissive {
        Config::permissive()
    } else {
        Config::default()
    };
    config.rows = cli.rows;
    config.cols = cli.cols;
    if let Some(capacity) = cli.undo_capacity {
        config.undo_capacity = capacity;
    }

    let term_screen = TerminalScreen::new(cli.rows, cli.cols);
    let caps = term_screen.capabilities();

    if cli.disassemble {
        let machine = Machine::new(story_bytes, config, caps).map_err(to_outcome)?;
        let end = machine.memory.len();
        print!(
            "{}",
            disassemble_range(machine.memory.raw(), machine.cpu.pc as usize, end, machine.memory.header.version)
        );
        return Ok(());
    }

    let mut machine = Machine::new(story_bytes, config, caps).map_err(to_outcome)?;
    let mut input = TerminalInput::new();
    let mut storage = FileStorage::new(cli.save_dir).map_err(to_outcome)?;

    match cli.transcript {
        Some(path) => {
            let mut screen = TranscriptScreen::new(term_screen, &path).map_err(to_outcome)?;
            machine.run(&mut screen, &mut input, &mut storage)
        }
        None => {
            let mut screen = term_screen;
            machine.run(&mut screen, &mut input, &mut storage)
        }
    }
    .map_err(|e| {
        error!("halted: {e}");
        to_outcome(e)
    })
}

fn to_outcome(err: VmError) -> Outcome {
    match err {
        VmError::MalformedStory(msg) => Outcome::MalformedStory(msg),
        VmError::Io(e) => Outcome::Io(e.to_string()),
        other => Outcome::Runtime(other.to_string()),
    }
}

//! Interactive command loop on stdin.
//!
//! Runs on a blocking thread; every command is forwarded to the engine and
//! awaited before the next line is read, so the enrollment name prompt never
//! competes with the command reader for stdin.

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use tokio::runtime::Handle;

use crate::engine::{EngineError, EngineHandle, NamePrompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Enroll,
    Recognize,
    Exit,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enroll" | "e" => Ok(Command::Enroll),
            "recognize" | "r" => Ok(Command::Recognize),
            "exit" | "x" | "stop" => Ok(Command::Exit),
            "status" | "s" => Ok(Command::Status),
            "help" | "h" | "?" => Ok(Command::Help),
            "quit" | "q" => Ok(Command::Quit),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

const HELP: &str = "\
commands:
  enroll     capture a face and store it under a name
  recognize  start recognition (requires a passed liveness check)
  exit       stop the camera and reset liveness
  status     print the session state
  help       show this message
  quit       leave glimpse";

/// Reads the enrollment name from stdin. An empty line or EOF cancels.
pub struct StdinPrompt;

impl NamePrompt for StdinPrompt {
    fn ask(&mut self, message: &str) -> Option<String> {
        print!("{message} ");
        io::stdout().flush().ok();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

fn read_command() -> Option<String> {
    print!("> ");
    io::stdout().flush().ok();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(e) => {
            tracing::warn!(error = %e, "stdin read failed");
            None
        }
    }
}

/// Run until `quit`, EOF, or the engine goes away. Blocks the calling thread.
pub fn run(engine: EngineHandle, rt: Handle) {
    println!("{HELP}");
    while let Some(line) = read_command() {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e} (try 'help')");
                continue;
            }
        };
        tracing::debug!(?command, "console command");

        let outcome = match command {
            Command::Enroll => rt.block_on(engine.enroll(Box::new(StdinPrompt))).map(drop),
            Command::Recognize => rt.block_on(engine.recognize()),
            Command::Exit => rt.block_on(engine.exit()),
            Command::Status => rt.block_on(engine.status()).map(|snapshot| {
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::warn!(error = %e, "status encode failed"),
                }
            }),
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => break,
        };

        match outcome {
            Ok(()) => {}
            Err(EngineError::ChannelClosed) => {
                tracing::error!("engine stopped, leaving console");
                break;
            }
            // Already reported on the status line.
            Err(e) => tracing::debug!(error = %e, "command refused"),
        }
    }
}

//! Line commands typed on stdin.

use crossbeam_channel::Receiver;
use std::io::BufRead;
use std::thread;
use tracing::{debug, warn};
use tuner_core::GuitarString;

pub const HELP: &str =
    "commands: start | stop | auto | e2 | a | d | g | b | e4 | help | quit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserCommand {
    Start,
    Stop,
    /// Return to auto string matching.
    Auto,
    Select(GuitarString),
    Help,
    Quit,
}

/// Parses one line of input. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<UserCommand>, String> {
    let word = line.trim().to_ascii_lowercase();
    let command = match word.as_str() {
        "" => return Ok(None),
        "start" => UserCommand::Start,
        "stop" => UserCommand::Stop,
        "auto" => UserCommand::Auto,
        "help" | "?" => UserCommand::Help,
        "quit" | "exit" | "q" => UserCommand::Quit,
        other => match other.parse::<GuitarString>() {
            Ok(string) => UserCommand::Select(string),
            Err(_) => return Err(format!("unknown command '{}'", line.trim())),
        },
    };
    Ok(Some(command))
}

/// Reads stdin on its own thread. The channel closes at end of input.
pub fn spawn_stdin_reader() -> std::io::Result<Receiver<UserCommand>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("[INPUT] Could not read stdin: {}", e);
                        break;
                    }
                };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => warn!("[INPUT] {}; {}", message, HELP),
                }
            }
            debug!("[INPUT] End of input");
        })?;
    Ok(rx)
}

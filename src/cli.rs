use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;
use crate::error::{ChatError, Result};

#[derive(Parser)]
#[command(name = "whispernet")]
#[command(version)]
#[command(about = "Anonymous room chat between contexts on one machine")]
pub struct Args {
    /// Path to the TOML config file (missing file means defaults)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Interactive chat across simulated contexts sharing one bus
    Chat {
        /// Room every context enters on startup
        #[arg(long)]
        room: Option<String>,

        /// Number of simulated contexts (overrides config)
        #[arg(long)]
        tabs: Option<usize>,
    },
    /// Scripted two-context exchange
    Demo {
        #[arg(long, default_value = "lounge")]
        room: String,
    },
    /// Generate a meditation image and print its data URI
    Imagine {
        prompt: String,
    },
    /// Synthesize a spoken script and write it as raw PCM
    Speak {
        script: String,

        /// Output file for 16-bit little-endian PCM
        #[arg(long, default_value = "meditation.pcm")]
        out: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// REPL commands
// ---------------------------------------------------------------------------

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Switch to context `K` (1-based).
    Tab(usize),
    Join(String),
    Leave,
    Who,
    History,
    Help,
    Quit,
    Say(String),
}

pub const REPL_HELP: &str = "\
/tab K      switch to context K
/join NAME  enter a room (leaves the current one)
/leave      leave the current room
/who        show this context's anonymous id and room
/history    print the room history
/quit       exit
anything else is sent to the current room";

/// Parse a REPL line. Blank lines yield `Ok(None)`.
pub fn parse_repl_line(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ReplCommand::Say(line.to_string())));
    };

    let (verb, arg) = match rest.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (rest, ""),
    };
    let command = match verb {
        "tab" => {
            let k: usize = arg
                .parse()
                .map_err(|_| ChatError::InvalidInput(format!("/tab expects a number, got {arg:?}")))?;
            if k == 0 {
                return Err(ChatError::InvalidInput("tabs are numbered from 1".to_string()));
            }
            ReplCommand::Tab(k)
        }
        "join" => {
            if arg.is_empty() {
                return Err(ChatError::InvalidInput("/join expects a room name".to_string()));
            }
            ReplCommand::Join(arg.to_string())
        }
        "leave" => ReplCommand::Leave,
        "who" => ReplCommand::Who,
        "history" => ReplCommand::History,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => {
            return Err(ChatError::InvalidInput(format!(
                "unknown command /{other} (try /help)"
            )))
        }
    };
    Ok(Some(command))
}

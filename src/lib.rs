//! Shell-style pipelines for Rust programs.
//!
//! This crate lets a program describe external commands, chain them with
//! pipes and redirections, and run them lazily: nothing starts until a result
//! is asked for, and each command instance runs at most once. Commands can also
//! run alongside in-process code, fed from iterators, read line by line, or
//! driven interactively through their raw pipes.
//!
//! The main entry point is [`Command`] (or the [`make`] shorthand). Data made
//! in-process is piped in through [`Producer`], and long-running commands are
//! tracked by the job registry ([`jobs`], [`wait_jobs`]). Process-wide defaults
//! live in the [`modes`](mod@modes) module.
//!
//! ```no_run
//! use pipe_commands::{Command, Producer};
//!
//! let matches = "apple\nbanana\ncherry\n" | Command::new("grep").arg("an");
//! assert_eq!(matches.stdout()?.as_deref(), Some("banana\n"));
//!
//! let numbers = Producer::lines((1..=3).map(|i| format!("{i}\n")));
//! let total = numbers.pipe(Command::new("paste").args(["-sd+"])) | Command::new("bc");
//! assert_eq!(total.to_string(), "6\n");
//! # Ok::<(), pipe_commands::Error>(())
//! ```

pub mod command;
mod descriptor;
mod encoding;
mod engine;
pub mod env;
mod error;
mod io_adapters;
mod jobs;
pub mod modes;
mod pipe;
mod redirect;
mod session;
mod table;

pub use command::{Command, ExitCode, Lines, make};
pub use descriptor::{Descriptor, FlagValue};
pub use encoding::Encoding;
pub use engine::{Outcome, Status};
pub use env::Environment;
pub use error::{Error, Result};
pub use io_adapters::{Chunk, InputWriter, IntoChunk, LineReader};
pub use jobs::{JobInfo, jobs, wait_jobs};
pub use modes::{Modes, modes, set_always_raise, set_always_stream, set_interactive};
pub use pipe::{Conversation, Dialogue, Param, Producer, Reply, ResultArgs, StreamArgs};
pub use session::Session;
pub use table::Row;

#[cfg(unix)]
pub use nix::sys::signal::Signal;

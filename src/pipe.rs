//! Piping between commands and in-process code.
//!
//! Command to command piping lives on [`Command::pipe`]. This module covers the
//! other directions: data produced in-process flowing into a command
//! ([`Producer`]), a finished command's results handed to a function
//! ([`Command::pipe_result`]), live streams handed to a function
//! ([`Command::pipe_streams`]), and a line-by-line exchange with a running
//! command ([`Command::converse`]).

use crate::command::{Command, ExitCode};
use crate::engine::{Feed, Input, Job, Launch, Outcome, OutputWiring, StdinWiring};
use crate::error::{Error, Result};
use crate::io_adapters::{Chunk, InputWriter, IntoChunk, LineReader};
use crate::jobs;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::ops::{BitOr, Sub};
use std::process::{ChildStderr, ChildStdout};
use std::str::FromStr;
use std::sync::Arc;

/// Names a consumer function can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Returncode,
    Output,
    Errors,
    Stdin,
    Stdout,
    Stderr,
}

impl Param {
    pub fn name(self) -> &'static str {
        match self {
            Param::Returncode => "returncode",
            Param::Output => "output",
            Param::Errors => "errors",
            Param::Stdin => "stdin",
            Param::Stdout => "stdout",
            Param::Stderr => "stderr",
        }
    }

    fn is_stream(self) -> bool {
        matches!(self, Param::Stdin | Param::Stdout | Param::Stderr)
    }
}

impl FromStr for Param {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "returncode" => Ok(Param::Returncode),
            "output" => Ok(Param::Output),
            "errors" => Ok(Param::Errors),
            "stdin" => Ok(Param::Stdin),
            "stdout" => Ok(Param::Stdout),
            "stderr" => Ok(Param::Stderr),
            other => Err(Error::Usage(format!("unknown parameter name `{other}`"))),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Results of a finished command; only the declared fields are filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultArgs {
    pub returncode: Option<ExitCode>,
    /// Decoded stdout, empty when it was not captured.
    pub output: Option<String>,
    /// Decoded stderr, empty when it was not captured.
    pub errors: Option<String>,
}

/// Live pipes of a running command; only the declared fields are filled in.
#[derive(Default)]
pub struct StreamArgs {
    pub stdin: Option<InputWriter>,
    pub stdout: Option<LineReader<ChildStdout>>,
    pub stderr: Option<LineReader<ChildStderr>>,
}

fn check_params(params: &[Param], streams: bool, consumer: &str) -> Result<()> {
    match params.iter().find(|param| param.is_stream() != streams) {
        Some(param) => Err(Error::Usage(format!(
            "`{param}` cannot be passed to a {consumer} consumer"
        ))),
        None => Ok(()),
    }
}

fn already_started(cmd: &Command) -> Error {
    Error::InvalidState(format!("`{}` was already started", cmd.desc))
}

impl Command {
    /// Run the command to completion, then call `consumer` once with the
    /// results named in `params`.
    ///
    /// Only `returncode`, `output` and `errors` may be declared.
    pub fn pipe_result<T>(&self, params: &[Param], consumer: impl FnOnce(ResultArgs) -> T) -> Result<T> {
        check_params(params, false, "result")?;
        self.evaluate()?;
        let mut args = ResultArgs::default();
        for param in params {
            match param {
                Param::Returncode => args.returncode = Some(self.returncode()?),
                Param::Output => args.output = Some(self.stdout()?.unwrap_or_default()),
                Param::Errors => args.errors = Some(self.stderr()?.unwrap_or_default()),
                Param::Stdin | Param::Stdout | Param::Stderr => {}
            }
        }
        Ok(consumer(args))
    }

    /// Start the command in the background and call `consumer` with the live
    /// pipes named in `params`.
    ///
    /// The command is not waited for: it is listed in [`jobs`](crate::jobs)
    /// until [`Command::wait`] or [`wait_jobs`](crate::wait_jobs). Undeclared
    /// outputs are captured and stdin, if undeclared, reads from nothing.
    /// Returning an iterator over `stdout` lets the result be piped on lazily
    /// with [`Producer::lines`].
    pub fn pipe_streams<T>(&self, params: &[Param], consumer: impl FnOnce(StreamArgs) -> T) -> Result<T> {
        check_params(params, true, "stream")?;
        let wants = |param: Param| params.contains(&param);
        if wants(Param::Stdin) && self.input.is_some() {
            return Err(Error::Usage(format!(
                "`{}` already has an input; `stdin` cannot be declared",
                self.desc
            )));
        }
        let output = |param: Param| if wants(param) { OutputWiring::Hand } else { OutputWiring::Capture };
        let launch = Launch {
            stdin: if wants(Param::Stdin) { StdinWiring::Hand } else { StdinWiring::Null },
            stdout: output(Param::Stdout),
            stderr: output(Param::Stderr),
        };
        let handles = self
            .job
            .start(&self.desc, self.input.as_ref(), launch)?
            .ok_or_else(|| already_started(self))?;
        jobs::register(self.job.clone());

        let encoding = self.desc.encoding;
        let args = StreamArgs {
            stdin: handles.stdin.map(|pipe| InputWriter::new(pipe, encoding)),
            stdout: handles.stdout.map(|pipe| LineReader::new(pipe, encoding)),
            stderr: handles.stderr.map(|pipe| LineReader::new(pipe, encoding)),
        };
        Ok(consumer(args))
    }

    /// Start the command and exchange lines with it through `conversation`.
    ///
    /// Nothing is read or written until the returned [`Dialogue`] is iterated.
    /// The command is listed in [`jobs`](crate::jobs) until it is waited for.
    pub fn converse<C: Conversation>(&self, conversation: C) -> Result<Dialogue<C>> {
        if self.input.is_some() {
            return Err(Error::Usage(format!(
                "`{}` already has an input and cannot hold a conversation",
                self.desc
            )));
        }
        let launch = Launch {
            stdin: StdinWiring::Hand,
            stdout: OutputWiring::Hand,
            stderr: OutputWiring::Capture,
        };
        let handles = self
            .job
            .start(&self.desc, None, launch)?
            .ok_or_else(|| already_started(self))?;
        jobs::register(self.job.clone());

        let encoding = self.desc.encoding;
        let (Some(stdin), Some(stdout)) = (handles.stdin, handles.stdout) else {
            return Err(Error::InvalidState(format!("`{}` has no pipes to talk through", self.desc)));
        };
        Ok(Dialogue {
            conversation,
            stdin: InputWriter::new(stdin, encoding),
            stdout: LineReader::new(stdout, encoding),
            job: self.job.clone(),
            opened: false,
            done: false,
        })
    }
}

/// What to do after receiving a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write this text to the command. No newline is added.
    Send(String),
    /// Write nothing and wait for the next line.
    Silent,
    /// Close the command's input and stop.
    Hangup,
}

/// One side of a line-by-line exchange with a running command.
pub trait Conversation {
    /// Text written before the first line is read.
    fn open(&mut self) -> Option<String> {
        None
    }

    /// Called with every line the command prints, `\n` included.
    fn reply(&mut self, line: &str) -> Reply;
}

impl<F: FnMut(&str) -> Reply> Conversation for F {
    fn reply(&mut self, line: &str) -> Reply {
        self(line)
    }
}

/// A running exchange started by [`Command::converse`].
///
/// Iterating reads one line from the command, asks the conversation for a
/// reply and writes it; every text sent is also yielded. Input is closed on
/// [`Reply::Hangup`] or when the command's output ends.
pub struct Dialogue<C> {
    conversation: C,
    stdin: InputWriter,
    stdout: LineReader<ChildStdout>,
    job: Arc<Job>,
    opened: bool,
    done: bool,
}

impl<C: Conversation> Dialogue<C> {
    fn send(&mut self, text: &str) -> io::Result<()> {
        match self.stdin.send(text) {
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    }

    fn hang_up(&mut self) {
        self.done = true;
        self.stdin.close();
    }

    /// Close the command's input, discard its remaining output and wait for it.
    pub fn finish(mut self) -> Result<Arc<Outcome>> {
        self.hang_up();
        self.stdout.read_rest()?;
        self.job.wait()
    }
}

impl<C: Conversation> Iterator for Dialogue<C> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.opened {
            self.opened = true;
            if let Some(text) = self.conversation.open() {
                return Some(self.send(&text).map(|()| text));
            }
        }
        while !self.done {
            let line = match self.stdout.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    self.hang_up();
                    return Some(Err(err));
                }
            };
            match self.conversation.reply(&line) {
                Reply::Send(text) => return Some(self.send(&text).map(|()| text)),
                Reply::Silent => {}
                Reply::Hangup => break,
            }
        }
        self.hang_up();
        None
    }
}

/// In-process data ready to be piped into a command.
///
/// Text and bytes can be fed any number of times, to any number of commands.
/// An iterator is shared: it is drained once, by whichever command reads it
/// first, and copies of a command fed from it compete for its items.
#[derive(Clone)]
pub struct Producer(Feed);

impl Producer {
    /// Text written whole, encoded with the receiving command's encoding.
    pub fn text(text: impl Into<String>) -> Self {
        Producer(Feed::Text(Arc::from(text.into())))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Producer(Feed::Bytes(Arc::from(bytes.into())))
    }

    /// Items written one after another, as they are pulled from `items`.
    ///
    /// Nothing is appended between items. The iterator may be infinite: feeding
    /// stops when the command stops reading.
    pub fn lines<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoChunk + 'static,
        I::IntoIter: Send + 'static,
    {
        let chunks: Box<dyn Iterator<Item = io::Result<Chunk>> + Send> =
            Box::new(items.into_iter().map(IntoChunk::into_chunk));
        Producer(Feed::Chunks(Arc::new(Mutex::new(chunks))))
    }

    /// `cmd` with this data as its stdin, replacing any input it had.
    pub fn pipe(self, cmd: Command) -> Command {
        cmd.with_input(Input::Feed(self.0))
    }
}

impl<C: Conversation + Send + 'static> From<Dialogue<C>> for Producer {
    fn from(dialogue: Dialogue<C>) -> Self {
        Producer::lines(dialogue)
    }
}

impl BitOr<Command> for Command {
    type Output = Command;

    fn bitor(self, right: Command) -> Command {
        self.pipe(right)
    }
}

impl BitOr<Command> for Producer {
    type Output = Command;

    fn bitor(self, right: Command) -> Command {
        self.pipe(right)
    }
}

impl BitOr<Command> for &str {
    type Output = Command;

    fn bitor(self, right: Command) -> Command {
        Producer::text(self).pipe(right)
    }
}

impl BitOr<Command> for String {
    type Output = Command;

    fn bitor(self, right: Command) -> Command {
        Producer::text(self).pipe(right)
    }
}

impl BitOr<Command> for Vec<u8> {
    type Output = Command;

    fn bitor(self, right: Command) -> Command {
        Producer::bytes(self).pipe(right)
    }
}

impl<C: Conversation + Send + 'static> BitOr<Command> for Dialogue<C> {
    type Output = Command;

    fn bitor(self, right: Command) -> Command {
        Producer::from(self).pipe(right)
    }
}

/// `ls - "l"` appends `-l`, `ls - "all"` appends `--all`.
impl Sub<&str> for Command {
    type Output = Command;

    fn sub(self, name: &str) -> Command {
        self.dash(name)
    }
}

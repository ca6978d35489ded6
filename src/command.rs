use crate::descriptor::{Arg, Descriptor, FlagValue, OutputFile, expand_glob};
use crate::encoding::Encoding;
use crate::engine::{Feed, Input, Job, Launch, Outcome, Status};
use crate::error::{Error, Result};
use crate::jobs;
use crate::modes::modes;
use crate::table::{self, Row};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Processes killed by a signal report `128 + signal`, as POSIX shells do.
pub type ExitCode = i32;

/// Build a command for `program` with positional `args`.
///
/// Same as `Command::new(program).args(args)`.
pub fn make<I, S>(program: impl Into<String>, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Command::new(program).args(args)
}

/// A lazily evaluated external command.
///
/// Building and customizing a `Command` never starts anything: each builder
/// method returns a new command with the change applied and leaves `self` as it
/// was. The process starts the first time a result is asked for and runs at
/// most once per instance; later requests get the cached outcome.
///
/// Cloning gives an independent, unevaluated instance with the same
/// description, so a clone runs its own process.
///
/// ```no_run
/// use pipe_commands::Command;
///
/// let ls = Command::new("ls").flag("color", false);
/// let count = ls.pipe(Command::new("wc").arg("-l"));
/// println!("{}", count.stdout()?.unwrap_or_default());
/// # Ok::<(), pipe_commands::Error>(())
/// ```
pub struct Command {
    pub(crate) desc: Descriptor,
    pub(crate) input: Option<Input>,
    pub(crate) job: Arc<Job>,
}

impl Clone for Command {
    fn clone(&self) -> Self {
        Self::from_parts(self.desc.clone(), self.input.clone())
    }
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self::from_parts(Descriptor::new(program), None)
    }

    pub(crate) fn from_parts(desc: Descriptor, input: Option<Input>) -> Self {
        let job = Job::new(&desc);
        Self { desc, input, job }
    }

    fn customize(&self, change: impl FnOnce(&mut Descriptor)) -> Self {
        let mut desc = self.desc.clone();
        change(&mut desc);
        Self::from_parts(desc, self.input.clone())
    }

    pub(crate) fn with_input(&self, input: Input) -> Self {
        Self::from_parts(self.desc.clone(), Some(input))
    }

    /// Append a positional argument, expanded like a shell glob.
    ///
    /// A pattern that matches nothing is passed literally.
    pub fn arg(&self, arg: impl AsRef<str>) -> Self {
        let expanded = expand_glob(arg.as_ref());
        self.customize(|desc| {
            desc.args
                .extend(expanded.into_iter().map(Arg::Positional));
        })
    }

    pub fn args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let expanded: Vec<String> = args
            .into_iter()
            .flat_map(|arg| expand_glob(arg.as_ref()))
            .collect();
        self.customize(|desc| {
            desc.args
                .extend(expanded.into_iter().map(Arg::Positional));
        })
    }

    /// Append a long-form flag: `true` gives `--name`, `false` gives
    /// `--no-name`, anything else `--name=value`. Underscores become hyphens.
    pub fn flag(&self, name: &str, value: impl Into<FlagValue>) -> Self {
        let flag = Arg::flag(name, value.into());
        self.customize(|desc| desc.args.push(flag))
    }

    /// Append `name` verbatim, without glob expansion: `git.subcommand("push")`.
    pub fn subcommand(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.customize(|desc| desc.args.push(Arg::Positional(name)))
    }

    /// Append `-x` for a single character, `--name` otherwise.
    pub fn dash(&self, name: &str) -> Self {
        let arg = if name.chars().count() == 1 {
            format!("-{name}")
        } else {
            format!("--{name}")
        };
        self.customize(|desc| desc.args.push(Arg::Positional(arg)))
    }

    pub fn env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.customize(|desc| desc.env.set_var(key, value))
    }

    /// Treat input and output as raw bytes.
    pub fn binary(&self) -> Self {
        self.customize(|desc| desc.text = false)
    }

    /// Text mode with the given encoding.
    pub fn encoding(&self, encoding: Encoding) -> Self {
        self.customize(|desc| {
            desc.text = true;
            desc.encoding = encoding;
        })
    }

    /// Send both stdout and stderr to the console instead of capturing them.
    pub fn stream(&self) -> Self {
        self.customize(|desc| {
            desc.stream_stdout = Some(true);
            desc.stream_stderr = Some(true);
        })
    }

    pub fn stream_stdout(&self, stream: bool) -> Self {
        self.customize(|desc| desc.stream_stdout = Some(stream))
    }

    pub fn stream_stderr(&self, stream: bool) -> Self {
        self.customize(|desc| desc.stream_stderr = Some(stream))
    }

    /// Fail evaluation with [`Error::Command`] on a non-zero exit.
    pub fn raising(&self) -> Self {
        self.customize(|desc| desc.raise_on_error = Some(true))
    }

    /// Never fail on a non-zero exit, even when always-raise is on.
    pub fn quiet(&self) -> Self {
        self.customize(|desc| desc.raise_on_error = Some(false))
    }

    /// Write stdout to `path` once the command finishes, replacing the file (`>`).
    pub fn redirect_to(&self, path: impl Into<PathBuf>) -> Self {
        let target = OutputFile {
            path: path.into(),
            append: false,
        };
        self.customize(|desc| desc.redirect = Some(target))
    }

    /// Append stdout to `path` once the command finishes (`>>`).
    pub fn append_to(&self, path: impl Into<PathBuf>) -> Self {
        let target = OutputFile {
            path: path.into(),
            append: true,
        };
        self.customize(|desc| desc.redirect = Some(target))
    }

    /// Read stdin from `path` (`<`). The file is opened when the command starts.
    pub fn read_from(&self, path: impl Into<PathBuf>) -> Self {
        self.with_input(Input::File(path.into()))
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.desc
    }

    /// Connect `self`'s stdout to `right`'s stdin.
    ///
    /// An unevaluated `self` runs concurrently with `right` when the result is
    /// evaluated. A `self` that was already started feeds its captured stdout
    /// instead. Any input `right` had is replaced; the result behaves like
    /// `right` in every other respect.
    pub fn pipe(self, right: Command) -> Command {
        let input = match self.job.status() {
            Status::Unevaluated => Input::Upstream(Box::new(self)),
            Status::Running | Status::Evaluated => Input::Feed(Feed::Settled(self.job.clone())),
        };
        right.with_input(input)
    }

    /// Run the command to completion, unless that already happened.
    ///
    /// Only the call that actually completes evaluation fails on a non-zero exit
    /// in raise mode; later calls return the cached outcome.
    pub fn evaluate(&self) -> Result<Arc<Outcome>> {
        self.job.start(&self.desc, self.input.as_ref(), Launch::FOREGROUND)?;
        self.job.wait()
    }

    /// Block until a background command exits and remove it from the job registry.
    ///
    /// On a command that was never started this evaluates it.
    pub fn wait(&self) -> Result<Arc<Outcome>> {
        self.evaluate()
    }

    /// Start a copy of this command without waiting for it.
    ///
    /// The copy is listed by [`jobs`](crate::jobs) until it is waited for.
    /// Without an input the process gets a pipe as stdin, closed on `wait`.
    pub fn delay(&self) -> Result<Command> {
        let background = self.clone();
        background
            .job
            .start(&background.desc, background.input.as_ref(), Launch::BACKGROUND)?;
        jobs::register(background.job.clone());
        Ok(background)
    }

    pub fn status(&self) -> Status {
        self.job.status()
    }

    /// Identifier reported for this instance by [`jobs`](crate::jobs).
    pub fn job_id(&self) -> u64 {
        self.job.id()
    }

    /// Pid of the rightmost process while it runs.
    pub fn pid(&self) -> Result<Option<u32>> {
        self.job.pid()
    }

    pub fn returncode(&self) -> Result<ExitCode> {
        Ok(self.evaluate()?.returncode)
    }

    /// Evaluate and report whether the exit status was 0.
    pub fn success(&self) -> Result<bool> {
        Ok(self.evaluate()?.success())
    }

    /// Evaluate and decode the captured stdout.
    ///
    /// `None` when stdout went to the console or to a file.
    pub fn stdout(&self) -> Result<Option<String>> {
        let outcome = self.evaluate()?;
        self.decode(outcome.stdout.as_deref())
    }

    pub fn stderr(&self) -> Result<Option<String>> {
        let outcome = self.evaluate()?;
        self.decode(outcome.stderr.as_deref())
    }

    pub fn stdout_bytes(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.evaluate()?.stdout.clone())
    }

    pub fn stderr_bytes(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.evaluate()?.stderr.clone())
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<String>> {
        bytes.map(|b| self.desc.encoding.decode(b)).transpose()
    }

    /// Evaluate and iterate over the lines of stdout.
    ///
    /// Lines keep their `\n`; a trailing partial line is the last item.
    pub fn lines(&self) -> Result<Lines> {
        Ok(Lines {
            text: self.stdout()?.unwrap_or_default(),
            pos: 0,
        })
    }

    /// Evaluate and split the whole of stdout on whitespace.
    pub fn words(&self) -> Result<Vec<String>> {
        Ok(self
            .stdout()?
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_owned)
            .collect())
    }

    /// Evaluate and parse stdout as a whitespace-aligned table with a header row.
    pub fn as_table(&self) -> Result<Vec<Row>> {
        Ok(table::parse(&self.stdout()?.unwrap_or_default()))
    }

    /// Fail with [`Error::Command`] if the command exited non-zero.
    ///
    /// Only valid once the command has been evaluated.
    pub fn raise_for_returncode(&self) -> Result<()> {
        let Some(outcome) = self.job.outcome() else {
            return Err(Error::InvalidState(format!(
                "`{}` has not been evaluated",
                self.desc
            )));
        };
        if outcome.success() {
            Ok(())
        } else {
            Err(outcome.to_error(&self.desc.program, self.desc.encoding))
        }
    }

    #[cfg(unix)]
    pub fn terminate(&self) -> Result<()> {
        self.send_signal(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(unix)]
    pub fn kill(&self) -> Result<()> {
        self.send_signal(nix::sys::signal::Signal::SIGKILL)
    }

    /// Signal the rightmost process. Does nothing once it has exited.
    #[cfg(unix)]
    pub fn send_signal(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        use nix::errno::Errno;
        use nix::unistd::Pid;

        let Some(pid) = self.job.pid()? else {
            return Ok(());
        };
        tracing::debug!(command = %self.desc, pid, ?signal, "sending signal");
        let pid = i32::try_from(pid)
            .map_err(|_| Error::InvalidState(format!("pid {pid} out of range")))?;
        match nix::sys::signal::kill(Pid::from_raw(pid), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl fmt::Display for Command {
    /// Evaluates the command and writes its captured stdout.
    ///
    /// If evaluation or decoding fails, nothing is written and the failure is
    /// only logged. Use [`Command::stdout`] when the error matters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stdout() {
            Ok(stdout) => f.write_str(stdout.as_deref().unwrap_or_default()),
            Err(err) => {
                tracing::warn!(command = %self.desc, error = %err, "no output to display");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Command {
    /// In interactive mode, evaluates and shows stdout then stderr, the way a
    /// REPL echoes a command. Otherwise shows the arguments and, once known,
    /// the return code.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if modes().interactive {
            return match self.evaluate() {
                Ok(_) => {
                    let stdout = self.stdout().ok().flatten().unwrap_or_default();
                    let stderr = self.stderr().ok().flatten().unwrap_or_default();
                    write!(f, "{stdout}{stderr}")
                }
                Err(err) => write!(f, "{err}"),
            };
        }
        let mut argv = vec![self.desc.program.clone()];
        argv.extend(self.desc.argv());
        write!(f, "Command({argv:?}")?;
        if let Some(outcome) = self.job.outcome() {
            write!(f, ", returncode={}", outcome.returncode)?;
        }
        f.write_str(")")
    }
}

/// Lines of a command's captured stdout, see [`Command::lines`].
#[derive(Debug, Clone)]
pub struct Lines {
    text: String,
    pos: usize,
}

impl Iterator for Lines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let rest = &self.text[self.pos..];
        if rest.is_empty() {
            return None;
        }
        let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
        self.pos += end;
        Some(rest[..end].to_owned())
    }
}

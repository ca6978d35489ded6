//! Turns descriptors into running processes and running processes into outcomes.
//!
//! Every stage of a pipeline is its own OS process. Data produced in-process is
//! written by a feeder thread, and captured output is read by reader threads,
//! so the caller never blocks on a pipe the child is waiting to have drained.

use crate::command::{Command, ExitCode};
use crate::descriptor::{Descriptor, Plan};
use crate::error::{Error, Result};
use crate::io_adapters::{self, Chunk};
use crate::jobs;
use crate::modes::modes;
use crate::redirect::FileMode;
use crate::encoding::Encoding;
use parking_lot::{Condvar, Mutex};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Iterator shared by every copy of a command fed from it.
///
/// Items are pulled one at a time under the lock; two consumers draining the
/// same iterator interleave in no particular order.
pub(crate) type SharedChunks = Arc<Mutex<Box<dyn Iterator<Item = io::Result<Chunk>> + Send>>>;

/// Data written to a stage's stdin by a feeder thread.
#[derive(Clone)]
pub(crate) enum Feed {
    /// Encoded with the receiving command's encoding when written.
    Text(Arc<str>),
    Bytes(Arc<[u8]>),
    Chunks(SharedChunks),
    /// Captured stdout of a command that was already started or evaluated.
    Settled(Arc<Job>),
}

/// What a stage reads from.
#[derive(Clone)]
pub(crate) enum Input {
    Feed(Feed),
    File(PathBuf),
    /// A command not yet started: it runs concurrently, its stdout becoming our stdin.
    Upstream(Box<Command>),
}

/// Final state of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub returncode: ExitCode,
    /// `None` when stdout was streamed, redirected or handed to the caller.
    pub stdout: Option<Vec<u8>>,
    /// `None` when stderr was streamed or handed to the caller.
    pub stderr: Option<Vec<u8>>,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }

    /// Error describing this outcome, with output decoded as `encoding`.
    ///
    /// Output that is not valid in `encoding` falls back to lossy UTF-8.
    pub(crate) fn to_error(&self, program: &str, encoding: Encoding) -> Error {
        let decode = |bytes: &Option<Vec<u8>>| {
            let bytes = bytes.as_deref().unwrap_or_default();
            encoding
                .decode(bytes)
                .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
        };
        Error::Command {
            program: program.to_owned(),
            returncode: self.returncode,
            stdout: decode(&self.stdout),
            stderr: decode(&self.stderr),
        }
    }
}

/// Lifecycle of a command instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unevaluated,
    Running,
    Evaluated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StdinWiring {
    /// Share the caller's stdin.
    Inherit,
    /// Read from nothing.
    Null,
    /// Pipe kept open by the engine and closed when the command is waited for.
    Hold,
    /// Pipe handed to the caller.
    Hand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputWiring {
    /// Captured into memory, or sent to the console when streaming.
    Capture,
    /// Pipe handed to the caller.
    Hand,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Launch {
    pub(crate) stdin: StdinWiring,
    pub(crate) stdout: OutputWiring,
    pub(crate) stderr: OutputWiring,
}

impl Launch {
    pub(crate) const FOREGROUND: Launch = Launch {
        stdin: StdinWiring::Inherit,
        stdout: OutputWiring::Capture,
        stderr: OutputWiring::Capture,
    };

    pub(crate) const BACKGROUND: Launch = Launch {
        stdin: StdinWiring::Hold,
        stdout: OutputWiring::Capture,
        stderr: OutputWiring::Capture,
    };

    pub(crate) const SESSION: Launch = Launch {
        stdin: StdinWiring::Hand,
        stdout: OutputWiring::Hand,
        stderr: OutputWiring::Hand,
    };
}

/// Raw pipes handed to the caller by [`Job::start`].
#[derive(Default)]
pub(crate) struct Handles {
    pub(crate) stdin: Option<ChildStdin>,
    pub(crate) stdout: Option<ChildStdout>,
    pub(crate) stderr: Option<ChildStderr>,
}

enum Channel<R> {
    Console,
    Captured(JoinHandle<io::Result<Vec<u8>>>),
    Raw(Option<R>),
}

impl<R: io::Read + Send + 'static> Channel<R> {
    fn new(pipe: Option<R>, wiring: OutputWiring, streamed: bool) -> Self {
        match (wiring, pipe) {
            (OutputWiring::Hand, pipe) => Channel::Raw(pipe),
            (OutputWiring::Capture, Some(pipe)) => Channel::Captured(io_adapters::capture(pipe)),
            (OutputWiring::Capture, None) if streamed => Channel::Console,
            (OutputWiring::Capture, None) => Channel::Raw(None),
        }
    }

    /// Start draining a pipe the caller never took, so the child cannot stall on it.
    fn drain_leftover(self) -> Self {
        match self {
            Channel::Raw(Some(mut pipe)) => {
                thread::spawn(move || io::copy(&mut pipe, &mut io::sink()));
                Channel::Raw(None)
            }
            other => other,
        }
    }

    fn collect(self) -> io::Result<Option<Vec<u8>>> {
        match self {
            Channel::Captured(handle) => io_adapters::join_capture(handle).map(Some),
            Channel::Console | Channel::Raw(_) => Ok(None),
        }
    }
}

fn stdio_for(wiring: OutputWiring, streamed: bool) -> Stdio {
    match wiring {
        OutputWiring::Capture if streamed => Stdio::inherit(),
        _ => Stdio::piped(),
    }
}

/// An upstream stage whose stdout is wired into the next stage.
struct Stage {
    program: String,
    child: Child,
    stderr: Channel<ChildStderr>,
    feeder: Option<JoinHandle<io::Result<()>>>,
}

impl Stage {
    fn finish(mut self) -> Result<()> {
        let status = self.child.wait();
        if let Ok(status) = &status {
            debug!(program = %self.program, returncode = exit_code(*status), "upstream stage exited");
        }
        let stderr = self.stderr.collect();
        let fed = join_feeder(self.feeder);
        status?;
        stderr?;
        fed
    }

    fn abort(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// The processes of one command, from the leftmost upstream stage to this one.
pub(crate) struct Pipeline {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Channel<ChildStdout>,
    stderr: Channel<ChildStderr>,
    feeder: Option<JoinHandle<io::Result<()>>>,
    upstream: Vec<Stage>,
}

impl Pipeline {
    fn hand_out(&mut self, launch: Launch) -> Handles {
        let mut handles = Handles::default();
        if launch.stdin == StdinWiring::Hand {
            handles.stdin = self.stdin.take();
        }
        if let Channel::Raw(pipe) = &mut self.stdout {
            handles.stdout = pipe.take();
        }
        if let Channel::Raw(pipe) = &mut self.stderr {
            handles.stderr = pipe.take();
        }
        handles
    }

    /// Wait for every stage, then report the first failure, if any.
    fn finish(mut self) -> Result<Outcome> {
        drop(self.stdin.take());
        let stdout = self.stdout.drain_leftover();
        let stderr = self.stderr.drain_leftover();
        let status = self.child.wait();
        let stdout = stdout.collect();
        let stderr = stderr.collect();
        let fed = join_feeder(self.feeder);
        let stages: Vec<Result<()>> = self.upstream.into_iter().map(Stage::finish).collect();

        let outcome = Outcome {
            returncode: exit_code(status?),
            stdout: stdout?,
            stderr: stderr?,
        };
        fed?;
        stages.into_iter().collect::<Result<()>>()?;
        Ok(outcome)
    }
}

/// Start `desc` and, recursively, every upstream stage of `input`.
fn spawn(desc: &Descriptor, input: Option<&Input>, plan: &Plan, launch: Launch) -> Result<Pipeline> {
    let mut upstream = Vec::new();
    let mut head_stdin = None;
    let mut feed = None;

    let stdin = match input {
        None => match launch.stdin {
            StdinWiring::Inherit => Stdio::inherit(),
            StdinWiring::Null => Stdio::null(),
            StdinWiring::Hold | StdinWiring::Hand => Stdio::piped(),
        },
        Some(Input::Feed(source)) => {
            feed = Some(source.clone());
            Stdio::piped()
        }
        Some(Input::File(path)) => {
            let data = FileMode::input(plan.text, plan.encoding).read(path)?;
            feed = Some(Feed::Bytes(data.into()));
            Stdio::piped()
        }
        Some(Input::Upstream(left)) => {
            let left_plan = left.desc.resolve(modes());
            let left_launch = Launch {
                stdin: launch.stdin,
                stdout: OutputWiring::Hand,
                stderr: OutputWiring::Capture,
            };
            let mut left_run = spawn(&left.desc, left.input.as_ref(), &left_plan, left_launch)?;
            head_stdin = left_run.stdin.take();
            let left_stdout = left_run.hand_out(left_launch).stdout;
            upstream.append(&mut left_run.upstream);
            upstream.push(Stage {
                program: left.desc.program.clone(),
                child: left_run.child,
                stderr: left_run.stderr,
                feeder: left_run.feeder,
            });
            match left_stdout {
                Some(pipe) => Stdio::from(pipe),
                None => Stdio::null(),
            }
        }
    };

    let mut command = desc.to_std();
    command
        .stdin(stdin)
        .stdout(stdio_for(launch.stdout, plan.stream_stdout))
        .stderr(stdio_for(launch.stderr, plan.stream_stderr));
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            upstream.into_iter().for_each(Stage::abort);
            return Err(Error::Launch {
                program: desc.program.clone(),
                source,
            });
        }
    };
    drop(command);
    debug!(command = %desc, pid = child.id(), stages = upstream.len() + 1, "spawned");

    let mut feeder = None;
    match feed {
        Some(source) => {
            if let Some(pipe) = child.stdin.take() {
                feeder = Some(spawn_feeder(pipe, source, plan.encoding));
            }
        }
        None if input.is_none() => head_stdin = child.stdin.take(),
        None => {}
    }

    Ok(Pipeline {
        stdout: Channel::new(child.stdout.take(), launch.stdout, plan.stream_stdout),
        stderr: Channel::new(child.stderr.take(), launch.stderr, plan.stream_stderr),
        child,
        stdin: head_stdin,
        feeder,
        upstream,
    })
}

fn spawn_feeder(mut pipe: ChildStdin, source: Feed, encoding: Encoding) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        let result = feed(&mut pipe, source, encoding);
        drop(pipe);
        match result {
            // The child stopped reading; what it did not want is not an error.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    })
}

fn feed(pipe: &mut ChildStdin, source: Feed, encoding: Encoding) -> io::Result<()> {
    match source {
        Feed::Text(text) => pipe.write_all(&encoding.encode(&text)?),
        Feed::Bytes(bytes) => pipe.write_all(&bytes),
        Feed::Chunks(chunks) => loop {
            let next = chunks.lock().next();
            let Some(chunk) = next else {
                return Ok(());
            };
            pipe.write_all(&chunk?.into_bytes(encoding)?)?;
            pipe.flush()?;
        },
        Feed::Settled(job) => {
            let outcome = job.wait()?;
            pipe.write_all(outcome.stdout.as_deref().unwrap_or_default())
        }
    }
}

fn join_feeder(feeder: Option<JoinHandle<io::Result<()>>>) -> Result<()> {
    if let Some(handle) = feeder {
        handle
            .join()
            .map_err(|_| io::Error::other("input feeder thread panicked"))??;
    }
    Ok(())
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(x) => x,
        None => terminated_by_signal(status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> ExitCode {
    -1
}

struct Running {
    plan: Plan,
    pid: u32,
    pipeline: Pipeline,
}

enum State {
    Unevaluated,
    Running(Box<Running>),
    /// Someone is blocked collecting the outcome; others wait on the condvar.
    Finishing { pid: u32 },
    Evaluated(Arc<Outcome>),
    Failed(String),
}

/// Evaluation state of one command instance.
///
/// The process behind a job is started at most once; every later request for
/// its result gets the cached [`Outcome`].
pub(crate) struct Job {
    id: u64,
    label: String,
    program: String,
    state: Mutex<State>,
    finished: Condvar,
}

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

impl Job {
    pub(crate) fn new(desc: &Descriptor) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            label: desc.to_string(),
            program: desc.program.clone(),
            state: Mutex::new(State::Unevaluated),
            finished: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn status(&self) -> Status {
        match &*self.state.lock() {
            State::Unevaluated => Status::Unevaluated,
            State::Running(_) | State::Finishing { .. } => Status::Running,
            State::Evaluated(_) | State::Failed(_) => Status::Evaluated,
        }
    }

    pub(crate) fn outcome(&self) -> Option<Arc<Outcome>> {
        match &*self.state.lock() {
            State::Evaluated(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Pid of the rightmost process, `None` once it has exited.
    pub(crate) fn pid(&self) -> Result<Option<u32>> {
        match &*self.state.lock() {
            State::Unevaluated => Err(Error::InvalidState(format!(
                "`{}` has not been started",
                self.label
            ))),
            State::Running(running) => Ok(Some(running.pid)),
            State::Finishing { pid } => Ok(Some(*pid)),
            State::Evaluated(_) | State::Failed(_) => Ok(None),
        }
    }

    /// Start the process unless this job was already started.
    ///
    /// Returns `None` when it was; the requested pipes are then unavailable.
    pub(crate) fn start(
        &self,
        desc: &Descriptor,
        input: Option<&Input>,
        launch: Launch,
    ) -> Result<Option<Handles>> {
        let mut state = self.state.lock();
        if !matches!(*state, State::Unevaluated) {
            return Ok(None);
        }
        let plan = desc.resolve(modes());
        let mut pipeline = spawn(desc, input, &plan, launch)?;
        let handles = pipeline.hand_out(launch);
        let pid = pipeline.child.id();
        *state = State::Running(Box::new(Running {
            plan,
            pid,
            pipeline,
        }));
        Ok(Some(handles))
    }

    /// Block until the process exits and return its outcome.
    ///
    /// The caller that actually collects the outcome also applies output
    /// redirection and raise mode; later callers get the cached outcome.
    pub(crate) fn wait(&self) -> Result<Arc<Outcome>> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                State::Evaluated(outcome) => return Ok(outcome.clone()),
                State::Failed(reason) => {
                    return Err(Error::InvalidState(format!(
                        "evaluation of `{}` failed earlier: {reason}",
                        self.label
                    )));
                }
                State::Unevaluated => {
                    return Err(Error::InvalidState(format!(
                        "`{}` has not been started",
                        self.label
                    )));
                }
                State::Finishing { .. } => self.finished.wait(&mut state),
                State::Running(running) => {
                    let pid = running.pid;
                    let State::Running(running) =
                        std::mem::replace(&mut *state, State::Finishing { pid })
                    else {
                        continue;
                    };
                    drop(state);
                    return self.complete(*running);
                }
            }
        }
    }

    fn complete(&self, running: Running) -> Result<Arc<Outcome>> {
        let Running { plan, pipeline, .. } = running;
        let finished = pipeline.finish().map(|mut outcome| {
            let written = match &plan.redirect {
                Some(target) => {
                    let data = outcome.stdout.take().unwrap_or_default();
                    FileMode::output(plan.text, plan.encoding, target.append).write(&target.path, &data)
                }
                None => Ok(()),
            };
            (outcome, written)
        });

        let mut state = self.state.lock();
        let (outcome, written) = match finished {
            Ok((outcome, written)) => (Arc::new(outcome), written),
            Err(err) => {
                *state = State::Failed(err.to_string());
                self.finished.notify_all();
                drop(state);
                jobs::forget(self.id);
                return Err(err);
            }
        };
        *state = State::Evaluated(outcome.clone());
        self.finished.notify_all();
        drop(state);
        jobs::forget(self.id);
        debug!(command = %self.label, returncode = outcome.returncode, "evaluated");

        written?;
        if plan.raise && !outcome.success() {
            warn!(command = %self.label, returncode = outcome.returncode, "command failed");
            return Err(outcome.to_error(&self.program, plan.encoding));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn exit_codes_follow_shell_convention() {
        let outcome = Command::new("sh").args(["-c", "exit 3"]).evaluate().unwrap();
        assert_eq!(outcome.returncode, 3);

        let outcome = Command::new("sh").args(["-c", "kill -TERM $$"]).evaluate().unwrap();
        assert_eq!(outcome.returncode, 128 + 15);
    }

    #[test]
    fn feeder_ignores_a_reader_that_stops_early() {
        let endless = (0..).map(|i| format!("line {i}\n"));
        let cmd = crate::pipe::Producer::lines(endless).pipe(Command::new("head").args(["-n", "2"]));
        assert_eq!(cmd.stdout().unwrap().as_deref(), Some("line 0\nline 1\n"));
    }

    #[test]
    fn failed_launch_leaves_the_job_unstarted() {
        let cmd = Command::new("pipe-commands-no-such-program");
        let err = cmd.evaluate().unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
        assert_eq!(cmd.status(), Status::Unevaluated);
    }

    #[cfg(unix)]
    #[test]
    fn failing_feed_still_reaps_every_stage() {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("middle.pid");
        let first = crate::pipe::Producer::lines(["κ\n"])
            .pipe(Command::new("cat").encoding(Encoding::Latin1));
        let middle = Command::new("sh")
            .subcommand("-c")
            .subcommand(format!("echo $$ > '{}'; cat", pidfile.display()));
        let cmd = first.pipe(middle).pipe(Command::new("cat"));

        let err = cmd.evaluate().unwrap_err();
        assert!(matches!(&err, Error::Io(inner) if inner.kind() == io::ErrorKind::InvalidData));
        let pid: i32 = std::fs::read_to_string(&pidfile).unwrap().trim().parse().unwrap();
        assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
    }

    #[test]
    fn error_output_uses_the_declared_encoding() {
        let outcome = Outcome {
            returncode: 1,
            stdout: None,
            stderr: Some(b"caf\xe9".to_vec()),
        };
        match outcome.to_error("tool", Encoding::Latin1) {
            Error::Command { stderr, stdout, .. } => {
                assert_eq!(stderr, "café");
                assert_eq!(stdout, "");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match outcome.to_error("tool", Encoding::Utf8) {
            Error::Command { stderr, .. } => assert_eq!(stderr, "caf\u{fffd}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn raising_latin1_command_reports_decoded_stderr() {
        let cmd = Command::new("sh")
            .subcommand("-c")
            .subcommand("printf 'caf\\351' >&2; exit 1")
            .encoding(Encoding::Latin1)
            .raising();
        match cmd.evaluate() {
            Err(Error::Command { returncode, stderr, .. }) => {
                assert_eq!(returncode, 1);
                assert_eq!(stderr, "café");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn upstream_launch_failure_reaps_started_stages() {
        let cmd = Command::new("sleep")
            .arg("5")
            .pipe(Command::new("pipe-commands-no-such-program"));
        let started = std::time::Instant::now();
        assert!(matches!(cmd.evaluate(), Err(Error::Launch { .. })));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}

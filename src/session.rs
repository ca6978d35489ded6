//! Scoped, hands-on interaction with a running command or pipeline.

use crate::command::Command;
use crate::engine::{Input, Job, Launch, Outcome};
use crate::error::{Error, Result};
use crate::io_adapters::{InputWriter, LineReader};
use std::io;
use std::process::{ChildStderr, ChildStdout};
use std::sync::Arc;
use std::thread;

/// Raw pipes of a running command: the leftmost stage's stdin and the
/// rightmost stage's stdout and stderr.
///
/// The caller frames messages, flushes writes and stops reading at end of
/// stream. When the session ends, by [`Session::finish`] or by being dropped,
/// stdin is closed if it is still open, unread output is discarded and the
/// whole pipeline is waited for.
pub struct Session {
    job: Arc<Job>,
    stdin: InputWriter,
    stdout: LineReader<ChildStdout>,
    stderr: LineReader<ChildStderr>,
    finished: bool,
}

impl Session {
    pub fn stdin(&mut self) -> &mut InputWriter {
        &mut self.stdin
    }

    pub fn stdout(&mut self) -> &mut LineReader<ChildStdout> {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut LineReader<ChildStderr> {
        &mut self.stderr
    }

    /// End the session and wait for every stage to exit.
    pub fn finish(mut self) -> Result<Arc<Outcome>> {
        self.close_and_wait()
    }

    fn close_and_wait(&mut self) -> Result<Arc<Outcome>> {
        if self.finished {
            return self.job.wait();
        }
        self.finished = true;
        self.stdin.close();

        let (stdout, stderr) = (&mut self.stdout, &mut self.stderr);
        let (out, err) = thread::scope(|scope| {
            let out = scope.spawn(|| stdout.read_rest());
            let err = stderr.read_rest();
            let out = out
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("output reader thread panicked")));
            (out, err)
        });
        out?;
        err?;
        self.job.wait()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.close_and_wait() {
            tracing::warn!(error = %err, "session ended with an error");
        }
    }
}

impl Command {
    fn head_input(&self) -> Option<&Input> {
        match &self.input {
            Some(Input::Upstream(left)) => left.head_input(),
            other => other.as_ref(),
        }
    }

    /// Start the command with all three pipes handed to the caller.
    ///
    /// Fails with a usage error when the leftmost stage already reads from
    /// something else.
    pub fn session(&self) -> Result<Session> {
        if self.head_input().is_some() {
            return Err(Error::Usage(format!(
                "`{}` already has an input and cannot be driven interactively",
                self.desc
            )));
        }
        let handles = self
            .job
            .start(&self.desc, self.input.as_ref(), Launch::SESSION)?
            .ok_or_else(|| Error::InvalidState(format!("`{}` was already started", self.desc)))?;
        let encoding = self.desc.encoding;
        let (Some(stdin), Some(stdout), Some(stderr)) = (handles.stdin, handles.stdout, handles.stderr)
        else {
            return Err(Error::InvalidState(format!(
                "`{}` did not provide the session pipes",
                self.desc
            )));
        };
        tracing::debug!(command = %self.desc, "session opened");
        Ok(Session {
            job: self.job.clone(),
            stdin: InputWriter::new(stdin, encoding),
            stdout: LineReader::new(stdout, encoding),
            stderr: LineReader::new(stderr, encoding),
            finished: false,
        })
    }

    /// Run `body` against a [`Session`], then end it.
    ///
    /// The pipeline has fully exited before this returns, including when
    /// `body` fails; the body's error takes precedence over the command's.
    pub fn interact<T>(&self, body: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut session = self.session()?;
        let result = body(&mut session);
        let finished = session.finish();
        let value = result?;
        finished?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Status;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_scope_still_ends_the_process() {
        let cat = Command::new("cat");
        cat.interact(|_| Ok(())).unwrap();
        assert_eq!(cat.status(), Status::Evaluated);
        assert_eq!(cat.returncode().unwrap(), 0);
    }

    #[test]
    fn drives_a_pipeline() {
        let pipeline = Command::new("cat")
            .pipe(Command::new("grep").arg("foo"))
            .pipe(Command::new("cat"));
        let lines = pipeline
            .interact(|session| {
                for line in ["foo 1\n", "bar\n", "foo 2\n"] {
                    session.stdin().send(line)?;
                }
                session.stdin().close();
                Ok(session.stdout().collect::<io::Result<Vec<_>>>()?)
            })
            .unwrap();
        assert_eq!(lines, vec!["foo 1\n", "foo 2\n"]);
        assert!(pipeline.success().unwrap());
    }

    #[test]
    fn answers_a_quiz() {
        let quiz = r#"for q in "3 + 4" "6 * 7" "9 - 5"; do
                echo "$q"
                read answer
                if [ "$answer" -eq "$(( $q ))" ]; then echo correct; else echo wrong; fi
            done"#;
        let quizmaster = Command::new("sh").subcommand("-c").subcommand(quiz);
        let verdicts = quizmaster
            .interact(|session| {
                let mut verdicts = Vec::new();
                while let Some(question) = session.stdout().read_line()? {
                    let parts: Vec<&str> = question.split_whitespace().collect();
                    let (a, b): (i64, i64) = (parts[0].parse().unwrap(), parts[2].parse().unwrap());
                    let answer = match parts[1] {
                        "+" => a + b,
                        "*" => a * b,
                        _ => a - b,
                    };
                    session.stdin().send(&format!("{answer}\n"))?;
                    verdicts.extend(session.stdout().read_line()?);
                }
                Ok(verdicts)
            })
            .unwrap();
        assert_eq!(verdicts, vec!["correct\n"; 3]);
    }

    #[test]
    fn body_error_waits_for_the_process() {
        let cat = Command::new("cat");
        let err = cat
            .interact(|_| -> Result<()> { Err(Error::Usage("stop".into())) })
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert_eq!(cat.status(), Status::Evaluated);
    }

    #[test]
    fn fed_commands_cannot_be_driven() {
        let fed = "x" | Command::new("cat");
        assert!(matches!(fed.session(), Err(Error::Usage(_))));
        let piped = ("x" | Command::new("cat")).pipe(Command::new("cat"));
        assert!(matches!(piped.session(), Err(Error::Usage(_))));
    }
}

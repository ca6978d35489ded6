use anyhow::{Context, Result};
use argh::FromArgs;
use pipe_commands::{Command, Param, Producer};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::process::ExitCode;
use std::thread;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs)]
/// Shell-style pipelines driven from Rust.
struct Cli {
    #[argh(subcommand)]
    command: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Demo(Demo),
    Talk(Talk),
}

#[derive(FromArgs)]
/// Print a short tour of piping, feeding and result handling.
#[argh(subcommand, name = "demo")]
struct Demo {}

#[derive(FromArgs)]
/// Start a program and talk to it line by line.
/// Ctrl-D closes its input and prints its exit code.
#[argh(subcommand, name = "talk")]
struct Talk {
    #[argh(positional)]
    /// program to start, looked up on PATH.
    program: String,

    #[argh(positional, greedy)]
    /// arguments passed to the program.
    args: Vec<String>,
}

fn main() -> ExitCode {
    // Respects RUST_LOG; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli: Cli = argh::from_env();
    let result = match cli.command {
        Subcommand::Demo(_) => demo(),
        Subcommand::Talk(talk) => talk_to(talk),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn demo() -> Result<ExitCode> {
    println!("$ printf 'one\\ntwo\\nthree\\n' | grep t");
    let cmd = Command::new("printf").subcommand("one\\ntwo\\nthree\\n")
        | Command::new("grep").arg("t");
    print!("{}", cmd.stdout()?.unwrap_or_default());

    println!("\n$ \"a\\nb\\nc\\n\" | grep b");
    let cmd = "a\nb\nc\n" | Command::new("grep").arg("b");
    print!("{}", cmd.stdout()?.unwrap_or_default());

    println!("\n$ (1..=5 as lines) | grep -v 3");
    let numbers = Producer::lines((1..=5).map(|i| format!("{i}\n")));
    let cmd = numbers.pipe(Command::new("grep").args(["-v", "3"]));
    for line in cmd.lines()? {
        print!("{line}");
    }

    println!("\n$ sh -c 'echo done; exit 3' | (returncode, output)");
    let summary = Command::new("sh")
        .subcommand("-c")
        .subcommand("echo done; exit 3")
        .pipe_result(&[Param::Returncode, Param::Output], |args| {
            format!(
                "returncode={:?} output={:?}",
                args.returncode.unwrap_or_default(),
                args.output.unwrap_or_default()
            )
        })?;
    println!("{summary}");

    println!("\n$ printf 'NAME SIZE\\nalpha 1\\nbeta 22\\n' as a table");
    let table = Command::new("printf")
        .subcommand("NAME SIZE\\nalpha 1\\nbeta 22\\n")
        .as_table()?;
    for row in table {
        println!("{row:?}");
    }
    Ok(ExitCode::SUCCESS)
}

fn talk_to(talk: Talk) -> Result<ExitCode> {
    let cmd = Command::new(&talk.program).args(&talk.args);
    let (stdin, stdout, stderr) = cmd
        .pipe_streams(&[Param::Stdin, Param::Stdout, Param::Stderr], |args| {
            (args.stdin, args.stdout, args.stderr)
        })
        .with_context(|| format!("failed to start {}", talk.program))?;
    let mut stdin = stdin.context("no stdin pipe")?;

    let echo_out = stdout.map(|lines| {
        thread::spawn(move || {
            for line in lines.flatten() {
                print!("{line}");
                let _ = std::io::stdout().flush();
            }
        })
    });
    let echo_err = stderr.map(|lines| {
        thread::spawn(move || {
            for line in lines.flatten() {
                eprint!("{line}");
            }
        })
    });

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                if let Err(err) = stdin.send(&format!("{line}\n")) {
                    println!("{} stopped reading: {err}", talk.program);
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
    stdin.close();

    for handle in echo_out.into_iter().chain(echo_err) {
        let _ = handle.join();
    }
    let outcome = cmd.wait()?;
    println!("[exit {}]", outcome.returncode);
    Ok(if outcome.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

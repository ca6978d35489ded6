//! Pure data describing how to invoke one external program.

use crate::encoding::Encoding;
use crate::env::Environment;
use crate::modes::Modes;
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// Value of a keyword-style flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    /// Rendered as `--name`.
    On,
    /// Rendered as `--no-name`.
    Off,
    /// Rendered as `--name=value`.
    Value(String),
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        if value { FlagValue::On } else { FlagValue::Off }
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Value(value.to_owned())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Value(value)
    }
}

macro_rules! flag_value_from_display {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FlagValue {
            fn from(value: $ty) -> Self {
                FlagValue::Value(value.to_string())
            }
        })*
    };
}

flag_value_from_display!(i32, i64, u32, u64, usize, f64, char);

/// One argument slot, kept in the order it was added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Arg {
    Positional(String),
    /// Flag name with underscores already turned into hyphens.
    Flag(String, FlagValue),
}

impl Arg {
    pub(crate) fn flag(name: &str, value: FlagValue) -> Self {
        Arg::Flag(name.replace('_', "-"), value)
    }

    fn render(&self) -> String {
        match self {
            Arg::Positional(arg) => arg.clone(),
            Arg::Flag(name, FlagValue::On) => format!("--{name}"),
            Arg::Flag(name, FlagValue::Off) => format!("--no-{name}"),
            Arg::Flag(name, FlagValue::Value(value)) => format!("--{name}={value}"),
        }
    }
}

/// Where captured stdout goes once the command finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutputFile {
    pub(crate) path: PathBuf,
    pub(crate) append: bool,
}

/// Immutable description of a command.
///
/// Every customization on [`Command`](crate::Command) clones this and appends to
/// it; a descriptor is never changed in place once a command holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub(crate) program: String,
    pub(crate) args: Vec<Arg>,
    pub(crate) env: Environment,
    pub(crate) text: bool,
    pub(crate) encoding: Encoding,
    pub(crate) stream_stdout: Option<bool>,
    pub(crate) stream_stderr: Option<bool>,
    pub(crate) raise_on_error: Option<bool>,
    pub(crate) redirect: Option<OutputFile>,
}

impl Descriptor {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Environment::new(),
            text: true,
            encoding: Encoding::Utf8,
            stream_stdout: None,
            stream_stderr: None,
            raise_on_error: None,
            redirect: None,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments exactly as they will be passed to the program.
    pub fn argv(&self) -> Vec<String> {
        self.args.iter().map(Arg::render).collect()
    }

    /// Keyword-derived flags in the order they were added.
    pub fn flags(&self) -> impl Iterator<Item = (&str, &FlagValue)> {
        self.args.iter().filter_map(|arg| match arg {
            Arg::Flag(name, value) => Some((name.as_str(), value)),
            Arg::Positional(_) => None,
        })
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn is_text(&self) -> bool {
        self.text
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Resolve the flags left to the global defaults against `modes`.
    ///
    /// Redirected stdout is always captured, since it ends up in the file.
    pub(crate) fn resolve(&self, modes: Modes) -> Plan {
        Plan {
            stream_stdout: self.redirect.is_none()
                && self.stream_stdout.unwrap_or(modes.always_stream),
            stream_stderr: self.stream_stderr.unwrap_or(modes.always_stream),
            raise: self.raise_on_error.unwrap_or(modes.always_raise),
            text: self.text,
            encoding: self.encoding,
            redirect: self.redirect.clone(),
        }
    }

    pub(crate) fn to_std(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(self.argv());
        self.env.apply(&mut cmd);
        cmd
    }
}

impl fmt::Display for Descriptor {
    /// Shell-quoted command line, for logs and error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_escape::escape(Cow::Borrowed(self.program.as_str())))?;
        for arg in self.argv() {
            write!(f, " {}", shell_escape::escape(Cow::Owned(arg)))?;
        }
        Ok(())
    }
}

/// A descriptor's settings with global defaults filled in, fixed when the
/// process starts.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub(crate) stream_stdout: bool,
    pub(crate) stream_stderr: bool,
    pub(crate) raise: bool,
    pub(crate) text: bool,
    pub(crate) encoding: Encoding,
    pub(crate) redirect: Option<OutputFile>,
}

/// Expand `pattern` like a shell would, keeping it literally when nothing matches.
///
/// Matches are sorted. Dotfiles only match patterns that spell the dot out, and
/// a pattern that does not parse is passed through untouched.
pub(crate) fn expand_glob(pattern: &str) -> Vec<String> {
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let Ok(paths) = glob::glob_with(pattern, options) else {
        return vec![pattern.to_owned()];
    };
    let mut matches: Vec<String> = paths
        .filter_map(|entry| entry.ok())
        .map(|path| path.to_string_lossy().into_owned())
        .collect();
    if matches.is_empty() {
        return vec![pattern.to_owned()];
    }
    matches.sort();
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;

    #[test]
    fn flags_render_in_long_form() {
        let mut desc = Descriptor::new("tool");
        desc.args = vec![
            Arg::flag("key", "value".into()),
            Arg::flag("key", 2_i32.into()),
            Arg::flag("key_key", "value".into()),
            Arg::flag("verbose", true.into()),
            Arg::flag("color", false.into()),
        ];
        assert_eq!(
            desc.argv(),
            vec!["--key=value", "--key=2", "--key-key=value", "--verbose", "--no-color"]
        );
        assert_eq!(desc.flags().count(), 5);
    }

    #[test]
    fn glob_expands_sorted_matches() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["globtest2", "globtest1", "other"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let pattern = format!("{}/globtest*", dir.path().display());
        assert_eq!(
            expand_glob(&pattern),
            vec![
                format!("{}/globtest1", dir.path().display()),
                format!("{}/globtest2", dir.path().display()),
            ]
        );
    }

    #[test]
    fn glob_without_matches_is_literal() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/nothing-*", dir.path().display());
        assert_eq!(expand_glob(&pattern), vec![pattern.clone()]);
        assert_eq!(expand_glob("--key=[value"), vec!["--key=[value".to_string()]);
    }

    #[test]
    fn glob_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join(".hidden")).unwrap();
        File::create(dir.path().join("shown")).unwrap();
        let pattern = format!("{}/*", dir.path().display());
        assert_eq!(expand_glob(&pattern), vec![format!("{}/shown", dir.path().display())]);
    }

    #[test]
    fn late_bound_defaults() {
        let desc = Descriptor::new("ls");
        let quiet = Modes::default();
        let loud = Modes {
            always_stream: true,
            always_raise: true,
            interactive: false,
        };
        assert!(!desc.resolve(quiet).stream_stdout);
        assert!(desc.resolve(loud).stream_stdout);
        assert!(desc.resolve(loud).raise);

        let mut explicit = desc.clone();
        explicit.raise_on_error = Some(false);
        explicit.stream_stderr = Some(false);
        let plan = explicit.resolve(loud);
        assert!(!plan.raise);
        assert!(!plan.stream_stderr);
        assert!(plan.stream_stdout);

        explicit.redirect = Some(OutputFile {
            path: PathBuf::from("out.txt"),
            append: false,
        });
        assert!(!explicit.resolve(loud).stream_stdout);
    }

    #[test]
    fn display_quotes_arguments() {
        let mut desc = Descriptor::new("echo");
        desc.args = vec![Arg::Positional("hello world".into())];
        assert_eq!(desc.to_string(), "echo 'hello world'");
    }
}

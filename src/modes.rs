//! Process-wide defaults consulted when a command starts.
//!
//! The flags are read at evaluation time, not when a [`Command`](crate::Command)
//! is built: flipping one after building a command but before running it changes
//! how that command runs.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};

pub const ALWAYS_STREAM_VAR: &str = "PIPE_COMMANDS_ALWAYS_STREAM";
pub const ALWAYS_RAISE_VAR: &str = "PIPE_COMMANDS_ALWAYS_RAISE";
pub const INTERACTIVE_VAR: &str = "PIPE_COMMANDS_INTERACTIVE";

/// Snapshot of the mode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modes {
    /// Stream stdout and stderr to the console unless a command says otherwise.
    pub always_stream: bool,
    /// Fail on non-zero exit unless a command is marked quiet.
    pub always_raise: bool,
    /// Make `Debug` formatting evaluate commands and print their output.
    pub interactive: bool,
}

struct Flags {
    always_stream: AtomicBool,
    always_raise: AtomicBool,
    interactive: AtomicBool,
}

static FLAGS: Lazy<Flags> = Lazy::new(|| {
    let initial = Modes::from_env();
    tracing::debug!(?initial, "mode flags initialised");
    Flags {
        always_stream: AtomicBool::new(initial.always_stream),
        always_raise: AtomicBool::new(initial.always_raise),
        interactive: AtomicBool::new(initial.interactive),
    }
});

impl Modes {
    /// Read the initial flags from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|value| is_truthy(&value));
        Self {
            always_stream: flag(ALWAYS_STREAM_VAR),
            always_raise: flag(ALWAYS_RAISE_VAR),
            interactive: flag(INTERACTIVE_VAR),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Current value of every flag.
pub fn modes() -> Modes {
    Modes {
        always_stream: FLAGS.always_stream.load(Ordering::SeqCst),
        always_raise: FLAGS.always_raise.load(Ordering::SeqCst),
        interactive: FLAGS.interactive.load(Ordering::SeqCst),
    }
}

pub fn set_always_stream(value: bool) {
    FLAGS.always_stream.store(value, Ordering::SeqCst);
}

pub fn set_always_raise(value: bool) {
    FLAGS.always_raise.store(value, Ordering::SeqCst);
}

pub fn set_interactive(value: bool) {
    FLAGS.interactive.store(value, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_values_are_parsed_leniently() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ALWAYS_STREAM_VAR, " Yes "),
            (ALWAYS_RAISE_VAR, "0"),
            (INTERACTIVE_VAR, "ON"),
        ]);
        let modes = Modes::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(
            modes,
            Modes {
                always_stream: true,
                always_raise: false,
                interactive: true,
            }
        );
    }

    #[test]
    fn missing_vars_mean_off() {
        assert_eq!(Modes::from_lookup(|_| None), Modes::default());
    }
}

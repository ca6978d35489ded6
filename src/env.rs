use std::collections::BTreeMap;
use std::env as stdenv;
use std::process;

/// Per-command environment overrides.
///
/// A command sees the host's environment as it is at evaluation time, plus the
/// entries stored here. The working directory is likewise the host's current
/// directory when the process starts; nothing here owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value a started command would see for `key`.
    ///
    /// Looks up the overrides first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or replace an override.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn apply(&self, cmd: &mut process::Command) {
        cmd.envs(self.overrides());
    }
}

#[cfg(test)]
mod tests {
    use crate::env::Environment;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::new();

        // initially absent
        assert_eq!(env.get_var("PIPE_COMMANDS_RANDOM_ENV_VAR_12345"), None);

        env.set_var("PIPE_COMMANDS_RANDOM_ENV_VAR_12345", "VALUE");

        assert_eq!(
            env.get_var("PIPE_COMMANDS_RANDOM_ENV_VAR_12345"),
            Some("VALUE".to_string())
        );
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn test_override_shadows_process_env() {
        let mut env = Environment::new();
        env.set_var("PATH", "/nowhere");
        assert_eq!(env.get_var("PATH").as_deref(), Some("/nowhere"));
        assert_eq!(env.overrides().collect::<Vec<_>>(), vec![("PATH", "/nowhere")]);
    }
}

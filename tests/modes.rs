use pipe_commands::{
    Command, Error, Producer, modes, set_always_raise, set_always_stream, set_interactive,
};
use pretty_assertions::assert_eq;
use serial_test::serial;

/// Restores every mode flag when dropped, so a failing test cannot leak one.
struct ResetModes;

impl Drop for ResetModes {
    fn drop(&mut self) {
        set_always_raise(false);
        set_always_stream(false);
        set_interactive(false);
    }
}

#[test]
#[serial]
fn always_raise_fails_non_zero_exits() {
    let _reset = ResetModes;
    set_always_raise(true);
    assert!(modes().always_raise);

    let err = Command::new("false").evaluate().unwrap_err();
    assert_eq!(err.returncode(), Some(1));
    assert!(matches!(err, Error::Command { .. }));
    assert!(Command::new("true").evaluate().is_ok());
}

#[test]
#[serial]
fn quiet_overrides_always_raise() {
    let _reset = ResetModes;
    set_always_raise(true);
    let cmd = Command::new("false").quiet();
    assert!(!cmd.success().unwrap());
}

#[test]
#[serial]
fn flags_are_read_when_the_command_starts() {
    let _reset = ResetModes;
    let cmd = Command::new("false");
    set_always_raise(true);
    assert!(cmd.evaluate().is_err());

    let built_while_raising = Command::new("false");
    set_always_raise(false);
    assert!(!built_while_raising.success().unwrap());
}

#[test]
#[serial]
fn always_stream_skips_capture() {
    let _reset = ResetModes;
    set_always_stream(true);
    let streamed = Command::new("true");
    assert_eq!(streamed.stdout().unwrap(), None);

    let captured = Command::new("echo").arg("kept").stream_stdout(false);
    assert_eq!(captured.stdout().unwrap().as_deref(), Some("kept\n"));
}

#[test]
#[serial]
fn streamed_pipelines_still_feed_their_stages() {
    let _reset = ResetModes;
    set_always_stream(true);
    let cmd = Producer::text("a\nb\n").pipe(Command::new("grep").arg("b"))
        | Command::new("cat").stream_stdout(false);
    assert_eq!(cmd.stdout().unwrap().as_deref(), Some("b\n"));
}

#[test]
#[serial]
fn interactive_debug_shows_output() {
    let _reset = ResetModes;
    let cmd = Command::new("sh").args(["-c", "echo out; echo err >&2"]);
    set_interactive(true);
    assert_eq!(format!("{cmd:?}"), "out\nerr\n");

    set_interactive(false);
    assert_eq!(
        format!("{cmd:?}"),
        r#"Command(["sh", "-c", "echo out; echo err >&2"], returncode=0)"#
    );
}

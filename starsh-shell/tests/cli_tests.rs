//! Command-line tests for the `starsh` binary.

#![cfg(unix)]
#![allow(clippy::panic_in_result_fn)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::time::Duration;

fn starsh() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("starsh"));
    cmd.arg("--no-config");
    cmd
}

#[test]
fn runs_command_string() {
    starsh()
        .args(["-c", "echo hello | cat && false || echo recovered"])
        .assert()
        .success()
        .stdout("hello\nrecovered\n");
}

#[test]
fn exit_status_is_last_status() {
    starsh().args(["-c", "true; false"]).assert().code(1);
    starsh().args(["-c", "sh -c 'exit 7' | true"]).assert().code(0);
    starsh().args(["-c", "true | sh -c 'exit 7'"]).assert().code(7);
}

#[test]
fn unknown_command_is_127() {
    starsh()
        .args(["-c", "definitely-not-a-command-xyz"])
        .assert()
        .code(127)
        .stderr(predicate::str::contains(
            "command not found: definitely-not-a-command-xyz",
        ));
}

#[test]
fn syntax_error_is_2() {
    starsh()
        .args(["-c", "echo ok; echo 'open"])
        .assert()
        .code(2)
        .stdout("ok\n")
        .stderr(predicate::str::contains("unterminated single quote"));
}

#[test]
fn reads_commands_from_stdin() {
    starsh()
        .write_stdin("echo one &&\necho two\ncat <<END\nbody\nEND\n")
        .assert()
        .success()
        .stdout("one\ntwo\nbody\n");
}

#[test]
fn builtins_can_read_remaining_stdin() {
    starsh()
        .timeout(Duration::from_secs(10))
        .write_stdin("cat\necho after\n")
        .assert()
        .success()
        .stdout("echo after\n");
}

#[test]
fn builtin_and_process_output_keep_order() {
    starsh()
        .args(["-c", "echo -n foo; sh -c 'echo bar'; echo -n baz; sh -c 'echo qux'"])
        .assert()
        .success()
        .stdout("foobar\nbazqux\n");
}

#[test]
fn stdin_statements_mix_builtins_and_processes() {
    starsh()
        .timeout(Duration::from_secs(10))
        .write_stdin("echo -n one; sh -c 'echo two'\necho three | cat\n")
        .assert()
        .success()
        .stdout("onetwo\nthree\n");
}

#[test]
fn runs_script_with_arguments() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join("script.sh");
    std::fs::write(&script, "#!/usr/bin/env starsh\necho from script > out.txt\ncat out.txt\n")?;

    starsh()
        .current_dir(dir.path())
        .arg(&script)
        .arg("ignored")
        .assert()
        .success()
        .stdout("from script\n");

    assert!(dir.path().join("out.txt").exists());
    Ok(())
}

#[test]
fn missing_script_fails() {
    starsh()
        .arg("/nonexistent/starsh/script.sh")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("starsh: "));
}

#[test]
fn line_separator_flag() {
    starsh()
        .args(["--line-separator", "|", "-c", "echo a; echo b"])
        .assert()
        .success()
        .stdout("a|b|");
}

#[test]
fn error_follows_output_flag() {
    starsh()
        .args(["--error-follows-output", "-c", "cat /nonexistent/file"])
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with("cat: /nonexistent/file"))
        .stderr("");
}

#[test]
fn noclobber_flag() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("keep.txt"), "original")?;

    starsh()
        .current_dir(dir.path())
        .args(["--noclobber", "-c", "echo replaced > keep.txt"])
        .assert()
        .code(1);
    assert_eq!(std::fs::read_to_string(dir.path().join("keep.txt"))?, "original");

    starsh()
        .current_dir(dir.path())
        .args(["--noclobber", "-c", "echo replaced >| keep.txt"])
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(dir.path().join("keep.txt"))?, "replaced\n");
    Ok(())
}

#[test]
fn noenv_hides_host_variables() {
    starsh()
        .env("STARSH_TEST_VAR", "visible")
        .args(["-c", "sh -c 'echo \"[$STARSH_TEST_VAR]\"'"])
        .assert()
        .success()
        .stdout("[visible]\n");

    starsh()
        .env("STARSH_TEST_VAR", "visible")
        .args(["--noenv", "-c", "PATH=/usr/bin:/bin sh -c 'echo \"[$STARSH_TEST_VAR]\"'"])
        .assert()
        .success()
        .stdout("[]\n");
}

#[test]
fn explicit_config_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[shell]\nline-separator = \";\"\n")?;

    Command::new(assert_cmd::cargo::cargo_bin!("starsh"))
        .arg("--config")
        .arg(&config)
        .args(["-c", "echo x"])
        .assert()
        .success()
        .stdout("x;");

    std::fs::write(&config, "[shell\n")?;
    Command::new(assert_cmd::cargo::cargo_bin!("starsh"))
        .arg("--config")
        .arg(&config)
        .args(["-c", "echo x"])
        .assert()
        .code(2)
        .stdout("");
    Ok(())
}

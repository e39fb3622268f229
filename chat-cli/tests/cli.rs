//! Command-line surface tests that need no relay.

use assert_cmd::Command;
use predicates::prelude::*;

fn securechat() -> Command {
    let mut cmd = Command::cargo_bin("securechat").unwrap();
    cmd.env_remove("SECURECHAT_SERVER")
        .env_remove("SECURECHAT_PASSPHRASE")
        .env_remove("SECURECHAT_DATA_DIR");
    cmd
}

#[test]
fn help_lists_commands() {
    securechat()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("listen"))
        .stdout(predicate::str::contains("send-file"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn server_is_required() {
    securechat()
        .arg("history")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--server"));
}

#[test]
fn history_on_fresh_data_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    securechat()
        .args(["--server", "relay.invalid:8080", "--data-dir"])
        .arg(dir.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No messages stored yet."));
}

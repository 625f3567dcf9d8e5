use assert_cmd::Command;
use predicates::prelude::*;

fn metricwatch() -> Command {
    let mut cmd = Command::cargo_bin("metricwatch").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_version_flag() {
    metricwatch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_single_key_check() {
    metricwatch()
        .args(["-t", "agent.ping"])
        .assert()
        .success()
        .stdout(predicate::str::contains("agent.ping [s|1]"));
}

#[test]
fn test_unknown_key_check() {
    metricwatch()
        .args(["-t", "no.such.key"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "no.such.key [m|ZBX_NOTSUPPORTED] [Unknown metric no.such.key]",
        ));
}

#[test]
fn test_print_lists_every_key() {
    metricwatch()
        .arg("-p")
        .assert()
        .success()
        .stdout(predicate::str::contains("agent.version [s|"))
        .stdout(predicate::str::contains("system.cpu.num [s|"))
        // no sample is available right after start-up
        .stdout(predicate::str::contains(
            "system.cpu.util [m|ZBX_NOTSUPPORTED] [No values have been gathered yet.]",
        ));
}

#[test]
fn test_test_and_print_conflict() {
    metricwatch()
        .args(["-t", "agent.ping", "-p"])
        .assert()
        .failure();
}

#[test]
fn test_missing_config_file_fails() {
    metricwatch()
        .args(["--config", "/nonexistent/metricwatch.toml", "-t", "agent.ping"])
        .assert()
        .failure();
}

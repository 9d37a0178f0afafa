//! CLI surface tests.
//!
//! The binary itself mutates privileged host state, so only the argument
//! surface is exercised here; reconciliation behavior is covered by the
//! module-level tests against fixture trees.

use assert_cmd::Command;

#[test]
fn help_describes_the_orchestrator() {
    let output = Command::cargo_bin("moktrust")
        .expect("binary")
        .arg("--help")
        .output()
        .expect("run --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Secure Boot"));
}

#[test]
fn version_matches_package() {
    let output = Command::cargo_bin("moktrust")
        .expect("binary")
        .arg("--version")
        .output()
        .expect("run --version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn rejects_unknown_subcommands() {
    // Single state-driven command: there is no subcommand surface.
    let output = Command::cargo_bin("moktrust")
        .expect("binary")
        .arg("enroll")
        .output()
        .expect("run with bogus arg");

    assert!(!output.status.success());
}

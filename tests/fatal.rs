#![cfg(unix)]

use pseudo_reloc::{Error, diag};
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

/// Set in the child, which takes the fatal path instead of spawning.
const CHILD_ENV: &str = "PSEUDO_RELOC_FATAL_CHILD";

#[test]
fn fatal_writes_stderr_then_aborts() {
    if std::env::var_os(CHILD_ENV).is_some() {
        diag::fatal(&Error::UnknownVersion { version: 7 });
    }

    let output = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "fatal_writes_stderr_then_aborts", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert_eq!(output.status.code(), None);
    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("pseudo-relocation runtime failure:\n  Unknown pseudo relocation protocol version 7.\n"),
        "stderr was: {stderr}"
    );
}

#[test]
fn fatal_reports_unknown_bit_size() {
    const BITS_ENV: &str = "PSEUDO_RELOC_FATAL_BITS_CHILD";
    if std::env::var_os(BITS_ENV).is_some() {
        diag::fatal(&Error::UnknownBitSize { bits: 24 });
    }

    let output = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "fatal_reports_unknown_bit_size", "--test-threads=1"])
        .env(BITS_ENV, "1")
        .output()
        .unwrap();

    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown pseudo relocation bit size 24."), "stderr was: {stderr}");
}

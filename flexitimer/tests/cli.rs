use std::{
    io::Write,
    process::{Command, Stdio},
};

fn contains_bytes(mut haystack: &[u8], needle: &[u8]) -> bool {
    while haystack.len() >= needle.len() {
        if haystack.starts_with(needle) {
            return true;
        }
        haystack = &haystack[1..];
    }
    false
}

fn testdata(name: &str) -> String {
    format!("{}/testdata/config/{name}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn test_validate() {
    let result = Command::new(env!("CARGO_BIN_EXE_flexitimer"))
        .args(["validate", "-c", &testdata("invalid.toml")])
        .output()
        .unwrap();
    assert!(contains_bytes(
        &result.stderr,
        b"unknown field `does-not-exist`"
    ));
    assert_eq!(result.status.code(), Some(1));

    let result = Command::new(env!("CARGO_BIN_EXE_flexitimer"))
        .args(["validate", "-c", &testdata("bad-speed.toml")])
        .output()
        .unwrap();
    assert!(contains_bytes(&result.stderr, b"outside of the allowed range"));
    assert_eq!(result.status.code(), Some(1));

    let result = Command::new(env!("CARGO_BIN_EXE_flexitimer"))
        .args(["validate", "-c", &testdata("speedy.toml")])
        .output()
        .unwrap();
    assert!(contains_bytes(&result.stderr, b"good"));
    assert_eq!(result.status.code(), Some(0));
}

#[test]
fn test_usage_errors() {
    let result = Command::new(env!("CARGO_BIN_EXE_flexitimer"))
        .args(["run"])
        .output()
        .unwrap();
    assert!(contains_bytes(&result.stderr, b"usage: flexitimer"));
    assert_eq!(result.status.code(), Some(64));

    let result = Command::new(env!("CARGO_BIN_EXE_flexitimer"))
        .args(["run", "-s", "100", "10"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(contains_bytes(&result.stderr, b"outside of"));
    assert_eq!(result.status.code(), Some(64));
}

#[test]
fn test_run_until_expired() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_flexitimer"))
        .args(["run", "-s", "2", "-c", &testdata("speedy.toml"), "400"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // closing stdin leaves the countdown running until it expires
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"status\nbogus\nspeed 4\n")
        .unwrap();

    let result = child.wait_with_output().unwrap();
    assert_eq!(result.status.code(), Some(0));
    assert!(contains_bytes(&result.stdout, b"running"));
    assert!(contains_bytes(&result.stdout, b"speed=4x"));
    assert!(contains_bytes(&result.stdout, b"expired"));
    assert!(contains_bytes(&result.stderr, b"unknown command: 'bogus'"));
}

#[test]
fn test_quit_before_expiry() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_flexitimer"))
        .args(["run", "600000"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"stop\nstatus\nquit\n")
        .unwrap();

    let result = child.wait_with_output().unwrap();
    assert_eq!(result.status.code(), Some(0));
    assert!(contains_bytes(&result.stdout, b"stopped"));
    assert!(!contains_bytes(&result.stdout, b"expired"));
}

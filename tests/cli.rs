use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn mk_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("samex-test-")
        .tempdir()
        .unwrap()
}

fn write_file(path: &Path, contents: &str) {
    fs::write(path, contents.as_bytes()).unwrap();
}

fn read_file(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn run_with_stdin(cmd: &mut Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn samaddr_prints_range_and_text() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "alpha\nbeta\ngamma\n");

    let bin = env!("CARGO_BIN_EXE_samaddr");

    let out = Command::new(bin).arg(&file).arg("2").output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "#6,#11\nbeta\n");

    let out = Command::new(bin)
        .arg("--quiet")
        .arg(&file)
        .arg("/gam/")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "#11,#14\n");

    // Search starts after dot and wraps.
    let out = Command::new(bin)
        .args(["--dot", "12,14"])
        .arg(&file)
        .arg("/a/")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "#15,#16\na\n");
}

#[test]
fn samaddr_bad_address_exit_code() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "alpha\n");

    let bin = env!("CARGO_BIN_EXE_samaddr");
    let out = Command::new(bin).arg(&file).arg("9").output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.contains("address out of range"), "stderr: {stderr}");

    let out = Command::new(bin)
        .arg(dir.path().join("missing.txt"))
        .arg("1")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn samex_inplace_substitute() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "foo\nbar\n");

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = Command::new(bin)
        .arg(&file)
        .arg(",s/foo/baz/")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "");
    assert_eq!(read_file(&file), "baz\nbar\n");
}

#[test]
fn samex_commands_run_as_one_script() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "one\ntwo\nthree\n");

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = Command::new(bin)
        .arg(&file)
        .arg(",x/t[a-z]+/c/T/")
        .arg("2p")
        .output()
        .unwrap();
    assert!(out.status.success());
    // Edits land at commit, so `2p` still sees the old text.
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "two\n");
    assert_eq!(read_file(&file), "one\nT\nT\n");
}

#[test]
fn samex_dry_run_does_not_write() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "foo\nbar\n");

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = Command::new(bin)
        .arg("--dry-run")
        .arg(&file)
        .arg("1d")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "bar\n");
    assert_eq!(read_file(&file), "foo\nbar\n");
}

#[test]
fn samex_failure_leaves_file_untouched() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "foo\nbar\n");

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = Command::new(bin)
        .arg(&file)
        .arg(",s/foo/baz/")
        .arg("/nomatch/d")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.contains("error: no match for regexp"), "stderr: {stderr}");
    assert_eq!(read_file(&file), "foo\nbar\n");
}

#[test]
fn samex_stdin_mode() {
    let bin = env!("CARGO_BIN_EXE_samex");
    let out = run_with_stdin(
        Command::new(bin).arg("--stdin").arg("-").arg(",s/o/0/g"),
        "foo\nbar\n",
    );
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap(), "f00\nbar\n");

    let out = Command::new(bin)
        .arg("--stdin")
        .arg("f.txt")
        .arg("1d")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn samex_reads_script_from_stdin() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "foo\nbar\n");

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = run_with_stdin(Command::new(bin).arg(&file), "$a\nbaz\n.\n");
    assert!(out.status.success());
    assert_eq!(read_file(&file), "foo\nbar\nbaz\n");
}

#[test]
fn samex_rejects_binary() {
    let dir = mk_temp_dir();
    let file = dir.path().join("bin.dat");
    fs::write(&file, b"a\0b\n").unwrap();

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = Command::new(bin).arg(&file).arg("1d").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.contains("binary"), "stderr: {stderr}");
}

#[cfg(unix)]
#[test]
fn samex_pipe_through_shell() {
    let dir = mk_temp_dir();
    let file = dir.path().join("f.txt");
    write_file(&file, "foo\nbar\n");

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = Command::new(bin)
        .args(["--shell", "/bin/sh"])
        .arg(&file)
        .arg(",| tr a-z A-Z")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(read_file(&file), "FOO\nBAR\n");
}

#[cfg(unix)]
#[test]
fn samex_write_keeps_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = mk_temp_dir();
    let file = dir.path().join("run.sh");
    write_file(&file, "echo foo\n");
    fs::set_permissions(&file, fs::Permissions::from_mode(0o750)).unwrap();

    let bin = env!("CARGO_BIN_EXE_samex");
    let out = Command::new(bin)
        .arg(&file)
        .arg(",s/foo/bar/")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(read_file(&file), "echo bar\n");
    let mode = fs::metadata(&file).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o750);

    // No temporary files are left behind.
    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("run.sh")]);
}

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn webscan_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_webscan"));
    cmd.env("HOME", home);
    cmd.env_remove("WEBSCAN_CONFIG");
    cmd.env_remove("WEBSCAN_UI_COLOR");
    cmd.env_remove("WEBSCAN_REPORT_DIR");
    cmd.env_remove("WEBSCAN_REPORT_FORMAT");
    cmd.env_remove("WEBSCAN_SCANLOG_SINK");
    cmd.env_remove("WEBSCAN_SCANLOG_LOCAL_PATH");
    cmd.env_remove("WEBSCAN_SCANLOG_REMOTE_URL");
    cmd.env_remove("WEBSCAN_LOG_LEVEL");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    webscan_cmd(home).args(args).output().expect("run webscan")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("webscan-exit-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_known_shell_succeeds() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "bash"]);
    assert!(out.status.success());
    assert!(!out.stdout.is_empty());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_with_blank_target_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["scan", "--type", "all", "--target", "  "]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("ターゲット"), "stderr={stderr}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn analyze_without_inputs_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["analyze"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn analyze_missing_file_exits_2() {
    let home = make_temp_home();
    let missing = home.join("does-not-exist.txt");
    let out = run(
        &home,
        &["analyze", "--nmap", missing.to_str().expect("utf8 path")],
    );
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn broken_config_exits_2() {
    let home = make_temp_home();
    let path = home.join(".config/webscan/config.toml");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdirs");
    std::fs::write(&path, b"[scanners\nnmap_timeout_secs = ").expect("write");

    let out = run(&home, &["tools"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn remote_sink_without_url_exits_2() {
    let home = make_temp_home();
    let out = webscan_cmd(&home)
        .env("WEBSCAN_SCANLOG_SINK", "remote")
        .args(["config", "--show"])
        .output()
        .expect("run webscan");
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[cfg(unix)]
#[test]
fn headers_url_with_failing_curl_exits_20() {
    use std::os::unix::fs::PermissionsExt;

    let home = make_temp_home();
    let bin = home.join("bin");
    std::fs::create_dir_all(&bin).expect("mkdir bin");
    let curl = bin.join("curl");
    std::fs::write(&curl, b"#!/bin/sh\necho 'curl: (6) Could not resolve host' >&2\nexit 6\n")
        .expect("write curl");
    std::fs::set_permissions(&curl, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let out = webscan_cmd(&home)
        .env("PATH", format!("{}:/usr/bin:/bin", bin.display()))
        .args(["headers", "--url", "http://nowhere.invalid"])
        .output()
        .expect("run webscan");
    assert_eq!(out.status.code(), Some(20));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Could not resolve host"), "stderr={stderr}");
    let _ = std::fs::remove_dir_all(&home);
}

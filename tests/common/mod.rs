#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_stb") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "stb.exe" } else { "stb" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve stb binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run the binary with extra environment variables. `STB_*` variables from
/// the parent are stripped so local settings cannot leak into a case.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("stb-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command.args(args).env("RUST_BACKTRACE", "1");
    for (key, _) in std::env::vars() {
        if key.starts_with("STB_") {
            command.env_remove(key);
        }
    }
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute stb command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("env={env:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fixture trees ────────────────────

/// Create a release directory holding `payload_bytes` bytes and stamp its mtime.
pub fn make_release(dir: &Path, unix_secs: i64, payload_bytes: usize) -> PathBuf {
    fs::create_dir_all(dir).expect("create release dir");
    if payload_bytes > 0 {
        fs::write(dir.join("payload.bin"), vec![0x5a_u8; payload_bytes]).expect("write payload");
    }
    set_mtime(dir, unix_secs);
    dir.to_path_buf()
}

pub fn set_mtime(path: &Path, unix_secs: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(unix_secs, 0)).expect("set mtime");
}

pub fn mtime_secs(path: &Path) -> i64 {
    let meta = fs::metadata(path).expect("stat path");
    FileTime::from_last_modification_time(&meta).unix_seconds()
}

/// A fake `df` for the command probe: reads the free gigabytes for a device
/// from `<root>/free/<basename of device>` and prints df-style output.
///
/// Returns the probe program and arguments for the config file.
pub fn install_fake_df(root: &Path) -> (String, Vec<String>) {
    let free_dir = root.join("free");
    fs::create_dir_all(&free_dir).expect("create free dir");
    let script = root.join("fake_df.sh");
    let body = format!(
        "dev=\"$1\"\n\
         value=$(cat \"{free}/$(basename \"$dev\")\") || exit 3\n\
         printf 'Filesystem 1G-blocks Used Available Use%% Mounted\\n%s 1000G 1G %sG 1%% /mnt\\n' \"$dev\" \"$value\"\n",
        free = free_dir.display()
    );
    fs::write(&script, body).expect("write fake df");
    ("sh".to_string(), vec![script.display().to_string()])
}

/// Set what the fake `df` reports for `device`.
pub fn set_free_gb(root: &Path, device: &str, gb: u64) {
    let name = Path::new(device)
        .file_name()
        .expect("device has a file name")
        .to_string_lossy()
        .to_string();
    fs::write(root.join("free").join(name), gb.to_string()).expect("write free value");
}

/// Quote a path for inclusion in a TOML basic string.
pub fn toml_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}

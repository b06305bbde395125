#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

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
    PathBuf::from(env!("CARGO_BIN_EXE_psweep"))
}

/// Run `psweep` with `args`, isolated from the user's real config and data.
///
/// `data_dir` becomes `PSW_DATA_DIR`; output is forced to JSON unless a
/// case overrides `PSW_OUTPUT_FORMAT` in `envs`.
pub fn run_cli_case(
    case_name: &str,
    data_dir: &Path,
    args: &[&str],
    envs: &[(&str, &str)],
) -> CmdResult {
    let root = std::env::temp_dir().join("psweep-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("PSW_DATA_DIR", data_dir)
        .env("PSW_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1");
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("execute psweep command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
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

/// Parse the single JSON line a command printed.
pub fn json_line(result: &CmdResult) -> serde_json::Value {
    let line = result
        .stdout
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_else(|| panic!("no stdout; log: {}", result.log_path.display()));
    serde_json::from_str(line)
        .unwrap_or_else(|e| panic!("invalid JSON ({e}); log: {}", result.log_path.display()))
}

/// Write a config whose Linux table points only into `home`; other OS
/// tables are emptied.
pub fn write_sandbox_config(dir: &Path, home: &Path) -> PathBuf {
    let home = home.to_string_lossy().replace('\\', "/");
    let config = format!(
        r#"
[platforms]
windows = {{}}
macos = {{}}

[platforms.linux]
browser = ["{home}/.config/chrome/History"]
recent = ["{home}/.local/share/recently-used.xbel"]
app_cache = ["{home}/.cache/*"]
temp = ["{home}/tmp/*"]
"#
    );
    let path = dir.join("config.toml");
    fs::write(&path, config).expect("write sandbox config");
    path
}

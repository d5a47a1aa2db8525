use assert_cmd::Command;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Debug)]
pub struct FmigRun {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
    pub duration: Duration,
}

impl FmigRun {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&extract_json_payload(&self.stdout))
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {}", self.stdout))
    }
}

pub struct FmigWorkspace {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub log_dir: PathBuf,
}

impl FmigWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();
        let log_dir = root.join("logs");
        fs::create_dir_all(&log_dir).expect("log dir");
        Self {
            temp_dir,
            root,
            log_dir,
        }
    }

    /// A workspace that already ran `fmig init`.
    pub fn initialized() -> Self {
        let workspace = Self::new();
        let init = run_fmig(&workspace, ["init"], "init");
        assert!(init.status.success(), "init failed: {}", init.stderr);
        workspace
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(".factions").join("backups")
    }
}

pub fn run_fmig<I, S>(workspace: &FmigWorkspace, args: I, label: &str) -> FmigRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fmig"));
    cmd.current_dir(&workspace.root);
    cmd.args(args);
    cmd.env_remove("FMIG_DIR");
    cmd.env_remove("FMIG_LOG_FILE");
    cmd.env("NO_COLOR", "1");
    cmd.env("RUST_LOG", "faction_migrate=debug");
    cmd.env("HOME", &workspace.root);

    let start = Instant::now();
    let output = cmd.output().expect("run fmig");
    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_body = format!(
        "label: {label}\nduration: {duration:?}\nstatus: {}\nargs: {:?}\n\nstdout:\n{stdout}\n\nstderr:\n{stderr}\n",
        output.status,
        cmd.get_args().collect::<Vec<_>>(),
    );
    fs::write(workspace.log_dir.join(format!("{label}.log")), log_body).expect("write log");

    FmigRun {
        stdout,
        stderr,
        status: output.status,
        duration,
    }
}

pub fn extract_json_payload(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            return lines[idx..].join("\n").trim().to_string();
        }
    }
    stdout.trim().to_string()
}

//! Building and spawning the pilot binary.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use pilot::core::types::Mode;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Default wall-clock limit for one `pilot run`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

pub fn build_pilot_binary(repo_root: &Path) -> Result<PathBuf> {
    let output = Command::new("cargo")
        .arg("build")
        .arg("-p")
        .arg("pilot")
        .current_dir(repo_root)
        .output()
        .context("build pilot binary")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("pilot build failed: {}", stderr.trim());
    }
    Ok(pilot_binary_path(repo_root))
}

pub fn pilot_binary_path(repo_root: &Path) -> PathBuf {
    let binary = format!("pilot{}", std::env::consts::EXE_SUFFIX);
    repo_root.join("target").join("debug").join(binary)
}

/// How a pilot process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PilotExit {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Arguments for one `pilot run --json` in a workspace.
#[derive(Debug)]
pub struct PilotRun<'a> {
    pub binary: &'a Path,
    pub workspace_root: &'a Path,
    pub logs_dir: &'a Path,
    pub objective: &'a str,
    pub mode: Option<Mode>,
    pub env: &'a BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Run the session. The JSON report lands in `report.json` and diagnostics in
/// `pilot.log`, both under `logs_dir`.
pub fn run_pilot(run: &PilotRun<'_>) -> Result<PilotExit> {
    fs::create_dir_all(run.logs_dir)
        .with_context(|| format!("create logs dir {}", run.logs_dir.display()))?;
    let report_path = run.logs_dir.join("report.json");
    let log_path = run.logs_dir.join("pilot.log");
    let stdout = File::create(&report_path)
        .with_context(|| format!("create {}", report_path.display()))?;
    let stderr =
        File::create(&log_path).with_context(|| format!("create {}", log_path.display()))?;

    let mut command = Command::new(run.binary);
    command
        .args(["--json", "--verbose", "run", "--objective", run.objective])
        .current_dir(run.workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    if let Some(mode) = run.mode {
        command.args(["--mode", mode.as_str()]);
    }
    for (key, value) in run.env {
        command.env(key, value);
    }

    let started = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("spawn {}", run.binary.display()))?;
    let (status, timed_out) = match child.wait_timeout(run.timeout).context("wait for pilot")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = run.timeout.as_secs(), "pilot timed out, killing");
            child.kill().ok();
            (child.wait().context("wait after kill")?, true)
        }
    };
    debug!(
        exit_code = ?status.code(),
        timed_out,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pilot exited"
    );
    Ok(PilotExit {
        exit_code: if timed_out { None } else { status.code() },
        timed_out,
    })
}

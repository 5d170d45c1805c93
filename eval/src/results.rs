//! Result capture and persistence.
//!
//! Collects the pilot report, the final screenshot and run metadata into the
//! results directory for later analysis.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::harness::PilotExit;
use crate::judge::Judgment;
use crate::outcome::Outcome;

/// Input for capturing results from a completed run.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub pilot_binary: &'a Path,
    pub exit: &'a PilotExit,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workspace_root: &'a Path,
    /// Screenshot path as configured, relative to the workspace.
    pub screenshot_path: &'a Path,
    pub repo_root: &'a Path,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file.
    pub case_hash: String,
    pub pilot_git_sha: Option<String>,
    pub pilot_binary: String,
    /// Model session id from the pilot report.
    pub session_id: Option<String>,
    pub loop_count: Option<u64>,
    /// Stop reason from the pilot report.
    pub stop_reason: Option<String>,
    pub outcome: Option<Outcome>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub workspace: String,
    /// Non-fatal errors encountered during capture or judgment.
    pub errors: Vec<String>,
}

/// Capture results from a completed run into `results_dir`.
///
/// Expects `report.json` from the pilot already in `results_dir`. Copies the
/// final screenshot there and writes metadata.
#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(results_dir: &Path, input: &CaptureInput<'_>) -> Result<EvalMeta> {
    fs::create_dir_all(results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let pilot_git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("pilot git sha: {err}"));
            None
        }
    };

    let report = match read_report(&results_dir.join("report.json")) {
        Ok(report) => Some(report),
        Err(err) => {
            errors.push(format!("pilot report: {err}"));
            None
        }
    };
    let field = |name: &str| report.as_ref().and_then(|r| r.get(name).cloned());

    copy_if_exists(
        &input.workspace_root.join(input.screenshot_path),
        &results_dir.join("screenshot.png"),
        "screenshot",
        &mut errors,
    );

    if !errors.is_empty() {
        warn!(errors = ?errors, "artifact capture had errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        pilot_git_sha,
        pilot_binary: input.pilot_binary.display().to_string(),
        session_id: field("session_id").and_then(|v| v.as_str().map(str::to_string)),
        loop_count: field("loop_count").and_then(|v| v.as_u64()),
        stop_reason: field("stop")
            .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string)),
        outcome: None,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        exit_code: input.exit.exit_code,
        timed_out: input.exit.timed_out,
        workspace: input.workspace_root.display().to_string(),
        errors,
    };

    write_json(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(meta)
}

/// Record the outcome, and any judgment error, in `meta.json`.
pub fn update_outcome(results_dir: &Path, outcome: Outcome, error: Option<String>) -> Result<()> {
    let meta_path = results_dir.join("meta.json");
    let mut meta: EvalMeta = serde_json::from_str(
        &fs::read_to_string(&meta_path).with_context(|| format!("read {}", meta_path.display()))?,
    )
    .context("parse meta")?;
    meta.outcome = Some(outcome);
    meta.errors.extend(error);
    write_json(&meta_path, &meta)
}

pub fn write_judgment(results_dir: &Path, judgment: &Judgment) -> Result<()> {
    write_json(&results_dir.join("judgment.json"), judgment)
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn read_report(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).context("parse report")
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn copy_if_exists(src: &Path, dst: &Path, label: &str, errors: &mut Vec<String>) {
    if !src.exists() {
        errors.push(format!("{label}: missing {}", src.display()));
        return;
    }
    if let Some(parent) = dst.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        errors.push(format!("{label}: create dir failed: {err}"));
        return;
    }
    if let Err(err) = fs::copy(src, dst) {
        errors.push(format!("{label}: copy failed: {err}"));
    }
}

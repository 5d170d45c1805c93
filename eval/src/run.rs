//! Case execution orchestration.
//!
//! Coordinates workspace creation, the pilot session, result capture and the
//! screenshot judgment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use pilot::exit_codes;
use pilot::io::config::PilotConfig;
use pilot::io::model::ModelClient;
use tracing::{debug, info, instrument, warn};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::harness::{DEFAULT_TIMEOUT, PilotRun, build_pilot_binary, run_pilot};
use crate::judge::{Judgment, judge_screenshot};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, results_dir, update_outcome, write_judgment};
use crate::workspace::create_workspace;

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    pub eval_run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
    pub judgment: Option<Judgment>,
}

/// Run a case end-to-end: workspace, pilot session, capture, judgment.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case<J: ModelClient>(
    repo_root: &Path,
    case_path: &Path,
    case: &CaseFile,
    judge: &J,
) -> Result<RunOutcome> {
    info!("case run started");

    debug!("building pilot binary");
    let pilot_binary = build_pilot_binary(repo_root)?;
    if !pilot_binary.exists() {
        bail!("pilot binary not found at {}", pilot_binary.display());
    }

    let config = apply_case_config(PilotConfig::default(), case)?;
    let workspace = create_workspace(
        &repo_root.join("eval").join("workspaces"),
        &case.case.id,
        &config,
    )
    .context("create workspace")?;

    let started_at = Utc::now();
    let eval_run_id = eval_run_id(started_at);
    let results_dir = results_dir(
        &repo_root.join("eval").join("results"),
        &case.case.id,
        &eval_run_id,
    );

    debug!(workspace = %workspace.root.display(), "running pilot");
    let exit = run_pilot(&PilotRun {
        binary: &pilot_binary,
        workspace_root: &workspace.root,
        logs_dir: &results_dir,
        objective: &case.case.objective,
        mode: case.case.mode,
        env: &case.env,
        timeout: case
            .config
            .timeout_secs
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
    })
    .context("run pilot")?;
    let finished_at = Utc::now();
    info!(
        exit_code = ?exit.exit_code,
        timed_out = exit.timed_out,
        duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        "pilot finished"
    );

    capture_results(
        &results_dir,
        &CaptureInput {
            case_id: &case.case.id,
            case_path,
            eval_run_id: &eval_run_id,
            pilot_binary: &pilot_binary,
            exit: &exit,
            started_at,
            finished_at,
            workspace_root: &workspace.root,
            screenshot_path: &config.screenshot_path,
            repo_root,
        },
    )
    .context("capture results")?;

    let should_judge = matches!(exit.exit_code, Some(exit_codes::OK | exit_codes::CEILING));
    let (judgment, judge_error) = if should_judge {
        let screenshot = workspace.root.join(&config.screenshot_path);
        match judge_screenshot(judge, &screenshot, &case.case.guideline) {
            Ok(judgment) => {
                write_judgment(&results_dir, &judgment).context("write judgment")?;
                (Some(judgment), None)
            }
            Err(err) => {
                warn!(err = %err, "judgment failed");
                (None, Some(format!("judgment: {err}")))
            }
        }
    } else {
        (None, None)
    };

    let outcome = classify_outcome(exit.exit_code, judgment.as_ref());
    update_outcome(&results_dir, outcome, judge_error).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
        judgment,
    })
}

/// Run identifier derived from the start time, second resolution.
pub fn eval_run_id(started_at: DateTime<Utc>) -> String {
    format!("eval-{}", started_at.format("%Y%m%d_%H%M%S"))
}

//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result, bail};
use pilot::io::config::{Credentials, ModelConfig};
use pilot::io::model::GeminiClient;
use tracing::{debug, info};

use crate::case::{CaseFile, discover_cases};
use crate::report::aggregate;
use crate::run::run_case;

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    let cases_dir = repo_root.join("eval").join("cases");
    let cases = discover_cases(&cases_dir)?;
    for case in cases {
        println!("{}\t{}", case.case.id, case.case.objective);
    }
    Ok(())
}

/// Run a case by id (optionally multiple times), judged by `judge_model`.
pub fn run_case_by_id(repo_root: &Path, case_id: &str, runs: u32, judge_model: &str) -> Result<()> {
    let cases_dir = repo_root.join("eval").join("cases");
    let case_path = cases_dir.join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    debug!(case_id, runs, "case loaded");

    let judge_config = ModelConfig {
        name: judge_model.to_string(),
        ..ModelConfig::default()
    };
    let credentials =
        Credentials::from_env(&judge_config.api_key_env).context("judge credentials")?;
    let judge = GeminiClient::new(&judge_config, credentials).context("judge model")?;

    info!(case_id, runs, "starting runs");
    for run_num in 1..=runs {
        debug!(case_id, run_num, runs, "starting run");
        let outcome = run_case(repo_root, &case_path, &case, &judge).context("run case")?;
        println!(
            "run: case={} eval_run_id={} outcome={:?} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.outcome,
            outcome.results_dir.display()
        );
        if let Some(judgment) = &outcome.judgment {
            println!(
                "run: guideline_met={} reason={}",
                judgment.guideline_met, judgment.reason
            );
        }
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let results_dir = repo_root.join("eval").join("results").join(case_id);
    let (summary, warnings) = aggregate(&results_dir)?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: success={} fail={} ceiling={} error={}",
        summary.success, summary.fail, summary.ceiling, summary.error
    );
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    if let Some(avg) = summary.avg_loop_count {
        println!("report: avg_loop_count={:.2}", avg);
    }
    let (met, judged) = summary.guideline_met;
    println!("report: guideline_met {met}/{judged}");
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove workspaces and results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let workspaces_dir = repo_root.join("eval").join("workspaces");
    let results_dir = repo_root.join("eval").join("results");

    if workspaces_dir.exists() {
        let prefix = format!("{case_id}_");
        for entry in std::fs::read_dir(&workspaces_dir)
            .with_context(|| format!("read {}", workspaces_dir.display()))?
        {
            let entry = entry.context("read entry")?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                std::fs::remove_dir_all(entry.path())
                    .with_context(|| format!("remove {}", entry.path().display()))?;
            }
        }
    }

    let case_results = results_dir.join(case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }

    println!(
        "clean: case={} workspaces={} results={}",
        case_id,
        workspaces_dir.display(),
        case_results.display()
    );
    Ok(())
}

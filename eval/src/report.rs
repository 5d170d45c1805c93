use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::EvalMeta;

#[derive(Debug, Default, PartialEq)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub ceiling: usize,
    pub error: usize,
    pub avg_duration_secs: Option<f64>,
    pub avg_loop_count: Option<f64>,
    /// Runs with a verdict: (guideline met, judged).
    pub guideline_met: (usize, usize),
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut loop_counts = Vec::new();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta_path = run_dir.join("meta.json");
        let meta: EvalMeta = match fs::read_to_string(&meta_path)
            .with_context(|| format!("read {}", meta_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse meta"))
        {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Ceiling) => summary.ceiling += 1,
            Some(Outcome::Error) | None => summary.error += 1,
        }

        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => meta.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + meta.duration_secs;
                total / summary.runs as f64
            }
        });
        loop_counts.extend(meta.loop_count);

        let judgment_path = run_dir.join("judgment.json");
        if judgment_path.exists() {
            match fs::read_to_string(&judgment_path)
                .context("read judgment")
                .and_then(|contents| {
                    serde_json::from_str::<Judgment>(&contents).context("parse judgment")
                }) {
                Ok(judgment) => {
                    summary.guideline_met.1 += 1;
                    if judgment.guideline_met {
                        summary.guideline_met.0 += 1;
                    }
                }
                Err(err) => warnings.push(format!(
                    "{}: judgment.json invalid ({err})",
                    run_dir.display()
                )),
            }
        }
    }

    if !loop_counts.is_empty() {
        let total: u64 = loop_counts.iter().sum();
        summary.avg_loop_count = Some(total as f64 / loop_counts.len() as f64);
    }
    Ok((summary, warnings))
}

//! Case file parsing and validation.
//!
//! Cases are TOML files pairing an objective for `pilot run` with a guideline
//! the final screenshot must meet. See `eval/cases/` for examples.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use pilot::core::types::Mode;
use pilot::io::config::MAX_ITERATIONS;
use serde::Deserialize;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Objective passed to `pilot run`.
    pub objective: String,
    /// What the final screenshot must show for the case to pass.
    pub guideline: String,
    /// Overrides the configured pilot mode.
    pub mode: Option<Mode>,
}

/// Pilot configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CaseConfig {
    pub max_iterations: Option<u32>,
    /// Model driving the session (the judge model is chosen on the command line).
    pub model: Option<String>,
    /// Seconds before the pilot process is killed.
    pub timeout_secs: Option<u64>,
}

impl CaseFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.objective.trim().is_empty() {
            bail!("case.objective must be non-empty");
        }
        if self.case.guideline.trim().is_empty() {
            bail!("case.guideline must be non-empty");
        }
        if let Some(max) = self.config.max_iterations
            && !(1..=MAX_ITERATIONS).contains(&max)
        {
            bail!("config.max_iterations must be within 1..={MAX_ITERATIONS}");
        }
        if self.config.timeout_secs == Some(0) {
            bail!("config.timeout_secs must be > 0");
        }
        if let Some(model) = &self.config.model
            && model.trim().is_empty()
        {
            bail!("config.model must be non-empty");
        }
        for (key, value) in &self.env {
            if key.trim().is_empty() {
                bail!("env key must be non-empty");
            }
            if value.is_empty() {
                bail!("env {} must be non-empty", key);
            }
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory, sorted by id.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

//! Pilot configuration merging.
//!
//! Applies case-specific overrides to the default pilot configuration.

use anyhow::Result;
use pilot::io::config::PilotConfig;

use crate::case::CaseFile;

/// Apply case overrides to the base pilot config.
pub fn apply_case_config(mut base: PilotConfig, case: &CaseFile) -> Result<PilotConfig> {
    if let Some(mode) = case.case.mode {
        base.mode = mode;
    }
    if let Some(max_iterations) = case.config.max_iterations {
        base.max_iterations = max_iterations;
    }
    if let Some(model) = &case.config.model {
        base.model.name = model.clone();
    }
    base.validate()?;
    Ok(base)
}

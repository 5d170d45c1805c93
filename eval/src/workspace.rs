//! Workspace creation.
//!
//! Each eval run gets an isolated directory holding its own `pilot.toml` and
//! screenshot folder, so runs never overwrite each other's captures.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use pilot::io::config::{PilotConfig, write_config};
use rand::{Rng, distributions::Alphanumeric};

pub const CONFIG_FILE: &str = "pilot.toml";

/// An isolated workspace for running a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path to the workspace root.
    pub root: PathBuf,
    /// Directory name (case id, timestamp and random suffix).
    pub name: String,
}

/// Create a workspace under `base_dir` configured with `config`.
pub fn create_workspace(base_dir: &Path, case_id: &str, config: &PilotConfig) -> Result<Workspace> {
    fs::create_dir_all(base_dir)
        .with_context(|| format!("create workspace dir {}", base_dir.display()))?;

    let timestamp = generate_timestamp();
    let short_id = generate_short_id();
    let name = build_workspace_name(case_id, &timestamp, &short_id);
    let root = base_dir.join(&name);
    fs::create_dir_all(&root)
        .with_context(|| format!("create workspace root {}", root.display()))?;

    write_config(&root.join(CONFIG_FILE), config).context("write pilot config")?;
    if let Some(parent) = config.screenshot_path.parent() {
        fs::create_dir_all(root.join(parent))
            .with_context(|| format!("create screenshot dir in {}", root.display()))?;
    }

    let seed = format!("case_id: {case_id}\ncreated_at: {timestamp}\n");
    fs::write(root.join("README.txt"), seed)
        .with_context(|| format!("write seed {}", root.display()))?;

    Ok(Workspace { root, name })
}

pub fn build_workspace_name(case_id: &str, timestamp: &str, short_id: &str) -> String {
    format!("{case_id}_{timestamp}_{short_id}")
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

//! Run artifacts
//!
//! Every node's compiled plan is written to `<temp>/sqlfleet/<run-id>/` as
//! `<node>.plan.json` with a `<node>.plan.json.checksum` beside it. The
//! directory lives as long as the [`RunArtifacts`] value and is removed when
//! it drops, whatever the run's outcome.

use anyhow::{Context, Result};
use converge::{NodePlan, PlannedDeclaration, RunPlan};
use log::{debug, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct NodeArtifact<'a> {
    run_id: &'a str,
    node: &'a converge::TargetNode,
    declarations: Vec<PlannedDeclaration>,
}

#[derive(Debug)]
pub struct RunArtifacts {
    pub run_id: String,
    dir: PathBuf,
    files: Vec<PathBuf>,
}

/// A fresh run id: local timestamp plus process id
pub fn new_run_id() -> String {
    format!(
        "{}-{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        std::process::id()
    )
}

impl RunArtifacts {
    /// Write the plan under the system temp directory
    pub fn write(plan: &RunPlan) -> Result<Self> {
        Self::write_in(&std::env::temp_dir().join("sqlfleet"), &new_run_id(), plan)
    }

    pub fn write_in(root: &Path, run_id: &str, plan: &RunPlan) -> Result<Self> {
        let dir = root.join(run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut artifacts = Self {
            run_id: run_id.to_string(),
            dir,
            files: Vec::new(),
        };

        // A failed write drops `artifacts`, which removes the directory
        artifacts.files = plan
            .nodes
            .par_iter()
            .map(|node| write_node(&artifacts.dir, run_id, node))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "run {run_id}: wrote {} plan files to {}",
            artifacts.files.len(),
            artifacts.dir.display()
        );
        Ok(artifacts)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Plan files, one per node, in plan order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn write_node(dir: &Path, run_id: &str, plan: &NodePlan) -> Result<PathBuf> {
    let artifact = NodeArtifact {
        run_id,
        node: &plan.node,
        declarations: plan.describe(),
    };
    let json = serde_json::to_vec_pretty(&artifact)
        .with_context(|| format!("Failed to serialize plan for {}", plan.node.name))?;

    let path = dir.join(format!("{}.plan.json", plan.node.name));
    fs::write(&path, &json).with_context(|| format!("Failed to write {}", path.display()))?;

    let checksum = blake3::hash(&json).to_hex().to_string();
    let checksum_path = dir.join(format!("{}.plan.json.checksum", plan.node.name));
    fs::write(&checksum_path, &checksum)
        .with_context(|| format!("Failed to write {}", checksum_path.display()))?;

    Ok(path)
}

/// Check a plan file against its checksum file
pub fn verify(path: &Path) -> Result<bool> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut checksum_path = path.as_os_str().to_owned();
    checksum_path.push(".checksum");
    let expected = fs::read_to_string(&checksum_path)
        .with_context(|| format!("Failed to read checksum for {}", path.display()))?;
    Ok(blake3::hash(&content).to_hex().as_str() == expected.trim())
}

impl Drop for RunArtifacts {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!("could not remove {}: {e}", self.dir.display());
        }
    }
}

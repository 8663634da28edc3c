use anyhow::{bail, Result};
use serde::Deserialize;

use crate::utils;

/// One installed release as reported by `helm list`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct HelmRelease {
  pub name: String,
  pub namespace: String,
}

/// Outcome of a single uninstall attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UninstallStatus {
  Uninstalled,
  NotFound,
  Failed(String),
}

pub trait HelmCli: Send + Sync {
  /// List releases across all namespaces
  fn list(&self) -> Result<Vec<HelmRelease>>;
  fn uninstall(&self, release: &HelmRelease) -> UninstallStatus;
}

/// Loose release filter: name substring or namespace equality
///
/// Release naming is not fully controlled by this tool, so the match errs on the side
/// of catching platform releases rather than missing them
pub fn matches(release: &HelmRelease, filter: &str, namespace: &str) -> bool {
  release.name.contains(filter) || release.namespace == namespace
}

/// CLI-backed implementation shelling out to `helm`
pub struct ShellHelm;

impl HelmCli for ShellHelm {
  fn list(&self) -> Result<Vec<HelmRelease>> {
    let result = utils::cmd_exec("helm", vec!["list", "--all-namespaces", "--output", "json"])?;
    if result.status != 0 {
      bail!("helm list failed: {}", result.stderr.trim());
    }
    let releases: Vec<HelmRelease> = serde_json::from_str(&result.stdout)?;
    Ok(releases)
  }

  fn uninstall(&self, release: &HelmRelease) -> UninstallStatus {
    match utils::cmd_exec("helm", vec!["uninstall", &release.name, "--namespace", &release.namespace]) {
      Ok(result) if result.status == 0 => UninstallStatus::Uninstalled,
      Ok(result) if result.stderr.contains("release: not found") => UninstallStatus::NotFound,
      Ok(result) => UninstallStatus::Failed(result.stderr.trim().to_string()),
      Err(err) => UninstallStatus::Failed(err.to_string()),
    }
  }
}

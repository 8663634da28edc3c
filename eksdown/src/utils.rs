use std::{fs, path::Path};

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

pub struct CmdResult {
  pub stdout: String,
  pub stderr: String,
  pub status: i32,
}

/// Execute a command and return the output (stdout)
pub fn cmd_exec(cmd: &str, args: Vec<&str>) -> Result<CmdResult> {
  let output = std::process::Command::new(cmd).args(args).output();

  match output {
    Ok(output) => Ok(CmdResult {
      stdout: String::from_utf8_lossy(&output.stdout).to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      status: output.status.code().unwrap_or(1),
    }),
    Err(e) => Err(anyhow!("Error executing command {cmd}: {e}")),
  }
}

/// Remove a local file or directory tree, best-effort
///
/// Used for run artifacts (repository checkout, virtualenv, generated helper scripts);
/// a failure here is logged and never fails the run
pub fn remove_path(path: &Path) {
  let result = if path.is_dir() {
    fs::remove_dir_all(path)
  } else if path.exists() {
    fs::remove_file(path)
  } else {
    debug!("{} does not exist", path.display());
    return;
  };

  match result {
    Ok(()) => info!("Removed {}", path.display()),
    Err(err) => warn!("Unable to remove {}: {err}", path.display()),
  }
}

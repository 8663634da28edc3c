use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use regex_lite::Regex;

use crate::utils;

/// Result of one module-targeted destroy
#[derive(Clone, Debug)]
pub struct ModuleDestroy {
  pub module: String,
  pub succeeded: bool,
  pub raw_output: String,
}

/// Module-targeted destroy interface
///
/// Success detection is owned by the implementation so callers never match on
/// subprocess text themselves
pub trait Terraform: Send + Sync {
  fn init(&self) -> Result<()>;
  /// Destroy a single named module
  fn destroy_module(&self, module: &str) -> Result<ModuleDestroy>;
  /// Unconditional full destroy to catch stragglers
  fn destroy_all(&self) -> Result<ModuleDestroy>;
}

/// CLI-backed implementation running `terraform` against a root module directory
pub struct ShellTerraform {
  dir: PathBuf,
}

impl ShellTerraform {
  pub fn new(dir: &Path) -> Self {
    Self { dir: dir.to_path_buf() }
  }

  fn destroy(&self, target: Option<&str>) -> Result<ModuleDestroy> {
    let chdir = format!("-chdir={}", self.dir.display());
    let target_arg = target.map(|module| format!("-target=module.{module}"));
    let mut args = vec![chdir.as_str(), "destroy", "-auto-approve", "-input=false"];
    if let Some(arg) = &target_arg {
      args.push(arg);
    }

    let result = utils::cmd_exec("terraform", args)?;
    let succeeded = result.status == 0 && destroy_complete(&result.stdout)?;
    Ok(ModuleDestroy {
      module: target.unwrap_or("all").to_string(),
      succeeded,
      raw_output: format!("{}{}", result.stdout, result.stderr),
    })
  }
}

impl Terraform for ShellTerraform {
  fn init(&self) -> Result<()> {
    let chdir = format!("-chdir={}", self.dir.display());
    let result = utils::cmd_exec("terraform", vec![chdir.as_str(), "init", "-input=false"])?;
    if result.status != 0 {
      bail!("terraform init failed: {}", result.stderr.trim());
    }
    Ok(())
  }

  fn destroy_module(&self, module: &str) -> Result<ModuleDestroy> {
    self.destroy(Some(module))
  }

  fn destroy_all(&self) -> Result<ModuleDestroy> {
    self.destroy(None)
  }
}

/// The exit status alone is not sufficient: a `-target` destroy can exit zero without
/// reaching the target module, so the completion line is checked as well
/// TODO: switch to `terraform destroy -json` once the minimum supported version emits
/// machine-readable apply results for targeted destroys
fn destroy_complete(stdout: &str) -> Result<bool> {
  let re = Regex::new(r"Destroy complete! Resources: \d+ destroyed")?;
  Ok(re.is_match(stdout))
}

use std::{
  io::{self, Write},
  path::PathBuf,
  sync::Arc,
  time::Duration,
};

use anyhow::{bail, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{
  cloud::{AwsCloud, CloudApi},
  cluster::{ClusterConnector, EksConnector},
  helm::{HelmCli, ShellHelm},
  orchestrator::{Disposition, TeardownOrchestrator},
  report, resource,
  terraform::{ShellTerraform, Terraform},
  RunConfig,
};

/// Bounded waits for asynchronous teardown on the cluster and EFS side; these are
/// upper bounds on polling, not fixed delays
const DRAIN_TIMEOUT: Duration = Duration::from_secs(120);
const MOUNT_TARGET_TIMEOUT: Duration = Duration::from_secs(90);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Input arguments for the `teardown` command
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct Teardown {
  /// Name of the EKS cluster to tear down
  #[arg(long)]
  pub cluster_name: String,

  /// AWS region of the cluster
  #[arg(long, env = "AWS_DEFAULT_REGION")]
  pub region: String,

  /// Namespace the platform is deployed into
  #[arg(long, default_value = resource::DEFAULT_NAMESPACE)]
  pub namespace: String,

  /// Namespace the GitOps controller runs in
  #[arg(long, default_value = resource::DEFAULT_ARGO_NAMESPACE)]
  pub argo_namespace: String,

  /// GitOps Application objects to delete ahead of the namespace
  #[arg(long = "app", default_values_t = resource::DEFAULT_APPLICATIONS.iter().map(ToString::to_string))]
  pub applications: Vec<String>,

  /// API group of the platform's custom resource definitions
  #[arg(long, default_value = resource::DEFAULT_CRD_GROUP)]
  pub crd_group: String,

  /// Substring used to match Helm releases for uninstall
  #[arg(long, default_value = resource::DEFAULT_NAMESPACE)]
  pub release_filter: String,

  /// ECR repositories created by the image pipeline
  #[arg(long = "ecr-repo", default_values_t = resource::DEFAULT_ECR_REPOSITORIES.iter().map(ToString::to_string))]
  pub ecr_repositories: Vec<String>,

  /// Creation token the shared filesystem was provisioned with
  #[arg(long, default_value = resource::DEFAULT_EFS_CREATION_TOKEN)]
  pub efs_token: String,

  /// Directory containing the Terraform root module
  #[arg(long, default_value = "./terraform")]
  pub terraform_dir: PathBuf,

  /// Local artifact to remove after teardown (repeatable: checkout, virtualenv, generated scripts)
  #[arg(long = "artifact")]
  pub artifacts: Vec<PathBuf>,

  /// Days before the scheduled KMS key deletion takes effect (minimum 7)
  #[arg(long, default_value = "7")]
  pub kms_pending_window: i32,

  /// Skip the interactive confirmation
  #[arg(long)]
  pub auto_approve: bool,
}

impl Teardown {
  pub async fn run(&self) -> Result<()> {
    if !self.auto_approve && !confirm(&self.cluster_name)? {
      println!("Teardown cancelled");
      return Ok(());
    }

    let cfg = self.config();
    let sdk_config = crate::get_sdk_config(Some(self.region.clone())).await?;
    let cloud: Arc<dyn CloudApi> = Arc::new(AwsCloud::new(&sdk_config));
    let connector: Arc<dyn ClusterConnector> = Arc::new(EksConnector::new(&cfg, cloud.clone()));
    let helm: Arc<dyn HelmCli> = Arc::new(ShellHelm);
    let terraform: Arc<dyn Terraform> = Arc::new(ShellTerraform::new(&cfg.terraform_dir));

    let run = TeardownOrchestrator::new(cfg, cloud, connector, helm, terraform).run().await;

    println!("{}", report::render_summary(&run.outcomes));
    match run.disposition {
      // Partial failures exit zero by design: teardown races in-cluster controllers
      // and expected leftovers must not block automation pipelines
      Disposition::Success | Disposition::Partial => Ok(()),
      Disposition::Aborted => bail!("teardown aborted before the module destroys could run"),
    }
  }

  fn config(&self) -> RunConfig {
    RunConfig {
      cluster_name: self.cluster_name.clone(),
      region: self.region.clone(),
      namespace: self.namespace.clone(),
      argo_namespace: self.argo_namespace.clone(),
      applications: self.applications.clone(),
      crd_group: self.crd_group.clone(),
      release_filter: self.release_filter.clone(),
      ecr_repositories: self.ecr_repositories.clone(),
      efs_creation_token: self.efs_token.clone(),
      terraform_dir: self.terraform_dir.clone(),
      artifacts: self.artifacts.clone(),
      kms_pending_window_days: self.kms_pending_window,
      drain_timeout: DRAIN_TIMEOUT,
      mount_target_timeout: MOUNT_TARGET_TIMEOUT,
      poll_interval: POLL_INTERVAL,
    }
  }
}

fn confirm(cluster_name: &str) -> Result<bool> {
  print!("This will destroy cluster {cluster_name} and every resource deployed around it. Continue? [y/N] ");
  io::stdout().flush()?;
  let mut line = String::new();
  io::stdin().read_line(&mut line)?;
  Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

pub mod cli;
pub mod cloud;
pub mod cluster;
pub mod commands;
pub mod drain;
pub mod helm;
pub mod orchestrator;
pub mod probe;
pub mod reconcile;
pub mod report;
pub mod resource;
pub mod terraform;
pub mod utils;

#[cfg(test)]
pub(crate) mod fakes;

use std::{env, path::PathBuf, time::Duration};

use anyhow::Result;
use aws_config::{meta::region::RegionProviderChain, retry::RetryConfig, SdkConfig};
use aws_types::region::Region;
pub use cli::{Cli, Commands};

/// Get the configuration to authn/authz with AWS that will be used across AWS clients
///
/// Retries are bounded here once rather than per client; every destructive call is
/// attempted at most once at the application level on top of this
pub async fn get_sdk_config(region: Option<String>) -> Result<SdkConfig> {
  let aws_region = match region {
    Some(region) => Some(Region::new(region)),
    None => env::var("AWS_DEFAULT_REGION").ok().map(Region::new),
  };

  let region_provider = RegionProviderChain::first_try(aws_region).or_default_provider();

  Ok(
    aws_config::from_env()
      .region(region_provider)
      .retry_config(RetryConfig::standard().with_max_attempts(3))
      .load()
      .await,
  )
}

/// Configuration for a single teardown run
///
/// Constructed once from CLI input and never mutated; every component receives it
/// at construction
#[derive(Clone, Debug)]
pub struct RunConfig {
  /// Name of the EKS cluster being torn down
  pub cluster_name: String,
  /// AWS region the cluster and its resources live in
  pub region: String,
  /// Namespace the platform is deployed into
  pub namespace: String,
  /// Namespace the GitOps controller runs in
  pub argo_namespace: String,
  /// GitOps Application objects to delete ahead of the namespace
  pub applications: Vec<String>,
  /// API group of the platform's custom resource definitions
  pub crd_group: String,
  /// Substring used to match Helm releases for uninstall
  pub release_filter: String,
  /// ECR repositories created by the image pipeline
  pub ecr_repositories: Vec<String>,
  /// Creation token the shared filesystem was provisioned with
  pub efs_creation_token: String,
  /// Directory containing the Terraform root module
  pub terraform_dir: PathBuf,
  /// Local artifacts removed at the end of the run
  pub artifacts: Vec<PathBuf>,
  /// Days before a scheduled KMS key deletion takes effect (floor of 7 is enforced)
  pub kms_pending_window_days: i32,
  /// Upper bound on waiting for a namespace or CRD to finish terminating
  pub drain_timeout: Duration,
  /// Upper bound on waiting for asynchronous mount-target teardown
  pub mount_target_timeout: Duration,
  /// Interval between existence polls while waiting on the bounds above
  pub poll_interval: Duration,
}

impl RunConfig {
  /// KMS alias created for the cluster's envelope encryption key
  pub fn kms_alias(&self) -> String {
    format!("alias/eks/{}", self.cluster_name)
  }

  /// Prefix of the control plane log groups
  pub fn log_group_prefix(&self) -> String {
    format!("/aws/eks/{}", self.cluster_name)
  }

  /// Name prefixes of the IAM roles and policies created for the cluster
  pub fn iam_prefixes(&self) -> [String; 2] {
    [
      format!("{}-cluster-", self.cluster_name),
      format!("{}-ebs-csi-driver-", self.cluster_name),
    ]
  }
}

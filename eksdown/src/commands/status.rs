use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled};

use crate::{
  cloud::{AwsCloud, CloudApi},
  probe::ResourceProbe,
  reconcile, resource,
  resource::{ResourceDescriptor, ResourceKind},
  RunConfig,
};

/// Input arguments for the `status` command
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct Status {
  /// Name of the EKS cluster
  #[arg(long)]
  pub cluster_name: String,

  /// AWS region of the cluster
  #[arg(long, env = "AWS_DEFAULT_REGION")]
  pub region: String,

  /// ECR repositories created by the image pipeline
  #[arg(long = "ecr-repo", default_values_t = resource::DEFAULT_ECR_REPOSITORIES.iter().map(ToString::to_string))]
  pub ecr_repositories: Vec<String>,

  /// Creation token the shared filesystem was provisioned with
  #[arg(long, default_value = resource::DEFAULT_EFS_CREATION_TOKEN)]
  pub efs_token: String,
}

#[derive(Tabled)]
struct StatusRow {
  resource: String,
  identifier: String,
  state: String,
}

impl Status {
  /// Probe every teardown-managed resource and print what still exists
  ///
  /// Strictly read-only; the same discovery the teardown uses, minus the deletes
  pub async fn run(&self) -> Result<()> {
    let cfg = self.config();
    let sdk_config = crate::get_sdk_config(Some(self.region.clone())).await?;
    let cloud: Arc<dyn CloudApi> = Arc::new(AwsCloud::new(&sdk_config));
    let probe = ResourceProbe::new(&cfg, cloud.clone());

    let mut descriptors = vec![ResourceDescriptor::new(
      ResourceKind::Cluster,
      &cfg.cluster_name,
      &cfg.region,
    )];
    descriptors.extend(reconcile::discover_conflict_resources(&cfg, &cloud).await);
    descriptors.extend(reconcile::discover_tagged_resources(&cfg, &cloud).await);

    let mut rows = Vec::new();
    for descriptor in &descriptors {
      let state = match probe.exists(descriptor).await {
        Ok(true) => "present".to_string(),
        Ok(false) => "absent".to_string(),
        Err(err) => format!("unknown ({err})"),
      };
      rows.push(StatusRow {
        resource: descriptor.kind.to_string(),
        identifier: descriptor.identifier.clone(),
        state,
      });
    }

    let table = Table::new(&rows).to_string();
    println!("{table}");

    Ok(())
  }

  fn config(&self) -> RunConfig {
    RunConfig {
      cluster_name: self.cluster_name.clone(),
      region: self.region.clone(),
      namespace: resource::DEFAULT_NAMESPACE.to_string(),
      argo_namespace: resource::DEFAULT_ARGO_NAMESPACE.to_string(),
      applications: resource::DEFAULT_APPLICATIONS.iter().map(ToString::to_string).collect(),
      crd_group: resource::DEFAULT_CRD_GROUP.to_string(),
      release_filter: resource::DEFAULT_NAMESPACE.to_string(),
      ecr_repositories: self.ecr_repositories.clone(),
      efs_creation_token: self.efs_token.clone(),
      terraform_dir: PathBuf::from("./terraform"),
      artifacts: vec![],
      kms_pending_window_days: 7,
      drain_timeout: Duration::from_secs(120),
      mount_target_timeout: Duration::from_secs(90),
      poll_interval: Duration::from_secs(5),
    }
  }
}

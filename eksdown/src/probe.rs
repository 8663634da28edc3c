use std::sync::Arc;

use thiserror::Error;

use crate::{
  cloud::{CloudApi, CloudError},
  resource::{ResourceDescriptor, ResourceKind},
  RunConfig,
};

/// Resource state could not be determined (credentials, network, throttling)
///
/// Callers treat this conservatively: assume the resource is present and attempt the
/// delete anyway
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

/// Read-only existence checks for cloud resources
///
/// Never fails on "not found" - absence is a normal answer, not an error
pub struct ResourceProbe {
  cfg: RunConfig,
  cloud: Arc<dyn CloudApi>,
}

impl ResourceProbe {
  pub fn new(cfg: &RunConfig, cloud: Arc<dyn CloudApi>) -> Self {
    Self {
      cfg: cfg.clone(),
      cloud,
    }
  }

  /// `Ok(false)` means confirmed absent; `Err` means the state is unknown
  pub async fn exists(&self, descriptor: &ResourceDescriptor) -> Result<bool, ProbeError> {
    let result = match descriptor.kind {
      ResourceKind::Cluster => self.cloud.cluster_exists(&descriptor.identifier).await,
      ResourceKind::KmsAlias => self.cloud.resolve_alias(&descriptor.identifier).await.map(|key| key.is_some()),
      ResourceKind::LogGroup => self.cloud.log_group_exists(&descriptor.identifier).await,
      ResourceKind::IamRole => self.cloud.role_exists(&descriptor.identifier).await,
      ResourceKind::IamPolicy => self.cloud.policy_exists(&descriptor.identifier).await,
      ResourceKind::EcrRepo => self.cloud.repository_exists(&descriptor.identifier).await,
      ResourceKind::EfsFilesystem => self
        .cloud
        .filesystem_by_token(&descriptor.identifier)
        .await
        .map(|id| id.is_some()),
      // Controller-created resources have no stable name; membership in a fresh tag
      // query is the existence check
      ResourceKind::LoadBalancer => self
        .cloud
        .load_balancers_for_cluster(&self.cfg.cluster_name)
        .await
        .map(|arns| arns.contains(&descriptor.identifier)),
      ResourceKind::TargetGroup => self
        .cloud
        .target_groups_for_cluster(&self.cfg.cluster_name)
        .await
        .map(|arns| arns.contains(&descriptor.identifier)),
      ResourceKind::SecurityGroup => self
        .cloud
        .security_groups_for_cluster(&self.cfg.cluster_name)
        .await
        .map(|ids| ids.contains(&descriptor.identifier)),
      kind => return Err(ProbeError(format!("{kind} is not probed through the cloud API"))),
    };

    match result {
      Ok(exists) => Ok(exists),
      Err(CloudError::NotFound) => Ok(false),
      Err(CloudError::Api(message)) => Err(ProbeError(message)),
    }
  }
}

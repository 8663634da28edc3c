use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::{
  cloud::{CloudApi, CloudError, CloudResult},
  probe::ResourceProbe,
  resource::{OperationOutcome, ResourceDescriptor, ResourceKind},
  RunConfig,
};

/// Drives a single cloud resource from present to absent
///
/// Each delete is attempted once; the outcome is recorded, never retried, and never
/// propagated as an error to the caller
pub struct ResourceReconciler {
  cfg: RunConfig,
  cloud: Arc<dyn CloudApi>,
  probe: ResourceProbe,
}

impl ResourceReconciler {
  pub fn new(cfg: &RunConfig, cloud: Arc<dyn CloudApi>) -> Self {
    Self {
      cfg: cfg.clone(),
      cloud: cloud.clone(),
      probe: ResourceProbe::new(cfg, cloud),
    }
  }

  /// Delete one resource, returning exactly one outcome
  ///
  /// The probe gates the destructive path: confirmed-absent short-circuits to
  /// `NotFound`, while an indeterminate probe assumes present and deletes anyway
  pub async fn delete(&self, descriptor: &ResourceDescriptor) -> OperationOutcome {
    match self.probe.exists(descriptor).await {
      Ok(false) => return OperationOutcome::not_found(descriptor),
      Ok(true) => debug!("{} {} exists", descriptor.kind, descriptor.identifier),
      Err(err) => warn!(
        "Unable to determine state of {} {}: {err} - attempting delete",
        descriptor.kind, descriptor.identifier
      ),
    }

    let result = match descriptor.kind {
      ResourceKind::KmsAlias => self.delete_kms_alias(&descriptor.identifier).await,
      ResourceKind::LogGroup => self.cloud.delete_log_group(&descriptor.identifier).await,
      ResourceKind::IamRole => self.delete_role(&descriptor.identifier).await,
      ResourceKind::IamPolicy => self.delete_policy(&descriptor.identifier).await,
      ResourceKind::EcrRepo => self.cloud.delete_repository(&descriptor.identifier).await,
      ResourceKind::EfsFilesystem => self.delete_filesystem(&descriptor.identifier).await,
      ResourceKind::LoadBalancer => self.cloud.delete_load_balancer(&descriptor.identifier).await,
      ResourceKind::TargetGroup => self.cloud.delete_target_group(&descriptor.identifier).await,
      ResourceKind::SecurityGroup => self.cloud.delete_security_group(&descriptor.identifier).await,
      kind => return OperationOutcome::skipped(descriptor, format!("{kind} is not handled by the cloud reconciler")),
    };

    match result {
      Ok(()) => OperationOutcome::deleted(descriptor),
      Err(CloudError::NotFound) => OperationOutcome::not_found(descriptor),
      Err(CloudError::Api(message)) => OperationOutcome::failed(descriptor, message),
    }
  }

  /// Delete the alias, then schedule (never force) deletion of the key behind it
  ///
  /// The pending window has a hard floor of 7 days; immediate key deletion is
  /// irreversible and deliberately not reachable from this tool
  async fn delete_kms_alias(&self, alias: &str) -> CloudResult<()> {
    let key_id = match self.cloud.resolve_alias(alias).await? {
      Some(key_id) => key_id,
      None => return Err(CloudError::NotFound),
    };

    self.cloud.delete_alias(alias).await?;

    let window = self.cfg.kms_pending_window_days.max(7);
    match self.cloud.schedule_key_deletion(&key_id, window).await {
      Ok(()) => Ok(()),
      // Alias removal succeeded; a key already pending deletion reports NotFound
      Err(CloudError::NotFound) => Ok(()),
      Err(err) => Err(err),
    }
  }

  /// Detach managed policies and delete inline policies before the role itself
  ///
  /// The fan-out is best-effort: one failed detach must not prevent attempting the
  /// others, and only the final role delete decides the outcome
  async fn delete_role(&self, role: &str) -> CloudResult<()> {
    match self.cloud.list_attached_role_policies(role).await {
      Ok(arns) => {
        for arn in arns {
          if let Err(err) = self.cloud.detach_role_policy(role, &arn).await {
            warn!("Unable to detach {arn} from role {role}: {err}");
          }
        }
      }
      Err(CloudError::NotFound) => return Err(CloudError::NotFound),
      Err(err) => warn!("Unable to list attached policies for role {role}: {err}"),
    }

    match self.cloud.list_inline_role_policies(role).await {
      Ok(names) => {
        for name in names {
          if let Err(err) = self.cloud.delete_inline_role_policy(role, &name).await {
            warn!("Unable to delete inline policy {name} on role {role}: {err}");
          }
        }
      }
      Err(CloudError::NotFound) => return Err(CloudError::NotFound),
      Err(err) => warn!("Unable to list inline policies for role {role}: {err}"),
    }

    self.cloud.delete_role(role).await
  }

  /// Delete non-default policy versions, then the policy itself
  async fn delete_policy(&self, arn: &str) -> CloudResult<()> {
    match self.cloud.list_policy_versions(arn).await {
      Ok(versions) => {
        for version in versions {
          if let Err(err) = self.cloud.delete_policy_version(arn, &version).await {
            warn!("Unable to delete version {version} of policy {arn}: {err}");
          }
        }
      }
      Err(CloudError::NotFound) => return Err(CloudError::NotFound),
      Err(err) => warn!("Unable to list versions of policy {arn}: {err}"),
    }

    self.cloud.delete_policy(arn).await
  }

  /// Remove mount targets, wait for their asynchronous teardown, then delete the filesystem
  ///
  /// EFS rejects filesystem deletion while any mount target remains, so the delete is
  /// only attempted once the list reads empty; if the bound is exceeded the resource is
  /// surfaced as failed rather than spun on indefinitely
  async fn delete_filesystem(&self, token: &str) -> CloudResult<()> {
    let filesystem_id = match self.cloud.filesystem_by_token(token).await? {
      Some(id) => id,
      None => return Err(CloudError::NotFound),
    };

    for target in self.cloud.list_mount_targets(&filesystem_id).await? {
      match self.cloud.delete_mount_target(&target).await {
        Ok(()) => debug!("Deleted mount target {target}"),
        Err(CloudError::NotFound) => {}
        Err(err) => warn!("Unable to delete mount target {target}: {err}"),
      }
    }

    let deadline = Instant::now() + self.cfg.mount_target_timeout;
    loop {
      let remaining = self.cloud.list_mount_targets(&filesystem_id).await?;
      if remaining.is_empty() {
        break;
      }
      if Instant::now() >= deadline {
        return Err(CloudError::Api(format!(
          "{} mount targets still present after {:?}",
          remaining.len(),
          self.cfg.mount_target_timeout
        )));
      }
      sleep(self.cfg.poll_interval).await;
    }

    self.cloud.delete_filesystem(&filesystem_id).await
  }
}

/// Resolve the conflict-prone named resources that must be gone before Terraform runs
///
/// Leftover same-named resources from a prior failed run otherwise break Terraform's
/// create-before-replace logic. Prefix-based kinds are resolved against the live
/// account; a failed discovery degrades to a no-op for that kind
pub async fn discover_conflict_resources(cfg: &RunConfig, cloud: &Arc<dyn CloudApi>) -> Vec<ResourceDescriptor> {
  let mut descriptors = vec![ResourceDescriptor::new(ResourceKind::KmsAlias, cfg.kms_alias(), &cfg.region)];

  match cloud.list_log_groups(&cfg.log_group_prefix()).await {
    Ok(groups) => descriptors.extend(
      groups
        .into_iter()
        .map(|g| ResourceDescriptor::new(ResourceKind::LogGroup, g, &cfg.region)),
    ),
    Err(err) => warn!("Unable to list log groups under {}: {err}", cfg.log_group_prefix()),
  }

  for prefix in cfg.iam_prefixes() {
    match cloud.list_roles(&prefix).await {
      Ok(roles) => descriptors.extend(
        roles
          .into_iter()
          .map(|r| ResourceDescriptor::new(ResourceKind::IamRole, r, &cfg.region)),
      ),
      Err(err) => warn!("Unable to list roles with prefix {prefix}: {err}"),
    }
    match cloud.list_policies(&prefix).await {
      Ok(policies) => descriptors.extend(
        policies
          .into_iter()
          .map(|(_, arn)| ResourceDescriptor::new(ResourceKind::IamPolicy, arn, &cfg.region)),
      ),
      Err(err) => warn!("Unable to list policies with prefix {prefix}: {err}"),
    }
  }

  descriptors.extend(
    cfg
      .ecr_repositories
      .iter()
      .map(|repo| ResourceDescriptor::new(ResourceKind::EcrRepo, repo, &cfg.region)),
  );
  descriptors.push(ResourceDescriptor::new(
    ResourceKind::EfsFilesystem,
    &cfg.efs_creation_token,
    &cfg.region,
  ));

  descriptors
}

/// Resolve load balancers, target groups, and security groups tagged to the cluster
///
/// These are created by in-cluster controllers after the VPC exists and must be gone
/// before the VPC module destroy
pub async fn discover_tagged_resources(cfg: &RunConfig, cloud: &Arc<dyn CloudApi>) -> Vec<ResourceDescriptor> {
  let mut descriptors = Vec::new();

  match cloud.load_balancers_for_cluster(&cfg.cluster_name).await {
    Ok(arns) => descriptors.extend(
      arns
        .into_iter()
        .map(|arn| ResourceDescriptor::new(ResourceKind::LoadBalancer, arn, &cfg.region)),
    ),
    Err(err) => warn!("Unable to list load balancers for {}: {err}", cfg.cluster_name),
  }
  match cloud.target_groups_for_cluster(&cfg.cluster_name).await {
    Ok(arns) => descriptors.extend(
      arns
        .into_iter()
        .map(|arn| ResourceDescriptor::new(ResourceKind::TargetGroup, arn, &cfg.region)),
    ),
    Err(err) => warn!("Unable to list target groups for {}: {err}", cfg.cluster_name),
  }
  match cloud.security_groups_for_cluster(&cfg.cluster_name).await {
    Ok(ids) => descriptors.extend(
      ids
        .into_iter()
        .map(|id| ResourceDescriptor::new(ResourceKind::SecurityGroup, id, &cfg.region)),
    ),
    Err(err) => warn!("Unable to list security groups for {}: {err}", cfg.cluster_name),
  }

  descriptors
}

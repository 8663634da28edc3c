use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ec2::types::Filter;
use aws_sdk_iam::types::PolicyScopeType;
use thiserror::Error;

/// Tag applied by the AWS load balancer controller to ELBv2 resources it owns
const ELB_CLUSTER_TAG: &str = "elbv2.k8s.aws/cluster";

/// Kubernetes cluster-ownership tag carried by security groups created for the cluster
fn cluster_ownership_tag(cluster_name: &str) -> String {
  format!("kubernetes.io/cluster/{cluster_name}")
}

/// Error surfaced by the cloud facade
///
/// `NotFound` is benign on idempotent re-runs; `Api` carries the service message
/// verbatim so it can be reported for operator follow-up
#[derive(Debug, Error)]
pub enum CloudError {
  #[error("not found")]
  NotFound,
  #[error("{0}")]
  Api(String),
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Facade over the AWS service clients used during teardown
///
/// Everything destructive lives behind this trait so the reconcilers and orchestrator
/// can be exercised against a recording fake
#[async_trait]
pub trait CloudApi: Send + Sync {
  // --- identity ---

  async fn caller_account(&self) -> CloudResult<String>;

  // --- EKS ---

  async fn cluster_exists(&self, name: &str) -> CloudResult<bool>;

  // --- KMS ---

  /// Resolve an alias to the key ID it points at
  async fn resolve_alias(&self, alias: &str) -> CloudResult<Option<String>>;
  async fn delete_alias(&self, alias: &str) -> CloudResult<()>;
  /// Schedule key deletion with a pending window; immediate deletion is never exposed
  async fn schedule_key_deletion(&self, key_id: &str, pending_window_days: i32) -> CloudResult<()>;

  // --- CloudWatch Logs ---

  async fn list_log_groups(&self, prefix: &str) -> CloudResult<Vec<String>>;
  async fn log_group_exists(&self, name: &str) -> CloudResult<bool>;
  async fn delete_log_group(&self, name: &str) -> CloudResult<()>;

  // --- IAM ---

  async fn list_roles(&self, prefix: &str) -> CloudResult<Vec<String>>;
  async fn role_exists(&self, name: &str) -> CloudResult<bool>;
  /// ARNs of managed policies attached to the role
  async fn list_attached_role_policies(&self, role: &str) -> CloudResult<Vec<String>>;
  async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()>;
  async fn list_inline_role_policies(&self, role: &str) -> CloudResult<Vec<String>>;
  async fn delete_inline_role_policy(&self, role: &str, policy_name: &str) -> CloudResult<()>;
  async fn delete_role(&self, role: &str) -> CloudResult<()>;
  /// Customer-managed policies whose name starts with the prefix, as (name, arn)
  async fn list_policies(&self, prefix: &str) -> CloudResult<Vec<(String, String)>>;
  async fn policy_exists(&self, arn: &str) -> CloudResult<bool>;
  /// Non-default version IDs of the policy; the default version is removed with the policy
  async fn list_policy_versions(&self, arn: &str) -> CloudResult<Vec<String>>;
  async fn delete_policy_version(&self, arn: &str, version_id: &str) -> CloudResult<()>;
  async fn delete_policy(&self, arn: &str) -> CloudResult<()>;

  // --- ECR ---

  async fn repository_exists(&self, name: &str) -> CloudResult<bool>;
  /// Force-delete: repository and all contained images in one call
  async fn delete_repository(&self, name: &str) -> CloudResult<()>;

  // --- EFS ---

  /// Resolve a filesystem by creation token; the ID is not persisted outside Terraform state
  async fn filesystem_by_token(&self, token: &str) -> CloudResult<Option<String>>;
  async fn list_mount_targets(&self, filesystem_id: &str) -> CloudResult<Vec<String>>;
  async fn delete_mount_target(&self, mount_target_id: &str) -> CloudResult<()>;
  async fn delete_filesystem(&self, filesystem_id: &str) -> CloudResult<()>;

  // --- ELBv2 / EC2 ---

  /// ARNs of load balancers tagged as owned by the cluster
  async fn load_balancers_for_cluster(&self, cluster_name: &str) -> CloudResult<Vec<String>>;
  async fn delete_load_balancer(&self, arn: &str) -> CloudResult<()>;
  /// ARNs of target groups tagged as owned by the cluster
  async fn target_groups_for_cluster(&self, cluster_name: &str) -> CloudResult<Vec<String>>;
  async fn delete_target_group(&self, arn: &str) -> CloudResult<()>;
  /// IDs of security groups carrying the cluster-ownership tag
  async fn security_groups_for_cluster(&self, cluster_name: &str) -> CloudResult<Vec<String>>;
  async fn delete_security_group(&self, group_id: &str) -> CloudResult<()>;
}

/// Production implementation backed by one SDK client per service
pub struct AwsCloud {
  sts: aws_sdk_sts::Client,
  eks: aws_sdk_eks::Client,
  kms: aws_sdk_kms::Client,
  logs: aws_sdk_cloudwatchlogs::Client,
  iam: aws_sdk_iam::Client,
  ecr: aws_sdk_ecr::Client,
  efs: aws_sdk_efs::Client,
  elb: aws_sdk_elasticloadbalancingv2::Client,
  ec2: aws_sdk_ec2::Client,
}

impl AwsCloud {
  pub fn new(config: &SdkConfig) -> Self {
    Self {
      sts: aws_sdk_sts::Client::new(config),
      eks: aws_sdk_eks::Client::new(config),
      kms: aws_sdk_kms::Client::new(config),
      logs: aws_sdk_cloudwatchlogs::Client::new(config),
      iam: aws_sdk_iam::Client::new(config),
      ecr: aws_sdk_ecr::Client::new(config),
      efs: aws_sdk_efs::Client::new(config),
      elb: aws_sdk_elasticloadbalancingv2::Client::new(config),
      ec2: aws_sdk_ec2::Client::new(config),
    }
  }
}

#[async_trait]
impl CloudApi for AwsCloud {
  async fn caller_account(&self) -> CloudResult<String> {
    match self.sts.get_caller_identity().send().await {
      Ok(identity) => identity
        .account()
        .map(ToString::to_string)
        .ok_or_else(|| CloudError::Api("caller identity returned no account".to_string())),
      Err(err) => Err(CloudError::Api(err.into_service_error().to_string())),
    }
  }

  async fn cluster_exists(&self, name: &str) -> CloudResult<bool> {
    match self.eks.describe_cluster().name(name).send().await {
      Ok(response) => Ok(response.cluster.is_some()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_resource_not_found_exception() {
          Ok(false)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn resolve_alias(&self, alias: &str) -> CloudResult<Option<String>> {
    let mut pages = self.kms.list_aliases().into_paginator().send();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|err| CloudError::Api(err.into_service_error().to_string()))?;
      for entry in page.aliases() {
        if entry.alias_name() == Some(alias) {
          return Ok(entry.target_key_id().map(ToString::to_string));
        }
      }
    }
    Ok(None)
  }

  async fn delete_alias(&self, alias: &str) -> CloudResult<()> {
    match self.kms.delete_alias().alias_name(alias).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_not_found_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn schedule_key_deletion(&self, key_id: &str, pending_window_days: i32) -> CloudResult<()> {
    match self
      .kms
      .schedule_key_deletion()
      .key_id(key_id)
      .pending_window_in_days(pending_window_days)
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_not_found_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn list_log_groups(&self, prefix: &str) -> CloudResult<Vec<String>> {
    let mut groups = Vec::new();
    let mut pages = self
      .logs
      .describe_log_groups()
      .log_group_name_prefix(prefix)
      .into_paginator()
      .send();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|err| CloudError::Api(err.into_service_error().to_string()))?;
      groups.extend(page.log_groups().iter().filter_map(|g| g.log_group_name().map(ToString::to_string)));
    }
    Ok(groups)
  }

  async fn log_group_exists(&self, name: &str) -> CloudResult<bool> {
    Ok(self.list_log_groups(name).await?.iter().any(|g| g == name))
  }

  async fn delete_log_group(&self, name: &str) -> CloudResult<()> {
    match self.logs.delete_log_group().log_group_name(name).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_resource_not_found_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn list_roles(&self, prefix: &str) -> CloudResult<Vec<String>> {
    let mut roles = Vec::new();
    let mut pages = self.iam.list_roles().into_paginator().send();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|err| CloudError::Api(err.into_service_error().to_string()))?;
      roles.extend(
        page
          .roles()
          .iter()
          .map(|r| r.role_name().to_string())
          .filter(|name| name.starts_with(prefix)),
      );
    }
    Ok(roles)
  }

  async fn role_exists(&self, name: &str) -> CloudResult<bool> {
    match self.iam.get_role().role_name(name).send().await {
      Ok(_) => Ok(true),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Ok(false)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn list_attached_role_policies(&self, role: &str) -> CloudResult<Vec<String>> {
    match self.iam.list_attached_role_policies().role_name(role).send().await {
      Ok(response) => Ok(
        response
          .attached_policies()
          .iter()
          .filter_map(|p| p.policy_arn().map(ToString::to_string))
          .collect(),
      ),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()> {
    match self
      .iam
      .detach_role_policy()
      .role_name(role)
      .policy_arn(policy_arn)
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn list_inline_role_policies(&self, role: &str) -> CloudResult<Vec<String>> {
    match self.iam.list_role_policies().role_name(role).send().await {
      Ok(response) => Ok(response.policy_names().to_vec()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn delete_inline_role_policy(&self, role: &str, policy_name: &str) -> CloudResult<()> {
    match self
      .iam
      .delete_role_policy()
      .role_name(role)
      .policy_name(policy_name)
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn delete_role(&self, role: &str) -> CloudResult<()> {
    match self.iam.delete_role().role_name(role).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn list_policies(&self, prefix: &str) -> CloudResult<Vec<(String, String)>> {
    let mut policies = Vec::new();
    let mut pages = self
      .iam
      .list_policies()
      .scope(PolicyScopeType::Local)
      .into_paginator()
      .send();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|err| CloudError::Api(err.into_service_error().to_string()))?;
      for policy in page.policies() {
        if let (Some(name), Some(arn)) = (policy.policy_name(), policy.arn()) {
          if name.starts_with(prefix) {
            policies.push((name.to_string(), arn.to_string()));
          }
        }
      }
    }
    Ok(policies)
  }

  async fn policy_exists(&self, arn: &str) -> CloudResult<bool> {
    match self.iam.get_policy().policy_arn(arn).send().await {
      Ok(_) => Ok(true),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Ok(false)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn list_policy_versions(&self, arn: &str) -> CloudResult<Vec<String>> {
    match self.iam.list_policy_versions().policy_arn(arn).send().await {
      Ok(response) => Ok(
        response
          .versions()
          .iter()
          .filter(|v| !v.is_default_version())
          .filter_map(|v| v.version_id().map(ToString::to_string))
          .collect(),
      ),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn delete_policy_version(&self, arn: &str, version_id: &str) -> CloudResult<()> {
    match self
      .iam
      .delete_policy_version()
      .policy_arn(arn)
      .version_id(version_id)
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn delete_policy(&self, arn: &str) -> CloudResult<()> {
    match self.iam.delete_policy().policy_arn(arn).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_no_such_entity_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn repository_exists(&self, name: &str) -> CloudResult<bool> {
    match self.ecr.describe_repositories().repository_names(name).send().await {
      Ok(_) => Ok(true),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_repository_not_found_exception() {
          Ok(false)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn delete_repository(&self, name: &str) -> CloudResult<()> {
    match self.ecr.delete_repository().repository_name(name).force(true).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_repository_not_found_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn filesystem_by_token(&self, token: &str) -> CloudResult<Option<String>> {
    match self.efs.describe_file_systems().creation_token(token).send().await {
      Ok(response) => Ok(response.file_systems().first().map(|fs| fs.file_system_id().to_string())),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_file_system_not_found() {
          Ok(None)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn list_mount_targets(&self, filesystem_id: &str) -> CloudResult<Vec<String>> {
    match self.efs.describe_mount_targets().file_system_id(filesystem_id).send().await {
      Ok(response) => Ok(
        response
          .mount_targets()
          .iter()
          .map(|mt| mt.mount_target_id().to_string())
          .collect(),
      ),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_file_system_not_found() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn delete_mount_target(&self, mount_target_id: &str) -> CloudResult<()> {
    match self.efs.delete_mount_target().mount_target_id(mount_target_id).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_mount_target_not_found() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn delete_filesystem(&self, filesystem_id: &str) -> CloudResult<()> {
    match self.efs.delete_file_system().file_system_id(filesystem_id).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_file_system_not_found() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn load_balancers_for_cluster(&self, cluster_name: &str) -> CloudResult<Vec<String>> {
    let mut arns = Vec::new();
    let mut pages = self.elb.describe_load_balancers().into_paginator().send();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|err| CloudError::Api(err.into_service_error().to_string()))?;
      arns.extend(
        page
          .load_balancers()
          .iter()
          .filter_map(|lb| lb.load_balancer_arn().map(ToString::to_string)),
      );
    }
    self.filter_elb_arns_by_cluster(arns, cluster_name).await
  }

  async fn delete_load_balancer(&self, arn: &str) -> CloudResult<()> {
    match self.elb.delete_load_balancer().load_balancer_arn(arn).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.is_load_balancer_not_found_exception() {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn target_groups_for_cluster(&self, cluster_name: &str) -> CloudResult<Vec<String>> {
    let mut arns = Vec::new();
    let mut pages = self.elb.describe_target_groups().into_paginator().send();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|err| CloudError::Api(err.into_service_error().to_string()))?;
      arns.extend(
        page
          .target_groups()
          .iter()
          .filter_map(|tg| tg.target_group_arn().map(ToString::to_string)),
      );
    }
    self.filter_elb_arns_by_cluster(arns, cluster_name).await
  }

  async fn delete_target_group(&self, arn: &str) -> CloudResult<()> {
    match self.elb.delete_target_group().target_group_arn(arn).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.meta().code() == Some("TargetGroupNotFound") {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }

  async fn security_groups_for_cluster(&self, cluster_name: &str) -> CloudResult<Vec<String>> {
    let filter = Filter::builder()
      .name("tag-key")
      .values(cluster_ownership_tag(cluster_name))
      .build();
    match self.ec2.describe_security_groups().filters(filter).send().await {
      Ok(response) => Ok(
        response
          .security_groups()
          .iter()
          // The VPC default group carries the tag in some configurations but cannot be deleted
          .filter(|sg| sg.group_name() != Some("default"))
          .filter_map(|sg| sg.group_id().map(ToString::to_string))
          .collect(),
      ),
      Err(err) => Err(CloudError::Api(err.into_service_error().to_string())),
    }
  }

  async fn delete_security_group(&self, group_id: &str) -> CloudResult<()> {
    match self.ec2.delete_security_group().group_id(group_id).send().await {
      Ok(_) => Ok(()),
      Err(err) => {
        let err = err.into_service_error();
        if err.meta().code() == Some("InvalidGroup.NotFound") {
          Err(CloudError::NotFound)
        } else {
          Err(CloudError::Api(err.to_string()))
        }
      }
    }
  }
}

impl AwsCloud {
  /// Keep only the ARNs tagged as owned by the cluster; tags are fetched in the
  /// batches of 20 the DescribeTags API allows
  async fn filter_elb_arns_by_cluster(&self, arns: Vec<String>, cluster_name: &str) -> CloudResult<Vec<String>> {
    let mut owned = Vec::new();
    for chunk in arns.chunks(20) {
      let response = self
        .elb
        .describe_tags()
        .set_resource_arns(Some(chunk.to_vec()))
        .send()
        .await
        .map_err(|err| CloudError::Api(err.into_service_error().to_string()))?;
      for description in response.tag_descriptions() {
        let is_owned = description
          .tags()
          .iter()
          .any(|tag| tag.key() == Some(ELB_CLUSTER_TAG) && tag.value() == Some(cluster_name));
        if is_owned {
          if let Some(arn) = description.resource_arn() {
            owned.push(arn.to_string());
          }
        }
      }
    }
    Ok(owned)
  }
}

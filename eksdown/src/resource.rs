use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace the inference platform is deployed into
pub const DEFAULT_NAMESPACE: &str = "inference";

/// Namespace the GitOps controller runs in
pub const DEFAULT_ARGO_NAMESPACE: &str = "argocd";

/// GitOps Application objects deployed by the install flow
pub const DEFAULT_APPLICATIONS: &[&str] = &["inference-platform", "inference-infra"];

/// API group of the platform operator's custom resource definitions
pub const DEFAULT_CRD_GROUP: &str = "nvidia.com";

/// ECR repositories created by the image build pipeline
///
/// These are fixed names, not derived from the cluster name, because the registry is
/// shared across clusters in the same account
pub const DEFAULT_ECR_REPOSITORIES: &[&str] = &["inference-operator", "inference-runtime"];

/// Creation token used when the shared model-cache filesystem is provisioned
///
/// The filesystem is resolved by token rather than by ID since the ID only lives in
/// Terraform state, which may already be gone on a re-run
pub const DEFAULT_EFS_CREATION_TOKEN: &str = "inference-model-cache";

/// Terraform modules destroyed before the tagged load balancer/security group sweep
///
/// The order matters: addons hold references into the cluster, and the cluster holds
/// references into the VPC
pub const MODULE_DESTROY_ORDER: &[&str] = &["data_addons", "eks_blueprints_addons", "eks"];

/// The networking module, destroyed after controller-created load balancers and
/// security groups have been removed
pub const VPC_MODULE: &str = "vpc";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
  Cluster,
  KmsAlias,
  LogGroup,
  IamRole,
  IamPolicy,
  EcrRepo,
  EfsFilesystem,
  LoadBalancer,
  TargetGroup,
  SecurityGroup,
  HelmRelease,
  ArgoApplication,
  K8sNamespace,
  CustomResource,
  CustomResourceDefinition,
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ResourceKind::Cluster => "cluster",
      ResourceKind::KmsAlias => "KMS alias",
      ResourceKind::LogGroup => "log group",
      ResourceKind::IamRole => "IAM role",
      ResourceKind::IamPolicy => "IAM policy",
      ResourceKind::EcrRepo => "ECR repository",
      ResourceKind::EfsFilesystem => "EFS filesystem",
      ResourceKind::LoadBalancer => "load balancer",
      ResourceKind::TargetGroup => "target group",
      ResourceKind::SecurityGroup => "security group",
      ResourceKind::HelmRelease => "Helm release",
      ResourceKind::ArgoApplication => "Application",
      ResourceKind::K8sNamespace => "namespace",
      ResourceKind::CustomResource => "custom resource",
      ResourceKind::CustomResourceDefinition => "CRD",
    };
    write!(f, "{name}")
  }
}

/// Identifies one deletable unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
  pub kind: ResourceKind,
  pub identifier: String,
  pub region: String,
}

impl ResourceDescriptor {
  pub fn new(kind: ResourceKind, identifier: impl Into<String>, region: &str) -> Self {
    Self {
      kind,
      identifier: identifier.into(),
      region: region.to_string(),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
  Deleted,
  NotFound,
  Failed,
  Skipped,
}

/// Result of driving one resource toward absent
///
/// Exactly one outcome is produced per processed resource per run, appended in
/// processing order and never mutated afterwards
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationOutcome {
  pub resource: ResourceDescriptor,
  pub status: OutcomeStatus,
  pub detail: String,
}

impl OperationOutcome {
  pub fn deleted(resource: &ResourceDescriptor) -> Self {
    Self {
      resource: resource.clone(),
      status: OutcomeStatus::Deleted,
      detail: String::new(),
    }
  }

  pub fn deleted_with(resource: &ResourceDescriptor, detail: impl Into<String>) -> Self {
    Self {
      resource: resource.clone(),
      status: OutcomeStatus::Deleted,
      detail: detail.into(),
    }
  }

  pub fn not_found(resource: &ResourceDescriptor) -> Self {
    Self {
      resource: resource.clone(),
      status: OutcomeStatus::NotFound,
      detail: String::new(),
    }
  }

  pub fn failed(resource: &ResourceDescriptor, detail: impl Into<String>) -> Self {
    Self {
      resource: resource.clone(),
      status: OutcomeStatus::Failed,
      detail: detail.into(),
    }
  }

  pub fn skipped(resource: &ResourceDescriptor, detail: impl Into<String>) -> Self {
    Self {
      resource: resource.clone(),
      status: OutcomeStatus::Skipped,
      detail: detail.into(),
    }
  }
}

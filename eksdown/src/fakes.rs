//! Call-recording fakes shared by the reconciler, drain, and orchestrator tests
//!
//! Each fake appends a `name:arg` line to a shared call log so tests can assert
//! cross-component ordering, and mutates its own state so idempotence (delete twice,
//! probe after delete) behaves like the real services.

use std::{
  collections::{HashMap, HashSet},
  path::PathBuf,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  },
  time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::{
  cloud::{CloudApi, CloudError, CloudResult},
  cluster::{ClusterApi, ClusterConnector, ClusterError, ClusterResult},
  helm::{HelmCli, HelmRelease, UninstallStatus},
  terraform::{ModuleDestroy, Terraform},
  RunConfig,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn test_config() -> RunConfig {
  RunConfig {
    cluster_name: "prod-inference".to_string(),
    region: "us-west-2".to_string(),
    namespace: "inference".to_string(),
    argo_namespace: "argocd".to_string(),
    applications: vec!["inference-platform".to_string(), "inference-infra".to_string()],
    crd_group: "nvidia.com".to_string(),
    release_filter: "inference".to_string(),
    ecr_repositories: vec!["inference-operator".to_string(), "inference-runtime".to_string()],
    efs_creation_token: "inference-model-cache".to_string(),
    terraform_dir: PathBuf::from("/tmp/terraform"),
    artifacts: vec![],
    kms_pending_window_days: 7,
    drain_timeout: Duration::from_millis(40),
    mount_target_timeout: Duration::from_millis(40),
    poll_interval: Duration::from_millis(5),
  }
}

#[derive(Default)]
pub struct FakeCloudState {
  /// `None` makes the caller-identity call fail
  pub account: Option<String>,
  pub clusters: HashSet<String>,
  /// alias -> key id
  pub aliases: HashMap<String, String>,
  pub log_groups: HashSet<String>,
  /// role -> (attached policy arns, inline policy names)
  pub roles: HashMap<String, (Vec<String>, Vec<String>)>,
  /// arn -> (name, non-default version ids)
  pub policies: HashMap<String, (String, Vec<String>)>,
  pub repositories: HashSet<String>,
  /// creation token -> filesystem id
  pub filesystems: HashMap<String, String>,
  /// filesystem id -> mount target ids
  pub mount_targets: HashMap<String, Vec<String>>,
  pub load_balancers: Vec<String>,
  pub target_groups: Vec<String>,
  pub security_groups: Vec<String>,
  /// (key id, pending window days) recorded by schedule_key_deletion
  pub scheduled_deletions: Vec<(String, i32)>,
  /// identifiers whose delete call fails
  pub fail_deletes: HashSet<String>,
  /// policy arns whose detach call fails
  pub fail_detaches: HashSet<String>,
  /// make every read-only call fail, simulating a credential/network problem
  pub fail_probes: bool,
  /// mount target deletes are accepted but never complete
  pub stuck_mount_targets: bool,
  /// set when a filesystem delete was attempted while mount targets remained
  pub filesystem_deleted_with_targets: bool,
}

pub struct FakeCloud {
  pub calls: CallLog,
  pub state: Mutex<FakeCloudState>,
}

impl FakeCloud {
  pub fn new() -> Self {
    Self::with_log(Arc::new(Mutex::new(Vec::new())))
  }

  pub fn with_log(calls: CallLog) -> Self {
    Self {
      calls,
      state: Mutex::default(),
    }
  }

  fn record(&self, call: impl Into<String>) {
    self.calls.lock().unwrap().push(call.into());
  }

  fn probe_guard(&self) -> CloudResult<()> {
    if self.state.lock().unwrap().fail_probes {
      Err(CloudError::Api("simulated probe failure".to_string()))
    } else {
      Ok(())
    }
  }

  fn fail_delete_guard(&self, identifier: &str) -> CloudResult<()> {
    if self.state.lock().unwrap().fail_deletes.contains(identifier) {
      Err(CloudError::Api(format!("simulated failure: {identifier}")))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl CloudApi for FakeCloud {
  async fn caller_account(&self) -> CloudResult<String> {
    self.record("caller_account");
    self
      .state
      .lock()
      .unwrap()
      .account
      .clone()
      .ok_or_else(|| CloudError::Api("unable to resolve caller identity".to_string()))
  }

  async fn cluster_exists(&self, name: &str) -> CloudResult<bool> {
    self.record(format!("cluster_exists:{name}"));
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().clusters.contains(name))
  }

  async fn resolve_alias(&self, alias: &str) -> CloudResult<Option<String>> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().aliases.get(alias).cloned())
  }

  async fn delete_alias(&self, alias: &str) -> CloudResult<()> {
    self.record(format!("delete_alias:{alias}"));
    self.fail_delete_guard(alias)?;
    match self.state.lock().unwrap().aliases.remove(alias) {
      Some(_) => Ok(()),
      None => Err(CloudError::NotFound),
    }
  }

  async fn schedule_key_deletion(&self, key_id: &str, pending_window_days: i32) -> CloudResult<()> {
    self.record(format!("schedule_key_deletion:{key_id}:{pending_window_days}"));
    self
      .state
      .lock()
      .unwrap()
      .scheduled_deletions
      .push((key_id.to_string(), pending_window_days));
    Ok(())
  }

  async fn list_log_groups(&self, prefix: &str) -> CloudResult<Vec<String>> {
    self.probe_guard()?;
    let mut groups: Vec<String> = self
      .state
      .lock()
      .unwrap()
      .log_groups
      .iter()
      .filter(|g| g.starts_with(prefix))
      .cloned()
      .collect();
    groups.sort();
    Ok(groups)
  }

  async fn log_group_exists(&self, name: &str) -> CloudResult<bool> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().log_groups.contains(name))
  }

  async fn delete_log_group(&self, name: &str) -> CloudResult<()> {
    self.record(format!("delete_log_group:{name}"));
    self.fail_delete_guard(name)?;
    if self.state.lock().unwrap().log_groups.remove(name) {
      Ok(())
    } else {
      Err(CloudError::NotFound)
    }
  }

  async fn list_roles(&self, prefix: &str) -> CloudResult<Vec<String>> {
    self.probe_guard()?;
    let mut roles: Vec<String> = self
      .state
      .lock()
      .unwrap()
      .roles
      .keys()
      .filter(|r| r.starts_with(prefix))
      .cloned()
      .collect();
    roles.sort();
    Ok(roles)
  }

  async fn role_exists(&self, name: &str) -> CloudResult<bool> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().roles.contains_key(name))
  }

  async fn list_attached_role_policies(&self, role: &str) -> CloudResult<Vec<String>> {
    match self.state.lock().unwrap().roles.get(role) {
      Some((attached, _)) => Ok(attached.clone()),
      None => Err(CloudError::NotFound),
    }
  }

  async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()> {
    self.record(format!("detach_role_policy:{role}:{policy_arn}"));
    let mut state = self.state.lock().unwrap();
    if state.fail_detaches.contains(policy_arn) {
      return Err(CloudError::Api(format!("simulated detach failure: {policy_arn}")));
    }
    match state.roles.get_mut(role) {
      Some((attached, _)) => {
        attached.retain(|arn| arn != policy_arn);
        Ok(())
      }
      None => Err(CloudError::NotFound),
    }
  }

  async fn list_inline_role_policies(&self, role: &str) -> CloudResult<Vec<String>> {
    match self.state.lock().unwrap().roles.get(role) {
      Some((_, inline)) => Ok(inline.clone()),
      None => Err(CloudError::NotFound),
    }
  }

  async fn delete_inline_role_policy(&self, role: &str, policy_name: &str) -> CloudResult<()> {
    self.record(format!("delete_inline_role_policy:{role}:{policy_name}"));
    match self.state.lock().unwrap().roles.get_mut(role) {
      Some((_, inline)) => {
        inline.retain(|name| name != policy_name);
        Ok(())
      }
      None => Err(CloudError::NotFound),
    }
  }

  async fn delete_role(&self, role: &str) -> CloudResult<()> {
    self.record(format!("delete_role:{role}"));
    self.fail_delete_guard(role)?;
    match self.state.lock().unwrap().roles.remove(role) {
      Some(_) => Ok(()),
      None => Err(CloudError::NotFound),
    }
  }

  async fn list_policies(&self, prefix: &str) -> CloudResult<Vec<(String, String)>> {
    self.probe_guard()?;
    let mut policies: Vec<(String, String)> = self
      .state
      .lock()
      .unwrap()
      .policies
      .iter()
      .filter(|(_, (name, _))| name.starts_with(prefix))
      .map(|(arn, (name, _))| (name.clone(), arn.clone()))
      .collect();
    policies.sort();
    Ok(policies)
  }

  async fn policy_exists(&self, arn: &str) -> CloudResult<bool> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().policies.contains_key(arn))
  }

  async fn list_policy_versions(&self, arn: &str) -> CloudResult<Vec<String>> {
    match self.state.lock().unwrap().policies.get(arn) {
      Some((_, versions)) => Ok(versions.clone()),
      None => Err(CloudError::NotFound),
    }
  }

  async fn delete_policy_version(&self, arn: &str, version_id: &str) -> CloudResult<()> {
    self.record(format!("delete_policy_version:{arn}:{version_id}"));
    match self.state.lock().unwrap().policies.get_mut(arn) {
      Some((_, versions)) => {
        versions.retain(|v| v != version_id);
        Ok(())
      }
      None => Err(CloudError::NotFound),
    }
  }

  async fn delete_policy(&self, arn: &str) -> CloudResult<()> {
    self.record(format!("delete_policy:{arn}"));
    self.fail_delete_guard(arn)?;
    match self.state.lock().unwrap().policies.remove(arn) {
      Some(_) => Ok(()),
      None => Err(CloudError::NotFound),
    }
  }

  async fn repository_exists(&self, name: &str) -> CloudResult<bool> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().repositories.contains(name))
  }

  async fn delete_repository(&self, name: &str) -> CloudResult<()> {
    self.record(format!("delete_repository:{name}"));
    self.fail_delete_guard(name)?;
    if self.state.lock().unwrap().repositories.remove(name) {
      Ok(())
    } else {
      Err(CloudError::NotFound)
    }
  }

  async fn filesystem_by_token(&self, token: &str) -> CloudResult<Option<String>> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().filesystems.get(token).cloned())
  }

  async fn list_mount_targets(&self, filesystem_id: &str) -> CloudResult<Vec<String>> {
    self.record(format!("list_mount_targets:{filesystem_id}"));
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .mount_targets
        .get(filesystem_id)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn delete_mount_target(&self, mount_target_id: &str) -> CloudResult<()> {
    self.record(format!("delete_mount_target:{mount_target_id}"));
    let mut state = self.state.lock().unwrap();
    if state.stuck_mount_targets {
      // Accepted, but the asynchronous teardown never completes
      return Ok(());
    }
    for targets in state.mount_targets.values_mut() {
      targets.retain(|id| id != mount_target_id);
    }
    Ok(())
  }

  async fn delete_filesystem(&self, filesystem_id: &str) -> CloudResult<()> {
    self.record(format!("delete_filesystem:{filesystem_id}"));
    let mut state = self.state.lock().unwrap();
    let has_targets = state
      .mount_targets
      .get(filesystem_id)
      .map(|targets| !targets.is_empty())
      .unwrap_or(false);
    if has_targets {
      state.filesystem_deleted_with_targets = true;
      return Err(CloudError::Api("filesystem has mount targets".to_string()));
    }
    let token = state
      .filesystems
      .iter()
      .find(|(_, id)| id.as_str() == filesystem_id)
      .map(|(token, _)| token.clone());
    match token {
      Some(token) => {
        state.filesystems.remove(&token);
        Ok(())
      }
      None => Err(CloudError::NotFound),
    }
  }

  async fn load_balancers_for_cluster(&self, _cluster_name: &str) -> CloudResult<Vec<String>> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().load_balancers.clone())
  }

  async fn delete_load_balancer(&self, arn: &str) -> CloudResult<()> {
    self.record(format!("delete_load_balancer:{arn}"));
    self.fail_delete_guard(arn)?;
    let mut state = self.state.lock().unwrap();
    let before = state.load_balancers.len();
    state.load_balancers.retain(|a| a != arn);
    if state.load_balancers.len() < before {
      Ok(())
    } else {
      Err(CloudError::NotFound)
    }
  }

  async fn target_groups_for_cluster(&self, _cluster_name: &str) -> CloudResult<Vec<String>> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().target_groups.clone())
  }

  async fn delete_target_group(&self, arn: &str) -> CloudResult<()> {
    self.record(format!("delete_target_group:{arn}"));
    self.fail_delete_guard(arn)?;
    let mut state = self.state.lock().unwrap();
    let before = state.target_groups.len();
    state.target_groups.retain(|a| a != arn);
    if state.target_groups.len() < before {
      Ok(())
    } else {
      Err(CloudError::NotFound)
    }
  }

  async fn security_groups_for_cluster(&self, _cluster_name: &str) -> CloudResult<Vec<String>> {
    self.probe_guard()?;
    Ok(self.state.lock().unwrap().security_groups.clone())
  }

  async fn delete_security_group(&self, group_id: &str) -> CloudResult<()> {
    self.record(format!("delete_security_group:{group_id}"));
    self.fail_delete_guard(group_id)?;
    let mut state = self.state.lock().unwrap();
    let before = state.security_groups.len();
    state.security_groups.retain(|id| id != group_id);
    if state.security_groups.len() < before {
      Ok(())
    } else {
      Err(CloudError::NotFound)
    }
  }
}

pub struct FakeCrd {
  pub group: String,
  pub instances: Vec<String>,
  /// A stuck CRD stays in Terminating until its finalizers are cleared
  pub stuck: bool,
  pub delete_requested: bool,
  pub finalizers_cleared: bool,
}

impl FakeCrd {
  fn gone(&self) -> bool {
    self.delete_requested && (!self.stuck || self.finalizers_cleared)
  }
}

#[derive(Default)]
pub struct FakeClusterState {
  /// (namespace, name)
  pub applications: HashSet<(String, String)>,
  pub namespaces: HashSet<String>,
  /// Namespaces that accept deletion but never leave Terminating
  pub stuck_namespaces: HashSet<String>,
  pub crds: HashMap<String, FakeCrd>,
}

pub struct FakeCluster {
  pub calls: CallLog,
  pub state: Mutex<FakeClusterState>,
}

impl FakeCluster {
  pub fn new() -> Self {
    Self::with_log(Arc::new(Mutex::new(Vec::new())))
  }

  pub fn with_log(calls: CallLog) -> Self {
    Self {
      calls,
      state: Mutex::default(),
    }
  }

  fn record(&self, call: impl Into<String>) {
    self.calls.lock().unwrap().push(call.into());
  }
}

#[async_trait]
impl ClusterApi for FakeCluster {
  async fn delete_application(&self, namespace: &str, name: &str) -> ClusterResult<()> {
    self.record(format!("delete_application:{name}"));
    if self
      .state
      .lock()
      .unwrap()
      .applications
      .remove(&(namespace.to_string(), name.to_string()))
    {
      Ok(())
    } else {
      Err(ClusterError::NotFound)
    }
  }

  async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
    self.record(format!("delete_namespace:{name}"));
    let mut state = self.state.lock().unwrap();
    if state.namespaces.remove(name) || state.stuck_namespaces.contains(name) {
      Ok(())
    } else {
      Err(ClusterError::NotFound)
    }
  }

  async fn namespace_exists(&self, name: &str) -> ClusterResult<bool> {
    let state = self.state.lock().unwrap();
    Ok(state.namespaces.contains(name) || state.stuck_namespaces.contains(name))
  }

  async fn list_crds_in_group(&self, group: &str) -> ClusterResult<Vec<String>> {
    let mut names: Vec<String> = self
      .state
      .lock()
      .unwrap()
      .crds
      .iter()
      .filter(|(_, crd)| crd.group == group && !crd.gone())
      .map(|(name, _)| name.clone())
      .collect();
    names.sort();
    Ok(names)
  }

  async fn list_instances(&self, crd_name: &str) -> ClusterResult<Vec<String>> {
    match self.state.lock().unwrap().crds.get(crd_name) {
      Some(crd) => Ok(crd.instances.clone()),
      None => Err(ClusterError::NotFound),
    }
  }

  async fn delete_instance(&self, crd_name: &str, instance: &str) -> ClusterResult<()> {
    self.record(format!("delete_instance:{crd_name}:{instance}"));
    match self.state.lock().unwrap().crds.get_mut(crd_name) {
      Some(crd) => {
        let before = crd.instances.len();
        crd.instances.retain(|i| i != instance);
        if crd.instances.len() < before {
          Ok(())
        } else {
          Err(ClusterError::NotFound)
        }
      }
      None => Err(ClusterError::NotFound),
    }
  }

  async fn delete_crd(&self, name: &str) -> ClusterResult<()> {
    self.record(format!("delete_crd:{name}"));
    match self.state.lock().unwrap().crds.get_mut(name) {
      Some(crd) if !crd.gone() => {
        crd.delete_requested = true;
        Ok(())
      }
      _ => Err(ClusterError::NotFound),
    }
  }

  async fn crd_exists(&self, name: &str) -> ClusterResult<bool> {
    match self.state.lock().unwrap().crds.get(name) {
      Some(crd) => Ok(!crd.gone()),
      None => Ok(false),
    }
  }

  async fn clear_crd_finalizers(&self, name: &str) -> ClusterResult<()> {
    self.record(format!("clear_crd_finalizers:{name}"));
    match self.state.lock().unwrap().crds.get_mut(name) {
      Some(crd) => {
        crd.finalizers_cleared = true;
        Ok(())
      }
      None => Err(ClusterError::NotFound),
    }
  }
}

pub struct FakeConnector {
  pub cluster: Option<Arc<dyn ClusterApi>>,
}

#[async_trait]
impl ClusterConnector for FakeConnector {
  async fn connect(&self) -> Option<Arc<dyn ClusterApi>> {
    self.cluster.clone()
  }
}

pub struct FakeHelm {
  pub calls: CallLog,
  pub releases: Mutex<Vec<HelmRelease>>,
}

impl FakeHelm {
  pub fn new() -> Self {
    Self::with_log(Arc::new(Mutex::new(Vec::new())))
  }

  pub fn with_log(calls: CallLog) -> Self {
    Self {
      calls,
      releases: Mutex::new(Vec::new()),
    }
  }
}

impl HelmCli for FakeHelm {
  fn list(&self) -> Result<Vec<HelmRelease>> {
    Ok(self.releases.lock().unwrap().clone())
  }

  fn uninstall(&self, release: &HelmRelease) -> UninstallStatus {
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("helm_uninstall:{}/{}", release.namespace, release.name));
    let mut releases = self.releases.lock().unwrap();
    let before = releases.len();
    releases.retain(|r| r != release);
    if releases.len() < before {
      UninstallStatus::Uninstalled
    } else {
      UninstallStatus::NotFound
    }
  }
}

pub struct FakeTerraform {
  pub calls: CallLog,
  pub init_fails: AtomicBool,
  /// Modules whose destroy runs but never prints the completion line
  pub unmarked_modules: Mutex<HashSet<String>>,
}

impl FakeTerraform {
  pub fn with_log(calls: CallLog) -> Self {
    Self {
      calls,
      init_fails: AtomicBool::new(false),
      unmarked_modules: Mutex::new(HashSet::new()),
    }
  }

  fn record(&self, call: impl Into<String>) {
    self.calls.lock().unwrap().push(call.into());
  }
}

impl Terraform for FakeTerraform {
  fn init(&self) -> Result<()> {
    self.record("terraform_init");
    if self.init_fails.load(Ordering::SeqCst) {
      bail!("Initializing the backend... Error: Failed to get existing workspaces");
    }
    Ok(())
  }

  fn destroy_module(&self, module: &str) -> Result<ModuleDestroy> {
    self.record(format!("terraform_destroy:{module}"));
    let succeeded = !self.unmarked_modules.lock().unwrap().contains(module);
    Ok(ModuleDestroy {
      module: module.to_string(),
      succeeded,
      raw_output: if succeeded {
        "Destroy complete! Resources: 1 destroyed.".to_string()
      } else {
        String::new()
      },
    })
  }

  fn destroy_all(&self) -> Result<ModuleDestroy> {
    self.record("terraform_destroy:all");
    Ok(ModuleDestroy {
      module: "all".to_string(),
      succeeded: true,
      raw_output: "Destroy complete! Resources: 0 destroyed.".to_string(),
    })
  }
}

use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::{
  cluster::{ClusterApi, ClusterError},
  helm::{self, HelmCli, UninstallStatus},
  resource::{OperationOutcome, ResourceDescriptor, ResourceKind},
  RunConfig,
};

/// Removes application-level Kubernetes/GitOps state ahead of the cloud teardown
///
/// Namespace and CRD lifecycle: Present -> Draining -> Absent, with a single
/// StuckFinalizer -> ForceCleared -> Absent escape for CRDs that never finish
/// terminating. There is no transition back to Present.
pub struct ClusterAppReconciler {
  cfg: RunConfig,
  cluster: Arc<dyn ClusterApi>,
  helm: Arc<dyn HelmCli>,
}

impl ClusterAppReconciler {
  pub fn new(cfg: &RunConfig, cluster: Arc<dyn ClusterApi>, helm: Arc<dyn HelmCli>) -> Self {
    Self {
      cfg: cfg.clone(),
      cluster,
      helm,
    }
  }

  /// Drain in order: Applications -> namespace -> CR instances -> Helm releases -> CRDs
  ///
  /// Each step is independently best-effort; a failure is recorded and the next step
  /// still runs
  pub async fn drain(&self) -> Vec<OperationOutcome> {
    let mut outcomes = Vec::new();

    for app in &self.cfg.applications {
      let descriptor = ResourceDescriptor::new(ResourceKind::ArgoApplication, app, &self.cfg.region);
      outcomes.push(match self.cluster.delete_application(&self.cfg.argo_namespace, app).await {
        Ok(()) => OperationOutcome::deleted(&descriptor),
        Err(ClusterError::NotFound) => OperationOutcome::not_found(&descriptor),
        Err(ClusterError::Api(message)) => OperationOutcome::failed(&descriptor, message),
      });
    }

    outcomes.push(self.delete_namespace().await);

    // CR instances are swept across all namespaces: a finalizer-stuck instance can
    // outlive the namespace it was created in
    let crds = match self.cluster.list_crds_in_group(&self.cfg.crd_group).await {
      Ok(crds) => crds,
      Err(err) => {
        warn!("Unable to list CRDs in group {}: {err}", self.cfg.crd_group);
        Vec::new()
      }
    };
    for crd in &crds {
      match self.cluster.list_instances(crd).await {
        Ok(instances) => {
          for instance in instances {
            let descriptor = ResourceDescriptor::new(ResourceKind::CustomResource, &instance, &self.cfg.region);
            outcomes.push(match self.cluster.delete_instance(crd, &instance).await {
              Ok(()) => OperationOutcome::deleted(&descriptor),
              Err(ClusterError::NotFound) => OperationOutcome::not_found(&descriptor),
              Err(ClusterError::Api(message)) => OperationOutcome::failed(&descriptor, message),
            });
          }
        }
        Err(ClusterError::NotFound) => {}
        Err(err) => warn!("Unable to list instances of {crd}: {err}"),
      }
    }

    match self.helm.list() {
      Ok(releases) => {
        for release in releases
          .iter()
          .filter(|r| helm::matches(r, &self.cfg.release_filter, &self.cfg.namespace))
        {
          let descriptor = ResourceDescriptor::new(
            ResourceKind::HelmRelease,
            format!("{}/{}", release.namespace, release.name),
            &self.cfg.region,
          );
          outcomes.push(match self.helm.uninstall(release) {
            UninstallStatus::Uninstalled => OperationOutcome::deleted(&descriptor),
            UninstallStatus::NotFound => OperationOutcome::not_found(&descriptor),
            UninstallStatus::Failed(message) => OperationOutcome::failed(&descriptor, message),
          });
        }
      }
      Err(err) => warn!("Unable to list Helm releases: {err}"),
    }

    for crd in &crds {
      outcomes.push(self.delete_crd(crd).await);
    }

    outcomes
  }

  async fn delete_namespace(&self) -> OperationOutcome {
    let descriptor = ResourceDescriptor::new(ResourceKind::K8sNamespace, &self.cfg.namespace, &self.cfg.region);
    match self.cluster.delete_namespace(&self.cfg.namespace).await {
      Ok(()) => {}
      Err(ClusterError::NotFound) => return OperationOutcome::not_found(&descriptor),
      Err(ClusterError::Api(message)) => return OperationOutcome::failed(&descriptor, message),
    }

    // Deletion cascades asynchronously; wait bounded for the namespace to leave Terminating
    let deadline = Instant::now() + self.cfg.drain_timeout;
    loop {
      match self.cluster.namespace_exists(&self.cfg.namespace).await {
        Ok(false) => return OperationOutcome::deleted(&descriptor),
        Ok(true) => {}
        Err(err) => warn!("Unable to check namespace {}: {err}", self.cfg.namespace),
      }
      if Instant::now() >= deadline {
        return OperationOutcome::failed(
          &descriptor,
          format!("deletion timed out after {:?} waiting on finalizers", self.cfg.drain_timeout),
        );
      }
      sleep(self.cfg.poll_interval).await;
    }
  }

  /// Delete a CRD, escaping a stuck-finalizer state at most once
  async fn delete_crd(&self, name: &str) -> OperationOutcome {
    let descriptor = ResourceDescriptor::new(ResourceKind::CustomResourceDefinition, name, &self.cfg.region);
    match self.cluster.delete_crd(name).await {
      Ok(()) => {}
      Err(ClusterError::NotFound) => return OperationOutcome::not_found(&descriptor),
      Err(ClusterError::Api(message)) => return OperationOutcome::failed(&descriptor, message),
    }

    if self.wait_crd_gone(name).await {
      return OperationOutcome::deleted(&descriptor);
    }

    // Last resort for a finalizer no controller will ever acknowledge
    info!("CRD {name} stuck terminating - clearing finalizers");
    if let Err(err) = self.cluster.clear_crd_finalizers(name).await {
      return OperationOutcome::failed(&descriptor, format!("stuck terminating and finalizer clear failed: {err}"));
    }
    match self.cluster.delete_crd(name).await {
      Ok(()) | Err(ClusterError::NotFound) => {}
      Err(ClusterError::Api(message)) => return OperationOutcome::failed(&descriptor, message),
    }
    if self.wait_crd_gone(name).await {
      OperationOutcome::deleted_with(&descriptor, "finalizers cleared")
    } else {
      OperationOutcome::failed(&descriptor, "still present after finalizer clear")
    }
  }

  async fn wait_crd_gone(&self, name: &str) -> bool {
    let deadline = Instant::now() + self.cfg.drain_timeout;
    loop {
      match self.cluster.crd_exists(name).await {
        Ok(false) => return true,
        Ok(true) => {}
        Err(err) => warn!("Unable to check CRD {name}: {err}"),
      }
      if Instant::now() >= deadline {
        return false;
      }
      sleep(self.cfg.poll_interval).await;
    }
  }
}

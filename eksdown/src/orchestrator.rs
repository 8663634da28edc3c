use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
  cloud::CloudApi,
  cluster::ClusterConnector,
  drain::ClusterAppReconciler,
  helm::HelmCli,
  reconcile::{self, ResourceReconciler},
  report::StateReporter,
  resource::{OperationOutcome, MODULE_DESTROY_ORDER, VPC_MODULE},
  terraform::Terraform,
  utils, RunConfig,
};

/// Overall disposition of a run
///
/// Partial failures still count as completion: teardown is expected to race in-cluster
/// controllers and leftover dependencies, and pipelines must not be blocked by them
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
  Success,
  Partial,
  Aborted,
}

/// Everything observed during one teardown run
#[derive(Debug)]
pub struct TeardownRun {
  pub cluster_reachable: bool,
  pub account: Option<String>,
  pub outcomes: Vec<OperationOutcome>,
  pub disposition: Disposition,
}

/// Sequences the teardown: application drain, conflict resources, Terraform modules,
/// tagged controller-created resources, the VPC, and local artifacts
///
/// Every step logs and continues; nothing short of a Terraform init failure changes
/// the control flow, and even that only skips the module destroys
pub struct TeardownOrchestrator {
  cfg: RunConfig,
  cloud: Arc<dyn CloudApi>,
  connector: Arc<dyn ClusterConnector>,
  helm: Arc<dyn HelmCli>,
  terraform: Arc<dyn Terraform>,
}

impl TeardownOrchestrator {
  pub fn new(
    cfg: RunConfig,
    cloud: Arc<dyn CloudApi>,
    connector: Arc<dyn ClusterConnector>,
    helm: Arc<dyn HelmCli>,
    terraform: Arc<dyn Terraform>,
  ) -> Self {
    Self {
      cfg,
      cloud,
      connector,
      helm,
      terraform,
    }
  }

  pub async fn run(&self) -> TeardownRun {
    let mut reporter = StateReporter::new();

    // Identity failure degrades to an unknown account; the run proceeds regardless
    let account = match self.cloud.caller_account().await {
      Ok(account) => {
        info!("Tearing down {} in account {account}", self.cfg.cluster_name);
        Some(account)
      }
      Err(err) => {
        warn!("Unable to determine caller identity: {err}");
        None
      }
    };

    let cluster = self.connector.connect().await;
    let cluster_reachable = cluster.is_some();
    if let Some(cluster) = cluster {
      let drainer = ClusterAppReconciler::new(&self.cfg, cluster, self.helm.clone());
      for outcome in drainer.drain().await {
        reporter.record(outcome);
      }
    } else {
      info!("Skipping cluster-level drain");
    }

    // Conflict-prone named resources go before Terraform so a later re-apply never
    // trips over leftovers from this cluster
    let reconciler = ResourceReconciler::new(&self.cfg, self.cloud.clone());
    for descriptor in reconcile::discover_conflict_resources(&self.cfg, &self.cloud).await {
      let outcome = reconciler.delete(&descriptor).await;
      reporter.record(outcome);
    }

    let mut aborted = false;
    match self.terraform.init() {
      Ok(()) => {
        for module in MODULE_DESTROY_ORDER {
          self.destroy_module(module);
        }
      }
      Err(err) => {
        error!("terraform init failed: {err:#}");
        aborted = true;
      }
    }

    // Controller-created load balancers and security groups hold references into the
    // VPC and must be gone before the vpc module destroy
    for descriptor in reconcile::discover_tagged_resources(&self.cfg, &self.cloud).await {
      let outcome = reconciler.delete(&descriptor).await;
      reporter.record(outcome);
    }

    if !aborted {
      self.destroy_module(VPC_MODULE);
      match self.terraform.destroy_all() {
        Ok(result) if result.succeeded => info!("Final destroy pass complete"),
        Ok(_) => warn!("Final destroy pass did not report success"),
        Err(err) => warn!("Unable to run final destroy pass: {err:#}"),
      }
    }

    for path in &self.cfg.artifacts {
      utils::remove_path(path);
    }

    let disposition = if aborted {
      Disposition::Aborted
    } else if reporter.any_failed() {
      Disposition::Partial
    } else {
      Disposition::Success
    };

    TeardownRun {
      cluster_reachable,
      account,
      outcomes: reporter.into_outcomes(),
      disposition,
    }
  }

  fn destroy_module(&self, module: &str) {
    match self.terraform.destroy_module(module) {
      Ok(result) if result.succeeded => info!("Module {module} destroyed"),
      Ok(_) => warn!("Module {module} destroy did not report success - continuing"),
      Err(err) => warn!("Unable to run destroy for module {module}: {err:#}"),
    }
  }
}

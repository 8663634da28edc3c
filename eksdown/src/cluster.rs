use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::{
  api::core::v1::Namespace, apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::{
  api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams},
  Client, ResourceExt,
};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::{cloud::CloudApi, utils, RunConfig};

const ARGO_GROUP: &str = "argoproj.io";
const ARGO_VERSION: &str = "v1alpha1";
const ARGO_KIND: &str = "Application";

/// Cluster API error with 404 separated out, mirroring the cloud facade
#[derive(Debug, Error)]
pub enum ClusterError {
  #[error("not found")]
  NotFound,
  #[error("{0}")]
  Api(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// The cluster-side operations needed to drain application-level state
#[async_trait]
pub trait ClusterApi: Send + Sync {
  async fn delete_application(&self, namespace: &str, name: &str) -> ClusterResult<()>;
  async fn delete_namespace(&self, name: &str) -> ClusterResult<()>;
  async fn namespace_exists(&self, name: &str) -> ClusterResult<bool>;
  /// Names of CRDs belonging to the given API group
  async fn list_crds_in_group(&self, group: &str) -> ClusterResult<Vec<String>>;
  /// Instances of the CRD across all namespaces, as `namespace/name` (or `name` for
  /// cluster-scoped kinds)
  async fn list_instances(&self, crd_name: &str) -> ClusterResult<Vec<String>>;
  async fn delete_instance(&self, crd_name: &str, instance: &str) -> ClusterResult<()>;
  async fn delete_crd(&self, name: &str) -> ClusterResult<()>;
  async fn crd_exists(&self, name: &str) -> ClusterResult<bool>;
  /// Clear the finalizer list on a CRD stuck in Terminating
  async fn clear_crd_finalizers(&self, name: &str) -> ClusterResult<()>;
}

fn map_err(err: kube::Error) -> ClusterError {
  match err {
    kube::Error::Api(ref response) if response.code == 404 => ClusterError::NotFound,
    other => ClusterError::Api(other.to_string()),
  }
}

/// Production implementation backed by a kube client
pub struct KubeCluster {
  client: Client,
}

impl KubeCluster {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  async fn crd(&self, name: &str) -> ClusterResult<CustomResourceDefinition> {
    let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
    api.get(name).await.map_err(map_err)
  }

  /// Dynamic API handle for the kind a CRD defines, using its first served version
  fn api_resource(crd: &CustomResourceDefinition) -> ClusterResult<(ApiResource, bool)> {
    let version = crd
      .spec
      .versions
      .iter()
      .find(|v| v.served)
      .or_else(|| crd.spec.versions.first())
      .map(|v| v.name.clone())
      .ok_or_else(|| ClusterError::Api(format!("CRD {} has no versions", crd.name_any())))?;
    let gvk = GroupVersionKind::gvk(&crd.spec.group, &version, &crd.spec.names.kind);
    let resource = ApiResource::from_gvk_with_plural(&gvk, &crd.spec.names.plural);
    Ok((resource, crd.spec.scope == "Namespaced"))
  }
}

#[async_trait]
impl ClusterApi for KubeCluster {
  async fn delete_application(&self, namespace: &str, name: &str) -> ClusterResult<()> {
    let gvk = GroupVersionKind::gvk(ARGO_GROUP, ARGO_VERSION, ARGO_KIND);
    let resource = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);
    api.delete(name, &DeleteParams::default()).await.map_err(map_err)?;
    Ok(())
  }

  async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
    let api: Api<Namespace> = Api::all(self.client.clone());
    api.delete(name, &DeleteParams::default()).await.map_err(map_err)?;
    Ok(())
  }

  async fn namespace_exists(&self, name: &str) -> ClusterResult<bool> {
    let api: Api<Namespace> = Api::all(self.client.clone());
    match api.get(name).await {
      Ok(_) => Ok(true),
      Err(err) => match map_err(err) {
        ClusterError::NotFound => Ok(false),
        other => Err(other),
      },
    }
  }

  async fn list_crds_in_group(&self, group: &str) -> ClusterResult<Vec<String>> {
    let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
    let crds = api.list(&ListParams::default()).await.map_err(map_err)?;
    Ok(
      crds
        .items
        .iter()
        .filter(|crd| crd.spec.group == group)
        .map(|crd| crd.name_any())
        .collect(),
    )
  }

  async fn list_instances(&self, crd_name: &str) -> ClusterResult<Vec<String>> {
    let crd = self.crd(crd_name).await?;
    let (resource, namespaced) = Self::api_resource(&crd)?;
    let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
    let objects = api.list(&ListParams::default()).await.map_err(map_err)?;
    Ok(
      objects
        .items
        .iter()
        .map(|object| match (namespaced, object.namespace()) {
          (true, Some(namespace)) => format!("{namespace}/{}", object.name_any()),
          _ => object.name_any(),
        })
        .collect(),
    )
  }

  async fn delete_instance(&self, crd_name: &str, instance: &str) -> ClusterResult<()> {
    let crd = self.crd(crd_name).await?;
    let (resource, _) = Self::api_resource(&crd)?;
    let api: Api<DynamicObject> = match instance.split_once('/') {
      Some((namespace, _)) => Api::namespaced_with(self.client.clone(), namespace, &resource),
      None => Api::all_with(self.client.clone(), &resource),
    };
    let name = instance.split_once('/').map(|(_, name)| name).unwrap_or(instance);
    api.delete(name, &DeleteParams::default()).await.map_err(map_err)?;
    Ok(())
  }

  async fn delete_crd(&self, name: &str) -> ClusterResult<()> {
    let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
    api.delete(name, &DeleteParams::default()).await.map_err(map_err)?;
    Ok(())
  }

  async fn crd_exists(&self, name: &str) -> ClusterResult<bool> {
    let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
    match api.get(name).await {
      Ok(_) => Ok(true),
      Err(err) => match map_err(err) {
        ClusterError::NotFound => Ok(false),
        other => Err(other),
      },
    }
  }

  async fn clear_crd_finalizers(&self, name: &str) -> ClusterResult<()> {
    let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
    let patch = json!({ "metadata": { "finalizers": null } });
    api
      .patch(name, &PatchParams::default(), &Patch::Merge(patch))
      .await
      .map_err(map_err)?;
    Ok(())
  }
}

/// Determines cluster reachability and hands out a connected API
///
/// `None` is the expected answer when the cluster was already destroyed by a previous
/// run; the orchestrator then skips the application-level drain entirely
#[async_trait]
pub trait ClusterConnector: Send + Sync {
  async fn connect(&self) -> Option<Arc<dyn ClusterApi>>;
}

/// Reachability probe against a live EKS cluster: describe the cluster, refresh the
/// kubeconfig, and confirm the API server answers a lightweight list call
pub struct EksConnector {
  cfg: RunConfig,
  cloud: Arc<dyn CloudApi>,
}

impl EksConnector {
  pub fn new(cfg: &RunConfig, cloud: Arc<dyn CloudApi>) -> Self {
    Self {
      cfg: cfg.clone(),
      cloud,
    }
  }
}

#[async_trait]
impl ClusterConnector for EksConnector {
  async fn connect(&self) -> Option<Arc<dyn ClusterApi>> {
    match self.cloud.cluster_exists(&self.cfg.cluster_name).await {
      Ok(true) => {}
      Ok(false) => {
        info!(
          "Cluster {} not found - proceeding with infrastructure cleanup",
          self.cfg.cluster_name
        );
        return None;
      }
      Err(err) => {
        warn!(
          "Unable to describe cluster {}: {err} - treating as unreachable",
          self.cfg.cluster_name
        );
        return None;
      }
    }

    let update = match utils::cmd_exec(
      "aws",
      vec![
        "eks",
        "update-kubeconfig",
        "--name",
        &self.cfg.cluster_name,
        "--region",
        &self.cfg.region,
      ],
    ) {
      Ok(result) => result,
      Err(err) => {
        warn!("Unable to update kubeconfig: {err}");
        return None;
      }
    };
    if update.status != 0 {
      warn!("update-kubeconfig failed: {}", update.stderr.trim());
      return None;
    }

    let client = match Client::try_default().await {
      Ok(client) => client,
      Err(err) => {
        warn!("Unable to build cluster client: {err}");
        return None;
      }
    };

    let namespaces: Api<Namespace> = Api::all(client.clone());
    match namespaces.list(&ListParams::default().limit(1)).await {
      Ok(_) => {
        info!("Cluster {} is reachable", self.cfg.cluster_name);
        Some(Arc::new(KubeCluster::new(client)))
      }
      Err(err) => {
        warn!("Cluster API server not answering: {err}");
        None
      }
    }
  }
}

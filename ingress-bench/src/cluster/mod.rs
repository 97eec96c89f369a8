use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::core::DynamicObject;

mod kube_cluster;

pub use kube_cluster::{KubeCluster, route_resource};

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("api error: {0}")]
    Api(#[from] kube::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Missing(String),
}

/// Outcome of an idempotent create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Created {
    New,
    AlreadyExists,
}

/// Replica counts and selector of a deployment at one point in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentSnapshot {
    pub desired: i32,
    pub current: i32,
    pub ready: i32,
    pub available: i32,
    pub updated: i32,
    pub selector: BTreeMap<String, String>,
}

/// A pod stuck in the Pending phase, with the waiting state of each of its
/// containers. Surfaced when a readiness wait times out.
#[derive(Clone, Debug)]
pub struct PendingPod {
    pub name: String,
    pub node: Option<String>,
    pub waiting: Vec<ContainerWait>,
}

#[derive(Clone, Debug)]
pub struct ContainerWait {
    pub container: String,
    pub reason: String,
    pub message: Option<String>,
}

/// The cluster operations the orchestrator depends on. One implementation
/// wraps a live API server ([`KubeCluster`]); tests substitute their own.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn create_namespace(&self, ns: &Namespace) -> Result<Created, ClusterError>;

    async fn create_deployment(
        &self,
        ns: &str,
        deployment: &Deployment,
    ) -> Result<Created, ClusterError>;

    async fn create_service(&self, ns: &str, service: &Service) -> Result<Created, ClusterError>;

    async fn create_route(&self, ns: &str, route: &DynamicObject) -> Result<Created, ClusterError>;

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<Created, ClusterError>;

    async fn deployment_snapshot(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<DeploymentSnapshot, ClusterError>;

    async fn scale_deployment(
        &self,
        ns: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Pods in the Pending phase matching the given label selector.
    async fn pending_pods(
        &self,
        ns: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PendingPod>, ClusterError>;

    /// Host assigned to a route by the ingress controller.
    async fn route_host(&self, ns: &str, name: &str) -> Result<String, ClusterError>;

    async fn delete_deployment(&self, ns: &str, name: &str) -> Result<(), ClusterError>;

    async fn delete_service(&self, ns: &str, name: &str) -> Result<(), ClusterError>;

    async fn delete_route(&self, ns: &str, name: &str) -> Result<(), ClusterError>;

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError>;

    async fn delete_namespace(&self, ns: &str) -> Result<(), ClusterError>;

    async fn namespace_exists(&self, ns: &str) -> Result<bool, ClusterError>;
}

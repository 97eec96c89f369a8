use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::json;

use super::{
    ClusterError, ClusterOps, ContainerWait, Created, DeploymentSnapshot, PendingPod,
};

pub fn route_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("route.openshift.io", "v1", "Route"))
}

/// [`ClusterOps`] over a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn routes(&self, ns: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), ns, &route_resource())
    }
}

fn created<T>(res: Result<T, kube::Error>) -> Result<Created, ClusterError> {
    match res {
        Ok(_) => Ok(Created::New),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(Created::AlreadyExists),
        Err(e) => Err(e.into()),
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn create_namespace(&self, ns: &Namespace) -> Result<Created, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        created(api.create(&PostParams::default(), ns).await)
    }

    async fn create_deployment(
        &self,
        ns: &str,
        deployment: &Deployment,
    ) -> Result<Created, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        created(api.create(&PostParams::default(), deployment).await)
    }

    async fn create_service(&self, ns: &str, service: &Service) -> Result<Created, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        created(api.create(&PostParams::default(), service).await)
    }

    async fn create_route(&self, ns: &str, route: &DynamicObject) -> Result<Created, ClusterError> {
        created(self.routes(ns).create(&PostParams::default(), route).await)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<Created, ClusterError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        created(api.create(&PostParams::default(), binding).await)
    }

    async fn deployment_snapshot(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<DeploymentSnapshot, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        let dep = api.get(name).await?;
        let status = dep.status.as_ref();
        Ok(DeploymentSnapshot {
            desired: dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            current: status.and_then(|s| s.replicas).unwrap_or(0),
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            selector: dep
                .spec
                .as_ref()
                .and_then(|s| s.selector.match_labels.clone())
                .unwrap_or_default(),
        })
    }

    async fn scale_deployment(
        &self,
        ns: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        let patch = json!({"spec": {"replicas": replicas}});
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn pending_pods(
        &self,
        ns: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PendingPod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let lp = ListParams::default()
            .labels(&label_selector(selector))
            .fields("status.phase=Pending");
        let list = api.list(&lp).await?;
        let mut pods = Vec::new();
        for pod in list {
            let name = pod.name_any();
            let node = pod.spec.as_ref().and_then(|s| s.node_name.clone());
            let waiting = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .map(|statuses| {
                    statuses
                        .iter()
                        .filter_map(|cs| {
                            let w = cs.state.as_ref()?.waiting.as_ref()?;
                            Some(ContainerWait {
                                container: cs.name.clone(),
                                reason: w.reason.clone().unwrap_or_default(),
                                message: w.message.clone(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            pods.push(PendingPod {
                name,
                node,
                waiting,
            });
        }
        Ok(pods)
    }

    async fn route_host(&self, ns: &str, name: &str) -> Result<String, ClusterError> {
        let route = self.routes(ns).get(name).await?;
        route
            .data
            .get("spec")
            .and_then(|s| s.get("host"))
            .and_then(|h| h.as_str())
            .or_else(|| {
                route
                    .data
                    .get("status")
                    .and_then(|s| s.get("ingress"))
                    .and_then(|i| i.as_array())
                    .and_then(|i| i.first())
                    .and_then(|i| i.get("host"))
                    .and_then(|h| h.as_str())
            })
            .map(str::to_string)
            .ok_or_else(|| ClusterError::Missing(format!("route {ns}/{name} has no host")))
    }

    async fn delete_deployment(&self, ns: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_service(&self, ns: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_route(&self, ns: &str, name: &str) -> Result<(), ClusterError> {
        self.routes(ns).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_namespace(&self, ns: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(ns, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn namespace_exists(&self, ns: &str) -> Result<bool, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(ns).await?.is_some())
    }
}

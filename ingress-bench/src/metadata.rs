//! Cluster identity captured once per run and stamped onto every result.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::ClusterError;

const ROUTER_NAMESPACE: &str = "openshift-ingress";
const ROUTER_DEPLOYMENT: &str = "router-default";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    pub k8s_version: String,
    pub total_nodes: usize,
    pub worker_nodes: usize,
    pub infra_nodes: usize,
    /// Ingress router version, best-effort. Absent when the router
    /// deployment is missing or carries an untagged image.
    pub router_version: Option<String>,
}

impl ClusterMetadata {
    pub async fn capture(client: &Client) -> Result<Self, ClusterError> {
        let info = client.apiserver_version().await?;
        let nodes: Api<Node> = Api::all(client.clone());
        let node_list = nodes.list(&ListParams::default()).await?;
        let mut worker_nodes = 0;
        let mut infra_nodes = 0;
        for node in &node_list {
            let labels = node.metadata.labels.clone().unwrap_or_default();
            if labels.contains_key("node-role.kubernetes.io/worker") {
                worker_nodes += 1;
            }
            if labels.contains_key("node-role.kubernetes.io/infra") {
                infra_nodes += 1;
            }
        }
        let router_version = detect_router_version(client).await;
        match &router_version {
            Some(v) => info!(version = %v, "detected ingress router version"),
            None => warn!("could not detect ingress router version"),
        }
        Ok(Self {
            k8s_version: info.git_version,
            total_nodes: node_list.items.len(),
            worker_nodes,
            infra_nodes,
            router_version,
        })
    }
}

async fn detect_router_version(client: &Client) -> Option<String> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), ROUTER_NAMESPACE);
    let dep = api.get_opt(ROUTER_DEPLOYMENT).await.ok().flatten()?;
    let image = dep
        .spec?
        .template
        .spec?
        .containers
        .first()?
        .image
        .clone()?;
    image_tag(&image)
}

fn image_tag(image: &str) -> Option<String> {
    image
        .rsplit_once(':')
        .map(|(_, tag)| tag)
        // A colon inside the registry host is a port, not a tag.
        .filter(|tag| !tag.contains('/'))
        .map(str::to_string)
}

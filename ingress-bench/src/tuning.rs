//! Ingress controller tuning between test cases.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::info;

const INGRESS_OPERATOR_NS: &str = "openshift-ingress-operator";
const DEFAULT_INGRESS_CONTROLLER: &str = "default";

#[derive(thiserror::Error, Debug)]
pub enum TuningError {
    #[error("invalid tuning profile: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to patch ingress controller: {0}")]
    Api(#[from] kube::Error),
}

/// Applies a named tuning profile to the ingress layer. The sequencer calls
/// this at most once per distinct profile value it encounters.
#[async_trait]
pub trait TuningApplier: Send + Sync {
    async fn apply(&self, profile: &str) -> Result<(), TuningError>;
}

fn ingress_controller_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "operator.openshift.io",
        "v1",
        "IngressController",
    ))
}

/// Merge-patches the default IngressController with the profile, an inline
/// YAML document holding the spec fragment to overlay.
pub struct IngressTuner {
    client: Client,
}

impl IngressTuner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TuningApplier for IngressTuner {
    async fn apply(&self, profile: &str) -> Result<(), TuningError> {
        let patch: serde_json::Value = serde_yaml::from_str(profile)?;
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            INGRESS_OPERATOR_NS,
            &ingress_controller_resource(),
        );
        api.patch(
            DEFAULT_INGRESS_CONTROLLER,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        info!(%profile, "applied ingress controller tuning");
        Ok(())
    }
}

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::{ClusterError, ClusterOps};
use crate::config::Termination;
use crate::templates;

use super::reconcile::POLL_INTERVAL;

#[derive(thiserror::Error, Debug)]
pub enum TeardownError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("timed out waiting for namespace {0} to be deleted")]
    NamespaceTimeout(String),

    #[error("teardown of namespace {0} cancelled")]
    Cancelled(String),
}

/// Delete everything this run created. When the namespace pre-existed, only
/// the objects deployed into it are removed; otherwise the whole namespace
/// goes and the wait confirms it is actually gone, since namespace deletion
/// is asynchronous. The cluster-scoped role binding is removed in both
/// branches, last.
pub async fn teardown(
    ops: &dyn ClusterOps,
    ns: &str,
    existing_namespace: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), TeardownError> {
    info!(%ns, "cleaning up benchmark resources");
    if existing_namespace {
        ops.delete_deployment(ns, templates::CLIENT_NAME).await?;
        ops.delete_deployment(ns, templates::SERVER_NAME).await?;
        ops.delete_service(ns, templates::SERVICE_NAME).await?;
        for termination in Termination::ALL {
            ops.delete_route(ns, &templates::route_name(termination))
                .await?;
        }
    } else {
        ops.delete_namespace(ns).await?;
        wait_namespace_gone(ops, ns, timeout, cancel).await?;
    }
    ops.delete_cluster_role_binding(&templates::crb_name(ns))
        .await?;
    Ok(())
}

async fn wait_namespace_gone(
    ops: &dyn ClusterOps,
    ns: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), TeardownError> {
    let deadline = Instant::now() + timeout;
    loop {
        if !ops.namespace_exists(ns).await? {
            debug!(%ns, "namespace deleted");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(TeardownError::NamespaceTimeout(ns.to_string()));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            _ = cancel.cancelled() => return Err(TeardownError::Cancelled(ns.to_string())),
            _ = tokio::time::sleep(POLL_INTERVAL.min(remaining)) => {}
        }
    }
}

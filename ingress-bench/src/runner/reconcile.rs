use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::{ClusterError, ClusterOps, DeploymentSnapshot, PendingPod};
use crate::templates;

/// Fixed cadence for readiness and deletion polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Wait(#[from] WaitError),
}

#[derive(thiserror::Error, Debug)]
pub enum WaitError {
    #[error("api error while waiting for {ns}/{name}: {source}")]
    Api {
        ns: String,
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("timed out waiting for {ns}/{name}: {available}/{desired} replicas ready")]
    TimedOut {
        ns: String,
        name: String,
        available: i32,
        desired: i32,
        diagnostics: Vec<PendingPod>,
    },

    #[error("wait for {ns}/{name} cancelled")]
    Cancelled { ns: String, name: String },
}

/// Outcome of a single readiness check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending { available: i32, desired: i32 },
}

/// A deployment is ready only when every replica counter agrees with the
/// desired count. Ready alone is not enough: replicas can report ready while
/// still inside a minimum-ready window, which `available` catches.
pub fn assess(snap: &DeploymentSnapshot) -> Readiness {
    if snap.current == snap.desired && snap.ready == snap.desired && snap.available == snap.desired
    {
        Readiness::Ready
    } else {
        Readiness::Pending {
            available: snap.available,
            desired: snap.desired,
        }
    }
}

/// Poll a deployment until ready, at [`POLL_INTERVAL`] cadence with an
/// immediate first check. Any API error aborts the wait; on timeout the
/// error carries the pending pods matching the deployment's selector so the
/// caller can report why capacity never arrived.
pub async fn wait_ready(
    ops: &dyn ClusterOps,
    ns: &str,
    name: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), WaitError> {
    let deadline = Instant::now() + timeout;
    loop {
        let snap = ops
            .deployment_snapshot(ns, name)
            .await
            .map_err(|source| WaitError::Api {
                ns: ns.to_string(),
                name: name.to_string(),
                source,
            })?;
        match assess(&snap) {
            Readiness::Ready => {
                debug!(%ns, %name, replicas = snap.updated, "replicas ready");
                return Ok(());
            }
            Readiness::Pending { available, desired } => {
                debug!(%ns, %name, "{available}/{desired} replicas ready");
                if Instant::now() >= deadline {
                    // List failures are swallowed: diagnostics are best-effort.
                    let diagnostics = ops
                        .pending_pods(ns, &snap.selector)
                        .await
                        .unwrap_or_default();
                    return Err(WaitError::TimedOut {
                        ns: ns.to_string(),
                        name: name.to_string(),
                        available,
                        desired,
                        diagnostics,
                    });
                }
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled {
                    ns: ns.to_string(),
                    name: name.to_string(),
                });
            }
            _ = tokio::time::sleep(POLL_INTERVAL.min(remaining)) => {}
        }
    }
}

/// Converges the server and client deployments onto a test case's desired
/// replica counts.
pub struct Reconciler<'a> {
    pub ops: &'a dyn ClusterOps,
    pub ns: &'a str,
    pub ready_timeout: Duration,
    pub cancel: &'a CancellationToken,
}

impl Reconciler<'_> {
    pub async fn converge(
        &self,
        server_replicas: i32,
        client_replicas: i32,
    ) -> Result<(), ReconcileError> {
        self.converge_one(templates::SERVER_NAME, server_replicas)
            .await?;
        self.converge_one(templates::CLIENT_NAME, client_replicas)
            .await
    }

    async fn converge_one(&self, name: &str, replicas: i32) -> Result<(), ReconcileError> {
        let snap = self.ops.deployment_snapshot(self.ns, name).await?;
        // Already at scale: skip the update to avoid a pointless rollout.
        if snap.ready == replicas {
            debug!(ns = %self.ns, %name, replicas, "deployment already at desired scale");
            return Ok(());
        }
        self.ops
            .scale_deployment(self.ns, name, replicas)
            .await?;
        info!(ns = %self.ns, %name, replicas, "waiting for deployment replicas to be ready");
        wait_ready(self.ops, self.ns, name, self.ready_timeout, self.cancel).await?;
        Ok(())
    }
}

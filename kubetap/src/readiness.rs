//! Pod readiness polling for the interactive port-forward flow.

use std::{collections::BTreeMap, time::Duration};

use indicatif::ProgressBar;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::{Api, api::ListParams};
use snafu::ResultExt;

use crate::tap::{self, Error, error};

/// Ceiling for the readiness wait, in seconds.
pub const READINESS_TIMEOUT_SECS: u64 = 90;

/// Checks are skipped for this long right after the tap; a pod scheduled
/// moments ago can still report a stale Ready condition.
const STARTUP_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Whether the Pod reports a true `ContainersReady` condition.
#[must_use]
pub fn containers_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "ContainersReady" && condition.status == "True")
        })
}

/// Polls the tapped Pod once per second until its containers are ready or
/// the ceiling is reached.
///
/// A timeout leaves the tap committed: the cluster-side change is likely
/// close to correct even if not yet observed ready, and auto-reverting
/// would be more surprising than waiting.
pub async fn wait_for_tapped_pod(
    pods: &Api<Pod>,
    deployments: &Api<Deployment>,
    namespace: &str,
    selectors: &BTreeMap<String, String>,
) -> Result<Pod, Error> {
    let progress = ProgressBar::new(READINESS_TIMEOUT_SECS);
    progress.println("Waiting for Pod containers to become ready...");

    for elapsed_secs in 0..READINESS_TIMEOUT_SECS {
        progress.inc(1);
        tokio::time::sleep(POLL_INTERVAL).await;
        if Duration::from_secs(elapsed_secs) < STARTUP_GRACE {
            continue;
        }

        let deployment =
            tap::deployment_from_selectors(deployments, namespace, selectors).await?;
        let deployment_name = deployment.metadata.name.clone().unwrap_or_default();
        let listed = pods.list(&ListParams::default()).await.context(error::ListPodsSnafu)?;
        let pod = tap::tapped_pod(&listed.items, &deployment_name)?;
        if containers_ready(&pod) {
            progress.finish_and_clear();
            return Ok(pod);
        }
    }

    progress.finish_and_clear();
    error::ReadinessTimeoutSnafu { ceiling_secs: READINESS_TIMEOUT_SECS }.fail()
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};

    use super::containers_ready;

    fn pod_with_condition(type_: &str, status: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: type_.to_string(),
                    status: status.to_string(),
                    ..PodCondition::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_ready_condition_must_be_containers_ready_and_true() {
        assert!(containers_ready(&pod_with_condition("ContainersReady", "True")));
        assert!(!containers_ready(&pod_with_condition("ContainersReady", "False")));
        assert!(!containers_ready(&pod_with_condition("Ready", "True")));
        assert!(!containers_ready(&Pod::default()));
    }
}

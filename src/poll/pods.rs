use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::core::ResourceExt;

use super::{Observation, Probe};
use crate::cluster::{kinds, list_typed, Cluster};
use crate::deployer::Error;

const CRASH_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "Error",
    "ImagePullBackOff",
    "ErrImagePull",
];

pub(super) struct PodsProbe<'a> {
    pub(super) cluster: &'a dyn Cluster,
    pub(super) namespace: &'a str,
}

/// A pod is settled when it completed, or runs without a crashing container.
fn pod_settled(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    match status.phase.as_deref() {
        Some("Succeeded") => true,
        Some("Running") => !status
            .container_statuses
            .iter()
            .flatten()
            .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.as_deref())
            .any(|reason| CRASH_REASONS.contains(&reason)),
        _ => false,
    }
}

#[async_trait]
impl Probe for PodsProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, Error> {
        if self
            .cluster
            .get(&kinds::NAMESPACE, None, self.namespace)
            .await?
            .is_none()
        {
            return Ok(Observation::Ready(format!(
                "namespace {} does not exist",
                self.namespace
            )));
        }

        let pods: Vec<Pod> = list_typed(self.cluster, &kinds::POD, Some(self.namespace), None).await?;
        let waiting: Vec<String> = pods
            .iter()
            .filter(|p| !pod_settled(p))
            .map(|p| p.name_any())
            .collect();

        if waiting.is_empty() {
            Ok(Observation::Ready(format!(
                "{} pod(s) in {} settled",
                pods.len(),
                self.namespace
            )))
        } else {
            Ok(Observation::Pending(format!(
                "waiting on {} in {}",
                waiting.join(", "),
                self.namespace
            )))
        }
    }
}

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;

use super::{Observation, Probe};
use crate::cluster::{get_typed, kinds, Cluster};
use crate::deployer::Error;

pub(super) struct RolloutProbe<'a> {
    pub(super) cluster: &'a dyn Cluster,
    pub(super) namespace: &'a str,
    pub(super) name: &'a str,
}

/// Mirrors `kubectl rollout status`: the controller has seen the latest spec and
/// every desired replica is updated and available.
fn rollout_state(deployment: &Deployment) -> Result<String, String> {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or_default();

    let Some(status) = deployment.status.as_ref() else {
        return Err("no status reported yet".into());
    };
    if status.observed_generation.unwrap_or_default() < generation {
        return Err("waiting for the controller to observe the new spec".into());
    }

    let updated = status.updated_replicas.unwrap_or_default();
    let ready = status.ready_replicas.unwrap_or_default();
    let available = status.available_replicas.unwrap_or_default();
    let total = status.replicas.unwrap_or_default();
    if updated < desired {
        return Err(format!("{} of {} replicas updated", updated, desired));
    }
    if total > updated {
        return Err(format!("{} old replicas pending termination", total - updated));
    }
    if ready < desired || available < desired {
        return Err(format!("{} of {} updated replicas available", available, desired));
    }
    Ok(format!("{} replicas rolled out", desired))
}

#[async_trait]
impl Probe for RolloutProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, Error> {
        let deployment: Option<Deployment> =
            get_typed(self.cluster, &kinds::DEPLOYMENT, Some(self.namespace), self.name).await?;
        let Some(deployment) = deployment else {
            return Ok(Observation::Pending(format!(
                "deployment {}/{} not found",
                self.namespace, self.name
            )));
        };
        Ok(match rollout_state(&deployment) {
            Ok(state) => Observation::Ready(state),
            Err(state) => Observation::Pending(state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::{wait, Outcome, PollSpec, WaitTarget};
    use super::*;
    use crate::cluster::convert;
    use crate::cluster::fake::{self, FakeCluster};
    use std::time::Duration;

    #[test]
    fn partial_rollout_is_pending() {
        let deployment: Deployment = convert(&fake::deployment("ns", "op", 3, 1)).unwrap();
        assert!(rollout_state(&deployment).is_err());

        let deployment: Deployment = convert(&fake::deployment("ns", "op", 3, 3)).unwrap();
        assert_eq!(rollout_state(&deployment).unwrap(), "3 replicas rolled out");
    }

    #[test]
    fn stale_observed_generation_is_pending() {
        let mut deployment: Deployment = convert(&fake::deployment("ns", "op", 1, 1)).unwrap();
        deployment.metadata.generation = Some(3);
        assert!(rollout_state(&deployment)
            .unwrap_err()
            .contains("observe the new spec"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_replicas_to_become_available() {
        let cluster = FakeCluster::new();
        cluster.insert(fake::deployment(
            "kuadrant-system",
            "kuadrant-operator-controller-manager",
            1,
            0,
        ));
        cluster.insert_at(
            Duration::from_secs(18),
            fake::deployment("kuadrant-system", "kuadrant-operator-controller-manager", 1, 1),
        );
        let spec = PollSpec::new(
            WaitTarget::RolloutComplete {
                namespace: "kuadrant-system".into(),
                name: "kuadrant-operator-controller-manager".into(),
            },
            Duration::from_secs(180),
            Duration::from_secs(5),
        )
        .unwrap();

        let result = wait(&cluster, &spec).await;
        assert_eq!(result.outcome, Outcome::Ready);
        assert_eq!(result.elapsed, Duration::from_secs(20));
    }
}

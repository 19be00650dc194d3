use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::wait::{conditions, Condition};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use super::{poll_until, Observation, Outcome, PollResult, Probe};
use crate::cluster::{get_typed, kinds, Cluster};
use crate::deployer::Error;

/// Phase one: the definition may not be registered yet, e.g. while an installer runs.
struct ExistsProbe<'a> {
    cluster: &'a dyn Cluster,
    name: &'a str,
}

#[async_trait]
impl Probe for ExistsProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, Error> {
        match self.cluster.get(&kinds::CRD, None, self.name).await? {
            Some(_) => Ok(Observation::Ready(format!("CRD {} exists", self.name))),
            None => Ok(Observation::Pending(format!("CRD {} not found", self.name))),
        }
    }
}

/// Phase two: the definition exists, wait for the API server to serve it.
struct EstablishedProbe<'a> {
    cluster: &'a dyn Cluster,
    name: &'a str,
}

#[async_trait]
impl Probe for EstablishedProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, Error> {
        let crd: Option<CustomResourceDefinition> =
            get_typed(self.cluster, &kinds::CRD, None, self.name).await?;
        if conditions::is_crd_established().matches_object(crd.as_ref()) {
            Ok(Observation::Ready(format!("CRD {} established", self.name)))
        } else {
            Ok(Observation::Pending(format!("CRD {} not established", self.name)))
        }
    }
}

/// Both phases draw from the same budget.
pub(super) async fn wait_established(
    cluster: &dyn Cluster,
    name: &str,
    started: Instant,
    deadline: Instant,
    interval: Duration,
) -> PollResult {
    let mut exists = ExistsProbe { cluster, name };
    let found = poll_until(&mut exists, started, deadline, interval).await;
    if found.outcome != Outcome::Ready {
        return found;
    }
    info!("CRD {} registered after {:?}, waiting for Established", name, found.elapsed);

    let mut established = EstablishedProbe { cluster, name };
    poll_until(&mut established, started, deadline, interval).await
}

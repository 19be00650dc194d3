use async_trait::async_trait;

use super::{Observation, Probe};
use crate::cluster::{condition_status, Cluster, ResourceKind};
use crate::deployer::Error;

pub(super) struct ConditionProbe<'a> {
    pub(super) cluster: &'a dyn Cluster,
    pub(super) kind: &'a ResourceKind,
    pub(super) namespace: Option<&'a str>,
    pub(super) name: &'a str,
    pub(super) condition: &'a str,
}

#[async_trait]
impl Probe for ConditionProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, Error> {
        let Some(object) = self.cluster.get(self.kind, self.namespace, self.name).await? else {
            return Ok(Observation::Pending(format!("{} {} not found", self.kind.kind, self.name)));
        };
        match condition_status(&object, self.condition).as_deref() {
            Some("True") => Ok(Observation::Ready(format!(
                "{} {} is {}",
                self.kind.kind, self.name, self.condition
            ))),
            Some(status) => Ok(Observation::Pending(format!(
                "{} {} {}={}",
                self.kind.kind, self.name, self.condition, status
            ))),
            None => Ok(Observation::Pending(format!(
                "{} {} has no {} condition",
                self.kind.kind, self.name, self.condition
            ))),
        }
    }
}

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use super::{Observation, Probe};
use crate::cluster::{kinds, Cluster};
use crate::deployer::Error;

/// Installs can take many minutes; report the phase this often instead of on every poll.
pub(crate) const PROGRESS_EVERY: Duration = Duration::from_secs(30);

/// Watches the ClusterServiceVersion of an OLM-installed operator.
pub(super) struct InstallProbe<'a> {
    cluster: &'a dyn Cluster,
    namespace: &'a str,
    name: &'a str,
    last_progress: Instant,
    progress_reports: usize,
}

impl<'a> InstallProbe<'a> {
    pub(super) fn new(cluster: &'a dyn Cluster, namespace: &'a str, name: &'a str) -> InstallProbe<'a> {
        InstallProbe {
            cluster,
            namespace,
            name,
            last_progress: Instant::now(),
            progress_reports: 0,
        }
    }

    /// Logs the current phase at most once per `PROGRESS_EVERY`. Returns whether it logged.
    fn report_progress(&mut self, phase: &str) -> bool {
        if self.last_progress.elapsed() < PROGRESS_EVERY {
            return false;
        }
        info!(
            "Still waiting for {} in {} (phase: {})",
            self.name, self.namespace, phase
        );
        self.last_progress = Instant::now();
        self.progress_reports += 1;
        true
    }
}

fn status_field<'v>(csv: &'v kube::api::DynamicObject, field: &str) -> Option<&'v str> {
    csv.data
        .get("status")
        .and_then(|s| s.get(field))
        .and_then(Value::as_str)
}

#[async_trait]
impl Probe for InstallProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, Error> {
        let csvs = self
            .cluster
            .list(&kinds::CLUSTER_SERVICE_VERSION, Some(self.namespace), None)
            .await?;

        // Version suffixes vary (kuadrant-operator.v1.2.0), match on the prefix.
        let csv = csvs.iter().find(|c| {
            c.metadata
                .name
                .as_deref()
                .map_or(false, |n| n.starts_with(self.name))
        });

        let (phase, message, csv_name) = match csv {
            Some(csv) => (
                status_field(csv, "phase").unwrap_or("Unknown").to_string(),
                status_field(csv, "message").unwrap_or_default().to_string(),
                csv.metadata.name.clone().unwrap_or_default(),
            ),
            None => {
                self.report_progress("NotFound");
                return Ok(Observation::Pending(format!(
                    "no CSV matching {} in {}",
                    self.name, self.namespace
                )));
            }
        };

        match phase.as_str() {
            "Succeeded" => Ok(Observation::Ready(format!("{} Succeeded", csv_name))),
            "Failed" => Ok(Observation::Failed(format!("{} Failed: {}", csv_name, message))),
            _ => {
                self.report_progress(&phase);
                Ok(Observation::Pending(format!("{} {}", csv_name, phase)))
            }
        }
    }
}

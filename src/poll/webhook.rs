use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::core::v1::Endpoints;
use std::collections::BTreeSet;

use super::{Observation, Probe};
use crate::cluster::{get_typed, kinds, list_typed, Cluster};
use crate::deployer::Error;

/// A webhook that is registered but has no endpoint rejects every write it guards,
/// so mutations in its namespace are only safe once its service is backed.
pub(super) struct WebhookProbe<'a> {
    pub(super) cluster: &'a dyn Cluster,
    pub(super) namespace: &'a str,
}

/// Services in `namespace` referenced by any validating webhook, deduplicated.
fn webhook_services(
    configurations: &[ValidatingWebhookConfiguration],
    namespace: &str,
) -> BTreeSet<(String, String)> {
    configurations
        .iter()
        .flat_map(|c| c.webhooks.iter().flatten())
        .filter_map(|w| w.client_config.service.as_ref())
        .filter(|s| s.namespace == namespace)
        .map(|s| (s.namespace.clone(), s.name.clone()))
        .collect()
}

fn has_ready_address(endpoints: &Endpoints) -> bool {
    endpoints
        .subsets
        .iter()
        .flatten()
        .any(|s| s.addresses.as_ref().map_or(false, |a| !a.is_empty()))
}

#[async_trait]
impl Probe for WebhookProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, Error> {
        let configurations: Vec<ValidatingWebhookConfiguration> =
            list_typed(self.cluster, &kinds::VALIDATING_WEBHOOK, None, None).await?;
        let services = webhook_services(&configurations, self.namespace);
        if services.is_empty() {
            return Ok(Observation::Ready(format!(
                "no webhook services in {}",
                self.namespace
            )));
        }

        let mut unready = Vec::new();
        for (namespace, name) in &services {
            let endpoints: Option<Endpoints> =
                get_typed(self.cluster, &kinds::ENDPOINTS, Some(namespace.as_str()), name).await?;
            if !endpoints.as_ref().map_or(false, has_ready_address) {
                unready.push(format!("{}/{}", namespace, name));
            }
        }

        if unready.is_empty() {
            Ok(Observation::Ready(format!(
                "{} webhook service(s) in {} have endpoints",
                services.len(),
                self.namespace
            )))
        } else {
            Ok(Observation::Pending(format!(
                "no ready endpoints for {}",
                unready.join(", ")
            )))
        }
    }
}

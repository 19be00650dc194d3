//! Runtime corrections applied after the main sequence, and the closing report.
//!
//! Every correction here is best effort. Failures are logged and never change
//! the outcome of the run.

use k8s_openapi::api::core::v1::Pod;
use serde_json::json;
use tracing::{info, warn};

use crate::cluster::{kinds, list_typed, rollout_restart, Cluster};
use crate::deployer::{DeployContext, Error};

mod audience;
mod report;

pub use audience::audience_from_token;
#[cfg(test)]
pub(crate) use audience::token_with_claims;
pub use report::{build_report, StatusReport};

pub const DEFAULT_LIMITADOR_IMAGE: &str = "quay.io/kuadrant/limitador:v0.12.1";

const AUTH_POLICY_NAMESPACE: &str = "openshift-ingress";
const AUTH_POLICY_NAME: &str = "gateway-auth-policy";
const AUDIENCE_PATH: &str = "/spec/rules/authentication/service-accounts/kubernetesTokenReview/audiences/0";
const TOKEN_LIFETIME_SECONDS: i64 = 600;

const LIMITADOR_NAMESPACE: &str = "kuadrant-system";
const LIMITADOR_DEPLOYMENT: &str = "limitador-limitador";

// Stale webhook cache workaround. Remove together with WORKAROUND_RESTARTS once
// the policy operators refresh webhook endpoints on their own.
const BLOCKING_NETWORK_POLICY: &str = "kuadrant-operator-webhooks";
const WORKAROUND_RESTARTS: [&str; 3] = [
    "kuadrant-operator-controller-manager",
    "authorino-operator",
    "limitador-operator-controller-manager",
];

/// Mints a token, reads its audience and points the gateway auth policy at it.
pub async fn patch_audience(cluster: &dyn Cluster) -> Result<String, Error> {
    let token = cluster
        .mint_token("default", "default", TOKEN_LIFETIME_SECONDS)
        .await?;
    let audience = audience_from_token(&token)?;
    let patch = json!([{ "op": "replace", "path": AUDIENCE_PATH, "value": audience }]);
    cluster
        .patch_json(
            &kinds::AUTH_POLICY,
            Some(AUTH_POLICY_NAMESPACE),
            AUTH_POLICY_NAME,
            patch,
        )
        .await?;
    info!("AuthPolicy {} now accepts audience {}", AUTH_POLICY_NAME, audience);
    Ok(audience)
}

/// Returns true for `repo@sha256:<64 hex>` references, which cannot be retagged.
pub fn is_digest_reference(image: &str) -> bool {
    match image.split_once("@sha256:") {
        Some((repository, digest)) => {
            !repository.is_empty()
                && digest.len() == 64
                && digest.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Looks up the digest a running pod pulled for `image`.
async fn resolve_digest(cluster: &dyn Cluster, image: &str) -> Result<Option<String>, Error> {
    let pods: Vec<Pod> = list_typed(cluster, &kinds::POD, Some(LIMITADOR_NAMESPACE), None).await?;
    let resolved = pods
        .iter()
        .filter_map(|p| p.status.as_ref()?.container_statuses.as_ref())
        .flatten()
        .filter(|c| c.image == image)
        .map(|c| c.image_id.rsplit("://").next().unwrap_or_default())
        .find(|id| is_digest_reference(id))
        .map(String::from);
    Ok(resolved)
}

/// Points the Limitador deployment at `image`, by digest whenever one is known.
pub async fn pin_limitador_image(cluster: &dyn Cluster, image: &str) -> Result<String, Error> {
    let pinned = if is_digest_reference(image) {
        image.to_string()
    } else {
        match resolve_digest(cluster, image).await? {
            Some(digest) => {
                info!("Resolved {} to {}", image, digest);
                digest
            }
            None => {
                warn!("No digest known for {}, pinning the tag", image);
                image.to_string()
            }
        }
    };
    let patch = json!([{
        "op": "replace",
        "path": "/spec/template/spec/containers/0/image",
        "value": pinned
    }]);
    cluster
        .patch_json(
            &kinds::DEPLOYMENT,
            Some(LIMITADOR_NAMESPACE),
            LIMITADOR_DEPLOYMENT,
            patch,
        )
        .await?;
    info!("Pinned {} to {}", LIMITADOR_DEPLOYMENT, pinned);
    Ok(pinned)
}

/// Deletes the blocking network policy and restarts the policy operators.
///
/// Each step runs on its own. Returns the number of steps that failed.
pub async fn clear_stale_webhooks(cluster: &dyn Cluster) -> usize {
    let mut failed = 0;
    match cluster
        .delete(
            &kinds::NETWORK_POLICY,
            Some(LIMITADOR_NAMESPACE),
            BLOCKING_NETWORK_POLICY,
        )
        .await
    {
        Ok(true) => info!("Deleted network policy {}", BLOCKING_NETWORK_POLICY),
        Ok(false) => {}
        Err(e) => {
            warn!("Unable to delete network policy {}: {}", BLOCKING_NETWORK_POLICY, e);
            failed += 1;
        }
    }
    for name in WORKAROUND_RESTARTS {
        if let Err(e) = rollout_restart(cluster, LIMITADOR_NAMESPACE, name).await {
            warn!("Unable to restart {}: {}", name, e);
            failed += 1;
        }
    }
    failed
}

/// Runs each correction independently; a failure in one never blocks the next.
pub async fn post_deploy(cluster: &dyn Cluster, ctx: &mut DeployContext) {
    match patch_audience(cluster).await {
        Ok(audience) => ctx.audience = Some(audience),
        Err(e) => warn!("Skipping audience patch: {}", e),
    }
    if let Err(e) = pin_limitador_image(cluster, &ctx.limitador_image).await {
        warn!("Unable to pin Limitador image: {}", e);
    }
    let failed = clear_stale_webhooks(cluster).await;
    if failed > 0 {
        warn!("Stale webhook workaround finished with {} failed step(s)", failed);
    }
}

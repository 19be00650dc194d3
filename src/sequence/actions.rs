use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cluster::{kinds, rollout_restart, Cluster};
use crate::deployer::{self, DeployContext, Error};
use crate::manifest::render_bundle;
use crate::stage::Action;
use crate::verify;
use crate::version;

#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    Done,
    Skipped(String),
}

pub(super) async fn execute(
    cluster: &dyn Cluster,
    action: &Action,
    ctx: &mut DeployContext,
) -> Result<ActionOutcome, Error> {
    match action {
        Action::VerifyPlatform => verify_platform(cluster, ctx).await,
        Action::ResolveClusterDomain => {
            let domain = match ctx.cluster_domain.clone() {
                Some(domain) if !domain.is_empty() => {
                    info!("Using cluster domain override {}", domain);
                    domain
                }
                _ => deployer::cluster_domain(cluster).await?,
            };
            info!("Cluster domain is {}", domain);
            ctx.set_cluster_domain(domain);
            Ok(ActionOutcome::Done)
        }
        Action::FeatureGates { minimum, settle } => {
            let current = ctx.platform_version.as_deref().unwrap_or_default();
            if version::is_at_least(current, minimum) == Some(true) {
                return Ok(ActionOutcome::Skipped(format!(
                    "platform {} already ships Gateway API",
                    current
                )));
            }
            enable_gateway_feature_gates(cluster).await?;
            info!("Waiting {:?} for feature gates to settle", settle);
            sleep(*settle).await;
            Ok(ActionOutcome::Done)
        }
        Action::CreateNamespaces(namespaces) => {
            for namespace in namespaces {
                if cluster.create_namespace(namespace).await? {
                    info!("Created namespace {}", namespace);
                } else {
                    info!("Namespace {} already exists", namespace);
                }
            }
            Ok(ActionOutcome::Done)
        }
        Action::Apply(bundle) => {
            apply_bundle(cluster, ctx, bundle).await?;
            Ok(ActionOutcome::Done)
        }
        Action::InstallIfAbsent { crd, bundle } => {
            if cluster.get(&kinds::CRD, None, crd).await?.is_some() {
                return Ok(ActionOutcome::Skipped(format!("{} already registered", crd)));
            }
            apply_bundle(cluster, ctx, bundle).await?;
            Ok(ActionOutcome::Done)
        }
        Action::RolloutRestart { namespace, name } => {
            rollout_restart(cluster, namespace, name).await?;
            Ok(ActionOutcome::Done)
        }
        Action::PostDeploy => {
            if !ctx.post_deploy {
                return Ok(ActionOutcome::Skipped("disabled on the command line".into()));
            }
            verify::post_deploy(cluster, ctx).await;
            Ok(ActionOutcome::Done)
        }
        Action::Report => {
            let report = verify::build_report(cluster, ctx.cluster_domain.as_deref()).await?;
            ctx.report = Some(report);
            Ok(ActionOutcome::Done)
        }
    }
}

async fn verify_platform(cluster: &dyn Cluster, ctx: &mut DeployContext) -> Result<ActionOutcome, Error> {
    let cluster_version = cluster
        .get(&kinds::CLUSTER_VERSION, None, "version")
        .await
        .map_err(|e| Error::PlatformMismatch(format!("unable to read cluster version: {}", e)))?
        .ok_or_else(|| {
            Error::PlatformMismatch("clusterversions.config.openshift.io/version not found".into())
        })?;

    let platform_version = cluster_version
        .data
        .pointer("/status/desired/version")
        .and_then(|v| v.as_str())
        .map(String::from);
    match &platform_version {
        Some(v) => info!("OpenShift {} detected", v),
        None => warn!("OpenShift detected but its version is not reported"),
    }
    ctx.platform_version = platform_version;
    Ok(ActionOutcome::Done)
}

async fn enable_gateway_feature_gates(cluster: &dyn Cluster) -> Result<(), Error> {
    let patch = json!({
        "spec": {
            "featureSet": "CustomNoUpgrade",
            "customNoUpgrade": {
                "enabled": ["GatewayAPI", "GatewayAPIController"]
            }
        }
    });
    cluster
        .patch_merge(&kinds::FEATURE_GATE, None, "cluster", patch)
        .await?;
    info!("Enabled GatewayAPI feature gates");
    Ok(())
}

/// Applies every object in the bundle, continuing past individual failures.
async fn apply_bundle(cluster: &dyn Cluster, ctx: &DeployContext, bundle: &str) -> Result<(), Error> {
    let objects = render_bundle(&ctx.manifests, bundle, &ctx.variables).await?;
    info!("Applying {} object(s) from bundle {}", objects.len(), bundle);

    let mut errors = Vec::new();
    for object in &objects {
        if let Err(e) = cluster.apply(object).await {
            let kind = object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
            let name = object.metadata.name.as_deref().unwrap_or_default();
            warn!("Unable to apply {} {}: {}", kind, name, e);
            errors.push(format!("{} {}: {}", kind, name, e));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::UnableToApplyObjects(errors.join("; ")))
    }
}

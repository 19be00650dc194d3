use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::{Cluster, KubeCluster};
use crate::sequence::{plan, Sequencer};
use crate::stage::RunOutcome;
use crate::verify::{build_report, StatusReport};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes request failed: {0}")]
    Kube(#[from] kube::Error),
    #[error("UnableToSerializeObject: {0}")]
    UnableToSerializeObject(#[from] serde_json::Error),
    #[error("UnableToParseManifest: {0}")]
    UnableToParseManifest(#[from] serde_yaml::Error),
    #[error("UnableToReadManifest: {0}")]
    UnableToReadManifest(#[from] std::io::Error),
    #[error("InvalidManifest: {0}")]
    InvalidManifest(String),
    #[error("RendererFailed: {0}")]
    RendererFailed(String),
    #[error("UnableToApplyObjects: {0}")]
    UnableToApplyObjects(String),
    #[error("ObjectNotFound: {0}")]
    ObjectNotFound(String),
    #[error("InvalidPatch: {0}")]
    InvalidPatch(String),
    #[error("TokenUnavailable: {0}")]
    TokenUnavailable(String),
    #[error("InvalidPollSpec: {0}")]
    InvalidPollSpec(String),
    #[error("InvalidPlan: {0}")]
    InvalidPlan(String),
    #[error("PlatformMismatch: {0}")]
    PlatformMismatch(String),
    #[error("ClusterDomainUnavailable: {0}")]
    ClusterDomainUnavailable(String),
    #[error("Stage {stage} aborted the deployment: {reason}")]
    Aborted { stage: String, reason: String },
}

/// Values shared between stages of a single run.
///
/// Earlier stages resolve facts about the cluster (its version, its public domain)
/// and later stages read them from here rather than from the process environment.
#[derive(Debug, Clone)]
pub struct DeployContext {
    pub manifests: PathBuf,
    pub cluster_domain: Option<String>,
    pub platform_version: Option<String>,
    pub limitador_image: String,
    pub post_deploy: bool,
    pub audience: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub report: Option<StatusReport>,
}

impl DeployContext {
    pub fn new(
        manifests: PathBuf,
        cluster_domain: Option<String>,
        limitador_image: String,
        post_deploy: bool,
    ) -> DeployContext {
        DeployContext {
            manifests,
            cluster_domain,
            platform_version: None,
            limitador_image,
            post_deploy,
            audience: None,
            variables: BTreeMap::new(),
            report: None,
        }
    }

    /// Records the resolved domain and exposes it to manifest templates.
    pub fn set_cluster_domain(&mut self, domain: String) {
        self.variables
            .insert("CLUSTER_DOMAIN".into(), domain.clone());
        self.cluster_domain = Some(domain);
    }
}

/// Runs the full deployment plan against the cluster from the ambient kubeconfig.
pub async fn deploy(mut ctx: DeployContext) -> Result<RunOutcome, Error> {
    let cluster = KubeCluster::try_default().await?;
    info!("Deploying from manifests in {}", ctx.manifests.display());

    let sequencer = Sequencer::new(&cluster, plan::stages()?)?;
    let outcome = sequencer.run(&mut ctx).await?;

    if let Some(audience) = &ctx.audience {
        info!("Gateway authentication expects token audience {}", audience);
    }
    let degraded = outcome.degraded().count();
    if degraded > 0 {
        warn!("{} stage(s) did not converge, review the summary below", degraded);
    } else {
        info!("All stages converged");
    }
    Ok(outcome)
}

/// Builds the status report without changing anything on the cluster.
pub async fn status(ctx: DeployContext) -> Result<StatusReport, Error> {
    let cluster = KubeCluster::try_default().await?;
    let domain = match ctx.cluster_domain.clone() {
        Some(d) => Some(d),
        None => cluster_domain(&cluster).await.ok(),
    };
    build_report(&cluster, domain.as_deref()).await
}

/// Reads the externally visible application domain from the cluster ingress config.
pub async fn cluster_domain(cluster: &dyn Cluster) -> Result<String, Error> {
    use crate::cluster::kinds::INGRESS_CONFIG;

    let ingress = cluster
        .get(&INGRESS_CONFIG, None, "cluster")
        .await?
        .ok_or_else(|| {
            Error::ClusterDomainUnavailable("ingresses.config.openshift.io/cluster not found".into())
        })?;

    match ingress.data.pointer("/spec/domain").and_then(|d| d.as_str()) {
        Some(domain) if !domain.is_empty() => Ok(domain.to_string()),
        _ => Err(Error::ClusterDomainUnavailable(
            "ingresses.config.openshift.io/cluster has no spec.domain".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{self, FakeCluster};
    use serde_json::json;

    #[tokio::test]
    async fn cluster_domain_requires_a_non_empty_value() {
        let cluster = FakeCluster::new();
        assert!(matches!(
            cluster_domain(&cluster).await,
            Err(Error::ClusterDomainUnavailable(_))
        ));

        cluster.insert(fake::object(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "Ingress",
            "metadata": { "name": "cluster" },
            "spec": { "domain": "" }
        })));
        assert!(matches!(
            cluster_domain(&cluster).await,
            Err(Error::ClusterDomainUnavailable(_))
        ));

        cluster.insert(fake::ingress_config("apps.example.com"));
        assert_eq!(cluster_domain(&cluster).await.unwrap(), "apps.example.com");
    }

    #[test]
    fn resolved_domain_becomes_a_template_variable() {
        let mut ctx = DeployContext::new(PathBuf::from("deployment"), None, "image".into(), true);
        ctx.set_cluster_domain("apps.example.com".into());
        assert_eq!(ctx.cluster_domain.as_deref(), Some("apps.example.com"));
        assert_eq!(ctx.variables["CLUSTER_DOMAIN"], "apps.example.com");
    }
}

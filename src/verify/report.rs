use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use tracing::{debug, warn};

use crate::cluster::{condition_status, kinds, list_typed, Cluster, ResourceKind};
use crate::deployer::Error;

/// Namespaces whose pods the report counts.
pub const REPORTED_NAMESPACES: [&str; 5] = ["llm", "kuadrant-system", "maas-api", "kserve", "cert-manager"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PodCount {
    pub running: usize,
    pub total: usize,
}

/// `pods` is `None` when the namespace could not be listed.
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceSummary {
    pub namespace: String,
    pub pods: Option<PodCount>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PolicySummary {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub accepted: Option<bool>,
    pub enforced: Option<bool>,
}

/// Informational snapshot taken at the end of a run. Nothing in it affects the exit status.
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub namespaces: Vec<NamespaceSummary>,
    pub policies: Vec<PolicySummary>,
    pub gateway_url: Option<String>,
}

fn flag(status: Option<String>) -> Option<bool> {
    status.map(|s| s == "True")
}

fn show(flag: Option<bool>) -> &'static str {
    match flag {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    }
}

fn summarize_policy(kind: &ResourceKind, object: &DynamicObject) -> PolicySummary {
    PolicySummary {
        kind: kind.kind.to_string(),
        namespace: object.metadata.namespace.clone().unwrap_or_default(),
        name: object.metadata.name.clone().unwrap_or_default(),
        accepted: flag(condition_status(object, "Accepted")),
        enforced: flag(condition_status(object, "Enforced")),
    }
}

async fn count_pods(cluster: &dyn Cluster, namespace: &str) -> Result<PodCount, Error> {
    let pods: Vec<Pod> = list_typed(cluster, &kinds::POD, Some(namespace), None).await?;
    let running = pods
        .iter()
        .filter(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"))
        .count();
    Ok(PodCount {
        running,
        total: pods.len(),
    })
}

async fn summarize_namespace(cluster: &dyn Cluster, namespace: &str) -> NamespaceSummary {
    let pods = match count_pods(cluster, namespace).await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Unable to list pods in {}: {}", namespace, e);
            None
        }
    };
    NamespaceSummary {
        namespace: namespace.to_string(),
        pods,
    }
}

pub async fn build_report(cluster: &dyn Cluster, domain: Option<&str>) -> Result<StatusReport, Error> {
    let mut namespaces = Vec::with_capacity(REPORTED_NAMESPACES.len());
    for namespace in REPORTED_NAMESPACES {
        namespaces.push(summarize_namespace(cluster, namespace).await);
    }

    let mut policies = Vec::new();
    for kind in [&kinds::AUTH_POLICY, &kinds::TOKEN_RATE_LIMIT_POLICY] {
        // Missing policy CRDs just mean there is nothing to report yet.
        match cluster.list(kind, None, None).await {
            Ok(objects) => policies.extend(objects.iter().map(|o| summarize_policy(kind, o))),
            Err(e) => debug!("Unable to list {}: {}", kind, e),
        }
    }

    Ok(StatusReport {
        generated_at: Utc::now(),
        namespaces,
        policies,
        gateway_url: domain.map(|d| format!("https://maas.{}", d)),
    })
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "Status report ({})", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Pods running:")?;
        for ns in &self.namespaces {
            match ns.pods {
                Some(count) => writeln!(f, "  {:<18} {}/{}", ns.namespace, count.running, count.total)?,
                None => writeln!(f, "  {:<18} unknown", ns.namespace)?,
            }
        }
        writeln!(f, "Policies:")?;
        if self.policies.is_empty() {
            writeln!(f, "  none found")?;
        }
        for p in &self.policies {
            writeln!(
                f,
                "  {:<22} {}/{}  accepted: {}  enforced: {}",
                p.kind,
                p.namespace,
                p.name,
                show(p.accepted),
                show(p.enforced)
            )?;
        }
        match &self.gateway_url {
            Some(url) => writeln!(f, "Gateway: {}", url),
            None => writeln!(f, "Gateway: cluster domain unknown"),
        }
    }
}

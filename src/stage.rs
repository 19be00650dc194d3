use std::time::Duration;

use crate::poll::PollSpec;
use crate::verify::StatusReport;

/// What a stage does before its waits run.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Confirm the cluster is OpenShift and record its version.
    VerifyPlatform,
    /// Resolve the public application domain, from the override or the ingress config.
    ResolveClusterDomain,
    /// Enable Gateway API feature gates on clusters older than `minimum`.
    FeatureGates {
        minimum: &'static str,
        settle: Duration,
    },
    /// Create namespaces, tolerating ones that already exist.
    CreateNamespaces(Vec<&'static str>),
    /// Render and apply a manifest bundle below the manifests root.
    Apply(&'static str),
    /// Apply a bundle only when the named CRD is not yet registered.
    InstallIfAbsent {
        crd: &'static str,
        bundle: &'static str,
    },
    /// Restart a deployment so it re-reads configuration created after it started.
    RolloutRestart {
        namespace: &'static str,
        name: &'static str,
    },
    /// Best-effort runtime corrections.
    PostDeploy,
    /// Gather the final status report.
    Report,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Action::VerifyPlatform => write!(f, "verify platform"),
            Action::ResolveClusterDomain => write!(f, "resolve cluster domain"),
            Action::FeatureGates { minimum, .. } => write!(f, "feature gates below {}", minimum),
            Action::CreateNamespaces(namespaces) => {
                write!(f, "create namespaces {}", namespaces.join(", "))
            }
            Action::Apply(bundle) => write!(f, "apply {}", bundle),
            Action::InstallIfAbsent { crd, bundle } => {
                write!(f, "apply {} unless {} exists", bundle, crd)
            }
            Action::RolloutRestart { namespace, name } => {
                write!(f, "restart {}/{}", namespace, name)
            }
            Action::PostDeploy => write!(f, "post-deploy patches"),
            Action::Report => write!(f, "status report"),
        }
    }
}

/// Whether a stage that does not converge stops the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    Abort,
    WarnAndContinue,
}

#[derive(Clone, Debug)]
pub struct StageSpec {
    pub name: &'static str,
    pub after: Vec<&'static str>,
    pub action: Option<Action>,
    pub waits: Vec<PollSpec>,
    pub policy: FailurePolicy,
}

impl StageSpec {
    pub fn new(name: &'static str) -> StageSpec {
        StageSpec {
            name,
            after: Vec::new(),
            action: None,
            waits: Vec::new(),
            policy: FailurePolicy::WarnAndContinue,
        }
    }

    pub fn after(mut self, stages: &[&'static str]) -> StageSpec {
        self.after.extend_from_slice(stages);
        self
    }

    pub fn action(mut self, action: Action) -> StageSpec {
        self.action = Some(action);
        self
    }

    pub fn wait(mut self, spec: PollSpec) -> StageSpec {
        self.waits.push(spec);
        self
    }

    pub fn abort_on_failure(mut self) -> StageSpec {
        self.policy = FailurePolicy::Abort;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StageStatus {
    Completed,
    Skipped(String),
    Degraded(String),
    Aborted(String),
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let message: String = match self {
            StageStatus::Completed => "Completed".into(),
            StageStatus::Skipped(_) => "Skipped".into(),
            StageStatus::Degraded(_) => "Degraded".into(),
            StageStatus::Aborted(_) => "Aborted".into(),
        };
        write!(f, "{}", message)
    }
}

impl StageStatus {
    pub fn message(&self) -> String {
        match self {
            StageStatus::Completed => "converged".to_string(),
            StageStatus::Skipped(reason) => format!("skipped: {}", reason),
            StageStatus::Degraded(detail) => format!("did not converge: {}", detail),
            StageStatus::Aborted(detail) => format!("aborted the run: {}", detail),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StageResult {
    pub name: &'static str,
    pub status: StageStatus,
    pub elapsed: Duration,
}

/// Everything a run did, for the closing summary.
#[derive(Clone, Debug, Default)]
pub struct RunOutcome {
    pub stages: Vec<StageResult>,
    pub report: Option<StatusReport>,
}

impl RunOutcome {
    pub fn degraded(&self) -> impl Iterator<Item = &StageResult> {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Degraded(_)))
    }

    #[cfg(test)]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "Deployment summary")?;
        for stage in &self.stages {
            writeln!(
                f,
                "  {:<28} {:<10} {:>6}  {}",
                stage.name,
                stage.status.to_string(),
                format!("{:.0?}", stage.elapsed),
                stage.status.message()
            )?;
        }
        if let Some(report) = &self.report {
            write!(f, "\n{}", report)?;
        }
        Ok(())
    }
}

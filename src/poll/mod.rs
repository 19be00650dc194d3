//! Readiness pollers.
//!
//! Every poller follows the same contract: fetch fresh state, evaluate a predicate,
//! sleep a fixed interval, and give up once the total budget is spent. Running out
//! of budget is an ordinary [`Outcome::TimedOut`], never an error; the caller
//! decides what a timeout means for the run.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::cluster::{Cluster, ResourceKind};
use crate::deployer::Error;

mod condition;
mod crd;
mod install;
mod pods;
mod rollout;
mod webhook;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    TimedOut,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let message = match self {
            Outcome::Ready => "ready",
            Outcome::TimedOut => "timed out",
            Outcome::Failed => "failed",
        };
        write!(f, "{}", message)
    }
}

#[derive(Clone, Debug)]
pub struct PollResult {
    pub outcome: Outcome,
    pub elapsed: Duration,
    pub last_observed: String,
}

impl PollResult {
    pub fn is_ready(&self) -> bool {
        self.outcome == Outcome::Ready
    }
}

/// What to wait for. Each variant carries the resource key; the predicate is
/// implied by the variant.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitTarget {
    /// Definition exists and reports `Established=True`.
    CrdEstablished { name: String },
    /// First ClusterServiceVersion whose name starts with `name` reaches `Succeeded`.
    InstallSucceeded { namespace: String, name: String },
    /// Every pod in the namespace is running or completed.
    PodsReady { namespace: String },
    /// Every service behind a validating webhook in the namespace has a ready endpoint.
    WebhookEndpoints { namespace: String },
    /// Deployment has rolled out its current generation.
    RolloutComplete { namespace: String, name: String },
    /// Object reports `status.conditions[type=condition].status == "True"`.
    Condition {
        kind: ResourceKind,
        namespace: Option<String>,
        name: String,
        condition: String,
    },
}

impl std::fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            WaitTarget::CrdEstablished { name } => write!(f, "CRD {} established", name),
            WaitTarget::InstallSucceeded { namespace, name } => {
                write!(f, "install {}/{} succeeded", namespace, name)
            }
            WaitTarget::PodsReady { namespace } => write!(f, "pods in {} ready", namespace),
            WaitTarget::WebhookEndpoints { namespace } => {
                write!(f, "webhook endpoints in {} ready", namespace)
            }
            WaitTarget::RolloutComplete { namespace, name } => {
                write!(f, "rollout of {}/{} complete", namespace, name)
            }
            WaitTarget::Condition {
                kind,
                namespace,
                name,
                condition,
            } => match namespace {
                Some(ns) => write!(f, "{} {}/{} {}", kind.kind, ns, name, condition),
                None => write!(f, "{} {} {}", kind.kind, name, condition),
            },
        }
    }
}

/// A single convergence condition with its time budget.
#[derive(Clone, Debug, PartialEq)]
pub struct PollSpec {
    target: WaitTarget,
    timeout: Duration,
    interval: Duration,
}

impl PollSpec {
    pub fn new(target: WaitTarget, timeout: Duration, interval: Duration) -> Result<PollSpec, Error> {
        if timeout.is_zero() || interval.is_zero() {
            return Err(Error::InvalidPollSpec(format!(
                "{}: timeout and interval must be positive",
                target
            )));
        }
        if interval > timeout {
            return Err(Error::InvalidPollSpec(format!(
                "{}: interval {:?} exceeds timeout {:?}",
                target, interval, timeout
            )));
        }
        Ok(PollSpec {
            target,
            timeout,
            interval,
        })
    }

    pub fn target(&self) -> &WaitTarget {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Display for PollSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} (within {:?})", self.target, self.timeout)
    }
}

/// Blocks until the spec's predicate holds, the budget runs out, or a terminal
/// failure is observed.
pub async fn wait(cluster: &dyn Cluster, spec: &PollSpec) -> PollResult {
    let started = Instant::now();
    let deadline = started + spec.timeout();
    let interval = spec.interval();

    match &spec.target {
        WaitTarget::CrdEstablished { name } => {
            crd::wait_established(cluster, name, started, deadline, interval).await
        }
        WaitTarget::InstallSucceeded { namespace, name } => {
            let mut probe = install::InstallProbe::new(cluster, namespace, name);
            poll_until(&mut probe, started, deadline, interval).await
        }
        WaitTarget::PodsReady { namespace } => {
            let mut probe = pods::PodsProbe { cluster, namespace };
            poll_until(&mut probe, started, deadline, interval).await
        }
        WaitTarget::WebhookEndpoints { namespace } => {
            let mut probe = webhook::WebhookProbe { cluster, namespace };
            poll_until(&mut probe, started, deadline, interval).await
        }
        WaitTarget::RolloutComplete { namespace, name } => {
            let mut probe = rollout::RolloutProbe {
                cluster,
                namespace,
                name,
            };
            poll_until(&mut probe, started, deadline, interval).await
        }
        WaitTarget::Condition {
            kind,
            namespace,
            name,
            condition,
        } => {
            let mut probe = condition::ConditionProbe {
                cluster,
                kind,
                namespace: namespace.as_deref(),
                name,
                condition,
            };
            poll_until(&mut probe, started, deadline, interval).await
        }
    }
}

/// What a single look at the cluster found.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Observation {
    Ready(String),
    Pending(String),
    Failed(String),
}

#[async_trait]
pub(crate) trait Probe: Send {
    async fn observe(&mut self) -> Result<Observation, Error>;
}

/// The shared loop: probe, then sleep `interval` (clamped to the deadline) until
/// the probe settles or the deadline passes.
///
/// Probe errors count as "not ready yet". A probe still outstanding at the
/// deadline is dropped.
pub(crate) async fn poll_until(
    probe: &mut dyn Probe,
    started: Instant,
    deadline: Instant,
    interval: Duration,
) -> PollResult {
    let mut last_observed = String::from("nothing observed yet");
    loop {
        match tokio::time::timeout_at(deadline, probe.observe()).await {
            Ok(Ok(Observation::Ready(state))) => {
                return finish(Outcome::Ready, started, state);
            }
            Ok(Ok(Observation::Failed(state))) => {
                return finish(Outcome::Failed, started, state);
            }
            Ok(Ok(Observation::Pending(state))) => last_observed = state,
            Ok(Err(e)) => {
                debug!("Probe error, retrying: {}", e);
                last_observed = e.to_string();
            }
            Err(_) => return finish(Outcome::TimedOut, started, last_observed),
        }

        let now = Instant::now();
        if now >= deadline {
            return finish(Outcome::TimedOut, started, last_observed);
        }
        tokio::time::sleep_until(std::cmp::min(now + interval, deadline)).await;
    }
}

fn finish(outcome: Outcome, started: Instant, last_observed: String) -> PollResult {
    PollResult {
        outcome,
        elapsed: started.elapsed(),
        last_observed,
    }
}
